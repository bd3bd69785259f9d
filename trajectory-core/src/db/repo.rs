//! Database repository layer
//!
//! Provides insert and query operations for progress indicators.

use crate::error::Result;
use crate::trajectory::IndicatorStore;
use crate::types::{IndicatorDetail, IndicatorType, ProgressIndicator};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Indicator ready to insert; the store assigns `id` and `created_at`.
#[derive(Debug, Clone, Copy)]
pub struct NewIndicator<'a> {
    pub session_id: &'a str,
    pub indicator_type: IndicatorType,
    pub detail: &'a IndicatorDetail,
}

/// Database handle (single connection behind a mutex)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.connection();
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave SQLite half-written
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ============================================
    // Progress indicator operations
    // ============================================

    /// Insert a progress indicator and return the stored row
    pub fn insert_indicator(&self, new: &NewIndicator<'_>) -> Result<ProgressIndicator> {
        let created_at = Utc::now();
        let detail_json = serde_json::to_string(new.detail)?;

        let conn = self.connection();
        conn.execute(
            r#"
            INSERT INTO progress_indicators (session_id, indicator_type, detail, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                new.session_id,
                new.indicator_type.as_str(),
                detail_json,
                format_ts(&created_at),
            ],
        )?;
        let id = conn.last_insert_rowid();

        tracing::debug!(
            id,
            session_id = new.session_id,
            indicator_type = new.indicator_type.as_str(),
            "Stored progress indicator"
        );

        Ok(ProgressIndicator {
            id: Some(id),
            session_id: new.session_id.to_string(),
            indicator_type: new.indicator_type,
            detail: new.detail.clone(),
            created_at,
        })
    }

    /// Most recent indicators for a session, newest first
    pub fn recent_indicators(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ProgressIndicator>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, session_id, indicator_type, detail, created_at
            FROM progress_indicators
            WHERE session_id = ?1
            ORDER BY created_at DESC, id DESC
            LIMIT ?2
            "#,
        )?;

        let rows = stmt
            .query_map(params![session_id, limit as i64], Self::row_to_indicator)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Count indicators stored for a session
    pub fn count_indicators(&self, session_id: &str) -> Result<i64> {
        let conn = self.connection();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM progress_indicators WHERE session_id = ?",
            [session_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn row_to_indicator(row: &Row) -> rusqlite::Result<ProgressIndicator> {
        let type_str: String = row.get("indicator_type")?;
        let detail_str: String = row.get("detail")?;
        let created_at_str: String = row.get("created_at")?;

        let indicator_type = type_str.parse::<IndicatorType>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                Box::<dyn std::error::Error + Send + Sync>::from(e),
            )
        })?;

        let id: i64 = row.get("id")?;

        let detail = serde_json::from_str(&detail_str).unwrap_or_else(|e| {
            tracing::warn!(id, error = %e, "Unreadable indicator detail, using empty detail");
            IndicatorDetail::default()
        });
        let created_at = DateTime::parse_from_rfc3339(&created_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|e| {
                tracing::warn!(
                    id,
                    created_at = %created_at_str,
                    error = %e,
                    "Unreadable indicator timestamp, using now"
                );
                Utc::now()
            });

        Ok(ProgressIndicator {
            id: Some(id),
            session_id: row.get("session_id")?,
            indicator_type,
            detail,
            created_at,
        })
    }
}

impl IndicatorStore for Database {
    fn insert_indicator(&self, new: &NewIndicator<'_>) -> Result<ProgressIndicator> {
        Database::insert_indicator(self, new)
    }
}

/// Fixed-width timestamps so lexical order matches time order.
fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}
