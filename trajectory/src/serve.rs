//! trajectory-serve - HTTP service for trajectory analysis
//!
//! Exposes the classifier at `POST /api/trajectory/analyze` and the stored
//! indicator history at `GET /api/sessions/:id/indicators`.

mod server;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use trajectory_core::trajectory::{create_client, LlmClient};
use trajectory_core::{Config, Database};

#[derive(Parser)]
#[command(name = "trajectory-serve")]
#[command(about = "Serve trajectory analysis over HTTP")]
#[command(version)]
struct Args {
    /// Address to listen on (overrides [server].bind)
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();

    // Load configuration
    let config = Config::load().context("failed to load configuration")?;

    // Initialize logging
    let _log_guard =
        trajectory_core::logging::init(&config.logging).context("failed to initialize logging")?;

    // Open database
    let db_path = Config::database_path();
    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    let llm: Option<Arc<dyn LlmClient>> = match &config.llm {
        Some(llm) if llm.has_credential() => match create_client(llm) {
            Ok(client) => {
                tracing::info!(
                    provider = llm.provider.as_str(),
                    model = %llm.model,
                    "Rule-based classification enabled"
                );
                Some(Arc::from(client))
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "LLM client unavailable, rule-based classification disabled"
                );
                None
            }
        },
        Some(llm) => {
            tracing::warn!(
                provider = llm.provider.as_str(),
                "No API key for LLM provider, rule-based classification disabled"
            );
            None
        }
        None => {
            tracing::warn!("No [llm] configured, rule-based classification disabled");
            None
        }
    };

    let state = Arc::new(server::AppState {
        db: Arc::new(db),
        llm,
        recent_limit: config.history.recent_limit,
    });
    let app = server::create_router(state);

    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;

    tracing::info!(address = %bind, db = %db_path.display(), "Trajectory service listening");
    println!("Listening on http://{}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("Trajectory service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}
