//! # trajectory-core
//!
//! Core library for trajectory - progress analysis for coaching conversations.
//!
//! This library provides:
//! - Domain types for messages, trajectory rules and progress indicators
//! - The two-tier trajectory classifier (heuristics, then LLM vs. provider rules)
//! - SQLite storage for progress indicators
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Example
//!
//! ```rust,no_run
//! use trajectory_core::trajectory::{create_client, TrajectoryClassifier};
//! use trajectory_core::{AnalyzeRequest, Config, Database};
//!
//! let config = Config::load().expect("failed to load config");
//! let db = Database::open(&Config::database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//!
//! let client = config
//!     .llm
//!     .as_ref()
//!     .map(|llm| create_client(llm).expect("failed to create LLM client"));
//!
//! let mut classifier = TrajectoryClassifier::new(&db);
//! if let Some(client) = client.as_deref() {
//!     classifier = classifier.with_llm(client);
//! }
//!
//! let response = classifier
//!     .analyze(AnalyzeRequest::default())
//!     .map(|c| c.into_response());
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use db::Database;
pub use error::{Error, Result};
pub use types::*;

// Public modules
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod trajectory;
pub mod types;
