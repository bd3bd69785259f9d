//! Database layer for trajectory
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - Repository for progress indicators

pub mod repo;
pub mod schema;

pub use repo::{Database, NewIndicator};
