//! HTTP control plane
//!
//! Thin layer over the core: handlers translate between HTTP and the scan
//! executor / DAO, nothing more.

mod handlers;
mod types;

pub use handlers::create_router;
#[allow(unused_imports)] // Public API re-exports
pub use types::*;

use crate::db::Database;
use crate::engine::{ScanExecutor, ScanQueue};
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub executor: Arc<ScanExecutor>,
    pub queue: Arc<ScanQueue>,
}

impl AppState {
    pub fn new(db: Database, executor: Arc<ScanExecutor>, queue: Arc<ScanQueue>) -> Self {
        Self {
            db,
            executor,
            queue,
        }
    }
}
