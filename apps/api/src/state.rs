use std::sync::Arc;

use crate::db::{ConnectionProbe, Database};

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// The one client handle for this process. Clones share its pool.
    pub db: Database,
    /// Reachability probe used by `/health`. Points at `db` in production.
    pub probe: Arc<dyn ConnectionProbe>,
}

impl AppState {
    pub fn new(db: Database) -> Self {
        Self {
            probe: Arc::new(db.clone()),
            db,
        }
    }
}
