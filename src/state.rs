//! Shared application state.
//!
//! One instance is built at startup and cloned into every handler through
//! axum's `State` extractor.

use std::sync::Arc;

use crate::{db::DbPool, services::lifecycle::KeyService};

#[derive(Clone)]
pub struct AppState {
    /// Used by the health check.
    pub pool: DbPool,

    pub keys: Arc<KeyService>,
}
