//! Shared application state for all routes.

use crate::config::Settings;
use crate::registry::Registry;
use crate::store::Store;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    /// Populated before the router is built; read-only afterwards.
    pub registry: Arc<Registry>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, registry: Registry, settings: Settings) -> Self {
        AppState {
            store,
            registry: Arc::new(registry),
            settings: Arc::new(settings),
        }
    }
}
