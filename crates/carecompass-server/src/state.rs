//! Shared request state.

use carecompass_core::{Metrics, ServerConfig};
use carecompass_store::Store;
use std::sync::Arc;

pub struct AppState {
    pub store: Arc<Store>,
    pub config: ServerConfig,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(store: Arc<Store>, config: ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            store,
            config,
            metrics: Metrics::new(),
        })
    }
}
