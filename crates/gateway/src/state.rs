//! Shared application state handed to every axum handler via `State`.

use std::sync::Arc;

use ts_domain::config::Config;
use ts_engine::{CancelMap, StreamHub, ToolRegistry, TurnLockMap};
use ts_providers::ProviderRegistry;
use ts_store::TurnStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<TurnStore>,
    pub providers: Arc<ProviderRegistry>,
    pub hub: Arc<StreamHub>,
    pub turn_locks: Arc<TurnLockMap>,
    pub cancel_map: Arc<CancelMap>,
    pub tools: Arc<dyn ToolRegistry>,
}
