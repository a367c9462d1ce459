use std::sync::Arc;

use crate::config::Config;
use crate::generation::orchestrator::Orchestrator;
use crate::repository::ItemRepository;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Item generation. Holds the model client, manual cache and fallback bank.
    pub orchestrator: Arc<Orchestrator>,
    pub repository: Arc<ItemRepository>,
    pub config: Config,
}
