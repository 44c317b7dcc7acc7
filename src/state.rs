use crate::config::Config;
use crate::db::PgStore;
use crate::pipeline::GradingOrchestrator;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: PgStore,
    pub config: Arc<Config>,
    pub orchestrator: Arc<GradingOrchestrator>,
}
