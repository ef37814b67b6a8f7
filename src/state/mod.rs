use std::sync::Arc;

use crate::audio::engine::StreamEngineFactory;
use crate::config::EffectiveConfig;
use crate::queue::QueueCoordinator;

#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<QueueCoordinator>,
    pub stream: Arc<StreamEngineFactory>,
    pub cfg: Arc<EffectiveConfig>,
}

impl AppState {
    pub fn new(cfg: EffectiveConfig, queue: Arc<QueueCoordinator>, stream: Arc<StreamEngineFactory>) -> Self {
        Self { queue, stream, cfg: Arc::new(cfg) }
    }
}
