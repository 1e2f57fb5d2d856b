use std::sync::Arc;
use std::time::Instant;

use crate::config::Settings;
use crate::connection_manager::StreamManager;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub manager: Arc<StreamManager>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(settings: Arc<Settings>, manager: Arc<StreamManager>) -> Self {
        Self {
            settings,
            manager,
            start_time: Instant::now(),
        }
    }
}
