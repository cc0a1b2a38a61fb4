// Application state for HTTP handlers
use crate::application::engine::AnalyticsEngine;

pub struct AppState {
    pub engine: AnalyticsEngine,
}
