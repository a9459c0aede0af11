use crate::log_buffer::LogBuffer;
use crawlforge_rotation::RotationManager;
use crawlforge_store::Store;
use std::sync::Arc;
use std::time::Instant;

/// Shared state injected into every handler via `axum::extract::State`
/// (§4.9). Cheap to clone — every field is an `Arc` or `Copy`.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn Store>,
    pub rotation: Arc<RotationManager>,
    pub logs: Arc<LogBuffer>,
    pub started_at: Instant,
}

impl ApiState {
    pub fn new(store: Arc<dyn Store>, rotation: Arc<RotationManager>, logs: Arc<LogBuffer>) -> Self {
        Self {
            store,
            rotation,
            logs,
            started_at: Instant::now(),
        }
    }
}
