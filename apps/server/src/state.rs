//! Shared handler state

use flvgrab_core::GrabCore;
use std::sync::Arc;

/// State handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub core: Arc<GrabCore>,
}

impl AppState {
    pub fn new(core: GrabCore) -> Self {
        Self {
            core: Arc::new(core),
        }
    }
}
