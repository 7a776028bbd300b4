//! Application state for the HTTP surface

use crate::ExtractorAgent;

/// Shared state accessible to all route handlers
///
/// Cloned per request; the agent itself is a bundle of Arcs.
#[derive(Clone)]
pub struct AppState {
    /// The agent serving requests
    pub agent: ExtractorAgent,
}

impl AppState {
    /// Create a new AppState
    pub fn new(agent: ExtractorAgent) -> Self {
        Self { agent }
    }
}
