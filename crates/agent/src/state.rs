//! Shared handler state
//!
//! The process-wide singletons are constructed once in `main` and passed
//! to every handler through this state, never reached ambiently.

use std::sync::Arc;

use nfc_agent_tags::CardService;

use crate::logring::LogRing;
use crate::ws::hub::Hub;

/// State shared by both API surfaces
#[derive(Clone, Debug)]
pub struct AppState {
    /// The card facade
    pub service: Arc<CardService>,
    /// The streaming session hub
    pub hub: Arc<Hub>,
    /// The client-visible log ring
    pub logs: Arc<LogRing>,
}
