//! HTTP surface for operators: liveness and ledger statistics

mod handlers;
mod types;

pub use handlers::create_router;

use crate::runtime::Ledger;
use crate::session::SessionStore;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<dyn Ledger>,
    pub sessions: Arc<dyn SessionStore>,
}

impl AppState {
    pub fn new(ledger: Arc<dyn Ledger>, sessions: Arc<dyn SessionStore>) -> Self {
        Self { ledger, sessions }
    }
}
