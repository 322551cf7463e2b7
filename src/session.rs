//! Session store
//!
//! Holds the conversation state of each principal. Writes carry the revision
//! that was read, so a stale writer is rejected instead of silently
//! overwriting a newer state.

use crate::domain::PrincipalId;
use crate::state_machine::ConvState;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session of {principal} changed concurrently (expected revision {expected})")]
    Conflict { principal: PrincipalId, expected: u64 },
    #[error("session store unavailable: {0}")]
    Unavailable(String),
}

/// A principal's conversation state and its write revision
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Session {
    pub state: ConvState,
    /// 0 for a principal that has never been stored
    pub revision: u64,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Current session, or a fresh `Idle` session on first contact
    async fn load(&self, principal: PrincipalId) -> Result<Session, SessionError>;

    /// Replace the state if the stored revision still equals `expected`
    async fn store(
        &self,
        principal: PrincipalId,
        expected: u64,
        state: ConvState,
    ) -> Result<Session, SessionError>;

    /// Number of principals currently away from `Idle`
    async fn active_count(&self) -> Result<usize, SessionError>;
}

/// Process-local store; sessions do not survive a restart
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<PrincipalId, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, principal: PrincipalId) -> Result<Session, SessionError> {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(sessions.get(&principal).cloned().unwrap_or_default())
    }

    async fn store(
        &self,
        principal: PrincipalId,
        expected: u64,
        state: ConvState,
    ) -> Result<Session, SessionError> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let current = sessions.get(&principal).map_or(0, |s| s.revision);
        if current != expected {
            return Err(SessionError::Conflict {
                principal,
                expected,
            });
        }

        let session = Session {
            state,
            revision: expected + 1,
        };
        sessions.insert(principal, session.clone());
        Ok(session)
    }

    async fn active_count(&self) -> Result<usize, SessionError> {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(sessions
            .values()
            .filter(|s| !matches!(s.state, ConvState::Idle))
            .count())
    }
}
