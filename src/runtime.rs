//! Runtime for driving conversations
//!
//! The `Broker` takes one inbound interaction at a time per principal,
//! runs it through the state machine and executes the resulting effects.
//! The session is written back only after the whole chain of transitions
//! has run, with the revision it was loaded at.

mod executor;
mod external;
mod locks;
pub mod poller;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use external::{CallGuard, Guarded};
pub use locks::KeyedLocks;
pub use traits::*;

use crate::domain::PrincipalId;
use crate::error::{BrokerError, BrokerResult};
use crate::messaging::{Inbound, OutboundMessage};
use crate::orders::{OrderLifecycle, PaymentGateway};
use crate::session::{Session, SessionStore};
use crate::state_machine::{transition, ConvContext, ConvState, TransitionError};
use executor::EffectExecutor;
use std::collections::HashSet;
use std::sync::Arc;

const INTERNAL_ERROR_REPLY: &str = "⚠️ Something went wrong. Send /start to begin again.";

/// Coordinates sessions, the state machine and the collaborators
pub struct Broker<L: Ledger, M: Messenger, S: SessionStore> {
    ledger: Arc<L>,
    messenger: Arc<M>,
    sessions: Arc<S>,
    lifecycle: Arc<OrderLifecycle<L, M>>,
    executor: EffectExecutor<L, M>,
    /// One interaction at a time per principal
    turns: KeyedLocks<PrincipalId>,
}

impl<L: Ledger, M: Messenger, S: SessionStore> Broker<L, M, S> {
    pub fn new(
        ledger: Arc<L>,
        messenger: Arc<M>,
        sessions: Arc<S>,
        payments: Arc<dyn PaymentGateway>,
        admins: HashSet<PrincipalId>,
    ) -> Self {
        let lifecycle = Arc::new(OrderLifecycle::new(
            ledger.clone(),
            messenger.clone(),
            payments,
            admins,
        ));
        Self {
            executor: EffectExecutor::new(ledger.clone(), messenger.clone(), lifecycle.clone()),
            ledger,
            messenger,
            sessions,
            lifecycle,
            turns: KeyedLocks::new(),
        }
    }

    pub fn lifecycle(&self) -> &Arc<OrderLifecycle<L, M>> {
        &self.lifecycle
    }

    /// Handle one interaction and return the principal's resulting state.
    ///
    /// If the future is dropped midway the stored session keeps its
    /// previous value.
    pub async fn handle(&self, inbound: Inbound) -> BrokerResult<ConvState> {
        let Inbound {
            principal,
            display_name,
            event,
        } = inbound;
        let _turn = self.turns.lock(&principal).await;

        let session = match self.begin(principal, &display_name).await {
            Ok(session) => session,
            Err(e) => {
                self.reply(principal, e.user_message()).await;
                return Err(e);
            }
        };
        let context = ConvContext::new(
            principal,
            display_name,
            self.lifecycle.is_admin(principal),
        );

        let mut state = session.state.clone();
        let mut pending = vec![event];
        while let Some(event) = pending.pop() {
            let result = match transition(&state, &context, event) {
                Ok(result) => result,
                Err(TransitionError::Validation(message)) => {
                    tracing::debug!(principal = %principal, state = state.name(), "Input rejected");
                    self.reply(principal, message).await;
                    continue;
                }
                Err(e @ TransitionError::InvalidTransition(_)) => {
                    tracing::error!(
                        principal = %principal,
                        state = state.name(),
                        error = %e,
                        "Interaction aborted"
                    );
                    self.reply(principal, INTERNAL_ERROR_REPLY).await;
                    return Err(BrokerError::conflict(e.to_string()));
                }
            };

            state = result.new_state;
            for effect in result.effects {
                if let Some(next) = self.executor.execute(&context, effect).await {
                    pending.push(next);
                }
            }
        }

        if state != session.state {
            self.sessions
                .store(principal, session.revision, state.clone())
                .await?;
            tracing::info!(
                principal = %principal,
                from = session.state.name(),
                to = state.name(),
                "Conversation state changed"
            );
        }
        Ok(state)
    }

    async fn begin(
        &self,
        principal: PrincipalId,
        display_name: &str,
    ) -> BrokerResult<Session> {
        self.ledger.upsert_principal(principal, display_name).await?;
        Ok(self.sessions.load(principal).await?)
    }

    async fn reply(&self, principal: PrincipalId, text: impl Into<String>) {
        let message = OutboundMessage::text(text);
        if let Err(e) = self.messenger.send(principal.chat(), &message).await {
            tracing::warn!(principal = %principal, error = %e, "Reply not delivered");
        }
    }
}
