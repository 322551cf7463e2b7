//! Conversation state machine
//!
//! Implements the Elm Architecture pattern with pure state transitions.
//! Views render replies; the runtime executes effects and feeds their
//! results back in.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;
pub mod views;

#[cfg(test)]
mod proptests;

pub use effect::{Effect, Operation};
pub use event::{Action, Command, Event, MAX_CALLBACK_LEN};
pub use state::{ConvContext, ConvState, PricingTarget};
pub use transition::{transition, TransitionError, TransitionResult};
