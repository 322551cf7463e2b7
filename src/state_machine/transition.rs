//! Pure state transition function
//!
//! Every input and every effect result for a principal passes through
//! [`transition`]. It performs no I/O: collaborator calls are requested as
//! effects and their outcomes come back as events.

use super::effect::Operation;
use super::event::{Action, Command};
use super::state::PricingTarget;
use super::views;
use super::{ConvContext, ConvState, Effect, Event};
use crate::domain::{Creative, OrderAction, OrderId, PriceList};
use crate::error::BrokerError;
use crate::gate::remediation;
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: ConvState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: ConvState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error, PartialEq)]
pub enum TransitionError {
    /// Input not acceptable in the current state; the text goes back to the
    /// principal and the state is kept
    #[error("{0}")]
    Validation(String),
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

fn invalid(state: &ConvState, reason: &str) -> TransitionError {
    TransitionError::Validation(format!("❌ {reason}\n\n⏳ {}", state.expectation()))
}

fn stay(state: &ConvState) -> TransitionResult {
    TransitionResult::new(state.clone())
}

/// States that accept only one kind of input besides start-over and help
fn is_strict(state: &ConvState) -> bool {
    matches!(
        state,
        ConvState::AwaitingChannelForward | ConvState::AwaitingPricing { .. }
    )
}

/// Pure transition function
pub fn transition(
    state: &ConvState,
    context: &ConvContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match event {
        // ============================================================
        // Start over and help, accepted everywhere
        // ============================================================
        Event::Command(Command::Start | Command::Cancel) | Event::Action(Action::MainMenu) => {
            Ok(TransitionResult::new(ConvState::Idle)
                .with_effect(Effect::Reply(views::main_menu(&context.display_name))))
        }

        Event::Command(Command::Help) => {
            Ok(stay(state).with_effect(Effect::Reply(views::help())))
        }

        Event::Command(Command::Usage(usage)) => Err(TransitionError::Validation(format!(
            "❌ Usage: {usage}"
        ))),

        Event::Command(Command::Unknown(name)) => Err(TransitionError::Validation(format!(
            "❌ Unknown command /{name}. Send /help to see what I can do."
        ))),

        // The strict steps reject everything else before any other rule runs
        Event::Command(_) | Event::Action(_) if is_strict(state) => {
            Err(invalid(state, "Finish or /cancel this step first."))
        }

        Event::Command(command) => command_input(state, context, command),
        Event::Action(action) => action_input(state, action),

        // ============================================================
        // Free-form input
        // ============================================================
        Event::ForwardedChannel(draft) => match state {
            ConvState::AwaitingChannelForward => {
                Ok(stay(state).with_effect(Effect::VerifyChannel { draft }))
            }
            ConvState::Idle => Ok(stay(state).with_effect(Effect::Reply(views::main_menu(
                &context.display_name,
            )))),
            _ => Err(invalid(state, "I wasn't expecting a forwarded message.")),
        },

        Event::Text(text) => text_input(state, context, text),

        Event::Media { media, caption } => match state {
            ConvState::AwaitingCreativeText { order_id } => {
                match caption.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
                    Some(text) => Ok(stay(state).with_effect(Effect::SubmitCreative {
                        order_id: *order_id,
                        creative: Creative {
                            text: text.to_string(),
                            media: Some(media),
                        },
                    })),
                    None => Err(invalid(
                        state,
                        "Add your ad text as the caption, or send the text first.",
                    )),
                }
            }
            ConvState::AwaitingCreativeMedia { order_id, text } => {
                Ok(stay(state).with_effect(Effect::SubmitCreative {
                    order_id: *order_id,
                    creative: Creative {
                        text: text.clone(),
                        media: Some(media),
                    },
                }))
            }
            ConvState::Idle => Ok(stay(state).with_effect(Effect::Reply(views::main_menu(
                &context.display_name,
            )))),
            _ => Err(invalid(state, "I wasn't expecting a photo or video.")),
        },

        // ============================================================
        // Effect results
        // ============================================================
        Event::ChannelVerified { target, rights } => {
            let accepts = match (&target, state) {
                (PricingTarget::New { .. }, ConvState::AwaitingChannelForward) => true,
                (PricingTarget::Existing { .. }, ConvState::Idle) => true,
                _ => false,
            };
            if !accepts {
                return Err(TransitionError::InvalidTransition(format!(
                    "channel verification in state {}",
                    state.name()
                )));
            }
            if rights.is_sufficient() {
                let prompt = views::pricing_prompt(&target);
                Ok(TransitionResult::new(ConvState::AwaitingPricing { target })
                    .with_effect(Effect::Reply(prompt)))
            } else {
                Ok(TransitionResult::new(ConvState::Idle)
                    .with_effect(Effect::reply(remediation(rights))))
            }
        }

        Event::ChannelSaved { channel, created } => match state {
            ConvState::AwaitingPricing { .. } => Ok(TransitionResult::new(ConvState::Idle)
                .with_effect(Effect::Reply(views::channel_saved(&channel, created)))),
            _ => Err(TransitionError::InvalidTransition(format!(
                "channel saved in state {}",
                state.name()
            ))),
        },

        Event::ChannelLoaded { channel } => match state {
            ConvState::Idle => {
                let menu = views::ad_type_menu(&channel);
                Ok(TransitionResult::new(ConvState::AwaitingAdTypeSelection {
                    channel_id: channel.id,
                    channel_title: channel.title,
                    prices: channel.prices,
                })
                .with_effect(Effect::Reply(menu)))
            }
            _ => Err(TransitionError::InvalidTransition(format!(
                "channel loaded in state {}",
                state.name()
            ))),
        },

        Event::OrderCreated { order, .. } => match state {
            ConvState::AwaitingPurchaseConfirmation { .. } => {
                let menu = views::payment_menu(order.id, order.price);
                Ok(TransitionResult::new(ConvState::AwaitingPaymentSelection {
                    order_id: order.id,
                    price: order.price,
                })
                .with_effect(Effect::Reply(menu)))
            }
            _ => Err(TransitionError::InvalidTransition(format!(
                "order created in state {}",
                state.name()
            ))),
        },

        Event::OrderUpdated { order, action } => Ok(order_updated(state, order, action)),

        Event::ChannelToggled { channel } => {
            Ok(stay(state).with_effect(Effect::Reply(views::channel_toggled(&channel))))
        }

        Event::ChannelsListed { channels, owned } => {
            Ok(stay(state).with_effect(Effect::Reply(views::channel_list(&channels, owned))))
        }

        Event::OrdersListed {
            orders,
            awaiting_review,
        } => Ok(stay(state).with_effect(Effect::Reply(views::order_list(
            &orders,
            &awaiting_review,
        )))),

        Event::OperationFailed { op, error } => Ok(operation_failed(state, op, &error)),
    }
}

// ============================================================================
// Input handlers
// ============================================================================

fn command_input(
    state: &ConvState,
    context: &ConvContext,
    command: Command,
) -> Result<TransitionResult, TransitionError> {
    match command {
        Command::Browse => Ok(TransitionResult::new(ConvState::Idle)
            .with_effect(Effect::ListChannels { owned: false })),
        Command::MyOrders => Ok(stay(state).with_effect(Effect::ListOrders)),
        Command::MyChannels => Ok(stay(state).with_effect(Effect::ListChannels { owned: true })),
        Command::Reject { order_id, note } => {
            Ok(stay(state).with_effect(Effect::Reject { order_id, note }))
        }
        Command::Refund(order_id) if context.is_admin => {
            Ok(stay(state).with_effect(Effect::Refund { order_id }))
        }
        Command::Refund(_) => Ok(stay(state).with_effect(Effect::reply(
            BrokerError::authorization("Only platform admins can refund orders.").user_message(),
        ))),
        Command::Start
        | Command::Cancel
        | Command::Help
        | Command::Usage(_)
        | Command::Unknown(_) => Err(TransitionError::InvalidTransition(format!(
            "command {command:?} reached the state handler"
        ))),
    }
}

fn action_input(state: &ConvState, action: Action) -> Result<TransitionResult, TransitionError> {
    match (state, action) {
        // Navigation abandons whatever flow was running
        (_, Action::OwnerMenu) => {
            Ok(TransitionResult::new(ConvState::Idle)
                .with_effect(Effect::Reply(views::owner_menu())))
        }
        (_, Action::AdvertiserMenu) => Ok(TransitionResult::new(ConvState::Idle)
            .with_effect(Effect::Reply(views::advertiser_menu()))),
        (_, Action::AddChannel) => Ok(TransitionResult::new(ConvState::AwaitingChannelForward)
            .with_effect(Effect::Reply(views::forward_prompt()))),
        (_, Action::Browse) => Ok(TransitionResult::new(ConvState::Idle)
            .with_effect(Effect::ListChannels { owned: false })),
        (_, Action::SelectChannel(channel_id)) => Ok(TransitionResult::new(ConvState::Idle)
            .with_effect(Effect::LoadChannel { channel_id })),
        (_, Action::EditPrices(channel_id)) => Ok(TransitionResult::new(ConvState::Idle)
            .with_effect(Effect::PrepareRepricing { channel_id })),
        (_, Action::SubmitCreative(order_id)) => {
            Ok(TransitionResult::new(ConvState::AwaitingCreativeText { order_id })
                .with_effect(Effect::Reply(views::creative_text_prompt(order_id))))
        }

        // Side operations keep the current step
        (_, Action::MyChannels) => {
            Ok(stay(state).with_effect(Effect::ListChannels { owned: true }))
        }
        (_, Action::MyOrders) => Ok(stay(state).with_effect(Effect::ListOrders)),
        (_, Action::ToggleChannel(channel_id)) => {
            Ok(stay(state).with_effect(Effect::ToggleChannel { channel_id }))
        }
        (_, Action::CancelOrder(order_id)) => {
            Ok(stay(state).with_effect(Effect::CancelOrder { order_id }))
        }
        (_, Action::Approve(order_id)) => Ok(stay(state).with_effect(Effect::Approve { order_id })),
        (_, Action::Reject(order_id)) => Ok(stay(state).with_effect(Effect::Reject {
            order_id,
            note: None,
        })),
        (_, Action::ConfirmCompletion(order_id)) => {
            Ok(stay(state).with_effect(Effect::ConfirmCompletion { order_id }))
        }

        // Step buttons
        (
            ConvState::AwaitingAdTypeSelection {
                channel_id,
                channel_title,
                prices,
            },
            Action::SelectAdType(ad_type),
        ) => match prices.get(&ad_type) {
            Some(price) => {
                let summary = views::purchase_summary(channel_title, &ad_type, price);
                Ok(TransitionResult::new(ConvState::AwaitingPurchaseConfirmation {
                    channel_id: *channel_id,
                    channel_title: channel_title.clone(),
                    ad_type,
                    price,
                })
                .with_effect(Effect::Reply(summary)))
            }
            None => Err(invalid(
                state,
                &format!("This channel doesn't sell `{ad_type}` ads."),
            )),
        },

        (
            ConvState::AwaitingPurchaseConfirmation {
                channel_id,
                ad_type,
                ..
            },
            Action::ConfirmPurchase,
        ) => Ok(stay(state).with_effect(Effect::CreateOrder {
            channel_id: *channel_id,
            ad_type: ad_type.clone(),
        })),

        (ConvState::AwaitingPaymentSelection { order_id, .. }, Action::Pay(method)) => {
            Ok(stay(state).with_effect(Effect::PayOrder {
                order_id: *order_id,
                method,
            }))
        }

        (ConvState::AwaitingCreativeMedia { order_id, text }, Action::SkipMedia) => {
            Ok(stay(state).with_effect(Effect::SubmitCreative {
                order_id: *order_id,
                creative: Creative {
                    text: text.clone(),
                    media: None,
                },
            }))
        }

        (
            _,
            Action::SelectAdType(_) | Action::ConfirmPurchase | Action::Pay(_) | Action::SkipMedia,
        ) => Err(invalid(state, "This button is no longer active.")),

        (_, Action::MainMenu) => Err(TransitionError::InvalidTransition(
            "main menu reached the state handler".to_string(),
        )),
    }
}

fn text_input(
    state: &ConvState,
    context: &ConvContext,
    text: String,
) -> Result<TransitionResult, TransitionError> {
    match state {
        ConvState::Idle => Ok(stay(state).with_effect(Effect::Reply(views::main_menu(
            &context.display_name,
        )))),

        ConvState::AwaitingPricing { target } => {
            let prices = PriceList::parse(&text).map_err(|e| invalid(state, &e.to_string()))?;
            let effect = match target {
                PricingTarget::New { draft } => Effect::RegisterChannel {
                    draft: draft.clone(),
                    prices,
                },
                PricingTarget::Existing { channel_id, .. } => Effect::RepriceChannel {
                    channel_id: *channel_id,
                    prices,
                },
            };
            Ok(stay(state).with_effect(effect))
        }

        ConvState::AwaitingCreativeText { order_id } => {
            let text = text.trim();
            if text.is_empty() {
                return Err(invalid(state, "The ad text can't be empty."));
            }
            Ok(TransitionResult::new(ConvState::AwaitingCreativeMedia {
                order_id: *order_id,
                text: text.to_string(),
            })
            .with_effect(Effect::Reply(views::creative_media_prompt())))
        }

        ConvState::AwaitingChannelForward => Err(invalid(
            state,
            "That isn't a message forwarded from a channel.",
        )),

        ConvState::AwaitingAdTypeSelection { .. }
        | ConvState::AwaitingPurchaseConfirmation { .. }
        | ConvState::AwaitingPaymentSelection { .. }
        | ConvState::AwaitingCreativeMedia { .. } => {
            Err(invalid(state, "Please use the buttons for this step."))
        }
    }
}

// ============================================================================
// Result handlers
// ============================================================================

fn is_current_order(state: &ConvState, id: OrderId) -> bool {
    match state {
        ConvState::AwaitingPaymentSelection { order_id, .. }
        | ConvState::AwaitingCreativeText { order_id }
        | ConvState::AwaitingCreativeMedia { order_id, .. } => *order_id == id,
        _ => false,
    }
}

fn order_updated(
    state: &ConvState,
    order: crate::domain::Order,
    action: OrderAction,
) -> TransitionResult {
    let current = is_current_order(state, order.id);
    match (state, action) {
        (ConvState::AwaitingPaymentSelection { .. }, OrderAction::Pay) if current => {
            TransitionResult::new(ConvState::AwaitingCreativeText { order_id: order.id })
                .with_effect(Effect::Reply(views::creative_text_prompt(order.id)))
        }
        (ConvState::AwaitingPaymentSelection { .. }, OrderAction::Cancel) if current => {
            TransitionResult::new(ConvState::Idle)
                .with_effect(Effect::Reply(views::order_updated(&order, action)))
        }
        (
            ConvState::AwaitingCreativeText { .. } | ConvState::AwaitingCreativeMedia { .. },
            OrderAction::SubmitCreative,
        ) if current => TransitionResult::new(ConvState::Idle)
            .with_effect(Effect::Reply(views::creative_submitted(&order))),
        _ => stay(state).with_effect(Effect::Reply(views::order_updated(&order, action))),
    }
}

fn operation_failed(state: &ConvState, op: Operation, error: &BrokerError) -> TransitionResult {
    let ends_flow = op.is_flow_step() && error.kind().ends_flow();
    if ends_flow {
        TransitionResult::new(ConvState::Idle).with_effect(Effect::reply(format!(
            "{}\n\nSend /start to open the menu.",
            error.user_message()
        )))
    } else {
        stay(state).with_effect(Effect::reply(error.user_message()))
    }
}
