//! Effect executor
//!
//! Turns the effects requested by a transition into collaborator calls and
//! reports each outcome as an event for the next transition.

use super::traits::{Ledger, Messenger};
use crate::channels::ChannelRegistry;
use crate::domain::OrderAction;
use crate::error::BrokerResult;
use crate::gate::AdminGate;
use crate::orders::OrderLifecycle;
use crate::state_machine::{ConvContext, Effect, Event, PricingTarget};
use std::sync::Arc;

/// Channels shown per browse reply
const BROWSE_LIMIT: usize = 20;

pub struct EffectExecutor<L: Ledger, M: Messenger> {
    messenger: Arc<M>,
    gate: AdminGate<M>,
    registry: ChannelRegistry<L>,
    lifecycle: Arc<OrderLifecycle<L, M>>,
}

impl<L: Ledger, M: Messenger> EffectExecutor<L, M> {
    pub fn new(ledger: Arc<L>, messenger: Arc<M>, lifecycle: Arc<OrderLifecycle<L, M>>) -> Self {
        Self {
            gate: AdminGate::new(messenger.clone()),
            registry: ChannelRegistry::new(ledger),
            messenger,
            lifecycle,
        }
    }

    /// Run one effect. Replies are fire-and-forget and yield nothing; every
    /// other effect yields its result event, `OperationFailed` included.
    pub async fn execute(&self, context: &ConvContext, effect: Effect) -> Option<Event> {
        let op = effect.operation();
        match self.run(context, effect).await {
            Ok(event) => event,
            Err(error) => {
                let op = op?;
                tracing::info!(
                    principal = %context.principal,
                    op = op.as_str(),
                    kind = ?error.kind(),
                    error = %error,
                    "Operation failed"
                );
                Some(Event::OperationFailed { op, error })
            }
        }
    }

    async fn run(&self, context: &ConvContext, effect: Effect) -> BrokerResult<Option<Event>> {
        let principal = context.principal;
        let lifecycle = &self.lifecycle;

        let event = match effect {
            Effect::Reply(message) => {
                if let Err(e) = self.messenger.send(principal.chat(), &message).await {
                    tracing::warn!(principal = %principal, error = %e, "Reply not delivered");
                }
                return Ok(None);
            }
            Effect::VerifyChannel { draft } => {
                let rights = self.gate.verify(draft.chat_id).await;
                Event::ChannelVerified {
                    target: PricingTarget::New { draft },
                    rights,
                }
            }
            Effect::PrepareRepricing { channel_id } => {
                let channel = self.registry.owned(principal, channel_id).await?;
                let rights = self.gate.verify(channel.chat_id).await;
                Event::ChannelVerified {
                    target: PricingTarget::Existing {
                        channel_id: channel.id,
                        chat_id: channel.chat_id,
                        title: channel.title,
                    },
                    rights,
                }
            }
            Effect::RegisterChannel { draft, prices } => Event::ChannelSaved {
                channel: self.registry.register(principal, &draft, &prices).await?,
                created: true,
            },
            Effect::RepriceChannel { channel_id, prices } => Event::ChannelSaved {
                channel: self.registry.reprice(principal, channel_id, &prices).await?,
                created: false,
            },
            Effect::ToggleChannel { channel_id } => Event::ChannelToggled {
                channel: self.registry.toggle(principal, channel_id).await?,
            },
            Effect::ListChannels { owned: true } => Event::ChannelsListed {
                channels: self.registry.owned_by(principal).await?,
                owned: true,
            },
            Effect::ListChannels { owned: false } => Event::ChannelsListed {
                channels: self.registry.browse(BROWSE_LIMIT).await?,
                owned: false,
            },
            Effect::ListOrders => Event::OrdersListed {
                orders: lifecycle.orders_of(principal).await?,
                awaiting_review: lifecycle.awaiting_review(principal).await?,
            },
            Effect::LoadChannel { channel_id } => Event::ChannelLoaded {
                channel: self.registry.purchasable(channel_id).await?,
            },
            Effect::CreateOrder {
                channel_id,
                ad_type,
            } => {
                let (order, channel) = lifecycle
                    .create_order(principal, channel_id, &ad_type)
                    .await?;
                Event::OrderCreated {
                    order,
                    channel_title: channel.title,
                }
            }
            Effect::PayOrder { order_id, method } => Event::OrderUpdated {
                order: lifecycle.pay(order_id, principal, method).await?,
                action: OrderAction::Pay,
            },
            Effect::CancelOrder { order_id } => Event::OrderUpdated {
                order: lifecycle.cancel(order_id, principal).await?,
                action: OrderAction::Cancel,
            },
            Effect::SubmitCreative { order_id, creative } => Event::OrderUpdated {
                order: lifecycle
                    .submit_creative(order_id, principal, creative)
                    .await?,
                action: OrderAction::SubmitCreative,
            },
            Effect::Approve { order_id } => Event::OrderUpdated {
                order: lifecycle.approve(order_id, principal).await?,
                action: OrderAction::Approve,
            },
            Effect::Reject { order_id, note } => Event::OrderUpdated {
                order: lifecycle.reject(order_id, principal, note).await?,
                action: OrderAction::Reject,
            },
            Effect::ConfirmCompletion { order_id } => Event::OrderUpdated {
                order: lifecycle.confirm_completion(order_id, principal).await?,
                action: OrderAction::Complete,
            },
            Effect::Refund { order_id } => Event::OrderUpdated {
                order: lifecycle.admin_refund(order_id, principal).await?,
                action: OrderAction::Refund,
            },
        };
        Ok(Some(event))
    }
}
