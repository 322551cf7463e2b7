//! Order lifecycle manager
//!
//! Every operation loads the order, checks who is asking, asks
//! `OrderStatus::apply` whether the action is allowed and then writes with a
//! status precondition. Of two racing writers exactly one succeeds; the other
//! sees `Conflict`.
//!
//! Publishing is the only step with an external side effect. It runs after
//! the `Posted` status is stored, under a per-order lock, and the resulting
//! post reference is written with an "unset" precondition, so an order is
//! never published twice.

mod payment;

pub use payment::{PaymentGateway, SimulatedGateway};

use crate::domain::{
    Channel, ChannelId, Creative, NewOrder, Order, OrderAction, OrderId, OrderPatch,
    OrderStatus, Payment, PaymentMethod, PostRef, PrincipalId,
};
use crate::error::{BrokerError, BrokerResult, ErrorKind};
use crate::messaging::OutboundMessage;
use crate::notify::Notifier;
use crate::runtime::{KeyedLocks, Ledger, LedgerError, Messenger};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;

const MAX_TEXT_LEN: usize = 4096;
const MAX_CAPTION_LEN: usize = 1024;

pub struct OrderLifecycle<L: Ledger, M: Messenger> {
    ledger: Arc<L>,
    messenger: Arc<M>,
    notifier: Notifier<M>,
    payments: Arc<dyn PaymentGateway>,
    publish_locks: KeyedLocks<OrderId>,
    admins: HashSet<PrincipalId>,
}

impl<L: Ledger, M: Messenger> OrderLifecycle<L, M> {
    pub fn new(
        ledger: Arc<L>,
        messenger: Arc<M>,
        payments: Arc<dyn PaymentGateway>,
        admins: HashSet<PrincipalId>,
    ) -> Self {
        Self {
            ledger,
            notifier: Notifier::new(messenger.clone()),
            messenger,
            payments,
            publish_locks: KeyedLocks::new(),
            admins,
        }
    }

    pub fn is_admin(&self, principal: PrincipalId) -> bool {
        self.admins.contains(&principal)
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Open an order at the channel's current price for `ad_type`
    pub async fn create_order(
        &self,
        buyer: PrincipalId,
        channel_id: ChannelId,
        ad_type: &str,
    ) -> BrokerResult<(Order, Channel)> {
        let channel = self.ledger.get_channel(channel_id).await?;
        if !channel.is_active() {
            return Err(BrokerError::validation(format!(
                "{} is not accepting orders right now.",
                channel.title
            )));
        }
        if channel.owner_id == buyer {
            return Err(BrokerError::validation("You can't buy ads in your own channel."));
        }
        let price = channel.prices.get(ad_type).ok_or_else(|| {
            BrokerError::validation(format!(
                "{} doesn't sell `{ad_type}`. Available: {}",
                channel.title,
                channel.prices.iter().map(|(t, _)| t).collect::<Vec<_>>().join(", ")
            ))
        })?;

        let order = self
            .ledger
            .create_order(&NewOrder {
                buyer_id: buyer,
                channel_id,
                ad_type: ad_type.to_string(),
                price,
            })
            .await?;
        tracing::info!(
            order_id = %order.id,
            buyer = %buyer,
            channel_id = %channel_id,
            ad_type,
            price = %price,
            "Order created"
        );
        Ok((order, channel))
    }

    pub async fn pay(
        &self,
        order_id: OrderId,
        actor: PrincipalId,
        method: PaymentMethod,
    ) -> BrokerResult<Order> {
        let (order, channel) = self.load(order_id).await?;
        ensure_buyer(&order, actor)?;
        ensure_allowed(&order, OrderAction::Pay)?;

        let reference = self.payments.charge(&order, method).await?;
        let patch = OrderPatch {
            payment: Some(Payment { method, reference }),
            paid_at: Some(Utc::now()),
            ..OrderPatch::default()
        };
        let paid = self
            .apply(&order, OrderAction::Pay, patch)
            .await
            .inspect_err(|e| {
                if e.kind() == ErrorKind::Conflict {
                    tracing::error!(
                        order_id = %order_id,
                        "Charge succeeded but the order changed concurrently; needs a manual refund"
                    );
                }
            })?;

        self.notifier.payment_confirmed(&paid, &channel).await;
        Ok(paid)
    }

    pub async fn submit_creative(
        &self,
        order_id: OrderId,
        actor: PrincipalId,
        creative: Creative,
    ) -> BrokerResult<Order> {
        let creative = validate_creative(creative)?;
        let (order, channel) = self.load(order_id).await?;
        ensure_buyer(&order, actor)?;

        let patch = OrderPatch {
            creative: Some(creative),
            ..OrderPatch::default()
        };
        let submitted = self
            .apply(&order, OrderAction::SubmitCreative, patch)
            .await?;

        self.notifier.creative_submitted(&submitted, &channel).await;
        Ok(submitted)
    }

    /// Owner approval: mark `Posted`, then publish into the channel.
    ///
    /// Approving an order that is already `Posted` but has no post reference
    /// (an earlier publish failed) resumes publishing.
    pub async fn approve(&self, order_id: OrderId, actor: PrincipalId) -> BrokerResult<Order> {
        let _publishing = self.publish_locks.lock(&order_id).await;
        let (order, channel) = self.load(order_id).await?;
        ensure_owner(&channel, actor)?;

        let order = match order.status {
            OrderStatus::Posted if order.post.is_some() => return Ok(order),
            OrderStatus::Posted => {
                tracing::info!(order_id = %order_id, "Resuming interrupted publish");
                order
            }
            _ => {
                let patch = OrderPatch {
                    posted_at: Some(Utc::now()),
                    ..OrderPatch::default()
                };
                let approved = self.apply(&order, OrderAction::Approve, patch).await?;
                self.notifier.creative_approved(&approved, &channel).await;
                approved
            }
        };

        self.publish_locked(order, &channel).await
    }

    /// Publish an approved order. Repeated calls return the stored post.
    pub async fn publish(&self, order_id: OrderId) -> BrokerResult<Order> {
        let _publishing = self.publish_locks.lock(&order_id).await;
        let (order, channel) = self.load(order_id).await?;
        if order.post.is_some() {
            return Ok(order);
        }
        if order.status != OrderStatus::Posted {
            return Err(order_conflict(&format!(
                "Order #{order_id} is {}, not approved for publishing",
                order.status
            )));
        }
        self.publish_locked(order, &channel).await
    }

    pub async fn reject(
        &self,
        order_id: OrderId,
        actor: PrincipalId,
        note: Option<String>,
    ) -> BrokerResult<Order> {
        let (order, channel) = self.load(order_id).await?;
        ensure_owner(&channel, actor)?;

        let patch = OrderPatch {
            note: note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
            ..OrderPatch::default()
        };
        let rejected = self.apply(&order, OrderAction::Reject, patch).await?;
        self.notifier.creative_rejected(&rejected, &channel).await;
        Ok(rejected)
    }

    /// Buyer or owner confirms the post ran
    pub async fn confirm_completion(
        &self,
        order_id: OrderId,
        actor: PrincipalId,
    ) -> BrokerResult<Order> {
        let (order, channel) = self.load(order_id).await?;
        if actor != order.buyer_id && actor != channel.owner_id {
            return Err(BrokerError::authorization(
                "Only the buyer or the channel owner can confirm this order.",
            ));
        }
        let patch = OrderPatch {
            completed_at: Some(Utc::now()),
            ..OrderPatch::default()
        };
        self.apply(&order, OrderAction::Complete, patch).await
    }

    pub async fn cancel(&self, order_id: OrderId, actor: PrincipalId) -> BrokerResult<Order> {
        let order = self.ledger.get_order(order_id).await?;
        ensure_buyer(&order, actor)?;
        self.apply(&order, OrderAction::Cancel, OrderPatch::default())
            .await
    }

    pub async fn admin_refund(&self, order_id: OrderId, actor: PrincipalId) -> BrokerResult<Order> {
        if !self.is_admin(actor) {
            return Err(BrokerError::authorization("Only platform admins can refund orders."));
        }
        let order = self.ledger.get_order(order_id).await?;
        let refunded = self
            .apply(&order, OrderAction::Refund, OrderPatch::default())
            .await?;
        tracing::warn!(order_id = %order_id, admin = %actor, "Order refunded by admin");
        Ok(refunded)
    }

    /// Complete every published order whose post is older than `retention`.
    /// Returns how many were completed.
    pub async fn expire_stale(
        &self,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> BrokerResult<usize> {
        let cutoff = now - retention;
        let posted = self
            .ledger
            .list_orders_by_status(OrderStatus::Posted)
            .await?;

        let mut completed = 0;
        for order in posted
            .iter()
            .filter(|o| o.post.is_some() && o.posted_at.is_some_and(|t| t <= cutoff))
        {
            let patch = OrderPatch {
                completed_at: Some(now),
                ..OrderPatch::default()
            };
            match self.apply(order, OrderAction::Complete, patch).await {
                Ok(_) => completed += 1,
                Err(e) if matches!(e.kind(), ErrorKind::Conflict | ErrorKind::NotFound) => {
                    tracing::debug!(order_id = %order.id, error = %e, "Skipping expiry");
                }
                Err(e) => return Err(e),
            }
        }

        if completed > 0 {
            tracing::info!(completed, "Expired published orders");
        }
        Ok(completed)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn orders_of(&self, buyer: PrincipalId) -> BrokerResult<Vec<Order>> {
        Ok(self.ledger.list_orders_by_buyer(buyer).await?)
    }

    /// Orders on the owner's channels waiting for review
    pub async fn awaiting_review(&self, owner: PrincipalId) -> BrokerResult<Vec<Order>> {
        let mut pending = Vec::new();
        for channel in self.ledger.list_channels_by_owner(owner).await? {
            pending.extend(
                self.ledger
                    .list_orders_by_channel(channel.id)
                    .await?
                    .into_iter()
                    .filter(|o| o.status == OrderStatus::CreativeSubmitted),
            );
        }
        Ok(pending)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn load(&self, order_id: OrderId) -> BrokerResult<(Order, Channel)> {
        let order = self.ledger.get_order(order_id).await?;
        let channel = self.ledger.get_channel(order.channel_id).await?;
        Ok((order, channel))
    }

    /// Status-checked, compare-and-swap write
    async fn apply(
        &self,
        order: &Order,
        action: OrderAction,
        patch: OrderPatch,
    ) -> BrokerResult<Order> {
        let next = ensure_allowed(order, action)?;
        let patch = OrderPatch {
            status: Some(next),
            ..patch
        };
        let updated = self
            .ledger
            .update_order(order.id, order.status, &patch)
            .await
            .map_err(|e| match e {
                LedgerError::Conflict(msg) => order_conflict(&msg),
                other => other.into(),
            })?;
        tracing::info!(
            order_id = %order.id,
            action = %action,
            from = %order.status,
            to = %next,
            "Order transitioned"
        );
        Ok(updated)
    }

    /// Caller holds the order's publish lock
    async fn publish_locked(&self, order: Order, channel: &Channel) -> BrokerResult<Order> {
        if order.post.is_some() {
            return Ok(order);
        }
        let creative = order.creative.as_ref().ok_or_else(|| {
            BrokerError::conflict(format!("Order #{} has no creative to publish", order.id))
        })?;

        let message =
            OutboundMessage::text(creative.text.clone()).with_media(creative.media.clone());
        let sent = self
            .messenger
            .send(channel.chat_id, &message)
            .await
            .map_err(|e| {
                tracing::warn!(
                    order_id = %order.id,
                    chat_id = %channel.chat_id,
                    error = %e,
                    "Publish failed"
                );
                BrokerError::from(e)
            })?;

        let post = PostRef {
            chat_id: sent.chat_id,
            message_id: sent.message_id,
        };
        let recorded = match self.ledger.set_post_ref(order.id, &post).await {
            Ok(recorded) => recorded,
            Err(LedgerError::Conflict(_)) => {
                tracing::warn!(order_id = %order.id, "Post reference already recorded");
                return Ok(self.ledger.get_order(order.id).await?);
            }
            Err(e) => {
                tracing::error!(
                    order_id = %order.id,
                    message_id = post.message_id,
                    error = %e,
                    "Published but could not record the post reference"
                );
                return Err(e.into());
            }
        };

        tracing::info!(order_id = %order.id, message_id = post.message_id, "Order published");
        self.notifier.post_published(&recorded, channel, &post).await;
        Ok(recorded)
    }
}

fn ensure_allowed(order: &Order, action: OrderAction) -> BrokerResult<OrderStatus> {
    order.status.apply(action).ok_or_else(|| {
        let hint = if order.status.is_terminal() {
            "it is closed".to_string()
        } else {
            let expected: Vec<_> = action.sources().into_iter().map(OrderStatus::label).collect();
            format!("{action} needs {}", expected.join(" or "))
        };
        order_conflict(&format!(
            "Order #{} is {}; {hint}.",
            order.id,
            order.status.label()
        ))
    })
}

/// Order conflicts usually mean someone else acted first
fn order_conflict(message: &str) -> BrokerError {
    BrokerError::conflict(format!("{message}\nThis order may already have been processed."))
}

fn ensure_buyer(order: &Order, actor: PrincipalId) -> BrokerResult<()> {
    if order.buyer_id != actor {
        return Err(BrokerError::authorization("This isn't your order."));
    }
    Ok(())
}

fn ensure_owner(channel: &Channel, actor: PrincipalId) -> BrokerResult<()> {
    if channel.owner_id != actor {
        return Err(BrokerError::authorization(
            "Only the channel owner can moderate this order.",
        ));
    }
    Ok(())
}

fn validate_creative(creative: Creative) -> BrokerResult<Creative> {
    let text = creative.text.trim().to_string();
    if text.is_empty() {
        return Err(BrokerError::validation("The ad text can't be empty."));
    }
    let limit = if creative.media.is_some() {
        MAX_CAPTION_LEN
    } else {
        MAX_TEXT_LEN
    };
    let len = text.chars().count();
    if len > limit {
        return Err(BrokerError::validation(format!(
            "The ad text is {len} characters; the limit is {limit}."
        )));
    }
    Ok(Creative {
        text,
        media: creative.media,
    })
}
