//! Notification dispatcher
//!
//! Tells the other side of an order what just happened. Delivery is best
//! effort: a failed send is logged and the lifecycle step stands.

use crate::domain::{Channel, Order, PostRef, PrincipalId};
use crate::messaging::{Button, OutboundMessage};
use crate::runtime::Messenger;
use crate::state_machine::Action;
use std::sync::Arc;

pub struct Notifier<M: Messenger> {
    messenger: Arc<M>,
}

impl<M: Messenger> Notifier<M> {
    pub fn new(messenger: Arc<M>) -> Self {
        Self { messenger }
    }

    pub async fn payment_confirmed(&self, order: &Order, channel: &Channel) {
        let reference = order
            .payment
            .as_ref()
            .map_or("n/a", |p| p.reference.as_str());
        let message = OutboundMessage::text(format!(
            "✅ Payment received for order #{}\n\n\
             Channel: {}\nAd type: {}\nAmount: {}\nReference: {reference}\n\n\
             Next, send the text of your ad.",
            order.id, channel.title, order.ad_type, order.price
        ));
        self.deliver(order.buyer_id, message, "payment_confirmed").await;
    }

    /// Ask the owner to review; carries the creative itself as a preview
    pub async fn creative_submitted(&self, order: &Order, channel: &Channel) {
        let Some(creative) = order.creative.as_ref() else {
            return;
        };
        let message = OutboundMessage::text(format!(
            "📝 New creative for {} (order #{}, {}, {})\n\n{}",
            channel.title, order.id, order.ad_type, order.price, creative.text
        ))
        .with_media(creative.media.clone())
        .with_row(vec![
            Button::new("✅ Approve & publish", Action::Approve(order.id)),
            Button::new("❌ Reject", Action::Reject(order.id)),
        ]);
        self.deliver(channel.owner_id, message, "creative_submitted")
            .await;
    }

    pub async fn creative_approved(&self, order: &Order, channel: &Channel) {
        let message = OutboundMessage::text(format!(
            "👍 {} approved your creative for order #{}. Publishing now.",
            channel.title, order.id
        ));
        self.deliver(order.buyer_id, message, "creative_approved").await;
    }

    pub async fn creative_rejected(&self, order: &Order, channel: &Channel) {
        let reason = order
            .note
            .as_deref()
            .map(|n| format!("\nReason: {n}"))
            .unwrap_or_default();
        let message = OutboundMessage::text(format!(
            "❌ {} rejected the creative for order #{}.{reason}\n\n\
             Your payment is kept; send a new creative whenever you're ready.",
            channel.title, order.id
        ))
        .with_row(vec![Button::new(
            "✏️ Submit new creative",
            Action::SubmitCreative(order.id),
        )]);
        self.deliver(order.buyer_id, message, "creative_rejected").await;
    }

    pub async fn post_published(&self, order: &Order, channel: &Channel, post: &PostRef) {
        let location = post
            .url(channel.username.as_deref())
            .unwrap_or_else(|| format!("{} (message {})", channel.title, post.message_id));
        let message = OutboundMessage::text(format!(
            "📢 Your ad for order #{} is live: {location}\n\n\
             Confirm once you're happy with the placement.",
            order.id
        ))
        .with_row(vec![Button::new(
            "✅ Confirm completion",
            Action::ConfirmCompletion(order.id),
        )]);
        self.deliver(order.buyer_id, message, "post_published").await;
    }

    async fn deliver(&self, recipient: PrincipalId, message: OutboundMessage, event: &'static str) {
        match self.messenger.send(recipient.chat(), &message).await {
            Ok(_) => tracing::debug!(recipient = %recipient, event, "Notification sent"),
            Err(e) => tracing::warn!(
                recipient = %recipient,
                event,
                error = %e,
                "Notification failed"
            ),
        }
    }
}
