//! Conversation state types

use crate::domain::{ChannelDraft, ChannelId, ChatId, OrderId, Price, PriceList, PrincipalId};
use serde::{Deserialize, Serialize};

/// Channel whose prices are being entered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PricingTarget {
    /// Verified but not yet listed
    New { draft: ChannelDraft },
    /// Already listed, owned by the principal
    Existing {
        channel_id: ChannelId,
        chat_id: ChatId,
        title: String,
    },
}

impl PricingTarget {
    pub fn title(&self) -> &str {
        match self {
            PricingTarget::New { draft } => &draft.title,
            PricingTarget::Existing { title, .. } => title,
        }
    }

    pub fn chat_id(&self) -> ChatId {
        match self {
            PricingTarget::New { draft } => draft.chat_id,
            PricingTarget::Existing { chat_id, .. } => *chat_id,
        }
    }
}

/// Conversation state of one principal
///
/// Step data lives inside the variant, so leaving a step drops its data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConvState {
    #[default]
    Idle,

    /// Waiting for a message forwarded from the channel to list
    AwaitingChannelForward,

    /// Admin rights confirmed, waiting for the price list
    AwaitingPricing { target: PricingTarget },

    AwaitingAdTypeSelection {
        channel_id: ChannelId,
        channel_title: String,
        prices: PriceList,
    },

    AwaitingPurchaseConfirmation {
        channel_id: ChannelId,
        channel_title: String,
        ad_type: String,
        price: Price,
    },

    /// Order created, waiting for a payment method
    AwaitingPaymentSelection { order_id: OrderId, price: Price },

    AwaitingCreativeText { order_id: OrderId },

    /// Text collected, waiting for a photo/video or a skip
    AwaitingCreativeMedia { order_id: OrderId, text: String },
}

impl ConvState {
    pub fn name(&self) -> &'static str {
        match self {
            ConvState::Idle => "idle",
            ConvState::AwaitingChannelForward => "awaiting_channel_forward",
            ConvState::AwaitingPricing { .. } => "awaiting_pricing",
            ConvState::AwaitingAdTypeSelection { .. } => "awaiting_ad_type_selection",
            ConvState::AwaitingPurchaseConfirmation { .. } => "awaiting_purchase_confirmation",
            ConvState::AwaitingPaymentSelection { .. } => "awaiting_payment_selection",
            ConvState::AwaitingCreativeText { .. } => "awaiting_creative_text",
            ConvState::AwaitingCreativeMedia { .. } => "awaiting_creative_media",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, ConvState::Idle)
    }

    /// What the principal is expected to send next
    pub fn expectation(&self) -> &'static str {
        match self {
            ConvState::Idle => "Pick an option from the menu.",
            ConvState::AwaitingChannelForward => {
                "Forward any message from the channel you want to list."
            }
            ConvState::AwaitingPricing { .. } => {
                "Send your prices, one per line, e.g.\npost: 100\nstory: 40"
            }
            ConvState::AwaitingAdTypeSelection { .. } => "Choose an ad type with the buttons.",
            ConvState::AwaitingPurchaseConfirmation { .. } => "Confirm or cancel the purchase.",
            ConvState::AwaitingPaymentSelection { .. } => "Choose a payment method.",
            ConvState::AwaitingCreativeText { .. } => "Send the text of your ad.",
            ConvState::AwaitingCreativeMedia { .. } => {
                "Send a photo or video for your ad, or skip."
            }
        }
    }
}

/// Per-interaction facts the transition function may consult
#[derive(Debug, Clone)]
pub struct ConvContext {
    pub principal: PrincipalId,
    pub display_name: String,
    /// Listed in the platform admin set
    pub is_admin: bool,
}

impl ConvContext {
    pub fn new(principal: PrincipalId, display_name: impl Into<String>, is_admin: bool) -> Self {
        Self {
            principal,
            display_name: display_name.into(),
            is_admin,
        }
    }
}
