//! Effects produced by state transitions

use crate::domain::{ChannelDraft, ChannelId, Creative, OrderId, PaymentMethod, PriceList};
use crate::messaging::OutboundMessage;

/// Effects to be executed after a state transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Message to the principal driving the conversation
    Reply(OutboundMessage),

    /// Run the admin gate against a forwarded channel
    VerifyChannel { draft: ChannelDraft },

    /// Load an owned channel and re-run the admin gate before repricing
    PrepareRepricing { channel_id: ChannelId },

    RegisterChannel { draft: ChannelDraft, prices: PriceList },
    RepriceChannel { channel_id: ChannelId, prices: PriceList },
    ToggleChannel { channel_id: ChannelId },

    /// Active channels (`owned = false`) or the principal's own channels
    ListChannels { owned: bool },
    ListOrders,

    LoadChannel { channel_id: ChannelId },
    CreateOrder { channel_id: ChannelId, ad_type: String },
    PayOrder { order_id: OrderId, method: PaymentMethod },
    CancelOrder { order_id: OrderId },
    SubmitCreative { order_id: OrderId, creative: Creative },

    Approve { order_id: OrderId },
    Reject { order_id: OrderId, note: Option<String> },
    ConfirmCompletion { order_id: OrderId },
    Refund { order_id: OrderId },
}

impl Effect {
    pub fn reply(text: impl Into<String>) -> Self {
        Effect::Reply(OutboundMessage::text(text))
    }

    /// Operation reported in `Event::OperationFailed`; `None` for replies
    pub fn operation(&self) -> Option<Operation> {
        let op = match self {
            Effect::Reply(_) => return None,
            Effect::VerifyChannel { .. } => Operation::VerifyChannel,
            Effect::PrepareRepricing { .. } => Operation::PrepareRepricing,
            Effect::RegisterChannel { .. } => Operation::RegisterChannel,
            Effect::RepriceChannel { .. } => Operation::RepriceChannel,
            Effect::ToggleChannel { .. } => Operation::ToggleChannel,
            Effect::ListChannels { .. } => Operation::ListChannels,
            Effect::ListOrders => Operation::ListOrders,
            Effect::LoadChannel { .. } => Operation::LoadChannel,
            Effect::CreateOrder { .. } => Operation::CreateOrder,
            Effect::PayOrder { .. } => Operation::PayOrder,
            Effect::CancelOrder { .. } => Operation::CancelOrder,
            Effect::SubmitCreative { .. } => Operation::SubmitCreative,
            Effect::Approve { .. } => Operation::Approve,
            Effect::Reject { .. } => Operation::Reject,
            Effect::ConfirmCompletion { .. } => Operation::ConfirmCompletion,
            Effect::Refund { .. } => Operation::Refund,
        };
        Some(op)
    }
}

/// Collaborator operation behind an effect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    VerifyChannel,
    PrepareRepricing,
    RegisterChannel,
    RepriceChannel,
    ToggleChannel,
    ListChannels,
    ListOrders,
    LoadChannel,
    CreateOrder,
    PayOrder,
    CancelOrder,
    SubmitCreative,
    Approve,
    Reject,
    ConfirmCompletion,
    Refund,
}

impl Operation {
    /// Steps of a registration or purchase flow. A hard failure here ends
    /// the flow; failures of other operations never move the conversation.
    pub fn is_flow_step(self) -> bool {
        matches!(
            self,
            Operation::VerifyChannel
                | Operation::PrepareRepricing
                | Operation::RegisterChannel
                | Operation::RepriceChannel
                | Operation::LoadChannel
                | Operation::CreateOrder
                | Operation::PayOrder
                | Operation::SubmitCreative
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::VerifyChannel => "verify_channel",
            Operation::PrepareRepricing => "prepare_repricing",
            Operation::RegisterChannel => "register_channel",
            Operation::RepriceChannel => "reprice_channel",
            Operation::ToggleChannel => "toggle_channel",
            Operation::ListChannels => "list_channels",
            Operation::ListOrders => "list_orders",
            Operation::LoadChannel => "load_channel",
            Operation::CreateOrder => "create_order",
            Operation::PayOrder => "pay_order",
            Operation::CancelOrder => "cancel_order",
            Operation::SubmitCreative => "submit_creative",
            Operation::Approve => "approve",
            Operation::Reject => "reject",
            Operation::ConfirmCompletion => "confirm_completion",
            Operation::Refund => "refund",
        }
    }
}
