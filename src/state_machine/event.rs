//! Events that can occur in a conversation

use super::effect::Operation;
use super::state::PricingTarget;
use crate::domain::{
    Channel, ChannelDraft, ChannelId, MediaRef, Order, OrderAction, OrderId, PaymentMethod,
};
use crate::error::BrokerError;
use crate::gate::AdminRights;

/// Platform limit on inline button payloads
pub const MAX_CALLBACK_LEN: usize = 64;

/// Events that trigger state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    // Principal input
    Command(Command),
    Action(Action),
    /// A message forwarded from a channel
    ForwardedChannel(ChannelDraft),
    Text(String),
    Media {
        media: MediaRef,
        caption: Option<String>,
    },

    // Effect results
    ChannelVerified {
        target: PricingTarget,
        rights: AdminRights,
    },
    ChannelSaved {
        channel: Channel,
        created: bool,
    },
    ChannelToggled {
        channel: Channel,
    },
    ChannelsListed {
        channels: Vec<Channel>,
        owned: bool,
    },
    OrdersListed {
        orders: Vec<Order>,
        awaiting_review: Vec<Order>,
    },
    ChannelLoaded {
        channel: Channel,
    },
    OrderCreated {
        order: Order,
        channel_title: String,
    },
    OrderUpdated {
        order: Order,
        action: OrderAction,
    },
    OperationFailed {
        op: Operation,
        error: BrokerError,
    },
}

impl Event {
    /// Input from the principal, as opposed to an effect result
    pub fn is_input(&self) -> bool {
        matches!(
            self,
            Event::Command(_)
                | Event::Action(_)
                | Event::ForwardedChannel(_)
                | Event::Text(_)
                | Event::Media { .. }
        )
    }
}

// ============================================================================
// Slash commands
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Cancel,
    Browse,
    MyOrders,
    MyChannels,
    Refund(OrderId),
    Reject { order_id: OrderId, note: Option<String> },
    /// Known command with bad arguments
    Usage(&'static str),
    Unknown(String),
}

impl Command {
    /// Parse `/name[@bot] args`; `None` when `text` is not a command
    pub fn parse(text: &str) -> Option<Command> {
        let body = text.trim().strip_prefix('/')?;
        let (head, args) = body
            .split_once(char::is_whitespace)
            .map_or((body, ""), |(h, a)| (h, a.trim()));
        let name = head.split('@').next().unwrap_or(head).to_lowercase();

        let command = match name.as_str() {
            "start" | "menu" => Command::Start,
            "help" => Command::Help,
            "cancel" => Command::Cancel,
            "browse" => Command::Browse,
            "myorders" => Command::MyOrders,
            "mychannels" => Command::MyChannels,
            "refund" => match args.trim_start_matches('#').parse() {
                Ok(id) => Command::Refund(id),
                Err(_) => Command::Usage("/refund <order id>"),
            },
            "reject" => {
                let (id, note) = args
                    .split_once(char::is_whitespace)
                    .map_or((args, None), |(id, note)| (id, Some(note.trim().to_string())));
                match id.trim_start_matches('#').parse() {
                    Ok(order_id) => Command::Reject { order_id, note },
                    Err(_) => Command::Usage("/reject <order id> [reason]"),
                }
            }
            _ => Command::Unknown(name),
        };
        Some(command)
    }
}

// ============================================================================
// Button actions
// ============================================================================

/// Inline-button actions, encoded into callback data as `verb[:arg]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    MainMenu,
    OwnerMenu,
    AdvertiserMenu,
    AddChannel,
    MyChannels,
    Browse,
    MyOrders,
    EditPrices(ChannelId),
    ToggleChannel(ChannelId),
    SelectChannel(ChannelId),
    SelectAdType(String),
    ConfirmPurchase,
    Pay(PaymentMethod),
    CancelOrder(OrderId),
    SubmitCreative(OrderId),
    SkipMedia,
    Approve(OrderId),
    Reject(OrderId),
    ConfirmCompletion(OrderId),
}

impl Action {
    pub fn encode(&self) -> String {
        match self {
            Action::MainMenu => "menu".to_string(),
            Action::OwnerMenu => "owner".to_string(),
            Action::AdvertiserMenu => "advertiser".to_string(),
            Action::AddChannel => "add_channel".to_string(),
            Action::MyChannels => "my_channels".to_string(),
            Action::Browse => "browse".to_string(),
            Action::MyOrders => "my_orders".to_string(),
            Action::EditPrices(id) => format!("edit:{id}"),
            Action::ToggleChannel(id) => format!("toggle:{id}"),
            Action::SelectChannel(id) => format!("ch:{id}"),
            Action::SelectAdType(ad_type) => format!("ad:{ad_type}"),
            Action::ConfirmPurchase => "confirm".to_string(),
            Action::Pay(method) => format!("pay:{}", method.as_str()),
            Action::CancelOrder(id) => format!("cancel:{id}"),
            Action::SubmitCreative(id) => format!("creative:{id}"),
            Action::SkipMedia => "skip_media".to_string(),
            Action::Approve(id) => format!("approve:{id}"),
            Action::Reject(id) => format!("reject:{id}"),
            Action::ConfirmCompletion(id) => format!("done:{id}"),
        }
    }

    pub fn decode(data: &str) -> Option<Action> {
        if data.len() > MAX_CALLBACK_LEN {
            return None;
        }
        let (verb, arg) = match data.split_once(':') {
            Some((verb, arg)) => (verb, Some(arg)),
            None => (data, None),
        };

        let action = match (verb, arg) {
            ("menu", None) => Action::MainMenu,
            ("owner", None) => Action::OwnerMenu,
            ("advertiser", None) => Action::AdvertiserMenu,
            ("add_channel", None) => Action::AddChannel,
            ("my_channels", None) => Action::MyChannels,
            ("browse", None) => Action::Browse,
            ("my_orders", None) => Action::MyOrders,
            ("edit", Some(id)) => Action::EditPrices(id.parse().ok()?),
            ("toggle", Some(id)) => Action::ToggleChannel(id.parse().ok()?),
            ("ch", Some(id)) => Action::SelectChannel(id.parse().ok()?),
            ("ad", Some(ad_type)) if !ad_type.is_empty() => {
                Action::SelectAdType(ad_type.to_string())
            }
            ("confirm", None) => Action::ConfirmPurchase,
            ("pay", Some(method)) => Action::Pay(PaymentMethod::parse(method)?),
            ("cancel", Some(id)) => Action::CancelOrder(id.parse().ok()?),
            ("creative", Some(id)) => Action::SubmitCreative(id.parse().ok()?),
            ("skip_media", None) => Action::SkipMedia,
            ("approve", Some(id)) => Action::Approve(id.parse().ok()?),
            ("reject", Some(id)) => Action::Reject(id.parse().ok()?),
            ("done", Some(id)) => Action::ConfirmCompletion(id.parse().ok()?),
            _ => return None,
        };
        Some(action)
    }
}
