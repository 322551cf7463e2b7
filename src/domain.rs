//! Marketplace entities
//!
//! Principals, channels and orders as the rest of the broker sees them.
//! Status fields are closed enums; storage encodes them with `as_str`.

mod pricing;
mod status;

pub use pricing::{Price, PriceList, PriceListError};
pub use status::{OrderAction, OrderStatus};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse().map(Self)
            }
        }
    };
}

id_type!(
    /// Platform user id of a principal
    PrincipalId
);
id_type!(
    /// Platform chat id (private chats share the user's id, channels are negative)
    ChatId
);
id_type!(
    /// Ledger id of a listed channel
    ChannelId
);
id_type!(
    /// Ledger id of an order
    OrderId
);

impl PrincipalId {
    /// Private chat with this principal
    pub fn chat(self) -> ChatId {
        ChatId(self.0)
    }
}

// ============================================================================
// Principal
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: PrincipalId,
    pub display_name: String,
    pub is_channel_owner: bool,
    pub is_advertiser: bool,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Channel
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    #[default]
    Active,
    Inactive,
}

impl ChannelStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelStatus::Active => "active",
            ChannelStatus::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ChannelStatus::Active),
            "inactive" => Some(ChannelStatus::Inactive),
            _ => None,
        }
    }

    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            ChannelStatus::Active => ChannelStatus::Inactive,
            ChannelStatus::Inactive => ChannelStatus::Active,
        }
    }
}

/// A channel as it arrives in a forwarded message, before it is listed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDraft {
    pub chat_id: ChatId,
    pub title: String,
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub owner_id: PrincipalId,
    pub chat_id: ChatId,
    pub title: String,
    pub username: Option<String>,
    pub status: ChannelStatus,
    pub prices: PriceList,
    pub created_at: DateTime<Utc>,
}

impl Channel {
    pub fn is_active(&self) -> bool {
        self.status == ChannelStatus::Active
    }

    pub fn handle(&self) -> String {
        self.username
            .as_deref()
            .map_or_else(|| "private channel".to_string(), |u| format!("@{u}"))
    }
}

// ============================================================================
// Order
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    Crypto,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 2] = [PaymentMethod::Card, PaymentMethod::Crypto];

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::Crypto => "crypto",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "card" => Some(PaymentMethod::Card),
            "crypto" => Some(PaymentMethod::Crypto),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub method: PaymentMethod,
    pub reference: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "photo" => Some(MediaKind::Photo),
            "video" => Some(MediaKind::Video),
            _ => None,
        }
    }
}

/// Platform file reference for an uploaded photo or video
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub kind: MediaKind,
    pub file_id: String,
}

/// Advertisement payload supplied by the buyer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Creative {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaRef>,
}

/// Reference to a message published in a channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRef {
    pub chat_id: ChatId,
    pub message_id: i64,
}

impl PostRef {
    /// Public link, only available for channels with a username
    pub fn url(&self, username: Option<&str>) -> Option<String> {
        username.map(|u| format!("https://t.me/{u}/{}", self.message_id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub buyer_id: PrincipalId,
    pub channel_id: ChannelId,
    pub ad_type: String,
    pub price: Price,
    pub status: OrderStatus,
    pub payment: Option<Payment>,
    pub creative: Option<Creative>,
    pub post: Option<PostRef>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub posted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Fields needed to insert an order; price is already snapshotted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub buyer_id: PrincipalId,
    pub channel_id: ChannelId,
    pub ad_type: String,
    pub price: Price,
}

/// Partial update of an order's mutable fields
///
/// `None` leaves a column untouched. Price, ad type, buyer and channel are
/// deliberately absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderPatch {
    pub status: Option<OrderStatus>,
    pub payment: Option<Payment>,
    pub creative: Option<Creative>,
    pub note: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub posted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl OrderPatch {
    pub fn status(status: OrderStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}
