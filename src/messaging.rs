//! Transport-neutral message types
//!
//! What the broker sends and what it learns about chat membership, without
//! any Bot API wire details.

use crate::domain::{ChatId, MediaRef, PrincipalId};
use crate::state_machine::{Action, Event};

/// Inline button carrying an encoded `Action`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub action: Action,
}

impl Button {
    pub fn new(label: impl Into<String>, action: Action) -> Self {
        Self {
            label: label.into(),
            action,
        }
    }
}

/// Outgoing message: text (or caption), optional media, optional keyboard
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutboundMessage {
    pub text: String,
    pub media: Option<MediaRef>,
    pub buttons: Vec<Vec<Button>>,
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_media(mut self, media: Option<MediaRef>) -> Self {
        self.media = media;
        self
    }

    /// Append one keyboard row
    #[must_use]
    pub fn with_row(mut self, row: Vec<Button>) -> Self {
        if !row.is_empty() {
            self.buttons.push(row);
        }
        self
    }

    /// Append one button per row
    #[must_use]
    pub fn with_column(mut self, buttons: impl IntoIterator<Item = Button>) -> Self {
        self.buttons.extend(buttons.into_iter().map(|b| vec![b]));
        self
    }
}

/// Result of a successful send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentMessage {
    pub chat_id: ChatId,
    pub message_id: i64,
}

/// Membership role of an account in a chat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    Creator,
    Administrator,
    Member,
    Restricted,
    Left,
    Kicked,
}

impl MemberStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "creator" => Some(MemberStatus::Creator),
            "administrator" => Some(MemberStatus::Administrator),
            "member" => Some(MemberStatus::Member),
            "restricted" => Some(MemberStatus::Restricted),
            "left" => Some(MemberStatus::Left),
            "kicked" => Some(MemberStatus::Kicked),
            _ => None,
        }
    }
}

/// The service account's own membership record in a chat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Membership {
    pub status: MemberStatus,
    /// Only reported for administrators
    pub can_post_messages: Option<bool>,
}

/// An interaction decoded from the transport, ready for the broker
#[derive(Debug, Clone)]
pub struct Inbound {
    pub principal: PrincipalId,
    pub display_name: String,
    pub event: Event,
}
