//! Bot API wire types and update decoding

use crate::domain::{ChannelDraft, ChatId, MediaKind, MediaRef, PrincipalId};
use crate::messaging::{Button, Inbound};
use crate::state_machine::{Action, Command, Event};
use serde::{Deserialize, Serialize};

/// Envelope of every Bot API response
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
    pub error_code: Option<u16>,
    pub parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
pub struct ResponseParameters {
    pub retry_after: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

impl User {
    pub fn display_name(&self) -> String {
        match &self.last_name {
            Some(last) => format!("{} {last}", self.first_name),
            None => self.first_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: Option<String>,
    pub username: Option<String>,
}

/// Origin of a forwarded message (Bot API 7.0+)
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageOrigin {
    Channel { chat: Chat },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Video {
    pub file_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub photo: Option<Vec<PhotoSize>>,
    pub video: Option<Video>,
    pub forward_origin: Option<MessageOrigin>,
    /// Pre-7.0 forward field, still sent by some servers
    pub forward_from_chat: Option<Chat>,
}

impl Message {
    /// The channel this message was forwarded from, if any
    fn forwarded_channel(&self) -> Option<&Chat> {
        match &self.forward_origin {
            Some(MessageOrigin::Channel { chat }) => Some(chat),
            _ => self
                .forward_from_chat
                .as_ref()
                .filter(|chat| chat.kind == "channel"),
        }
    }

    fn media(&self) -> Option<MediaRef> {
        if let Some(video) = &self.video {
            return Some(MediaRef {
                kind: MediaKind::Video,
                file_id: video.file_id.clone(),
            });
        }
        // Sizes are listed smallest first
        let largest = self
            .photo
            .as_ref()?
            .iter()
            .max_by_key(|p| u64::from(p.width) * u64::from(p.height))?;
        Some(MediaRef {
            kind: MediaKind::Photo,
            file_id: largest.file_id.clone(),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMember {
    pub status: String,
    pub can_post_messages: Option<bool>,
}

// ============================================================================
// Outgoing payloads
// ============================================================================

#[derive(Debug, Serialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub callback_data: String,
}

#[derive(Debug, Serialize)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

impl InlineKeyboardMarkup {
    pub fn from_buttons(rows: &[Vec<Button>]) -> Option<Self> {
        if rows.is_empty() {
            return None;
        }
        let inline_keyboard = rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|b| InlineKeyboardButton {
                        text: b.label.clone(),
                        callback_data: b.action.encode(),
                    })
                    .collect()
            })
            .collect();
        Some(Self { inline_keyboard })
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Turn an update into a broker interaction.
///
/// Returns `None` for anything the broker doesn't handle: group chats, bots,
/// stickers, unknown button payloads.
pub fn decode_update(update: &Update) -> Option<Inbound> {
    if let Some(query) = &update.callback_query {
        let action = query.data.as_deref().and_then(Action::decode)?;
        return Some(inbound(&query.from, Event::Action(action)));
    }

    let message = update.message.as_ref()?;
    let from = message.from.as_ref()?;
    if message.chat.kind != "private" || from.is_bot {
        return None;
    }

    let event = if let Some(chat) = message.forwarded_channel() {
        Event::ForwardedChannel(ChannelDraft {
            chat_id: ChatId(chat.id),
            title: chat.title.clone().unwrap_or_else(|| format!("Channel {}", chat.id)),
            username: chat.username.clone(),
        })
    } else if let Some(media) = message.media() {
        Event::Media {
            media,
            caption: message.caption.clone(),
        }
    } else {
        let text = message.text.as_deref()?;
        match Command::parse(text) {
            Some(command) => Event::Command(command),
            None => Event::Text(text.to_string()),
        }
    };
    Some(inbound(from, event))
}

fn inbound(user: &User, event: Event) -> Inbound {
    Inbound {
        principal: PrincipalId(user.id),
        display_name: user.display_name(),
        event,
    }
}
