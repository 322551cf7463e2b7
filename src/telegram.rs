//! Telegram Bot API transport
//!
//! Long-polls `getUpdates`, decodes updates into `Inbound` interactions and
//! implements `Messenger` on top of `sendMessage`/`sendPhoto`/`sendVideo`
//! and `getChatMember`.

mod client;
mod types;

pub use client::{TelegramClient, TelegramError};
