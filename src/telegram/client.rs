//! Bot API client

use super::types::{
    decode_update, ApiResponse, ChatMember, InlineKeyboardMarkup, Message, Update, User,
};
use crate::domain::{ChatId, MediaKind};
use crate::messaging::{Inbound, MemberStatus, Membership, OutboundMessage, SentMessage};
use crate::runtime::{InboundSource, Messenger, MessengerError};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Headroom over the long-poll timeout before the HTTP request gives up
const POLL_SLACK: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Bot API error {code}: {description}")]
    Api {
        code: u16,
        description: String,
        retry_after: Option<u64>,
    },
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl TelegramError {
    /// The platform gave a definite "no" rather than failing to answer
    pub fn is_rejection(&self) -> bool {
        matches!(self, TelegramError::Api { code, .. } if (400..500).contains(code) && *code != 429)
    }
}

impl From<TelegramError> for MessengerError {
    fn from(e: TelegramError) -> Self {
        match e {
            _ if e.is_rejection() => MessengerError::Rejected(e.to_string()),
            TelegramError::Api {
                retry_after: Some(secs),
                ..
            } => MessengerError::Unavailable(format!("{e} (retry after {secs}s)")),
            _ => MessengerError::Unavailable(e.to_string()),
        }
    }
}

pub struct TelegramClient {
    http: Client,
    /// `{api_base}/bot{token}`, never logged
    endpoint: String,
    me: User,
    poll_timeout: Duration,
    offset: AtomicI64,
}

impl TelegramClient {
    /// Build the client and check the token with `getMe`
    pub async fn connect(
        api_base: &str,
        token: &str,
        poll_timeout: Duration,
    ) -> Result<Self, TelegramError> {
        let http = Client::builder().timeout(poll_timeout + POLL_SLACK).build()?;
        let endpoint = format!("{}/bot{token}", api_base.trim_end_matches('/'));
        let me: User = call(&http, &endpoint, "getMe", &json!({})).await?;
        tracing::info!(bot_id = me.id, username = ?me.username, "Connected to Bot API");

        Ok(Self {
            http,
            endpoint,
            me,
            poll_timeout,
            offset: AtomicI64::new(0),
        })
    }

    async fn call<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: &P,
    ) -> Result<R, TelegramError> {
        call(&self.http, &self.endpoint, method, params).await
    }

    async fn answer_callback(&self, id: &str) {
        let result: Result<bool, _> = self
            .call("answerCallbackQuery", &json!({ "callback_query_id": id }))
            .await;
        if let Err(e) = result {
            tracing::debug!(error = %e, "Callback answer failed");
        }
    }
}

async fn call<P: Serialize, R: DeserializeOwned>(
    http: &Client,
    endpoint: &str,
    method: &str,
    params: &P,
) -> Result<R, TelegramError> {
    let response = http
        .post(format!("{endpoint}/{method}"))
        .json(params)
        .send()
        .await
        .map_err(reqwest::Error::without_url)?;
    let body: ApiResponse<R> = response.json().await.map_err(reqwest::Error::without_url)?;

    match body {
        ApiResponse {
            ok: true,
            result: Some(result),
            ..
        } => Ok(result),
        ApiResponse { ok: true, .. } => {
            Err(TelegramError::Malformed(format!("{method} returned no result")))
        }
        ApiResponse {
            error_code,
            description,
            parameters,
            ..
        } => Err(TelegramError::Api {
            code: error_code.unwrap_or(0),
            description: description.unwrap_or_default(),
            retry_after: parameters.and_then(|p| p.retry_after),
        }),
    }
}

#[async_trait]
impl Messenger for TelegramClient {
    async fn send(
        &self,
        chat: ChatId,
        message: &OutboundMessage,
    ) -> Result<SentMessage, MessengerError> {
        let markup = InlineKeyboardMarkup::from_buttons(&message.buttons);
        let (method, mut params) = match &message.media {
            Some(media) => {
                let (method, field) = match media.kind {
                    MediaKind::Photo => ("sendPhoto", "photo"),
                    MediaKind::Video => ("sendVideo", "video"),
                };
                let mut params = json!({ "chat_id": chat.0 });
                params[field] = json!(media.file_id);
                if !message.text.is_empty() {
                    params["caption"] = json!(message.text);
                }
                (method, params)
            }
            None => ("sendMessage", json!({ "chat_id": chat.0, "text": message.text })),
        };
        if let Some(markup) = markup {
            params["reply_markup"] = json!(markup);
        }

        let sent: Message = self.call(method, &params).await?;
        Ok(SentMessage {
            chat_id: ChatId(sent.chat.id),
            message_id: sent.message_id,
        })
    }

    async fn own_membership(&self, chat: ChatId) -> Result<Membership, MessengerError> {
        let member: ChatMember = self
            .call(
                "getChatMember",
                &json!({ "chat_id": chat.0, "user_id": self.me.id }),
            )
            .await?;
        let status = MemberStatus::parse(&member.status).ok_or_else(|| {
            MessengerError::Rejected(format!("unknown member status {}", member.status))
        })?;
        Ok(Membership {
            status,
            can_post_messages: member.can_post_messages,
        })
    }
}

#[async_trait]
impl InboundSource for TelegramClient {
    async fn next_batch(&self) -> Result<Vec<Inbound>, MessengerError> {
        let updates: Vec<Update> = self
            .call(
                "getUpdates",
                &json!({
                    "offset": self.offset.load(Ordering::SeqCst),
                    "timeout": self.poll_timeout.as_secs(),
                    "allowed_updates": ["message", "callback_query"],
                }),
            )
            .await?;

        let mut batch = Vec::with_capacity(updates.len());
        for update in &updates {
            self.offset.fetch_max(update.update_id + 1, Ordering::SeqCst);
            if let Some(query) = &update.callback_query {
                self.answer_callback(&query.id).await;
            }
            match decode_update(update) {
                Some(inbound) => batch.push(inbound),
                None => tracing::debug!(update_id = update.update_id, "Ignoring update"),
            }
        }
        Ok(batch)
    }
}
