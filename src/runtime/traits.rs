//! Trait abstractions for runtime I/O
//!
//! The broker only talks to the ledger and the messaging platform through
//! these traits, so tests can swap in the mocks from `runtime::testing`.

use crate::db::{Database, DbError, DbResult, LedgerStats};
use crate::domain::{
    Channel, ChannelDraft, ChannelId, ChannelStatus, ChatId, NewOrder, Order, OrderId,
    OrderPatch, OrderStatus, PostRef, PriceList, Principal, PrincipalId,
};
use crate::messaging::{Inbound, Membership, OutboundMessage, SentMessage};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Duplicate(String),
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessengerError {
    /// The platform refused the request (bad chat, missing rights, bad file)
    #[error("rejected by platform: {0}")]
    Rejected(String),
    #[error("platform unavailable: {0}")]
    Unavailable(String),
}

/// Durable record of principals, channels and orders
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Create the principal on first contact, refresh the display name after
    async fn upsert_principal(
        &self,
        id: PrincipalId,
        display_name: &str,
    ) -> Result<Principal, LedgerError>;

    async fn get_principal(&self, id: PrincipalId) -> Result<Principal, LedgerError>;

    /// Insert a channel and mark its owner as a channel owner.
    /// Fails with `Duplicate` when the chat is already listed.
    async fn create_channel(
        &self,
        owner: PrincipalId,
        draft: &ChannelDraft,
        prices: &PriceList,
    ) -> Result<Channel, LedgerError>;

    async fn get_channel(&self, id: ChannelId) -> Result<Channel, LedgerError>;

    async fn find_channel_by_chat(&self, chat: ChatId) -> Result<Option<Channel>, LedgerError>;

    async fn list_channels_by_owner(
        &self,
        owner: PrincipalId,
    ) -> Result<Vec<Channel>, LedgerError>;

    async fn list_active_channels(&self, limit: usize) -> Result<Vec<Channel>, LedgerError>;

    async fn update_channel_prices(
        &self,
        id: ChannelId,
        prices: &PriceList,
    ) -> Result<Channel, LedgerError>;

    async fn set_channel_status(
        &self,
        id: ChannelId,
        status: ChannelStatus,
    ) -> Result<Channel, LedgerError>;

    /// Insert an order in `PendingPayment` and mark the buyer as an advertiser
    async fn create_order(&self, order: &NewOrder) -> Result<Order, LedgerError>;

    async fn get_order(&self, id: OrderId) -> Result<Order, LedgerError>;

    async fn list_orders_by_buyer(&self, buyer: PrincipalId) -> Result<Vec<Order>, LedgerError>;

    async fn list_orders_by_channel(&self, channel: ChannelId)
        -> Result<Vec<Order>, LedgerError>;

    async fn list_orders_by_status(&self, status: OrderStatus)
        -> Result<Vec<Order>, LedgerError>;

    /// Apply `patch` only if the order is still in `expected`.
    /// Fails with `Conflict` when another writer got there first.
    async fn update_order(
        &self,
        id: OrderId,
        expected: OrderStatus,
        patch: &OrderPatch,
    ) -> Result<Order, LedgerError>;

    /// Record the published post. Fails with `Conflict` if one is already set.
    async fn set_post_ref(&self, id: OrderId, post: &PostRef) -> Result<Order, LedgerError>;

    async fn stats(&self) -> Result<LedgerStats, LedgerError>;
}

/// Outbound side of the messaging platform
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(
        &self,
        chat: ChatId,
        message: &OutboundMessage,
    ) -> Result<SentMessage, MessengerError>;

    /// The service account's own membership in `chat`
    async fn own_membership(&self, chat: ChatId) -> Result<Membership, MessengerError>;
}

/// Inbound side of the messaging platform
#[async_trait]
pub trait InboundSource: Send + Sync {
    /// Wait for the next batch of interactions. An empty batch is normal.
    async fn next_batch(&self) -> Result<Vec<Inbound>, MessengerError>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: Ledger + ?Sized> Ledger for Arc<T> {
    async fn upsert_principal(
        &self,
        id: PrincipalId,
        display_name: &str,
    ) -> Result<Principal, LedgerError> {
        (**self).upsert_principal(id, display_name).await
    }

    async fn get_principal(&self, id: PrincipalId) -> Result<Principal, LedgerError> {
        (**self).get_principal(id).await
    }

    async fn create_channel(
        &self,
        owner: PrincipalId,
        draft: &ChannelDraft,
        prices: &PriceList,
    ) -> Result<Channel, LedgerError> {
        (**self).create_channel(owner, draft, prices).await
    }

    async fn get_channel(&self, id: ChannelId) -> Result<Channel, LedgerError> {
        (**self).get_channel(id).await
    }

    async fn find_channel_by_chat(&self, chat: ChatId) -> Result<Option<Channel>, LedgerError> {
        (**self).find_channel_by_chat(chat).await
    }

    async fn list_channels_by_owner(
        &self,
        owner: PrincipalId,
    ) -> Result<Vec<Channel>, LedgerError> {
        (**self).list_channels_by_owner(owner).await
    }

    async fn list_active_channels(&self, limit: usize) -> Result<Vec<Channel>, LedgerError> {
        (**self).list_active_channels(limit).await
    }

    async fn update_channel_prices(
        &self,
        id: ChannelId,
        prices: &PriceList,
    ) -> Result<Channel, LedgerError> {
        (**self).update_channel_prices(id, prices).await
    }

    async fn set_channel_status(
        &self,
        id: ChannelId,
        status: ChannelStatus,
    ) -> Result<Channel, LedgerError> {
        (**self).set_channel_status(id, status).await
    }

    async fn create_order(&self, order: &NewOrder) -> Result<Order, LedgerError> {
        (**self).create_order(order).await
    }

    async fn get_order(&self, id: OrderId) -> Result<Order, LedgerError> {
        (**self).get_order(id).await
    }

    async fn list_orders_by_buyer(&self, buyer: PrincipalId) -> Result<Vec<Order>, LedgerError> {
        (**self).list_orders_by_buyer(buyer).await
    }

    async fn list_orders_by_channel(
        &self,
        channel: ChannelId,
    ) -> Result<Vec<Order>, LedgerError> {
        (**self).list_orders_by_channel(channel).await
    }

    async fn list_orders_by_status(
        &self,
        status: OrderStatus,
    ) -> Result<Vec<Order>, LedgerError> {
        (**self).list_orders_by_status(status).await
    }

    async fn update_order(
        &self,
        id: OrderId,
        expected: OrderStatus,
        patch: &OrderPatch,
    ) -> Result<Order, LedgerError> {
        (**self).update_order(id, expected, patch).await
    }

    async fn set_post_ref(&self, id: OrderId, post: &PostRef) -> Result<Order, LedgerError> {
        (**self).set_post_ref(id, post).await
    }

    async fn stats(&self) -> Result<LedgerStats, LedgerError> {
        (**self).stats().await
    }
}

#[async_trait]
impl<T: Messenger + ?Sized> Messenger for Arc<T> {
    async fn send(
        &self,
        chat: ChatId,
        message: &OutboundMessage,
    ) -> Result<SentMessage, MessengerError> {
        (**self).send(chat, message).await
    }

    async fn own_membership(&self, chat: ChatId) -> Result<Membership, MessengerError> {
        (**self).own_membership(chat).await
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

impl From<DbError> for LedgerError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound(what) => LedgerError::NotFound(what),
            DbError::Conflict(what) => LedgerError::Conflict(what),
            DbError::Duplicate(what) => LedgerError::Duplicate(what),
            other => LedgerError::Unavailable(other.to_string()),
        }
    }
}

/// Adapter to use Database as a Ledger
///
/// rusqlite is synchronous, so every call runs on the blocking pool and the
/// async side only awaits the join handle. That keeps tokio workers free
/// and lets `CallGuard` time out a call stuck on the connection lock.
#[derive(Clone)]
pub struct DatabaseLedger {
    db: Database,
}

impl DatabaseLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    async fn run<T, F>(&self, op: F) -> Result<T, LedgerError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> DbResult<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Ledger worker failed");
                LedgerError::Unavailable(format!("ledger worker failed: {e}"))
            })?
            .map_err(LedgerError::from)
    }
}

#[async_trait]
impl Ledger for DatabaseLedger {
    async fn upsert_principal(
        &self,
        id: PrincipalId,
        display_name: &str,
    ) -> Result<Principal, LedgerError> {
        let display_name = display_name.to_string();
        self.run(move |db| db.upsert_principal(id, &display_name)).await
    }

    async fn get_principal(&self, id: PrincipalId) -> Result<Principal, LedgerError> {
        self.run(move |db| db.get_principal(id)).await
    }

    async fn create_channel(
        &self,
        owner: PrincipalId,
        draft: &ChannelDraft,
        prices: &PriceList,
    ) -> Result<Channel, LedgerError> {
        let (draft, prices) = (draft.clone(), prices.clone());
        self.run(move |db| db.create_channel(owner, &draft, &prices)).await
    }

    async fn get_channel(&self, id: ChannelId) -> Result<Channel, LedgerError> {
        self.run(move |db| db.get_channel(id)).await
    }

    async fn find_channel_by_chat(&self, chat: ChatId) -> Result<Option<Channel>, LedgerError> {
        self.run(move |db| db.find_channel_by_chat(chat)).await
    }

    async fn list_channels_by_owner(
        &self,
        owner: PrincipalId,
    ) -> Result<Vec<Channel>, LedgerError> {
        self.run(move |db| db.list_channels_by_owner(owner)).await
    }

    async fn list_active_channels(&self, limit: usize) -> Result<Vec<Channel>, LedgerError> {
        self.run(move |db| db.list_active_channels(limit)).await
    }

    async fn update_channel_prices(
        &self,
        id: ChannelId,
        prices: &PriceList,
    ) -> Result<Channel, LedgerError> {
        let prices = prices.clone();
        self.run(move |db| db.update_channel_prices(id, &prices)).await
    }

    async fn set_channel_status(
        &self,
        id: ChannelId,
        status: ChannelStatus,
    ) -> Result<Channel, LedgerError> {
        self.run(move |db| db.set_channel_status(id, status)).await
    }

    async fn create_order(&self, order: &NewOrder) -> Result<Order, LedgerError> {
        let order = order.clone();
        self.run(move |db| db.create_order(&order)).await
    }

    async fn get_order(&self, id: OrderId) -> Result<Order, LedgerError> {
        self.run(move |db| db.get_order(id)).await
    }

    async fn list_orders_by_buyer(&self, buyer: PrincipalId) -> Result<Vec<Order>, LedgerError> {
        self.run(move |db| db.list_orders_by_buyer(buyer)).await
    }

    async fn list_orders_by_channel(
        &self,
        channel: ChannelId,
    ) -> Result<Vec<Order>, LedgerError> {
        self.run(move |db| db.list_orders_by_channel(channel)).await
    }

    async fn list_orders_by_status(
        &self,
        status: OrderStatus,
    ) -> Result<Vec<Order>, LedgerError> {
        self.run(move |db| db.list_orders_by_status(status)).await
    }

    async fn update_order(
        &self,
        id: OrderId,
        expected: OrderStatus,
        patch: &OrderPatch,
    ) -> Result<Order, LedgerError> {
        let patch = patch.clone();
        self.run(move |db| db.update_order(id, expected, &patch)).await
    }

    async fn set_post_ref(&self, id: OrderId, post: &PostRef) -> Result<Order, LedgerError> {
        let post = post.clone();
        self.run(move |db| db.set_post_ref(id, &post)).await
    }

    async fn stats(&self) -> Result<LedgerStats, LedgerError> {
        self.run(Database::stats).await
    }
}
