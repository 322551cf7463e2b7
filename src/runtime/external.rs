//! Guard for calls leaving the process
//!
//! Every ledger or platform call goes through a shared semaphore and a
//! timeout. Reads are retried once on a transient failure; writes never are,
//! since a timed-out write may still have landed.

use super::traits::{Ledger, LedgerError, Messenger, MessengerError};
use crate::db::LedgerStats;
use crate::domain::{
    Channel, ChannelDraft, ChannelId, ChannelStatus, ChatId, NewOrder, Order, OrderId,
    OrderPatch, OrderStatus, PostRef, PriceList, Principal, PrincipalId,
};
use crate::messaging::{Membership, OutboundMessage, SentMessage};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Errors a guarded call can produce
pub trait CallError: std::error::Error {
    fn is_transient(&self) -> bool;
    fn unavailable(message: String) -> Self;
}

impl CallError for LedgerError {
    fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Unavailable(_))
    }

    fn unavailable(message: String) -> Self {
        LedgerError::Unavailable(message)
    }
}

impl CallError for MessengerError {
    fn is_transient(&self) -> bool {
        matches!(self, MessengerError::Unavailable(_))
    }

    fn unavailable(message: String) -> Self {
        MessengerError::Unavailable(message)
    }
}

#[derive(Clone)]
pub struct CallGuard {
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl CallGuard {
    pub fn new(pool_size: usize, timeout: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(pool_size.max(1))),
            timeout,
        }
    }

    /// Idempotent call: one retry when the first attempt fails transiently
    pub async fn read<T, E, F, Fut>(&self, op: &'static str, call: F) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: CallError,
    {
        match self.run(op, call()).await {
            Err(e) if e.is_transient() => {
                tracing::warn!(op, error = %e, "Transient failure, retrying once");
                self.run(op, call()).await
            }
            other => other,
        }
    }

    /// Mutating call: exactly one attempt
    pub async fn write<T, E, Fut>(&self, op: &'static str, call: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        E: CallError,
    {
        self.run(op, call).await
    }

    async fn run<T, E, Fut>(&self, op: &'static str, call: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        E: CallError,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| E::unavailable(format!("{op}: worker pool closed")))?;

        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(op, timeout = ?self.timeout, "External call timed out");
                Err(E::unavailable(format!("{op} timed out after {:?}", self.timeout)))
            }
        }
    }
}

/// Wraps a collaborator so every call goes through a `CallGuard`
pub struct Guarded<T> {
    inner: T,
    guard: CallGuard,
}

impl<T> Guarded<T> {
    pub fn new(inner: T, guard: CallGuard) -> Self {
        Self { inner, guard }
    }
}

#[async_trait]
impl<L: Ledger> Ledger for Guarded<L> {
    async fn upsert_principal(
        &self,
        id: PrincipalId,
        display_name: &str,
    ) -> Result<Principal, LedgerError> {
        self.guard
            .write("upsert_principal", self.inner.upsert_principal(id, display_name))
            .await
    }

    async fn get_principal(&self, id: PrincipalId) -> Result<Principal, LedgerError> {
        let inner = &self.inner;
        self.guard
            .read("get_principal", move || inner.get_principal(id))
            .await
    }

    async fn create_channel(
        &self,
        owner: PrincipalId,
        draft: &ChannelDraft,
        prices: &PriceList,
    ) -> Result<Channel, LedgerError> {
        self.guard
            .write("create_channel", self.inner.create_channel(owner, draft, prices))
            .await
    }

    async fn get_channel(&self, id: ChannelId) -> Result<Channel, LedgerError> {
        let inner = &self.inner;
        self.guard
            .read("get_channel", move || inner.get_channel(id))
            .await
    }

    async fn find_channel_by_chat(&self, chat: ChatId) -> Result<Option<Channel>, LedgerError> {
        let inner = &self.inner;
        self.guard
            .read("find_channel_by_chat", move || inner.find_channel_by_chat(chat))
            .await
    }

    async fn list_channels_by_owner(
        &self,
        owner: PrincipalId,
    ) -> Result<Vec<Channel>, LedgerError> {
        let inner = &self.inner;
        self.guard
            .read("list_channels_by_owner", move || {
                inner.list_channels_by_owner(owner)
            })
            .await
    }

    async fn list_active_channels(&self, limit: usize) -> Result<Vec<Channel>, LedgerError> {
        let inner = &self.inner;
        self.guard
            .read("list_active_channels", move || inner.list_active_channels(limit))
            .await
    }

    async fn update_channel_prices(
        &self,
        id: ChannelId,
        prices: &PriceList,
    ) -> Result<Channel, LedgerError> {
        self.guard
            .write("update_channel_prices", self.inner.update_channel_prices(id, prices))
            .await
    }

    async fn set_channel_status(
        &self,
        id: ChannelId,
        status: ChannelStatus,
    ) -> Result<Channel, LedgerError> {
        self.guard
            .write("set_channel_status", self.inner.set_channel_status(id, status))
            .await
    }

    async fn create_order(&self, order: &NewOrder) -> Result<Order, LedgerError> {
        self.guard
            .write("create_order", self.inner.create_order(order))
            .await
    }

    async fn get_order(&self, id: OrderId) -> Result<Order, LedgerError> {
        let inner = &self.inner;
        self.guard
            .read("get_order", move || inner.get_order(id))
            .await
    }

    async fn list_orders_by_buyer(&self, buyer: PrincipalId) -> Result<Vec<Order>, LedgerError> {
        let inner = &self.inner;
        self.guard
            .read("list_orders_by_buyer", move || inner.list_orders_by_buyer(buyer))
            .await
    }

    async fn list_orders_by_channel(
        &self,
        channel: ChannelId,
    ) -> Result<Vec<Order>, LedgerError> {
        let inner = &self.inner;
        self.guard
            .read("list_orders_by_channel", move || {
                inner.list_orders_by_channel(channel)
            })
            .await
    }

    async fn list_orders_by_status(
        &self,
        status: OrderStatus,
    ) -> Result<Vec<Order>, LedgerError> {
        let inner = &self.inner;
        self.guard
            .read("list_orders_by_status", move || {
                inner.list_orders_by_status(status)
            })
            .await
    }

    async fn update_order(
        &self,
        id: OrderId,
        expected: OrderStatus,
        patch: &OrderPatch,
    ) -> Result<Order, LedgerError> {
        self.guard
            .write("update_order", self.inner.update_order(id, expected, patch))
            .await
    }

    async fn set_post_ref(&self, id: OrderId, post: &PostRef) -> Result<Order, LedgerError> {
        self.guard
            .write("set_post_ref", self.inner.set_post_ref(id, post))
            .await
    }

    async fn stats(&self) -> Result<LedgerStats, LedgerError> {
        let inner = &self.inner;
        self.guard.read("stats", move || inner.stats()).await
    }
}

#[async_trait]
impl<M: Messenger> Messenger for Guarded<M> {
    async fn send(
        &self,
        chat: ChatId,
        message: &OutboundMessage,
    ) -> Result<SentMessage, MessengerError> {
        self.guard.write("send", self.inner.send(chat, message)).await
    }

    async fn own_membership(&self, chat: ChatId) -> Result<Membership, MessengerError> {
        let inner = &self.inner;
        self.guard
            .read("own_membership", move || inner.own_membership(chat))
            .await
    }
}
