//! Mock implementations for testing
//!
//! These mocks enable integration testing without real I/O.

use super::traits::*;
use super::Broker;
use crate::db::LedgerStats;
use crate::domain::{
    Channel, ChannelDraft, ChannelId, ChannelStatus, ChatId, NewOrder, Order, OrderId,
    OrderPatch, OrderStatus, PostRef, PriceList, Principal, PrincipalId,
};
use crate::error::BrokerResult;
use crate::messaging::{Inbound, Membership, OutboundMessage, SentMessage};
use crate::orders::SimulatedGateway;
use crate::session::{InMemorySessionStore, SessionStore};
use crate::state_machine::{Action, Command, ConvState, Event};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// In-memory Ledger
// ============================================================================

#[derive(Default)]
struct LedgerState {
    principals: HashMap<PrincipalId, Principal>,
    channels: BTreeMap<ChannelId, Channel>,
    orders: BTreeMap<OrderId, Order>,
    next_channel: i64,
    next_order: i64,
}

/// Ledger with the same precondition semantics as the SQLite one
#[derive(Default)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
    unavailable: AtomicBool,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `Unavailable`
    pub fn fail_with_unavailable(&self, fail: bool) {
        self.unavailable.store(fail, Ordering::SeqCst);
    }

    /// Move an order's publish time, e.g. to make it look stale
    pub fn set_posted_at(&self, id: OrderId, at: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap();
        if let Some(order) = state.orders.get_mut(&id) {
            order.posted_at = Some(at);
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, LedgerState>, LedgerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("mock ledger down".to_string()));
        }
        Ok(self.state.lock().unwrap())
    }
}

fn newest_first<T: Clone>(items: impl DoubleEndedIterator<Item = T>) -> Vec<T> {
    items.rev().collect()
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn upsert_principal(
        &self,
        id: PrincipalId,
        display_name: &str,
    ) -> Result<Principal, LedgerError> {
        let mut state = self.lock()?;
        let principal = state.principals.entry(id).or_insert_with(|| Principal {
            id,
            display_name: display_name.to_string(),
            is_channel_owner: false,
            is_advertiser: false,
            created_at: Utc::now(),
        });
        principal.display_name = display_name.to_string();
        Ok(principal.clone())
    }

    async fn get_principal(&self, id: PrincipalId) -> Result<Principal, LedgerError> {
        self.lock()?
            .principals
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("Principal {id}")))
    }

    async fn create_channel(
        &self,
        owner: PrincipalId,
        draft: &ChannelDraft,
        prices: &PriceList,
    ) -> Result<Channel, LedgerError> {
        let mut state = self.lock()?;
        if state.channels.values().any(|c| c.chat_id == draft.chat_id) {
            return Err(LedgerError::Duplicate(format!(
                "Channel {} is already listed",
                draft.title
            )));
        }
        state.next_channel += 1;
        let channel = Channel {
            id: ChannelId(state.next_channel),
            owner_id: owner,
            chat_id: draft.chat_id,
            title: draft.title.clone(),
            username: draft.username.clone(),
            status: ChannelStatus::Active,
            prices: prices.clone(),
            created_at: Utc::now(),
        };
        state.channels.insert(channel.id, channel.clone());
        if let Some(principal) = state.principals.get_mut(&owner) {
            principal.is_channel_owner = true;
        }
        Ok(channel)
    }

    async fn get_channel(&self, id: ChannelId) -> Result<Channel, LedgerError> {
        self.lock()?
            .channels
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("Channel {id}")))
    }

    async fn find_channel_by_chat(&self, chat: ChatId) -> Result<Option<Channel>, LedgerError> {
        Ok(self
            .lock()?
            .channels
            .values()
            .find(|c| c.chat_id == chat)
            .cloned())
    }

    async fn list_channels_by_owner(
        &self,
        owner: PrincipalId,
    ) -> Result<Vec<Channel>, LedgerError> {
        let state = self.lock()?;
        Ok(newest_first(
            state.channels.values().filter(|c| c.owner_id == owner).cloned(),
        ))
    }

    async fn list_active_channels(&self, limit: usize) -> Result<Vec<Channel>, LedgerError> {
        let state = self.lock()?;
        let mut active = newest_first(state.channels.values().filter(|c| c.is_active()).cloned());
        active.truncate(limit);
        Ok(active)
    }

    async fn update_channel_prices(
        &self,
        id: ChannelId,
        prices: &PriceList,
    ) -> Result<Channel, LedgerError> {
        let mut state = self.lock()?;
        let channel = state
            .channels
            .get_mut(&id)
            .ok_or_else(|| LedgerError::NotFound(format!("Channel {id}")))?;
        channel.prices = prices.clone();
        Ok(channel.clone())
    }

    async fn set_channel_status(
        &self,
        id: ChannelId,
        status: ChannelStatus,
    ) -> Result<Channel, LedgerError> {
        let mut state = self.lock()?;
        let channel = state
            .channels
            .get_mut(&id)
            .ok_or_else(|| LedgerError::NotFound(format!("Channel {id}")))?;
        channel.status = status;
        Ok(channel.clone())
    }

    async fn create_order(&self, order: &NewOrder) -> Result<Order, LedgerError> {
        let mut state = self.lock()?;
        if !state.channels.contains_key(&order.channel_id) {
            return Err(LedgerError::NotFound(format!("Channel {}", order.channel_id)));
        }
        state.next_order += 1;
        let created = Order {
            id: OrderId(state.next_order),
            buyer_id: order.buyer_id,
            channel_id: order.channel_id,
            ad_type: order.ad_type.clone(),
            price: order.price,
            status: OrderStatus::PendingPayment,
            payment: None,
            creative: None,
            post: None,
            note: None,
            created_at: Utc::now(),
            paid_at: None,
            posted_at: None,
            completed_at: None,
        };
        state.orders.insert(created.id, created.clone());
        if let Some(principal) = state.principals.get_mut(&order.buyer_id) {
            principal.is_advertiser = true;
        }
        Ok(created)
    }

    async fn get_order(&self, id: OrderId) -> Result<Order, LedgerError> {
        self.lock()?
            .orders
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("Order #{id}")))
    }

    async fn list_orders_by_buyer(&self, buyer: PrincipalId) -> Result<Vec<Order>, LedgerError> {
        let state = self.lock()?;
        Ok(newest_first(
            state.orders.values().filter(|o| o.buyer_id == buyer).cloned(),
        ))
    }

    async fn list_orders_by_channel(
        &self,
        channel: ChannelId,
    ) -> Result<Vec<Order>, LedgerError> {
        let state = self.lock()?;
        Ok(newest_first(
            state.orders.values().filter(|o| o.channel_id == channel).cloned(),
        ))
    }

    async fn list_orders_by_status(
        &self,
        status: OrderStatus,
    ) -> Result<Vec<Order>, LedgerError> {
        let state = self.lock()?;
        Ok(newest_first(
            state.orders.values().filter(|o| o.status == status).cloned(),
        ))
    }

    async fn update_order(
        &self,
        id: OrderId,
        expected: OrderStatus,
        patch: &OrderPatch,
    ) -> Result<Order, LedgerError> {
        let mut state = self.lock()?;
        let order = state
            .orders
            .get_mut(&id)
            .ok_or_else(|| LedgerError::NotFound(format!("Order #{id}")))?;
        if order.status != expected {
            return Err(LedgerError::Conflict(format!(
                "Order #{id} is {}, expected {expected}",
                order.status
            )));
        }

        if let Some(status) = patch.status {
            order.status = status;
        }
        if let Some(payment) = &patch.payment {
            order.payment = Some(payment.clone());
        }
        if let Some(creative) = &patch.creative {
            order.creative = Some(creative.clone());
        }
        if let Some(note) = &patch.note {
            order.note = Some(note.clone());
        }
        order.paid_at = patch.paid_at.or(order.paid_at);
        order.posted_at = patch.posted_at.or(order.posted_at);
        order.completed_at = patch.completed_at.or(order.completed_at);
        Ok(order.clone())
    }

    async fn set_post_ref(&self, id: OrderId, post: &PostRef) -> Result<Order, LedgerError> {
        let mut state = self.lock()?;
        let order = state
            .orders
            .get_mut(&id)
            .ok_or_else(|| LedgerError::NotFound(format!("Order #{id}")))?;
        if order.post.is_some() {
            return Err(LedgerError::Conflict(format!(
                "Order #{id} already has a published post"
            )));
        }
        order.post = Some(post.clone());
        Ok(order.clone())
    }

    async fn stats(&self) -> Result<LedgerStats, LedgerError> {
        let state = self.lock()?;
        let count = |n: usize| i64::try_from(n).unwrap();
        let mut stats = LedgerStats {
            principals: count(state.principals.len()),
            channels: count(state.channels.len()),
            active_channels: count(state.channels.values().filter(|c| c.is_active()).count()),
            orders: count(state.orders.len()),
            ..LedgerStats::default()
        };
        for order in state.orders.values() {
            *stats
                .orders_by_status
                .entry(order.status.as_str().to_string())
                .or_default() += 1;
        }
        Ok(stats)
    }
}

// ============================================================================
// Mock Messenger
// ============================================================================

/// Records every message and answers membership lookups from a table
pub struct MockMessenger {
    sent: Mutex<Vec<(ChatId, OutboundMessage)>>,
    memberships: Mutex<HashMap<ChatId, Membership>>,
    lookups: AtomicUsize,
    unavailable: AtomicBool,
    next_message_id: AtomicI64,
}

impl MockMessenger {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            memberships: Mutex::new(HashMap::new()),
            lookups: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
            next_message_id: AtomicI64::new(1),
        }
    }

    pub fn set_membership(&self, chat: ChatId, membership: Membership) {
        self.memberships.lock().unwrap().insert(chat, membership);
    }

    /// Make every call fail with `Unavailable`
    pub fn fail_with_unavailable(&self, fail: bool) {
        self.unavailable.store(fail, Ordering::SeqCst);
    }

    pub fn membership_lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Messages delivered to `chat`, oldest first
    pub fn sent_to(&self, chat: ChatId) -> Vec<OutboundMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| *c == chat)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn last_sent_to(&self, chat: ChatId) -> Option<OutboundMessage> {
        self.sent_to(chat).pop()
    }
}

impl Default for MockMessenger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Messenger for MockMessenger {
    async fn send(
        &self,
        chat: ChatId,
        message: &OutboundMessage,
    ) -> Result<SentMessage, MessengerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(MessengerError::Unavailable("mock platform down".to_string()));
        }
        self.sent.lock().unwrap().push((chat, message.clone()));
        Ok(SentMessage {
            chat_id: chat,
            message_id: self.next_message_id.fetch_add(1, Ordering::SeqCst),
        })
    }

    async fn own_membership(&self, chat: ChatId) -> Result<Membership, MessengerError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(MessengerError::Unavailable("mock platform down".to_string()));
        }
        self.memberships
            .lock()
            .unwrap()
            .get(&chat)
            .copied()
            .ok_or_else(|| MessengerError::Rejected(format!("chat {chat} not found")))
    }
}

/// Messenger that waits before every call
pub struct DelayedMessenger<M> {
    inner: M,
    delay: Duration,
}

impl<M: Messenger> DelayedMessenger<M> {
    pub fn new(inner: M, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl<M: Messenger> Messenger for DelayedMessenger<M> {
    async fn send(
        &self,
        chat: ChatId,
        message: &OutboundMessage,
    ) -> Result<SentMessage, MessengerError> {
        tokio::time::sleep(self.delay).await;
        self.inner.send(chat, message).await
    }

    async fn own_membership(&self, chat: ChatId) -> Result<Membership, MessengerError> {
        tokio::time::sleep(self.delay).await;
        self.inner.own_membership(chat).await
    }
}

// ============================================================================
// Scripted inbound source
// ============================================================================

/// Hands out queued batches, then behaves like an idle long poll
#[derive(Default)]
pub struct ScriptedSource {
    batches: Mutex<VecDeque<Result<Vec<Inbound>, MessengerError>>>,
    polls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_batch(&self, batch: Vec<Inbound>) {
        self.batches.lock().unwrap().push_back(Ok(batch));
    }

    pub fn push_error(&self, error: MessengerError) {
        self.batches.lock().unwrap().push_back(Err(error));
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InboundSource for ScriptedSource {
    async fn next_batch(&self) -> Result<Vec<Inbound>, MessengerError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let next = self.batches.lock().unwrap().pop_front();
        match next {
            Some(batch) => batch,
            None => {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(Vec::new())
            }
        }
    }
}

// ============================================================================
// Test Broker
// ============================================================================

pub const ADMIN: PrincipalId = PrincipalId(99);

pub fn inbound(principal: PrincipalId, event: Event) -> Inbound {
    Inbound {
        principal,
        display_name: format!("user {principal}"),
        event,
    }
}

/// Broker wired to in-memory collaborators, with `ADMIN` as platform admin
pub struct TestBroker {
    pub ledger: Arc<InMemoryLedger>,
    pub messenger: Arc<MockMessenger>,
    pub sessions: Arc<InMemorySessionStore>,
    pub broker: Arc<Broker<InMemoryLedger, MockMessenger, InMemorySessionStore>>,
}

impl TestBroker {
    pub fn new() -> Self {
        let ledger = Arc::new(InMemoryLedger::new());
        let messenger = Arc::new(MockMessenger::new());
        let sessions = Arc::new(InMemorySessionStore::new());
        let broker = Arc::new(Broker::new(
            ledger.clone(),
            messenger.clone(),
            sessions.clone(),
            Arc::new(SimulatedGateway),
            HashSet::from([ADMIN]),
        ));
        Self {
            ledger,
            messenger,
            sessions,
            broker,
        }
    }

    pub async fn send(&self, principal: PrincipalId, event: Event) -> BrokerResult<ConvState> {
        self.broker.handle(inbound(principal, event)).await
    }

    pub async fn press(&self, principal: PrincipalId, action: Action) -> ConvState {
        self.send(principal, Event::Action(action)).await.unwrap()
    }

    pub async fn text(&self, principal: PrincipalId, text: &str) -> ConvState {
        let event = match Command::parse(text) {
            Some(command) => Event::Command(command),
            None => Event::Text(text.to_string()),
        };
        self.send(principal, event).await.unwrap()
    }

    pub async fn stored_state(&self, principal: PrincipalId) -> ConvState {
        self.sessions.load(principal).await.unwrap().state
    }

    pub fn last_reply(&self, principal: PrincipalId) -> OutboundMessage {
        self.messenger
            .last_sent_to(principal.chat())
            .expect("no reply sent")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderId, PaymentMethod, Price};
    use crate::error::ErrorKind;
    use crate::messaging::MemberStatus;
    use crate::state_machine::PricingTarget;

    const OWNER: PrincipalId = PrincipalId(1);
    const BUYER: PrincipalId = PrincipalId(2);
    const CHANNEL_CHAT: ChatId = ChatId(-1001);

    fn draft() -> ChannelDraft {
        ChannelDraft {
            chat_id: CHANNEL_CHAT,
            title: "Rust News".to_string(),
            username: Some("rustnews".to_string()),
        }
    }

    fn membership(status: MemberStatus) -> Membership {
        Membership {
            status,
            can_post_messages: None,
        }
    }

    fn actions(message: &OutboundMessage) -> Vec<Action> {
        message
            .buttons
            .iter()
            .flatten()
            .map(|b| b.action.clone())
            .collect()
    }

    /// Owner lists `draft()` through the conversation
    async fn register_channel(t: &TestBroker) -> Channel {
        t.messenger
            .set_membership(CHANNEL_CHAT, membership(MemberStatus::Creator));
        assert_eq!(
            t.press(OWNER, Action::AddChannel).await,
            ConvState::AwaitingChannelForward
        );
        let state = t
            .send(OWNER, Event::ForwardedChannel(draft()))
            .await
            .unwrap();
        assert_eq!(
            state,
            ConvState::AwaitingPricing {
                target: PricingTarget::New { draft: draft() }
            }
        );
        assert_eq!(t.text(OWNER, "post: 100\nstory: 40").await, ConvState::Idle);
        t.ledger
            .find_channel_by_chat(CHANNEL_CHAT)
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_end_to_end_purchase() {
        let t = TestBroker::new();
        let channel = register_channel(&t).await;
        assert!(t.last_reply(OWNER).text.contains("is now listed"));

        t.press(BUYER, Action::Browse).await;
        assert!(actions(&t.last_reply(BUYER)).contains(&Action::SelectChannel(channel.id)));

        let state = t.press(BUYER, Action::SelectChannel(channel.id)).await;
        assert!(matches!(state, ConvState::AwaitingAdTypeSelection { .. }));
        let state = t
            .press(BUYER, Action::SelectAdType("post".to_string()))
            .await;
        assert!(matches!(
            state,
            ConvState::AwaitingPurchaseConfirmation { price: Price(10_000), .. }
        ));

        let state = t.press(BUYER, Action::ConfirmPurchase).await;
        let ConvState::AwaitingPaymentSelection { order_id, .. } = state else {
            panic!("expected payment step, got {state:?}");
        };

        let state = t.press(BUYER, Action::Pay(PaymentMethod::Card)).await;
        assert_eq!(state, ConvState::AwaitingCreativeText { order_id });
        let state = t.text(BUYER, "Learn Rust in a weekend").await;
        assert!(matches!(state, ConvState::AwaitingCreativeMedia { .. }));
        assert_eq!(t.press(BUYER, Action::SkipMedia).await, ConvState::Idle);

        // Owner got the preview with moderation buttons
        let preview = t.messenger.sent_to(OWNER.chat());
        assert!(preview
            .iter()
            .any(|m| actions(m).contains(&Action::Approve(order_id))));

        t.press(OWNER, Action::Approve(order_id)).await;
        let published = t.messenger.sent_to(CHANNEL_CHAT);
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].text, "Learn Rust in a weekend");

        t.press(BUYER, Action::ConfirmCompletion(order_id)).await;
        let order = t.ledger.get_order(order_id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Completed);

        // A late reject is refused and leaves the order alone
        assert_eq!(t.press(OWNER, Action::Reject(order_id)).await, ConvState::Idle);
        assert!(t.last_reply(OWNER).text.contains("already have been processed"));
        assert_eq!(
            t.ledger.get_order(order_id).await.unwrap().status,
            OrderStatus::Completed
        );

        assert_eq!(t.stored_state(BUYER).await, ConvState::Idle);
        assert_eq!(t.stored_state(OWNER).await, ConvState::Idle);
    }

    #[tokio::test]
    async fn test_gate_failure_returns_to_idle() {
        let t = TestBroker::new();
        t.messenger
            .set_membership(CHANNEL_CHAT, membership(MemberStatus::Member));
        t.press(OWNER, Action::AddChannel).await;

        let state = t
            .send(OWNER, Event::ForwardedChannel(draft()))
            .await
            .unwrap();
        assert_eq!(state, ConvState::Idle);
        assert!(t.last_reply(OWNER).text.contains("not an administrator"));
        assert!(t.ledger.list_channels_by_owner(OWNER).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_channel_listed_twice_reports_plain_conflict() {
        let t = TestBroker::new();
        register_channel(&t).await;

        let rival = PrincipalId(3);
        t.press(rival, Action::AddChannel).await;
        t.send(rival, Event::ForwardedChannel(draft())).await.unwrap();
        assert_eq!(t.text(rival, "post: 5").await, ConvState::Idle);

        let reply = t.last_reply(rival).text;
        assert!(reply.contains("already listed by another owner"));
        assert!(!reply.contains("order"));
        assert!(t.ledger.list_channels_by_owner(rival).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bad_prices_keep_pricing_step() {
        let t = TestBroker::new();
        t.messenger
            .set_membership(CHANNEL_CHAT, membership(MemberStatus::Creator));
        t.press(OWNER, Action::AddChannel).await;
        let pricing = t
            .send(OWNER, Event::ForwardedChannel(draft()))
            .await
            .unwrap();

        assert_eq!(t.text(OWNER, "post 100").await, pricing);
        assert!(t.last_reply(OWNER).text.contains("could not read line"));

        // An empty list never reaches the ledger
        assert_eq!(t.text(OWNER, " , ").await, pricing);
        assert!(t.last_reply(OWNER).text.contains("price list is empty"));
        assert_eq!(t.ledger.stats().await.unwrap().channels, 0);
        assert_eq!(t.stored_state(OWNER).await, pricing);
    }

    #[tokio::test]
    async fn test_repricing_rechecks_rights() {
        let t = TestBroker::new();
        let channel = register_channel(&t).await;
        let lookups = t.messenger.membership_lookups();

        let state = t.press(OWNER, Action::EditPrices(channel.id)).await;
        assert!(matches!(state, ConvState::AwaitingPricing { .. }));
        assert_eq!(t.messenger.membership_lookups(), lookups + 1);
        assert_eq!(t.text(OWNER, "post: 250").await, ConvState::Idle);

        let repriced = t.ledger.get_channel(channel.id).await.unwrap();
        assert_eq!(repriced.prices.get("post"), Some(Price(25_000)));
        assert!(!repriced.prices.contains("story"));

        // Someone else can't edit it
        let state = t.press(BUYER, Action::EditPrices(channel.id)).await;
        assert_eq!(state, ConvState::Idle);
        assert!(t.last_reply(BUYER).text.contains("don't own"));
    }

    #[tokio::test]
    async fn test_paused_channel_keeps_buyer_in_step() {
        let t = TestBroker::new();
        let channel = register_channel(&t).await;
        t.press(BUYER, Action::SelectChannel(channel.id)).await;
        let confirming = t
            .press(BUYER, Action::SelectAdType("story".to_string()))
            .await;

        t.press(OWNER, Action::ToggleChannel(channel.id)).await;
        assert!(t.last_reply(OWNER).text.contains("hidden"));

        // Validation failures are retryable, so the step is kept
        assert_eq!(t.press(BUYER, Action::ConfirmPurchase).await, confirming);
        assert!(t.last_reply(BUYER).text.contains("not accepting orders"));
        assert!(t.ledger.list_orders_by_buyer(BUYER).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_from_payment_step() {
        let t = TestBroker::new();
        let channel = register_channel(&t).await;
        t.press(BUYER, Action::SelectChannel(channel.id)).await;
        t.press(BUYER, Action::SelectAdType("post".to_string()))
            .await;
        let ConvState::AwaitingPaymentSelection { order_id, .. } =
            t.press(BUYER, Action::ConfirmPurchase).await
        else {
            panic!("expected payment step");
        };

        assert_eq!(
            t.press(BUYER, Action::CancelOrder(order_id)).await,
            ConvState::Idle
        );
        assert_eq!(
            t.ledger.get_order(order_id).await.unwrap().status,
            OrderStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_refund_command() {
        let t = TestBroker::new();
        let channel = register_channel(&t).await;
        t.ledger.upsert_principal(BUYER, "buyer").await.unwrap();
        let lifecycle = t.broker.lifecycle();
        let (order, _) = lifecycle
            .create_order(BUYER, channel.id, "post")
            .await
            .unwrap();
        lifecycle
            .pay(order.id, BUYER, PaymentMethod::Crypto)
            .await
            .unwrap();

        t.text(BUYER, &format!("/refund {}", order.id)).await;
        assert!(t.last_reply(BUYER).text.contains("Only platform admins"));
        assert_eq!(
            t.ledger.get_order(order.id).await.unwrap().status,
            OrderStatus::Paid
        );

        t.text(ADMIN, &format!("/refund {}", order.id)).await;
        assert_eq!(
            t.ledger.get_order(order.id).await.unwrap().status,
            OrderStatus::Refunded
        );
    }

    #[tokio::test]
    async fn test_ledger_outage_leaves_session_untouched() {
        let t = TestBroker::new();
        t.press(OWNER, Action::AddChannel).await;

        t.ledger.fail_with_unavailable(true);
        let result = t.send(OWNER, Event::Command(Command::Start)).await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::ExternalUnavailable);
        assert!(t.last_reply(OWNER).text.contains("temporarily unavailable"));
        assert_eq!(t.stored_state(OWNER).await, ConvState::AwaitingChannelForward);
    }

    #[tokio::test]
    async fn test_session_revision_advances_only_on_change() {
        let t = TestBroker::new();
        t.press(OWNER, Action::AddChannel).await;
        t.text(OWNER, "/help").await;
        t.text(OWNER, "hello").await;
        let session = t.sessions.load(OWNER).await.unwrap();
        assert_eq!(session.revision, 1);
        assert_eq!(session.state, ConvState::AwaitingChannelForward);
    }

    #[tokio::test]
    async fn test_abandoned_interaction_keeps_stored_session() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.upsert_principal(OWNER, "owner").await.unwrap();
        let channel = ledger
            .create_channel(OWNER, &draft(), &PriceList::parse("post: 100").unwrap())
            .await
            .unwrap();
        let messenger = Arc::new(MockMessenger::new());
        let sessions = Arc::new(InMemorySessionStore::new());
        let broker = Broker::new(
            ledger,
            Arc::new(DelayedMessenger::new(messenger, Duration::from_millis(200))),
            sessions.clone(),
            Arc::new(SimulatedGateway),
            HashSet::new(),
        );
        let select = || inbound(BUYER, Event::Action(Action::SelectChannel(channel.id)));

        // Dropped while the reply is in flight
        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), broker.handle(select())).await;
        assert!(abandoned.is_err());
        let session = sessions.load(BUYER).await.unwrap();
        assert_eq!(session.state, ConvState::Idle);
        assert_eq!(session.revision, 0);

        // The principal is not left locked out
        let state = tokio::time::timeout(Duration::from_secs(2), broker.handle(select()))
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(state, ConvState::AwaitingAdTypeSelection { .. }));
    }

    #[tokio::test]
    async fn test_side_operation_mid_flow() {
        let t = TestBroker::new();
        let channel = register_channel(&t).await;
        t.ledger.upsert_principal(BUYER, "buyer").await.unwrap();
        let lifecycle = t.broker.lifecycle();
        let (order, _) = lifecycle
            .create_order(BUYER, channel.id, "post")
            .await
            .unwrap();
        lifecycle
            .pay(order.id, BUYER, PaymentMethod::Card)
            .await
            .unwrap();
        lifecycle
            .submit_creative(
                order.id,
                BUYER,
                crate::domain::Creative {
                    text: "Ship it".to_string(),
                    media: None,
                },
            )
            .await
            .unwrap();

        // Owner is halfway through adding another channel
        t.press(OWNER, Action::OwnerMenu).await;
        t.press(OWNER, Action::SubmitCreative(OrderId(404))).await;
        let state = t.press(OWNER, Action::Approve(order.id)).await;
        assert_eq!(state, ConvState::AwaitingCreativeText { order_id: OrderId(404) });
        assert_eq!(t.messenger.sent_to(CHANNEL_CHAT).len(), 1);
    }
}
