//! Database module for the broker ledger
//!
//! Persists principals, channels and orders. Order writes are conditional on
//! the status the caller last read, so two writers racing on one order cannot
//! both succeed.

mod schema;

pub use schema::{LedgerStats, SCHEMA};
use schema::{
    channel_from_row, order_from_row, principal_from_row, CHANNEL_COLUMNS, ORDER_COLUMNS,
    PRINCIPAL_COLUMNS,
};

use crate::domain::{
    Channel, ChannelDraft, ChannelId, ChannelStatus, ChatId, NewOrder, Order, OrderId,
    OrderPatch, OrderStatus, PostRef, PriceList, Principal, PrincipalId,
};
use chrono::Utc;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Could not encode value: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Duplicate(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.conn();
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// A panic while holding the lock cannot leave a half-applied statement
    /// behind, so a poisoned mutex is still usable.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hold the connection from outside, to simulate a long-running statement
    #[cfg(test)]
    pub fn lock_connection(&self) -> MutexGuard<'_, Connection> {
        self.conn()
    }

    // ==================== Principal Operations ====================

    pub fn upsert_principal(&self, id: PrincipalId, display_name: &str) -> DbResult<Principal> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO principals (id, display_name, is_channel_owner, is_advertiser, created_at)
             VALUES (?1, ?2, 0, 0, ?3)
             ON CONFLICT(id) DO UPDATE SET display_name = excluded.display_name",
            params![id.0, display_name, Utc::now().to_rfc3339()],
        )?;
        query_principal(&conn, id)
    }

    pub fn get_principal(&self, id: PrincipalId) -> DbResult<Principal> {
        query_principal(&self.conn(), id)
    }

    // ==================== Channel Operations ====================

    /// Insert a listed channel and flag its owner
    pub fn create_channel(
        &self,
        owner: PrincipalId,
        draft: &ChannelDraft,
        prices: &PriceList,
    ) -> DbResult<Channel> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM channels WHERE chat_id = ?1",
                params![draft.chat_id.0],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Err(DbError::Duplicate(format!(
                "Channel {} is already listed",
                draft.title
            )));
        }

        let now = Utc::now().to_rfc3339();
        tx.execute(
            "INSERT INTO channels (owner_id, chat_id, title, username, status, prices, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                owner.0,
                draft.chat_id.0,
                draft.title,
                draft.username,
                ChannelStatus::Active.as_str(),
                serde_json::to_string(prices)?,
                now,
            ],
        )
        .map_err(|e| map_constraint(e, || format!("Channel {} is already listed", draft.title)))?;
        let id = ChannelId(tx.last_insert_rowid());

        tx.execute(
            "UPDATE principals SET is_channel_owner = 1 WHERE id = ?1",
            params![owner.0],
        )?;

        let channel = query_channel(&tx, id)?;
        tx.commit()?;
        Ok(channel)
    }

    pub fn get_channel(&self, id: ChannelId) -> DbResult<Channel> {
        query_channel(&self.conn(), id)
    }

    pub fn find_channel_by_chat(&self, chat: ChatId) -> DbResult<Option<Channel>> {
        let conn = self.conn();
        let sql = format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE chat_id = ?1");
        Ok(conn
            .query_row(&sql, params![chat.0], channel_from_row)
            .optional()?)
    }

    pub fn list_channels_by_owner(&self, owner: PrincipalId) -> DbResult<Vec<Channel>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {CHANNEL_COLUMNS} FROM channels WHERE owner_id = ?1 ORDER BY created_at DESC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![owner.0], channel_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Most recently listed active channels first
    pub fn list_active_channels(&self, limit: usize) -> DbResult<Vec<Channel>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {CHANNEL_COLUMNS} FROM channels WHERE status = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2"
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![ChannelStatus::Active.as_str(), limit],
            channel_from_row,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn update_channel_prices(&self, id: ChannelId, prices: &PriceList) -> DbResult<Channel> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE channels SET prices = ?1, updated_at = ?2 WHERE id = ?3",
            params![serde_json::to_string(prices)?, Utc::now().to_rfc3339(), id.0],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound(format!("Channel {id}")));
        }
        query_channel(&conn, id)
    }

    pub fn set_channel_status(&self, id: ChannelId, status: ChannelStatus) -> DbResult<Channel> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE channels SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), Utc::now().to_rfc3339(), id.0],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound(format!("Channel {id}")));
        }
        query_channel(&conn, id)
    }

    // ==================== Order Operations ====================

    /// Insert an order awaiting payment and flag the buyer as an advertiser
    pub fn create_order(&self, order: &NewOrder) -> DbResult<Order> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let channel: Option<i64> = tx
            .query_row(
                "SELECT id FROM channels WHERE id = ?1",
                params![order.channel_id.0],
                |row| row.get(0),
            )
            .optional()?;
        if channel.is_none() {
            return Err(DbError::NotFound(format!("Channel {}", order.channel_id)));
        }

        let price = i64::try_from(order.price.cents())
            .map_err(|_| DbError::Conflict(format!("Price {} is out of range", order.price)))?;
        tx.execute(
            "INSERT INTO orders (buyer_id, channel_id, ad_type, price_cents, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                order.buyer_id.0,
                order.channel_id.0,
                order.ad_type,
                price,
                OrderStatus::PendingPayment.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        let id = OrderId(tx.last_insert_rowid());

        tx.execute(
            "UPDATE principals SET is_advertiser = 1 WHERE id = ?1",
            params![order.buyer_id.0],
        )?;

        let created = query_order(&tx, id)?;
        tx.commit()?;
        Ok(created)
    }

    pub fn get_order(&self, id: OrderId) -> DbResult<Order> {
        query_order(&self.conn(), id)
    }

    pub fn list_orders_by_buyer(&self, buyer: PrincipalId) -> DbResult<Vec<Order>> {
        self.list_orders_where("buyer_id = ?1", buyer.0)
    }

    pub fn list_orders_by_channel(&self, channel: ChannelId) -> DbResult<Vec<Order>> {
        self.list_orders_where("channel_id = ?1", channel.0)
    }

    pub fn list_orders_by_status(&self, status: OrderStatus) -> DbResult<Vec<Order>> {
        self.list_orders_where("status = ?1", status.as_str())
    }

    fn list_orders_where(
        &self,
        predicate: &str,
        value: impl rusqlite::ToSql,
    ) -> DbResult<Vec<Order>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE {predicate} ORDER BY created_at DESC, id DESC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![value], order_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Compare-and-swap update: applies `patch` only while the order is still
    /// in `expected`.
    pub fn update_order(
        &self,
        id: OrderId,
        expected: OrderStatus,
        patch: &OrderPatch,
    ) -> DbResult<Order> {
        let conn = self.conn();
        let creative = patch.creative.as_ref();
        let media = creative.and_then(|c| c.media.as_ref());

        let changed = conn.execute(
            "UPDATE orders SET
                status = COALESCE(?1, status),
                payment_method = COALESCE(?2, payment_method),
                payment_reference = COALESCE(?3, payment_reference),
                creative_text = COALESCE(?4, creative_text),
                creative_media_kind = CASE WHEN ?4 IS NULL THEN creative_media_kind ELSE ?5 END,
                creative_media_id = CASE WHEN ?4 IS NULL THEN creative_media_id ELSE ?6 END,
                note = COALESCE(?7, note),
                paid_at = COALESCE(?8, paid_at),
                posted_at = COALESCE(?9, posted_at),
                completed_at = COALESCE(?10, completed_at),
                updated_at = ?11
             WHERE id = ?12 AND status = ?13",
            params![
                patch.status.map(OrderStatus::as_str),
                patch.payment.as_ref().map(|p| p.method.as_str()),
                patch.payment.as_ref().map(|p| p.reference.as_str()),
                creative.map(|c| c.text.as_str()),
                media.map(|m| m.kind.as_str()),
                media.map(|m| m.file_id.as_str()),
                patch.note,
                patch.paid_at.map(|t| t.to_rfc3339()),
                patch.posted_at.map(|t| t.to_rfc3339()),
                patch.completed_at.map(|t| t.to_rfc3339()),
                Utc::now().to_rfc3339(),
                id.0,
                expected.as_str(),
            ],
        )?;

        if changed == 0 {
            let current: Option<String> = conn
                .query_row(
                    "SELECT status FROM orders WHERE id = ?1",
                    params![id.0],
                    |row| row.get(0),
                )
                .optional()?;
            return Err(match current {
                None => DbError::NotFound(format!("Order #{id}")),
                Some(status) => DbError::Conflict(format!(
                    "Order #{id} is {status}, expected {expected}"
                )),
            });
        }

        query_order(&conn, id)
    }

    /// Record where the order was published. Only the first writer wins.
    pub fn set_post_ref(&self, id: OrderId, post: &PostRef) -> DbResult<Order> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE orders SET post_chat_id = ?1, post_message_id = ?2, updated_at = ?3
             WHERE id = ?4 AND post_message_id IS NULL",
            params![post.chat_id.0, post.message_id, Utc::now().to_rfc3339(), id.0],
        )?;

        if changed == 0 {
            let order = query_order(&conn, id)?;
            return Err(DbError::Conflict(format!(
                "Order #{} already has a published post",
                order.id
            )));
        }

        query_order(&conn, id)
    }

    // ==================== Reporting ====================

    pub fn stats(&self) -> DbResult<LedgerStats> {
        let conn = self.conn();
        let count =
            |sql: &str| -> rusqlite::Result<i64> { conn.query_row(sql, [], |row| row.get(0)) };

        let mut stats = LedgerStats {
            principals: count("SELECT COUNT(*) FROM principals")?,
            channels: count("SELECT COUNT(*) FROM channels")?,
            active_channels: count("SELECT COUNT(*) FROM channels WHERE status = 'active'")?,
            orders: count("SELECT COUNT(*) FROM orders")?,
            ..LedgerStats::default()
        };

        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM orders GROUP BY status")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (status, n) = row?;
            stats.orders_by_status.insert(status, n);
        }

        Ok(stats)
    }
}

fn map_constraint(e: rusqlite::Error, message: impl FnOnce() -> String) -> DbError {
    match e {
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
            DbError::Duplicate(message())
        }
        other => DbError::Sqlite(other),
    }
}

fn query_principal(conn: &Connection, id: PrincipalId) -> DbResult<Principal> {
    let sql = format!("SELECT {PRINCIPAL_COLUMNS} FROM principals WHERE id = ?1");
    conn.query_row(&sql, params![id.0], principal_from_row)
        .optional()?
        .ok_or_else(|| DbError::NotFound(format!("Principal {id}")))
}

fn query_channel(conn: &Connection, id: ChannelId) -> DbResult<Channel> {
    let sql = format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE id = ?1");
    conn.query_row(&sql, params![id.0], channel_from_row)
        .optional()?
        .ok_or_else(|| DbError::NotFound(format!("Channel {id}")))
}

fn query_order(conn: &Connection, id: OrderId) -> DbResult<Order> {
    let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1");
    conn.query_row(&sql, params![id.0], order_from_row)
        .optional()?
        .ok_or_else(|| DbError::NotFound(format!("Order #{id}")))
}
