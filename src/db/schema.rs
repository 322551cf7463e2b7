//! Database schema and row mapping

use crate::domain::{
    Channel, ChannelId, ChannelStatus, ChatId, Creative, MediaKind, MediaRef, Order, OrderId,
    OrderStatus, Payment, PaymentMethod, PostRef, Price, PriceList, Principal, PrincipalId,
};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::Row;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// SQL schema for initialization
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS principals (
    id INTEGER PRIMARY KEY,
    display_name TEXT NOT NULL,
    is_channel_owner BOOLEAN NOT NULL DEFAULT 0,
    is_advertiser BOOLEAN NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS channels (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id INTEGER NOT NULL,
    chat_id INTEGER NOT NULL UNIQUE,
    title TEXT NOT NULL,
    username TEXT,
    status TEXT NOT NULL DEFAULT 'active',
    prices TEXT NOT NULL CHECK (prices <> '{}'),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    FOREIGN KEY (owner_id) REFERENCES principals(id)
);

CREATE INDEX IF NOT EXISTS idx_channels_owner ON channels(owner_id);
CREATE INDEX IF NOT EXISTS idx_channels_status ON channels(status, created_at DESC);

CREATE TABLE IF NOT EXISTS orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    buyer_id INTEGER NOT NULL,
    channel_id INTEGER NOT NULL,
    ad_type TEXT NOT NULL,
    price_cents INTEGER NOT NULL CHECK (price_cents > 0),
    status TEXT NOT NULL DEFAULT 'pending_payment',
    payment_method TEXT,
    payment_reference TEXT,
    creative_text TEXT,
    creative_media_kind TEXT,
    creative_media_id TEXT,
    post_chat_id INTEGER,
    post_message_id INTEGER,
    note TEXT,
    created_at TEXT NOT NULL,
    paid_at TEXT,
    posted_at TEXT,
    completed_at TEXT,
    updated_at TEXT NOT NULL,

    FOREIGN KEY (buyer_id) REFERENCES principals(id),
    FOREIGN KEY (channel_id) REFERENCES channels(id)
);

CREATE INDEX IF NOT EXISTS idx_orders_buyer ON orders(buyer_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_orders_channel ON orders(channel_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status);
";

pub(crate) const PRINCIPAL_COLUMNS: &str =
    "id, display_name, is_channel_owner, is_advertiser, created_at";

pub(crate) const CHANNEL_COLUMNS: &str =
    "id, owner_id, chat_id, title, username, status, prices, created_at";

pub(crate) const ORDER_COLUMNS: &str = "id, buyer_id, channel_id, ad_type, price_cents, status, \
     payment_method, payment_reference, creative_text, creative_media_kind, creative_media_id, \
     post_chat_id, post_message_id, note, created_at, paid_at, posted_at, completed_at";

/// Aggregate counts for the status endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    pub principals: i64,
    pub channels: i64,
    pub active_channels: i64,
    pub orders: i64,
    pub orders_by_status: BTreeMap<String, i64>,
}

#[derive(Debug, Error)]
#[error("unexpected stored value: {0}")]
pub struct CorruptValue(String);

fn corrupt(idx: usize, what: impl Into<String>) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(CorruptValue(what.into())))
}

pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

fn optional_datetime(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    Ok(row
        .get::<_, Option<String>>(idx)?
        .map(|s| parse_datetime(&s)))
}

pub(crate) fn principal_from_row(row: &Row<'_>) -> rusqlite::Result<Principal> {
    Ok(Principal {
        id: PrincipalId(row.get(0)?),
        display_name: row.get(1)?,
        is_channel_owner: row.get(2)?,
        is_advertiser: row.get(3)?,
        created_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}

pub(crate) fn channel_from_row(row: &Row<'_>) -> rusqlite::Result<Channel> {
    let status: String = row.get(5)?;
    let status = ChannelStatus::parse(&status)
        .ok_or_else(|| corrupt(5, format!("channel status `{status}`")))?;
    let prices: String = row.get(6)?;
    let prices: PriceList =
        serde_json::from_str(&prices).map_err(|e| corrupt(6, format!("price list: {e}")))?;

    Ok(Channel {
        id: ChannelId(row.get(0)?),
        owner_id: PrincipalId(row.get(1)?),
        chat_id: ChatId(row.get(2)?),
        title: row.get(3)?,
        username: row.get(4)?,
        status,
        prices,
        created_at: parse_datetime(&row.get::<_, String>(7)?),
    })
}

pub(crate) fn order_from_row(row: &Row<'_>) -> rusqlite::Result<Order> {
    let price: i64 = row.get(4)?;
    let price = u64::try_from(price).map_err(|_| corrupt(4, format!("price {price}")))?;

    let status: String = row.get(5)?;
    let status =
        OrderStatus::parse(&status).ok_or_else(|| corrupt(5, format!("order status `{status}`")))?;

    let payment = match (
        row.get::<_, Option<String>>(6)?,
        row.get::<_, Option<String>>(7)?,
    ) {
        (Some(method), Some(reference)) => Some(Payment {
            method: PaymentMethod::parse(&method)
                .ok_or_else(|| corrupt(6, format!("payment method `{method}`")))?,
            reference,
        }),
        _ => None,
    };

    let media = match (
        row.get::<_, Option<String>>(9)?,
        row.get::<_, Option<String>>(10)?,
    ) {
        (Some(kind), Some(file_id)) => Some(MediaRef {
            kind: MediaKind::parse(&kind)
                .ok_or_else(|| corrupt(9, format!("media kind `{kind}`")))?,
            file_id,
        }),
        _ => None,
    };
    let creative = row
        .get::<_, Option<String>>(8)?
        .map(|text| Creative { text, media });

    let post = match (row.get::<_, Option<i64>>(11)?, row.get::<_, Option<i64>>(12)?) {
        (Some(chat_id), Some(message_id)) => Some(PostRef {
            chat_id: ChatId(chat_id),
            message_id,
        }),
        _ => None,
    };

    Ok(Order {
        id: OrderId(row.get(0)?),
        buyer_id: PrincipalId(row.get(1)?),
        channel_id: ChannelId(row.get(2)?),
        ad_type: row.get(3)?,
        price: Price(price),
        status,
        payment,
        creative,
        post,
        note: row.get(13)?,
        created_at: parse_datetime(&row.get::<_, String>(14)?),
        paid_at: optional_datetime(row, 15)?,
        posted_at: optional_datetime(row, 16)?,
        completed_at: optional_datetime(row, 17)?,
    })
}
