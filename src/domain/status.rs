//! Order status table
//!
//! `OrderStatus::apply` is the only place that knows which lifecycle action is
//! allowed from which status. Everything else asks it.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    PendingPayment,
    Paid,
    CreativeSubmitted,
    Posted,
    Completed,
    Cancelled,
    Refunded,
}

/// Lifecycle actions applied to an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderAction {
    Pay,
    SubmitCreative,
    Approve,
    Reject,
    Complete,
    Cancel,
    Refund,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::PendingPayment,
        OrderStatus::Paid,
        OrderStatus::CreativeSubmitted,
        OrderStatus::Posted,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
        OrderStatus::Refunded,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::PendingPayment => "pending_payment",
            OrderStatus::Paid => "paid",
            OrderStatus::CreativeSubmitted => "creative_submitted",
            OrderStatus::Posted => "posted",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    /// Status after applying `action`, or `None` when the action is not
    /// allowed from this status.
    pub fn apply(self, action: OrderAction) -> Option<OrderStatus> {
        use OrderAction as A;
        use OrderStatus as S;

        match (self, action) {
            (S::PendingPayment, A::Pay) => Some(S::Paid),
            (S::Paid, A::SubmitCreative) => Some(S::CreativeSubmitted),
            (S::CreativeSubmitted, A::Approve) => Some(S::Posted),
            (S::CreativeSubmitted, A::Reject) => Some(S::Paid),
            (S::Posted, A::Complete) => Some(S::Completed),
            (S::PendingPayment, A::Cancel) => Some(S::Cancelled),
            (S::Paid | S::CreativeSubmitted | S::Posted, A::Refund) => Some(S::Refunded),
            _ => None,
        }
    }

    /// No action leaves these statuses
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Cancelled | OrderStatus::Refunded
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            OrderStatus::PendingPayment => "⏳ Pending payment",
            OrderStatus::Paid => "💳 Paid, awaiting creative",
            OrderStatus::CreativeSubmitted => "📝 Creative under review",
            OrderStatus::Posted => "📢 Posted",
            OrderStatus::Completed => "✅ Completed",
            OrderStatus::Cancelled => "❌ Cancelled",
            OrderStatus::Refunded => "↩️ Refunded",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl OrderAction {
    pub const ALL: [OrderAction; 7] = [
        OrderAction::Pay,
        OrderAction::SubmitCreative,
        OrderAction::Approve,
        OrderAction::Reject,
        OrderAction::Complete,
        OrderAction::Cancel,
        OrderAction::Refund,
    ];

    /// Statuses from which this action is allowed
    pub fn sources(self) -> Vec<OrderStatus> {
        OrderStatus::ALL
            .into_iter()
            .filter(|s| s.apply(self).is_some())
            .collect()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderAction::Pay => "pay",
            OrderAction::SubmitCreative => "submit_creative",
            OrderAction::Approve => "approve",
            OrderAction::Reject => "reject",
            OrderAction::Complete => "complete",
            OrderAction::Cancel => "cancel",
            OrderAction::Refund => "admin_refund",
        }
    }
}

impl fmt::Display for OrderAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
