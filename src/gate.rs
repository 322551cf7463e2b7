//! Admin-verification gate
//!
//! Confirms the service account administers a claimed channel and may post in
//! it. Results are never cached: rights can be revoked between attempts.

use crate::domain::ChatId;
use crate::messaging::{MemberStatus, Membership};
use crate::runtime::Messenger;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Outcome of a verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AdminRights {
    pub is_admin: bool,
    pub can_post: bool,
}

impl AdminRights {
    pub const NONE: AdminRights = AdminRights {
        is_admin: false,
        can_post: false,
    };

    /// Both rights are needed to list a channel
    pub fn is_sufficient(self) -> bool {
        self.is_admin && self.can_post
    }

    /// Decision table over the service account's membership record
    pub fn from_membership(membership: &Membership) -> Self {
        match membership.status {
            MemberStatus::Creator => AdminRights {
                is_admin: true,
                can_post: true,
            },
            MemberStatus::Administrator => AdminRights {
                is_admin: true,
                can_post: membership.can_post_messages.unwrap_or(false),
            },
            MemberStatus::Member
            | MemberStatus::Restricted
            | MemberStatus::Left
            | MemberStatus::Kicked => AdminRights::NONE,
        }
    }
}

pub struct AdminGate<M: Messenger> {
    messenger: Arc<M>,
}

impl<M: Messenger> AdminGate<M> {
    pub fn new(messenger: Arc<M>) -> Self {
        Self { messenger }
    }

    /// Check rights in `chat`. A failed lookup counts as no rights.
    pub async fn verify(&self, chat: ChatId) -> AdminRights {
        match self.messenger.own_membership(chat).await {
            Ok(membership) => {
                let rights = AdminRights::from_membership(&membership);
                tracing::info!(
                    chat_id = %chat,
                    status = ?membership.status,
                    is_admin = rights.is_admin,
                    can_post = rights.can_post,
                    "Verified channel rights"
                );
                rights
            }
            Err(e) => {
                tracing::warn!(chat_id = %chat, error = %e, "Channel rights lookup failed");
                AdminRights::NONE
            }
        }
    }
}

/// Instructions sent when verification fails
pub fn remediation(rights: AdminRights) -> &'static str {
    if rights.is_admin {
        "⚠️ I'm an administrator of this channel but I can't post messages.\n\n\
         Open the channel settings → Administrators → this bot, enable \
         \"Post Messages\" and try again."
    } else {
        "⚠️ I'm not an administrator of this channel.\n\n\
         1. Open your channel settings\n\
         2. Add this bot as an administrator\n\
         3. Grant the \"Post Messages\" permission\n\
         4. Forward a message from the channel again"
    }
}
