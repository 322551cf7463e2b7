//! Channel registry
//!
//! Listing, repricing and toggling channels. Callers run the admin gate
//! before `register`; this module enforces ownership and uniqueness.

use crate::domain::{Channel, ChannelDraft, ChannelId, PriceList, PrincipalId};
use crate::error::{BrokerError, BrokerResult};
use crate::runtime::Ledger;
use std::sync::Arc;

pub struct ChannelRegistry<L: Ledger> {
    ledger: Arc<L>,
}

impl<L: Ledger> ChannelRegistry<L> {
    pub fn new(ledger: Arc<L>) -> Self {
        Self { ledger }
    }

    /// List a verified channel under `owner`
    pub async fn register(
        &self,
        owner: PrincipalId,
        draft: &ChannelDraft,
        prices: &PriceList,
    ) -> BrokerResult<Channel> {
        if let Some(existing) = self.ledger.find_channel_by_chat(draft.chat_id).await? {
            return Err(if existing.owner_id == owner {
                BrokerError::conflict(format!(
                    "{} is already listed. Use My channels to edit its prices.",
                    existing.title
                ))
            } else {
                BrokerError::conflict(format!(
                    "{} is already listed by another owner.",
                    existing.title
                ))
            });
        }

        let channel = self.ledger.create_channel(owner, draft, prices).await?;
        tracing::info!(
            channel_id = %channel.id,
            chat_id = %channel.chat_id,
            owner = %owner,
            ad_types = channel.prices.len(),
            "Channel registered"
        );
        Ok(channel)
    }

    /// Load a channel the caller must own
    pub async fn owned(&self, owner: PrincipalId, id: ChannelId) -> BrokerResult<Channel> {
        let channel = self.ledger.get_channel(id).await?;
        if channel.owner_id != owner {
            return Err(BrokerError::authorization("You don't own this channel."));
        }
        Ok(channel)
    }

    /// Replace the price list. Existing orders keep their snapshot price.
    pub async fn reprice(
        &self,
        owner: PrincipalId,
        id: ChannelId,
        prices: &PriceList,
    ) -> BrokerResult<Channel> {
        self.owned(owner, id).await?;
        let channel = self.ledger.update_channel_prices(id, prices).await?;
        tracing::info!(channel_id = %id, ad_types = prices.len(), "Channel repriced");
        Ok(channel)
    }

    pub async fn toggle(&self, owner: PrincipalId, id: ChannelId) -> BrokerResult<Channel> {
        let channel = self.owned(owner, id).await?;
        let status = channel.status.toggled();
        let channel = self.ledger.set_channel_status(id, status).await?;
        tracing::info!(channel_id = %id, status = status.as_str(), "Channel status changed");
        Ok(channel)
    }

    pub async fn owned_by(&self, owner: PrincipalId) -> BrokerResult<Vec<Channel>> {
        Ok(self.ledger.list_channels_by_owner(owner).await?)
    }

    pub async fn browse(&self, limit: usize) -> BrokerResult<Vec<Channel>> {
        Ok(self.ledger.list_active_channels(limit).await?)
    }

    /// A channel open for purchases
    pub async fn purchasable(&self, id: ChannelId) -> BrokerResult<Channel> {
        let channel = self.ledger.get_channel(id).await?;
        if !channel.is_active() {
            return Err(BrokerError::validation(format!(
                "{} is not accepting orders right now.",
                channel.title
            )));
        }
        Ok(channel)
    }
}
