//! Payment gateway seam

use crate::domain::{Order, PaymentMethod};
use crate::error::BrokerResult;
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Charge the order's price and return the gateway's reference
    async fn charge(&self, order: &Order, method: PaymentMethod) -> BrokerResult<String>;
}

/// Accepts every charge. Stands in until a real processor is wired up.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatedGateway;

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn charge(&self, order: &Order, method: PaymentMethod) -> BrokerResult<String> {
        let reference = format!("sim-{}", Uuid::new_v4());
        tracing::info!(
            order_id = %order.id,
            amount = %order.price,
            method = method.as_str(),
            reference = %reference,
            "Simulated payment accepted"
        );
        Ok(reference)
    }
}
