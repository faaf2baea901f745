//! Outbound payment gateway seam.
//!
//! The core only ever asks the gateway to charge a saved instrument. The
//! outcome of an accepted charge comes back later as a provider event.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

use crate::Amount;
use crate::model::{BookingId, InstallmentNumber, SavedInstrument};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway call timed out after {0:?}")]
    Timeout(Duration),

    #[error("gateway unreachable: {0}")]
    Transport(String),

    #[error("gateway rejected the request: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    pub instrument: SavedInstrument,
    pub amount: Amount,
    pub booking_id: BookingId,
    pub installment: InstallmentNumber,
}

/// Synchronous answer of the provider to a charge request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeStatus {
    Succeeded,
    Processing,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeReceipt {
    pub status: ChargeStatus,
    pub charge_id: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Charge a saved instrument off-session.
    async fn charge_saved_instrument(
        &self,
        request: ChargeRequest,
    ) -> Result<ChargeReceipt, GatewayError>;
}

/// Bound a gateway call by `limit`; an expired call is a transport failure.
pub async fn charge_with_timeout(
    gateway: &dyn PaymentGateway,
    request: ChargeRequest,
    limit: Duration,
) -> Result<ChargeReceipt, GatewayError> {
    match timeout(limit, gateway.charge_saved_instrument(request)).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout(limit)),
    }
}

/// Gateway for offline replays: every call fails as unreachable.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineGateway;

#[async_trait]
impl PaymentGateway for OfflineGateway {
    async fn charge_saved_instrument(
        &self,
        request: ChargeRequest,
    ) -> Result<ChargeReceipt, GatewayError> {
        Err(GatewayError::Transport(format!(
            "offline, cannot charge booking {} installment {}",
            request.booking_id, request.installment
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stalled;

    #[async_trait]
    impl PaymentGateway for Stalled {
        async fn charge_saved_instrument(
            &self,
            _request: ChargeRequest,
        ) -> Result<ChargeReceipt, GatewayError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ChargeReceipt {
                status: ChargeStatus::Succeeded,
                charge_id: "ch_late".into(),
            })
        }
    }

    fn request() -> ChargeRequest {
        ChargeRequest {
            instrument: SavedInstrument {
                customer_id: "cus_1".into(),
                payment_method_id: "pm_1".into(),
            },
            amount: Amount::from_minor(8500),
            booking_id: 1,
            installment: 2,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_call_times_out() {
        let result = charge_with_timeout(&Stalled, request(), Duration::from_secs(30)).await;
        assert!(matches!(result, Err(GatewayError::Timeout(d)) if d == Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn offline_gateway_reports_transport_failure() {
        let result = charge_with_timeout(&OfflineGateway, request(), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(GatewayError::Transport(_))));
    }
}
