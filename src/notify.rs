//! Notification collaborator seam.
//!
//! Notifications are fire-and-forget: a failed delivery is logged and never
//! reaches the financial mutation that triggered it.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::model::{BookingId, InstallmentKey, PaymentId};

#[derive(Debug, Error)]
#[error("notification '{kind}' not delivered: {reason}")]
pub struct NotifyError {
    pub kind: &'static str,
    pub reason: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_receipt(&self, payment: PaymentId) -> Result<(), NotifyError>;

    async fn send_booking_confirmed(&self, booking: BookingId) -> Result<(), NotifyError>;

    /// `retry_on` is the next automatic attempt, `None` once escalated.
    async fn send_payment_failed(
        &self,
        installment: InstallmentKey,
        retry_on: Option<NaiveDate>,
    ) -> Result<(), NotifyError>;

    async fn send_payment_reminder(
        &self,
        installment: InstallmentKey,
        due: NaiveDate,
    ) -> Result<(), NotifyError>;

    /// Ask a human to take over an installment out of automatic retries.
    async fn alert_escalation(&self, installment: InstallmentKey) -> Result<(), NotifyError>;
}

/// Longest a single notification may hold up the caller.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Await a notification, bounded by [`DELIVERY_TIMEOUT`], and swallow its failure.
pub async fn deliver(what: &'static str, send: impl Future<Output = Result<(), NotifyError>>) {
    match tokio::time::timeout(DELIVERY_TIMEOUT, send).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(notification = what, "{e}"),
        Err(_) => warn!(
            notification = what,
            "notification not delivered within {DELIVERY_TIMEOUT:?}, dropped"
        ),
    }
}

/// Notifier that only writes log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_receipt(&self, payment: PaymentId) -> Result<(), NotifyError> {
        info!(payment, "receipt sent");
        Ok(())
    }

    async fn send_booking_confirmed(&self, booking: BookingId) -> Result<(), NotifyError> {
        info!(booking, "booking confirmation sent");
        Ok(())
    }

    async fn send_payment_failed(
        &self,
        installment: InstallmentKey,
        retry_on: Option<NaiveDate>,
    ) -> Result<(), NotifyError> {
        match retry_on {
            Some(date) => info!(
                %installment,
                retry_on = %date.format("%d %B %Y"),
                "payment failure notice sent"
            ),
            None => info!(%installment, "payment failure notice sent, no automatic retry left"),
        }
        Ok(())
    }

    async fn send_payment_reminder(
        &self,
        installment: InstallmentKey,
        due: NaiveDate,
    ) -> Result<(), NotifyError> {
        info!(%installment, %due, "payment reminder sent");
        Ok(())
    }

    async fn alert_escalation(&self, installment: InstallmentKey) -> Result<(), NotifyError> {
        warn!(%installment, "installment needs manual follow-up");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deliver_swallows_failures() {
        deliver("receipt", async {
            Err(NotifyError {
                kind: "receipt",
                reason: "smtp down".into(),
            })
        })
        .await;
        deliver("receipt", LogNotifier.send_receipt(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn deliver_gives_up_on_a_hung_notifier() {
        let started = tokio::time::Instant::now();
        deliver("receipt", std::future::pending()).await;
        assert!(started.elapsed() >= DELIVERY_TIMEOUT);
    }
}
