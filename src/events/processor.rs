use chrono::Utc;
use std::sync::Arc;
use tokio_stream::{Stream, StreamExt};
use tracing::{error, info, warn};

use super::{EventError, EventKind, Outcome, ProviderEvent, verify_signature};
use crate::Amount;
use crate::config::Config;
use crate::failure::{ChargeFailure, record_charge_failure};
use crate::gateway::{ChargeRequest, PaymentGateway, charge_with_timeout};
use crate::ledger::{Ledger, LedgerError, PaymentMeta};
use crate::model::{BookingId, InstallmentKey, InstallmentStatus, PaymentMethod, SavedInstrument};
use crate::notify::{Notifier, deliver};

/// Applies provider events to the ledger exactly once per event id.
pub struct EventProcessor {
    ledger: Arc<Ledger>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    config: Config,
}

/// Public API
impl EventProcessor {
    pub fn new(
        ledger: Arc<Ledger>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        config: Config,
    ) -> Self {
        Self {
            ledger,
            gateway,
            notifier,
            config,
        }
    }

    /// Verify, decode and process a raw delivery.
    ///
    /// Nothing is recorded for a delivery that fails verification or
    /// decoding, so the provider may safely send it again.
    pub async fn handle(&self, body: &[u8], signature: &str) -> Result<Outcome, EventError> {
        if let Err(e) = verify_signature(
            body,
            signature,
            &self.config.webhook_secret,
            self.config.webhook_tolerance_secs,
            Utc::now().timestamp(),
        ) {
            warn!("webhook signature rejected: {e}");
            return Err(e.into());
        }

        let event = ProviderEvent::from_slice(body).inspect_err(|e| warn!("{e}"))?;
        self.process(event).await
    }

    /// Process an already authenticated event.
    ///
    /// The dedup record is written before any effect. An error returned
    /// after that point means the effect was missed and a redelivery will
    /// be reported as [`Outcome::Duplicate`].
    pub async fn process(&self, event: ProviderEvent) -> Result<Outcome, EventError> {
        let store = self.ledger.store();
        if !store
            .admit_event(&event.id, &event.event_type, Utc::now())
            .await
        {
            info!(event_id = %event.id, "duplicate event, already handled");
            return Ok(Outcome::Duplicate);
        }

        let result = match event.kind() {
            EventKind::ChargeSucceeded => self.charge_succeeded(&event).await,
            EventKind::ChargeFailed => self.charge_failed(&event).await,
            EventKind::MethodSaved => self.method_saved(&event).await,
            EventKind::MethodSaveFailed => {
                warn!(
                    event_id = %event.id,
                    booking = ?event.booking_id(),
                    "payment method could not be saved"
                );
                Ok(Outcome::Ignored)
            }
            EventKind::ChargeRefunded => self.charge_refunded(&event).await,
            EventKind::Other => {
                info!(event_id = %event.id, event_type = %event.event_type, "unhandled event type");
                Ok(Outcome::Ignored)
            }
        };

        result.map_err(|source| {
            error!(
                event_id = %event.id,
                booking = ?event.booking_id(),
                "event processing failed, needs reconciliation: {source}"
            );
            EventError::Processing {
                event_id: event.id.clone(),
                booking_id: event.booking_id(),
                source,
            }
        })
    }

    /// Process events until the stream ends. Failures are logged and skipped.
    pub async fn run(&self, mut stream: impl Stream<Item = ProviderEvent> + Unpin) {
        while let Some(event) = stream.next().await {
            let _ = self.process(event).await;
        }
    }
}

/// Private API
impl EventProcessor {
    fn booking_id(event: &ProviderEvent) -> Option<BookingId> {
        let booking_id = event.booking_id();
        if booking_id.is_none() {
            warn!(event_id = %event.id, "no booking id in event metadata");
        }
        booking_id
    }

    async fn charge_succeeded(&self, event: &ProviderEvent) -> Result<Outcome, LedgerError> {
        let Some(booking_id) = Self::booking_id(event) else {
            return Ok(Outcome::Ignored);
        };
        let amount = event.amount();
        let installment = event.installment();

        let record = self
            .ledger
            .store()
            .snapshot(booking_id)
            .await
            .ok_or(LedgerError::BookingNotFound(booking_id))?;
        let expected = match installment {
            Some(number) => record.installment(number).map(|i| i.amount),
            None => Some(record.booking.total_amount),
        };
        if let Some(expected) = expected
            && expected.abs_diff(amount) > self.config.amount_tolerance
        {
            warn!(
                event_id = %event.id,
                booking = booking_id,
                expected = %expected,
                received = %amount,
                "charged amount differs from expected amount"
            );
        }

        let meta = match installment {
            Some(number) => {
                PaymentMeta::installment(number).with_note(format!("Installment #{number}"))
            }
            None => PaymentMeta::full_payment().with_note("One-time payment"),
        };
        let meta = match &event.data.charge_id {
            Some(charge_id) => meta.with_charge(charge_id.clone()),
            None => meta,
        };

        let posted = self
            .ledger
            .record_payment(booking_id, amount, PaymentMethod::Card, meta)
            .await?;

        if posted.booking.is_settled() {
            self.ledger.confirm_booking(booking_id).await?;
        }
        if let Some(number) = installment {
            let key = InstallmentKey { booking_id, number };
            match self
                .ledger
                .settle_installment(key, posted.payment_id, event.occurred_on())
                .await
            {
                Ok(_) => {}
                Err(LedgerError::InstallmentNotFound(..)) => warn!(
                    event_id = %event.id,
                    installment = %key,
                    payment = posted.payment_id,
                    "payment credited for an installment the booking does not have"
                ),
                Err(e) => return Err(e),
            }
        }

        deliver("receipt", self.notifier.send_receipt(posted.payment_id)).await;
        if posted.first_success {
            deliver(
                "booking_confirmed",
                self.notifier.send_booking_confirmed(booking_id),
            )
            .await;
        }

        Ok(Outcome::PaymentRecorded {
            booking_id,
            payment_id: posted.payment_id,
        })
    }

    async fn charge_failed(&self, event: &ProviderEvent) -> Result<Outcome, LedgerError> {
        let Some(booking_id) = Self::booking_id(event) else {
            return Ok(Outcome::Ignored);
        };
        warn!(
            event_id = %event.id,
            booking = booking_id,
            amount = %event.amount(),
            reason = event.data.failure_message.as_deref().unwrap_or("unknown"),
            "charge failed"
        );

        let failure = ChargeFailure {
            booking_id,
            installment: event.installment(),
            amount: event.amount(),
            charge_id: event.data.charge_id.clone(),
            reason: Some(format!(
                "Failed: {}",
                event.data.failure_message.as_deref().unwrap_or("Unknown error")
            )),
            attempted_on: event.occurred_on(),
        };
        let outcome = record_charge_failure(
            &self.ledger,
            self.notifier.as_ref(),
            &self.config.retry,
            failure,
        )
        .await?;

        Ok(Outcome::ChargeFailed {
            booking_id,
            attempts: outcome.map(|o| o.attempt_count),
        })
    }

    async fn method_saved(&self, event: &ProviderEvent) -> Result<Outcome, LedgerError> {
        let Some(booking_id) = Self::booking_id(event) else {
            return Ok(Outcome::Ignored);
        };
        let (Some(customer_id), Some(payment_method_id)) =
            (event.data.customer.clone(), event.data.payment_method.clone())
        else {
            warn!(
                event_id = %event.id,
                booking = booking_id,
                "saved method without provider references"
            );
            return Ok(Outcome::Ignored);
        };
        let instrument = SavedInstrument {
            customer_id,
            payment_method_id,
        };
        self.ledger
            .save_instrument(booking_id, instrument.clone())
            .await?;

        // Only ask for the first charge here; its outcome arrives as its own event.
        let record = self
            .ledger
            .store()
            .snapshot(booking_id)
            .await
            .ok_or(LedgerError::BookingNotFound(booking_id))?;
        let first_pending = record
            .installments
            .iter()
            .filter(|i| i.status == InstallmentStatus::Pending)
            .min_by_key(|i| (i.due_date, i.number));

        if let Some(installment) = first_pending {
            let request = ChargeRequest {
                instrument,
                amount: installment.amount,
                booking_id,
                installment: installment.number,
            };
            let result =
                charge_with_timeout(self.gateway.as_ref(), request, self.config.gateway_timeout).await;
            match result {
                Ok(receipt) => info!(
                    booking = booking_id,
                    installment = installment.number,
                    charge_id = %receipt.charge_id,
                    "first installment charge requested"
                ),
                Err(e) => warn!(
                    booking = booking_id,
                    installment = installment.number,
                    "first installment charge not sent, left to the scheduler: {e}"
                ),
            }
        }

        Ok(Outcome::MethodSaved { booking_id })
    }

    async fn charge_refunded(&self, event: &ProviderEvent) -> Result<Outcome, LedgerError> {
        let Some(charge_id) = event.data.charge_id.as_deref() else {
            warn!(event_id = %event.id, "refund without charge id");
            return Ok(Outcome::Ignored);
        };
        let Some(payment) = self.ledger.store().find_payment_by_charge(charge_id).await else {
            info!(event_id = %event.id, charge_id, "refund for unknown charge");
            return Ok(Outcome::Ignored);
        };

        let refunded = Amount::from_minor(event.data.amount_refunded.unwrap_or(0));
        match self.ledger.apply_refund(payment.payment_id, refunded).await {
            Ok(_) => Ok(Outcome::Refunded {
                booking_id: payment.booking_id,
                payment_id: payment.payment_id,
            }),
            Err(LedgerError::AlreadyRefunded(id)) => {
                warn!(event_id = %event.id, payment = id, "payment already refunded");
                Ok(Outcome::Ignored)
            }
            Err(e) => Err(e),
        }
    }
}
