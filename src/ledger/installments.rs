//! Schedule-state and booking-state mutations that leave the balance alone.

use chrono::NaiveDate;
use tracing::info;

use super::{Ledger, LedgerError};
use crate::model::{
    AttemptOutcome, Booking, BookingId, BookingStatus, InstallmentKey, PaymentId, RetryPolicy,
    SavedInstrument,
};

impl Ledger {
    /// Transition an installment to paid and link the payment that settled
    /// it. Returns false when it was already paid or cancelled.
    pub async fn settle_installment(
        &self,
        key: InstallmentKey,
        payment_id: PaymentId,
        on: NaiveDate,
    ) -> Result<bool, LedgerError> {
        let mut tx = self.begin(key.booking_id).await?;
        let installment = tx
            .installment_mut(key.number)
            .ok_or(LedgerError::InstallmentNotFound(key.booking_id, key.number))?;
        if !installment.mark_paid(payment_id, on) {
            return Ok(false);
        }
        tx.commit().await;

        info!(installment = %key, payment = payment_id, "installment paid");
        Ok(true)
    }

    /// Count a failed charge against an installment and schedule its retry.
    pub async fn register_installment_failure(
        &self,
        key: InstallmentKey,
        on: NaiveDate,
        policy: &RetryPolicy,
    ) -> Result<AttemptOutcome, LedgerError> {
        let mut tx = self.begin(key.booking_id).await?;
        let installment = tx
            .installment_mut(key.number)
            .ok_or(LedgerError::InstallmentNotFound(key.booking_id, key.number))?;
        let outcome = installment.register_failure(on, policy);
        let next_retry = installment.next_retry_date;
        tx.commit().await;

        info!(
            installment = %key,
            attempts = outcome.attempt_count,
            counted = outcome.counted,
            next_retry = ?next_retry,
            "installment charge failed"
        );
        Ok(outcome)
    }

    /// Persist the provider references of a saved card and confirm the
    /// booking.
    pub async fn save_instrument(
        &self,
        booking_id: BookingId,
        instrument: SavedInstrument,
    ) -> Result<Booking, LedgerError> {
        let mut tx = self.begin(booking_id).await?;
        let booking = tx.booking_mut();
        booking.instrument = Some(instrument);
        if booking.booking_status == BookingStatus::Pending {
            booking.booking_status = BookingStatus::Confirmed;
        }
        let booking = booking.clone();
        tx.commit().await;

        info!(booking = booking_id, "payment method saved");
        Ok(booking)
    }

    /// pending → confirmed. Returns false when nothing changed; a cancelled
    /// booking stays cancelled.
    pub async fn confirm_booking(&self, booking_id: BookingId) -> Result<bool, LedgerError> {
        let mut tx = self.begin(booking_id).await?;
        if tx.booking().booking_status != BookingStatus::Pending {
            return Ok(false);
        }
        tx.booking_mut().booking_status = BookingStatus::Confirmed;
        tx.commit().await;

        info!(booking = booking_id, "booking confirmed");
        Ok(true)
    }
}
