//! Accounting of a failed charge.
//!
//! Shared by the event processor (provider reported a declined charge) and
//! the retry scheduler (the charge request never reached the provider).

use chrono::{Days, NaiveDate};
use tracing::{info, warn};

use crate::Amount;
use crate::ledger::{Ledger, LedgerError, PaymentMeta};
use crate::model::{
    AttemptOutcome, BookingId, InstallmentKey, InstallmentNumber, PaymentMethod, RetryPolicy,
};
use crate::notify::{Notifier, deliver};

#[derive(Debug, Clone)]
pub struct ChargeFailure {
    pub booking_id: BookingId,
    pub installment: Option<InstallmentNumber>,
    pub amount: Amount,
    pub charge_id: Option<String>,
    pub reason: Option<String>,
    pub attempted_on: NaiveDate,
}

/// Append the failed payment row and, for installments, count the attempt.
///
/// Returns the attempt outcome when an installment was involved.
pub(crate) async fn record_charge_failure(
    ledger: &Ledger,
    notifier: &dyn Notifier,
    policy: &RetryPolicy,
    failure: ChargeFailure,
) -> Result<Option<AttemptOutcome>, LedgerError> {
    let meta = match failure.installment {
        Some(number) => PaymentMeta::installment(number),
        None => PaymentMeta::full_payment(),
    };
    let meta = match (failure.charge_id, failure.reason) {
        (Some(charge), Some(reason)) => meta.with_charge(charge).with_note(reason),
        (Some(charge), None) => meta.with_charge(charge),
        (None, Some(reason)) => meta.with_note(reason),
        (None, None) => meta,
    };
    ledger
        .record_failed_payment(failure.booking_id, failure.amount, PaymentMethod::Card, meta)
        .await?;

    let Some(number) = failure.installment else {
        info!(booking = failure.booking_id, "full payment charge failed");
        return Ok(None);
    };
    let key = InstallmentKey {
        booking_id: failure.booking_id,
        number,
    };

    let outcome = ledger
        .register_installment_failure(key, failure.attempted_on, policy)
        .await?;
    if !outcome.counted {
        return Ok(Some(outcome));
    }

    if outcome.escalated {
        warn!(
            installment = %key,
            attempts = outcome.attempt_count,
            "retry ceiling reached, escalating"
        );
        ledger.flag_failed(failure.booking_id).await?;
        deliver("payment_failed", notifier.send_payment_failed(key, None)).await;
        deliver("escalation", notifier.alert_escalation(key)).await;
    } else {
        let retry_on = failure
            .attempted_on
            .checked_add_days(Days::new(policy.retry_after_days));
        deliver("payment_failed", notifier.send_payment_failed(key, retry_on)).await;
    }

    Ok(Some(outcome))
}
