//! Core domain types for the booking ledger.

use chrono::{DateTime, Days, NaiveDate, Utc};
use std::fmt;

use crate::Amount;
use crate::schedule::PaymentPlan;

/// Booking identifier.
pub type BookingId = u64;

/// Payment identifier.
pub type PaymentId = u64;

/// 1-based position of an installment within its booking.
pub type InstallmentNumber = u32;

/// Financial status of a booking, derived from its balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaymentStatus {
    #[default]
    Unpaid,
    Partial,
    Paid,
    /// Set when an installment exhausts its automatic retries; cleared by the
    /// next balance mutation.
    Failed,
}

impl PaymentStatus {
    /// paid ⇔ paid ≥ total; unpaid ⇔ paid ≤ 0; partial otherwise.
    pub fn derive(paid: Amount, total: Amount) -> Self {
        if paid <= Amount::ZERO {
            PaymentStatus::Unpaid
        } else if paid >= total {
            PaymentStatus::Paid
        } else {
            PaymentStatus::Partial
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Partial => "partial",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BookingStatus {
    #[default]
    Pending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

/// Channel the money arrived through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentMethod {
    Card,
    BankTransfer,
    Cash,
}

impl std::str::FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "card" | "stripe" => Ok(PaymentMethod::Card),
            "bank_transfer" => Ok(PaymentMethod::BankTransfer),
            "cash" => Ok(PaymentMethod::Cash),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentType {
    Manual,
    Installment,
    FullPayment,
}

/// Lifecycle of a single payment row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentState {
    Succeeded,
    Pending,
    Failed,
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallmentStatus {
    Pending,
    Paid,
    Failed,
    Cancelled,
}

/// Provider references for a card saved against a booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedInstrument {
    pub customer_id: String,
    pub payment_method_id: String,
}

/// One registrant's reservation and its financial state.
#[derive(Debug, Clone)]
pub struct Booking {
    pub id: BookingId,
    pub reference: String,
    pub total_amount: Amount,
    pub amount_paid: Amount,
    pub amount_outstanding: Amount,
    pub payment_status: PaymentStatus,
    pub booking_status: BookingStatus,
    pub payment_method: PaymentMethod,
    pub payment_plan: PaymentPlan,
    pub instrument: Option<SavedInstrument>,
    pub created_on: NaiveDate,
}

impl Booking {
    /// Add `amount` to the paid balance and re-derive the dependent fields.
    pub(crate) fn credit(&mut self, amount: Amount) {
        self.amount_paid += amount;
        self.refresh_balance();
    }

    /// Remove `amount` from the paid balance (floored at zero) and re-derive.
    pub(crate) fn debit(&mut self, amount: Amount) {
        self.amount_paid = self.amount_paid.saturating_sub(amount);
        self.refresh_balance();
    }

    /// outstanding = max(0, total - paid); status derived from both.
    pub(crate) fn refresh_balance(&mut self) {
        self.amount_outstanding = self.total_amount.saturating_sub(self.amount_paid);
        self.payment_status = PaymentStatus::derive(self.amount_paid, self.total_amount);
    }

    pub fn is_settled(&self) -> bool {
        self.amount_outstanding <= Amount::ZERO
    }
}

/// Composite key of an installment row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstallmentKey {
    pub booking_id: BookingId,
    pub number: InstallmentNumber,
}

impl fmt::Display for InstallmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "booking #{} installment #{}", self.booking_id, self.number)
    }
}

/// Automatic retry limits for failed installment charges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum automatic attempts before escalation to a human.
    pub ceiling: u32,
    /// Days between a failed attempt and the next automatic retry.
    pub retry_after_days: u64,
}

impl RetryPolicy {
    /// Highest ceiling an installment's attempt counter may be held to.
    pub const MAX_CEILING: u32 = 3;
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            ceiling: 3,
            retry_after_days: 2,
        }
    }
}

/// What a failed charge did to an installment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptOutcome {
    pub attempt_count: u32,
    /// False when the failure was not counted (installment settled, or
    /// already at the ceiling).
    pub counted: bool,
    pub escalated: bool,
}

/// One scheduled partial payment within a payment plan.
#[derive(Debug, Clone)]
pub struct Installment {
    pub booking_id: BookingId,
    pub number: InstallmentNumber,
    pub amount: Amount,
    pub due_date: NaiveDate,
    pub status: InstallmentStatus,
    pub attempt_count: u32,
    pub last_attempt_date: Option<NaiveDate>,
    pub next_retry_date: Option<NaiveDate>,
    pub payment_id: Option<PaymentId>,
    pub paid_on: Option<NaiveDate>,
}

impl Installment {
    pub fn new(
        booking_id: BookingId,
        number: InstallmentNumber,
        amount: Amount,
        due_date: NaiveDate,
    ) -> Self {
        Self {
            booking_id,
            number,
            amount,
            due_date,
            status: InstallmentStatus::Pending,
            attempt_count: 0,
            last_attempt_date: None,
            next_retry_date: None,
            payment_id: None,
            paid_on: None,
        }
    }

    pub fn key(&self) -> InstallmentKey {
        InstallmentKey {
            booking_id: self.booking_id,
            number: self.number,
        }
    }

    /// Failed with no automatic attempts left.
    pub fn is_escalated(&self, policy: &RetryPolicy) -> bool {
        self.status == InstallmentStatus::Failed && self.attempt_count >= policy.ceiling
    }

    /// pending/failed → paid, linking the payment. Returns false when the
    /// installment was already settled or cancelled.
    pub(crate) fn mark_paid(&mut self, payment_id: PaymentId, on: NaiveDate) -> bool {
        match self.status {
            InstallmentStatus::Pending | InstallmentStatus::Failed => {
                self.status = InstallmentStatus::Paid;
                self.payment_id = Some(payment_id);
                self.paid_on = Some(on);
                self.last_attempt_date = Some(on);
                self.next_retry_date = None;
                true
            }
            InstallmentStatus::Paid | InstallmentStatus::Cancelled => false,
        }
    }

    /// pending/failed → failed, counting the attempt up to the ceiling and
    /// scheduling the next retry.
    pub(crate) fn register_failure(
        &mut self,
        on: NaiveDate,
        policy: &RetryPolicy,
    ) -> AttemptOutcome {
        let counted = match self.status {
            InstallmentStatus::Paid | InstallmentStatus::Cancelled => false,
            InstallmentStatus::Pending | InstallmentStatus::Failed => {
                self.status = InstallmentStatus::Failed;
                self.last_attempt_date = Some(on);
                if self.attempt_count < policy.ceiling {
                    self.attempt_count += 1;
                    self.next_retry_date = on.checked_add_days(Days::new(policy.retry_after_days));
                    true
                } else {
                    false
                }
            }
        };

        AttemptOutcome {
            attempt_count: self.attempt_count,
            counted,
            escalated: self.is_escalated(policy),
        }
    }
}

/// Immutable record of one money movement against a booking.
#[derive(Debug, Clone)]
pub struct Payment {
    pub id: PaymentId,
    pub booking_id: BookingId,
    pub amount: Amount,
    pub method: PaymentMethod,
    pub kind: PaymentType,
    pub status: PaymentState,
    pub installment: Option<InstallmentNumber>,
    pub provider_charge_id: Option<String>,
    /// Amount returned to the payer, set when the payment is refunded.
    pub refunded_amount: Amount,
    pub note: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Dedup marker for a processed provider event.
#[derive(Debug, Clone)]
pub struct WebhookEventRecord {
    pub event_id: String,
    pub event_type: String,
    pub processed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn installment() -> Installment {
        Installment::new(1, 2, Amount::from_minor(8500), date(2026, 1, 31))
    }

    #[test]
    fn status_derivation() {
        let total = Amount::from_minor(10_000);
        assert_eq!(PaymentStatus::derive(Amount::ZERO, total), PaymentStatus::Unpaid);
        assert_eq!(PaymentStatus::derive(Amount::from_minor(1), total), PaymentStatus::Partial);
        assert_eq!(PaymentStatus::derive(total, total), PaymentStatus::Paid);
        assert_eq!(PaymentStatus::derive(Amount::from_minor(10_001), total), PaymentStatus::Paid);
    }

    #[test]
    fn failure_schedules_retry_two_days_later() {
        let mut inst = installment();
        let outcome = inst.register_failure(date(2026, 2, 1), &RetryPolicy::default());

        assert_eq!(inst.status, InstallmentStatus::Failed);
        assert_eq!(outcome.attempt_count, 1);
        assert!(outcome.counted);
        assert!(!outcome.escalated);
        assert_eq!(inst.last_attempt_date, Some(date(2026, 2, 1)));
        assert_eq!(inst.next_retry_date, Some(date(2026, 2, 3)));
    }

    #[test]
    fn attempts_never_exceed_the_ceiling() {
        let policy = RetryPolicy::default();
        let mut inst = installment();
        for day in 1..=5 {
            inst.register_failure(date(2026, 2, day), &policy);
        }

        assert_eq!(inst.attempt_count, 3);
        assert!(inst.is_escalated(&policy));
    }

    #[test]
    fn failure_after_payment_is_ignored() {
        let mut inst = installment();
        assert!(inst.mark_paid(7, date(2026, 2, 1)));

        let outcome = inst.register_failure(date(2026, 2, 2), &RetryPolicy::default());
        assert!(!outcome.counted);
        assert_eq!(inst.status, InstallmentStatus::Paid);
        assert_eq!(inst.attempt_count, 0);
    }

    #[test]
    fn failed_installment_can_be_paid() {
        let mut inst = installment();
        inst.register_failure(date(2026, 2, 1), &RetryPolicy::default());
        assert!(inst.mark_paid(9, date(2026, 2, 3)));

        assert_eq!(inst.status, InstallmentStatus::Paid);
        assert_eq!(inst.payment_id, Some(9));
        assert_eq!(inst.next_retry_date, None);
        assert!(!inst.mark_paid(10, date(2026, 2, 4)));
    }

    #[test]
    fn payment_method_parsing() {
        assert_eq!("card".parse(), Ok(PaymentMethod::Card));
        assert_eq!("stripe".parse(), Ok(PaymentMethod::Card));
        assert_eq!("bank_transfer".parse(), Ok(PaymentMethod::BankTransfer));
        assert_eq!("cash".parse(), Ok(PaymentMethod::Cash));
        assert!("cheque".parse::<PaymentMethod>().is_err());
    }
}
