//! Booking ledger.
//!
//! The ledger is the only writer of a booking's financial fields
//! (`amount_paid`, `amount_outstanding`, `payment_status`). Every mutation
//! runs inside one booking transaction, so the payment row, the balance
//! update and the status derivation become visible together, and
//! concurrent mutations on the same booking serialize on the row lock.

use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::Amount;
use crate::model::{
    Booking, BookingId, BookingStatus, Installment, InstallmentNumber, InstallmentStatus,
    Payment, PaymentId, PaymentMethod, PaymentState, PaymentStatus, PaymentType,
};
use crate::schedule::{PaymentPlan, compute_schedule};
use crate::store::{BookingRecord, BookingTx, Store};

mod error;
mod installments;

pub use error::LedgerError;

const REFERENCE_ATTEMPTS: usize = 10;

/// Input for opening a booking.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub total: Amount,
    pub method: PaymentMethod,
    pub plan: PaymentPlan,
    pub created_on: NaiveDate,
}

/// Descriptive fields attached to a payment row.
#[derive(Debug, Clone)]
pub struct PaymentMeta {
    pub kind: PaymentType,
    pub installment: Option<InstallmentNumber>,
    pub provider_charge_id: Option<String>,
    pub note: Option<String>,
}

impl PaymentMeta {
    pub fn manual() -> Self {
        Self {
            kind: PaymentType::Manual,
            installment: None,
            provider_charge_id: None,
            note: None,
        }
    }

    pub fn full_payment() -> Self {
        Self {
            kind: PaymentType::FullPayment,
            ..Self::manual()
        }
    }

    pub fn installment(number: InstallmentNumber) -> Self {
        Self {
            kind: PaymentType::Installment,
            installment: Some(number),
            ..Self::manual()
        }
    }

    pub fn with_charge(mut self, charge_id: impl Into<String>) -> Self {
        self.provider_charge_id = Some(charge_id.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Result of crediting a payment.
#[derive(Debug, Clone)]
pub struct PostedPayment {
    pub payment_id: PaymentId,
    /// Booking state right after the credit.
    pub booking: Booking,
    /// No succeeded payment existed for the booking before this one.
    pub first_success: bool,
}

/// A mismatch that only out-of-band reconciliation can resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discrepancy {
    /// `amount_paid` differs from the net of the booking's payments.
    BalanceDrift {
        recorded: Amount,
        from_payments: Amount,
    },
    /// A succeeded payment references an installment still awaiting payment.
    InstallmentNotMarkedPaid {
        number: InstallmentNumber,
        payment_id: PaymentId,
    },
}

pub struct Ledger {
    store: Arc<Store>,
    reference_prefix: String,
}

/// Public API
impl Ledger {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            reference_prefix: "CAMP".to_string(),
        }
    }

    pub fn with_reference_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.reference_prefix = prefix.into();
        self
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub async fn booking(&self, id: BookingId) -> Result<Booking, LedgerError> {
        self.store
            .booking(id)
            .await
            .ok_or(LedgerError::BookingNotFound(id))
    }

    /// Create a booking with nothing paid, materializing its installments
    /// when an installment plan is chosen.
    pub async fn open_booking(
        &self,
        new: NewBooking,
        deadline: NaiveDate,
    ) -> Result<Booking, LedgerError> {
        // validates the total before anything is stored
        let schedule = compute_schedule(new.total, new.plan, new.created_on, deadline)?;

        let reference = self.unique_reference(new.created_on).await?;
        let id = self.store.allocate_booking_id();
        let mut booking = Booking {
            id,
            reference,
            total_amount: new.total,
            amount_paid: Amount::ZERO,
            amount_outstanding: new.total,
            payment_status: PaymentStatus::Unpaid,
            booking_status: BookingStatus::Pending,
            payment_method: new.method,
            payment_plan: new.plan,
            instrument: None,
            created_on: new.created_on,
        };
        booking.refresh_balance();

        let mut record = BookingRecord::new(booking.clone());
        if new.plan.is_installment_plan() {
            record.installments = schedule
                .into_iter()
                .map(|item| Installment::new(id, item.sequence, item.amount, item.due_date))
                .collect();
        }
        let installments = record.installments.len();

        if !self.store.insert_booking(record).await {
            return Err(LedgerError::ReferenceExhausted);
        }

        info!(
            booking = id,
            reference = %booking.reference,
            total = %booking.total_amount,
            plan = new.plan.as_str(),
            installments,
            "booking opened"
        );
        Ok(booking)
    }

    /// Append a succeeded payment and credit it to the booking balance.
    pub async fn record_payment(
        &self,
        booking_id: BookingId,
        amount: Amount,
        method: PaymentMethod,
        meta: PaymentMeta,
    ) -> Result<PostedPayment, LedgerError> {
        if !amount.is_positive() {
            return Err(LedgerError::NonPositiveAmount(amount));
        }

        let mut tx = self.begin(booking_id).await?;
        let first_success = !tx
            .record()
            .payments
            .iter()
            .any(|p| matches!(p.status, PaymentState::Succeeded | PaymentState::Refunded));

        let payment_id = tx.push_payment(|id| {
            Self::payment_row(id, booking_id, amount, method, PaymentState::Succeeded, meta)
        });
        tx.booking_mut().credit(amount);
        let booking = tx.booking().clone();
        tx.commit().await;

        info!(
            booking = booking_id,
            payment = payment_id,
            amount = %amount,
            paid = %booking.amount_paid,
            outstanding = %booking.amount_outstanding,
            "payment recorded"
        );
        Ok(PostedPayment {
            payment_id,
            booking,
            first_success,
        })
    }

    /// Append a failed payment row. The balance is left untouched.
    pub async fn record_failed_payment(
        &self,
        booking_id: BookingId,
        amount: Amount,
        method: PaymentMethod,
        meta: PaymentMeta,
    ) -> Result<PaymentId, LedgerError> {
        let mut tx = self.begin(booking_id).await?;
        let payment_id = tx.push_payment(|id| {
            Self::payment_row(id, booking_id, amount, method, PaymentState::Failed, meta)
        });
        tx.commit().await;

        info!(
            booking = booking_id,
            payment = payment_id,
            amount = %amount,
            "failed payment recorded"
        );
        Ok(payment_id)
    }

    /// Re-derive outstanding and payment status from the current balance.
    pub async fn recalculate_status(
        &self,
        booking_id: BookingId,
    ) -> Result<PaymentStatus, LedgerError> {
        let mut tx = self.begin(booking_id).await?;
        tx.booking_mut().refresh_balance();
        let status = tx.booking().payment_status;
        tx.commit().await;
        Ok(status)
    }

    /// Mark a succeeded payment as refunded and debit the refund from the
    /// paid balance. The booking total is never touched.
    ///
    /// `refunded` is the running total refunded on the payment so far. A
    /// payment already refunded is debited again only by the growth of that
    /// total; an unchanged or smaller total is [`LedgerError::AlreadyRefunded`].
    pub async fn apply_refund(
        &self,
        payment_id: PaymentId,
        refunded: Amount,
    ) -> Result<Booking, LedgerError> {
        if !refunded.is_positive() {
            return Err(LedgerError::NonPositiveAmount(refunded));
        }
        let booking_id = self
            .store
            .payment_owner(payment_id)
            .await
            .ok_or(LedgerError::PaymentNotFound(payment_id))?;

        let mut tx = self.begin(booking_id).await?;
        let payment = tx
            .payment_mut(payment_id)
            .ok_or(LedgerError::PaymentNotFound(payment_id))?;
        let debit = match payment.status {
            PaymentState::Succeeded => refunded,
            PaymentState::Refunded if refunded > payment.refunded_amount => {
                refunded - payment.refunded_amount
            }
            PaymentState::Refunded => return Err(LedgerError::AlreadyRefunded(payment_id)),
            other => return Err(LedgerError::NotRefundable(payment_id, other)),
        };
        if refunded > payment.amount {
            warn!(
                payment = payment_id,
                amount = %payment.amount,
                refunded = %refunded,
                "refund exceeds the original payment"
            );
        }
        payment.status = PaymentState::Refunded;
        payment.refunded_amount = refunded;

        tx.booking_mut().debit(debit);
        let booking = tx.booking().clone();
        tx.commit().await;

        info!(
            booking = booking_id,
            payment = payment_id,
            refunded = %debit,
            total_refunded = %refunded,
            paid = %booking.amount_paid,
            "refund applied"
        );
        Ok(booking)
    }

    /// Record the whole outstanding balance as a manual payment (cash or bank
    /// transfer taken by an administrator) and confirm the booking.
    ///
    /// Returns `None` when nothing is outstanding.
    pub async fn mark_paid(
        &self,
        booking_id: BookingId,
        method: PaymentMethod,
        note: Option<String>,
    ) -> Result<Option<PostedPayment>, LedgerError> {
        let mut tx = self.begin(booking_id).await?;
        let outstanding = tx.booking().amount_outstanding;
        if !outstanding.is_positive() {
            return Ok(None);
        }
        let first_success = !tx
            .record()
            .payments
            .iter()
            .any(|p| matches!(p.status, PaymentState::Succeeded | PaymentState::Refunded));

        let mut meta = PaymentMeta::manual();
        meta.note = note;
        let payment_id = tx.push_payment(|id| {
            Self::payment_row(id, booking_id, outstanding, method, PaymentState::Succeeded, meta)
        });
        let booking = tx.booking_mut();
        booking.credit(outstanding);
        if booking.booking_status != BookingStatus::Cancelled {
            booking.booking_status = BookingStatus::Confirmed;
        }
        let booking = booking.clone();
        tx.commit().await;

        info!(
            booking = booking_id,
            payment = payment_id,
            amount = %outstanding,
            "booking marked as paid"
        );
        Ok(Some(PostedPayment {
            payment_id,
            booking,
            first_success,
        }))
    }

    /// Lower the booking total (attendee removed). Paid money is kept.
    pub async fn reduce_total(
        &self,
        booking_id: BookingId,
        by: Amount,
    ) -> Result<Booking, LedgerError> {
        if !by.is_positive() {
            return Err(LedgerError::NonPositiveAmount(by));
        }
        let mut tx = self.begin(booking_id).await?;
        let booking = tx.booking_mut();
        booking.total_amount = booking.total_amount.saturating_sub(by);
        booking.refresh_balance();
        let booking = booking.clone();
        tx.commit().await;

        info!(
            booking = booking_id,
            total = %booking.total_amount,
            outstanding = %booking.amount_outstanding,
            "booking total reduced"
        );
        Ok(booking)
    }

    /// Flag the booking as failed after an installment exhausted its retries.
    /// The next balance mutation re-derives the status.
    pub async fn flag_failed(&self, booking_id: BookingId) -> Result<(), LedgerError> {
        let mut tx = self.begin(booking_id).await?;
        if tx.booking().payment_status == PaymentStatus::Paid {
            return Ok(());
        }
        tx.booking_mut().payment_status = PaymentStatus::Failed;
        tx.commit().await;
        Ok(())
    }

    /// Report reconciliation cases for a booking. Nothing is repaired.
    pub async fn audit(&self, booking_id: BookingId) -> Result<Vec<Discrepancy>, LedgerError> {
        let record = self
            .store
            .snapshot(booking_id)
            .await
            .ok_or(LedgerError::BookingNotFound(booking_id))?;

        let mut found = Vec::new();

        let from_payments: Amount = record
            .payments
            .iter()
            .filter(|p| matches!(p.status, PaymentState::Succeeded | PaymentState::Refunded))
            .map(|p| p.amount - p.refunded_amount)
            .sum();
        if from_payments.max(Amount::ZERO) != record.booking.amount_paid {
            found.push(Discrepancy::BalanceDrift {
                recorded: record.booking.amount_paid,
                from_payments,
            });
        }

        for payment in record
            .payments
            .iter()
            .filter(|p| p.status == PaymentState::Succeeded)
        {
            let Some(number) = payment.installment else {
                continue;
            };
            let awaiting = record.installment(number).is_some_and(|i| {
                matches!(i.status, InstallmentStatus::Pending | InstallmentStatus::Failed)
            });
            if awaiting {
                found.push(Discrepancy::InstallmentNotMarkedPaid {
                    number,
                    payment_id: payment.id,
                });
            }
        }

        if !found.is_empty() {
            warn!(booking = booking_id, discrepancies = ?found, "ledger audit found discrepancies");
        }
        Ok(found)
    }
}

/// Private API
impl Ledger {
    async fn begin(&self, booking_id: BookingId) -> Result<BookingTx<'_>, LedgerError> {
        self.store
            .begin(booking_id)
            .await
            .ok_or(LedgerError::BookingNotFound(booking_id))
    }

    fn payment_row(
        id: PaymentId,
        booking_id: BookingId,
        amount: Amount,
        method: PaymentMethod,
        status: PaymentState,
        meta: PaymentMeta,
    ) -> Payment {
        Payment {
            id,
            booking_id,
            amount,
            method,
            kind: meta.kind,
            status,
            installment: meta.installment,
            provider_charge_id: meta.provider_charge_id,
            refunded_amount: Amount::ZERO,
            note: meta.note,
            recorded_at: Utc::now(),
        }
    }

    /// `<PREFIX>-<YYYYMMDD>-<4 hex chars>`, retried until unused.
    async fn unique_reference(&self, on: NaiveDate) -> Result<String, LedgerError> {
        for _ in 0..REFERENCE_ATTEMPTS {
            let suffix = Uuid::new_v4().simple().to_string()[..4].to_uppercase();
            let reference = format!("{}-{}-{suffix}", self.reference_prefix, on.format("%Y%m%d"));
            if self.store.reserve_reference(&reference).await {
                return Ok(reference);
            }
        }
        Err(LedgerError::ReferenceExhausted)
    }
}
