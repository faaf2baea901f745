//! Error types for ledger mutations.

use thiserror::Error;

use crate::Amount;
use crate::model::{BookingId, InstallmentNumber, PaymentId, PaymentState};
use crate::schedule::ScheduleError;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("booking {0} not found")]
    BookingNotFound(BookingId),

    #[error("payment {0} not found")]
    PaymentNotFound(PaymentId),

    #[error("installment {1} of booking {0} not found")]
    InstallmentNotFound(BookingId, InstallmentNumber),

    #[error("amount must be greater than zero, got {0}")]
    NonPositiveAmount(Amount),

    #[error("payment {0} was already refunded")]
    AlreadyRefunded(PaymentId),

    #[error("payment {0} cannot be refunded in state {1:?}")]
    NotRefundable(PaymentId, PaymentState),

    #[error("could not generate a unique booking reference")]
    ReferenceExhausted,

    #[error("invalid schedule: {0}")]
    Schedule(#[from] ScheduleError),
}
