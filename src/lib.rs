pub mod amount;
pub mod config;
pub mod csv;
pub mod events;
pub mod failure;
pub mod gateway;
pub mod ledger;
pub mod model;
pub mod notify;
pub mod schedule;
pub mod scheduler;
pub mod store;

#[cfg(test)]
mod testing;

pub use amount::Amount;
pub use config::Config;
pub use events::{EventProcessor, Outcome, ProviderEvent};
pub use ledger::{Ledger, LedgerError};
pub use model::{
    Booking, BookingId, BookingStatus, Installment, InstallmentStatus, PaymentMethod,
    PaymentStatus,
};
pub use schedule::{PaymentPlan, compute_schedule};
pub use scheduler::RetryScheduler;
pub use store::Store;
