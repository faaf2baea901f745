//! In-memory persisted state.
//!
//! Each booking row (with its installments and payments) sits behind its own
//! async mutex. Writers take the row lock through [`Store::begin`], mutate a
//! staged copy and publish it with [`BookingTx::commit`]; dropping the
//! transaction discards the staged copy, so readers never observe a half
//! applied mutation.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::model::{
    Booking, BookingId, Installment, InstallmentNumber, Payment, PaymentId, SavedInstrument,
    WebhookEventRecord,
};

/// A booking together with the rows that belong to it.
#[derive(Debug, Clone)]
pub struct BookingRecord {
    pub booking: Booking,
    pub installments: Vec<Installment>,
    pub payments: Vec<Payment>,
}

impl BookingRecord {
    pub fn new(booking: Booking) -> Self {
        Self {
            booking,
            installments: Vec::new(),
            payments: Vec::new(),
        }
    }

    pub fn installment(&self, number: InstallmentNumber) -> Option<&Installment> {
        self.installments.iter().find(|i| i.number == number)
    }

    pub fn payment(&self, id: PaymentId) -> Option<&Payment> {
        self.payments.iter().find(|p| p.id == id)
    }
}

/// Location of a payment row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentRef {
    pub booking_id: BookingId,
    pub payment_id: PaymentId,
}

#[derive(Default)]
struct Indexes {
    /// provider charge id -> payment
    charges: HashMap<String, PaymentRef>,
    /// payment id -> owning booking
    payments: HashMap<PaymentId, BookingId>,
}

pub struct Store {
    bookings: RwLock<HashMap<BookingId, Arc<Mutex<BookingRecord>>>>,
    indexes: RwLock<Indexes>,
    references: Mutex<HashSet<String>>,
    webhook_events: Mutex<HashMap<String, WebhookEventRecord>>,
    next_booking_id: AtomicU64,
    next_payment_id: AtomicU64,
}

/// Public API
impl Store {
    pub fn new() -> Self {
        Self {
            bookings: RwLock::new(HashMap::new()),
            indexes: RwLock::new(Indexes::default()),
            references: Mutex::new(HashSet::new()),
            webhook_events: Mutex::new(HashMap::new()),
            next_booking_id: AtomicU64::new(1),
            next_payment_id: AtomicU64::new(1),
        }
    }

    pub fn allocate_booking_id(&self) -> BookingId {
        self.next_booking_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Claim a booking reference. Returns false when it is already taken.
    pub async fn reserve_reference(&self, reference: &str) -> bool {
        self.references.lock().await.insert(reference.to_string())
    }

    /// Insert a new booking row. Returns false if the id is already in use.
    pub async fn insert_booking(&self, record: BookingRecord) -> bool {
        let mut bookings = self.bookings.write().await;
        if bookings.contains_key(&record.booking.id) {
            return false;
        }
        bookings.insert(record.booking.id, Arc::new(Mutex::new(record)));
        true
    }

    /// Lock a booking row for writing (`SELECT ... FOR UPDATE`).
    pub async fn begin(&self, id: BookingId) -> Option<BookingTx<'_>> {
        let row = self.row(id).await?;
        let guard = row.lock_owned().await;
        let staged = guard.clone();
        Some(BookingTx {
            store: self,
            guard,
            staged,
        })
    }

    /// Consistent copy of a booking row.
    pub async fn snapshot(&self, id: BookingId) -> Option<BookingRecord> {
        let row = self.row(id).await?;
        let record = row.lock().await.clone();
        Some(record)
    }

    pub async fn booking(&self, id: BookingId) -> Option<Booking> {
        self.snapshot(id).await.map(|record| record.booking)
    }

    /// All booking ids, ascending.
    pub async fn booking_ids(&self) -> Vec<BookingId> {
        let mut ids: Vec<_> = self.bookings.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Installments matching `filter`, each with its booking's saved
    /// instrument, ordered by due date then booking.
    pub async fn installments_where(
        &self,
        filter: impl Fn(&Installment) -> bool,
    ) -> Vec<(Installment, Option<SavedInstrument>)> {
        let rows: Vec<_> = self.bookings.read().await.values().cloned().collect();

        let mut matches = Vec::new();
        for row in rows {
            let record = row.lock().await;
            for installment in record.installments.iter().filter(|i| filter(i)) {
                matches.push((installment.clone(), record.booking.instrument.clone()));
            }
        }
        matches.sort_by_key(|(i, _)| (i.due_date, i.booking_id, i.number));
        matches
    }

    pub async fn find_payment_by_charge(&self, charge_id: &str) -> Option<PaymentRef> {
        self.indexes.read().await.charges.get(charge_id).copied()
    }

    pub async fn payment_owner(&self, payment_id: PaymentId) -> Option<BookingId> {
        self.indexes.read().await.payments.get(&payment_id).copied()
    }

    /// Insert the dedup record for a provider event. Returns false when the
    /// event id was already recorded; the check and insert are one step.
    pub async fn admit_event(&self, event_id: &str, event_type: &str, at: DateTime<Utc>) -> bool {
        let mut events = self.webhook_events.lock().await;
        if events.contains_key(event_id) {
            return false;
        }
        events.insert(
            event_id.to_string(),
            WebhookEventRecord {
                event_id: event_id.to_string(),
                event_type: event_type.to_string(),
                processed_at: at,
            },
        );
        true
    }

    pub async fn event_record(&self, event_id: &str) -> Option<WebhookEventRecord> {
        self.webhook_events.lock().await.get(event_id).cloned()
    }
}

/// Private API
impl Store {
    async fn row(&self, id: BookingId) -> Option<Arc<Mutex<BookingRecord>>> {
        self.bookings.read().await.get(&id).cloned()
    }

    fn allocate_payment_id(&self) -> PaymentId {
        self.next_payment_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive write access to one booking row.
pub struct BookingTx<'a> {
    store: &'a Store,
    guard: OwnedMutexGuard<BookingRecord>,
    staged: BookingRecord,
}

impl BookingTx<'_> {
    pub fn record(&self) -> &BookingRecord {
        &self.staged
    }

    pub fn booking(&self) -> &Booking {
        &self.staged.booking
    }

    pub fn booking_mut(&mut self) -> &mut Booking {
        &mut self.staged.booking
    }

    pub fn installment_mut(&mut self, number: InstallmentNumber) -> Option<&mut Installment> {
        self.staged
            .installments
            .iter_mut()
            .find(|i| i.number == number)
    }

    pub fn payment_mut(&mut self, id: PaymentId) -> Option<&mut Payment> {
        self.staged.payments.iter_mut().find(|p| p.id == id)
    }

    /// Append a payment row, assigning its id.
    pub fn push_payment(&mut self, build: impl FnOnce(PaymentId) -> Payment) -> PaymentId {
        let id = self.store.allocate_payment_id();
        self.staged.payments.push(build(id));
        id
    }

    /// Publish the staged row and its index entries, then release the lock.
    pub async fn commit(mut self) {
        let booking_id = self.staged.booking.id;
        let new_payments: Vec<_> = self
            .staged
            .payments
            .iter()
            .skip(self.guard.payments.len())
            .map(|p| (p.id, p.provider_charge_id.clone()))
            .collect();

        if !new_payments.is_empty() {
            let mut indexes = self.store.indexes.write().await;
            for (payment_id, charge_id) in new_payments {
                indexes.payments.insert(payment_id, booking_id);
                if let Some(charge_id) = charge_id {
                    indexes.charges.insert(
                        charge_id,
                        PaymentRef {
                            booking_id,
                            payment_id,
                        },
                    );
                }
            }
        }

        *self.guard = self.staged;
    }
}
