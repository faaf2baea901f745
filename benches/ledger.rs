use booking_ledger::events::ProviderEvent;
use booking_ledger::gateway::OfflineGateway;
use booking_ledger::ledger::{NewBooking, PaymentMeta};
use booking_ledger::notify::LogNotifier;
use booking_ledger::{
    Amount, Config, EventProcessor, Ledger, PaymentMethod, PaymentPlan, Store, compute_schedule,
};
use chrono::NaiveDate;
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use serde_json::json;
use std::sync::Arc;
use tokio::runtime::Runtime;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Generates charge-succeeded events spread over `bookings` bookings.
///
/// Every `duplicate_every`th event redelivers the previous event id
/// (0 = no redeliveries).
pub struct EventGenerator {
    bookings: u64,
    remaining: u64,
    next_id: u64,
    duplicate_every: u64,
}

impl EventGenerator {
    pub fn new(bookings: u64, count: u64, duplicate_every: u64) -> Self {
        Self {
            bookings,
            remaining: count,
            next_id: 0,
            duplicate_every,
        }
    }
}

impl Iterator for EventGenerator {
    type Item = ProviderEvent;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let redeliver = self.duplicate_every > 0
            && self.next_id > 0
            && self.remaining % self.duplicate_every == 0;
        if !redeliver {
            self.next_id += 1;
        }
        let id = self.next_id;

        let event = json!({
            "id": format!("evt_{id}"),
            "type": "charge.succeeded",
            "data": {
                "amount": 100,
                "charge_id": format!("ch_{id}"),
                "metadata": { "booking_id": (id % self.bookings) + 1 },
            },
        });
        serde_json::from_value(event).ok()
    }
}

async fn open_bookings(ledger: &Ledger, count: u64) {
    for _ in 0..count {
        ledger
            .open_booking(
                NewBooking {
                    total: Amount::from_minor(1_000_000),
                    method: PaymentMethod::Card,
                    plan: PaymentPlan::Full,
                    created_on: date(2026, 1, 1),
                },
                date(2026, 5, 20),
            )
            .await
            .unwrap();
    }
}

fn bench_schedule(c: &mut Criterion) {
    let mut group = c.benchmark_group("schedule");

    for plan in [PaymentPlan::Full, PaymentPlan::EqualMonthly, PaymentPlan::ThreeEqual] {
        group.bench_with_input(BenchmarkId::from_parameter(plan.as_str()), &plan, |b, &plan| {
            b.iter(|| {
                compute_schedule(
                    black_box(Amount::from_minor(123_457)),
                    plan,
                    date(2026, 1, 7),
                    date(2026, 12, 20),
                )
            });
        });
    }

    group.finish();
}

fn bench_record_payment(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("record_payment");

    for count in [1_000u64, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                rt.block_on(async {
                    let ledger = Ledger::new(Arc::new(Store::new()));
                    open_bookings(&ledger, 10).await;
                    for i in 0..count {
                        let _ = black_box(
                            ledger
                                .record_payment(
                                    i % 10 + 1,
                                    Amount::from_minor(100),
                                    PaymentMethod::Card,
                                    PaymentMeta::manual(),
                                )
                                .await,
                        );
                    }
                    ledger
                })
            });
        });
    }

    group.finish();
}

fn bench_event_replay(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("event_replay");

    for (label, duplicate_every) in [("unique", 0), ("dup_10pct", 10)] {
        group.bench_function(label, |b| {
            b.iter(|| {
                rt.block_on(async {
                    let ledger = Arc::new(Ledger::new(Arc::new(Store::new())));
                    open_bookings(&ledger, 100).await;
                    let processor = EventProcessor::new(
                        Arc::clone(&ledger),
                        Arc::new(OfflineGateway),
                        Arc::new(LogNotifier),
                        Config::default(),
                    );
                    for event in EventGenerator::new(100, 10_000, duplicate_every) {
                        let _ = black_box(processor.process(event).await);
                    }
                    ledger
                })
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_schedule, bench_record_payment, bench_event_replay);
criterion_main!(benches);
