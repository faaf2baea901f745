//! Inbound payment provider events.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::Amount;
use crate::ledger::LedgerError;
use crate::model::{BookingId, InstallmentNumber, PaymentId};

mod processor;
mod signature;

pub use processor::EventProcessor;
pub use signature::{SignatureError, sign, verify_signature};

#[derive(Debug, Error)]
pub enum EventError {
    #[error("event rejected: {0}")]
    Authenticity(#[from] SignatureError),

    #[error("malformed event payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("event {event_id} failed: {source}")]
    Processing {
        event_id: String,
        booking_id: Option<BookingId>,
        #[source]
        source: LedgerError,
    },
}

/// Kind of provider notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    ChargeSucceeded,
    ChargeFailed,
    MethodSaved,
    MethodSaveFailed,
    ChargeRefunded,
    Other,
}

impl EventKind {
    /// Also accepts the provider's own names for the same notifications.
    pub fn parse(event_type: &str) -> Self {
        match event_type {
            "charge.succeeded" | "payment_intent.succeeded" => EventKind::ChargeSucceeded,
            "charge.failed" | "payment_intent.payment_failed" => EventKind::ChargeFailed,
            "method.saved" | "setup_intent.succeeded" => EventKind::MethodSaved,
            "method.save_failed" | "setup_intent.setup_failed" => EventKind::MethodSaveFailed,
            "charge.refunded" => EventKind::ChargeRefunded,
            _ => EventKind::Other,
        }
    }
}

/// A provider notification as delivered on the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    /// Unix seconds at which the provider created the event.
    #[serde(default)]
    pub created: Option<i64>,
    #[serde(default)]
    pub data: EventData,
}

/// Amounts are integer minor units.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventData {
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub amount_refunded: Option<i64>,
    #[serde(default)]
    pub charge_id: Option<String>,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub failure_message: Option<String>,
    #[serde(default)]
    pub metadata: EventMetadata,
}

/// Metadata attached when the charge was created. Providers echo it back
/// as strings, so ids are accepted either as numbers or numeric strings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventMetadata {
    #[serde(default, deserialize_with = "lenient_id")]
    pub booking_id: Option<BookingId>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub installment_number: Option<u64>,
    #[serde(default)]
    pub payment_type: Option<String>,
}

impl ProviderEvent {
    pub fn from_slice(body: &[u8]) -> Result<Self, EventError> {
        Ok(serde_json::from_slice(body)?)
    }

    pub fn kind(&self) -> EventKind {
        EventKind::parse(&self.event_type)
    }

    /// Calendar day of the event, today when the provider sent no timestamp.
    pub fn occurred_on(&self) -> NaiveDate {
        self.created
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .unwrap_or_else(Utc::now)
            .date_naive()
    }

    pub fn booking_id(&self) -> Option<BookingId> {
        self.data.metadata.booking_id
    }

    /// Zero and out-of-range numbers mean "no installment".
    pub fn installment(&self) -> Option<InstallmentNumber> {
        self.data
            .metadata
            .installment_number
            .and_then(|n| InstallmentNumber::try_from(n).ok())
            .filter(|&n| n > 0)
    }

    pub fn amount(&self) -> Amount {
        Amount::from_minor(self.data.amount.unwrap_or(0))
    }
}

/// What processing an event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Event id already seen, nothing applied.
    Duplicate,
    PaymentRecorded {
        booking_id: BookingId,
        payment_id: PaymentId,
    },
    ChargeFailed {
        booking_id: BookingId,
        attempts: Option<u32>,
    },
    MethodSaved {
        booking_id: BookingId,
    },
    Refunded {
        booking_id: BookingId,
        payment_id: PaymentId,
    },
    /// Admitted but without effect (unknown kind, missing metadata, unknown
    /// charge).
    Ignored,
}

fn lenient_id<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Number(n)) => Some(n),
        Some(Raw::Text(s)) => s.trim().parse().ok(),
        None => None,
    })
}
