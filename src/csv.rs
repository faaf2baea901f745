use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::Amount;
use crate::ledger::NewBooking;
use crate::model::{Booking, BookingId, PaymentMethod};
use crate::schedule::{PaymentPlan, ScheduleError};

/// Errors that can occur when reading booking rows
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("cannot open bookings file: {0}")]
    Open(csv::Error),

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized payment method '{method}'")]
    UnknownMethod { line: usize, method: String },

    #[error("line {line}: {source}")]
    Plan { line: usize, source: ScheduleError },

    #[error("line {line}: invalid date '{value}', expected YYYY-MM-DD")]
    InvalidDate { line: usize, value: String },
}

#[derive(Debug, Deserialize)]
struct InputRow {
    total: f64,
    method: String,
    plan: String,
    created_on: String,
}

#[derive(Debug, Serialize)]
struct OutputRow<'a> {
    booking: BookingId,
    reference: &'a str,
    total: String,
    paid: String,
    outstanding: String,
    payment_status: &'static str,
    booking_status: &'static str,
}

/// Read bookings to open from a csv file with columns
/// `total,method,plan,created_on`.
pub fn read_bookings(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<NewBooking, CsvError>>, CsvError> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(CsvError::Open)?;

    Ok(reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;

            let method = row
                .method
                .parse::<PaymentMethod>()
                .map_err(|method| CsvError::UnknownMethod { line, method })?;
            let plan = row
                .plan
                .parse::<PaymentPlan>()
                .map_err(|source| CsvError::Plan { line, source })?;
            let created_on = NaiveDate::parse_from_str(&row.created_on, "%Y-%m-%d").map_err(
                |_| CsvError::InvalidDate {
                    line,
                    value: row.created_on.clone(),
                },
            )?;

            Ok(NewBooking {
                total: Amount::from_float(row.total),
                method,
                plan,
                created_on,
            })
        }))
}

/// Write the balance report of `bookings` in csv format
pub fn write_report<'a, W: io::Write>(
    writer: W,
    bookings: impl IntoIterator<Item = &'a Booking>,
) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(writer);

    for booking in bookings {
        writer.serialize(OutputRow {
            booking: booking.id,
            reference: &booking.reference,
            total: booking.total_amount.to_string(),
            paid: booking.amount_paid.to_string(),
            outstanding: booking.amount_outstanding.to_string(),
            payment_status: booking.payment_status.as_str(),
            booking_status: booking.booking_status.as_str(),
        })?;
    }

    writer.flush()?;
    Ok(())
}
