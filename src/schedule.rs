//! Installment schedule computation.
//!
//! Pure functions: the same total, plan and dates always produce the same
//! schedule, and the installment amounts always sum to the total.

use chrono::{Days, Months, NaiveDate};
use thiserror::Error;

use crate::Amount;
use crate::model::InstallmentNumber;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("total must be greater than zero, got {0}")]
    NonPositiveTotal(Amount),
    #[error("unknown payment plan '{0}'")]
    UnknownPlan(String),
}

/// How a booking's total is split over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentPlan {
    /// One installment due immediately.
    Full,
    /// One installment per month until the deadline.
    EqualMonthly,
    /// Three installments: now, midway, on the deadline.
    ThreeEqual,
}

impl PaymentPlan {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentPlan::Full => "full",
            PaymentPlan::EqualMonthly => "monthly",
            PaymentPlan::ThreeEqual => "three_payments",
        }
    }

    pub fn is_installment_plan(self) -> bool {
        self != PaymentPlan::Full
    }
}

impl std::str::FromStr for PaymentPlan {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(PaymentPlan::Full),
            "monthly" | "equal_monthly" => Ok(PaymentPlan::EqualMonthly),
            "three_payments" | "three_equal" => Ok(PaymentPlan::ThreeEqual),
            other => Err(ScheduleError::UnknownPlan(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledInstallment {
    pub sequence: InstallmentNumber,
    pub amount: Amount,
    pub due_date: NaiveDate,
}

/// Compute the ordered installments for `total` under `plan`.
///
/// A deadline before `start` is treated as `start`.
pub fn compute_schedule(
    total: Amount,
    plan: PaymentPlan,
    start: NaiveDate,
    deadline: NaiveDate,
) -> Result<Vec<ScheduledInstallment>, ScheduleError> {
    if !total.is_positive() {
        return Err(ScheduleError::NonPositiveTotal(total));
    }
    let deadline = deadline.max(start);

    let due_dates = match plan {
        PaymentPlan::Full => vec![start],
        PaymentPlan::EqualMonthly => monthly_due_dates(start, deadline),
        PaymentPlan::ThreeEqual => three_due_dates(start, deadline),
    };

    Ok(split(total, &due_dates))
}

/// Whole months from `start` to `deadline`, counting a partial month as one.
/// Never less than 1.
pub fn months_between(start: NaiveDate, deadline: NaiveDate) -> u32 {
    let mut months = 0;
    while add_months(start, months) < deadline {
        months += 1;
    }
    months.max(1)
}

fn monthly_due_dates(start: NaiveDate, deadline: NaiveDate) -> Vec<NaiveDate> {
    (0..months_between(start, deadline))
        .map(|i| add_months(start, i).min(deadline))
        .collect()
}

fn three_due_dates(start: NaiveDate, deadline: NaiveDate) -> Vec<NaiveDate> {
    let days = (deadline - start).num_days().max(0) as u64;
    // midpoint rounded half up to whole days
    let midpoint = start
        .checked_add_days(Days::new(days.div_ceil(2)))
        .unwrap_or(deadline);
    vec![start, midpoint, deadline]
}

/// Same day-of-month, clamped to the month's last day.
fn add_months(date: NaiveDate, months: u32) -> NaiveDate {
    date.checked_add_months(Months::new(months))
        .unwrap_or(NaiveDate::MAX)
}

/// Equal shares with the last installment absorbing the rounding remainder.
fn split(total: Amount, due_dates: &[NaiveDate]) -> Vec<ScheduledInstallment> {
    let count = due_dates.len() as u32;
    let share = total.share(count);

    due_dates
        .iter()
        .zip(1..)
        .map(|(&due_date, sequence)| {
            let amount = if sequence == count {
                total - share.times(count - 1)
            } else {
                share
            };
            ScheduledInstallment {
                sequence,
                amount,
                due_date,
            }
        })
        .collect()
}
