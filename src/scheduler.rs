//! Retry scheduler.
//!
//! A batch over installment state, run once per tick (daily in practice).
//! It only *requests* charges; their outcome comes back through the event
//! processor. The exception is a request that never reached the provider,
//! which is accounted here as a failed attempt since no event will follow.

use chrono::{Days, NaiveDate};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::failure::{ChargeFailure, record_charge_failure};
use crate::gateway::{ChargeRequest, ChargeStatus, PaymentGateway, charge_with_timeout};
use crate::ledger::Ledger;
use crate::model::{Installment, InstallmentKey, InstallmentStatus, SavedInstrument};
use crate::notify::{Notifier, deliver};

/// What one scheduler run did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Charge requests accepted by the gateway.
    pub requested: Vec<InstallmentKey>,
    /// Requests that never reached the provider, counted as failed attempts.
    pub transport_failures: Vec<InstallmentKey>,
    /// Due installments without a saved instrument.
    pub skipped: Vec<InstallmentKey>,
    pub escalated: Vec<InstallmentKey>,
    pub reminded: Vec<InstallmentKey>,
    /// Installments whose processing failed; the batch carried on.
    pub errors: usize,
}

pub struct RetryScheduler {
    ledger: Arc<Ledger>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    config: Config,
}

/// Public API
impl RetryScheduler {
    pub fn new(
        ledger: Arc<Ledger>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        config: Config,
    ) -> Self {
        Self {
            ledger,
            gateway,
            notifier,
            config,
        }
    }

    /// Run every pass for `today`.
    pub async fn run(&self, today: NaiveDate) -> RunReport {
        let mut report = RunReport::default();
        let mut calls = 0;

        self.due_pass(today, &mut report, &mut calls).await;
        self.retry_pass(today, &mut report, &mut calls).await;
        self.escalation_pass(&mut report).await;
        self.reminder_pass(today, &mut report).await;

        info!(
            %today,
            requested = report.requested.len(),
            transport_failures = report.transport_failures.len(),
            escalated = report.escalated.len(),
            reminded = report.reminded.len(),
            errors = report.errors,
            "scheduler run finished"
        );
        report
    }
}

/// Private API
impl RetryScheduler {
    /// Pending installments due today or earlier.
    async fn due_pass(&self, today: NaiveDate, report: &mut RunReport, calls: &mut usize) {
        let ceiling = self.config.retry.ceiling;
        let due = self
            .ledger
            .store()
            .installments_where(|i| {
                i.status == InstallmentStatus::Pending
                    && i.due_date <= today
                    && i.attempt_count < ceiling
            })
            .await;

        for (installment, instrument) in due {
            self.attempt(installment, instrument, today, report, calls).await;
        }
    }

    /// Failed installments whose retry date has come.
    async fn retry_pass(&self, today: NaiveDate, report: &mut RunReport, calls: &mut usize) {
        let ceiling = self.config.retry.ceiling;
        let retries = self
            .ledger
            .store()
            .installments_where(|i| {
                i.status == InstallmentStatus::Failed
                    && i.attempt_count < ceiling
                    && i.next_retry_date.is_some_and(|d| d <= today)
            })
            .await;

        for (installment, instrument) in retries {
            self.attempt(installment, instrument, today, report, calls).await;
        }
    }

    /// Failed installments out of attempts. Reported, never retried.
    async fn escalation_pass(&self, report: &mut RunReport) {
        let policy = self.config.retry;
        let escalated = self
            .ledger
            .store()
            .installments_where(|i| i.is_escalated(&policy))
            .await;

        for (installment, _) in escalated {
            let key = installment.key();
            warn!(
                installment = %key,
                attempts = installment.attempt_count,
                amount = %installment.amount,
                "installment awaiting manual intervention"
            );
            deliver("escalation", self.notifier.alert_escalation(key)).await;
            report.escalated.push(key);
        }
    }

    /// Pending installments falling due in exactly `reminder_days_before` days.
    async fn reminder_pass(&self, today: NaiveDate, report: &mut RunReport) {
        let days = Days::new(self.config.reminder_days_before);
        let Some(target) = today.checked_add_days(days) else {
            return;
        };
        let upcoming = self
            .ledger
            .store()
            .installments_where(|i| i.status == InstallmentStatus::Pending && i.due_date == target)
            .await;

        for (installment, _) in upcoming {
            let key = installment.key();
            let due = installment.due_date;
            deliver("reminder", self.notifier.send_payment_reminder(key, due)).await;
            report.reminded.push(key);
        }
    }

    async fn attempt(
        &self,
        installment: Installment,
        instrument: Option<SavedInstrument>,
        today: NaiveDate,
        report: &mut RunReport,
        calls: &mut usize,
    ) {
        let key = installment.key();
        let Some(instrument) = instrument else {
            info!(installment = %key, "no saved payment method, skipping");
            report.skipped.push(key);
            return;
        };

        if *calls > 0 && !self.config.gateway_call_delay.is_zero() {
            tokio::time::sleep(self.config.gateway_call_delay).await;
        }
        *calls += 1;

        let request = ChargeRequest {
            instrument,
            amount: installment.amount,
            booking_id: key.booking_id,
            installment: key.number,
        };
        let result =
            charge_with_timeout(self.gateway.as_ref(), request, self.config.gateway_timeout).await;
        match result {
            Ok(receipt) => {
                match receipt.status {
                    ChargeStatus::Failed => warn!(
                        installment = %key,
                        charge_id = %receipt.charge_id,
                        "charge declined, awaiting failure event"
                    ),
                    ChargeStatus::Succeeded | ChargeStatus::Processing => info!(
                        installment = %key,
                        charge_id = %receipt.charge_id,
                        "charge requested, awaiting provider event"
                    ),
                }
                report.requested.push(key);
            }
            Err(e) => {
                warn!(installment = %key, "charge request failed: {e}");
                let failure = ChargeFailure {
                    booking_id: key.booking_id,
                    installment: Some(key.number),
                    amount: installment.amount,
                    charge_id: None,
                    reason: Some(format!("Gateway error: {e}")),
                    attempted_on: today,
                };
                match record_charge_failure(
                    &self.ledger,
                    self.notifier.as_ref(),
                    &self.config.retry,
                    failure,
                )
                .await
                {
                    Ok(_) => report.transport_failures.push(key),
                    Err(e) => {
                        error!(installment = %key, "could not record failed attempt: {e}");
                        report.errors += 1;
                    }
                }
            }
        }
    }
}
