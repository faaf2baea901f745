//! Recording doubles for the gateway and notifier seams.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::gateway::{ChargeReceipt, ChargeRequest, ChargeStatus, GatewayError, PaymentGateway};
use crate::model::{BookingId, InstallmentKey, PaymentId};
use crate::notify::{Notifier, NotifyError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Receipt(PaymentId),
    BookingConfirmed(BookingId),
    PaymentFailed(InstallmentKey, Option<NaiveDate>),
    Reminder(InstallmentKey, NaiveDate),
    Escalation(InstallmentKey),
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notice>>,
    failing: bool,
}

impl RecordingNotifier {
    /// Records every notice but reports each delivery as failed.
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing: true,
        }
    }

    pub fn sent(&self) -> Vec<Notice> {
        self.sent.lock().unwrap().clone()
    }

    fn push(&self, notice: Notice) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(notice);
        if self.failing {
            return Err(NotifyError {
                kind: "test",
                reason: "mailbox unavailable".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_receipt(&self, payment: PaymentId) -> Result<(), NotifyError> {
        self.push(Notice::Receipt(payment))
    }

    async fn send_booking_confirmed(&self, booking: BookingId) -> Result<(), NotifyError> {
        self.push(Notice::BookingConfirmed(booking))
    }

    async fn send_payment_failed(
        &self,
        installment: InstallmentKey,
        retry_on: Option<NaiveDate>,
    ) -> Result<(), NotifyError> {
        self.push(Notice::PaymentFailed(installment, retry_on))
    }

    async fn send_payment_reminder(
        &self,
        installment: InstallmentKey,
        due: NaiveDate,
    ) -> Result<(), NotifyError> {
        self.push(Notice::Reminder(installment, due))
    }

    async fn alert_escalation(&self, installment: InstallmentKey) -> Result<(), NotifyError> {
        self.push(Notice::Escalation(installment))
    }
}

/// Answers queued results in order, then accepts every further charge.
#[derive(Default)]
pub struct ScriptedGateway {
    script: Mutex<VecDeque<Result<ChargeStatus, GatewayError>>>,
    requests: Mutex<Vec<ChargeRequest>>,
}

impl ScriptedGateway {
    pub fn with_script(script: impl IntoIterator<Item = Result<ChargeStatus, GatewayError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ChargeRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn charge_saved_instrument(
        &self,
        request: ChargeRequest,
    ) -> Result<ChargeReceipt, GatewayError> {
        let charge_id = format!("ch_{}_{}", request.booking_id, request.installment);
        self.requests.lock().unwrap().push(request);
        let status = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(ChargeStatus::Processing))?;
        Ok(ChargeReceipt { status, charge_id })
    }
}
