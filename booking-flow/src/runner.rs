//! FlowRunner – loads a booking session, applies exactly **one** user action, and persists the
//! updated session back to storage.
//!
//! Every call holds a per-session lock for the whole load → apply → save cycle, so two
//! requests against the same booking never interleave. Lock entries are dropped from the
//! lock map as soon as nobody holds or waits on them.
//!
//! Payment confirmation runs on a task owned by the runner and keeps the lock across the
//! gateway round-trip. The pending flag is always settled, even if the caller goes away
//! mid-payment. A second confirmation arriving meanwhile is refused with
//! [`FlowError::PaymentInProgress`] instead of queueing behind the first one.
//!
//! Create the runner once at startup and share it across requests:
//! ```rust,ignore
//! let runner = FlowRunner::new(storage, directory, gateway, ledger);
//! let session = runner.start("p1").await?;
//! runner.apply(&session.id, BookingAction::Advance).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, warn};

use crate::{
    catalog::{PractitionerDirectory, Specialty},
    error::{FlowError, Result},
    flow::{BookingAction, BookingFlow},
    ledger::AppointmentLedger,
    payment::{PaymentGateway, PaymentOutcome, PaymentRequest, PhoneNumber},
    storage::{Session, SessionStorage},
};

pub const DEFAULT_PAYMENT_TIMEOUT: Duration = Duration::from_secs(30);

type LockMap = DashMap<String, Arc<Mutex<()>>>;

/// Exclusive hold on one session. Removes the map entry on release when unused.
struct SessionLock {
    locks: Arc<LockMap>,
    session_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        // release first so the map holds the only reference
        self.guard.take();
        self.locks
            .remove_if(&self.session_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[derive(Clone)]
pub struct FlowRunner {
    storage: Arc<dyn SessionStorage>,
    directory: Arc<dyn PractitionerDirectory>,
    gateway: Arc<dyn PaymentGateway>,
    ledger: Arc<dyn AppointmentLedger>,
    payment_timeout: Duration,
    locks: Arc<LockMap>,
}

impl FlowRunner {
    pub fn new(
        storage: Arc<dyn SessionStorage>,
        directory: Arc<dyn PractitionerDirectory>,
        gateway: Arc<dyn PaymentGateway>,
        ledger: Arc<dyn AppointmentLedger>,
    ) -> Self {
        Self {
            storage,
            directory,
            gateway,
            ledger,
            payment_timeout: DEFAULT_PAYMENT_TIMEOUT,
            locks: Arc::new(DashMap::new()),
        }
    }

    pub fn with_payment_timeout(mut self, timeout: Duration) -> Self {
        self.payment_timeout = timeout;
        self
    }

    /// Opens a fresh booking for `patient_id`.
    pub async fn start(&self, patient_id: &str) -> Result<Session> {
        let session = Session::new_for_patient(patient_id);
        self.storage.save(session.clone()).await?;
        info!(session_id = %session.id, patient_id = %patient_id, "Booking session started");
        Ok(session)
    }

    pub async fn session(&self, session_id: &str) -> Result<Session> {
        self.storage
            .get(session_id)
            .await?
            .ok_or_else(|| FlowError::SessionNotFound(session_id.to_string()))
    }

    /// Applies one action. On error nothing is persisted and the stored flow is unchanged.
    pub async fn apply(&self, session_id: &str, action: BookingAction) -> Result<Session> {
        let _lock = self.lock_session(session_id).await;

        let mut session = self.session(session_id).await?;
        let action_name = action.name();

        let message = match self.apply_action(&mut session.flow, action).await {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    session_id = %session_id,
                    action = action_name,
                    step = %session.flow.step(),
                    error = %e,
                    "Booking action refused"
                );
                return Err(e);
            }
        };

        info!(
            session_id = %session_id,
            action = action_name,
            step = %session.flow.step(),
            "Booking action applied"
        );

        session.status_message = Some(message);
        session.touch();
        self.storage.save(session.clone()).await?;
        Ok(session)
    }

    /// Charges the patient and, on approval, commits the appointment and finishes the flow.
    ///
    /// On decline, timeout, or a ledger failure the flow stays at `ConfirmAndPay` with
    /// `last_error` set, and the error is returned. The payment itself runs on its own
    /// task, so dropping the returned future does not leave the booking pending.
    pub async fn confirm_payment(&self, session_id: &str, phone: &str) -> Result<Session> {
        let stored = self.session(session_id).await?;
        if stored.flow.payment_pending() {
            return Err(FlowError::PaymentInProgress);
        }

        let runner = self.clone();
        let session_id = session_id.to_string();
        let phone = phone.to_string();
        tokio::spawn(async move { runner.settle_payment(&session_id, &phone).await })
            .await
            .map_err(|e| FlowError::PaymentTaskFailed(e.to_string()))?
    }

    async fn settle_payment(&self, session_id: &str, phone: &str) -> Result<Session> {
        let _lock = self.lock_session(session_id).await;

        let mut session = self.session(session_id).await?;
        let phone = PhoneNumber::parse(phone)?;
        let appointment = session.flow.new_appointment(&session.patient_id)?;
        let request = session.flow.begin_payment(phone)?;

        if self
            .ledger
            .slot_taken(&appointment.doctor_id, &appointment.date)
            .await?
        {
            let err = FlowError::SlotTaken {
                doctor_id: appointment.doctor_id,
                date: appointment.date,
            };
            return self.fail_payment(session, err).await;
        }

        session.status_message = Some("Waiting for payment approval".to_string());
        session.touch();
        self.storage.save(session.clone()).await?;

        let committed = match self.authorize(&request).await {
            PaymentOutcome::Approved { reference } => {
                info!(
                    session_id = %session_id,
                    reference = %reference,
                    amount = request.amount,
                    "Payment approved"
                );
                self.ledger
                    .create(appointment)
                    .await
                    .map(|id| (id, reference))
            }
            PaymentOutcome::Declined { reason } => Err(FlowError::PaymentDeclined(reason)),
            PaymentOutcome::TimedOut => Err(FlowError::PaymentTimedOut(self.payment_timeout)),
        };

        match committed {
            Ok((appointment_id, reference)) => {
                session.flow.complete_payment(appointment_id)?;
                session.status_message = Some(format!(
                    "Appointment {appointment_id} confirmed (payment {reference})"
                ));
                session.touch();
                self.storage.save(session.clone()).await?;
                info!(
                    session_id = %session_id,
                    appointment_id = appointment_id,
                    "Booking completed"
                );
                Ok(session)
            }
            Err(e) => self.fail_payment(session, e).await,
        }
    }

    /// Discards a booking.
    pub async fn abandon(&self, session_id: &str) -> Result<()> {
        {
            let _lock = self.lock_session(session_id).await;
            self.session(session_id).await?;
            self.storage.delete(session_id).await?;
        }
        info!(session_id = %session_id, "Booking session abandoned");
        Ok(())
    }

    async fn apply_action(&self, flow: &mut BookingFlow, action: BookingAction) -> Result<String> {
        match action {
            BookingAction::SelectSpecialty { specialty } => {
                let specialty: Specialty = specialty.parse()?;
                flow.select_specialty(specialty)?;
                Ok(format!("Specialty {specialty} selected"))
            }
            BookingAction::SelectPractitioner { practitioner_id } => {
                let practitioner = self
                    .directory
                    .find_practitioner(&practitioner_id)
                    .await?
                    .ok_or(FlowError::PractitionerNotFound(practitioner_id))?;
                let message = format!("Practitioner {} selected", practitioner.name);
                flow.select_practitioner(practitioner)?;
                Ok(message)
            }
            BookingAction::SetDate { date } => {
                flow.set_date(&date)?;
                Ok(format!("Date set to {}", date.trim()))
            }
            BookingAction::SetTime { time } => {
                flow.set_time(&time)?;
                Ok(format!("Time set to {}", time.trim()))
            }
            BookingAction::Advance => {
                let step = flow.advance()?;
                Ok(format!("Moved to {step}"))
            }
            BookingAction::Retreat => {
                let step = flow.retreat()?;
                Ok(format!("Moved back to {step}"))
            }
        }
    }

    async fn authorize(&self, request: &PaymentRequest) -> PaymentOutcome {
        tokio::time::timeout(self.payment_timeout, self.gateway.authorize(request))
            .await
            .unwrap_or(PaymentOutcome::TimedOut)
    }

    async fn fail_payment(&self, mut session: Session, err: FlowError) -> Result<Session> {
        error!(session_id = %session.id, error = %err, "Payment confirmation failed");
        session.flow.fail_payment(&err);
        session.status_message = Some("Payment not completed".to_string());
        session.touch();
        self.storage.save(session).await?;
        Err(err)
    }

    async fn lock_session(&self, session_id: &str) -> SessionLock {
        let lock = self
            .locks
            .entry(session_id.to_string())
            .or_default()
            .clone();
        let guard = lock.lock_owned().await;
        SessionLock {
            locks: self.locks.clone(),
            session_id: session_id.to_string(),
            guard: Some(guard),
        }
    }
}
