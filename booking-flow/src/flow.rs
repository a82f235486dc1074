//! The appointment-booking state machine.
//!
//! A booking moves strictly forward through four steps:
//!
//! ```text
//! ChooseSpecialty -> ChoosePractitionerAndTime -> ConfirmAndPay -> Done
//! ```
//!
//! `BookingFlow` is plain data: it serializes into a [`Session`](crate::Session) so an
//! in-progress booking can be saved and restored between requests. All async work
//! (practitioner lookup, payment, ledger writes) lives in [`FlowRunner`](crate::FlowRunner);
//! the methods here only validate and mutate state, and leave it untouched when they
//! return an error.

use std::fmt;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::{
    catalog::{Practitioner, Specialty},
    error::{FlowError, Result},
    ledger::NewAppointment,
    payment::{PaymentRequest, PhoneNumber},
};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    ChooseSpecialty,
    ChoosePractitionerAndTime,
    ConfirmAndPay,
    Done,
}

impl Step {
    /// 1-based position, as shown in a progress indicator
    pub fn position(self) -> u8 {
        match self {
            Step::ChooseSpecialty => 1,
            Step::ChoosePractitionerAndTime => 2,
            Step::ConfirmAndPay => 3,
            Step::Done => 4,
        }
    }

    fn next(self) -> Option<Step> {
        match self {
            Step::ChooseSpecialty => Some(Step::ChoosePractitionerAndTime),
            Step::ChoosePractitionerAndTime => Some(Step::ConfirmAndPay),
            Step::ConfirmAndPay => Some(Step::Done),
            Step::Done => None,
        }
    }

    fn previous(self) -> Option<Step> {
        match self {
            Step::ChooseSpecialty | Step::Done => None,
            Step::ChoosePractitionerAndTime => Some(Step::ChooseSpecialty),
            Step::ConfirmAndPay => Some(Step::ChoosePractitionerAndTime),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::ChooseSpecialty => "choose_specialty",
            Step::ChoosePractitionerAndTime => "choose_practitioner_and_time",
            Step::ConfirmAndPay => "confirm_and_pay",
            Step::Done => "done",
        };
        f.write_str(name)
    }
}

/// What the patient has picked so far
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub specialty: Option<Specialty>,
    pub practitioner: Option<Practitioner>,
    pub date: Option<NaiveDate>,
    #[serde(default, with = "hour_minute")]
    pub time: Option<NaiveTime>,
}

impl Selection {
    /// Combined `YYYY-MM-DD HH:MM` string, the form the ledger stores.
    pub fn date_time(&self) -> Option<String> {
        match (self.date, self.time) {
            (Some(date), Some(time)) => Some(format!(
                "{} {}",
                date.format(DATE_FORMAT),
                time.format(TIME_FORMAT)
            )),
            _ => None,
        }
    }
}

/// Confirmation details shown before and after payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingSummary {
    pub specialty: Specialty,
    pub practitioner_id: String,
    pub practitioner_name: String,
    pub date_time: String,
    pub amount: i64,
}

/// A single user action against an in-progress booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum BookingAction {
    SelectSpecialty {
        specialty: String,
    },
    SelectPractitioner {
        #[serde(rename = "practitionerId")]
        practitioner_id: String,
    },
    SetDate {
        date: String,
    },
    SetTime {
        time: String,
    },
    Advance,
    Retreat,
}

impl BookingAction {
    pub fn name(&self) -> &'static str {
        match self {
            BookingAction::SelectSpecialty { .. } => "select_specialty",
            BookingAction::SelectPractitioner { .. } => "select_practitioner",
            BookingAction::SetDate { .. } => "set_date",
            BookingAction::SetTime { .. } => "set_time",
            BookingAction::Advance => "advance",
            BookingAction::Retreat => "retreat",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingFlow {
    step: Step,
    selection: Selection,
    #[serde(default)]
    payment_pending: bool,
    #[serde(default)]
    last_error: Option<String>,
    #[serde(default)]
    appointment_id: Option<i64>,
}

impl Default for BookingFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl BookingFlow {
    pub fn new() -> Self {
        Self {
            step: Step::ChooseSpecialty,
            selection: Selection::default(),
            payment_pending: false,
            last_error: None,
            appointment_id: None,
        }
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn payment_pending(&self) -> bool {
        self.payment_pending
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn appointment_id(&self) -> Option<i64> {
        self.appointment_id
    }

    pub fn is_done(&self) -> bool {
        self.step == Step::Done
    }

    /// Sets the specialty and moves on to practitioner selection.
    ///
    /// A practitioner chosen earlier for a different specialty is dropped together
    /// with the date and time picked for them.
    pub fn select_specialty(&mut self, specialty: Specialty) -> Result<Step> {
        self.require_step(Step::ChooseSpecialty, "select_specialty")?;

        let stale = self
            .selection
            .practitioner
            .as_ref()
            .is_some_and(|p| p.specialty != specialty);
        if stale {
            self.selection.practitioner = None;
            self.selection.date = None;
            self.selection.time = None;
        }
        self.selection.specialty = Some(specialty);
        self.step = Step::ChoosePractitionerAndTime;
        Ok(self.step)
    }

    pub fn select_practitioner(&mut self, practitioner: Practitioner) -> Result<()> {
        self.require_step(Step::ChoosePractitionerAndTime, "select_practitioner")?;

        if self.selection.specialty != Some(practitioner.specialty) {
            return Err(FlowError::SpecialtyMismatch {
                practitioner_id: practitioner.id,
                specialty: self
                    .selection
                    .specialty
                    .map(|s| s.to_string())
                    .unwrap_or_default(),
            });
        }
        self.selection.practitioner = Some(practitioner);
        Ok(())
    }

    pub fn set_date(&mut self, value: &str) -> Result<()> {
        self.require_step(Step::ChoosePractitionerAndTime, "set_date")?;
        self.require_practitioner()?;

        let date = NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)
            .map_err(|_| FlowError::InvalidDate(value.to_string()))?;
        self.selection.date = Some(date);
        Ok(())
    }

    pub fn set_time(&mut self, value: &str) -> Result<()> {
        self.require_step(Step::ChoosePractitionerAndTime, "set_time")?;
        self.require_practitioner()?;

        let time = NaiveTime::parse_from_str(value.trim(), TIME_FORMAT)
            .map_err(|_| FlowError::InvalidTime(value.to_string()))?;
        self.selection.time = Some(time);
        Ok(())
    }

    /// Whether `advance` would succeed right now.
    pub fn can_advance(&self) -> bool {
        matches!(
            self.step,
            Step::ChooseSpecialty | Step::ChoosePractitionerAndTime
        ) && self.missing_fields().is_empty()
    }

    pub fn advance(&mut self) -> Result<Step> {
        match self.step {
            Step::Done => Err(FlowError::InvalidTransition {
                step: self.step,
                action: "advance",
            }),
            Step::ConfirmAndPay => Err(FlowError::GuardNotSatisfied {
                step: self.step,
                missing: "successful payment".to_string(),
            }),
            Step::ChooseSpecialty | Step::ChoosePractitionerAndTime => {
                let missing = self.missing_fields();
                if !missing.is_empty() {
                    return Err(FlowError::GuardNotSatisfied {
                        step: self.step,
                        missing: missing.join(", "),
                    });
                }
                if let Some(next) = self.step.next() {
                    self.step = next;
                }
                Ok(self.step)
            }
        }
    }

    /// One step back. Entered data is kept; the payment-pending flag is not.
    pub fn retreat(&mut self) -> Result<Step> {
        let previous = self.step.previous().ok_or(FlowError::InvalidTransition {
            step: self.step,
            action: "retreat",
        })?;
        self.step = previous;
        self.payment_pending = false;
        Ok(self.step)
    }

    /// Marks a payment as in flight and returns what should be charged.
    pub fn begin_payment(&mut self, phone: PhoneNumber) -> Result<PaymentRequest> {
        self.require_step(Step::ConfirmAndPay, "confirm_payment")?;
        if self.payment_pending {
            return Err(FlowError::PaymentInProgress);
        }
        let summary = self.summary().ok_or_else(|| FlowError::GuardNotSatisfied {
            step: self.step,
            missing: self.missing_fields().join(", "),
        })?;

        self.payment_pending = true;
        self.last_error = None;
        Ok(PaymentRequest {
            amount: summary.amount,
            phone,
            description: format!(
                "Consulta de {} com {}",
                summary.specialty, summary.practitioner_name
            ),
        })
    }

    /// Moves to `Done` once the payment was approved and the ledger entry exists.
    pub fn complete_payment(&mut self, appointment_id: i64) -> Result<Step> {
        if self.step != Step::ConfirmAndPay || !self.payment_pending {
            return Err(FlowError::InvalidTransition {
                step: self.step,
                action: "complete_payment",
            });
        }
        self.step = Step::Done;
        self.payment_pending = false;
        self.last_error = None;
        self.appointment_id = Some(appointment_id);
        Ok(self.step)
    }

    pub fn fail_payment(&mut self, error: &FlowError) {
        self.payment_pending = false;
        self.last_error = Some(error.to_string());
    }

    /// The ledger row this booking will produce for `patient_id`.
    pub fn new_appointment(&self, patient_id: &str) -> Result<NewAppointment> {
        let summary = self.summary().ok_or_else(|| FlowError::GuardNotSatisfied {
            step: self.step,
            missing: self.missing_fields().join(", "),
        })?;
        Ok(NewAppointment {
            patient_id: patient_id.to_string(),
            doctor_id: summary.practitioner_id,
            specialty: summary.specialty.to_string(),
            date: summary.date_time,
        })
    }

    pub fn summary(&self) -> Option<BookingSummary> {
        let specialty = self.selection.specialty?;
        let practitioner = self.selection.practitioner.as_ref()?;
        let date_time = self.selection.date_time()?;
        Some(BookingSummary {
            specialty,
            practitioner_id: practitioner.id.clone(),
            practitioner_name: practitioner.name.clone(),
            date_time,
            amount: practitioner.price,
        })
    }

    fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.selection.specialty.is_none() {
            missing.push("specialty");
        }
        if self.step == Step::ChooseSpecialty {
            return missing;
        }
        if self.selection.practitioner.is_none() {
            missing.push("practitioner");
        }
        if self.selection.date.is_none() {
            missing.push("date");
        }
        if self.selection.time.is_none() {
            missing.push("time");
        }
        missing
    }

    fn require_step(&self, expected: Step, action: &'static str) -> Result<()> {
        if self.step != expected {
            return Err(FlowError::InvalidTransition {
                step: self.step,
                action,
            });
        }
        Ok(())
    }

    fn require_practitioner(&self) -> Result<()> {
        if self.selection.practitioner.is_none() {
            return Err(FlowError::GuardNotSatisfied {
                step: self.step,
                missing: "practitioner".to_string(),
            });
        }
        Ok(())
    }
}

/// `Option<NaiveTime>` as `HH:MM`
mod hour_minute {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::TIME_FORMAT;

    pub fn serialize<S: Serializer>(
        value: &Option<NaiveTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(time) => serializer.collect_str(&time.format(TIME_FORMAT)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveTime>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|s| NaiveTime::parse_from_str(&s, TIME_FORMAT).map_err(serde::de::Error::custom))
            .transpose()
    }
}
