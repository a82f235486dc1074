use std::time::Duration;

use thiserror::Error;

use crate::flow::Step;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Unknown specialty: {0}")]
    UnknownSpecialty(String),

    #[error("Practitioner not found: {0}")]
    PractitionerNotFound(String),

    #[error("Practitioner {practitioner_id} does not offer {specialty}")]
    SpecialtyMismatch {
        practitioner_id: String,
        specialty: String,
    },

    #[error("Invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("Invalid time '{0}', expected HH:MM")]
    InvalidTime(String),

    #[error("Invalid phone reference: {0}")]
    InvalidPhone(String),

    #[error("Action '{action}' is not allowed at step {step}")]
    InvalidTransition { step: Step, action: &'static str },

    #[error("Cannot leave step {step}: missing {missing}")]
    GuardNotSatisfied { step: Step, missing: String },

    #[error("A payment is already in progress for this booking")]
    PaymentInProgress,

    #[error("Payment declined: {0}")]
    PaymentDeclined(String),

    #[error("Payment timed out after {0:?}")]
    PaymentTimedOut(Duration),

    #[error("Payment task failed: {0}")]
    PaymentTaskFailed(String),

    #[error("Practitioner {doctor_id} is already booked at {date}")]
    SlotTaken { doctor_id: String, date: String },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<sqlx::Error> for FlowError {
    fn from(err: sqlx::Error) -> Self {
        FlowError::StorageError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;
