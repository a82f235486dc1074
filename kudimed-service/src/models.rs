use booking_flow::{AppointmentStatus, BookingSummary, Selection, Session, Step};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Doctor,
    Patient,
    Pharmacist,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Doctor => "doctor",
            UserRole::Patient => "patient",
            UserRole::Pharmacist => "pharmacist",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
#[error("unknown role '{0}'")]
pub struct UnknownRole(String);

impl TryFrom<String> for UserRole {
    type Error = UnknownRole;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "admin" => Ok(UserRole::Admin),
            "doctor" => Ok(UserRole::Doctor),
            "patient" => Ok(UserRole::Patient),
            "pharmacist" => Ok(UserRole::Pharmacist),
            _ => Err(UnknownRole(value)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    #[sqlx(try_from = "String")]
    pub role: UserRole,
    pub wallet_balance: f64,
}

/// Appointment joined with the counterpart's display name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AppointmentRow {
    pub id: i64,
    pub patient_id: String,
    pub doctor_id: String,
    pub specialty: String,
    pub date: String,
    #[sqlx(try_from = "String")]
    pub status: AppointmentStatus,
    #[sqlx(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doctor_name: Option<String>,
    #[sqlx(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Medication {
    pub id: i64,
    pub name: String,
    pub price: f64,
    pub pharmacy_name: String,
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Prescription {
    pub id: i64,
    pub patient_id: String,
    pub doctor_id: String,
    pub content: String,
    pub date: String,
    pub doctor_name: String,
}

#[derive(Debug, Deserialize)]
pub struct AppointmentsQuery {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PrescriptionsQuery {
    #[serde(rename = "userId")]
    pub user_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct MedicationsQuery {
    pub search: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PractitionersQuery {
    pub specialty: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedResponse {
    pub id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentConfirmationRequest {
    pub phone: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TriageRequest {
    pub symptoms: String,
}

/// What a client needs to render the current booking step
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub patient_id: String,
    pub step: Step,
    pub step_number: u8,
    pub selection: Selection,
    pub can_advance: bool,
    pub payment_pending: bool,
    pub last_error: Option<String>,
    pub appointment_id: Option<i64>,
    pub status_message: Option<String>,
    pub summary: Option<BookingSummary>,
}

impl From<&Session> for SessionResponse {
    fn from(session: &Session) -> Self {
        let flow = &session.flow;
        Self {
            session_id: session.id.clone(),
            patient_id: session.patient_id.clone(),
            step: flow.step(),
            step_number: flow.step().position(),
            selection: flow.selection().clone(),
            can_advance: flow.can_advance(),
            payment_pending: flow.payment_pending(),
            last_error: flow.last_error().map(str::to_string),
            appointment_id: flow.appointment_id(),
            status_message: session.status_message.clone(),
            summary: flow.summary(),
        }
    }
}
