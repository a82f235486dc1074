use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{FlowError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Scheduled,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for AppointmentStatus {
    type Error = FlowError;

    fn try_from(value: String) -> Result<Self> {
        match value.as_str() {
            "scheduled" => Ok(AppointmentStatus::Scheduled),
            "completed" => Ok(AppointmentStatus::Completed),
            "cancelled" => Ok(AppointmentStatus::Cancelled),
            other => Err(FlowError::StorageError(format!(
                "unknown appointment status '{other}'"
            ))),
        }
    }
}

/// An appointment about to be written to the ledger. Status is always `scheduled`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAppointment {
    pub patient_id: String,
    pub doctor_id: String,
    pub specialty: String,
    /// `YYYY-MM-DD HH:MM`
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentRecord {
    pub id: i64,
    pub patient_id: String,
    pub doctor_id: String,
    pub specialty: String,
    pub date: String,
    pub status: AppointmentStatus,
}

/// Persisted collection of committed appointments
#[async_trait]
pub trait AppointmentLedger: Send + Sync {
    /// Appends a `scheduled` appointment and returns its id.
    ///
    /// Fails with [`FlowError::SlotTaken`] when the practitioner already has a
    /// non-cancelled appointment at the same date-time.
    async fn create(&self, appointment: NewAppointment) -> Result<i64>;

    async fn slot_taken(&self, doctor_id: &str, date: &str) -> Result<bool>;
}

#[derive(Debug, Default)]
pub struct InMemoryLedger {
    rows: Mutex<Vec<AppointmentRecord>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn appointments(&self) -> Vec<AppointmentRecord> {
        self.rows.lock().await.clone()
    }
}

fn occupies(row: &AppointmentRecord, doctor_id: &str, date: &str) -> bool {
    row.doctor_id == doctor_id && row.date == date && row.status != AppointmentStatus::Cancelled
}

#[async_trait]
impl AppointmentLedger for InMemoryLedger {
    async fn create(&self, appointment: NewAppointment) -> Result<i64> {
        let mut rows = self.rows.lock().await;
        if rows
            .iter()
            .any(|row| occupies(row, &appointment.doctor_id, &appointment.date))
        {
            return Err(FlowError::SlotTaken {
                doctor_id: appointment.doctor_id,
                date: appointment.date,
            });
        }

        let id = rows.len() as i64 + 1;
        rows.push(AppointmentRecord {
            id,
            patient_id: appointment.patient_id,
            doctor_id: appointment.doctor_id,
            specialty: appointment.specialty,
            date: appointment.date,
            status: AppointmentStatus::Scheduled,
        });
        Ok(id)
    }

    async fn slot_taken(&self, doctor_id: &str, date: &str) -> Result<bool> {
        let rows = self.rows.lock().await;
        Ok(rows.iter().any(|row| occupies(row, doctor_id, date)))
    }
}
