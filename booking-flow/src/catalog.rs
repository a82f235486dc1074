use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};

/// Medical practice areas a patient can book a consultation in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Specialty {
    #[serde(rename = "Clínica Geral")]
    GeneralPractice,
    #[serde(rename = "Pediatria")]
    Pediatrics,
    #[serde(rename = "Ginecologia")]
    Gynecology,
    #[serde(rename = "Cardiologia")]
    Cardiology,
    #[serde(rename = "Dermatologia")]
    Dermatology,
}

impl Specialty {
    pub const ALL: [Specialty; 5] = [
        Specialty::GeneralPractice,
        Specialty::Pediatrics,
        Specialty::Gynecology,
        Specialty::Cardiology,
        Specialty::Dermatology,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Specialty::GeneralPractice => "Clínica Geral",
            Specialty::Pediatrics => "Pediatria",
            Specialty::Gynecology => "Ginecologia",
            Specialty::Cardiology => "Cardiologia",
            Specialty::Dermatology => "Dermatologia",
        }
    }
}

impl fmt::Display for Specialty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Specialty {
    type Err = FlowError;

    fn from_str(value: &str) -> Result<Self> {
        let wanted = value.trim().to_lowercase();
        Specialty::ALL
            .into_iter()
            .find(|s| s.label().to_lowercase() == wanted)
            .ok_or_else(|| FlowError::UnknownSpecialty(value.to_string()))
    }
}

impl TryFrom<String> for Specialty {
    type Error = FlowError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// A clinician offering consultations at a fixed price (whole kwanza).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Practitioner {
    pub id: String,
    pub name: String,
    #[sqlx(try_from = "String")]
    pub specialty: Specialty,
    pub price: i64,
}

/// Read-only lookup of practitioner reference data
#[async_trait]
pub trait PractitionerDirectory: Send + Sync {
    async fn find_practitioner(&self, id: &str) -> Result<Option<Practitioner>>;
}

/// Fixed, in-process practitioner list
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    practitioners: Vec<Practitioner>,
}

impl StaticDirectory {
    pub fn new(practitioners: Vec<Practitioner>) -> Self {
        Self { practitioners }
    }
}

#[async_trait]
impl PractitionerDirectory for StaticDirectory {
    async fn find_practitioner(&self, id: &str) -> Result<Option<Practitioner>> {
        Ok(self.practitioners.iter().find(|p| p.id == id).cloned())
    }
}
