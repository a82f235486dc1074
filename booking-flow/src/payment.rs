use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{FlowError, Result};

const COUNTRY_CODE: &str = "244";

/// Mobile number a payment is requested from, normalized to `+244XXXXXXXXX`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Keeps the digits and prefixes the country code. Only an input with no
    /// digits at all is rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return Err(FlowError::InvalidPhone(raw.to_string()));
        }
        let local = if digits.len() == 12 && digits.starts_with(COUNTRY_CODE) {
            digits[COUNTRY_CODE.len()..].to_string()
        } else {
            digits
        };
        Ok(Self(format!("+{COUNTRY_CODE}{local}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub amount: i64,
    pub phone: PhoneNumber,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PaymentOutcome {
    Approved { reference: String },
    Declined { reason: String },
    TimedOut,
}

/// Authorizes a charge against the patient's mobile wallet
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn authorize(&self, request: &PaymentRequest) -> PaymentOutcome;
}

/// Stand-in for Multicaixa Express: waits a fixed delay, then approves.
///
/// Neither the amount nor the phone reference is checked.
#[derive(Debug, Clone)]
pub struct SimulatedPaymentGateway {
    delay: Duration,
}

impl SimulatedPaymentGateway {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for SimulatedPaymentGateway {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[async_trait]
impl PaymentGateway for SimulatedPaymentGateway {
    async fn authorize(&self, request: &PaymentRequest) -> PaymentOutcome {
        info!(
            amount = request.amount,
            phone = %request.phone.as_str(),
            delay_ms = self.delay.as_millis() as u64,
            "Waiting for simulated payment approval"
        );
        tokio::time::sleep(self.delay).await;

        let reference = format!("MCX-{}", Uuid::new_v4().simple()).to_uppercase();
        info!(reference = %reference, "Simulated payment approved");
        PaymentOutcome::Approved { reference }
    }
}
