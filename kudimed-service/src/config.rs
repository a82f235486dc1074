use std::time::Duration;

use tracing::warn;

const DEFAULT_DATABASE_URL: &str = "sqlite://kudimed.db?mode=rwc";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_CURRENT_USER: &str = "p1";
const DEFAULT_TRIAGE_MODEL: &str = "openai/gpt-4o-mini";
const DEFAULT_TRIAGE_TIMEOUT_SECS: u64 = 20;
const DEFAULT_PAYMENT_DELAY_MS: u64 = 2000;
const DEFAULT_PAYMENT_TIMEOUT_SECS: u64 = 30;

/// Configuration for the KudiMed service
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub database_url: String,
    pub port: u16,
    /// Identity every request acts as; there is no real authentication.
    pub current_user_id: String,
    pub openrouter_api_key: Option<String>,
    pub triage_model: String,
    pub triage_timeout: Duration,
    pub payment_delay: Duration,
    pub payment_timeout: Duration,
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Missing keys take defaults;
    /// malformed numbers are logged and take defaults too.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let number = |key: &str, default: u64| -> u64 {
            match lookup(key) {
                None => default,
                Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                    warn!(key, value = %raw, default, "Invalid number in configuration, using default");
                    default
                }),
            }
        };

        let port = match u16::try_from(number("PORT", DEFAULT_PORT as u64)) {
            Ok(port) => port,
            Err(_) => {
                warn!(default = DEFAULT_PORT, "PORT out of range, using default");
                DEFAULT_PORT
            }
        };

        Self {
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            port,
            current_user_id: lookup("KUDIMED_CURRENT_USER")
                .unwrap_or_else(|| DEFAULT_CURRENT_USER.to_string()),
            openrouter_api_key: lookup("OPENROUTER_API_KEY").filter(|key| !key.trim().is_empty()),
            triage_model: lookup("TRIAGE_MODEL").unwrap_or_else(|| DEFAULT_TRIAGE_MODEL.to_string()),
            triage_timeout: Duration::from_secs(number(
                "TRIAGE_TIMEOUT_SECS",
                DEFAULT_TRIAGE_TIMEOUT_SECS,
            )),
            payment_delay: Duration::from_millis(number(
                "PAYMENT_DELAY_MS",
                DEFAULT_PAYMENT_DELAY_MS,
            )),
            payment_timeout: Duration::from_secs(number(
                "PAYMENT_TIMEOUT_SECS",
                DEFAULT_PAYMENT_TIMEOUT_SECS,
            )),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}
