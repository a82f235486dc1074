use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::provider::{TriageProvider, triage_prompt};
use super::types::{TriageOutcome, TriageSuggestion};

#[derive(Clone)]
pub struct TriageService {
    provider: Arc<dyn TriageProvider>,
    timeout: Duration,
}

impl TriageService {
    pub fn new(provider: Arc<dyn TriageProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// Starts a triage on its own task. The returned job aborts the task when dropped.
    pub fn spawn(&self, symptoms: &str) -> TriageJob {
        let provider = self.provider.clone();
        let timeout = self.timeout;
        let prompt = triage_prompt(symptoms);

        let handle = tokio::spawn(async move {
            match tokio::time::timeout(timeout, provider.complete(&prompt)).await {
                Err(_) => {
                    warn!(timeout_secs = timeout.as_secs(), "Triage provider timed out");
                    TriageOutcome::Timeout {
                        after_secs: timeout.as_secs(),
                    }
                }
                Ok(Err(e)) => {
                    error!(error = %e, "Triage provider failed");
                    TriageOutcome::ProviderError {
                        message: e.to_string(),
                    }
                }
                Ok(Ok(raw)) => match TriageSuggestion::parse(&raw) {
                    Ok(suggestion) => {
                        info!(
                            specialty = %suggestion.specialty,
                            urgency = %suggestion.urgency,
                            "Triage suggestion ready"
                        );
                        TriageOutcome::Success { suggestion }
                    }
                    Err(e) => {
                        warn!(error = %e, "Triage reply rejected");
                        TriageOutcome::ProviderError {
                            message: e.to_string(),
                        }
                    }
                },
            }
        });

        TriageJob {
            handle: Some(handle),
        }
    }

    pub async fn run_triage(&self, symptoms: &str) -> TriageOutcome {
        self.spawn(symptoms).outcome().await
    }
}

pub struct TriageJob {
    handle: Option<JoinHandle<TriageOutcome>>,
}

impl TriageJob {
    pub fn cancel(&self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }

    pub async fn outcome(mut self) -> TriageOutcome {
        let Some(handle) = self.handle.take() else {
            return TriageOutcome::Cancelled;
        };
        match handle.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => {
                info!("Triage cancelled");
                TriageOutcome::Cancelled
            }
            Err(e) => {
                error!(error = %e, "Triage task panicked");
                TriageOutcome::ProviderError {
                    message: "triage task failed".to_string(),
                }
            }
        }
    }
}

impl Drop for TriageJob {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triage::ManchesterLevel;
    use async_trait::async_trait;

    struct CannedProvider(&'static str);

    #[async_trait]
    impl TriageProvider for CannedProvider {
        async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
            assert!(prompt.contains("Sintomas"));
            Ok(self.0.to_string())
        }
    }

    struct SlowProvider;

    #[async_trait]
    impl TriageProvider for SlowProvider {
        async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(String::new())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl TriageProvider for FailingProvider {
        async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
            anyhow::bail!("OPENROUTER_API_KEY not set")
        }
    }

    fn service(provider: impl TriageProvider + 'static, timeout: Duration) -> TriageService {
        TriageService::new(Arc::new(provider), timeout)
    }

    #[tokio::test]
    async fn successful_triage() {
        let triage = service(
            CannedProvider(
                r##"{"specialty": "Pediatria", "urgency": "Amarelo", "color": "#FFFF00", "explanation": "Febre alta"}"##,
            ),
            Duration::from_secs(1),
        );

        match triage.run_triage("febre e tosse").await {
            TriageOutcome::Success { suggestion } => {
                assert_eq!(suggestion.specialty, "Pediatria");
                assert_eq!(suggestion.urgency, ManchesterLevel::Amarelo);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let triage = service(SlowProvider, Duration::from_millis(20));

        let outcome = triage.run_triage("dor de cabeça").await;

        assert_eq!(outcome, TriageOutcome::Timeout { after_secs: 0 });
    }

    #[tokio::test]
    async fn cancelled_job_reports_cancelled() {
        let triage = service(SlowProvider, Duration::from_secs(30));

        let job = triage.spawn("dor de cabeça");
        job.cancel();

        assert_eq!(job.outcome().await, TriageOutcome::Cancelled);
    }

    #[tokio::test]
    async fn provider_failure_is_reported() {
        let triage = service(FailingProvider, Duration::from_secs(1));

        let outcome = triage.run_triage("tosse").await;

        assert!(matches!(outcome, TriageOutcome::ProviderError { message } if message.contains("OPENROUTER_API_KEY")));
    }

    #[tokio::test]
    async fn malformed_reply_is_a_provider_error() {
        let triage = service(CannedProvider("Não sei"), Duration::from_secs(1));

        let outcome = triage.run_triage("tosse").await;

        assert!(matches!(outcome, TriageOutcome::ProviderError { .. }));
    }
}
