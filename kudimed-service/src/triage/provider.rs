use async_trait::async_trait;
use rig::{client::CompletionClient, completion::Chat, providers::openrouter};
use tracing::debug;

/// Sends a prompt to a language model and returns its raw text reply.
#[async_trait]
pub trait TriageProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String>;
}

const PREAMBLE: &str = "Você é um assistente de triagem médica inteligente para o sistema KudiMed em Angola. \
Responda apenas com JSON válido, sem texto adicional.";

pub fn triage_prompt(symptoms: &str) -> String {
    format!(
        r#"Baseado nos sintomas fornecidos pelo paciente, sugira a especialidade médica correta e o nível de urgência (Protocolo de Manchester: Vermelho, Laranja, Amarelo, Verde, Azul).

Sintomas: "{symptoms}"

Responda em formato JSON:
{{
  "specialty": "Nome da Especialidade",
  "urgency": "Nível de Urgência",
  "color": "Código de Cor (hex)",
  "explanation": "Breve explicação do porquê desta triagem"
}}"#
    )
}

/// OpenRouter-backed provider. A missing API key surfaces as an error per request.
pub struct RigTriageProvider {
    api_key: Option<String>,
    model: String,
}

impl RigTriageProvider {
    pub fn new(api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            api_key,
            model: model.into(),
        }
    }
}

#[async_trait]
impl TriageProvider for RigTriageProvider {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("OPENROUTER_API_KEY not set"))?;

        let client = openrouter::Client::new(api_key);
        let agent = client.agent(&self.model).preamble(PREAMBLE).build();

        debug!(model = %self.model, "Requesting triage suggestion");
        let reply = agent
            .chat(prompt, vec![])
            .await
            .map_err(|e| anyhow::anyhow!("LLM chat failed: {e}"))?;
        Ok(reply)
    }
}
