use std::fmt;

use serde::{Deserialize, Serialize};

/// Manchester triage priority, most urgent first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManchesterLevel {
    Vermelho,
    Laranja,
    Amarelo,
    Verde,
    Azul,
}

impl ManchesterLevel {
    /// Accepts the Portuguese labels and their English equivalents, ignoring case.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "vermelho" | "red" => Some(Self::Vermelho),
            "laranja" | "orange" => Some(Self::Laranja),
            "amarelo" | "yellow" => Some(Self::Amarelo),
            "verde" | "green" => Some(Self::Verde),
            "azul" | "blue" => Some(Self::Azul),
            _ => None,
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            Self::Vermelho => "#DC2626",
            Self::Laranja => "#EA580C",
            Self::Amarelo => "#FACC15",
            Self::Verde => "#16A34A",
            Self::Azul => "#2563EB",
        }
    }
}

impl fmt::Display for ManchesterLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Vermelho => "Vermelho",
            Self::Laranja => "Laranja",
            Self::Amarelo => "Amarelo",
            Self::Verde => "Verde",
            Self::Azul => "Azul",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageSuggestion {
    pub specialty: String,
    pub urgency: ManchesterLevel,
    pub color: String,
    pub explanation: String,
}

/// Shape the model is asked to answer with
#[derive(Debug, Deserialize)]
struct RawSuggestion {
    specialty: String,
    urgency: String,
    color: Option<String>,
    explanation: String,
}

impl TriageSuggestion {
    /// Parses a model reply, tolerating a surrounding markdown code fence.
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let trimmed = raw.trim();
        let cleaned = trimmed
            .strip_prefix("```json")
            .or_else(|| trimmed.strip_prefix("```"))
            .unwrap_or(trimmed);
        let cleaned = cleaned.strip_suffix("```").unwrap_or(cleaned).trim();

        let parsed: RawSuggestion = serde_json::from_str(cleaned).map_err(|e| {
            anyhow::anyhow!("Could not parse triage response: {e}. Raw response: {raw}")
        })?;

        let urgency = ManchesterLevel::from_label(&parsed.urgency)
            .ok_or_else(|| anyhow::anyhow!("Unknown urgency level '{}'", parsed.urgency))?;

        let color = parsed
            .color
            .filter(|c| is_hex_color(c))
            .unwrap_or_else(|| urgency.color().to_string());

        Ok(Self {
            specialty: parsed.specialty.trim().to_string(),
            urgency,
            color,
            explanation: parsed.explanation.trim().to_string(),
        })
    }
}

fn is_hex_color(value: &str) -> bool {
    value
        .strip_prefix('#')
        .is_some_and(|hex| matches!(hex.len(), 3 | 6) && hex.chars().all(|c| c.is_ascii_hexdigit()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TriageOutcome {
    Success { suggestion: TriageSuggestion },
    ProviderError { message: String },
    Timeout { after_secs: u64 },
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_reply() {
        let raw = "```json\n{\"specialty\": \"Cardiologia\", \"urgency\": \"Laranja\", \"color\": \"#FFA500\", \"explanation\": \"Dor no peito\"}\n```";

        let suggestion = TriageSuggestion::parse(raw).unwrap();

        assert_eq!(suggestion.specialty, "Cardiologia");
        assert_eq!(suggestion.urgency, ManchesterLevel::Laranja);
        assert_eq!(suggestion.color, "#FFA500");
    }

    #[test]
    fn invalid_color_falls_back_to_level_color() {
        let raw = r#"{"specialty": "Clínica Geral", "urgency": "green", "color": "verde", "explanation": "Gripe"}"#;

        let suggestion = TriageSuggestion::parse(raw).unwrap();

        assert_eq!(suggestion.urgency, ManchesterLevel::Verde);
        assert_eq!(suggestion.color, "#16A34A");
    }

    #[test]
    fn unknown_urgency_is_rejected() {
        let raw = r#"{"specialty": "Pediatria", "urgency": "Roxo", "explanation": "?"}"#;
        assert!(TriageSuggestion::parse(raw).is_err());
        assert!(TriageSuggestion::parse("not json").is_err());
    }

    #[test]
    fn outcome_is_tagged_by_status() {
        let json = serde_json::to_value(TriageOutcome::Timeout { after_secs: 20 }).unwrap();
        assert_eq!(json["status"], "timeout");
        assert_eq!(json["after_secs"], 20);
    }
}
