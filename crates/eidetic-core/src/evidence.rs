//! Evidence: a single respondent observation extracted from one interview.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Translation state of a verbatim quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationStatus {
    /// Quote is not yet translated into English.
    Pending,
    /// Quote was already English; `quote_english` mirrors `quote`.
    NativeEn,
    /// Quote carries an Analyst-supplied English rendering.
    Translated,
}

/// An atomic observation: a verbatim quote plus its English causal reading.
///
/// Evidence is append-only once committed. The `quote` stays in the source
/// language of the interview; every interpretive field is English.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    /// Monotonic per-project id, e.g. `E001`. Never reused.
    pub id: String,
    /// Interview this observation was mined from, e.g. `INT_003`.
    pub interview_id: String,
    /// Verbatim respondent quote in the source language.
    pub quote: String,
    /// English reading of the quote.
    pub interpretation: String,
    pub factor: String,
    pub mechanism: String,
    pub outcome: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// ISO language code of the quote.
    #[serde(default = "default_language")]
    pub language: String,
    /// English rendering of a non-English quote, when available.
    #[serde(default)]
    pub quote_english: Option<String>,
    #[serde(default = "default_translation_status")]
    pub translation_status: TranslationStatus,
    pub timestamp: DateTime<Utc>,
}

fn default_language() -> String {
    "en".to_string()
}

fn default_translation_status() -> TranslationStatus {
    TranslationStatus::Pending
}

impl Evidence {
    /// True when every causal field carries content.
    pub fn is_complete(&self) -> bool {
        !self.quote.trim().is_empty()
            && !self.interpretation.trim().is_empty()
            && !self.factor.trim().is_empty()
            && !self.mechanism.trim().is_empty()
            && !self.outcome.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translation_status_serializes_snake_case() {
        let json = serde_json::to_string(&TranslationStatus::NativeEn).unwrap();
        assert_eq!(json, "\"native_en\"");
    }

    #[test]
    fn missing_optional_fields_default() {
        let json = serde_json::json!({
            "id": "E001",
            "interview_id": "INT_001",
            "quote": "time pressure helped us focus",
            "interpretation": "deadline pressure improved concentration",
            "factor": "time pressure",
            "mechanism": "forced prioritization",
            "outcome": "focus",
            "timestamp": "2026-01-01T00:00:00Z"
        });
        let evidence: Evidence = serde_json::from_value(json).unwrap();
        assert_eq!(evidence.language, "en");
        assert_eq!(evidence.translation_status, TranslationStatus::Pending);
        assert!(evidence.is_complete());
    }
}
