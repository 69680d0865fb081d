//! The Analyst: single-pass transcript analysis.
//!
//! One LLM call per interview produces the whole proposed diff: extracted
//! evidence, mappings against live propositions, newborn propositions with
//! their retroactive scan, and merge/subsume/prune proposals. The Analyst is
//! a pure function of its inputs; it never writes and never assigns real
//! ids. Anything the model returns that does not coerce into a known record
//! shape is dropped here, before the Reconciler ever sees it.

use std::sync::Arc;

use eidetic_core::{
    AnalysisDiff, Evidence, EvidenceDraft, EvidenceMapping, LlmError, MergeProposal, Mode,
    Proposition, PropositionDraft, Relationship, SubsumeProposal,
};
use serde_json::{json, Value};
use tracing::debug;

use crate::llm::{ChatMessage, ChatModel, ChatParams};
use crate::prompts;

pub struct AnalystAgent {
    llm: Arc<dyn ChatModel>,
    temperature: f64,
}

impl AnalystAgent {
    pub fn new(llm: Arc<dyn ChatModel>, temperature: f64) -> Self {
        Self { llm, temperature }
    }

    /// Analyze one transcript against a snapshot of the stores.
    pub async fn analyze(
        &self,
        transcript: &str,
        interview_id: &str,
        evidence: &[Evidence],
        propositions: &[Proposition],
        mode: Mode,
    ) -> Result<AnalysisDiff, LlmError> {
        let live: Vec<&Proposition> = propositions.iter().filter(|p| p.is_live()).collect();
        let payload = json!({
            "task": "Analyze a single interview and return JSON only",
            "interview_id": interview_id,
            "mode": mode,
            "transcript": transcript,
            "existing_evidence": evidence,
            "existing_propositions": live,
        });

        let raw = self
            .llm
            .chat_json(
                &[
                    ChatMessage::system(prompts::ANALYST_SYSTEM),
                    ChatMessage::user(payload.to_string()),
                ],
                ChatParams {
                    temperature: self.temperature,
                    max_tokens: 8192,
                    json_mode: true,
                },
            )
            .await?;

        let diff = coerce_diff(&raw);
        debug!(
            interview = interview_id,
            evidence = diff.new_evidence.len(),
            mappings = diff.mappings.len(),
            newborn = diff.new_propositions.len(),
            "analysis coerced"
        );
        Ok(diff)
    }
}

// ============================================================================
// Defensive coercion of the raw model payload
// ============================================================================

fn coerce_diff(raw: &Value) -> AnalysisDiff {
    AnalysisDiff {
        new_evidence: array(raw, "new_evidence")
            .iter()
            .filter_map(coerce_evidence_draft)
            .collect(),
        mappings: array(raw, "mappings")
            .iter()
            .filter_map(coerce_mapping)
            .collect(),
        new_propositions: array(raw, "new_propositions")
            .iter()
            .filter_map(coerce_proposition_draft)
            .collect(),
        retroactive_mappings: array(raw, "retroactive_mappings")
            .iter()
            .filter_map(coerce_mapping)
            .collect(),
        merges: array(raw, "merges")
            .iter()
            .filter_map(coerce_merge)
            .collect(),
        subsumes: array(raw, "subsumes")
            .iter()
            .filter_map(coerce_subsume)
            .collect(),
        prunes: array(raw, "prunes")
            .iter()
            .filter_map(|v| non_empty(v.as_str()))
            .collect(),
    }
}

fn array<'a>(raw: &'a Value, key: &str) -> Vec<&'a Value> {
    raw.get(key)
        .and_then(Value::as_array)
        .map(|a| a.iter().collect())
        .unwrap_or_default()
}

fn field(item: &Value, key: &str) -> String {
    item.get(key)
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_string()
}

fn non_empty(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn string_list(item: &Value, key: &str) -> Vec<String> {
    item.get(key)
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(|v| non_empty(v.as_str())).collect())
        .unwrap_or_default()
}

fn coerce_evidence_draft(item: &&Value) -> Option<EvidenceDraft> {
    let quote = field(item, "quote");
    let interpretation = field(item, "interpretation");
    let factor = field(item, "factor");
    let mechanism = field(item, "mechanism");
    let outcome = field(item, "outcome");
    if quote.is_empty()
        || interpretation.is_empty()
        || factor.is_empty()
        || mechanism.is_empty()
        || outcome.is_empty()
    {
        return None;
    }

    let symbol = non_empty(Some(&field(item, "symbol")))
        .or_else(|| non_empty(Some(&field(item, "id"))))?;
    let language = {
        let l = field(item, "language");
        if l.is_empty() {
            "en".to_string()
        } else {
            l
        }
    };
    Some(EvidenceDraft {
        symbol,
        quote,
        interpretation,
        factor,
        mechanism,
        outcome,
        tags: string_list(item, "tags"),
        language,
        quote_english: non_empty(Some(&field(item, "quote_english"))),
    })
}

fn coerce_mapping(item: &&Value) -> Option<EvidenceMapping> {
    let relationship = match field(item, "relationship").to_lowercase().as_str() {
        "supports" => Relationship::Supports,
        "contradicts" => Relationship::Contradicts,
        _ => return None,
    };
    Some(EvidenceMapping {
        evidence_ref: non_empty(Some(&field(item, "evidence_ref")))
            .or_else(|| non_empty(Some(&field(item, "evidence_id"))))?,
        proposition_ref: non_empty(Some(&field(item, "proposition_ref")))
            .or_else(|| non_empty(Some(&field(item, "proposition_id"))))?,
        relationship,
    })
}

fn coerce_proposition_draft(item: &&Value) -> Option<PropositionDraft> {
    let factor = field(item, "factor");
    let mechanism = field(item, "mechanism");
    let outcome = field(item, "outcome");
    if factor.is_empty() || mechanism.is_empty() || outcome.is_empty() {
        return None;
    }
    let symbol = non_empty(Some(&field(item, "symbol")))
        .or_else(|| non_empty(Some(&field(item, "id"))))?;
    Some(PropositionDraft {
        symbol,
        factor,
        mechanism,
        outcome,
        status: None,
        supporting_refs: string_list(item, "supporting_refs"),
        contradicting_refs: string_list(item, "contradicting_refs"),
    })
}

fn coerce_merge(item: &&Value) -> Option<MergeProposal> {
    let source_ids = string_list(item, "source_ids");
    let factor = field(item, "factor");
    let mechanism = field(item, "mechanism");
    let outcome = field(item, "outcome");
    if source_ids.len() < 2 || factor.is_empty() || mechanism.is_empty() || outcome.is_empty() {
        return None;
    }
    Some(MergeProposal {
        source_ids,
        factor,
        mechanism,
        outcome,
    })
}

fn coerce_subsume(item: &&Value) -> Option<SubsumeProposal> {
    Some(SubsumeProposal {
        specialized_id: non_empty(Some(&field(item, "specialized_id")))?,
        general_id: non_empty(Some(&field(item, "general_id")))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerces_well_formed_payload() {
        let raw = json!({
            "new_evidence": [{
                "symbol": "e#1",
                "quote": "the venue was freezing",
                "interpretation": "cold impaired thinking",
                "factor": "venue temperature",
                "mechanism": "physical discomfort",
                "outcome": "reduced cognition",
                "tags": ["environment"],
                "language": "en"
            }],
            "mappings": [
                {"evidence_ref": "e#1", "proposition_ref": "P001", "relationship": "supports"}
            ],
            "new_propositions": [{
                "symbol": "p#1",
                "factor": "environment",
                "mechanism": "discomfort",
                "outcome": "cognition",
                "supporting_refs": ["e#1"]
            }],
            "retroactive_mappings": [],
            "merges": [],
            "subsumes": [],
            "prunes": ["P009"]
        });
        let diff = coerce_diff(&raw);
        assert_eq!(diff.new_evidence.len(), 1);
        assert_eq!(diff.mappings.len(), 1);
        assert_eq!(diff.new_propositions.len(), 1);
        assert_eq!(diff.prunes, vec!["P009"]);
    }

    #[test]
    fn drops_incomplete_and_malformed_records() {
        let raw = json!({
            "new_evidence": [
                {"symbol": "e#1", "quote": "", "interpretation": "x",
                 "factor": "f", "mechanism": "m", "outcome": "o"},
                "not an object",
                {"quote": "q", "interpretation": "i",
                 "factor": "f", "mechanism": "m", "outcome": "o"}
            ],
            "mappings": [
                {"evidence_ref": "e#1", "proposition_ref": "P001",
                 "relationship": "irrelevant"},
                {"evidence_ref": "", "proposition_ref": "P001",
                 "relationship": "supports"}
            ],
            "merges": [
                {"source_ids": ["P001"], "factor": "f", "mechanism": "m", "outcome": "o"}
            ]
        });
        let diff = coerce_diff(&raw);
        // Empty quote, non-object, and missing symbol are all dropped.
        assert!(diff.new_evidence.is_empty());
        assert!(diff.mappings.is_empty());
        // A merge of fewer than two sources is meaningless.
        assert!(diff.merges.is_empty());
    }

    #[tokio::test]
    async fn analyze_coerces_model_payload() {
        let raw = json!({
            "new_evidence": [{
                "symbol": "e#1",
                "quote": "Мы замерзли в зале",
                "quote_english": "We froze in the hall",
                "language": "ru",
                "interpretation": "cold venue hurt comfort",
                "factor": "venue temperature",
                "mechanism": "discomfort",
                "outcome": "low focus",
                "tags": ["environment"]
            }],
            "mappings": [],
            "new_propositions": []
        });
        let raw = raw.to_string();
        let model = Arc::new(crate::llm::tests_support::QueueModel::new(&[raw.as_str()]));
        let analyst = AnalystAgent::new(model, 0.3);

        let diff = analyst
            .analyze("Interviewer: ...\nUser: ...", "INT_001", &[], &[], Mode::Divergent)
            .await
            .unwrap();
        assert_eq!(diff.new_evidence.len(), 1);
        assert_eq!(diff.new_evidence[0].language, "ru");
        assert_eq!(
            diff.new_evidence[0].quote_english.as_deref(),
            Some("We froze in the hall")
        );
    }

    #[test]
    fn accepts_alternate_key_spellings() {
        let raw = json!({
            "mappings": [
                {"evidence_id": "E004", "proposition_id": "P002",
                 "relationship": "CONTRADICTS"}
            ]
        });
        let diff = coerce_diff(&raw);
        assert_eq!(diff.mappings.len(), 1);
        assert_eq!(diff.mappings[0].relationship, Relationship::Contradicts);
    }
}
