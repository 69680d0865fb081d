//! Interview scripts: immutable, versioned interviewer guides.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionPriority {
    High,
    Medium,
    Low,
}

/// What the interviewer should do with a proposition's topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SectionInstruction {
    /// Open exploration of an untested or thinly evidenced claim.
    Explore,
    /// Targeted confirmation of a mid-confidence claim.
    Verify,
    /// Actively seek disconfirming accounts of a strong claim.
    Challenge,
    /// Do-not-probe guard: the claim is settled, skip unless volunteered.
    Saturated,
}

/// Operating regime of the research loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Divergent,
    Convergent,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Divergent
    }
}

/// One script topic, bound to exactly one live proposition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptSection {
    pub proposition_id: String,
    pub priority: SectionPriority,
    pub instruction: SectionInstruction,
    pub main_question: String,
    /// 2–3 follow-up probes.
    #[serde(default)]
    pub probes: Vec<String>,
    /// Interviewer-facing note on why this topic matters now.
    #[serde(default)]
    pub context: String,
}

/// A Designer-produced interview guide. Immutable once published; only one
/// version is active per project at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterviewScript {
    /// Strictly monotonic, starting at 1, no gaps.
    pub version: u32,
    /// Interview whose ingestion produced this version; `None` for v1.
    #[serde(default)]
    pub generated_after_interview: Option<String>,
    pub research_question: String,
    pub opening_question: String,
    #[serde(default)]
    pub sections: Vec<ScriptSection>,
    pub closing_question: String,
    pub wildcard: String,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub convergence_score: f64,
    #[serde(default = "default_novelty")]
    pub novelty_rate: f64,
    #[serde(default)]
    pub changes_summary: String,
}

fn default_novelty() -> f64 {
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&SectionInstruction::Challenge).unwrap(),
            "\"CHALLENGE\""
        );
        let i: SectionInstruction = serde_json::from_str("\"SATURATED\"").unwrap();
        assert_eq!(i, SectionInstruction::Saturated);
    }

    #[test]
    fn priority_orders_high_first() {
        assert!(SectionPriority::High < SectionPriority::Medium);
        assert!(SectionPriority::Medium < SectionPriority::Low);
    }
}
