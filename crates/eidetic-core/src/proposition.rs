//! Propositions: causal claims aggregated from evidence.

use serde::{Deserialize, Serialize};

/// Lifecycle of a proposition.
///
/// `Weak` and `Merged` are terminal for active participation: such a
/// proposition is excluded from scripts, metrics, and merge candidacy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropositionStatus {
    Untested,
    Exploring,
    Confirmed,
    Challenged,
    Saturated,
    Weak,
    Merged,
}

impl PropositionStatus {
    /// Live propositions participate in mapping, merging, and scripts.
    pub fn is_live(self) -> bool {
        !matches!(self, PropositionStatus::Weak | PropositionStatus::Merged)
    }

    /// Statuses counted in the convergence-score denominator.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            PropositionStatus::Exploring
                | PropositionStatus::Confirmed
                | PropositionStatus::Challenged
                | PropositionStatus::Saturated
        )
    }
}

/// A causal claim of the form factor → mechanism → outcome.
///
/// Evidence references are id-addressed sets rather than pointers, so a
/// merge or prune is a purely declarative edit. The confidence field is
/// whatever the last reconciliation computed; it is never recomputed on
/// read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposition {
    /// Monotonic per-project id, e.g. `P001`. Never reused.
    pub id: String,
    pub factor: String,
    pub mechanism: String,
    pub outcome: String,
    /// In [0, 1]; produced by the last reconciliation.
    #[serde(default)]
    pub confidence: f64,
    #[serde(default = "default_status")]
    pub status: PropositionStatus,
    #[serde(default)]
    pub supporting_evidence: Vec<String>,
    #[serde(default)]
    pub contradicting_evidence: Vec<String>,
    /// Interview ordinal at which this proposition was born.
    #[serde(default)]
    pub first_seen_interview: u32,
    /// Interview ordinal of the last evidence-set change.
    #[serde(default)]
    pub last_updated_interview: u32,
    /// Consecutive interviews since the evidence sets last grew.
    #[serde(default)]
    pub interviews_without_new_evidence: u32,
    /// Set iff `status == Merged`: the live proposition that absorbed this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_into: Option<String>,
}

fn default_status() -> PropositionStatus {
    PropositionStatus::Untested
}

impl Proposition {
    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }

    /// One-line rendering used in prompts and logs.
    pub fn summary(&self) -> String {
        format!(
            "{}: {} -> {} -> {} [{:?}, {:.2}]",
            self.id, self.factor, self.mechanism, self.outcome, self.status, self.confidence
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&PropositionStatus::Saturated).unwrap(),
            "\"saturated\""
        );
        let status: PropositionStatus = serde_json::from_str("\"challenged\"").unwrap();
        assert_eq!(status, PropositionStatus::Challenged);
    }

    #[test]
    fn liveness_excludes_weak_and_merged() {
        assert!(PropositionStatus::Untested.is_live());
        assert!(PropositionStatus::Challenged.is_live());
        assert!(!PropositionStatus::Weak.is_live());
        assert!(!PropositionStatus::Merged.is_live());
    }

    #[test]
    fn active_statuses_exclude_untested() {
        assert!(!PropositionStatus::Untested.is_active());
        assert!(PropositionStatus::Exploring.is_active());
        assert!(PropositionStatus::Saturated.is_active());
        assert!(!PropositionStatus::Merged.is_active());
    }
}
