//! The Analyst's output: a proposed diff over the knowledge base.
//!
//! The Analyst is a pure function of its inputs and never assigns real
//! identifiers. New objects carry symbolic refs (`e#1`, `p#2`); the
//! Reconciler resolves them against freshly allocated ids at commit time.

use serde::{Deserialize, Serialize};

use crate::proposition::PropositionStatus;

/// How one evidence item bears on one proposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relationship {
    Supports,
    Contradicts,
}

/// A drafted evidence item; id-less until the Reconciler commits it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceDraft {
    /// Analyst-side placeholder, e.g. `e#1`.
    pub symbol: String,
    pub quote: String,
    pub interpretation: String,
    pub factor: String,
    pub mechanism: String,
    pub outcome: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub quote_english: Option<String>,
}

/// A drafted proposition born from orphan evidence or a cross-evidence
/// pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropositionDraft {
    /// Analyst-side placeholder, e.g. `p#1`.
    pub symbol: String,
    pub factor: String,
    pub mechanism: String,
    pub outcome: String,
    /// Provisional status hint; the Reconciler recomputes the real one.
    #[serde(default)]
    pub status: Option<PropositionStatus>,
    /// Evidence refs (symbols or committed ids) that support the draft.
    #[serde(default)]
    pub supporting_refs: Vec<String>,
    #[serde(default)]
    pub contradicting_refs: Vec<String>,
}

/// Classification of one evidence ref against one proposition ref.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceMapping {
    /// `E042` or a draft symbol `e#3`.
    pub evidence_ref: String,
    /// `P007` or a draft symbol `p#1`.
    pub proposition_ref: String,
    pub relationship: Relationship,
}

/// Two live propositions whose supporting sets overlap enough to fuse.
///
/// The Analyst authors the unified text; the Reconciler verifies the
/// Jaccard threshold and performs the actual fusion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeProposal {
    pub source_ids: Vec<String>,
    pub factor: String,
    pub mechanism: String,
    pub outcome: String,
}

/// A strict specialization folded into its generalization: the specialized
/// proposition's support is unioned into the general one, and the
/// specialization becomes `merged`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubsumeProposal {
    pub specialized_id: String,
    pub general_id: String,
}

/// Everything the Analyst proposes for one interview, in symbolic form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisDiff {
    #[serde(default)]
    pub new_evidence: Vec<EvidenceDraft>,
    /// New evidence classified against pre-existing live propositions.
    #[serde(default)]
    pub mappings: Vec<EvidenceMapping>,
    #[serde(default)]
    pub new_propositions: Vec<PropositionDraft>,
    /// Pre-existing evidence re-classified against newborn propositions.
    #[serde(default)]
    pub retroactive_mappings: Vec<EvidenceMapping>,
    #[serde(default)]
    pub merges: Vec<MergeProposal>,
    #[serde(default)]
    pub subsumes: Vec<SubsumeProposal>,
    /// Proposition ids the Analyst considers prune candidates.
    #[serde(default)]
    pub prunes: Vec<String>,
}

impl AnalysisDiff {
    /// A diff whose only payload is extracted evidence. Used when the rest
    /// of a diff is rejected: raw observations are still worth keeping.
    pub fn evidence_only(self) -> AnalysisDiff {
        AnalysisDiff {
            new_evidence: self.new_evidence,
            ..AnalysisDiff::default()
        }
    }
}
