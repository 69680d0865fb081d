//! Project state: the unit of ownership, locking, and persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::evidence::Evidence;
use crate::interview::Interview;
use crate::proposition::Proposition;
use crate::script::{InterviewScript, Mode};

/// Convergence metrics computed at the last reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMetrics {
    pub convergence_score: f64,
    pub novelty_rate: f64,
    pub mode: Mode,
}

impl Default for ProjectMetrics {
    fn default() -> Self {
        Self {
            convergence_score: 0.0,
            novelty_rate: 1.0,
            mode: Mode::Divergent,
        }
    }
}

/// Monotonic id allocators, bumped only at commit time under the project
/// lock. Stored explicitly so an id is never reused, even after deletions.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct IdCounters {
    pub evidence: u32,
    pub proposition: u32,
    pub interview: u32,
}

impl IdCounters {
    pub fn next_evidence(&mut self) -> String {
        self.evidence += 1;
        format!("E{:03}", self.evidence)
    }

    pub fn next_proposition(&mut self) -> String {
        self.proposition += 1;
        format!("P{:03}", self.proposition)
    }

    pub fn next_interview(&mut self) -> String {
        self.interview += 1;
        format!("INT_{:03}", self.interview)
    }
}

/// Everything the engine knows about one research project.
///
/// The four collections are the only shared state in the system; every
/// mutation flows through the Reconciler while the per-project pipeline
/// lock is held.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectState {
    pub id: String,
    pub research_question: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub seed_angles: Vec<String>,
    /// External voice-runtime agent bound to this project, if any.
    #[serde(default)]
    pub voice_agent_id: Option<String>,

    #[serde(default)]
    pub evidence: Vec<Evidence>,
    #[serde(default)]
    pub propositions: Vec<Proposition>,
    #[serde(default)]
    pub interviews: Vec<Interview>,
    #[serde(default)]
    pub scripts: Vec<InterviewScript>,

    #[serde(default)]
    pub metrics: ProjectMetrics,
    #[serde(default)]
    pub counters: IdCounters,

    /// True when the newest script is persisted but not yet accepted by the
    /// voice runtime.
    #[serde(default)]
    pub publish_pending: bool,
    #[serde(default)]
    pub publish_pending_version: Option<u32>,
    #[serde(default)]
    pub last_publish_at: Option<DateTime<Utc>>,
}

impl ProjectState {
    pub fn new(id: &str, research_question: &str, seed_angles: Vec<String>) -> Self {
        Self {
            id: id.to_string(),
            research_question: research_question.to_string(),
            created_at: Utc::now(),
            seed_angles,
            voice_agent_id: None,
            evidence: Vec::new(),
            propositions: Vec::new(),
            interviews: Vec::new(),
            scripts: Vec::new(),
            metrics: ProjectMetrics::default(),
            counters: IdCounters::default(),
            publish_pending: false,
            publish_pending_version: None,
            last_publish_at: None,
        }
    }

    /// Latest published script, if any.
    pub fn current_script(&self) -> Option<&InterviewScript> {
        self.scripts.last()
    }

    pub fn live_propositions(&self) -> impl Iterator<Item = &Proposition> {
        self.propositions.iter().filter(|p| p.is_live())
    }

    pub fn proposition(&self, id: &str) -> Option<&Proposition> {
        self.propositions.iter().find(|p| p.id == id)
    }

    pub fn proposition_mut(&mut self, id: &str) -> Option<&mut Proposition> {
        self.propositions.iter_mut().find(|p| p.id == id)
    }

    pub fn evidence_item(&self, id: &str) -> Option<&Evidence> {
        self.evidence.iter().find(|e| e.id == id)
    }

    /// The Interview store doubles as the webhook idempotency key set: a
    /// conversation counts as processed the moment its interview record is
    /// committed, whatever later stages do.
    pub fn has_processed(&self, conversation_id: &str) -> bool {
        self.interviews
            .iter()
            .any(|i| i.conversation_id == conversation_id)
    }

    /// Ordinal of the interview currently being ingested (1-based).
    pub fn interview_ordinal(&self) -> u32 {
        self.counters.interview
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_format_and_grow() {
        let mut counters = IdCounters::default();
        assert_eq!(counters.next_evidence(), "E001");
        assert_eq!(counters.next_evidence(), "E002");
        assert_eq!(counters.next_proposition(), "P001");
        assert_eq!(counters.next_interview(), "INT_001");
        assert_eq!(counters.next_interview(), "INT_002");
    }

    #[test]
    fn counters_survive_roundtrip() {
        let mut project = ProjectState::new("demo", "why?", vec![]);
        project.counters.next_evidence();
        project.counters.next_evidence();
        let json = serde_json::to_string(&project).unwrap();
        let back: ProjectState = serde_json::from_value(serde_json::from_str(&json).unwrap()).unwrap();
        let mut counters = back.counters;
        assert_eq!(counters.next_evidence(), "E003");
    }
}
