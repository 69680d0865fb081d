//! Eidetic core: the data model of an autonomous qualitative-research engine.
//!
//! A research project is a single research question plus four persistent
//! collections:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        ProjectState                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Evidence      append-only observations mined from           │
//! │                interview transcripts                         │
//! │  Propositions  mutable causal claims (factor → mechanism →   │
//! │                outcome) aggregated from evidence             │
//! │  Interviews    raw transcripts + ingestion bookkeeping       │
//! │  Scripts       immutable, versioned interview guides         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! This crate holds the serde-backed types shared by every other crate,
//! the [`AnalysisDiff`](analysis::AnalysisDiff) produced by the Analyst,
//! runtime [`Settings`](config::Settings), and the error taxonomy. It has
//! no I/O of its own.

pub mod analysis;
pub mod config;
pub mod error;
pub mod evidence;
pub mod interview;
pub mod project;
pub mod proposition;
pub mod script;

pub use analysis::{
    AnalysisDiff, EvidenceDraft, EvidenceMapping, MergeProposal, PropositionDraft, Relationship,
    SubsumeProposal,
};
pub use config::{AgentModel, Settings};
pub use error::{LlmError, PipelineError, PublishError, ReconcileError, StoreError, WebhookError};
pub use evidence::{Evidence, TranslationStatus};
pub use interview::Interview;
pub use project::{IdCounters, ProjectMetrics, ProjectState};
pub use proposition::{Proposition, PropositionStatus};
pub use script::{InterviewScript, Mode, ScriptSection, SectionInstruction, SectionPriority};
