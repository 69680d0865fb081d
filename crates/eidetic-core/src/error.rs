//! Error taxonomy shared across the workspace.
//!
//! Nothing here is fatal to the service: every variant maps to a policy
//! (retry, degrade, record-and-continue) applied by the pipeline.

use thiserror::Error;

/// Failures of the LLM oracle.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Transport-level failure (network, rate limit, 5xx) after the retry
    /// budget. Retryable at the ingestion level.
    #[error("LLM unavailable: {0}")]
    Unavailable(String),
    /// The model never produced parseable JSON within the retry budget.
    #[error("LLM returned malformed JSON after {attempts} attempts: {detail}")]
    Format { attempts: u32, detail: String },
}

/// Failures of the durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("project '{0}' not found")]
    NotFound(String),
    #[error("project '{0}' already exists")]
    AlreadyExists(String),
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Failures publishing a script to the external voice runtime.
#[derive(Debug, Error)]
#[error("script publication failed: {0}")]
pub struct PublishError(pub String);

/// An Analyst diff that violates store invariants.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("dangling reference '{reference}' in {context}")]
    DanglingReference { reference: String, context: String },
    #[error("evidence '{evidence_id}' appears in both support and contradiction of '{proposition_id}'")]
    SupportContradictOverlap {
        evidence_id: String,
        proposition_id: String,
    },
    #[error("merge proposal references non-live proposition '{0}'")]
    MergeOnDeadProposition(String),
}

/// Webhook intake failures, each carrying its HTTP-equivalent status.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("invalid webhook signature")]
    InvalidSignature,
    #[error("invalid webhook payload: {0}")]
    InvalidPayload(String),
    #[error("no project owns agent '{0}'")]
    UnknownProject(String),
}

/// Top-level ingestion failures surfaced by the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("analysis failed for {interview_id}: {detail}")]
    AnalysisFailed { interview_id: String, detail: String },
    #[error("ingestion exceeded its {budget_secs}s budget")]
    BudgetExceeded { budget_secs: u64 },
}
