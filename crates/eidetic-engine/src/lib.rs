//! The Eidetic engine: everything between a delivered transcript and a
//! published script.
//!
//! ```text
//! transcript ──► Pipeline ──► Analyst ──► Reconciler ──► Store
//!                   │                          │
//!                   │                          └──► Event Bus ──► subscribers
//!                   └──► Designer ──► voice runtime (prompt update)
//! ```
//!
//! The stores are the only shared state; all mutation passes through the
//! [`reconcile`](reconcile::reconcile) step while the per-project pipeline
//! lock is held.

pub mod events;
pub mod pipeline;
pub mod reconcile;
pub mod voice;

pub use events::{EventBus, ProjectEvent};
pub use pipeline::{IngestOutcome, Pipeline};
pub use reconcile::{reconcile, ReconcileConfig, ReconcileOutcome};
pub use voice::{
    parse_transcript_payload, verify_signature, IncomingTranscript, ScriptPublisher,
    VoiceRuntimeClient,
};
