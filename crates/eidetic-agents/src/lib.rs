//! LLM-backed agents.
//!
//! Three agents share one oracle and nothing else:
//!
//! - [`DesignerAgent`] authors interview scripts from the current stores,
//! - [`AnalystAgent`] turns one transcript into a proposed knowledge diff,
//! - [`SynthesizerAgent`] writes the final report.
//!
//! Each has a narrow operation surface (a capability set, not a class
//! hierarchy). The oracle seam is the [`ChatModel`](llm::ChatModel) trait so
//! tests can script responses without a network.
//!
//! [`ScriptSafetyGuard`](script_safety::ScriptSafetyGuard) sits between the
//! Designer and publication: it strips respondent memory and topic drift
//! from generated scripts before the voice runtime ever sees them.

pub mod analyst;
pub mod designer;
pub mod llm;
pub mod prompts;
pub mod script_safety;
pub mod synthesizer;

pub use analyst::AnalystAgent;
pub use designer::DesignerAgent;
pub use llm::{ChatMessage, ChatModel, ChatParams, HttpChatModel};
pub use script_safety::{SafetyOutcome, SafetyStatus, ScriptSafetyGuard};
pub use synthesizer::SynthesizerAgent;
