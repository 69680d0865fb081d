//! The Synthesizer: writes the final research report.

use std::sync::Arc;

use eidetic_core::{LlmError, ProjectState};
use serde_json::json;

use crate::llm::{ChatMessage, ChatModel, ChatParams};
use crate::prompts;

pub struct SynthesizerAgent {
    llm: Arc<dyn ChatModel>,
    temperature: f64,
}

impl SynthesizerAgent {
    pub fn new(llm: Arc<dyn ChatModel>, temperature: f64) -> Self {
        Self { llm, temperature }
    }

    /// Produce a markdown report over the whole project state.
    ///
    /// Weak propositions are included in the payload on purpose: the report
    /// carries them in its appendix.
    pub async fn synthesize(&self, project: &ProjectState) -> Result<String, LlmError> {
        let payload = json!({
            "research_question": &project.research_question,
            "evidence": &project.evidence,
            "propositions": &project.propositions,
            "metrics": &project.metrics,
            "interviews": project.interviews.len(),
            "script_versions": project.scripts.len(),
        });

        self.llm
            .chat(
                &[
                    ChatMessage::system(prompts::SYNTHESIZER_SYSTEM),
                    ChatMessage::user(payload.to_string()),
                ],
                ChatParams {
                    temperature: self.temperature,
                    max_tokens: 4096,
                    json_mode: false,
                },
            )
            .await
    }
}
