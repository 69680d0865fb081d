//! Runtime configuration, loaded from the environment.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Per-agent LLM tuning. Designer, Analyst, and Synthesizer may run on
/// different models and temperatures against the same endpoint.
#[derive(Debug, Clone)]
pub struct AgentModel {
    pub model: String,
    pub temperature: f64,
}

/// Recognized options and their effects. Defaults follow the engine's
/// documented thresholds; every value can be overridden via environment
/// variables of the same (upper-cased) name.
#[derive(Debug, Clone)]
pub struct Settings {
    pub listen: SocketAddr,
    pub data_dir: PathBuf,
    pub default_project_id: String,

    pub llm_api_key: String,
    pub llm_api_base: String,
    pub llm_timeout_secs: u64,
    pub llm_max_retries: u32,
    pub llm_backoff_ms: u64,

    pub designer: AgentModel,
    pub analyst: AgentModel,
    pub synthesizer: AgentModel,

    pub voice_api_key: String,
    pub voice_api_base: String,
    pub webhook_secret: String,
    pub webhook_tolerance_secs: i64,

    /// Mode gate: convergent requires score >= this.
    pub convergence_score_threshold: f64,
    /// Mode gate: convergent requires novelty <= this.
    pub novelty_rate_threshold: f64,
    /// Jaccard threshold on supporting-evidence sets for merges.
    pub merge_overlap_threshold: f64,
    pub prune_confidence_threshold: f64,
    pub prune_min_interviews: u32,
    /// Script section cap.
    pub max_propositions_in_script: usize,
    /// Advisory only; surfaced in the interviewer prompt.
    pub max_interview_duration_minutes: u32,

    /// Wall-clock budget for one transcript ingestion.
    pub ingest_budget_secs: u64,
    /// Bounded per-subscriber event backlog.
    pub event_backlog: usize,
}

fn env_str(name: &str, default: &str) -> String {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => v,
        _ => default.to_string(),
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Settings {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let base_model = env_str("LLM_MODEL", "mistral-large-latest");
        let agent = |model_var: &str, temp_var: &str, default_temp: f64| AgentModel {
            model: env_str(model_var, &base_model),
            temperature: env_parse(temp_var, default_temp),
        };

        Self {
            listen: env_parse("LISTEN_ADDR", SocketAddr::from(([127, 0, 0, 1], 8000))),
            data_dir: PathBuf::from(env_str("DATA_DIR", "./data/projects")),
            default_project_id: env_str("DEFAULT_PROJECT_ID", "default"),

            llm_api_key: env_str("LLM_API_KEY", ""),
            llm_api_base: env_str("LLM_API_BASE", "https://api.mistral.ai/v1"),
            llm_timeout_secs: env_parse("LLM_TIMEOUT_SECONDS", 45),
            llm_max_retries: env_parse("LLM_MAX_RETRIES", 3),
            llm_backoff_ms: env_parse("LLM_RETRY_BACKOFF_MS", 800),

            designer: agent("DESIGNER_MODEL", "DESIGNER_TEMPERATURE", 0.7),
            analyst: agent("ANALYST_MODEL", "ANALYST_TEMPERATURE", 0.3),
            synthesizer: agent("SYNTHESIZER_MODEL", "SYNTHESIZER_TEMPERATURE", 0.5),

            voice_api_key: env_str("VOICE_API_KEY", ""),
            voice_api_base: env_str("VOICE_API_BASE", "https://api.elevenlabs.io/v1"),
            webhook_secret: env_str("WEBHOOK_SECRET", ""),
            webhook_tolerance_secs: env_parse("WEBHOOK_SIGNATURE_TOLERANCE_SECONDS", 300),

            convergence_score_threshold: env_parse("CONVERGENCE_SCORE_THRESHOLD", 0.6),
            novelty_rate_threshold: env_parse("NOVELTY_RATE_THRESHOLD", 0.15),
            merge_overlap_threshold: env_parse("MERGE_OVERLAP_THRESHOLD", 0.6),
            prune_confidence_threshold: env_parse("PRUNE_CONFIDENCE_THRESHOLD", 0.15),
            prune_min_interviews: env_parse("PRUNE_MIN_INTERVIEWS", 3),
            max_propositions_in_script: env_parse("MAX_PROPOSITIONS_IN_SCRIPT", 8),
            max_interview_duration_minutes: env_parse("MAX_INTERVIEW_DURATION_MINUTES", 10),

            ingest_budget_secs: env_parse("INGEST_BUDGET_SECONDS", 300),
            event_backlog: env_parse("EVENT_BACKLOG", 256),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_thresholds() {
        let settings = Settings::from_env();
        assert_eq!(settings.convergence_score_threshold, 0.6);
        assert_eq!(settings.novelty_rate_threshold, 0.15);
        assert_eq!(settings.merge_overlap_threshold, 0.6);
        assert_eq!(settings.prune_confidence_threshold, 0.15);
        assert_eq!(settings.prune_min_interviews, 3);
        assert_eq!(settings.max_propositions_in_script, 8);
    }
}
