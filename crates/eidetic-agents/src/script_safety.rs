//! Output-side safety guard for Designer scripts.
//!
//! Scripts are authored from accumulated evidence, so the model sometimes
//! leaks respondent memory into questions ("earlier you mentioned...") or
//! drifts into topics outside the research question ("your tech stack").
//! The voice runtime consumes the rendered script verbatim and interviews a
//! *different* respondent each time, so both leaks must be caught before
//! publication: personal references are rewritten into aggregate phrasing
//! and drifted questions are redirected back to the research question.

use std::collections::{HashMap, HashSet};

use eidetic_core::{
    InterviewScript, Proposition, ScriptSection, SectionInstruction, SectionPriority,
};
use regex::Regex;

/// A single flagged field, kept for logging and the changes summary.
#[derive(Debug, Clone)]
pub struct ScriptViolation {
    pub section_index: Option<usize>,
    pub field: String,
    pub reason: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyStatus {
    /// Script was already safe; returned unchanged.
    Ok,
    /// Violations found and rewritten in place.
    Sanitized,
    /// Nothing salvageable; a minimal safe script was substituted.
    Fallback,
}

impl SafetyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SafetyStatus::Ok => "ok",
            SafetyStatus::Sanitized => "sanitized",
            SafetyStatus::Fallback => "fallback",
        }
    }
}

#[derive(Debug)]
pub struct SafetyOutcome {
    pub script: InterviewScript,
    pub status: SafetyStatus,
    pub violations: Vec<ScriptViolation>,
    pub topic_redirect_applied: bool,
}

pub struct ScriptSafetyGuard {
    personal: Vec<Regex>,
    drift: Vec<Regex>,
    replacements: Vec<(Regex, &'static str)>,
}

impl Default for ScriptSafetyGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptSafetyGuard {
    pub fn new() -> Self {
        let compile = |patterns: &[&str]| {
            patterns
                .iter()
                .map(|p| Regex::new(p).expect("static safety pattern"))
                .collect()
        };
        Self {
            personal: compile(&[
                r"(?i)\bearlier\s+you\s+mentioned\b",
                r"(?i)\byou\s+(said|told|described|shared|mentioned)\b",
                r"(?i)\bas\s+we\s+discussed\b",
                r"(?i)\bfrom\s+what\s+you\s+said\b",
            ]),
            drift: compile(&[
                r"(?i)\byour\s+project\b",
                r"(?i)\btech\s+stack\b",
                r"(?i)\bcodebase\b",
                r"(?i)\bimplementation\b",
                r"(?i)\bapi\s+integration\b",
                r"(?i)\binfrastructure\b",
            ]),
            replacements: vec![
                (
                    Regex::new(r"(?i)\bearlier,?\s+you\s+mentioned\b")
                        .expect("static safety pattern"),
                    "Some participants mentioned",
                ),
                (
                    Regex::new(r"(?i)\byou\s+(said|told|described|shared|mentioned)\b")
                        .expect("static safety pattern"),
                    "Some participants reported",
                ),
                (
                    Regex::new(r"(?i)\bas\s+we\s+discussed\b").expect("static safety pattern"),
                    "From previous interviews",
                ),
            ],
        }
    }

    /// Flag every field carrying a personal reference, without rewriting.
    pub fn validate(&self, script: &InterviewScript) -> Vec<ScriptViolation> {
        let mut violations = Vec::new();
        self.check_text(&script.opening_question, "opening_question", None, &mut violations);
        self.check_text(&script.closing_question, "closing_question", None, &mut violations);
        self.check_text(&script.wildcard, "wildcard", None, &mut violations);
        for (idx, section) in script.sections.iter().enumerate() {
            self.check_text(&section.main_question, "main_question", Some(idx), &mut violations);
            self.check_text(&section.context, "context", Some(idx), &mut violations);
            for (probe_idx, probe) in section.probes.iter().enumerate() {
                self.check_text(
                    probe,
                    &format!("probes[{probe_idx}]"),
                    Some(idx),
                    &mut violations,
                );
            }
        }
        violations
    }

    /// Rewrite the script until it is safe to publish. Returns the original
    /// untouched when nothing needed fixing.
    pub fn enforce(
        &self,
        script: &InterviewScript,
        research_question: &str,
        propositions: &[Proposition],
    ) -> SafetyOutcome {
        let violations = self.validate(script);
        let by_id: HashMap<&str, &Proposition> =
            propositions.iter().map(|p| (p.id.as_str(), p)).collect();
        let mut topic_redirect_applied = false;
        let mut script_changed = false;

        let mut safe_sections = Vec::new();
        for section in &script.sections {
            let proposition = by_id.get(section.proposition_id.as_str()).copied();
            let original_main = section.main_question.trim().to_string();

            let mut main_question = self.sanitize_text(&section.main_question);
            if self.has_personal_reference(&main_question) || main_question.is_empty() {
                main_question = fallback_question(proposition, research_question);
            }
            if self.is_topic_drift(&main_question, research_question) {
                main_question = topic_redirect_question(research_question);
                topic_redirect_applied = true;
            }

            let mut probes: Vec<String> = Vec::new();
            for probe in section.probes.iter().take(3) {
                let mut cleaned = self.sanitize_text(probe);
                if cleaned.is_empty() {
                    continue;
                }
                if self.is_topic_drift(&cleaned, research_question) {
                    cleaned = topic_redirect_probe();
                    topic_redirect_applied = true;
                }
                if !probes.contains(&cleaned) {
                    probes.push(cleaned);
                }
            }
            if probes.is_empty() {
                probes = default_probes();
            }

            // The context is always replaced with an aggregate framing; it
            // is the field most likely to quote respondent detail.
            let context = safe_context(&section.proposition_id, proposition);
            if main_question != original_main
                || context != section.context.trim()
                || probes.iter().map(String::as_str).ne(
                    section.probes.iter().take(3).map(|p| p.as_str()),
                )
            {
                script_changed = true;
            }

            safe_sections.push(ScriptSection {
                proposition_id: section.proposition_id.clone(),
                priority: section.priority,
                instruction: section.instruction,
                main_question,
                probes,
                context,
            });
        }

        let mut safe_opening = self.sanitize_text(&script.opening_question);
        if self.has_personal_reference(&safe_opening) || safe_opening.is_empty() {
            safe_opening = default_opening(research_question);
        }
        let mut safe_closing = self.sanitize_text(&script.closing_question);
        if self.has_personal_reference(&safe_closing) || safe_closing.is_empty() {
            safe_closing = default_closing();
        }
        let mut safe_wildcard = self.sanitize_text(&script.wildcard);
        if self.has_personal_reference(&safe_wildcard) || safe_wildcard.is_empty() {
            safe_wildcard = "Is there anything else about your experience with this research \
                             topic that we should capture?"
                .to_string();
        }

        if safe_opening != script.opening_question.trim()
            || safe_closing != script.closing_question.trim()
            || safe_wildcard != script.wildcard.trim()
        {
            script_changed = true;
        }

        let mut status = SafetyStatus::Ok;
        if !violations.is_empty() {
            status = if safe_sections.is_empty() {
                SafetyStatus::Fallback
            } else {
                SafetyStatus::Sanitized
            };
        }
        if safe_sections.is_empty() {
            safe_sections.push(ScriptSection {
                proposition_id: "P000".to_string(),
                priority: SectionPriority::High,
                instruction: SectionInstruction::Explore,
                main_question: default_opening(research_question),
                probes: default_probes(),
                context: "Fallback section generated by safety guard".to_string(),
            });
            status = SafetyStatus::Fallback;
            script_changed = true;
        }

        if !script_changed && violations.is_empty() && !topic_redirect_applied {
            return SafetyOutcome {
                script: script.clone(),
                status: SafetyStatus::Ok,
                violations,
                topic_redirect_applied: false,
            };
        }

        let mut safe_script = script.clone();
        safe_script.opening_question = safe_opening;
        safe_script.sections = safe_sections;
        safe_script.closing_question = safe_closing;
        safe_script.wildcard = safe_wildcard;

        SafetyOutcome {
            script: safe_script,
            status,
            violations,
            topic_redirect_applied,
        }
    }

    fn check_text(
        &self,
        text: &str,
        field: &str,
        section_index: Option<usize>,
        violations: &mut Vec<ScriptViolation>,
    ) {
        let value = text.trim();
        if value.is_empty() {
            return;
        }
        if self.personal.iter().any(|p| p.is_match(value)) {
            violations.push(ScriptViolation {
                section_index,
                field: field.to_string(),
                reason: "personal_reference",
                value: value.to_string(),
            });
        }
    }

    fn sanitize_text(&self, text: &str) -> String {
        let mut value = text.trim().to_string();
        if value.is_empty() {
            return value;
        }
        for (pattern, replacement) in &self.replacements {
            value = pattern.replace_all(&value, *replacement).into_owned();
        }
        value.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn has_personal_reference(&self, text: &str) -> bool {
        self.personal.iter().any(|p| p.is_match(text))
    }

    /// Drift only counts when the text shares almost no vocabulary with the
    /// research question; a question that stays on topic may mention an
    /// otherwise suspicious term.
    fn is_topic_drift(&self, text: &str, research_question: &str) -> bool {
        let rq_tokens = tokenize(research_question);
        if !rq_tokens.is_empty() && jaccard(&rq_tokens, &tokenize(text)) >= 0.18 {
            return false;
        }
        self.drift.iter().any(|p| p.is_match(text))
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| t.len() > 2)
        .map(str::to_string)
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

fn topic_redirect_question(research_question: &str) -> String {
    format!("Could you connect this back to the main research question: '{research_question}'?")
}

fn topic_redirect_probe() -> String {
    "How did this influence your experience with the core research topic?".to_string()
}

fn fallback_question(proposition: Option<&Proposition>, research_question: &str) -> String {
    match proposition {
        None => default_opening(research_question),
        Some(p) => format!(
            "How did {} influence your experience with this topic, and what outcomes did it create?",
            p.factor.to_lowercase()
        ),
    }
}

fn safe_context(proposition_id: &str, proposition: Option<&Proposition>) -> String {
    match proposition {
        None => format!(
            "Explore proposition {proposition_id} in aggregate, without respondent-specific references."
        ),
        Some(p) => format!(
            "Aggregate focus for {proposition_id}: {} -> {} -> {}. Keep wording respondent-agnostic.",
            p.factor, p.mechanism, p.outcome
        ),
    }
}

fn default_opening(research_question: &str) -> String {
    format!("Could you describe your experience related to this research question: '{research_question}'?")
}

fn default_closing() -> String {
    "Before we end, what was the most important part of your experience related to this research question?"
        .to_string()
}

fn default_probes() -> Vec<String> {
    vec![
        "Can you give a concrete example related to this topic?".to_string(),
        "What impact did this have on your experience?".to_string(),
        "Did this change over time?".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use eidetic_core::{Mode, PropositionStatus};

    fn proposition(id: &str, factor: &str) -> Proposition {
        Proposition {
            id: id.to_string(),
            factor: factor.to_string(),
            mechanism: "Rule constraints".to_string(),
            outcome: "Collaboration quality".to_string(),
            confidence: 0.4,
            status: PropositionStatus::Exploring,
            supporting_evidence: Vec::new(),
            contradicting_evidence: Vec::new(),
            first_seen_interview: 1,
            last_updated_interview: 1,
            interviews_without_new_evidence: 0,
            merged_into: None,
        }
    }

    fn script(sections: Vec<ScriptSection>) -> InterviewScript {
        InterviewScript {
            version: 2,
            generated_after_interview: None,
            research_question: "What is your experience with this hackathon so far?".to_string(),
            opening_question: "How is your experience with this hackathon so far?".to_string(),
            sections,
            closing_question: "Anything else?".to_string(),
            wildcard: "Any final notes?".to_string(),
            mode: Mode::Divergent,
            convergence_score: 0.0,
            novelty_rate: 1.0,
            changes_summary: String::new(),
        }
    }

    #[test]
    fn detects_and_sanitizes_personal_references() {
        let guard = ScriptSafetyGuard::new();
        let mut leaky = script(vec![ScriptSection {
            proposition_id: "P001".to_string(),
            priority: SectionPriority::High,
            instruction: SectionInstruction::Challenge,
            main_question: "Earlier, you mentioned working alone. How did that feel?".to_string(),
            probes: vec![
                "You said the team rules were unclear. Can you explain?".to_string(),
                "As we discussed, what happened next?".to_string(),
            ],
            context: "Earlier you mentioned burnout and team conflict in detail.".to_string(),
        }]);
        leaky.opening_question =
            "Earlier you mentioned some difficulties. Can we continue?".to_string();
        leaky.closing_question = "From what you said, what was hardest?".to_string();
        leaky.wildcard = "Anything else you told me before?".to_string();

        let propositions = vec![proposition("P001", "Team formation dynamics")];
        let outcome = guard.enforce(
            &leaky,
            "What is your experience with this hackathon so far?",
            &propositions,
        );

        assert!(matches!(
            outcome.status,
            SafetyStatus::Sanitized | SafetyStatus::Fallback
        ));
        assert!(!outcome.violations.is_empty());
        assert!(!outcome.script.opening_question.to_lowercase().contains("you mentioned"));
        let section = &outcome.script.sections[0];
        assert!(!section.main_question.to_lowercase().contains("you mentioned"));
        assert!(!section.probes[0].to_lowercase().contains("you said"));
        assert!(!outcome.script.closing_question.to_lowercase().contains("you said"));
    }

    #[test]
    fn redirects_topic_drift_to_research_question() {
        let guard = ScriptSafetyGuard::new();
        let drifted = script(vec![ScriptSection {
            proposition_id: "P001".to_string(),
            priority: SectionPriority::High,
            instruction: SectionInstruction::Explore,
            main_question: "Tell me about your project implementation and tech stack decisions."
                .to_string(),
            probes: vec!["What frameworks did you choose for your codebase?".to_string()],
            context: "Technical implementation details".to_string(),
        }]);
        let propositions = vec![proposition("P001", "Project constraints")];

        let outcome = guard.enforce(
            &drifted,
            "What is your experience with this hackathon so far?",
            &propositions,
        );

        assert!(outcome.topic_redirect_applied);
        assert!(outcome.script.sections[0]
            .main_question
            .to_lowercase()
            .contains("hackathon"));
    }

    #[test]
    fn clean_script_passes_unchanged() {
        let guard = ScriptSafetyGuard::new();
        let clean = script(vec![ScriptSection {
            proposition_id: "P001".to_string(),
            priority: SectionPriority::High,
            instruction: SectionInstruction::Explore,
            main_question: "How did the hackathon deadline shape your experience?".to_string(),
            probes: vec!["Can you give a concrete example?".to_string()],
            context: "Aggregate focus for P001: Team formation dynamics -> Rule constraints -> Collaboration quality. Keep wording respondent-agnostic.".to_string(),
        }]);
        let propositions = vec![proposition("P001", "Team formation dynamics")];

        let outcome = guard.enforce(
            &clean,
            "What is your experience with this hackathon so far?",
            &propositions,
        );
        assert_eq!(outcome.status, SafetyStatus::Ok);
        assert!(!outcome.topic_redirect_applied);
        assert!(outcome.violations.is_empty());
        assert_eq!(outcome.script.sections[0].main_question, clean.sections[0].main_question);
        assert_eq!(outcome.script.sections[0].context, clean.sections[0].context);
    }

    #[test]
    fn empty_sections_get_safety_fallback() {
        let guard = ScriptSafetyGuard::new();
        let mut bare = script(vec![]);
        bare.opening_question = "You said everything already.".to_string();

        let outcome = guard.enforce(&bare, "What shapes the experience?", &[]);
        assert_eq!(outcome.status, SafetyStatus::Fallback);
        assert_eq!(outcome.script.sections.len(), 1);
        assert_eq!(outcome.script.sections[0].proposition_id, "P000");
    }
}
