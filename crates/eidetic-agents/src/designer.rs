//! The Designer: authors and evolves interview scripts.
//!
//! The LLM authors questions; this module owns the script contract. Whatever
//! the model returns is normalized until it satisfies the published
//! invariants: at most one section per live proposition, instruction derived
//! from proposition state, section cap enforced with a fixed drop order, and
//! a closing and wildcard question always present.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use eidetic_core::{
    InterviewScript, LlmError, ProjectMetrics, ProjectState, Proposition, PropositionStatus,
    ScriptSection, SectionInstruction, SectionPriority,
};
use serde_json::{json, Value};
use tracing::info;

use crate::llm::{ChatMessage, ChatModel, ChatParams};
use crate::prompts;

pub struct DesignerAgent {
    llm: Arc<dyn ChatModel>,
    temperature: f64,
    max_sections: usize,
    max_duration_minutes: u32,
}

impl DesignerAgent {
    pub fn new(
        llm: Arc<dyn ChatModel>,
        temperature: f64,
        max_sections: usize,
        max_duration_minutes: u32,
    ) -> Self {
        Self {
            llm,
            temperature,
            max_sections,
            max_duration_minutes,
        }
    }

    // ========================================================================
    // Initial generation
    // ========================================================================

    /// Produce the seed propositions and script v1 for a new project.
    ///
    /// Propositions are renumbered `P001..` in order regardless of what the
    /// model chose; script sections are remapped accordingly. All sections
    /// are EXPLORE and every proposition starts `untested`.
    pub async fn generate_initial(
        &self,
        research_question: &str,
        seed_angles: &[String],
    ) -> Result<(Vec<Proposition>, InterviewScript), LlmError> {
        let payload = json!({
            "task": "Generate initial propositions and first interview script",
            "research_question": research_question,
            "seed_angles": seed_angles,
            "max_sections": self.max_sections,
        });
        let raw = self.call(&payload).await?;

        let mut renumbered = HashMap::new();
        let mut propositions = Vec::new();
        for item in raw
            .get("propositions")
            .or_else(|| raw.get("new_propositions"))
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let factor = text(item, "factor");
            let mechanism = text(item, "mechanism");
            let outcome = text(item, "outcome");
            if factor.is_empty() || mechanism.is_empty() || outcome.is_empty() {
                continue;
            }
            let id = format!("P{:03}", propositions.len() + 1);
            if let Some(model_id) = item.get("id").and_then(Value::as_str) {
                renumbered.insert(model_id.to_string(), id.clone());
            }
            propositions.push(Proposition {
                id,
                factor,
                mechanism,
                outcome,
                confidence: 0.0,
                status: PropositionStatus::Untested,
                supporting_evidence: Vec::new(),
                contradicting_evidence: Vec::new(),
                first_seen_interview: 0,
                last_updated_interview: 0,
                interviews_without_new_evidence: 0,
                merged_into: None,
            });
        }

        let script_raw = raw.get("script").filter(|v| v.is_object()).unwrap_or(&raw);
        let mut sections = parse_sections(script_raw, &renumbered);
        if sections.is_empty() {
            // Model gave propositions but no usable sections: build them.
            sections = propositions
                .iter()
                .enumerate()
                .map(|(idx, p)| minimal_section(p, idx == 0))
                .collect();
        }
        for section in &mut sections {
            section.instruction = SectionInstruction::Explore;
        }

        let known: HashMap<&str, &Proposition> =
            propositions.iter().map(|p| (p.id.as_str(), p)).collect();
        sections.retain(|s| known.contains_key(s.proposition_id.as_str()));
        let sections = dedupe_and_cap(sections, self.max_sections, &known);

        let script = self.assemble_script(
            script_raw,
            research_question,
            1,
            None,
            sections,
            &ProjectMetrics::default(),
            "Initial script".to_string(),
        );
        info!(
            propositions = propositions.len(),
            sections = script.sections.len(),
            "initial script generated"
        );
        Ok((propositions, script))
    }

    // ========================================================================
    // Script evolution
    // ========================================================================

    /// Produce script v(n+1) from the current stores. `previous` is absent
    /// only when initial generation never yielded a script.
    pub async fn update_script(
        &self,
        project: &ProjectState,
        previous: Option<&InterviewScript>,
    ) -> Result<InterviewScript, LlmError> {
        let mut live: Vec<&Proposition> = project.live_propositions().collect();
        // Falsification bias: challengeable claims lead, settled ones trail.
        live.sort_by(|a, b| {
            let rank = |p: &Proposition| match instruction_for(p) {
                SectionInstruction::Challenge => 0,
                SectionInstruction::Verify => 1,
                SectionInstruction::Explore => 2,
                SectionInstruction::Saturated => 3,
            };
            rank(a)
                .cmp(&rank(b))
                .then(
                    b.confidence
                        .partial_cmp(&a.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(b.last_updated_interview.cmp(&a.last_updated_interview))
        });

        let payload = json!({
            "task": "Update interview script based on current state",
            "research_question": &project.research_question,
            "propositions": &live,
            "evidence_briefing": evidence_briefing(project),
            "previous_script": previous,
            "metrics": &project.metrics,
            "max_sections": self.max_sections,
        });
        let raw = self.call(&payload).await?;

        let script_raw = raw.get("script").filter(|v| v.is_object()).unwrap_or(&raw);
        let mut sections = parse_sections(script_raw, &HashMap::new());

        let known: HashMap<&str, &Proposition> = live.iter().map(|p| (p.id.as_str(), *p)).collect();
        sections.retain(|s| known.contains_key(s.proposition_id.as_str()));
        for section in &mut sections {
            if let Some(p) = known.get(section.proposition_id.as_str()) {
                section.instruction = instruction_for(p);
            }
        }
        let sections = dedupe_and_cap(sections, self.max_sections, &known);

        let generated_after = project.interviews.last().map(|i| i.id.clone());
        Ok(self.assemble_script(
            script_raw,
            &project.research_question,
            previous.map(|p| p.version + 1).unwrap_or(1),
            generated_after,
            sections,
            &project.metrics,
            "Script updated".to_string(),
        ))
    }

    // ========================================================================
    // Prompt rendering
    // ========================================================================

    /// Render the interviewer prompt the voice runtime consumes verbatim.
    pub fn build_interviewer_prompt(&self, script: &InterviewScript) -> String {
        let mut topic_blocks = Vec::new();
        let mut probe_lines = Vec::new();
        for section in script.sections.iter().take(self.max_sections) {
            topic_blocks.push(format!(
                "### Topic [{}, priority: {}]\n- Main question: \"{}\"\n- Probes: {}\n- Context: {}",
                instruction_label(section.instruction),
                priority_label(section.priority).to_uppercase(),
                section.main_question,
                section.probes.join(" / "),
                section.context,
            ));
            probe_lines.push(format!(
                "- {}: {} ({})",
                section.proposition_id,
                instruction_label(section.instruction),
                priority_label(section.priority),
            ));
        }

        prompts::INTERVIEWER_BASE
            .replace(
                "{max_duration_minutes}",
                &self.max_duration_minutes.to_string(),
            )
            .replace("{opening_question}", &script.opening_question)
            .replace(
                "{propositions_and_questions}",
                &if topic_blocks.is_empty() {
                    "No active topics".to_string()
                } else {
                    topic_blocks.join("\n\n")
                },
            )
            .replace(
                "{probe_instructions}",
                &if probe_lines.is_empty() {
                    "- Explore emerging themes".to_string()
                } else {
                    probe_lines.join("\n")
                },
            )
            .replace("{closing_question}", &script.closing_question)
            .replace("{wildcard_question}", &script.wildcard)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn call(&self, payload: &Value) -> Result<Value, LlmError> {
        self.llm
            .chat_json(
                &[
                    ChatMessage::system(prompts::DESIGNER_SYSTEM),
                    ChatMessage::user(payload.to_string()),
                ],
                ChatParams {
                    temperature: self.temperature,
                    max_tokens: 4096,
                    json_mode: true,
                },
            )
            .await
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble_script(
        &self,
        raw: &Value,
        research_question: &str,
        version: u32,
        generated_after_interview: Option<String>,
        sections: Vec<ScriptSection>,
        metrics: &ProjectMetrics,
        default_summary: String,
    ) -> InterviewScript {
        InterviewScript {
            version,
            generated_after_interview,
            research_question: research_question.to_string(),
            opening_question: text_or(
                raw,
                "opening_question",
                "Could you share your overall experience so far?",
            ),
            sections,
            closing_question: text_or(
                raw,
                "closing_question",
                "What surprised you most about this experience?",
            ),
            wildcard: text_or(
                raw,
                "wildcard",
                "Is there anything important I have not asked about?",
            ),
            mode: metrics.mode,
            convergence_score: metrics.convergence_score,
            novelty_rate: metrics.novelty_rate,
            changes_summary: {
                let s = text(raw, "changes_summary");
                if s.is_empty() {
                    default_summary
                } else {
                    s
                }
            },
        }
    }
}

/// Instruction assignment rule, applied per proposition status.
///
/// Only called for live propositions; weak and merged never reach a script.
pub fn instruction_for(p: &Proposition) -> SectionInstruction {
    match p.status {
        PropositionStatus::Saturated => SectionInstruction::Saturated,
        PropositionStatus::Untested => SectionInstruction::Explore,
        _ if p.status == PropositionStatus::Exploring && p.supporting_evidence.len() < 2 => {
            SectionInstruction::Explore
        }
        _ if p.confidence > 0.7 => {
            let recent = p.interviews_without_new_evidence == 0;
            if !p.contradicting_evidence.is_empty() || recent {
                SectionInstruction::Challenge
            } else {
                SectionInstruction::Verify
            }
        }
        _ if p.confidence >= 0.4 => SectionInstruction::Verify,
        _ => SectionInstruction::Explore,
    }
}

/// One section per proposition, capped with the fixed drop order: SATURATED
/// sections go first, then VERIFY, and a CHALLENGE or EXPLORE section is
/// never dropped while any VERIFY or SATURATED remains; ties drop lowest
/// priority, then lowest confidence.
fn dedupe_and_cap(
    sections: Vec<ScriptSection>,
    cap: usize,
    known: &HashMap<&str, &Proposition>,
) -> Vec<ScriptSection> {
    let mut seen = HashSet::new();
    let mut kept: Vec<ScriptSection> = sections
        .into_iter()
        .filter(|s| seen.insert(s.proposition_id.clone()))
        .collect();

    while kept.len() > cap {
        let drop_idx = kept
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                let key = |s: &ScriptSection| {
                    let class = match s.instruction {
                        SectionInstruction::Saturated => 2,
                        SectionInstruction::Verify => 1,
                        SectionInstruction::Explore | SectionInstruction::Challenge => 0,
                    };
                    let confidence = known
                        .get(s.proposition_id.as_str())
                        .map(|p| p.confidence)
                        .unwrap_or(0.0);
                    (class, s.priority, -confidence)
                };
                key(a)
                    .partial_cmp(&key(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(idx, _)| idx);
        match drop_idx {
            Some(idx) => {
                kept.remove(idx);
            }
            None => break,
        }
    }
    kept
}

fn minimal_section(p: &Proposition, first: bool) -> ScriptSection {
    ScriptSection {
        proposition_id: p.id.clone(),
        priority: if first {
            SectionPriority::High
        } else {
            SectionPriority::Medium
        },
        instruction: SectionInstruction::Explore,
        main_question: format!("Could you tell me more about {}?", p.factor.to_lowercase()),
        probes: vec![
            "Can you give a concrete example?".to_string(),
            "What happened next?".to_string(),
        ],
        context: String::new(),
    }
}

fn parse_sections(raw: &Value, renumbered: &HashMap<String, String>) -> Vec<ScriptSection> {
    let mut out = Vec::new();
    for item in raw
        .get("sections")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let model_id = text(item, "proposition_id");
        if model_id.is_empty() {
            continue;
        }
        let proposition_id = renumbered.get(&model_id).cloned().unwrap_or(model_id);

        let priority = match text(item, "priority").to_lowercase().as_str() {
            "high" => SectionPriority::High,
            "low" => SectionPriority::Low,
            _ => SectionPriority::Medium,
        };
        let instruction = match text(item, "instruction").to_uppercase().as_str() {
            "VERIFY" => SectionInstruction::Verify,
            "CHALLENGE" => SectionInstruction::Challenge,
            "SATURATED" => SectionInstruction::Saturated,
            _ => SectionInstruction::Explore,
        };
        let mut probes: Vec<String> = item
            .get("probes")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str())
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        probes.truncate(3);

        out.push(ScriptSection {
            proposition_id,
            priority,
            instruction,
            main_question: text_or(item, "main_question", "Could you tell me more?"),
            probes,
            context: text(item, "context"),
        });
    }
    out
}

fn evidence_briefing(project: &ProjectState) -> Value {
    let mut mapped: HashSet<&str> = HashSet::new();
    let mut coverage = Vec::new();
    for p in project.live_propositions() {
        mapped.extend(p.supporting_evidence.iter().map(String::as_str));
        mapped.extend(p.contradicting_evidence.iter().map(String::as_str));
        coverage.push(json!({
            "id": &p.id,
            "factor": &p.factor,
            "mechanism": &p.mechanism,
            "outcome": &p.outcome,
            "status": p.status,
            "confidence": p.confidence,
            "support_count": p.supporting_evidence.len(),
            "contradict_count": p.contradicting_evidence.len(),
        }));
    }
    let unassigned = project
        .evidence
        .iter()
        .filter(|e| !mapped.contains(e.id.as_str()))
        .count();

    json!({
        "total_evidence": project.evidence.len(),
        "interviews_count": project.interviews.len(),
        "unassigned_evidence_count": unassigned,
        "proposition_coverage": coverage,
        "note": "Aggregate only; no respondent quotes or personal references.",
    })
}

fn text(item: &Value, key: &str) -> String {
    item.get(key)
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_string()
}

fn text_or(item: &Value, key: &str, default: &str) -> String {
    let value = text(item, key);
    if value.is_empty() {
        default.to_string()
    } else {
        value
    }
}

fn instruction_label(i: SectionInstruction) -> &'static str {
    match i {
        SectionInstruction::Explore => "EXPLORE",
        SectionInstruction::Verify => "VERIFY",
        SectionInstruction::Challenge => "CHALLENGE",
        SectionInstruction::Saturated => "SATURATED",
    }
}

fn priority_label(p: SectionPriority) -> &'static str {
    match p {
        SectionPriority::High => "high",
        SectionPriority::Medium => "medium",
        SectionPriority::Low => "low",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eidetic_core::Mode;

    fn prop(id: &str, status: PropositionStatus, confidence: f64) -> Proposition {
        Proposition {
            id: id.to_string(),
            factor: "Factor".to_string(),
            mechanism: "mechanism".to_string(),
            outcome: "outcome".to_string(),
            confidence,
            status,
            supporting_evidence: vec!["E001".to_string(), "E002".to_string()],
            contradicting_evidence: Vec::new(),
            first_seen_interview: 1,
            last_updated_interview: 1,
            interviews_without_new_evidence: 1,
            merged_into: None,
        }
    }

    fn section(id: &str, instruction: SectionInstruction, priority: SectionPriority) -> ScriptSection {
        ScriptSection {
            proposition_id: id.to_string(),
            priority,
            instruction,
            main_question: "q".to_string(),
            probes: vec![],
            context: String::new(),
        }
    }

    #[test]
    fn instruction_rule_matches_status_and_confidence() {
        assert_eq!(
            instruction_for(&prop("P1", PropositionStatus::Untested, 0.0)),
            SectionInstruction::Explore
        );
        assert_eq!(
            instruction_for(&prop("P1", PropositionStatus::Exploring, 0.5)),
            SectionInstruction::Verify
        );
        assert_eq!(
            instruction_for(&prop("P1", PropositionStatus::Saturated, 0.9)),
            SectionInstruction::Saturated
        );

        let mut challenged = prop("P1", PropositionStatus::Confirmed, 0.8);
        challenged.contradicting_evidence = vec!["E009".to_string()];
        assert_eq!(instruction_for(&challenged), SectionInstruction::Challenge);

        // High confidence, no contradictions, stale: fall back to VERIFY.
        let stale = prop("P1", PropositionStatus::Confirmed, 0.8);
        assert_eq!(instruction_for(&stale), SectionInstruction::Verify);
    }

    #[test]
    fn thin_exploring_proposition_stays_explore() {
        let mut thin = prop("P1", PropositionStatus::Exploring, 0.8);
        thin.supporting_evidence = vec!["E001".to_string()];
        assert_eq!(instruction_for(&thin), SectionInstruction::Explore);
    }

    #[test]
    fn cap_drops_saturated_before_verify_before_rest() {
        let props: Vec<Proposition> = (1..=4)
            .map(|i| prop(&format!("P{i}"), PropositionStatus::Exploring, 0.5))
            .collect();
        let known: HashMap<&str, &Proposition> =
            props.iter().map(|p| (p.id.as_str(), p)).collect();

        let sections = vec![
            section("P1", SectionInstruction::Challenge, SectionPriority::Low),
            section("P2", SectionInstruction::Saturated, SectionPriority::High),
            section("P3", SectionInstruction::Verify, SectionPriority::High),
            section("P4", SectionInstruction::Explore, SectionPriority::Low),
        ];
        let kept = dedupe_and_cap(sections, 2, &known);
        let ids: Vec<&str> = kept.iter().map(|s| s.proposition_id.as_str()).collect();
        // Saturated P2 goes first, then Verify P3; Challenge and Explore stay.
        assert_eq!(ids, vec!["P1", "P4"]);
    }

    #[test]
    fn cap_breaks_ties_on_priority() {
        let props: Vec<Proposition> = (1..=3)
            .map(|i| prop(&format!("P{i}"), PropositionStatus::Exploring, 0.5))
            .collect();
        let known: HashMap<&str, &Proposition> =
            props.iter().map(|p| (p.id.as_str(), p)).collect();

        let sections = vec![
            section("P1", SectionInstruction::Explore, SectionPriority::High),
            section("P2", SectionInstruction::Explore, SectionPriority::Low),
            section("P3", SectionInstruction::Explore, SectionPriority::Medium),
        ];
        let kept = dedupe_and_cap(sections, 2, &known);
        let ids: Vec<&str> = kept.iter().map(|s| s.proposition_id.as_str()).collect();
        assert_eq!(ids, vec!["P1", "P3"]);
    }

    #[test]
    fn duplicate_proposition_sections_collapse() {
        let props = vec![prop("P1", PropositionStatus::Exploring, 0.5)];
        let known: HashMap<&str, &Proposition> =
            props.iter().map(|p| (p.id.as_str(), p)).collect();
        let sections = vec![
            section("P1", SectionInstruction::Explore, SectionPriority::High),
            section("P1", SectionInstruction::Verify, SectionPriority::Low),
        ];
        assert_eq!(dedupe_and_cap(sections, 8, &known).len(), 1);
    }

    #[tokio::test]
    async fn generate_initial_renumbers_and_forces_explore() {
        let raw = serde_json::json!({
            "propositions": [
                {"id": "PROP_A", "factor": "Food quality", "mechanism": "energy", "outcome": "stamina"},
                {"id": "PROP_B", "factor": "Mentors", "mechanism": "unblocking", "outcome": "progress"},
                {"factor": "", "mechanism": "dropped", "outcome": "dropped"}
            ],
            "script": {
                "opening_question": "How is it going?",
                "sections": [
                    {"proposition_id": "PROP_B", "priority": "high", "instruction": "CHALLENGE",
                     "main_question": "Mentors?", "probes": ["p1", "p2", "p3", "p4"]},
                    {"proposition_id": "PROP_A", "priority": "low", "instruction": "VERIFY",
                     "main_question": "Food?", "probes": []}
                ],
                "closing_question": "Last thoughts?",
                "wildcard": "Anything else?"
            }
        });
        let raw = raw.to_string();
        let model = Arc::new(crate::llm::tests_support::QueueModel::new(&[raw.as_str()]));
        let designer = DesignerAgent::new(model, 0.7, 8, 10);

        let (props, script) = designer.generate_initial("rq", &[]).await.unwrap();
        assert_eq!(props.len(), 2);
        assert_eq!(props[0].id, "P001");
        assert_eq!(props[1].id, "P002");
        assert!(props.iter().all(|p| p.status == PropositionStatus::Untested));

        assert_eq!(script.version, 1);
        assert_eq!(script.sections.len(), 2);
        // Model ids remapped to the renumbered propositions; v1 is always
        // EXPLORE; probes capped at three.
        assert_eq!(script.sections[0].proposition_id, "P002");
        assert!(script
            .sections
            .iter()
            .all(|s| s.instruction == SectionInstruction::Explore));
        assert_eq!(script.sections[0].probes.len(), 3);
    }

    #[tokio::test]
    async fn update_script_bumps_version_and_reassigns_instructions() {
        let raw = serde_json::json!({
            "script": {
                "opening_question": "Round two?",
                "sections": [
                    {"proposition_id": "P001", "priority": "high", "instruction": "SATURATED",
                     "main_question": "Still true?", "probes": ["example?"]},
                    {"proposition_id": "P999", "priority": "low", "instruction": "EXPLORE",
                     "main_question": "Ghost topic", "probes": []}
                ],
                "closing_question": "Done?",
                "wildcard": "Else?",
                "changes_summary": "tightened"
            }
        });
        let raw = raw.to_string();
        let model = Arc::new(crate::llm::tests_support::QueueModel::new(&[raw.as_str()]));
        let designer = DesignerAgent::new(model, 0.7, 8, 10);

        let mut project = eidetic_core::ProjectState::new("p", "rq", vec![]);
        let mut p001 = prop("P001", PropositionStatus::Exploring, 0.5);
        p001.interviews_without_new_evidence = 1;
        project.propositions.push(p001);
        let previous = InterviewScript {
            version: 3,
            generated_after_interview: None,
            research_question: "rq".to_string(),
            opening_question: "o".to_string(),
            sections: vec![],
            closing_question: "c".to_string(),
            wildcard: "w".to_string(),
            mode: Mode::Divergent,
            convergence_score: 0.0,
            novelty_rate: 1.0,
            changes_summary: String::new(),
        };

        let script = designer
            .update_script(&project, Some(&previous))
            .await
            .unwrap();
        assert_eq!(script.version, 4);
        // The section bound to a nonexistent proposition is dropped; the
        // survivor's instruction comes from the rule, not the model.
        assert_eq!(script.sections.len(), 1);
        assert_eq!(script.sections[0].proposition_id, "P001");
        assert_eq!(script.sections[0].instruction, SectionInstruction::Verify);
        assert_eq!(script.changes_summary, "tightened");
    }

    #[test]
    fn interviewer_prompt_substitutes_every_placeholder() {
        let designer = DesignerAgent::new(
            Arc::new(crate::llm::tests_support::SilentModel),
            0.7,
            8,
            10,
        );
        let script = InterviewScript {
            version: 1,
            generated_after_interview: None,
            research_question: "rq".to_string(),
            opening_question: "How has it been?".to_string(),
            sections: vec![section(
                "P1",
                SectionInstruction::Verify,
                SectionPriority::High,
            )],
            closing_question: "Anything surprising?".to_string(),
            wildcard: "Anything I missed?".to_string(),
            mode: Mode::Divergent,
            convergence_score: 0.0,
            novelty_rate: 1.0,
            changes_summary: String::new(),
        };
        let prompt = designer.build_interviewer_prompt(&script);
        assert!(prompt.contains("How has it been?"));
        assert!(prompt.contains("P1: VERIFY (high)"));
        assert!(prompt.contains("Anything surprising?"));
        assert!(prompt.contains("Anything I missed?"));
        assert!(prompt.contains("10 minutes"));
        assert!(!prompt.contains('{'));
    }
}
