//! The Reconciler: turns an Analyst diff into a validated store mutation.
//!
//! The Analyst proposes structure; this module owns every number. Real ids
//! are assigned here, symbolic refs resolved, and all deterministic
//! arithmetic — confidence with the single-interview penalty, status
//! transitions, merge-threshold verification, the prune rule, staleness
//! counters, and the convergence metrics — is recomputed from the resulting
//! evidence sets so the store invariants hold after every commit regardless
//! of what the model returned.
//!
//! A structurally invalid diff (dangling references, an evidence item both
//! supporting and contradicting the same proposition) is rejected as a
//! whole except for its extracted evidence: raw observations are worth
//! preserving even when the rest of the analysis is not.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use eidetic_core::{
    AnalysisDiff, Evidence, EvidenceMapping, Mode, ProjectState, Proposition, PropositionStatus,
    ReconcileError, Relationship, Settings, TranslationStatus,
};
use tracing::{debug, info, warn};

use crate::events::ProjectEvent;

/// Thresholds the Reconciler enforces. Split from [`Settings`] so tests can
/// construct it directly.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub merge_overlap_threshold: f64,
    pub prune_confidence_threshold: f64,
    pub prune_min_interviews: u32,
    pub convergence_score_threshold: f64,
    pub novelty_rate_threshold: f64,
}

impl From<&Settings> for ReconcileConfig {
    fn from(s: &Settings) -> Self {
        Self {
            merge_overlap_threshold: s.merge_overlap_threshold,
            prune_confidence_threshold: s.prune_confidence_threshold,
            prune_min_interviews: s.prune_min_interviews,
            convergence_score_threshold: s.convergence_score_threshold,
            novelty_rate_threshold: s.novelty_rate_threshold,
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            merge_overlap_threshold: 0.6,
            prune_confidence_threshold: 0.15,
            prune_min_interviews: 3,
            convergence_score_threshold: 0.6,
            novelty_rate_threshold: 0.15,
        }
    }
}

/// What a reconciliation produced.
#[derive(Debug)]
pub struct ReconcileOutcome {
    /// Events in application order: evidence, newborn propositions,
    /// updates, merges, prunes (plus `analysis_failed` on rejection).
    pub events: Vec<ProjectEvent>,
    /// Set when the diff was structurally invalid and only its evidence
    /// was committed.
    pub rejected: Option<String>,
    pub new_evidence_ids: Vec<String>,
}

/// Apply an Analyst diff to the project state in place.
///
/// The caller holds the per-project lock and persists the state afterwards;
/// this function never does I/O.
pub fn reconcile(
    project: &mut ProjectState,
    diff: AnalysisDiff,
    interview_id: &str,
    config: &ReconcileConfig,
) -> ReconcileOutcome {
    let ordinal = project.counters.interview;

    match validate(project, &diff) {
        Ok(()) => apply(project, diff, interview_id, ordinal, config),
        Err(err) => {
            warn!(interview = interview_id, error = %err, "rejecting analysis diff, keeping evidence");
            let detail = err.to_string();
            let mut outcome = apply(project, diff.evidence_only(), interview_id, ordinal, config);
            outcome.events.push(ProjectEvent::AnalysisFailed {
                interview_id: interview_id.to_string(),
                detail: detail.clone(),
            });
            outcome.rejected = Some(detail);
            outcome
        }
    }
}

// ============================================================================
// Structural validation
// ============================================================================

fn validate(project: &ProjectState, diff: &AnalysisDiff) -> Result<(), ReconcileError> {
    let evidence_ids: HashSet<&str> = project.evidence.iter().map(|e| e.id.as_str()).collect();
    let evidence_symbols: HashSet<&str> =
        diff.new_evidence.iter().map(|d| d.symbol.as_str()).collect();
    let live_ids: HashSet<&str> = project.live_propositions().map(|p| p.id.as_str()).collect();
    let prop_symbols: HashSet<&str> = diff
        .new_propositions
        .iter()
        .map(|d| d.symbol.as_str())
        .collect();

    let known_evidence = |r: &str| evidence_ids.contains(r) || evidence_symbols.contains(r);
    let known_proposition = |r: &str| live_ids.contains(r) || prop_symbols.contains(r);

    let mut polarity: HashMap<(&str, &str), Relationship> = HashMap::new();
    for (mapping, context) in diff
        .mappings
        .iter()
        .map(|m| (m, "mappings"))
        .chain(
            diff.retroactive_mappings
                .iter()
                .map(|m| (m, "retroactive_mappings")),
        )
    {
        check_mapping(mapping, context, &known_evidence, &known_proposition)?;
        let key = (
            mapping.evidence_ref.as_str(),
            mapping.proposition_ref.as_str(),
        );
        match polarity.get(&key) {
            Some(existing) if *existing != mapping.relationship => {
                return Err(ReconcileError::SupportContradictOverlap {
                    evidence_id: mapping.evidence_ref.clone(),
                    proposition_id: mapping.proposition_ref.clone(),
                });
            }
            _ => {
                polarity.insert(key, mapping.relationship);
            }
        }
    }

    for draft in &diff.new_propositions {
        for r in draft.supporting_refs.iter().chain(&draft.contradicting_refs) {
            if !known_evidence(r) {
                return Err(ReconcileError::DanglingReference {
                    reference: r.clone(),
                    context: format!("new proposition {}", draft.symbol),
                });
            }
        }
        for r in &draft.supporting_refs {
            if draft.contradicting_refs.contains(r) {
                return Err(ReconcileError::SupportContradictOverlap {
                    evidence_id: r.clone(),
                    proposition_id: draft.symbol.clone(),
                });
            }
        }
    }

    for merge in &diff.merges {
        for id in &merge.source_ids {
            if !live_ids.contains(id.as_str()) {
                return Err(ReconcileError::MergeOnDeadProposition(id.clone()));
            }
        }
    }
    for s in &diff.subsumes {
        for id in [&s.specialized_id, &s.general_id] {
            if !live_ids.contains(id.as_str()) {
                return Err(ReconcileError::MergeOnDeadProposition(id.clone()));
            }
        }
    }

    Ok(())
}

fn check_mapping(
    m: &EvidenceMapping,
    context: &str,
    known_evidence: &impl Fn(&str) -> bool,
    known_proposition: &impl Fn(&str) -> bool,
) -> Result<(), ReconcileError> {
    if !known_evidence(&m.evidence_ref) {
        return Err(ReconcileError::DanglingReference {
            reference: m.evidence_ref.clone(),
            context: context.to_string(),
        });
    }
    if !known_proposition(&m.proposition_ref) {
        return Err(ReconcileError::DanglingReference {
            reference: m.proposition_ref.clone(),
            context: context.to_string(),
        });
    }
    Ok(())
}

// ============================================================================
// Application
// ============================================================================

fn apply(
    project: &mut ProjectState,
    diff: AnalysisDiff,
    interview_id: &str,
    ordinal: u32,
    config: &ReconcileConfig,
) -> ReconcileOutcome {
    let mut evidence_events = Vec::new();
    let mut merge_events = Vec::new();
    let mut prune_events = Vec::new();

    // -- evidence ------------------------------------------------------------
    let mut evidence_symbols: HashMap<String, String> = HashMap::new();
    let mut new_evidence_ids = Vec::new();
    for draft in diff.new_evidence {
        let id = project.counters.next_evidence();
        evidence_symbols.insert(draft.symbol.clone(), id.clone());
        new_evidence_ids.push(id.clone());

        let english = draft.language.to_lowercase().starts_with("en") || draft.language.is_empty();
        let (quote_english, translation_status) = if english {
            (Some(draft.quote.clone()), TranslationStatus::NativeEn)
        } else if let Some(q) = draft.quote_english {
            (Some(q), TranslationStatus::Translated)
        } else {
            (None, TranslationStatus::Pending)
        };

        let evidence = Evidence {
            id,
            interview_id: interview_id.to_string(),
            quote: draft.quote,
            interpretation: draft.interpretation,
            factor: draft.factor,
            mechanism: draft.mechanism,
            outcome: draft.outcome,
            tags: draft.tags,
            language: if draft.language.is_empty() {
                "en".to_string()
            } else {
                draft.language
            },
            quote_english,
            translation_status,
            timestamp: Utc::now(),
        };
        evidence_events.push(ProjectEvent::NewEvidence {
            evidence: evidence.clone(),
        });
        project.evidence.push(evidence);
    }

    let existing_evidence: HashSet<String> =
        project.evidence.iter().map(|e| e.id.clone()).collect();
    let resolve_evidence = |r: &str| -> Option<String> {
        evidence_symbols.get(r).cloned().or_else(|| {
            existing_evidence
                .contains(r)
                .then(|| r.to_string())
        })
    };

    // -- newborn propositions ------------------------------------------------
    let mut prop_symbols: HashMap<String, String> = HashMap::new();
    let mut newborn_ids: Vec<String> = Vec::new();
    let mut triggering_evidence: HashSet<String> = HashSet::new();
    let mut changed: HashSet<String> = HashSet::new();
    let mut grew: HashSet<String> = HashSet::new();

    for draft in &diff.new_propositions {
        let id = project.counters.next_proposition();
        prop_symbols.insert(draft.symbol.clone(), id.clone());
        newborn_ids.push(id.clone());

        let mut supporting: Vec<String> = Vec::new();
        let mut contradicting: Vec<String> = Vec::new();
        for r in &draft.supporting_refs {
            let Some(resolved) = resolve_evidence(r) else {
                continue;
            };
            if evidence_symbols.contains_key(r) {
                triggering_evidence.insert(resolved.clone());
            }
            if !supporting.contains(&resolved) {
                supporting.push(resolved);
            }
        }
        for r in &draft.contradicting_refs {
            let Some(resolved) = resolve_evidence(r) else {
                continue;
            };
            if evidence_symbols.contains_key(r) {
                triggering_evidence.insert(resolved.clone());
            }
            if !supporting.contains(&resolved) && !contradicting.contains(&resolved) {
                contradicting.push(resolved);
            }
        }

        changed.insert(id.clone());
        grew.insert(id.clone());
        project.propositions.push(Proposition {
            id,
            factor: draft.factor.clone(),
            mechanism: draft.mechanism.clone(),
            outcome: draft.outcome.clone(),
            confidence: 0.0,
            status: PropositionStatus::Untested,
            supporting_evidence: supporting,
            contradicting_evidence: contradicting,
            first_seen_interview: ordinal,
            last_updated_interview: ordinal,
            interviews_without_new_evidence: 0,
            merged_into: None,
        });
    }

    // -- mappings ------------------------------------------------------------
    for mapping in diff.mappings.iter().chain(&diff.retroactive_mappings) {
        let Some(evidence_id) = resolve_evidence(&mapping.evidence_ref) else {
            continue;
        };
        let proposition_id = prop_symbols
            .get(&mapping.proposition_ref)
            .cloned()
            .unwrap_or_else(|| mapping.proposition_ref.clone());
        let Some(prop) = project.proposition_mut(&proposition_id) else {
            continue;
        };
        if !prop.is_live() {
            // Weak and merged propositions never gain evidence.
            continue;
        }

        let was_known = prop.supporting_evidence.contains(&evidence_id)
            || prop.contradicting_evidence.contains(&evidence_id);
        let (into, from) = match mapping.relationship {
            Relationship::Supports => (
                &mut prop.supporting_evidence,
                &mut prop.contradicting_evidence,
            ),
            Relationship::Contradicts => (
                &mut prop.contradicting_evidence,
                &mut prop.supporting_evidence,
            ),
        };
        let mut touched = false;
        if !into.contains(&evidence_id) {
            into.push(evidence_id.clone());
            touched = true;
        }
        if let Some(pos) = from.iter().position(|e| *e == evidence_id) {
            from.remove(pos);
            touched = true;
        }
        if touched {
            changed.insert(proposition_id.clone());
            if !was_known {
                grew.insert(proposition_id);
            }
        }
    }

    // -- merges --------------------------------------------------------------
    for proposal in &diff.merges {
        let sources: Vec<String> = proposal
            .source_ids
            .iter()
            .filter(|id| {
                project
                    .proposition(id)
                    .map(|p| p.is_live())
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        if sources.len() < 2 {
            continue;
        }

        let overlap = supporting_jaccard(project, &sources);
        if overlap < config.merge_overlap_threshold {
            info!(
                sources = ?sources,
                overlap,
                threshold = config.merge_overlap_threshold,
                "merge proposal below threshold, skipped"
            );
            continue;
        }

        let merged_id = project.counters.next_proposition();
        let mut supporting: Vec<String> = Vec::new();
        let mut contradicting: Vec<String> = Vec::new();
        for source_id in &sources {
            if let Some(p) = project.proposition(source_id) {
                for e in &p.supporting_evidence {
                    if !supporting.contains(e) {
                        supporting.push(e.clone());
                    }
                }
                for e in &p.contradicting_evidence {
                    if !contradicting.contains(e) {
                        contradicting.push(e.clone());
                    }
                }
            }
        }
        // Support wins when the union would put an id in both sets.
        contradicting.retain(|e| !supporting.contains(e));

        for source_id in &sources {
            if let Some(p) = project.proposition_mut(source_id) {
                p.status = PropositionStatus::Merged;
                p.merged_into = Some(merged_id.clone());
            }
        }

        changed.insert(merged_id.clone());
        grew.insert(merged_id.clone());
        newborn_ids.push(merged_id.clone());
        project.propositions.push(Proposition {
            id: merged_id.clone(),
            factor: proposal.factor.clone(),
            mechanism: proposal.mechanism.clone(),
            outcome: proposal.outcome.clone(),
            confidence: 0.0,
            status: PropositionStatus::Untested,
            supporting_evidence: supporting,
            contradicting_evidence: contradicting,
            first_seen_interview: ordinal,
            last_updated_interview: ordinal,
            interviews_without_new_evidence: 0,
            merged_into: None,
        });
        merge_events.push(ProjectEvent::PropositionMerged {
            source_ids: sources,
            merged_into: merged_id,
        });
    }

    // -- subsumes ------------------------------------------------------------
    for proposal in &diff.subsumes {
        if proposal.specialized_id == proposal.general_id {
            continue;
        }
        let Some(specialized) = project.proposition(&proposal.specialized_id).cloned() else {
            continue;
        };
        let live_general = project
            .proposition(&proposal.general_id)
            .map(|p| p.is_live())
            .unwrap_or(false);
        if !specialized.is_live() || !live_general {
            continue;
        }

        let mut gained = false;
        if let Some(general) = project.proposition_mut(&proposal.general_id) {
            for e in &specialized.supporting_evidence {
                // A contradiction recorded against the generalization is a
                // more specific judgement than the union rule; keep it.
                if !general.supporting_evidence.contains(e)
                    && !general.contradicting_evidence.contains(e)
                {
                    general.supporting_evidence.push(e.clone());
                    gained = true;
                }
            }
        }
        if gained {
            changed.insert(proposal.general_id.clone());
            grew.insert(proposal.general_id.clone());
        }
        if let Some(specialized) = project.proposition_mut(&proposal.specialized_id) {
            specialized.status = PropositionStatus::Merged;
            specialized.merged_into = Some(proposal.general_id.clone());
        }
        merge_events.push(ProjectEvent::PropositionMerged {
            source_ids: vec![proposal.specialized_id.clone()],
            merged_into: proposal.general_id.clone(),
        });
    }

    // -- transitive merge resolution ----------------------------------------
    resolve_merge_chains(project);

    // -- staleness counters --------------------------------------------------
    for prop in project.propositions.iter_mut().filter(|p| p.is_live()) {
        if grew.contains(&prop.id) {
            prop.interviews_without_new_evidence = 0;
            prop.last_updated_interview = ordinal;
        } else {
            prop.interviews_without_new_evidence += 1;
        }
    }

    // -- confidence ----------------------------------------------------------
    let interview_of: HashMap<String, String> = project
        .evidence
        .iter()
        .map(|e| (e.id.clone(), e.interview_id.clone()))
        .collect();
    for prop in project.propositions.iter_mut() {
        if prop.is_live() && changed.contains(&prop.id) {
            prop.confidence = confidence(prop, &interview_of);
        }
    }

    // -- status transitions --------------------------------------------------
    for prop in project.propositions.iter_mut().filter(|p| p.is_live()) {
        transition_status(prop, &interview_of);
    }

    // -- prune ---------------------------------------------------------------
    let mut pruned_now: HashSet<String> = HashSet::new();
    for prop in project.propositions.iter_mut().filter(|p| p.is_live()) {
        if prop.confidence < config.prune_confidence_threshold
            && prop.interviews_without_new_evidence >= config.prune_min_interviews
        {
            prop.status = PropositionStatus::Weak;
            pruned_now.insert(prop.id.clone());
            prune_events.push(ProjectEvent::PropositionPruned {
                id: prop.id.clone(),
            });
        }
    }

    // The Analyst nominates prune candidates too. The deterministic rule is
    // authoritative, but a disagreement in either direction is a calibration
    // signal worth surfacing.
    for candidate in &diff.prunes {
        if !pruned_now.contains(candidate) {
            info!(
                proposition = %candidate,
                "analyst proposed a prune the rule did not confirm"
            );
        }
    }
    for id in &pruned_now {
        if !diff.prunes.contains(id) {
            debug!(proposition = %id, "rule pruned a proposition the analyst did not flag");
        }
    }

    // -- metrics -------------------------------------------------------------
    let novelty_rate = if new_evidence_ids.is_empty() {
        0.0
    } else {
        triggering_evidence.len() as f64 / new_evidence_ids.len() as f64
    };
    let convergence_score = convergence_score(project);
    let mode = if convergence_score >= config.convergence_score_threshold
        && novelty_rate <= config.novelty_rate_threshold
    {
        Mode::Convergent
    } else {
        Mode::Divergent
    };
    project.metrics.convergence_score = convergence_score;
    project.metrics.novelty_rate = novelty_rate;
    project.metrics.mode = mode;

    // -- event assembly ------------------------------------------------------
    let newborn_set: HashSet<&str> = newborn_ids.iter().map(String::as_str).collect();
    let mut events = evidence_events;
    for prop in &project.propositions {
        if newborn_set.contains(prop.id.as_str()) {
            events.push(ProjectEvent::NewProposition {
                proposition: prop.clone(),
            });
        }
    }
    for prop in &project.propositions {
        if !newborn_set.contains(prop.id.as_str())
            && changed.contains(&prop.id)
            && prop.is_live()
        {
            events.push(ProjectEvent::PropositionUpdated {
                id: prop.id.clone(),
                confidence: prop.confidence,
                status: prop.status,
            });
        }
    }
    events.extend(merge_events);
    events.extend(prune_events);

    info!(
        interview = interview_id,
        evidence = new_evidence_ids.len(),
        newborn = newborn_ids.len(),
        convergence = convergence_score,
        novelty = novelty_rate,
        ?mode,
        "reconciliation committed"
    );

    ReconcileOutcome {
        events,
        rejected: None,
        new_evidence_ids,
    }
}

// ============================================================================
// Deterministic arithmetic
// ============================================================================

/// `|supp| / (|supp| + |contra|)`, zero on empty sets, minus the 0.2
/// single-interview penalty (floored at zero) when every referenced item
/// comes from one interview.
fn confidence(prop: &Proposition, interview_of: &HashMap<String, String>) -> f64 {
    let supporting = prop.supporting_evidence.len();
    let contradicting = prop.contradicting_evidence.len();
    if supporting + contradicting == 0 {
        return 0.0;
    }
    let mut value = supporting as f64 / (supporting + contradicting) as f64;

    let interviews: HashSet<&str> = prop
        .supporting_evidence
        .iter()
        .chain(&prop.contradicting_evidence)
        .filter_map(|e| interview_of.get(e))
        .map(String::as_str)
        .collect();
    if interviews.len() == 1 {
        value = (value - 0.2).max(0.0);
    }
    value.clamp(0.0, 1.0)
}

fn supporting_interview_count(prop: &Proposition, interview_of: &HashMap<String, String>) -> usize {
    prop.supporting_evidence
        .iter()
        .filter_map(|e| interview_of.get(e))
        .collect::<HashSet<_>>()
        .len()
}

fn transition_status(prop: &mut Proposition, interview_of: &HashMap<String, String>) {
    let has_evidence =
        !prop.supporting_evidence.is_empty() || !prop.contradicting_evidence.is_empty();

    if prop.status == PropositionStatus::Untested && has_evidence {
        prop.status = PropositionStatus::Exploring;
    }
    if prop.status == PropositionStatus::Exploring
        && prop.confidence >= 0.7
        && prop.supporting_evidence.len() >= 2
        && supporting_interview_count(prop, interview_of) >= 2
    {
        prop.status = PropositionStatus::Confirmed;
    }
    if matches!(
        prop.status,
        PropositionStatus::Exploring | PropositionStatus::Confirmed
    ) && !prop.contradicting_evidence.is_empty()
        && prop.confidence < 0.7
    {
        prop.status = PropositionStatus::Challenged;
    }
    if prop.status == PropositionStatus::Confirmed
        && prop.confidence >= 0.8
        && prop.interviews_without_new_evidence >= 2
    {
        prop.status = PropositionStatus::Saturated;
    }
}

/// Jaccard overlap of the supporting sets: `|∩| / |∪|` across all sources.
fn supporting_jaccard(project: &ProjectState, sources: &[String]) -> f64 {
    let sets: Vec<HashSet<&str>> = sources
        .iter()
        .filter_map(|id| project.proposition(id))
        .map(|p| {
            p.supporting_evidence
                .iter()
                .map(String::as_str)
                .collect::<HashSet<_>>()
        })
        .collect();
    if sets.len() < 2 {
        return 0.0;
    }
    let mut intersection = sets[0].clone();
    let mut union = sets[0].clone();
    for set in &sets[1..] {
        intersection.retain(|e| set.contains(e));
        union.extend(set);
    }
    if union.is_empty() {
        0.0
    } else {
        intersection.len() as f64 / union.len() as f64
    }
}

/// Collapse merge chains so `merged_into` always names a live proposition:
/// if A merged into B and B into C within one diff, A ends at C.
fn resolve_merge_chains(project: &mut ProjectState) {
    let targets: HashMap<String, String> = project
        .propositions
        .iter()
        .filter(|p| p.status == PropositionStatus::Merged)
        .filter_map(|p| p.merged_into.clone().map(|t| (p.id.clone(), t)))
        .collect();

    for prop in project.propositions.iter_mut() {
        let Some(mut target) = prop.merged_into.clone() else {
            continue;
        };
        let mut seen = HashSet::new();
        while let Some(next) = targets.get(&target) {
            if !seen.insert(target.clone()) {
                break;
            }
            target = next.clone();
        }
        prop.merged_into = Some(target);
    }
}

/// `confirmed + saturated` over all active propositions; 0 when none.
fn convergence_score(project: &ProjectState) -> f64 {
    let active = project
        .propositions
        .iter()
        .filter(|p| p.status.is_active())
        .count();
    if active == 0 {
        return 0.0;
    }
    let settled = project
        .propositions
        .iter()
        .filter(|p| {
            matches!(
                p.status,
                PropositionStatus::Confirmed | PropositionStatus::Saturated
            )
        })
        .count();
    settled as f64 / active as f64
}
