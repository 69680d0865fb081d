//! Property tests over randomly generated diffs: the store invariants must
//! hold after every commit no matter what the Analyst proposed.

use chrono::Utc;
use eidetic_core::{
    AnalysisDiff, Evidence, EvidenceDraft, EvidenceMapping, ProjectState, Proposition,
    PropositionStatus, Relationship, TranslationStatus,
};
use eidetic_engine::{reconcile, ReconcileConfig};
use proptest::prelude::*;
use std::collections::HashSet;

fn seed_project(propositions: usize, evidence_per_interview: &[usize]) -> ProjectState {
    let mut project = ProjectState::new("prop", "why?", vec![]);
    for (interview_idx, count) in evidence_per_interview.iter().enumerate() {
        let interview_id = format!("INT_{:03}", interview_idx + 1);
        for _ in 0..*count {
            let id = project.counters.next_evidence();
            project.evidence.push(Evidence {
                id,
                interview_id: interview_id.clone(),
                quote: "q".to_string(),
                interpretation: "i".to_string(),
                factor: "f".to_string(),
                mechanism: "m".to_string(),
                outcome: "o".to_string(),
                tags: vec![],
                language: "en".to_string(),
                quote_english: None,
                translation_status: TranslationStatus::NativeEn,
                timestamp: Utc::now(),
            });
        }
    }
    for _ in 0..propositions {
        let id = project.counters.next_proposition();
        project.propositions.push(Proposition {
            id,
            factor: "f".to_string(),
            mechanism: "m".to_string(),
            outcome: "o".to_string(),
            confidence: 0.0,
            status: PropositionStatus::Untested,
            supporting_evidence: vec![],
            contradicting_evidence: vec![],
            first_seen_interview: 1,
            last_updated_interview: 1,
            interviews_without_new_evidence: 0,
            merged_into: None,
        });
    }
    project.counters.interview = evidence_per_interview.len() as u32 + 1;
    project
}

fn draft(symbol: usize) -> EvidenceDraft {
    EvidenceDraft {
        symbol: format!("e#{symbol}"),
        quote: "quote".to_string(),
        interpretation: "interpretation".to_string(),
        factor: "factor".to_string(),
        mechanism: "mechanism".to_string(),
        outcome: "outcome".to_string(),
        tags: vec![],
        language: "en".to_string(),
        quote_english: None,
    }
}

/// A random but well-formed diff against the fixed seed shape: 3 existing
/// propositions, 4 existing evidence items across two interviews.
fn arb_diff() -> impl Strategy<Value = AnalysisDiff> {
    let arb_mapping = (0usize..6, 0usize..3, proptest::bool::ANY).prop_map(
        |(evidence_pick, proposition_pick, supports)| EvidenceMapping {
            // Picks 0..4 reference existing ids, 4..6 reference new drafts.
            evidence_ref: if evidence_pick < 4 {
                format!("E{:03}", evidence_pick + 1)
            } else {
                format!("e#{}", evidence_pick - 3)
            },
            proposition_ref: format!("P{:03}", proposition_pick + 1),
            relationship: if supports {
                Relationship::Supports
            } else {
                Relationship::Contradicts
            },
        },
    );

    (
        0usize..=2,
        proptest::collection::vec(arb_mapping, 0..8),
    )
        .prop_map(|(new_drafts, mappings)| AnalysisDiff {
            new_evidence: (1..=new_drafts).map(draft).collect(),
            mappings,
            ..AnalysisDiff::default()
        })
}

fn assert_invariants(project: &ProjectState) {
    let evidence_ids: HashSet<&str> = project.evidence.iter().map(|e| e.id.as_str()).collect();

    for prop in &project.propositions {
        // 1: support and contradiction never overlap.
        let supp: HashSet<&str> = prop.supporting_evidence.iter().map(String::as_str).collect();
        let contra: HashSet<&str> = prop
            .contradicting_evidence
            .iter()
            .map(String::as_str)
            .collect();
        assert!(
            supp.is_disjoint(&contra),
            "{}: support/contradiction overlap",
            prop.id
        );

        // 2: every referenced evidence id exists.
        for id in supp.iter().chain(&contra) {
            assert!(evidence_ids.contains(id), "{}: dangling {id}", prop.id);
        }

        // 5: confidence matches the formula for live propositions.
        if prop.is_live() {
            let s = prop.supporting_evidence.len() as f64;
            let c = prop.contradicting_evidence.len() as f64;
            let mut expected = if s + c == 0.0 { 0.0 } else { s / (s + c) };
            let interviews: HashSet<&String> = prop
                .supporting_evidence
                .iter()
                .chain(&prop.contradicting_evidence)
                .filter_map(|e| {
                    project
                        .evidence
                        .iter()
                        .find(|ev| &ev.id == e)
                        .map(|ev| &ev.interview_id)
                })
                .collect();
            if interviews.len() == 1 {
                expected = (expected - 0.2).max(0.0);
            }
            assert!(
                (prop.confidence - expected).abs() < 1e-9,
                "{}: confidence {} != {}",
                prop.id,
                prop.confidence,
                expected
            );
        }

        // 7: a merged proposition points at a live one.
        if prop.status == PropositionStatus::Merged {
            let target = prop.merged_into.as_ref().expect("merged without target");
            let target = project.proposition(target).expect("dangling merge target");
            assert!(target.is_live(), "merge target {} not live", target.id);
        }

        // Empty evidence sets mean confidence zero.
        if prop.supporting_evidence.is_empty() && prop.contradicting_evidence.is_empty() {
            assert_eq!(prop.confidence, 0.0);
        }
    }

    // 3: no id is ever duplicated.
    assert_eq!(
        evidence_ids.len(),
        project.evidence.len(),
        "duplicate evidence ids"
    );
    let prop_ids: HashSet<&str> = project.propositions.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(prop_ids.len(), project.propositions.len());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn invariants_hold_after_any_well_formed_diff(diff in arb_diff()) {
        let mut project = seed_project(3, &[2, 2]);
        let outcome = reconcile(&mut project, diff, "INT_003", &ReconcileConfig::default());
        // Whether accepted or rejected, the committed state is consistent.
        let _ = outcome;
        assert_invariants(&project);
    }

    #[test]
    fn max_ids_never_decrease(diff in arb_diff()) {
        let mut project = seed_project(3, &[2, 2]);
        let evidence_before = project.counters.evidence;
        let proposition_before = project.counters.proposition;
        reconcile(&mut project, diff, "INT_003", &ReconcileConfig::default());
        prop_assert!(project.counters.evidence >= evidence_before);
        prop_assert!(project.counters.proposition >= proposition_before);
    }
}
