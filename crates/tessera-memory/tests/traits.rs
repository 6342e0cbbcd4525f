// SPDX-FileCopyrightText: 2026 Tessera Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trait lifecycle: trends, reinforcement, contradiction, upgrade, decay.

mod common;

use chrono::Duration;
use common::{OWNER, fact, system, system_with, trait_record};
use tessera_core::Clock;
use tessera_memory::{
    ContradictionOutcome, EvidenceDirection, HistoryEvent, MAX_TREND_WINDOW_DAYS, QualityGrade,
    ReflectionOutcome, ResolutionOutcome, TraitOutcome, TraitStage, TraitSubtype, UpgradeOutcome,
    UpgradeSkip,
};
use tessera_test_utils::TestHarness;

async fn facts(
    h: &TestHarness,
    sys: &tessera_memory::MemorySystem,
    contents: &[&str],
) -> Vec<String> {
    let mut ids = Vec::new();
    for content in contents {
        let outcome = sys.resolve_and_store(fact(h, content)).await.unwrap();
        ids.push(outcome.memory_id().to_string());
    }
    ids
}

fn stage_of(record: &tessera_memory::MemoryRecord) -> TraitStage {
    record.trait_state().unwrap().stage
}

#[tokio::test]
async fn trend_expires_after_single_reinforcement() {
    let (h, sys) = system().await;
    let evidence = facts(&h, &sys, &["coded until 2am on Monday"]).await;

    let created = sys
        .traits()
        .create_trend(OWNER, "codes late at night", &[], 7, "work")
        .await
        .unwrap();
    let TraitOutcome::Created { id, stage, confidence } = created else {
        panic!("expected creation");
    };
    assert_eq!(stage, TraitStage::Trend);
    assert!((confidence - 0.3).abs() < 1e-9);

    let reinforced = sys
        .traits()
        .reinforce_trait(OWNER, &id, &evidence, QualityGrade::C)
        .await
        .unwrap();
    assert!(matches!(reinforced, TraitOutcome::Updated { stage: TraitStage::Trend, .. }));

    h.clock.advance_days(8);
    assert_eq!(sys.traits().promote_trends(OWNER).await.unwrap(), 0);
    assert_eq!(sys.traits().expire_trends(OWNER).await.unwrap(), 1);

    let record = sys.traits().get_trait(OWNER, &id).await.unwrap().unwrap();
    assert_eq!(stage_of(&record), TraitStage::Dissolved);
    assert_eq!(record.expired_at, Some(h.clock.now()));
    let events: Vec<HistoryEvent> = sys.history(&id).await.unwrap().iter().map(|e| e.event).collect();
    assert!(events.contains(&HistoryEvent::TrendExpire));
}

#[tokio::test]
async fn trend_promotes_after_two_reinforcements() {
    let (h, sys) = system().await;
    let evidence = facts(&h, &sys, &["coded until 2am on Monday", "pushed commits at 3am"]).await;

    let id = sys
        .traits()
        .create_trend(OWNER, "codes late at night", &[], 7, "work")
        .await
        .unwrap()
        .id()
        .to_string();
    for ev in &evidence {
        sys.traits()
            .reinforce_trait(OWNER, &id, std::slice::from_ref(ev), QualityGrade::B)
            .await
            .unwrap();
    }
    h.clock.advance_days(3);
    assert_eq!(sys.traits().expire_trends(OWNER).await.unwrap(), 0);
    assert_eq!(sys.traits().promote_trends(OWNER).await.unwrap(), 1);

    let record = sys.traits().get_trait(OWNER, &id).await.unwrap().unwrap();
    let state = record.trait_state().unwrap();
    assert_eq!(state.stage, TraitStage::Candidate);
    assert!((state.confidence - 0.3).abs() < 1e-9);
    assert_eq!(state.reinforcement_count, 2);
    assert!(state.window.is_none());

    let evidence_rows = sys.traits().trait_evidence(&id).await.unwrap();
    assert_eq!(evidence_rows.len(), 2);
    assert!(evidence_rows.iter().all(|e| e.direction == EvidenceDirection::Supporting));
}

#[tokio::test]
async fn unknown_evidence_ids_are_ignored() {
    let (h, sys) = system().await;
    let evidence = facts(&h, &sys, &["ran 10k on Sunday"]).await;
    let mut ids = evidence.clone();
    ids.push("does-not-exist".into());
    ids.push(evidence[0].clone());

    let created = sys
        .traits()
        .create_behavior(OWNER, "runs on weekends", &ids, 0.9, "fitness")
        .await
        .unwrap();
    let TraitOutcome::Created { id, stage, confidence } = created else {
        panic!("expected creation");
    };
    assert_eq!(stage, TraitStage::Candidate);
    assert!((confidence - 0.5).abs() < 1e-9, "behavior confidence is capped");
    assert_eq!(sys.traits().trait_evidence(&id).await.unwrap().len(), 1);

    let merged = sys
        .traits()
        .create_behavior(OWNER, "runs on weekends", &evidence, 0.4, "fitness")
        .await
        .unwrap();
    assert_eq!(
        merged,
        TraitOutcome::Merged {
            id: id.clone(),
            reinforcement_count: 1
        }
    );
}

#[tokio::test]
async fn dissolved_is_terminal() {
    let (h, sys) = system().await;
    let evidence = facts(&h, &sys, &["skipped the gym again"]).await;
    let id = sys
        .traits()
        .create_trend(OWNER, "avoids exercise", &[], 1, "general")
        .await
        .unwrap()
        .id()
        .to_string();
    h.clock.advance_days(2);
    sys.traits().expire_trends(OWNER).await.unwrap();

    let again = sys
        .traits()
        .reinforce_trait(OWNER, &id, &evidence, QualityGrade::A)
        .await
        .unwrap();
    assert_eq!(again, TraitOutcome::Terminal { id: id.clone() });
    let contradicted = sys
        .traits()
        .apply_contradiction(OWNER, &id, &evidence)
        .await
        .unwrap();
    assert_eq!(contradicted, ContradictionOutcome::Terminal { id: id.clone() });

    sys.traits().promote_trends(OWNER).await.unwrap();
    sys.traits().apply_decay(OWNER).await.unwrap();
    let record = sys.traits().get_trait(OWNER, &id).await.unwrap().unwrap();
    assert_eq!(stage_of(&record), TraitStage::Dissolved);
}

#[tokio::test]
async fn reinforcement_moves_stage_with_confidence() {
    let (h, sys) = system().await;
    let evidence = facts(&h, &sys, &["ordered oat milk", "asked for oat milk latte"]).await;
    let t0 = h.clock.now();
    sys.store()
        .insert(trait_record(&h, "t-oat", "prefers oat milk", TraitStage::Emerging, 0.5, t0))
        .await
        .unwrap();

    let outcome = sys
        .traits()
        .reinforce_trait(OWNER, "t-oat", &evidence, QualityGrade::A)
        .await
        .unwrap();
    let TraitOutcome::Updated { stage, confidence, .. } = outcome else {
        panic!("expected update");
    };
    assert!((confidence - 0.625).abs() < 1e-9);
    assert_eq!(stage, TraitStage::from_confidence(confidence));
    assert_eq!(stage, TraitStage::Established);

    let record = sys.traits().get_trait(OWNER, "t-oat").await.unwrap().unwrap();
    assert_eq!(record.version, 2);
    assert_eq!(record.trait_state().unwrap().reinforcement_count, 2);

    let missing = sys
        .traits()
        .reinforce_trait(OWNER, "nope", &evidence, QualityGrade::A)
        .await
        .unwrap();
    assert_eq!(missing, TraitOutcome::NotFound { id: "nope".into() });
}

#[tokio::test]
async fn decay_lowers_confidence_and_dissolves() {
    let (h, sys) = system().await;
    let t0 = h.clock.now();
    sys.store()
        .insert(trait_record(&h, "t-strong", "reads before bed", TraitStage::Established, 0.8, t0))
        .await
        .unwrap();
    sys.store()
        .insert(trait_record(&h, "t-weak", "hums while working", TraitStage::Candidate, 0.105, t0))
        .await
        .unwrap();

    h.clock.advance_days(30);
    let stats = sys.traits().apply_decay(OWNER).await.unwrap();
    assert_eq!(stats.decayed, 2);
    assert_eq!(stats.dissolved, 1);

    let strong = sys.traits().get_trait(OWNER, "t-strong").await.unwrap().unwrap();
    let state = strong.trait_state().unwrap();
    assert!(state.confidence < 0.8);
    assert_eq!(state.stage, TraitStage::from_confidence(state.confidence));

    let weak = sys.traits().get_trait(OWNER, "t-weak").await.unwrap().unwrap();
    assert_eq!(stage_of(&weak), TraitStage::Dissolved);
    let events: Vec<HistoryEvent> =
        sys.history("t-weak").await.unwrap().iter().map(|e| e.event).collect();
    assert!(events.contains(&HistoryEvent::DecayDissolve));
}

#[tokio::test]
async fn upgrade_is_acyclic() {
    let (h, sys) = system().await;
    let evidence = facts(&h, &sys, &["went to bed at 3am", "wrote code past midnight"]).await;
    let t0 = h.clock.now();
    sys.store()
        .insert(trait_record(&h, "t-a", "stays up late", TraitStage::Established, 0.7, t0))
        .await
        .unwrap();
    sys.store()
        .insert(trait_record(&h, "t-b", "works best at night", TraitStage::Established, 0.65, t0))
        .await
        .unwrap();
    sys.traits()
        .reinforce_trait(OWNER, "t-a", &evidence[..1], QualityGrade::C)
        .await
        .unwrap();

    let sources = vec!["t-a".to_string(), "t-b".to_string()];
    let outcome = sys
        .traits()
        .try_upgrade(OWNER, &sources, "is a night owl", TraitSubtype::Preference)
        .await
        .unwrap();
    let UpgradeOutcome::Upgraded { id, sources: folded, .. } = outcome else {
        panic!("expected upgrade, got {outcome:?}");
    };
    assert_eq!(folded, sources);

    let upgraded = sys.traits().get_trait(OWNER, &id).await.unwrap().unwrap();
    let state = upgraded.trait_state().unwrap();
    assert_eq!(state.subtype, TraitSubtype::Preference);
    assert_eq!(state.stage, TraitStage::Emerging);
    assert_eq!(sys.traits().trait_evidence(&id).await.unwrap().len(), 1);

    for source in &sources {
        let record = sys.traits().get_trait(OWNER, source).await.unwrap().unwrap();
        assert_eq!(record.trait_state().unwrap().parent_id.as_deref(), Some(id.as_str()));
    }

    let again = sys
        .traits()
        .try_upgrade(OWNER, &sources[..1], "definitely a night owl", TraitSubtype::Core)
        .await
        .unwrap();
    assert_eq!(
        again,
        UpgradeOutcome::Skipped {
            reason: UpgradeSkip::AlreadyParented
        }
    );

    let behavior = sys
        .traits()
        .try_upgrade(OWNER, &[id], "x", TraitSubtype::Behavior)
        .await
        .unwrap();
    assert_eq!(
        behavior,
        UpgradeOutcome::Skipped {
            reason: UpgradeSkip::InvalidSubtype
        }
    );
}

#[tokio::test]
async fn upgrade_requires_confident_sources() {
    let (h, sys) = system().await;
    let t0 = h.clock.now();
    sys.store()
        .insert(trait_record(&h, "t-low", "likes puzzles", TraitStage::Emerging, 0.4, t0))
        .await
        .unwrap();
    let outcome = sys
        .traits()
        .try_upgrade(OWNER, &["t-low".to_string()], "loves puzzles", TraitSubtype::Preference)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        UpgradeOutcome::Skipped {
            reason: UpgradeSkip::BelowThreshold
        }
    );
    let none = sys
        .traits()
        .try_upgrade(OWNER, &["missing".to_string()], "x", TraitSubtype::Preference)
        .await
        .unwrap();
    assert_eq!(
        none,
        UpgradeOutcome::Skipped {
            reason: UpgradeSkip::NoSources
        }
    );
}

#[tokio::test]
async fn reflection_runs_special_reflection_on_disputed_traits() {
    let (h, sys) = system_with(TestHarness::builder().with_mock_responses(vec![
        r#"```json
{"action": "modify", "new_content": "drinks coffee on weekdays only", "reasoning": "weekend tea"}
```"#
            .to_string(),
    ]))
    .await;
    let evidence = facts(
        &h,
        &sys,
        &["had an espresso Monday", "drank tea all Saturday", "chose tea on Sunday"],
    )
    .await;
    let t0 = h.clock.now();
    sys.store()
        .insert(trait_record(&h, "t-coffee", "drinks coffee daily", TraitStage::Established, 0.7, t0))
        .await
        .unwrap();

    let outcome: ReflectionOutcome = serde_json::from_value(serde_json::json!({
        "reinforcements": [
            {"trait_id": "t-coffee", "new_evidence_ids": [evidence[0]], "quality_grade": "B"}
        ],
        "contradictions": [
            {"trait_id": "t-coffee", "contradicting_evidence_ids": [evidence[1], evidence[2]]}
        ]
    }))
    .unwrap();
    let stats = sys.reflect(OWNER, &outcome).await.unwrap();
    assert_eq!(stats.traits_created, 0);
    assert_eq!(stats.traits_updated, 2);

    let record = sys.traits().get_trait(OWNER, "t-coffee").await.unwrap().unwrap();
    assert_eq!(record.content, "drinks coffee on weekdays only");
    let state = record.trait_state().unwrap();
    assert_eq!(state.contradiction_count, 2);
    assert_eq!(state.stage, TraitStage::from_confidence(state.confidence));

    let events: Vec<HistoryEvent> =
        sys.history("t-coffee").await.unwrap().iter().map(|e| e.event).collect();
    assert!(events.contains(&HistoryEvent::ContradictionModify));

    let requests = h.provider.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].messages[1].content.contains("drank tea all Saturday"));
}

#[tokio::test]
async fn judge_failure_dissolves_the_trait() {
    let (h, sys) = system().await;
    h.provider.set_failing(true);
    let evidence = facts(&h, &sys, &["stayed in all weekend", "declined the party"]).await;
    let t0 = h.clock.now();
    sys.store()
        .insert(trait_record(&h, "t-social", "loves parties", TraitStage::Emerging, 0.5, t0))
        .await
        .unwrap();

    let applied = sys
        .traits()
        .apply_contradiction(OWNER, "t-social", &evidence)
        .await
        .unwrap();
    let ContradictionOutcome::Applied { confidence, needs_special_reflection, .. } = applied else {
        panic!("expected contradiction to apply");
    };
    assert!((confidence - 0.3).abs() < 1e-9);
    assert!(needs_special_reflection);

    let judge = tessera_memory::LlmContradictionJudge::new(h.provider.clone());
    let resolved = sys
        .traits()
        .resolve_contradiction(OWNER, "t-social", &judge)
        .await
        .unwrap();
    assert!(matches!(resolved, ResolutionOutcome::Dissolved { .. }));
    let record = sys.traits().get_trait(OWNER, "t-social").await.unwrap().unwrap();
    assert_eq!(stage_of(&record), TraitStage::Dissolved);
    assert!(record.expired_at.is_some());
}

#[tokio::test]
async fn maintenance_in_background_is_tracked_per_owner() {
    let (h, sys) = system().await;
    sys.traits()
        .create_trend(OWNER, "naps after lunch", &[], 1, "general")
        .await
        .unwrap();
    h.clock.advance_days(2);

    sys.schedule_maintenance(OWNER);
    for _ in 0..200 {
        if sys.tasks().active_tasks(OWNER) == 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert_eq!(sys.tasks().active_tasks(OWNER), 0);
    let dissolved = sys
        .traits()
        .list_traits(OWNER, Some(TraitStage::Dissolved))
        .await
        .unwrap();
    assert_eq!(dissolved.len(), 1);
}

#[tokio::test]
async fn trend_window_outside_bounds_is_rejected() {
    let (_h, sys) = system().await;
    for window in [0, MAX_TREND_WINDOW_DAYS + 1, 3_000_000, i64::MAX / 2] {
        let err = sys
            .traits()
            .create_trend(OWNER, "codes late", &[], window, "work")
            .await
            .unwrap_err();
        assert!(matches!(err, tessera_core::TesseraError::Validation(_)), "{window}: {err}");
    }

    let longest = sys
        .traits()
        .create_trend(OWNER, "codes late", &[], MAX_TREND_WINDOW_DAYS, "work")
        .await
        .unwrap();
    assert!(matches!(longest, TraitOutcome::Created { stage: TraitStage::Trend, .. }));
    assert_eq!(sys.traits().list_traits(OWNER, None).await.unwrap().len(), 1);
    assert_eq!(sys.traits().promote_trends(OWNER).await.unwrap(), 0);
}

#[tokio::test]
async fn reflection_replaces_unusable_trend_window() {
    let (h, sys) = system().await;
    let outcome: ReflectionOutcome = serde_json::from_value(serde_json::json!({
        "new_trends": [
            {"content": "skips breakfast", "window_days": 3_000_000},
            {"content": "walks after dinner", "window_days": -4}
        ]
    }))
    .unwrap();
    let stats = sys.reflect(OWNER, &outcome).await.unwrap();
    assert_eq!(stats.traits_created, 2);

    let default_days = h.config.traits.default_window_days;
    let trends = sys.traits().list_traits(OWNER, Some(TraitStage::Trend)).await.unwrap();
    assert_eq!(trends.len(), 2);
    for record in &trends {
        let window = record.trait_state().unwrap().window.as_ref().unwrap();
        assert_eq!(window.end - window.start, Duration::days(default_days));
    }
}
