// SPDX-FileCopyrightText: 2026 Tessera Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Batch ingest, reflection bookkeeping and user-data erasure.

mod common;

use std::sync::Arc;

use chrono::Duration;
use common::{OWNER, fact, system, system_with};
use tessera_core::Clock;
use tessera_memory::{
    ClassifiedBatch, EpisodeCandidate, FactCandidate, IngestStats, MemoryType, ReflectionOutcome,
};
use tessera_test_utils::{MockTemporalParser, TestHarness};

fn facts(contents: &[&str]) -> ClassifiedBatch {
    ClassifiedBatch {
        facts: contents
            .iter()
            .map(|c| FactCandidate {
                content: c.to_string(),
                ..Default::default()
            })
            .collect(),
        episodes: Vec::new(),
    }
}

async fn install_trigger(h: &TestHarness, action: &'static str) {
    let sql = format!(
        "CREATE TRIGGER poison BEFORE INSERT ON memories WHEN NEW.content = 'poison' \
         BEGIN SELECT RAISE({action}, 'poisoned'); END;"
    );
    h.db.write(move |tx| {
        tx.execute_batch(&sql)?;
        Ok(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn classified_batch_is_stored_and_deduplicated() {
    let (h, sys) = system().await;
    let mut batch = facts(&["speaks Portuguese", "has two sisters"]);
    batch.episodes.push(EpisodeCandidate {
        content: "visited Porto with friends".into(),
        people: vec!["Ana".into()],
        location: Some("Porto".into()),
        ..Default::default()
    });

    let stats = sys.store_classified(OWNER, batch.clone(), None).await;
    assert_eq!(
        stats,
        IngestStats {
            facts_stored: 2,
            episodes_stored: 1,
            duplicates: 0,
            failed: 0,
        }
    );

    let again = sys.store_classified(OWNER, batch, None).await;
    assert_eq!(again.duplicates, 3);
    assert_eq!(again.facts_stored + again.episodes_stored, 0);

    let episodes = sys
        .store()
        .list_active(OWNER, Some(MemoryType::Episodic))
        .await
        .unwrap();
    assert_eq!(episodes.len(), 1);
    assert_eq!(
        episodes[0].metadata.extra.get("location"),
        Some(&serde_json::Value::from("Porto"))
    );
    assert_eq!(h.embedder.calls(), 4);
}

#[tokio::test]
async fn vague_and_blank_facts_are_dropped() {
    let (_h, sys) = system().await;
    let stats = sys
        .store_classified(
            OWNER,
            facts(&["User likes some kind of music", "   ", "plays chess"]),
            None,
        )
        .await;
    assert_eq!(stats.facts_stored, 1);
    let stored = sys.store().list_active(OWNER, None).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].content, "plays chess");
}

#[tokio::test]
async fn embedding_failure_stores_nothing() {
    let (h, sys) = system().await;
    h.embedder.set_failing(true);
    let stats = sys
        .store_classified(OWNER, facts(&["owns a kayak", "likes sushi"]), None)
        .await;
    assert_eq!(stats, IngestStats::default());
    assert!(sys.store().list_active(OWNER, None).await.unwrap().is_empty());
    assert!(!sys.reflection_due(OWNER));
}

#[tokio::test]
async fn failing_item_does_not_sink_the_batch() {
    let (h, sys) = system().await;
    install_trigger(&h, "ABORT").await;

    let stats = sys
        .store_classified(OWNER, facts(&["likes hiking", "poison", "keeps bees"]), None)
        .await;
    assert_eq!(stats.facts_stored, 2);
    assert_eq!(stats.failed, 1);

    let mut contents: Vec<String> = sys
        .store()
        .list_active(OWNER, None)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.content)
        .collect();
    contents.sort();
    assert_eq!(contents, vec!["keeps bees", "likes hiking"]);
}

#[tokio::test]
async fn aborted_transaction_stores_nothing() {
    let (h, sys) = system().await;
    install_trigger(&h, "ROLLBACK").await;

    let stats = sys
        .store_classified(OWNER, facts(&["likes hiking", "poison", "keeps bees"]), None)
        .await;
    assert_eq!(stats, IngestStats::default());
    assert!(sys.store().list_active(OWNER, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn relative_event_time_is_anchored_to_the_session() {
    let h = TestHarness::new().await.unwrap();
    let parser = Arc::new(MockTemporalParser::new().with_relative("yesterday", Duration::days(-1)));
    let sys = tessera_memory::MemorySystem::builder(h.db.clone(), h.embedder.clone(), h.config.clone())
        .clock(h.clock.clone())
        .temporal_parser(parser)
        .build();

    let reference = h.clock.now();
    let batch = ClassifiedBatch {
        facts: vec![FactCandidate {
            content: "started a new job".into(),
            timestamp: Some("2026-02-10".into()),
            ..Default::default()
        }],
        episodes: vec![EpisodeCandidate {
            content: "went climbing yesterday".into(),
            ..Default::default()
        }],
    };
    let stats = sys.store_classified(OWNER, batch, Some(reference)).await;
    assert_eq!((stats.facts_stored, stats.episodes_stored), (1, 1));

    let episode = &sys
        .store()
        .list_active(OWNER, Some(MemoryType::Episodic))
        .await
        .unwrap()[0];
    assert_eq!(episode.event_time, Some(reference - Duration::days(1)));

    let fact = &sys
        .store()
        .list_active(OWNER, Some(MemoryType::Fact))
        .await
        .unwrap()[0];
    assert_eq!(
        fact.event_time.map(|t| t.to_rfc3339()),
        Some("2026-02-10T00:00:00+00:00".to_string())
    );
}

#[tokio::test]
async fn reflection_becomes_due_after_threshold() {
    let mut config = tessera_config::TesseraConfig::default();
    config.tasks.reflection_threshold = 3;
    let (h, sys) = system_with(TestHarness::builder().with_config(config)).await;

    sys.resolve_and_store(fact(&h, "collects stamps")).await.unwrap();
    sys.resolve_and_store(fact(&h, "collects stamps")).await.unwrap();
    assert!(!sys.reflection_due(OWNER), "duplicates do not count");

    sys.store_classified(OWNER, facts(&["grows tomatoes", "bakes bread"]), None)
        .await;
    assert!(sys.reflection_due(OWNER));
    assert_eq!(sys.tasks().pending(OWNER), 3);

    sys.reflect(OWNER, &ReflectionOutcome::default()).await.unwrap();
    assert!(!sys.reflection_due(OWNER));
    assert_eq!(sys.tasks().pending(OWNER), 0);
}

#[tokio::test]
async fn erasure_cancels_tasks_and_spares_other_owners() {
    let (h, sys) = system().await;
    sys.resolve_and_store(fact(&h, "has a dog")).await.unwrap();
    sys.resolve_and_store(fact(&h, "works nights")).await.unwrap();
    let mut other = fact(&h, "has a dog");
    other.owner_id = "user-2".into();
    sys.resolve_and_store(other).await.unwrap();

    let (started_tx, started_rx) = tokio::sync::oneshot::channel();
    sys.tasks().spawn(OWNER, move |token| async move {
        let _ = started_tx.send(());
        token.cancelled().await;
    });
    started_rx.await.unwrap();
    assert_eq!(sys.tasks().active_tasks(OWNER), 1);

    let report = sys.delete_user_data(OWNER).await.unwrap();
    assert_eq!(report.memories, 2);
    assert_eq!(report.evidence, 0);
    assert!(report.history >= 2);
    assert_eq!(sys.tasks().active_tasks(OWNER), 0);
    assert!(!sys.reflection_due(OWNER));

    assert!(sys.store().list_active(OWNER, None).await.unwrap().is_empty());
    let survivors = sys.store().list_active("user-2", None).await.unwrap();
    assert_eq!(survivors.len(), 1);

    // A fresh task for the erased owner is not born cancelled.
    let token = sys.tasks().owner_token(OWNER);
    assert!(!token.is_cancelled());
    sys.shutdown();
    assert!(token.is_cancelled());
}
