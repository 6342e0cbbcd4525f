// SPDX-FileCopyrightText: 2026 Tessera Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared setup for tessera-memory integration tests.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use tessera_memory::{
    MemoryKind, MemoryMetadata, MemoryRecord, MemorySystem, MemoryType, NewMemory, TraitStage,
    TraitState, TraitSubtype, content_hash,
};
use tessera_test_utils::TestHarness;

pub const OWNER: &str = "user-1";

pub async fn system() -> (TestHarness, MemorySystem) {
    system_with(TestHarness::builder()).await
}

pub async fn system_with(
    builder: tessera_test_utils::TestHarnessBuilder,
) -> (TestHarness, MemorySystem) {
    let h = builder.build().await.unwrap();
    let sys = MemorySystem::builder(h.db.clone(), h.embedder.clone(), h.config.clone())
        .clock(h.clock.clone())
        .provider(h.provider.clone())
        .build();
    (h, sys)
}

pub fn fact(h: &TestHarness, content: &str) -> NewMemory {
    new_memory(h, MemoryType::Fact, content)
}

pub fn new_memory(h: &TestHarness, memory_type: MemoryType, content: &str) -> NewMemory {
    NewMemory {
        owner_id: OWNER.into(),
        memory_type,
        content: content.into(),
        embedding: h.embedder.vector_for(content),
        metadata: MemoryMetadata::default(),
        event_time: None,
    }
}

/// Unit vector at `steps * angle` radians in the plane of the first two axes.
pub fn rotated(dims: usize, angle: f32, steps: f32) -> Vec<f32> {
    let mut v = vec![0.0; dims];
    v[0] = (angle * steps).cos();
    v[1] = (angle * steps).sin();
    v
}

/// A trait row built directly, bypassing the lifecycle.
pub fn trait_record(
    h: &TestHarness,
    id: &str,
    content: &str,
    stage: TraitStage,
    confidence: f64,
    at: DateTime<Utc>,
) -> MemoryRecord {
    MemoryRecord {
        id: id.into(),
        owner_id: OWNER.into(),
        content: content.into(),
        embedding: h.embedder.vector_for(content),
        metadata: MemoryMetadata::default(),
        content_hash: content_hash(content),
        importance: 0.5,
        access_count: 0,
        last_accessed_at: None,
        created_at: at,
        updated_at: at,
        event_time: None,
        valid_from: at,
        valid_until: None,
        version: 1,
        superseded_by: None,
        expired_at: None,
        kind: MemoryKind::Trait(TraitState {
            subtype: TraitSubtype::Behavior,
            stage,
            confidence,
            context: Some("general".into()),
            parent_id: None,
            reinforcement_count: 0,
            contradiction_count: 0,
            last_reinforced: Some(at),
            first_observed: Some(at),
            window: None,
            derived_from: Some("reflection".into()),
        }),
    }
}

pub fn fact_record(h: &TestHarness, id: &str, content: &str, at: DateTime<Utc>) -> MemoryRecord {
    let mut record = trait_record(h, id, content, TraitStage::Core, 1.0, at);
    record.kind = MemoryKind::Fact;
    record
}
