// SPDX-FileCopyrightText: 2026 Tessera Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! ADD / UPDATE / NOOP decision for incoming facts, episodes and documents.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tessera_core::{Clock, TesseraError};
use tessera_storage::{Database, TxError};
use tracing::debug;

use crate::store::{self, NewHistory};
use crate::types::{
    HistoryEvent, MemoryKind, MemoryRecord, MemoryType, NewMemory, content_hash,
    cosine_similarity,
};

/// Neighbors above this similarity are the same fact, possibly restated.
pub const UPDATE_THRESHOLD: f64 = 0.85;

/// Neighbors above this similarity are duplicates.
pub const DUPLICATE_THRESHOLD: f64 = 0.95;

/// Why a candidate was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", content = "similarity", rename_all = "snake_case")]
pub enum Duplicate {
    Exact,
    Semantic(f64),
}

/// Result of resolving one candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResolveOutcome {
    Added {
        id: String,
    },
    /// `superseded` was closed and linked forward to the new record `id`.
    Updated {
        id: String,
        superseded: String,
        similarity: f64,
    },
    Noop {
        existing_id: String,
        duplicate: Duplicate,
    },
}

impl ResolveOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ResolveOutcome::Added { .. } => "added",
            ResolveOutcome::Updated { .. } => "updated",
            ResolveOutcome::Noop { .. } => "noop",
        }
    }

    /// Id of the record now holding this content.
    pub fn memory_id(&self) -> &str {
        match self {
            ResolveOutcome::Added { id } | ResolveOutcome::Updated { id, .. } => id,
            ResolveOutcome::Noop { existing_id, .. } => existing_id,
        }
    }
}

/// Reject malformed candidates before any write.
pub fn validate_candidate(
    candidate: &NewMemory,
    embedding_dims: Option<usize>,
) -> Result<(), TesseraError> {
    if candidate.memory_type == MemoryType::Trait {
        return Err(TesseraError::Validation(
            "traits are created through the trait engine".into(),
        ));
    }
    if candidate.owner_id.trim().is_empty() {
        return Err(TesseraError::Validation("owner id is empty".into()));
    }
    if candidate.content.trim().is_empty() {
        return Err(TesseraError::Validation("content is empty".into()));
    }
    validate_embedding(&candidate.embedding, embedding_dims)
}

/// Reject empty, non-finite or wrongly-sized vectors.
pub fn validate_embedding(embedding: &[f32], dims: Option<usize>) -> Result<(), TesseraError> {
    if embedding.is_empty() {
        return Err(TesseraError::Validation("embedding is empty".into()));
    }
    if let Some(pos) = embedding.iter().position(|v| !v.is_finite()) {
        return Err(TesseraError::Validation(format!(
            "embedding component {pos} is not finite"
        )));
    }
    if let Some(dims) = dims
        && embedding.len() != dims
    {
        return Err(TesseraError::Validation(format!(
            "embedding has {} dimensions, expected {dims}",
            embedding.len()
        )));
    }
    Ok(())
}

/// Closest active record of the same owner and type, with its version.
fn nearest(
    conn: &rusqlite::Connection,
    candidate: &NewMemory,
) -> Result<Option<(String, i64, f64)>, TxError> {
    let mut best: Option<(String, i64, f64)> = None;
    for (id, version, embedding) in
        store::active_embeddings(conn, &candidate.owner_id, candidate.memory_type)?
    {
        let sim = cosine_similarity(&candidate.embedding, &embedding);
        if best.as_ref().is_none_or(|(_, _, b)| sim > *b) {
            best = Some((id, version, sim));
        }
    }
    Ok(best)
}

fn new_record(candidate: &NewMemory, hash: String, now: DateTime<Utc>) -> MemoryRecord {
    let kind = match candidate.memory_type {
        MemoryType::Episodic => MemoryKind::Episodic,
        MemoryType::Document => MemoryKind::Document,
        _ => MemoryKind::Fact,
    };
    MemoryRecord {
        id: uuid::Uuid::new_v4().to_string(),
        owner_id: candidate.owner_id.clone(),
        content: candidate.content.clone(),
        embedding: candidate.embedding.clone(),
        metadata: candidate.metadata.clone(),
        content_hash: hash,
        importance: 0.5,
        access_count: 0,
        last_accessed_at: None,
        created_at: now,
        updated_at: now,
        event_time: candidate.event_time,
        valid_from: now,
        valid_until: None,
        version: 1,
        superseded_by: None,
        expired_at: None,
        kind,
    }
}

fn add(
    conn: &rusqlite::Connection,
    candidate: &NewMemory,
    hash: String,
    now: DateTime<Utc>,
) -> Result<String, TxError> {
    let record = new_record(candidate, hash, now);
    store::insert_record(conn, &record)?;
    store::append_history(
        conn,
        NewHistory {
            memory_id: &record.id,
            owner_id: &record.owner_id,
            memory_type: candidate.memory_type,
            event: HistoryEvent::Add,
            old_content: None,
            new_content: Some(&record.content),
            old_metadata: None,
            new_metadata: Some(serde_json::to_value(&record.metadata)?),
            actor: "system",
            at: now,
        },
    )?;
    Ok(record.id)
}

/// Resolve one validated candidate inside the caller's transaction.
pub(crate) fn resolve_in_tx(
    conn: &rusqlite::Connection,
    candidate: &NewMemory,
    now: DateTime<Utc>,
) -> Result<ResolveOutcome, TxError> {
    let hash = content_hash(&candidate.content);

    if candidate.memory_type == MemoryType::Episodic {
        if let Some((id, _, sim)) = nearest(conn, candidate)?
            && sim > DUPLICATE_THRESHOLD
        {
            return Ok(ResolveOutcome::Noop {
                existing_id: id,
                duplicate: Duplicate::Semantic(sim),
            });
        }
        let id = add(conn, candidate, hash, now)?;
        return Ok(ResolveOutcome::Added { id });
    }

    if let Some(existing) =
        store::find_active_by_hash(conn, &candidate.owner_id, candidate.memory_type, &hash)?
    {
        return Ok(ResolveOutcome::Noop {
            existing_id: existing.id,
            duplicate: Duplicate::Exact,
        });
    }

    match nearest(conn, candidate)? {
        Some((id, _, sim)) if sim > DUPLICATE_THRESHOLD => Ok(ResolveOutcome::Noop {
            existing_id: id,
            duplicate: Duplicate::Semantic(sim),
        }),
        Some((old_id, version, sim)) if sim > UPDATE_THRESHOLD => {
            let old = store::get_record(conn, &old_id)?;
            let new_id = add(conn, candidate, hash, now)?;
            store::supersede(conn, &old_id, version, &new_id, now)?;
            store::append_history(
                conn,
                NewHistory {
                    memory_id: &old_id,
                    owner_id: &candidate.owner_id,
                    memory_type: candidate.memory_type,
                    event: HistoryEvent::Update,
                    old_content: old.as_ref().map(|r| r.content.as_str()),
                    new_content: Some(&candidate.content),
                    old_metadata: None,
                    new_metadata: Some(serde_json::json!({ "superseded_by": new_id })),
                    actor: "system",
                    at: now,
                },
            )?;
            Ok(ResolveOutcome::Updated {
                id: new_id,
                superseded: old_id,
                similarity: sim,
            })
        }
        _ => {
            let id = add(conn, candidate, hash, now)?;
            Ok(ResolveOutcome::Added { id })
        }
    }
}

/// Writes facts, episodes and documents through the dedup policy.
#[derive(Clone)]
pub struct ConflictResolver {
    db: Database,
    clock: Arc<dyn Clock>,
    embedding_dims: Option<usize>,
}

impl ConflictResolver {
    pub fn new(db: Database, clock: Arc<dyn Clock>, embedding_dims: Option<usize>) -> Self {
        Self {
            db,
            clock,
            embedding_dims,
        }
    }

    /// Validate, then resolve and store in one transaction.
    pub async fn resolve_and_store(
        &self,
        candidate: NewMemory,
    ) -> Result<ResolveOutcome, TesseraError> {
        validate_candidate(&candidate, self.embedding_dims)?;
        let now = self.clock.now();
        let outcome = self
            .db
            .write(move |tx| resolve_in_tx(tx, &candidate, now))
            .await?;
        metrics::counter!("tessera_resolve_total", "outcome" => outcome.label()).increment(1);
        debug!(outcome = outcome.label(), memory_id = outcome.memory_id(), "candidate resolved");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MemoryMetadata;

    fn candidate(kind: MemoryType, content: &str, embedding: Vec<f32>) -> NewMemory {
        NewMemory {
            owner_id: "u1".into(),
            memory_type: kind,
            content: content.into(),
            embedding,
            metadata: MemoryMetadata::default(),
            event_time: None,
        }
    }

    #[test]
    fn rejects_malformed_candidates() {
        let ok = candidate(MemoryType::Fact, "x", vec![1.0, 0.0]);
        assert!(validate_candidate(&ok, Some(2)).is_ok());
        assert!(validate_candidate(&ok, Some(3)).is_err());

        let empty = candidate(MemoryType::Fact, "  ", vec![1.0]);
        assert!(matches!(
            validate_candidate(&empty, None),
            Err(TesseraError::Validation(_))
        ));
        let nan = candidate(MemoryType::Fact, "x", vec![f32::NAN]);
        assert!(validate_candidate(&nan, None).is_err());
        let no_vec = candidate(MemoryType::Fact, "x", vec![]);
        assert!(validate_candidate(&no_vec, None).is_err());
        let tr = candidate(MemoryType::Trait, "x", vec![1.0]);
        assert!(validate_candidate(&tr, None).is_err());
    }

    #[tokio::test]
    async fn validation_happens_before_write() {
        let db = Database::open_in_memory().await.unwrap();
        let resolver =
            ConflictResolver::new(db.clone(), Arc::new(tessera_core::SystemClock), Some(2));
        let err = resolver
            .resolve_and_store(candidate(MemoryType::Fact, "x", vec![1.0, 2.0, 3.0]))
            .await
            .unwrap_err();
        assert!(matches!(err, TesseraError::Validation(_)));
        let count: i64 = db
            .read(|c| Ok(c.query_row("SELECT COUNT(*) FROM memories", [], |r| r.get(0))?))
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn documents_dedup_like_facts() {
        let db = Database::open_in_memory().await.unwrap();
        let resolver = ConflictResolver::new(db, Arc::new(tessera_core::SystemClock), None);
        let first = resolver
            .resolve_and_store(candidate(MemoryType::Document, "readme", vec![1.0, 0.0]))
            .await
            .unwrap();
        assert!(matches!(first, ResolveOutcome::Added { .. }));
        let second = resolver
            .resolve_and_store(candidate(MemoryType::Document, "readme", vec![0.0, 1.0]))
            .await
            .unwrap();
        assert_eq!(
            second,
            ResolveOutcome::Noop {
                existing_id: first.memory_id().to_string(),
                duplicate: Duplicate::Exact
            }
        );
    }
}
