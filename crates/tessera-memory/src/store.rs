// SPDX-FileCopyrightText: 2026 Tessera Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Row-level access to the `memories`, `trait_evidence` and `memory_history`
//! tables.
//!
//! The synchronous helpers take a `&rusqlite::Connection` so the resolver,
//! trait engine and ingestor can compose them inside one transaction. The
//! async methods on [`MemoryStore`] each run as a single transaction.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use serde::Serialize;
use tessera_core::{Clock, TesseraError};
use tessera_storage::codec::{blob_to_vec, get_opt_ts, get_ts, ts_to_sql, vec_to_blob};
use tessera_storage::{Database, TxError};
use tracing::{debug, info};

use crate::types::{
    EvidenceDirection, EvidenceRecord, HistoryEntry, HistoryEvent, MemoryKind, MemoryMetadata,
    MemoryRecord, MemoryType, QualityGrade, TraitStage, TraitState, TraitSubtype, TrendWindow,
    coalesce_confidence, coalesce_stage, coalesce_subtype,
};

/// Column list for [`row_to_record`]. Queries must alias `memories` as `m`.
pub(crate) const SELECT_COLUMNS: &str = "m.id, m.owner_id, m.memory_type, m.content, \
    m.embedding, m.metadata, m.content_hash, m.importance, m.access_count, \
    m.last_accessed_at, m.created_at, m.updated_at, m.event_time, m.valid_from, \
    m.valid_until, m.version, m.superseded_by, m.expired_at, m.trait_subtype, \
    m.trait_stage, m.trait_confidence, m.trait_context, m.trait_parent_id, \
    m.trait_reinforcement_count, m.trait_contradiction_count, m.trait_last_reinforced, \
    m.trait_first_observed, m.trait_window_start, m.trait_window_end, m.trait_derived_from";

fn conversion_err(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

/// Map a row selected with [`SELECT_COLUMNS`] to a typed record.
///
/// Trait attributes come from their dedicated columns when present and fall
/// back to the legacy keys in the metadata document.
pub(crate) fn row_to_record(row: &rusqlite::Row<'_>) -> Result<MemoryRecord, rusqlite::Error> {
    let memory_type: String = row.get(2)?;
    let memory_type: MemoryType = memory_type.parse().map_err(|e| conversion_err(2, e))?;
    let blob: Vec<u8> = row.get(4)?;
    let raw_meta: String = row.get(5)?;
    let metadata = MemoryMetadata::from_json(&raw_meta);

    let event_time = match get_opt_ts(row, 12)? {
        Some(ts) => Some(ts),
        None => metadata
            .event_time
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
    };

    let kind = match memory_type {
        MemoryType::Fact => MemoryKind::Fact,
        MemoryType::Episodic => MemoryKind::Episodic,
        MemoryType::Document => MemoryKind::Document,
        MemoryType::Trait => {
            let confidence = coalesce_confidence(row.get(20)?, &metadata).unwrap_or(0.3);
            let subtype = coalesce_subtype(row.get(18)?, &metadata).unwrap_or(TraitSubtype::Behavior);
            let stage = coalesce_stage(row.get(19)?, &metadata)
                .unwrap_or_else(|| TraitStage::from_confidence(confidence));
            let window = match (get_opt_ts(row, 27)?, get_opt_ts(row, 28)?) {
                (Some(start), Some(end)) => Some(TrendWindow { start, end }),
                _ => None,
            };
            MemoryKind::Trait(TraitState {
                subtype,
                stage,
                confidence,
                context: row.get(21)?,
                parent_id: row.get(22)?,
                reinforcement_count: row.get::<_, Option<i64>>(23)?.unwrap_or(0),
                contradiction_count: row.get::<_, Option<i64>>(24)?.unwrap_or(0),
                last_reinforced: get_opt_ts(row, 25)?,
                first_observed: get_opt_ts(row, 26)?,
                window,
                derived_from: row.get(29)?,
            })
        }
    };

    Ok(MemoryRecord {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        content: row.get(3)?,
        embedding: blob_to_vec(&blob),
        metadata,
        content_hash: row.get(6)?,
        importance: row.get(7)?,
        access_count: row.get(8)?,
        last_accessed_at: get_opt_ts(row, 9)?,
        created_at: get_ts(row, 10)?,
        updated_at: get_ts(row, 11)?,
        event_time,
        valid_from: get_ts(row, 13)?,
        valid_until: get_opt_ts(row, 14)?,
        version: row.get(15)?,
        superseded_by: row.get(16)?,
        expired_at: get_opt_ts(row, 17)?,
        kind,
    })
}

/// Insert a fully-built record.
pub(crate) fn insert_record(
    conn: &rusqlite::Connection,
    record: &MemoryRecord,
) -> Result<(), TxError> {
    let metadata = serde_json::to_string(&record.metadata)?;
    let ts = |t: &Option<DateTime<Utc>>| t.as_ref().map(ts_to_sql);
    let state = record.trait_state();
    conn.execute(
        "INSERT INTO memories (id, owner_id, memory_type, content, embedding, metadata, \
         content_hash, importance, access_count, last_accessed_at, created_at, updated_at, \
         event_time, valid_from, valid_until, version, superseded_by, expired_at, \
         trait_subtype, trait_stage, trait_confidence, trait_context, trait_parent_id, \
         trait_reinforcement_count, trait_contradiction_count, trait_last_reinforced, \
         trait_first_observed, trait_window_start, trait_window_end, trait_derived_from) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, \
         ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30)",
        rusqlite::params![
            record.id,
            record.owner_id,
            record.memory_type().as_ref(),
            record.content,
            vec_to_blob(&record.embedding),
            metadata,
            record.content_hash,
            record.importance,
            record.access_count,
            ts(&record.last_accessed_at),
            ts_to_sql(&record.created_at),
            ts_to_sql(&record.updated_at),
            ts(&record.event_time),
            ts_to_sql(&record.valid_from),
            ts(&record.valid_until),
            record.version,
            record.superseded_by,
            ts(&record.expired_at),
            state.map(|s| s.subtype.as_ref()),
            state.map(|s| s.stage.as_ref()),
            state.map(|s| s.confidence),
            state.and_then(|s| s.context.clone()),
            state.and_then(|s| s.parent_id.clone()),
            state.map(|s| s.reinforcement_count),
            state.map(|s| s.contradiction_count),
            state.and_then(|s| s.last_reinforced.as_ref().map(ts_to_sql)),
            state.and_then(|s| s.first_observed.as_ref().map(ts_to_sql)),
            state.and_then(|s| s.window.as_ref().map(|w| ts_to_sql(&w.start))),
            state.and_then(|s| s.window.as_ref().map(|w| ts_to_sql(&w.end))),
            state.and_then(|s| s.derived_from.clone()),
        ],
    )?;
    Ok(())
}

pub(crate) fn get_record(
    conn: &rusqlite::Connection,
    id: &str,
) -> Result<Option<MemoryRecord>, TxError> {
    let sql = format!("SELECT {SELECT_COLUMNS} FROM memories m WHERE m.id = ?1");
    Ok(conn
        .query_row(&sql, rusqlite::params![id], row_to_record)
        .optional()?)
}

/// Record for `id` only if it belongs to `owner`.
pub(crate) fn get_owned_record(
    conn: &rusqlite::Connection,
    owner: &str,
    id: &str,
) -> Result<Option<MemoryRecord>, TxError> {
    Ok(get_record(conn, id)?.filter(|r| r.owner_id == owner))
}

/// Active record of this owner and type with an identical content hash.
pub(crate) fn find_active_by_hash(
    conn: &rusqlite::Connection,
    owner: &str,
    memory_type: MemoryType,
    hash: &str,
) -> Result<Option<MemoryRecord>, TxError> {
    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM memories m WHERE m.owner_id = ?1 AND m.memory_type = ?2 \
         AND m.content_hash = ?3 AND m.valid_until IS NULL LIMIT 1"
    );
    Ok(conn
        .query_row(
            &sql,
            rusqlite::params![owner, memory_type.as_ref(), hash],
            row_to_record,
        )
        .optional()?)
}

/// `(id, version, embedding)` of every active record of this owner and type.
pub(crate) fn active_embeddings(
    conn: &rusqlite::Connection,
    owner: &str,
    memory_type: MemoryType,
) -> Result<Vec<(String, i64, Vec<f32>)>, TxError> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, version, embedding FROM memories \
         WHERE owner_id = ?1 AND memory_type = ?2 AND valid_until IS NULL",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![owner, memory_type.as_ref()], |row| {
            let blob: Vec<u8> = row.get(2)?;
            Ok((row.get(0)?, row.get(1)?, blob_to_vec(&blob)))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Keep only the ids that name an existing record of `owner`, preserving
/// order and dropping repeats.
pub(crate) fn existing_ids(
    conn: &rusqlite::Connection,
    owner: &str,
    ids: &[String],
) -> Result<Vec<String>, TxError> {
    let mut stmt =
        conn.prepare_cached("SELECT 1 FROM memories WHERE id = ?1 AND owner_id = ?2")?;
    let mut seen = HashSet::new();
    let mut valid = Vec::new();
    for id in ids {
        if !seen.insert(id.as_str()) {
            continue;
        }
        if stmt.exists(rusqlite::params![id, owner])? {
            valid.push(id.clone());
        }
    }
    Ok(valid)
}

/// Close `old_id`'s validity interval and link it forward to `new_id`.
pub(crate) fn supersede(
    conn: &rusqlite::Connection,
    old_id: &str,
    expected_version: i64,
    new_id: &str,
    now: DateTime<Utc>,
) -> Result<(), TxError> {
    let now = ts_to_sql(&now);
    let changed = conn.execute(
        "UPDATE memories SET valid_until = ?1, superseded_by = ?2, updated_at = ?1, \
         version = version + 1 \
         WHERE id = ?3 AND version = ?4 AND valid_until IS NULL",
        rusqlite::params![now, new_id, old_id, expected_version],
    )?;
    if changed == 0 {
        return Err(TxError::Conflict {
            id: old_id.to_string(),
            expected_version,
        });
    }
    Ok(())
}

/// One audit row to append.
pub(crate) struct NewHistory<'a> {
    pub memory_id: &'a str,
    pub owner_id: &'a str,
    pub memory_type: MemoryType,
    pub event: HistoryEvent,
    pub old_content: Option<&'a str>,
    pub new_content: Option<&'a str>,
    pub old_metadata: Option<serde_json::Value>,
    pub new_metadata: Option<serde_json::Value>,
    pub actor: &'a str,
    pub at: DateTime<Utc>,
}

pub(crate) fn append_history(
    conn: &rusqlite::Connection,
    entry: NewHistory<'_>,
) -> Result<(), TxError> {
    let old_metadata = entry.old_metadata.map(|v| v.to_string());
    let new_metadata = entry.new_metadata.map(|v| v.to_string());
    conn.execute(
        "INSERT INTO memory_history (memory_id, owner_id, memory_type, event, old_content, \
         new_content, old_metadata, new_metadata, actor, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        rusqlite::params![
            entry.memory_id,
            entry.owner_id,
            entry.memory_type.as_ref(),
            entry.event.as_ref(),
            entry.old_content,
            entry.new_content,
            old_metadata,
            new_metadata,
            entry.actor,
            ts_to_sql(&entry.at),
        ],
    )?;
    Ok(())
}

pub(crate) fn append_evidence(
    conn: &rusqlite::Connection,
    trait_id: &str,
    memory_ids: &[String],
    direction: EvidenceDirection,
    quality: QualityGrade,
    at: DateTime<Utc>,
) -> Result<(), TxError> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO trait_evidence (trait_id, memory_id, direction, quality, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    let at = ts_to_sql(&at);
    for memory_id in memory_ids {
        stmt.execute(rusqlite::params![
            trait_id,
            memory_id,
            direction.as_ref(),
            quality.as_ref(),
            at
        ])?;
    }
    Ok(())
}

pub(crate) fn evidence_for(
    conn: &rusqlite::Connection,
    trait_id: &str,
) -> Result<Vec<EvidenceRecord>, TxError> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, trait_id, memory_id, direction, quality, created_at \
         FROM trait_evidence WHERE trait_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![trait_id], |row| {
            let direction: String = row.get(3)?;
            let quality: String = row.get(4)?;
            Ok(EvidenceRecord {
                id: row.get(0)?,
                trait_id: row.get(1)?,
                memory_id: row.get(2)?,
                direction: direction.parse().map_err(|e| conversion_err(3, e))?,
                quality: quality.parse().map_err(|e| conversion_err(4, e))?,
                created_at: get_ts(row, 5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn history_for(conn: &rusqlite::Connection, memory_id: &str) -> Result<Vec<HistoryEntry>, TxError> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, memory_id, owner_id, memory_type, event, old_content, new_content, \
         old_metadata, new_metadata, actor, created_at \
         FROM memory_history WHERE memory_id = ?1 ORDER BY id",
    )?;
    let json = |raw: Option<String>| raw.and_then(|s| serde_json::from_str(&s).ok());
    let rows = stmt
        .query_map(rusqlite::params![memory_id], |row| {
            let memory_type: String = row.get(3)?;
            let event: String = row.get(4)?;
            Ok(HistoryEntry {
                id: row.get(0)?,
                memory_id: row.get(1)?,
                owner_id: row.get(2)?,
                memory_type: memory_type.parse().map_err(|e| conversion_err(3, e))?,
                event: event.parse().map_err(|e| conversion_err(4, e))?,
                old_content: row.get(5)?,
                new_content: row.get(6)?,
                old_metadata: json(row.get(7)?),
                new_metadata: json(row.get(8)?),
                actor: row.get(9)?,
                created_at: get_ts(row, 10)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Counts returned by [`MemoryStore::rollback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RollbackReport {
    pub invalidated: usize,
    pub reactivated: usize,
}

/// Rows removed by [`MemoryStore::delete_owner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ErasureReport {
    pub memories: usize,
    pub evidence: usize,
    pub history: usize,
}

/// Read and bulk-maintenance access to stored memories.
#[derive(Clone)]
pub struct MemoryStore {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Get a record by id, whatever its validity.
    pub async fn get(&self, id: &str) -> Result<Option<MemoryRecord>, TesseraError> {
        let id = id.to_string();
        self.db.read(move |conn| get_record(conn, &id)).await
    }

    /// Audit trail of one record, oldest first.
    pub async fn history(&self, memory_id: &str) -> Result<Vec<HistoryEntry>, TesseraError> {
        let memory_id = memory_id.to_string();
        self.db.read(move |conn| history_for(conn, &memory_id)).await
    }

    /// Active records of one owner, optionally of one type, newest first.
    pub async fn list_active(
        &self,
        owner: &str,
        memory_type: Option<MemoryType>,
    ) -> Result<Vec<MemoryRecord>, TesseraError> {
        let owner = owner.to_string();
        self.db
            .read(move |conn| {
                let sql = format!(
                    "SELECT {SELECT_COLUMNS} FROM memories m WHERE m.owner_id = ?1 \
                     AND m.valid_until IS NULL AND (?2 IS NULL OR m.memory_type = ?2) \
                     ORDER BY m.created_at DESC"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(
                        rusqlite::params![owner, memory_type.map(|t| t.to_string())],
                        row_to_record,
                    )?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Insert a record verbatim, bypassing conflict resolution.
    ///
    /// Used for imports and seeding; the unique active-hash index still
    /// rejects a second active fact or document with the same content.
    pub async fn insert(&self, record: MemoryRecord) -> Result<(), TesseraError> {
        self.db
            .write(move |tx| {
                insert_record(tx, &record)?;
                append_history(
                    tx,
                    NewHistory {
                        memory_id: &record.id,
                        owner_id: &record.owner_id,
                        memory_type: record.memory_type(),
                        event: HistoryEvent::Add,
                        old_content: None,
                        new_content: Some(&record.content),
                        old_metadata: None,
                        new_metadata: None,
                        actor: "system",
                        at: record.created_at,
                    },
                )
            })
            .await
    }

    /// Undo everything recorded after `to`.
    ///
    /// Records that became valid after `to` are closed at the current time.
    /// Records that were current at `to` but closed since are reopened and
    /// lose their forward link.
    pub async fn rollback(
        &self,
        owner: &str,
        to: DateTime<Utc>,
    ) -> Result<RollbackReport, TesseraError> {
        let owner = owner.to_string();
        let now = self.clock.now();
        let report = self
            .db
            .write(move |tx| {
                let to_sql = ts_to_sql(&to);
                let now_sql = ts_to_sql(&now);

                let newer = select_ids(
                    tx,
                    "SELECT id, memory_type, content FROM memories WHERE owner_id = ?1 \
                     AND valid_until IS NULL AND valid_from > ?2",
                    &owner,
                    &to_sql,
                )?;
                for (id, memory_type, content) in &newer {
                    tx.execute(
                        "UPDATE memories SET valid_until = ?1, updated_at = ?1, \
                         version = version + 1 WHERE id = ?2",
                        rusqlite::params![now_sql, id],
                    )?;
                    append_history(
                        tx,
                        NewHistory {
                            memory_id: id,
                            owner_id: &owner,
                            memory_type: *memory_type,
                            event: HistoryEvent::RollbackInvalidate,
                            old_content: Some(content),
                            new_content: None,
                            old_metadata: None,
                            new_metadata: None,
                            actor: "rollback",
                            at: now,
                        },
                    )?;
                }

                let closed = select_ids(
                    tx,
                    "SELECT id, memory_type, content FROM memories WHERE owner_id = ?1 \
                     AND valid_from <= ?2 AND valid_until IS NOT NULL AND valid_until > ?2",
                    &owner,
                    &to_sql,
                )?;
                for (id, memory_type, content) in &closed {
                    tx.execute(
                        "UPDATE memories SET valid_until = NULL, superseded_by = NULL, \
                         updated_at = ?1, version = version + 1 WHERE id = ?2",
                        rusqlite::params![now_sql, id],
                    )?;
                    append_history(
                        tx,
                        NewHistory {
                            memory_id: id,
                            owner_id: &owner,
                            memory_type: *memory_type,
                            event: HistoryEvent::RollbackReactivate,
                            old_content: None,
                            new_content: Some(content),
                            old_metadata: None,
                            new_metadata: None,
                            actor: "rollback",
                            at: now,
                        },
                    )?;
                }

                Ok(RollbackReport {
                    invalidated: newer.len(),
                    reactivated: closed.len(),
                })
            })
            .await?;
        info!(
            invalidated = report.invalidated,
            reactivated = report.reactivated,
            "rollback complete"
        );
        Ok(report)
    }

    /// Physically delete every record, evidence row and history row of `owner`.
    pub async fn delete_owner(&self, owner: &str) -> Result<ErasureReport, TesseraError> {
        let owner = owner.to_string();
        let report = self
            .db
            .write(move |tx| {
                let evidence = tx.execute(
                    "DELETE FROM trait_evidence WHERE trait_id IN \
                     (SELECT id FROM memories WHERE owner_id = ?1)",
                    rusqlite::params![owner],
                )?;
                let history = tx.execute(
                    "DELETE FROM memory_history WHERE owner_id = ?1",
                    rusqlite::params![owner],
                )?;
                let memories = tx.execute(
                    "DELETE FROM memories WHERE owner_id = ?1",
                    rusqlite::params![owner],
                )?;
                Ok(ErasureReport {
                    memories,
                    evidence,
                    history,
                })
            })
            .await?;
        debug!(?report, "owner data deleted");
        Ok(report)
    }
}

fn select_ids(
    conn: &rusqlite::Connection,
    sql: &str,
    owner: &str,
    to: &str,
) -> Result<Vec<(String, MemoryType, String)>, TxError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(rusqlite::params![owner, to], |row| {
            let memory_type: String = row.get(1)?;
            Ok((
                row.get(0)?,
                memory_type.parse().map_err(|e| conversion_err(1, e))?,
                row.get(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tessera_core::SystemClock;

    use crate::types::content_hash;

    fn record(id: &str, owner: &str, content: &str, at: DateTime<Utc>) -> MemoryRecord {
        MemoryRecord {
            id: id.into(),
            owner_id: owner.into(),
            content: content.into(),
            embedding: vec![1.0, 0.0],
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
            kind: MemoryKind::Fact,
        }
    }

    async fn store() -> MemoryStore {
        let db = Database::open_in_memory().await.unwrap();
        MemoryStore::new(db, Arc::new(SystemClock))
    }

    #[tokio::test]
    async fn insert_and_get_roundtrip() {
        let store = store().await;
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let mut rec = record("m1", "u1", "likes tea", at);
        rec.metadata.category = Some("preference".into());
        store.insert(rec.clone()).await.unwrap();

        let got = store.get("m1").await.unwrap().unwrap();
        assert_eq!(got, rec);
        assert!(store.get("missing").await.unwrap().is_none());
        let history = store.history("m1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].event, HistoryEvent::Add);
    }

    #[tokio::test]
    async fn legacy_trait_metadata_is_coalesced() {
        let store = store().await;
        let at = Utc::now();
        store.insert(record("t1", "u1", "x", at)).await.unwrap();
        store
            .database()
            .write(|tx| {
                tx.execute(
                    "UPDATE memories SET memory_type = 'trait', \
                     metadata = '{\"trait_stage\":\"established\",\"trait_confidence\":0.7}' \
                     WHERE id = 't1'",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();
        let got = store.get("t1").await.unwrap().unwrap();
        let state = got.trait_state().unwrap();
        assert_eq!(state.stage, TraitStage::Established);
        assert_eq!(state.confidence, 0.7);
        assert_eq!(state.subtype, TraitSubtype::Behavior);
    }

    #[tokio::test]
    async fn existing_ids_filters_by_owner_and_dedups() {
        let store = store().await;
        let at = Utc::now();
        store.insert(record("a", "u1", "a", at)).await.unwrap();
        store.insert(record("b", "u2", "b", at)).await.unwrap();
        let ids = vec!["a".to_string(), "b".into(), "a".into(), "zz".into()];
        let valid = store
            .database()
            .read(move |conn| existing_ids(conn, "u1", &ids))
            .await
            .unwrap();
        assert_eq!(valid, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn supersede_checks_version() {
        let store = store().await;
        let at = Utc::now();
        store.insert(record("a", "u1", "a", at)).await.unwrap();
        let err = store
            .database()
            .write(move |tx| supersede(tx, "a", 7, "b", at))
            .await
            .unwrap_err();
        assert!(matches!(err, TesseraError::Conflict { expected_version: 7, .. }));

        store
            .database()
            .write(move |tx| supersede(tx, "a", 1, "b", at))
            .await
            .unwrap();
        let a = store.get("a").await.unwrap().unwrap();
        assert_eq!(a.superseded_by.as_deref(), Some("b"));
        assert_eq!(a.version, 2);
        assert!(!a.is_active());
    }

    #[tokio::test]
    async fn rollback_with_nothing_after_is_zero() {
        let store = store().await;
        let at = Utc::now() - Duration::days(2);
        store.insert(record("a", "u1", "a", at)).await.unwrap();
        let report = store.rollback("u1", Utc::now()).await.unwrap();
        assert_eq!(report, RollbackReport::default());
        assert!(store.get("a").await.unwrap().unwrap().is_active());
    }

    #[tokio::test]
    async fn list_active_filters_type() {
        let store = store().await;
        let at = Utc::now();
        store.insert(record("a", "u1", "a", at)).await.unwrap();
        let mut ep = record("b", "u1", "b", at);
        ep.kind = MemoryKind::Episodic;
        store.insert(ep).await.unwrap();
        assert_eq!(store.list_active("u1", None).await.unwrap().len(), 2);
        let facts = store.list_active("u1", Some(MemoryType::Fact)).await.unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].id, "a");
    }
}
