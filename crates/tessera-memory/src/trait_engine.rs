// SPDX-FileCopyrightText: 2026 Tessera Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trait lifecycle: creation with dedup, reinforcement, contradiction,
//! upgrade, trend promotion and expiry, and time-based decay.
//!
//! Every mutation is a compare-and-swap on `version` inside one transaction.
//! A dissolved trait is never modified again.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tessera_core::{AdapterType, Clock, EmbeddingAdapter, EmbeddingInput, TesseraError};
use tessera_storage::codec::ts_to_sql;
use tessera_storage::{Database, TxError};
use tracing::{debug, info, warn};

use crate::judge::{ContradictionCase, ContradictionJudge, EvidenceLine, Judgment};
use crate::store::{self, NewHistory, SELECT_COLUMNS, row_to_record};
use crate::types::{
    EvidenceDirection, EvidenceRecord, HistoryEvent, MemoryKind, MemoryMetadata, MemoryRecord,
    MemoryType, QualityGrade, TraitStage, TraitState, TraitSubtype, TrendWindow, content_hash,
    cosine_similarity,
};

/// Confidence given to a new trend and to a trend promoted to candidate.
pub const TREND_CONFIDENCE: f64 = 0.3;

/// Reinforcements a trend needs before its window closes to be promoted.
pub const PROMOTION_MIN_REINFORCEMENTS: i64 = 2;

/// Traits above this similarity are treated as the same trait.
pub const SIMILAR_TRAIT_THRESHOLD: f64 = 0.95;

const CONTRADICTION_RATIO_GATE: f64 = 0.3;

/// Longest observation window a trend may ask for.
pub const MAX_TREND_WINDOW_DAYS: i64 = 3650;

/// `old + (1 - old) * factor`, clamped to [0, 1].
pub fn reinforced_confidence(old: f64, quality: QualityGrade) -> f64 {
    (old + (1.0 - old) * quality.reinforcement_factor()).clamp(0.0, 1.0)
}

/// Multiplicative penalty: 40% for several contradicting items in one call,
/// 20% for a single one.
pub fn contradicted_confidence(old: f64, contradicting_items: usize) -> f64 {
    let penalty = if contradicting_items > 1 { 0.4 } else { 0.2 };
    (old * (1.0 - penalty)).clamp(0.0, 1.0)
}

/// Exponential decay, slowed by prior reinforcement.
pub fn decayed_confidence(
    old: f64,
    subtype: TraitSubtype,
    reinforcement_count: i64,
    days: f64,
) -> f64 {
    let rate = subtype.base_decay_rate() / (1.0 + 0.1 * reinforcement_count as f64);
    (old * (-rate * days).exp()).clamp(0.0, 1.0)
}

/// Result of a creation, merge or reinforcement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TraitOutcome {
    Created {
        id: String,
        stage: TraitStage,
        confidence: f64,
    },
    /// A near-identical trait already existed and absorbed the evidence.
    Merged {
        id: String,
        reinforcement_count: i64,
    },
    Updated {
        id: String,
        stage: TraitStage,
        confidence: f64,
    },
    /// The trait is dissolved and was left untouched.
    Terminal {
        id: String,
    },
    NotFound {
        id: String,
    },
}

impl TraitOutcome {
    pub fn id(&self) -> &str {
        match self {
            TraitOutcome::Created { id, .. }
            | TraitOutcome::Merged { id, .. }
            | TraitOutcome::Updated { id, .. }
            | TraitOutcome::Terminal { id }
            | TraitOutcome::NotFound { id } => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ContradictionOutcome {
    Applied {
        id: String,
        confidence: f64,
        needs_special_reflection: bool,
    },
    Terminal {
        id: String,
    },
    NotFound {
        id: String,
    },
}

impl ContradictionOutcome {
    pub fn needs_special_reflection(&self) -> bool {
        matches!(
            self,
            ContradictionOutcome::Applied {
                needs_special_reflection: true,
                ..
            }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResolutionOutcome {
    Modified {
        id: String,
        content: String,
        confidence: f64,
        stage: TraitStage,
    },
    Dissolved {
        id: String,
        reasoning: String,
    },
    Terminal {
        id: String,
    },
    NotFound {
        id: String,
    },
}

/// Why an upgrade did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeSkip {
    NoSources,
    BelowThreshold,
    AlreadyParented,
    InvalidSubtype,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpgradeOutcome {
    Upgraded {
        id: String,
        confidence: f64,
        sources: Vec<String>,
    },
    Skipped {
        reason: UpgradeSkip,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DecayStats {
    pub decayed: usize,
    pub dissolved: usize,
}

/// Result of one periodic maintenance pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MaintenanceReport {
    pub expired: usize,
    pub promoted: usize,
    pub decay: DecayStats,
}

/// Trait creation parameters shared by trends and behaviors.
struct TraitDraft {
    owner: String,
    content: String,
    embedding: Vec<f32>,
    evidence_ids: Vec<String>,
    context: String,
    shape: DraftShape,
}

enum DraftShape {
    Trend { window_days: i64 },
    Behavior { confidence: f64 },
}

impl DraftShape {
    fn evidence_quality(&self) -> QualityGrade {
        match self {
            DraftShape::Trend { .. } => QualityGrade::D,
            DraftShape::Behavior { .. } => QualityGrade::C,
        }
    }
}

fn record_transition(stage: TraitStage) {
    metrics::counter!("tessera_trait_transitions_total", "to" => stage.to_string()).increment(1);
}

/// Trait of `owner` with this id, paired with its state.
fn load_trait(
    conn: &rusqlite::Connection,
    owner: &str,
    id: &str,
) -> Result<Option<(MemoryRecord, TraitState)>, TxError> {
    Ok(store::get_owned_record(conn, owner, id)?.and_then(|r| {
        let state = r.trait_state().cloned()?;
        Some((r, state))
    }))
}

/// Every current trait of an owner.
fn owner_traits(conn: &rusqlite::Connection, owner: &str) -> Result<Vec<MemoryRecord>, TxError> {
    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM memories m WHERE m.owner_id = ?1 \
         AND m.memory_type = 'trait' AND m.valid_until IS NULL ORDER BY m.created_at"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params![owner], row_to_record)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn traits_in_stage(
    conn: &rusqlite::Connection,
    owner: &str,
    keep: impl Fn(TraitStage) -> bool,
) -> Result<Vec<(MemoryRecord, TraitState)>, TxError> {
    Ok(owner_traits(conn, owner)?
        .into_iter()
        .filter_map(|r| {
            let state = r.trait_state().cloned()?;
            keep(state.stage).then_some((r, state))
        })
        .collect())
}

/// Exact-hash match first, then the nearest non-dissolved trait above the
/// similarity threshold.
fn find_similar_trait(
    conn: &rusqlite::Connection,
    owner: &str,
    hash: &str,
    embedding: &[f32],
) -> Result<Option<(MemoryRecord, TraitState)>, TxError> {
    let live = traits_in_stage(conn, owner, |s| !s.is_terminal())?;
    if let Some(hit) = live.iter().find(|(r, _)| r.content_hash == hash) {
        return Ok(Some(hit.clone()));
    }
    let mut best: Option<(f64, usize)> = None;
    for (i, (r, _)) in live.iter().enumerate() {
        let sim = cosine_similarity(embedding, &r.embedding);
        if sim > SIMILAR_TRAIT_THRESHOLD && best.is_none_or(|(b, _)| sim > b) {
            best = Some((sim, i));
        }
    }
    Ok(best.and_then(|(_, i)| live.into_iter().nth(i)))
}

/// Write every mutable trait column and bump the version, checking the
/// version the caller read.
fn update_trait(
    conn: &rusqlite::Connection,
    record: &MemoryRecord,
    state: &TraitState,
    expired_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<(), TxError> {
    let ts = |t: Option<DateTime<Utc>>| t.as_ref().map(ts_to_sql);
    let changed = conn.execute(
        "UPDATE memories SET trait_stage = ?1, trait_confidence = ?2, trait_context = ?3, \
         trait_parent_id = ?4, trait_reinforcement_count = ?5, trait_contradiction_count = ?6, \
         trait_last_reinforced = ?7, trait_first_observed = ?8, trait_window_start = ?9, \
         trait_window_end = ?10, expired_at = ?11, updated_at = ?12, version = version + 1 \
         WHERE id = ?13 AND version = ?14",
        rusqlite::params![
            state.stage.as_ref(),
            state.confidence,
            state.context,
            state.parent_id,
            state.reinforcement_count,
            state.contradiction_count,
            ts(state.last_reinforced),
            ts(state.first_observed),
            ts(state.window.map(|w| w.start)),
            ts(state.window.map(|w| w.end)),
            ts(expired_at),
            ts_to_sql(&now),
            record.id,
            record.version,
        ],
    )?;
    if changed == 0 {
        return Err(TxError::Conflict {
            id: record.id.clone(),
            expected_version: record.version,
        });
    }
    Ok(())
}

fn earliest_created_at(
    conn: &rusqlite::Connection,
    ids: &[String],
) -> Result<Option<DateTime<Utc>>, TxError> {
    let mut earliest = None;
    for id in ids {
        if let Some(r) = store::get_record(conn, id)?
            && earliest.is_none_or(|e| r.created_at < e)
        {
            earliest = Some(r.created_at);
        }
    }
    Ok(earliest)
}

fn stage_history(
    conn: &rusqlite::Connection,
    record: &MemoryRecord,
    event: HistoryEvent,
    new_metadata: Option<serde_json::Value>,
    actor: &str,
    now: DateTime<Utc>,
) -> Result<(), TxError> {
    store::append_history(
        conn,
        NewHistory {
            memory_id: &record.id,
            owner_id: &record.owner_id,
            memory_type: MemoryType::Trait,
            event,
            old_content: Some(&record.content),
            new_content: None,
            old_metadata: None,
            new_metadata,
            actor,
            at: now,
        },
    )
}

/// End of a trend window opened at `start`, or a validation error when it
/// cannot be represented.
fn trend_window_end(start: DateTime<Utc>, window_days: i64) -> Result<DateTime<Utc>, TxError> {
    Duration::try_days(window_days)
        .and_then(|span| start.checked_add_signed(span))
        .ok_or_else(|| TxError::Validation(format!("trend window of {window_days} days overflows")))
}

fn create_or_merge(
    conn: &rusqlite::Connection,
    draft: &TraitDraft,
    now: DateTime<Utc>,
) -> Result<TraitOutcome, TxError> {
    let hash = content_hash(&draft.content);
    let valid = store::existing_ids(conn, &draft.owner, &draft.evidence_ids)?;
    let quality = draft.shape.evidence_quality();

    if let Some((existing, mut state)) =
        find_similar_trait(conn, &draft.owner, &hash, &draft.embedding)?
    {
        state.reinforcement_count += valid.len() as i64;
        state.last_reinforced = Some(now);
        update_trait(conn, &existing, &state, existing.expired_at, now)?;
        store::append_evidence(
            conn,
            &existing.id,
            &valid,
            EvidenceDirection::Supporting,
            quality,
            now,
        )?;
        debug!(trait_id = %existing.id, added = valid.len(), "trait dedup hit, merged");
        return Ok(TraitOutcome::Merged {
            id: existing.id,
            reinforcement_count: state.reinforcement_count,
        });
    }

    let mut metadata = MemoryMetadata::default();
    let state = match draft.shape {
        DraftShape::Trend { window_days } => TraitState {
            subtype: TraitSubtype::Behavior,
            stage: TraitStage::Trend,
            confidence: TREND_CONFIDENCE,
            context: Some(draft.context.clone()),
            parent_id: None,
            reinforcement_count: 0,
            contradiction_count: 0,
            last_reinforced: None,
            first_observed: None,
            window: Some(TrendWindow {
                start: now,
                end: trend_window_end(now, window_days)?,
            }),
            derived_from: Some("reflection".into()),
        },
        DraftShape::Behavior { confidence } => {
            metadata
                .extra
                .insert("behavior_kind".into(), serde_json::Value::from("pattern"));
            TraitState {
                subtype: TraitSubtype::Behavior,
                stage: TraitStage::Candidate,
                confidence: confidence.clamp(0.3, 0.5),
                context: Some(draft.context.clone()),
                parent_id: None,
                reinforcement_count: 0,
                contradiction_count: 0,
                last_reinforced: None,
                first_observed: Some(earliest_created_at(conn, &valid)?.unwrap_or(now)),
                window: None,
                derived_from: Some("reflection".into()),
            }
        }
    };
    let outcome = TraitOutcome::Created {
        id: uuid::Uuid::new_v4().to_string(),
        stage: state.stage,
        confidence: state.confidence,
    };
    let record = MemoryRecord {
        id: outcome.id().to_string(),
        owner_id: draft.owner.clone(),
        content: draft.content.clone(),
        embedding: draft.embedding.clone(),
        metadata,
        content_hash: hash,
        importance: 0.5,
        access_count: 0,
        last_accessed_at: None,
        created_at: now,
        updated_at: now,
        event_time: None,
        valid_from: now,
        valid_until: None,
        version: 1,
        superseded_by: None,
        expired_at: None,
        kind: MemoryKind::Trait(state),
    };
    store::insert_record(conn, &record)?;
    store::append_evidence(
        conn,
        &record.id,
        &valid,
        EvidenceDirection::Supporting,
        quality,
        now,
    )?;
    Ok(outcome)
}

/// State machine over trait records.
#[derive(Clone)]
pub struct TraitEngine {
    db: Database,
    clock: Arc<dyn Clock>,
    embedder: Option<Arc<dyn EmbeddingAdapter>>,
}

impl TraitEngine {
    /// Engine without an embedder: maintenance and mutation work, creation
    /// and upgrade fail with `AdapterNotFound`.
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            clock,
            embedder: None,
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingAdapter>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, TesseraError> {
        let embedder = self
            .embedder
            .as_ref()
            .ok_or_else(|| TesseraError::AdapterNotFound {
                adapter_type: AdapterType::Embedding,
                name: "trait-engine".into(),
            })?;
        let output = embedder
            .embed(EmbeddingInput::new([text]))
            .await?;
        output
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| TesseraError::Embedding {
                message: "embedder returned no vectors".into(),
                source: None,
            })
    }

    async fn create(&self, draft: TraitDraft) -> Result<TraitOutcome, TesseraError> {
        let now = self.clock.now();
        let outcome = self
            .db
            .write(move |tx| create_or_merge(tx, &draft, now))
            .await?;
        if let TraitOutcome::Created { stage, .. } = &outcome {
            record_transition(*stage);
        }
        Ok(outcome)
    }

    /// Create a provisional trend observed over `window_days`, or merge into
    /// a near-identical existing trait.
    pub async fn create_trend(
        &self,
        owner: &str,
        content: &str,
        evidence_ids: &[String],
        window_days: i64,
        context: &str,
    ) -> Result<TraitOutcome, TesseraError> {
        if content.trim().is_empty() {
            return Err(TesseraError::Validation("trait content is empty".into()));
        }
        if !(1..=MAX_TREND_WINDOW_DAYS).contains(&window_days) {
            return Err(TesseraError::Validation(format!(
                "trend window must be between 1 and {MAX_TREND_WINDOW_DAYS} days, got {window_days}"
            )));
        }
        let embedding = self.embed(content).await?;
        let outcome = self
            .create(TraitDraft {
                owner: owner.to_string(),
                content: content.to_string(),
                embedding,
                evidence_ids: evidence_ids.to_vec(),
                context: context.to_string(),
                shape: DraftShape::Trend { window_days },
            })
            .await?;
        info!(owner, trait_id = outcome.id(), "trend recorded");
        Ok(outcome)
    }

    /// Create a candidate behavior with confidence clamped to [0.3, 0.5], or
    /// merge into a near-identical existing trait.
    pub async fn create_behavior(
        &self,
        owner: &str,
        content: &str,
        evidence_ids: &[String],
        confidence: f64,
        context: &str,
    ) -> Result<TraitOutcome, TesseraError> {
        if content.trim().is_empty() {
            return Err(TesseraError::Validation("trait content is empty".into()));
        }
        if !confidence.is_finite() {
            return Err(TesseraError::Validation("confidence is not a number".into()));
        }
        let embedding = self.embed(content).await?;
        let outcome = self
            .create(TraitDraft {
                owner: owner.to_string(),
                content: content.to_string(),
                embedding,
                evidence_ids: evidence_ids.to_vec(),
                context: context.to_string(),
                shape: DraftShape::Behavior { confidence },
            })
            .await?;
        info!(owner, trait_id = outcome.id(), "behavior recorded");
        Ok(outcome)
    }

    /// Move confidence toward 1.0 by the grade's factor.
    ///
    /// Trends keep their stage so the promotion gate decides when they
    /// leave it; every other stage follows confidence.
    pub async fn reinforce_trait(
        &self,
        owner: &str,
        trait_id: &str,
        evidence_ids: &[String],
        quality: QualityGrade,
    ) -> Result<TraitOutcome, TesseraError> {
        let now = self.clock.now();
        let owner = owner.to_string();
        let trait_id = trait_id.to_string();
        let evidence_ids = evidence_ids.to_vec();
        let outcome = self
            .db
            .write(move |tx| {
                let Some((record, mut state)) = load_trait(tx, &owner, &trait_id)? else {
                    return Ok(TraitOutcome::NotFound { id: trait_id });
                };
                if state.stage.is_terminal() {
                    return Ok(TraitOutcome::Terminal { id: trait_id });
                }
                let valid = store::existing_ids(tx, &owner, &evidence_ids)?;
                state.confidence = reinforced_confidence(state.confidence, quality);
                state.reinforcement_count += valid.len() as i64;
                state.last_reinforced = Some(now);
                if state.stage != TraitStage::Trend {
                    state.stage = TraitStage::from_confidence(state.confidence);
                }
                update_trait(tx, &record, &state, record.expired_at, now)?;
                store::append_evidence(
                    tx,
                    &record.id,
                    &valid,
                    EvidenceDirection::Supporting,
                    quality,
                    now,
                )?;
                Ok(TraitOutcome::Updated {
                    id: record.id,
                    stage: state.stage,
                    confidence: state.confidence,
                })
            })
            .await?;
        if let TraitOutcome::Updated { stage, .. } = &outcome {
            record_transition(*stage);
        }
        debug!(?outcome, "trait reinforced");
        Ok(outcome)
    }

    /// Penalize confidence. Stage is left as it was; decay and special
    /// reflection settle it later.
    pub async fn apply_contradiction(
        &self,
        owner: &str,
        trait_id: &str,
        evidence_ids: &[String],
    ) -> Result<ContradictionOutcome, TesseraError> {
        let now = self.clock.now();
        let owner = owner.to_string();
        let trait_id = trait_id.to_string();
        let evidence_ids = evidence_ids.to_vec();
        let outcome = self
            .db
            .write(move |tx| {
                let Some((record, mut state)) = load_trait(tx, &owner, &trait_id)? else {
                    return Ok(ContradictionOutcome::NotFound { id: trait_id });
                };
                if state.stage.is_terminal() {
                    return Ok(ContradictionOutcome::Terminal { id: trait_id });
                }
                let valid = store::existing_ids(tx, &owner, &evidence_ids)?;
                state.confidence = contradicted_confidence(state.confidence, valid.len());
                state.contradiction_count += valid.len() as i64;
                update_trait(tx, &record, &state, record.expired_at, now)?;
                store::append_evidence(
                    tx,
                    &record.id,
                    &valid,
                    EvidenceDirection::Contradicting,
                    QualityGrade::C,
                    now,
                )?;
                let needs_special_reflection = state.contradiction_ratio()
                    > CONTRADICTION_RATIO_GATE
                    && state.contradiction_count >= 2;
                Ok(ContradictionOutcome::Applied {
                    id: record.id,
                    confidence: state.confidence,
                    needs_special_reflection,
                })
            })
            .await?;
        debug!(?outcome, "contradiction applied");
        Ok(outcome)
    }

    /// Ask `judge` whether a disputed trait should be rewritten or dissolved,
    /// then apply the verdict. A judge failure dissolves the trait.
    pub async fn resolve_contradiction(
        &self,
        owner: &str,
        trait_id: &str,
        judge: &dyn ContradictionJudge,
    ) -> Result<ResolutionOutcome, TesseraError> {
        let read_owner = owner.to_string();
        let read_id = trait_id.to_string();
        let loaded = self
            .db
            .read(move |conn| {
                let Some((record, state)) = load_trait(conn, &read_owner, &read_id)? else {
                    return Ok(None);
                };
                let evidence = store::evidence_for(conn, &record.id)?;
                let mut supporting = Vec::new();
                let mut contradicting = Vec::new();
                for ev in evidence {
                    let content = store::get_record(conn, &ev.memory_id)?
                        .map(|r| r.content)
                        .unwrap_or_else(|| "(deleted)".into());
                    let line = EvidenceLine {
                        quality: ev.quality,
                        content,
                    };
                    match ev.direction {
                        EvidenceDirection::Supporting => supporting.push(line),
                        EvidenceDirection::Contradicting => contradicting.push(line),
                    }
                }
                Ok(Some((record, state, supporting, contradicting)))
            })
            .await?;

        let Some((record, state, supporting, contradicting)) = loaded else {
            return Ok(ResolutionOutcome::NotFound {
                id: trait_id.to_string(),
            });
        };
        if state.stage.is_terminal() {
            return Ok(ResolutionOutcome::Terminal {
                id: trait_id.to_string(),
            });
        }

        let case = ContradictionCase {
            content: record.content.clone(),
            subtype: state.subtype,
            confidence: state.confidence,
            context: state.context.clone().unwrap_or_else(|| "general".into()),
            supporting,
            contradicting,
        };
        let judgment = match judge.judge(&case).await {
            Ok(judgment) => judgment,
            Err(e) => {
                warn!(trait_id, error = %e, "contradiction judgment failed, dissolving");
                Judgment::Dissolve {
                    reasoning: String::new(),
                }
            }
        };

        let now = self.clock.now();
        let outcome = self
            .db
            .write(move |tx| apply_judgment(tx, record, state, judgment, now))
            .await?;
        match &outcome {
            ResolutionOutcome::Modified { stage, .. } => record_transition(*stage),
            ResolutionOutcome::Dissolved { .. } => record_transition(TraitStage::Dissolved),
            _ => {}
        }
        info!(owner, trait_id, ?outcome, "contradiction resolved");
        Ok(outcome)
    }

    /// Fold several traits into one of a higher subtype.
    pub async fn try_upgrade(
        &self,
        owner: &str,
        source_ids: &[String],
        new_content: &str,
        new_subtype: TraitSubtype,
    ) -> Result<UpgradeOutcome, TesseraError> {
        let Some(threshold) = new_subtype.upgrade_threshold() else {
            return Ok(UpgradeOutcome::Skipped {
                reason: UpgradeSkip::InvalidSubtype,
            });
        };
        if new_content.trim().is_empty() {
            return Err(TesseraError::Validation("trait content is empty".into()));
        }

        let check_owner = owner.to_string();
        let check_ids = source_ids.to_vec();
        let precheck = self
            .db
            .read(move |conn| {
                let sources = live_sources(conn, &check_owner, &check_ids)?;
                Ok(upgrade_gate(&sources, threshold))
            })
            .await?;
        if let Some(reason) = precheck {
            debug!(owner, ?reason, "upgrade skipped");
            return Ok(UpgradeOutcome::Skipped { reason });
        }

        let embedding = self.embed(new_content).await?;
        let now = self.clock.now();
        let owner_s = owner.to_string();
        let source_ids = source_ids.to_vec();
        let new_content = new_content.to_string();
        let outcome = self
            .db
            .write(move |tx| {
                let sources = live_sources(tx, &owner_s, &source_ids)?;
                if let Some(reason) = upgrade_gate(&sources, threshold) {
                    return Ok(UpgradeOutcome::Skipped { reason });
                }
                let max = sources
                    .iter()
                    .map(|(_, s)| s.confidence)
                    .fold(0.0_f64, f64::max);
                let confidence = (max + 0.1).min(1.0);
                let id = uuid::Uuid::new_v4().to_string();
                let record = MemoryRecord {
                    id: id.clone(),
                    owner_id: owner_s.clone(),
                    content_hash: content_hash(&new_content),
                    content: new_content,
                    embedding,
                    metadata: MemoryMetadata::default(),
                    importance: 0.7,
                    access_count: 0,
                    last_accessed_at: None,
                    created_at: now,
                    updated_at: now,
                    event_time: None,
                    valid_from: now,
                    valid_until: None,
                    version: 1,
                    superseded_by: None,
                    expired_at: None,
                    kind: MemoryKind::Trait(TraitState {
                        subtype: new_subtype,
                        stage: TraitStage::Emerging,
                        confidence,
                        context: sources.first().and_then(|(_, s)| s.context.clone()),
                        parent_id: None,
                        reinforcement_count: 0,
                        contradiction_count: 0,
                        last_reinforced: None,
                        first_observed: None,
                        window: None,
                        derived_from: Some("reflection".into()),
                    }),
                };
                store::insert_record(tx, &record)?;

                for (source, state) in &sources {
                    let mut state = state.clone();
                    state.parent_id = Some(id.clone());
                    update_trait(tx, source, &state, source.expired_at, now)?;
                    let inherited = store::evidence_for(tx, &source.id)?;
                    copy_evidence(tx, &id, &inherited)?;
                }
                Ok(UpgradeOutcome::Upgraded {
                    id,
                    confidence,
                    sources: sources.into_iter().map(|(r, _)| r.id).collect(),
                })
            })
            .await?;
        if let UpgradeOutcome::Upgraded { id, confidence, sources } = &outcome {
            record_transition(TraitStage::Emerging);
            info!(owner, trait_id = %id, confidence, sources = sources.len(), %new_subtype, "traits upgraded");
        }
        Ok(outcome)
    }

    /// Trends reinforced enough before their window closed become candidates.
    pub async fn promote_trends(&self, owner: &str) -> Result<usize, TesseraError> {
        let now = self.clock.now();
        let owner_s = owner.to_string();
        let promoted = self
            .db
            .write(move |tx| {
                let mut count = 0;
                for (record, mut state) in
                    traits_in_stage(tx, &owner_s, |s| s == TraitStage::Trend)?
                {
                    let open = state.window.is_some_and(|w| w.end >= now);
                    if state.reinforcement_count < PROMOTION_MIN_REINFORCEMENTS || !open {
                        continue;
                    }
                    state.stage = TraitStage::Candidate;
                    state.confidence = TREND_CONFIDENCE;
                    state.window = None;
                    update_trait(tx, &record, &state, record.expired_at, now)?;
                    count += 1;
                }
                Ok(count)
            })
            .await?;
        if promoted > 0 {
            metrics::counter!("tessera_trait_transitions_total", "to" => "candidate")
                .increment(promoted as u64);
            info!(owner, promoted, "trends promoted to candidate");
        }
        Ok(promoted)
    }

    /// Trends whose window closed without enough reinforcement dissolve.
    pub async fn expire_trends(&self, owner: &str) -> Result<usize, TesseraError> {
        let now = self.clock.now();
        let owner_s = owner.to_string();
        let expired = self
            .db
            .write(move |tx| {
                let mut count = 0;
                for (record, mut state) in
                    traits_in_stage(tx, &owner_s, |s| s == TraitStage::Trend)?
                {
                    let closed = state.window.is_some_and(|w| w.end < now);
                    if !closed || state.reinforcement_count >= PROMOTION_MIN_REINFORCEMENTS {
                        continue;
                    }
                    state.stage = TraitStage::Dissolved;
                    update_trait(tx, &record, &state, Some(now), now)?;
                    stage_history(tx, &record, HistoryEvent::TrendExpire, None, "system", now)?;
                    count += 1;
                }
                Ok(count)
            })
            .await?;
        if expired > 0 {
            metrics::counter!("tessera_trait_transitions_total", "to" => "dissolved")
                .increment(expired as u64);
            info!(owner, expired, "trends expired");
        }
        Ok(expired)
    }

    /// Decay every non-trend, non-dissolved trait by the time since it was
    /// last reinforced.
    pub async fn apply_decay(&self, owner: &str) -> Result<DecayStats, TesseraError> {
        let now = self.clock.now();
        let owner_s = owner.to_string();
        let stats = self
            .db
            .write(move |tx| {
                let mut stats = DecayStats::default();
                let live = traits_in_stage(tx, &owner_s, |s| {
                    s != TraitStage::Trend && !s.is_terminal()
                })?;
                for (record, mut state) in live {
                    let last = state.last_reinforced.unwrap_or(record.created_at);
                    let days = (now - last).num_milliseconds() as f64 / 86_400_000.0;
                    if days <= 0.0 {
                        continue;
                    }
                    state.confidence = decayed_confidence(
                        state.confidence,
                        state.subtype,
                        state.reinforcement_count,
                        days,
                    );
                    stats.decayed += 1;
                    if state.confidence < 0.1 {
                        state.stage = TraitStage::Dissolved;
                        update_trait(tx, &record, &state, Some(now), now)?;
                        stage_history(
                            tx,
                            &record,
                            HistoryEvent::DecayDissolve,
                            Some(serde_json::json!({ "confidence": state.confidence })),
                            "system",
                            now,
                        )?;
                        stats.dissolved += 1;
                    } else {
                        state.stage = TraitStage::from_confidence(state.confidence);
                        update_trait(tx, &record, &state, record.expired_at, now)?;
                    }
                }
                Ok(stats)
            })
            .await?;
        if stats.dissolved > 0 {
            metrics::counter!("tessera_trait_transitions_total", "to" => "dissolved")
                .increment(stats.dissolved as u64);
            info!(owner, dissolved = stats.dissolved, "traits dissolved by decay");
        }
        Ok(stats)
    }

    /// Expire, promote, then decay.
    pub async fn run_maintenance(&self, owner: &str) -> Result<MaintenanceReport, TesseraError> {
        let expired = self.expire_trends(owner).await?;
        let promoted = self.promote_trends(owner).await?;
        let decay = self.apply_decay(owner).await?;
        Ok(MaintenanceReport {
            expired,
            promoted,
            decay,
        })
    }

    /// A trait of `owner`, whatever its stage.
    pub async fn get_trait(
        &self,
        owner: &str,
        trait_id: &str,
    ) -> Result<Option<MemoryRecord>, TesseraError> {
        let owner = owner.to_string();
        let trait_id = trait_id.to_string();
        self.db
            .read(move |conn| Ok(load_trait(conn, &owner, &trait_id)?.map(|(r, _)| r)))
            .await
    }

    /// Current traits of `owner`, optionally restricted to one stage.
    pub async fn list_traits(
        &self,
        owner: &str,
        stage: Option<TraitStage>,
    ) -> Result<Vec<MemoryRecord>, TesseraError> {
        let owner = owner.to_string();
        self.db
            .read(move |conn| {
                Ok(
                    traits_in_stage(conn, &owner, |s| stage.is_none_or(|want| want == s))?
                        .into_iter()
                        .map(|(r, _)| r)
                        .collect(),
                )
            })
            .await
    }

    /// Evidence rows linked to a trait, oldest first.
    pub async fn trait_evidence(&self, trait_id: &str) -> Result<Vec<EvidenceRecord>, TesseraError> {
        let trait_id = trait_id.to_string();
        self.db
            .read(move |conn| store::evidence_for(conn, &trait_id))
            .await
    }
}

/// Sources that exist, belong to `owner`, are traits and are not dissolved.
fn live_sources(
    conn: &rusqlite::Connection,
    owner: &str,
    ids: &[String],
) -> Result<Vec<(MemoryRecord, TraitState)>, TxError> {
    let mut sources = Vec::new();
    for id in store::existing_ids(conn, owner, ids)? {
        if let Some((record, state)) = load_trait(conn, owner, &id)?
            && !state.stage.is_terminal()
        {
            sources.push((record, state));
        }
    }
    Ok(sources)
}

fn upgrade_gate(sources: &[(MemoryRecord, TraitState)], threshold: f64) -> Option<UpgradeSkip> {
    if sources.is_empty() {
        return Some(UpgradeSkip::NoSources);
    }
    if sources.iter().any(|(_, s)| s.confidence < threshold) {
        return Some(UpgradeSkip::BelowThreshold);
    }
    if sources.iter().any(|(_, s)| s.parent_id.is_some()) {
        return Some(UpgradeSkip::AlreadyParented);
    }
    None
}

fn copy_evidence(
    conn: &rusqlite::Connection,
    trait_id: &str,
    evidence: &[EvidenceRecord],
) -> Result<(), TxError> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO trait_evidence (trait_id, memory_id, direction, quality, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for ev in evidence {
        stmt.execute(rusqlite::params![
            trait_id,
            ev.memory_id,
            ev.direction.as_ref(),
            ev.quality.as_ref(),
            ts_to_sql(&ev.created_at),
        ])?;
    }
    Ok(())
}

fn apply_judgment(
    conn: &rusqlite::Connection,
    record: MemoryRecord,
    mut state: TraitState,
    judgment: Judgment,
    now: DateTime<Utc>,
) -> Result<ResolutionOutcome, TxError> {
    match judgment {
        Judgment::Modify {
            new_content,
            reasoning,
        } => {
            let content = new_content
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| record.content.clone());
            state.confidence = (state.confidence * 0.9).clamp(0.0, 1.0);
            state.stage = TraitStage::from_confidence(state.confidence);
            if content != record.content {
                let changed = conn.execute(
                    "UPDATE memories SET content = ?1, content_hash = ?2 \
                     WHERE id = ?3 AND version = ?4",
                    rusqlite::params![content, content_hash(&content), record.id, record.version],
                )?;
                if changed == 0 {
                    return Err(TxError::Conflict {
                        id: record.id.clone(),
                        expected_version: record.version,
                    });
                }
            }
            update_trait(conn, &record, &state, record.expired_at, now)?;
            store::append_history(
                conn,
                NewHistory {
                    memory_id: &record.id,
                    owner_id: &record.owner_id,
                    memory_type: MemoryType::Trait,
                    event: HistoryEvent::ContradictionModify,
                    old_content: Some(&record.content),
                    new_content: Some(&content),
                    old_metadata: None,
                    new_metadata: Some(serde_json::json!({ "reasoning": reasoning })),
                    actor: "reflection",
                    at: now,
                },
            )?;
            Ok(ResolutionOutcome::Modified {
                id: record.id,
                content,
                confidence: state.confidence,
                stage: state.stage,
            })
        }
        Judgment::Dissolve { reasoning } => {
            state.stage = TraitStage::Dissolved;
            update_trait(conn, &record, &state, Some(now), now)?;
            stage_history(
                conn,
                &record,
                HistoryEvent::ContradictionDissolve,
                Some(serde_json::json!({ "reasoning": reasoning })),
                "reflection",
                now,
            )?;
            Ok(ResolutionOutcome::Dissolved {
                id: record.id,
                reasoning,
            })
        }
    }
}
