// SPDX-FileCopyrightText: 2026 Tessera Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hybrid retriever combining vector similarity and keyword ranking via RRF.
//!
//! Both candidate pools are built from the same filtered row set: owner,
//! type, creation and event windows, temporal validity (current rows, or
//! rows valid at `as_of`), and the exclusion of immature or dissolved
//! traits. The plain variant orders by fused rank; the scored variant
//! re-weights relevance by recency, importance, trait stage and emotion.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use serde::Serialize;
use tessera_config::{KeywordIndex, RetrievalConfig};
use tessera_core::{Clock, EmbeddingAdapter, EmbeddingInput, TesseraError};
use tessera_storage::codec::ts_to_sql;
use tessera_storage::{Database, TxError};
use tracing::{debug, warn};

use crate::store::{SELECT_COLUMNS, row_to_record};
use crate::types::{Emotion, MemoryRecord, MemoryType, ScoreBreakdown, cosine_similarity};

/// RRF constant per research literature.
pub const RRF_K: f64 = 60.0;

/// Relevance credit for appearing in the keyword pool.
const KEYWORD_MATCH_BONUS: f64 = 0.05;

/// Largest euclidean distance in the valence/arousal plane.
const MAX_EMOTION_DISTANCE: f64 = 2.83;

/// Optional restrictions on a search.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub memory_type: Option<MemoryType>,
    pub exclude_types: Vec<MemoryType>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub event_after: Option<DateTime<Utc>>,
    pub event_before: Option<DateTime<Utc>>,
    /// Point-in-time view: rows valid at this instant instead of current rows.
    pub as_of: Option<DateTime<Utc>>,
    /// Result count; the configured default when unset.
    pub limit: Option<usize>,
}

/// Extra inputs of the scored variant.
#[derive(Debug, Clone, Default)]
pub struct ScoredSearchOptions {
    /// Recency half-scale in seconds; the configured default when unset.
    pub decay_rate_secs: Option<f64>,
    pub query_emotion: Option<Emotion>,
}

/// One plain search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub record: MemoryRecord,
    pub rrf_score: f64,
    pub vector_similarity: f64,
    pub keyword_matched: bool,
}

/// One scored search result.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredHit {
    pub record: MemoryRecord,
    pub rrf_score: f64,
    pub breakdown: ScoreBreakdown,
}

/// Which keyword engine served a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeywordMode {
    Fts5,
    Plain,
}

impl KeywordMode {
    fn pool_multiplier(self) -> usize {
        match self {
            KeywordMode::Fts5 => 2,
            KeywordMode::Plain => 4,
        }
    }
}

struct Candidate {
    record: MemoryRecord,
    rrf_score: f64,
    vector_similarity: f64,
    keyword_matched: bool,
}

/// Reciprocal Rank Fusion over two ranked id lists. Ranks are 1-based; an id
/// missing from a list contributes nothing for that list.
pub fn reciprocal_rank_fusion(vector: &[String], keyword: &[String]) -> Vec<(String, f64)> {
    let mut scores: HashMap<&str, f64> = HashMap::new();
    for list in [vector, keyword] {
        for (rank, id) in list.iter().enumerate() {
            *scores.entry(id.as_str()).or_insert(0.0) += 1.0 / (RRF_K + rank as f64 + 1.0);
        }
    }
    let mut fused: Vec<(String, f64)> = scores
        .into_iter()
        .map(|(id, score)| (id.to_string(), score))
        .collect();
    fused.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    fused
}

/// Quote each token so FTS5 never sees operator syntax, and OR them.
pub fn sanitize_fts_query(query: &str) -> Option<String> {
    let tokens: Vec<String> = query
        .split_whitespace()
        .map(|t| {
            t.chars()
                .filter(|c| c.is_alphanumeric() || *c == '_')
                .collect::<String>()
        })
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect();
    (!tokens.is_empty()).then(|| tokens.join(" OR "))
}

/// Lowercased query terms for the plain fallback.
fn plain_terms(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Count of query-term occurrences in `content`.
fn plain_score(terms: &[String], content: &str) -> usize {
    let content = content.to_lowercase();
    terms.iter().map(|t| content.matches(t.as_str()).count()).sum()
}

/// `WHERE` body shared by the vector scan and the FTS query.
fn filter_clause(owner: &str, filters: &SearchFilters) -> (String, Vec<Value>) {
    let mut sql = String::from("m.owner_id = ?");
    let mut params = vec![Value::Text(owner.to_string())];
    if let Some(t) = filters.memory_type {
        sql.push_str(" AND m.memory_type = ?");
        params.push(Value::Text(t.to_string()));
    }
    if !filters.exclude_types.is_empty() {
        let marks = vec!["?"; filters.exclude_types.len()].join(", ");
        sql.push_str(&format!(" AND m.memory_type NOT IN ({marks})"));
        params.extend(filters.exclude_types.iter().map(|t| Value::Text(t.to_string())));
    }
    let mut bound = |column: &str, op: &str, ts: Option<DateTime<Utc>>| {
        if let Some(ts) = ts {
            sql.push_str(&format!(" AND m.{column} {op} ?"));
            params.push(Value::Text(ts_to_sql(&ts)));
        }
    };
    bound("created_at", ">=", filters.created_after);
    bound("created_at", "<=", filters.created_before);
    bound("event_time", ">=", filters.event_after);
    bound("event_time", "<=", filters.event_before);
    match filters.as_of {
        Some(as_of) => {
            sql.push_str(" AND m.valid_from <= ? AND (m.valid_until IS NULL OR m.valid_until > ?)");
            let ts = ts_to_sql(&as_of);
            params.push(Value::Text(ts.clone()));
            params.push(Value::Text(ts));
        }
        None => sql.push_str(" AND m.valid_until IS NULL"),
    }
    sql.push_str(
        " AND (m.memory_type != 'trait' OR COALESCE(m.trait_stage, \
         json_extract(m.metadata, '$.trait_stage')) IN ('emerging', 'established', 'core'))",
    );
    (sql, params)
}

fn keyword_mode(conn: &rusqlite::Connection, configured: KeywordIndex) -> Result<KeywordMode, TxError> {
    Ok(match configured {
        KeywordIndex::Fts5 => KeywordMode::Fts5,
        KeywordIndex::Plain => KeywordMode::Plain,
        KeywordIndex::Auto => {
            let exists: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'memories_fts'",
                [],
                |row| row.get(0),
            )?;
            if exists > 0 {
                KeywordMode::Fts5
            } else {
                KeywordMode::Plain
            }
        }
    })
}

/// Build the fused candidate set for one query on the connection thread.
fn gather(
    conn: &rusqlite::Connection,
    owner: &str,
    query: &str,
    embedding: &[f32],
    filters: &SearchFilters,
    limit: usize,
    configured: KeywordIndex,
) -> Result<Vec<Candidate>, TxError> {
    let mode = keyword_mode(conn, configured)?;
    let pool = limit.saturating_mul(mode.pool_multiplier());
    let (clause, params) = filter_clause(owner, filters);

    let sql = format!("SELECT {SELECT_COLUMNS} FROM memories m WHERE {clause}");
    let mut stmt = conn.prepare(&sql)?;
    let rows: Vec<MemoryRecord> = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), row_to_record)?
        .collect::<Result<_, _>>()?;

    let mut by_similarity: Vec<(f64, &MemoryRecord)> = rows
        .iter()
        .map(|r| (cosine_similarity(embedding, &r.embedding), r))
        .collect();
    by_similarity.sort_by(|a, b| b.0.total_cmp(&a.0));
    let vector_ids: Vec<String> = by_similarity
        .iter()
        .take(pool)
        .map(|(_, r)| r.id.clone())
        .collect();

    let keyword_ids: Vec<String> = match mode {
        KeywordMode::Fts5 => match sanitize_fts_query(query) {
            Some(fts_query) => {
                let sql = format!(
                    "SELECT m.id FROM memories_fts JOIN memories m ON m.rowid = memories_fts.rowid \
                     WHERE memories_fts MATCH ? AND {clause} ORDER BY bm25(memories_fts) LIMIT ?"
                );
                let mut all = Vec::with_capacity(params.len() + 2);
                all.push(Value::Text(fts_query));
                all.extend(params.iter().cloned());
                all.push(Value::Integer(pool as i64));
                let mut stmt = conn.prepare(&sql)?;
                stmt.query_map(rusqlite::params_from_iter(all.iter()), |row| row.get(0))?
                    .collect::<Result<_, _>>()?
            }
            None => Vec::new(),
        },
        KeywordMode::Plain => {
            let terms = plain_terms(query);
            let mut scored: Vec<(usize, &MemoryRecord)> = rows
                .iter()
                .map(|r| (plain_score(&terms, &r.content), r))
                .filter(|(s, _)| *s > 0)
                .collect();
            scored.sort_by(|a, b| b.0.cmp(&a.0));
            scored.into_iter().take(pool).map(|(_, r)| r.id.clone()).collect()
        }
    };

    let similarity: HashMap<&str, f64> = by_similarity
        .iter()
        .map(|(s, r)| (r.id.as_str(), *s))
        .collect();
    let keyword_set: HashSet<&str> = keyword_ids.iter().map(String::as_str).collect();
    let fused = reciprocal_rank_fusion(&vector_ids, &keyword_ids);
    let mut by_id: HashMap<String, MemoryRecord> =
        rows.iter().map(|r| (r.id.clone(), r.clone())).collect();

    let candidates = fused
        .into_iter()
        .filter_map(|(id, rrf_score)| {
            let record = by_id.remove(&id)?;
            Some(Candidate {
                vector_similarity: similarity.get(id.as_str()).copied().unwrap_or(0.0),
                keyword_matched: keyword_set.contains(id.as_str()),
                record,
                rrf_score,
            })
        })
        .collect();
    debug!(?mode, pool, "candidates gathered");
    Ok(candidates)
}

/// Multi-factor score for one candidate.
pub fn score_record(
    record: &MemoryRecord,
    vector_similarity: f64,
    keyword_matched: bool,
    now: DateTime<Utc>,
    decay_rate_secs: f64,
    query_emotion: Option<&Emotion>,
) -> ScoreBreakdown {
    let bonus = if keyword_matched { KEYWORD_MATCH_BONUS } else { 0.0 };
    let relevance = (vector_similarity + bonus).min(1.0);

    let emotion = record.metadata.emotion.as_ref();
    let arousal = emotion.map(|e| e.arousal).unwrap_or(0.0);
    let age_secs = (now - record.created_at).num_milliseconds().max(0) as f64 / 1000.0;
    let recency_bonus = 0.15 * (-age_secs / (decay_rate_secs * (1.0 + 0.5 * arousal))).exp();

    let importance_bonus = 0.15 * record.metadata.importance_weight();
    let trait_stage_boost = record
        .trait_state()
        .map(|s| s.stage.retrieval_boost())
        .unwrap_or(0.0);

    // Records without a stored emotion sit at the neutral point.
    let emotion_match_bonus = match query_emotion {
        Some(q) => {
            let (valence, arousal) = emotion.map_or((0.0, 0.0), |r| (r.valence, r.arousal));
            let distance = ((q.valence - valence).powi(2) + (q.arousal - arousal).powi(2)).sqrt();
            0.10 * (1.0 - distance / MAX_EMOTION_DISTANCE).max(0.0)
        }
        None => 0.0,
    };

    let final_score = relevance
        * (1.0 + recency_bonus + importance_bonus + trait_stage_boost + emotion_match_bonus);
    ScoreBreakdown {
        vector_similarity,
        keyword_matched,
        relevance,
        recency_bonus,
        importance_bonus,
        trait_stage_boost,
        emotion_match_bonus,
        final_score,
    }
}

/// Hybrid retriever over the `memories` table.
#[derive(Clone)]
pub struct HybridRetriever {
    db: Database,
    embedder: Arc<dyn EmbeddingAdapter>,
    config: RetrievalConfig,
    clock: Arc<dyn Clock>,
}

impl HybridRetriever {
    pub fn new(
        db: Database,
        embedder: Arc<dyn EmbeddingAdapter>,
        config: RetrievalConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            embedder,
            config,
            clock,
        }
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, TesseraError> {
        let output = self
            .embedder
            .embed(EmbeddingInput::new([query]))
            .await?;
        output
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| TesseraError::Embedding {
                message: "embedder returned no vectors for query".into(),
                source: None,
            })
    }

    async fn candidates(
        &self,
        owner: &str,
        query: &str,
        embedding: Option<Vec<f32>>,
        filters: &SearchFilters,
    ) -> Result<(Vec<Candidate>, usize), TesseraError> {
        let embedding = match embedding {
            Some(e) => e,
            None => self.embed_query(query).await?,
        };
        let limit = filters.limit.unwrap_or(self.config.default_limit).max(1);
        let owner = owner.to_string();
        let query = query.to_string();
        let filters = filters.clone();
        let configured = self.config.keyword_index;
        let candidates = self
            .db
            .read(move |conn| gather(conn, &owner, &query, &embedding, &filters, limit, configured))
            .await?;
        Ok((candidates, limit))
    }

    /// Plain RRF search, embedding the query.
    pub async fn search(
        &self,
        owner: &str,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>, TesseraError> {
        self.search_with_embedding(owner, query, None, filters).await
    }

    /// Plain RRF search with an optional precomputed query embedding.
    pub async fn search_with_embedding(
        &self,
        owner: &str,
        query: &str,
        embedding: Option<Vec<f32>>,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>, TesseraError> {
        let (candidates, limit) = self.candidates(owner, query, embedding, filters).await?;
        let hits: Vec<SearchHit> = candidates
            .into_iter()
            .take(limit)
            .map(|c| SearchHit {
                record: c.record,
                rrf_score: c.rrf_score,
                vector_similarity: c.vector_similarity,
                keyword_matched: c.keyword_matched,
            })
            .collect();
        metrics::counter!("tessera_search_total", "mode" => "plain").increment(1);
        self.track_access(hits.iter().map(|h| h.record.id.clone()).collect())
            .await;
        Ok(hits)
    }

    /// Multi-factor search used for answer generation.
    pub async fn scored_search(
        &self,
        owner: &str,
        query: &str,
        filters: &SearchFilters,
        options: &ScoredSearchOptions,
    ) -> Result<Vec<ScoredHit>, TesseraError> {
        self.scored_search_with_embedding(owner, query, None, filters, options)
            .await
    }

    pub async fn scored_search_with_embedding(
        &self,
        owner: &str,
        query: &str,
        embedding: Option<Vec<f32>>,
        filters: &SearchFilters,
        options: &ScoredSearchOptions,
    ) -> Result<Vec<ScoredHit>, TesseraError> {
        let (candidates, limit) = self.candidates(owner, query, embedding, filters).await?;
        let now = self.clock.now();
        let decay_rate = options
            .decay_rate_secs
            .filter(|d| d.is_finite() && *d > 0.0)
            .unwrap_or(self.config.decay_rate_secs);
        let mut hits: Vec<ScoredHit> = candidates
            .into_iter()
            .map(|c| ScoredHit {
                breakdown: score_record(
                    &c.record,
                    c.vector_similarity,
                    c.keyword_matched,
                    now,
                    decay_rate,
                    options.query_emotion.as_ref(),
                ),
                record: c.record,
                rrf_score: c.rrf_score,
            })
            .collect();
        hits.sort_by(|a, b| b.breakdown.final_score.total_cmp(&a.breakdown.final_score));
        hits.truncate(limit);
        metrics::counter!("tessera_search_total", "mode" => "scored").increment(1);
        self.track_access(hits.iter().map(|h| h.record.id.clone()).collect())
            .await;
        Ok(hits)
    }

    /// Bump access counters. Failures are logged, never returned.
    async fn track_access(&self, ids: Vec<String>) {
        if ids.is_empty() {
            return;
        }
        let now = ts_to_sql(&self.clock.now());
        let result = self
            .db
            .write(move |tx| {
                let mut stmt = tx.prepare_cached(
                    "UPDATE memories SET access_count = access_count + 1, last_accessed_at = ?1 \
                     WHERE id = ?2",
                )?;
                for id in &ids {
                    stmt.execute(rusqlite::params![now, id])?;
                }
                Ok(())
            })
            .await;
        if let Err(e) = result {
            warn!(error = %e, "access tracking failed");
        }
    }
}
