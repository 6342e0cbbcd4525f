// SPDX-FileCopyrightText: 2026 Tessera Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Batch storage of classifier output.
//!
//! Facts and episodes are embedded with one call per kind, then resolved in a
//! single transaction. Each item runs under its own savepoint so a bad item
//! is skipped without losing the others; the batch commits once, and a failed
//! commit reports zero stored items.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tessera_core::{Clock, EmbeddingAdapter, EmbeddingInput, TemporalParser, TesseraError};
use tessera_storage::{Database, TxError};
use tracing::{debug, error, info, warn};

use crate::fenced::parse_fenced;
use crate::resolver::{ResolveOutcome, resolve_in_tx, validate_candidate};
use crate::types::{Emotion, MemoryMetadata, MemoryType, NewMemory};

/// Placeholder phrasings that carry no concrete information.
const VAGUE_PATTERNS: &[&str] = &[
    "some kind of",
    "a certain",
    "some things",
    "a type of",
    "certain things",
    "various things",
];

const VAGUE_PATTERNS_ZH: &[&str] = &["某种", "某个", "某些", "某事物", "某活动", "某项", "某位"];

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FactCandidate {
    pub content: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub temporality: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub importance: Option<f64>,
    #[serde(default)]
    pub emotion: Option<Emotion>,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub event_time: Option<String>,
    /// Timestamp as reported by the classifier, ISO or free text.
    #[serde(default)]
    pub timestamp: Option<String>,
    /// The original wording of the time expression ("last Tuesday").
    #[serde(default)]
    pub timestamp_original: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EpisodeCandidate {
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub timestamp_original: Option<String>,
    #[serde(default)]
    pub people: Vec<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub importance: Option<f64>,
    #[serde(default)]
    pub emotion: Option<Emotion>,
    #[serde(default)]
    pub entities: Vec<String>,
}

/// Classifier output for one conversation slice.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ClassifiedBatch {
    #[serde(default)]
    pub facts: Vec<FactCandidate>,
    #[serde(default)]
    pub episodes: Vec<EpisodeCandidate>,
}

impl ClassifiedBatch {
    pub fn from_llm_text(text: &str) -> Result<Self, TesseraError> {
        parse_fenced(text).map_err(|e| TesseraError::Provider {
            message: format!("classification result is not valid JSON: {e}"),
            source: Some(Box::new(e)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct IngestStats {
    pub facts_stored: usize,
    pub episodes_stored: usize,
    pub duplicates: usize,
    pub failed: usize,
}

/// Whether a fact is too vague to keep.
pub fn is_vague(content: &str) -> bool {
    let lower = content.to_lowercase();
    VAGUE_PATTERNS.iter().any(|p| lower.contains(p))
        || VAGUE_PATTERNS_ZH.iter().any(|p| content.contains(p))
}

fn parse_iso(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Event time from, in order: an ISO timestamp, the parser over the raw
/// timestamp text, the parser over the original wording, the parser over the
/// content, and finally the session reference time.
pub fn resolve_event_time(
    timestamp: Option<&str>,
    timestamp_original: Option<&str>,
    content: &str,
    reference: Option<DateTime<Utc>>,
    parser: Option<&dyn TemporalParser>,
) -> Option<DateTime<Utc>> {
    if let Some(raw) = timestamp.filter(|s| !s.trim().is_empty()) {
        if let Some(ts) = parse_iso(raw) {
            return Some(ts);
        }
        if let Some(ts) = parser.and_then(|p| p.extract(raw, reference)) {
            return Some(ts);
        }
    }
    if let Some(original) = timestamp_original.filter(|s| !s.trim().is_empty())
        && let Some(ts) = parser.and_then(|p| p.extract(original, reference))
    {
        return Some(ts);
    }
    parser
        .and_then(|p| p.extract(content, reference))
        .or(reference)
}

/// Stores classifier output through the conflict resolver.
#[derive(Clone)]
pub struct MemoryIngestor {
    db: Database,
    embedder: Arc<dyn EmbeddingAdapter>,
    clock: Arc<dyn Clock>,
    temporal: Option<Arc<dyn TemporalParser>>,
    embedding_dims: Option<usize>,
}

impl MemoryIngestor {
    pub fn new(
        db: Database,
        embedder: Arc<dyn EmbeddingAdapter>,
        clock: Arc<dyn Clock>,
        embedding_dims: Option<usize>,
    ) -> Self {
        Self {
            db,
            embedder,
            clock,
            temporal: None,
            embedding_dims,
        }
    }

    pub fn with_temporal_parser(mut self, parser: Arc<dyn TemporalParser>) -> Self {
        self.temporal = Some(parser);
        self
    }

    /// One embedding call; any failure or short reply yields no vectors.
    async fn embed_all(&self, kind: &str, texts: Vec<String>) -> Vec<Vec<f32>> {
        if texts.is_empty() {
            return Vec::new();
        }
        let expected = texts.len();
        match self.embedder.embed(EmbeddingInput { texts }).await {
            Ok(out) if out.embeddings.len() == expected => out.embeddings,
            Ok(out) => {
                error!(kind, expected, got = out.embeddings.len(), "embedding batch incomplete");
                Vec::new()
            }
            Err(e) => {
                error!(kind, error = %e, "embedding batch failed");
                Vec::new()
            }
        }
    }

    fn fact_memory(
        &self,
        owner: &str,
        fact: FactCandidate,
        embedding: Vec<f32>,
        reference: Option<DateTime<Utc>>,
    ) -> NewMemory {
        let event_time = resolve_event_time(
            fact.timestamp.as_deref(),
            fact.timestamp_original.as_deref(),
            &fact.content,
            reference,
            self.temporal.as_deref(),
        );
        let mut metadata = MemoryMetadata {
            category: Some(fact.category.unwrap_or_else(|| "general".into())),
            temporality: Some(fact.temporality.unwrap_or_else(|| "current".into())),
            confidence: Some(fact.confidence.unwrap_or(1.0)),
            importance: fact.importance,
            emotion: fact.emotion,
            entities: fact.entities,
            event_time: fact.event_time,
            ..Default::default()
        };
        metadata
            .extra
            .insert("extracted_from".into(), "conversation".into());
        NewMemory {
            owner_id: owner.to_string(),
            memory_type: MemoryType::Fact,
            content: fact.content,
            embedding,
            metadata,
            event_time,
        }
    }

    fn episode_memory(
        &self,
        owner: &str,
        episode: EpisodeCandidate,
        embedding: Vec<f32>,
        reference: Option<DateTime<Utc>>,
    ) -> NewMemory {
        let event_time = resolve_event_time(
            episode.timestamp.as_deref(),
            episode.timestamp_original.as_deref(),
            &episode.content,
            reference,
            self.temporal.as_deref(),
        );
        let mut metadata = MemoryMetadata {
            confidence: Some(episode.confidence.unwrap_or(1.0)),
            importance: episode.importance,
            emotion: episode.emotion,
            entities: episode.entities,
            event_time: event_time.map(|t| t.to_rfc3339()),
            ..Default::default()
        };
        if let Some(original) = episode.timestamp_original {
            metadata.extra.insert("timestamp_original".into(), original.into());
        }
        if !episode.people.is_empty() {
            metadata.extra.insert("people".into(), episode.people.into());
        }
        if let Some(location) = episode.location {
            metadata.extra.insert("location".into(), location.into());
        }
        NewMemory {
            owner_id: owner.to_string(),
            memory_type: MemoryType::Episodic,
            content: episode.content,
            embedding,
            metadata,
            event_time,
        }
    }

    /// Embed and store one classified batch for `owner`.
    ///
    /// `reference` is the session time used to anchor relative time
    /// expressions.
    pub async fn store_classified(
        &self,
        owner: &str,
        batch: ClassifiedBatch,
        reference: Option<DateTime<Utc>>,
    ) -> IngestStats {
        let facts: Vec<FactCandidate> = batch
            .facts
            .into_iter()
            .filter(|f| !f.content.trim().is_empty() && !is_vague(&f.content))
            .collect();
        let episodes: Vec<EpisodeCandidate> = batch
            .episodes
            .into_iter()
            .filter(|e| !e.content.trim().is_empty())
            .collect();
        if facts.is_empty() && episodes.is_empty() {
            return IngestStats::default();
        }

        let (fact_vectors, episode_vectors) = futures::join!(
            self.embed_all("fact", facts.iter().map(|f| f.content.clone()).collect()),
            self.embed_all("episode", episodes.iter().map(|e| e.content.clone()).collect()),
        );

        let mut candidates = Vec::new();
        for (fact, vector) in facts.into_iter().zip(fact_vectors) {
            candidates.push(self.fact_memory(owner, fact, vector, reference));
        }
        for (episode, vector) in episodes.into_iter().zip(episode_vectors) {
            candidates.push(self.episode_memory(owner, episode, vector, reference));
        }

        let mut rejected = 0;
        candidates.retain(|c| match validate_candidate(c, self.embedding_dims) {
            Ok(()) => true,
            Err(e) => {
                warn!(owner, error = %e, "candidate rejected");
                rejected += 1;
                false
            }
        });
        if candidates.is_empty() {
            return IngestStats {
                failed: rejected,
                ..Default::default()
            };
        }

        let now = self.clock.now();
        let result = self
            .db
            .write(move |tx| {
                let mut stats = IngestStats {
                    failed: rejected,
                    ..Default::default()
                };
                for candidate in &candidates {
                    let sp = tx.savepoint()?;
                    match resolve_in_tx(&sp, candidate, now) {
                        Ok(outcome) => {
                            sp.commit()?;
                            tally(&mut stats, candidate.memory_type, &outcome);
                        }
                        Err(e) => {
                            drop(sp);
                            if tx.is_autocommit() {
                                return Err(e);
                            }
                            warn!(error = %e, "batch item failed, skipped");
                            stats.failed += 1;
                        }
                    }
                }
                Ok::<_, TxError>(stats)
            })
            .await;

        match result {
            Ok(stats) => {
                info!(
                    owner,
                    facts = stats.facts_stored,
                    episodes = stats.episodes_stored,
                    duplicates = stats.duplicates,
                    "classified batch stored"
                );
                stats
            }
            Err(e) => {
                error!(owner, error = %e, "batch commit failed, nothing stored");
                IngestStats::default()
            }
        }
    }
}

fn tally(stats: &mut IngestStats, memory_type: MemoryType, outcome: &ResolveOutcome) {
    match outcome {
        ResolveOutcome::Noop { .. } => stats.duplicates += 1,
        _ if memory_type == MemoryType::Episodic => stats.episodes_stored += 1,
        _ => stats.facts_stored += 1,
    }
    debug!(outcome = outcome.label(), memory_id = outcome.memory_id(), "batch item resolved");
}
