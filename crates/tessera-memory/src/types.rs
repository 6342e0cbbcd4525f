// SPDX-FileCopyrightText: 2026 Tessera Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Memory domain types: the record sum type, trait state, evidence and history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum::{AsRefStr, Display, EnumString};

/// Discriminator stored in the `memory_type` column.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Fact,
    Episodic,
    Trait,
    Document,
}

/// How abstract a trait is. Upgrades only move toward `Core`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TraitSubtype {
    Behavior,
    Preference,
    Core,
}

impl TraitSubtype {
    /// Base decay rate per day.
    pub fn base_decay_rate(self) -> f64 {
        match self {
            TraitSubtype::Behavior => 0.005,
            TraitSubtype::Preference => 0.002,
            TraitSubtype::Core => 0.001,
        }
    }

    /// Minimum confidence every source must have to be upgraded into `self`.
    /// `None` means nothing upgrades into this subtype.
    pub fn upgrade_threshold(self) -> Option<f64> {
        match self {
            TraitSubtype::Behavior => None,
            TraitSubtype::Preference => Some(0.5),
            TraitSubtype::Core => Some(0.6),
        }
    }
}

/// Trait lifecycle stage. `Dissolved` is terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TraitStage {
    Trend,
    Candidate,
    Emerging,
    Established,
    Core,
    Dissolved,
}

impl TraitStage {
    /// Stage as a pure function of confidence.
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence < 0.1 {
            TraitStage::Dissolved
        } else if confidence < 0.3 {
            TraitStage::Candidate
        } else if confidence < 0.6 {
            TraitStage::Emerging
        } else if confidence < 0.85 {
            TraitStage::Established
        } else {
            TraitStage::Core
        }
    }

    pub fn is_terminal(self) -> bool {
        self == TraitStage::Dissolved
    }

    /// Whether retrieval may return a trait in this stage.
    pub fn is_retrievable(self) -> bool {
        matches!(
            self,
            TraitStage::Emerging | TraitStage::Established | TraitStage::Core
        )
    }

    /// Additive boost applied by scored search.
    pub fn retrieval_boost(self) -> f64 {
        match self {
            TraitStage::Core => 0.25,
            TraitStage::Established => 0.15,
            TraitStage::Emerging => 0.05,
            _ => 0.0,
        }
    }
}

/// Whether evidence backs or undermines a trait.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EvidenceDirection {
    Supporting,
    Contradicting,
}

/// Evidence strength, `A` strongest.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Display,
    EnumString,
    AsRefStr,
    Serialize,
    Deserialize,
)]
pub enum QualityGrade {
    A,
    B,
    #[default]
    C,
    D,
}

impl QualityGrade {
    /// Share of the remaining distance to 1.0 that one reinforcement closes.
    pub fn reinforcement_factor(self) -> f64 {
        match self {
            QualityGrade::A => 0.25,
            QualityGrade::B => 0.20,
            QualityGrade::C => 0.15,
            QualityGrade::D => 0.05,
        }
    }
}

/// Kind of audit row written to `memory_history`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum HistoryEvent {
    Add,
    Update,
    ContradictionModify,
    ContradictionDissolve,
    DecayDissolve,
    TrendExpire,
    RollbackInvalidate,
    RollbackReactivate,
}

/// Emotional tone attached to a memory or a query.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Emotion {
    /// Negative to positive, in [-1, 1].
    #[serde(default)]
    pub valence: f64,
    /// Calm to intense, in [0, 1].
    #[serde(default)]
    pub arousal: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Known metadata attributes plus a residual map for anything else.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MemoryMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Salience on a 1-10 scale, as judged by the classifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion: Option<Emotion>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<String>,
    /// Raw event time as the classifier reported it. The `event_time`
    /// column wins when both are present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_time: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl MemoryMetadata {
    /// Parse a stored metadata document. Malformed known fields do not lose
    /// the document: the whole object lands in `extra` instead.
    pub fn from_json(raw: &str) -> Self {
        if let Ok(meta) = serde_json::from_str::<MemoryMetadata>(raw) {
            return meta;
        }
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(serde_json::Value::Object(extra)) => MemoryMetadata {
                extra,
                ..Default::default()
            },
            _ => MemoryMetadata::default(),
        }
    }

    /// Importance normalized to [0, 1], defaulting to 0.5.
    pub fn importance_weight(&self) -> f64 {
        self.importance.map(|i| i / 10.0).unwrap_or(0.5)
    }

    fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(|v| v.as_str())
    }

    fn extra_f64(&self, key: &str) -> Option<f64> {
        self.extra.get(key).and_then(|v| v.as_f64())
    }
}

/// Observation window of a trend-stage trait.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Fields that only exist on trait records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraitState {
    pub subtype: TraitSubtype,
    pub stage: TraitStage,
    pub confidence: f64,
    pub context: Option<String>,
    /// Set once this trait has been folded into an upgraded trait.
    pub parent_id: Option<String>,
    pub reinforcement_count: i64,
    pub contradiction_count: i64,
    pub last_reinforced: Option<DateTime<Utc>>,
    pub first_observed: Option<DateTime<Utc>>,
    pub window: Option<TrendWindow>,
    pub derived_from: Option<String>,
}

impl TraitState {
    /// Share of all evidence counts that contradicted this trait.
    pub fn contradiction_ratio(&self) -> f64 {
        let total = self.reinforcement_count + self.contradiction_count;
        if total == 0 {
            0.0
        } else {
            self.contradiction_count as f64 / total as f64
        }
    }
}

/// Per-type payload of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "memory_type", rename_all = "snake_case")]
pub enum MemoryKind {
    Fact,
    Episodic,
    Trait(TraitState),
    Document,
}

impl MemoryKind {
    pub fn memory_type(&self) -> MemoryType {
        match self {
            MemoryKind::Fact => MemoryType::Fact,
            MemoryKind::Episodic => MemoryType::Episodic,
            MemoryKind::Trait(_) => MemoryType::Trait,
            MemoryKind::Document => MemoryType::Document,
        }
    }

    pub fn as_trait(&self) -> Option<&TraitState> {
        match self {
            MemoryKind::Trait(state) => Some(state),
            _ => None,
        }
    }
}

/// One row of the `memories` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub owner_id: String,
    pub content: String,
    #[serde(skip)]
    pub embedding: Vec<f32>,
    pub metadata: MemoryMetadata,
    pub content_hash: String,
    /// Numeric importance in [0, 1], separate from `metadata.importance`.
    pub importance: f64,
    pub access_count: i64,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub event_time: Option<DateTime<Utc>>,
    pub valid_from: DateTime<Utc>,
    /// `None` while the record is current.
    pub valid_until: Option<DateTime<Utc>>,
    pub version: i64,
    pub superseded_by: Option<String>,
    pub expired_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub kind: MemoryKind,
}

impl MemoryRecord {
    pub fn memory_type(&self) -> MemoryType {
        self.kind.memory_type()
    }

    pub fn is_active(&self) -> bool {
        self.valid_until.is_none()
    }

    pub fn trait_state(&self) -> Option<&TraitState> {
        self.kind.as_trait()
    }

    /// Whether the record was current at `instant`.
    pub fn valid_at(&self, instant: DateTime<Utc>) -> bool {
        self.valid_from <= instant && self.valid_until.is_none_or(|until| until > instant)
    }
}

/// A fact, episode or document proposed for storage.
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub owner_id: String,
    pub memory_type: MemoryType,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: MemoryMetadata,
    pub event_time: Option<DateTime<Utc>>,
}

/// A link from a trait to a source record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceRecord {
    pub id: i64,
    pub trait_id: String,
    pub memory_id: String,
    pub direction: EvidenceDirection,
    pub quality: QualityGrade,
    pub created_at: DateTime<Utc>,
}

/// One audit row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub memory_id: String,
    pub owner_id: String,
    pub memory_type: MemoryType,
    pub event: HistoryEvent,
    pub old_content: Option<String>,
    pub new_content: Option<String>,
    pub old_metadata: Option<serde_json::Value>,
    pub new_metadata: Option<serde_json::Value>,
    pub actor: String,
    pub created_at: DateTime<Utc>,
}

/// Per-factor breakdown of a scored search hit.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ScoreBreakdown {
    pub vector_similarity: f64,
    pub keyword_matched: bool,
    pub relevance: f64,
    pub recency_bonus: f64,
    pub importance_bonus: f64,
    pub trait_stage_boost: f64,
    pub emotion_match_bonus: f64,
    pub final_score: f64,
}

/// Content digest used for exact-duplicate detection: the first 32 hex
/// characters of SHA-256.
pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(32);
    hex
}

/// Cosine similarity. Mismatched lengths or zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Resolve a trait attribute: the dedicated column wins, else the legacy
/// metadata key.
pub(crate) fn coalesce_stage(column: Option<String>, meta: &MemoryMetadata) -> Option<TraitStage> {
    column
        .as_deref()
        .or_else(|| meta.extra_str("trait_stage"))
        .and_then(|s| s.parse().ok())
}

pub(crate) fn coalesce_subtype(
    column: Option<String>,
    meta: &MemoryMetadata,
) -> Option<TraitSubtype> {
    column
        .as_deref()
        .or_else(|| meta.extra_str("trait_subtype"))
        .and_then(|s| s.parse().ok())
}

pub(crate) fn coalesce_confidence(column: Option<f64>, meta: &MemoryMetadata) -> Option<f64> {
    column.or_else(|| meta.extra_f64("trait_confidence"))
}
