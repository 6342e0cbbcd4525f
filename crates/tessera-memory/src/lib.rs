// SPDX-FileCopyrightText: 2026 Tessera Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Long-term memory engine for conversational agents.
//!
//! Stores per-owner facts, episodes and documents as bi-temporal records,
//! infers traits from them through a confidence-driven lifecycle, and
//! retrieves them with hybrid vector + keyword search.
//!
//! ## Architecture
//!
//! - **MemoryStore**: SQLite persistence, history, rollback and erasure
//! - **ConflictResolver**: ADD / UPDATE / NOOP against the owner's active records
//! - **MemoryIngestor**: batch storage of classified facts and episodes
//! - **TraitEngine**: trend / candidate / emerging / established / core lifecycle
//! - **Reflector**: applies structured reflection results to the trait engine
//! - **HybridRetriever**: vector + BM25 + RRF fusion, plain and multi-factor
//! - **TaskRegistry**: owner-scoped background tasks and idle timers
//! - **MemorySystem**: everything above wired to one database

mod fenced;

pub mod ingest;
pub mod judge;
pub mod reflection;
pub mod resolver;
pub mod retriever;
pub mod store;
pub mod system;
pub mod tasks;
pub mod trait_engine;
pub mod types;

pub use ingest::{ClassifiedBatch, EpisodeCandidate, FactCandidate, IngestStats, MemoryIngestor};
pub use judge::{ContradictionCase, ContradictionJudge, Judgment, LlmContradictionJudge};
pub use reflection::{ReflectionOutcome, ReflectionStats, Reflector};
pub use resolver::{ConflictResolver, Duplicate, ResolveOutcome};
pub use retriever::{HybridRetriever, ScoredHit, ScoredSearchOptions, SearchFilters, SearchHit};
pub use store::{ErasureReport, MemoryStore, RollbackReport};
pub use system::{MemorySystem, MemorySystemBuilder};
pub use tasks::TaskRegistry;
pub use trait_engine::{
    ContradictionOutcome, DecayStats, MAX_TREND_WINDOW_DAYS, MaintenanceReport, ResolutionOutcome,
    TraitEngine, TraitOutcome, UpgradeOutcome, UpgradeSkip,
};
pub use types::*;
