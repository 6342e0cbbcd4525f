// SPDX-FileCopyrightText: 2026 Tessera Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The assembled memory engine.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tessera_config::TesseraConfig;
use tessera_core::{
    Clock, EmbeddingAdapter, ProviderAdapter, SystemClock, TemporalParser, TesseraError,
};
use tessera_storage::Database;
use tracing::{info, warn};

use crate::ingest::{ClassifiedBatch, IngestStats, MemoryIngestor};
use crate::judge::{ContradictionJudge, LlmContradictionJudge, UnavailableJudge};
use crate::reflection::{ReflectionOutcome, ReflectionStats, Reflector};
use crate::resolver::{ConflictResolver, ResolveOutcome};
use crate::retriever::{HybridRetriever, ScoredHit, ScoredSearchOptions, SearchFilters, SearchHit};
use crate::store::{ErasureReport, MemoryStore, RollbackReport};
use crate::tasks::TaskRegistry;
use crate::trait_engine::TraitEngine;
use crate::types::{HistoryEntry, NewMemory};

/// Builder for [`MemorySystem`].
pub struct MemorySystemBuilder {
    db: Database,
    embedder: Arc<dyn EmbeddingAdapter>,
    config: TesseraConfig,
    clock: Option<Arc<dyn Clock>>,
    provider: Option<Arc<dyn ProviderAdapter>>,
    judge: Option<Arc<dyn ContradictionJudge>>,
    temporal: Option<Arc<dyn TemporalParser>>,
}

impl MemorySystemBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Chat provider used for contradiction judgments unless an explicit
    /// judge is set.
    pub fn provider(mut self, provider: Arc<dyn ProviderAdapter>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn judge(mut self, judge: Arc<dyn ContradictionJudge>) -> Self {
        self.judge = Some(judge);
        self
    }

    pub fn temporal_parser(mut self, parser: Arc<dyn TemporalParser>) -> Self {
        self.temporal = Some(parser);
        self
    }

    pub fn build(self) -> MemorySystem {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let dims = self.config.memory.embedding_dims;

        let judge: Arc<dyn ContradictionJudge> = match (self.judge, self.provider) {
            (Some(judge), _) => judge,
            (None, Some(provider)) => Arc::new(LlmContradictionJudge::new(provider)),
            (None, None) => {
                warn!("no chat provider configured, contradicted traits will dissolve");
                Arc::new(UnavailableJudge)
            }
        };

        let mut ingestor =
            MemoryIngestor::new(self.db.clone(), self.embedder.clone(), clock.clone(), dims);
        if let Some(parser) = self.temporal {
            ingestor = ingestor.with_temporal_parser(parser);
        }

        let traits =
            TraitEngine::new(self.db.clone(), clock.clone()).with_embedder(self.embedder.clone());

        MemorySystem {
            store: MemoryStore::new(self.db.clone(), clock.clone()),
            resolver: ConflictResolver::new(self.db.clone(), clock.clone(), dims),
            ingestor,
            reflector: Arc::new(Reflector::new(
                traits.clone(),
                judge,
                self.config.traits.clone(),
            )),
            traits,
            retriever: HybridRetriever::new(
                self.db,
                self.embedder,
                self.config.retrieval.clone(),
                clock,
            ),
            tasks: TaskRegistry::new(&self.config.tasks),
        }
    }
}

/// Entry point for collaborators: ingestion, trait maintenance, retrieval,
/// rollback and erasure for any number of owners over one database.
pub struct MemorySystem {
    store: MemoryStore,
    resolver: ConflictResolver,
    ingestor: MemoryIngestor,
    traits: TraitEngine,
    reflector: Arc<Reflector>,
    retriever: HybridRetriever,
    tasks: Arc<TaskRegistry>,
}

impl MemorySystem {
    pub fn builder(
        db: Database,
        embedder: Arc<dyn EmbeddingAdapter>,
        config: TesseraConfig,
    ) -> MemorySystemBuilder {
        MemorySystemBuilder {
            db,
            embedder,
            config,
            clock: None,
            provider: None,
            judge: None,
            temporal: None,
        }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn traits(&self) -> &TraitEngine {
        &self.traits
    }

    pub fn retriever(&self) -> &HybridRetriever {
        &self.retriever
    }

    pub fn tasks(&self) -> &Arc<TaskRegistry> {
        &self.tasks
    }

    pub async fn resolve_and_store(
        &self,
        candidate: NewMemory,
    ) -> Result<ResolveOutcome, TesseraError> {
        let owner = candidate.owner_id.clone();
        let outcome = self.resolver.resolve_and_store(candidate).await?;
        if !matches!(outcome, ResolveOutcome::Noop { .. }) {
            self.note_new(&owner, 1);
        }
        Ok(outcome)
    }

    /// Store a classified batch and count the new rows towards the owner's
    /// next reflection.
    pub async fn store_classified(
        &self,
        owner: &str,
        batch: ClassifiedBatch,
        reference: Option<DateTime<Utc>>,
    ) -> IngestStats {
        let stats = self.ingestor.store_classified(owner, batch, reference).await;
        let stored = stats.facts_stored + stats.episodes_stored;
        if stored > 0 {
            self.note_new(owner, u32::try_from(stored).unwrap_or(u32::MAX));
        }
        stats
    }

    fn note_new(&self, owner: &str, n: u32) {
        if self.tasks.note_new_memories(owner, n) {
            info!(owner, pending = self.tasks.pending(owner), "reflection due");
        }
    }

    /// Whether enough new memories accumulated to warrant a reflection pass.
    pub fn reflection_due(&self, owner: &str) -> bool {
        self.tasks.reflection_due(owner)
    }

    pub async fn search(
        &self,
        owner: &str,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>, TesseraError> {
        self.retriever.search(owner, query, filters).await
    }

    pub async fn scored_search(
        &self,
        owner: &str,
        query: &str,
        filters: &SearchFilters,
        options: &ScoredSearchOptions,
    ) -> Result<Vec<ScoredHit>, TesseraError> {
        self.retriever
            .scored_search(owner, query, filters, options)
            .await
    }

    /// Apply a reflection result and reset the owner's pending counter.
    pub async fn reflect(
        &self,
        owner: &str,
        outcome: &ReflectionOutcome,
    ) -> Result<ReflectionStats, TesseraError> {
        let pending = self.tasks.take_pending(owner);
        let stats = self.reflector.apply(owner, outcome).await?;
        info!(owner, pending, "reflection complete");
        Ok(stats)
    }

    pub async fn run_maintenance(&self, owner: &str) -> Result<ReflectionStats, TesseraError> {
        self.reflector.run_maintenance(owner).await
    }

    /// Run maintenance for `owner` in the background. Returns the task id.
    pub fn schedule_maintenance(&self, owner: &str) -> u64 {
        let reflector = self.reflector.clone();
        let owner_id = owner.to_string();
        self.tasks.spawn(owner, move |_token| async move {
            match reflector.run_maintenance(&owner_id).await {
                Ok(stats) => info!(
                    owner = %owner_id,
                    updated = stats.traits_updated,
                    dissolved = stats.traits_dissolved,
                    "background maintenance finished"
                ),
                Err(e) => warn!(owner = %owner_id, error = %e, "background maintenance failed"),
            }
        })
    }

    pub async fn rollback(
        &self,
        owner: &str,
        to: DateTime<Utc>,
    ) -> Result<RollbackReport, TesseraError> {
        self.store.rollback(owner, to).await
    }

    pub async fn history(&self, memory_id: &str) -> Result<Vec<HistoryEntry>, TesseraError> {
        self.store.history(memory_id).await
    }

    /// Cancel the owner's background work, then delete every row they own.
    pub async fn delete_user_data(&self, owner: &str) -> Result<ErasureReport, TesseraError> {
        let cancelled = self.tasks.cancel_owner(owner);
        let report = self.store.delete_owner(owner).await?;
        info!(
            owner,
            cancelled,
            memories = report.memories,
            evidence = report.evidence,
            history = report.history,
            "user data erased"
        );
        Ok(report)
    }

    pub fn shutdown(&self) {
        self.tasks.shutdown();
    }
}
