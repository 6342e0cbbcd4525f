// SPDX-FileCopyrightText: 2026 Tessera Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic embedding adapter for tests.
//!
//! Every text maps to a fixed pseudo-random unit vector derived from its
//! SHA-256, so identical texts embed identically and unrelated texts land
//! far apart. Individual texts can be pinned to explicit vectors to set up
//! exact similarities.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tessera_core::{
    AdapterType, EmbeddingAdapter, EmbeddingInput, EmbeddingOutput, HealthStatus, PluginAdapter,
    TesseraError,
};

pub const DEFAULT_DIMS: usize = 64;

pub struct MockEmbedder {
    dims: usize,
    pinned: Mutex<HashMap<String, Vec<f32>>>,
    fail: AtomicBool,
    calls: AtomicUsize,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self::with_dims(DEFAULT_DIMS)
    }

    pub fn with_dims(dims: usize) -> Self {
        Self {
            dims: dims.max(2),
            pinned: Mutex::new(HashMap::new()),
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Make `text` embed to exactly `vector`.
    pub fn pin(&self, text: impl Into<String>, vector: Vec<f32>) {
        self.pinned
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(text.into(), vector);
    }

    /// Pin `a` and `b` so their cosine similarity is `similarity`.
    pub fn pin_pair(&self, a: impl Into<String>, b: impl Into<String>, similarity: f32) {
        let (va, vb) = Self::pair_with_similarity(self.dims, similarity);
        self.pin(a, va);
        self.pin(b, vb);
    }

    /// Two unit vectors with the given cosine similarity.
    pub fn pair_with_similarity(dims: usize, similarity: f32) -> (Vec<f32>, Vec<f32>) {
        let s = similarity.clamp(-1.0, 1.0);
        let mut a = vec![0.0; dims];
        let mut b = vec![0.0; dims];
        a[0] = 1.0;
        b[0] = s;
        b[1] = (1.0 - s * s).sqrt();
        (a, b)
    }

    /// Make every following call fail until reset.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The vector `text` embeds to.
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        if let Some(v) = self
            .pinned
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(text)
        {
            return v.clone();
        }
        hashed_unit_vector(text, self.dims)
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

fn hashed_unit_vector(text: &str, dims: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(dims);
    let mut block = 0u32;
    while out.len() < dims {
        let digest = Sha256::new()
            .chain_update(text.as_bytes())
            .chain_update(block.to_le_bytes())
            .finalize();
        for pair in digest.chunks_exact(2) {
            if out.len() == dims {
                break;
            }
            let raw = u16::from_le_bytes([pair[0], pair[1]]);
            out.push(f32::from(raw) / 32767.5 - 1.0);
        }
        block += 1;
    }
    let norm = out.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut out {
            *x /= norm;
        }
    }
    out
}

#[async_trait]
impl PluginAdapter for MockEmbedder {
    fn name(&self) -> &str {
        "mock-embedder"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Embedding
    }

    async fn health_check(&self) -> Result<HealthStatus, TesseraError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), TesseraError> {
        Ok(())
    }
}

#[async_trait]
impl EmbeddingAdapter for MockEmbedder {
    async fn embed(&self, input: EmbeddingInput) -> Result<EmbeddingOutput, TesseraError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(TesseraError::Embedding {
                message: "mock embedder configured to fail".into(),
                source: None,
            });
        }
        Ok(EmbeddingOutput {
            embeddings: input.texts.iter().map(|t| self.vector_for(t)).collect(),
            dimensions: self.dims,
        })
    }
}
