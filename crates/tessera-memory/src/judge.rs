// SPDX-FileCopyrightText: 2026 Tessera Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Verdicts on disputed traits.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tessera_core::{AdapterType, ChatMessage, ChatRequest, ProviderAdapter, TesseraError};
use tracing::{debug, warn};

use crate::fenced::parse_fenced;
use crate::types::{QualityGrade, TraitSubtype};

/// One graded piece of evidence, rendered as its source content.
#[derive(Debug, Clone, PartialEq)]
pub struct EvidenceLine {
    pub quality: QualityGrade,
    pub content: String,
}

/// Everything the judge sees about a disputed trait.
#[derive(Debug, Clone, PartialEq)]
pub struct ContradictionCase {
    pub content: String,
    pub subtype: TraitSubtype,
    pub confidence: f64,
    pub context: String,
    pub supporting: Vec<EvidenceLine>,
    pub contradicting: Vec<EvidenceLine>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Judgment {
    /// Keep the trait, optionally with rewritten content.
    Modify {
        new_content: Option<String>,
        reasoning: String,
    },
    Dissolve {
        reasoning: String,
    },
}

/// Decides whether a contradicted trait survives.
#[async_trait]
pub trait ContradictionJudge: Send + Sync {
    async fn judge(&self, case: &ContradictionCase) -> Result<Judgment, TesseraError>;
}

const SYSTEM_PROMPT: &str =
    "You analyse contradictions in inferred user traits. Reply with JSON only.";

fn render_evidence(out: &mut String, lines: &[EvidenceLine]) {
    if lines.is_empty() {
        out.push_str("(none)\n");
    }
    for line in lines {
        let _ = writeln!(out, "- [{}] {}", line.quality, line.content);
    }
}

fn render_case(case: &ContradictionCase) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Trait: {}", case.content);
    let _ = writeln!(out, "Subtype: {}", case.subtype);
    let _ = writeln!(out, "Current confidence: {:.2}", case.confidence);
    let _ = writeln!(out, "Context: {}", case.context);
    let _ = writeln!(out, "\nSupporting evidence ({}):", case.supporting.len());
    render_evidence(&mut out, &case.supporting);
    let _ = writeln!(out, "\nContradicting evidence ({}):", case.contradicting.len());
    render_evidence(&mut out, &case.contradicting);
    out.push_str(
        "\nDecide whether the trait should be modified to fit all evidence or dissolved.\n\
         Return {\"action\": \"modify\" | \"dissolve\", \"new_content\": string, \
         \"reasoning\": string}.",
    );
    out
}

#[derive(Debug, Deserialize)]
struct RawJudgment {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    new_content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Map a chat reply to a verdict. Anything but an explicit `modify` dissolves.
pub fn parse_judgment(reply: &str) -> Judgment {
    match parse_fenced::<RawJudgment>(reply) {
        Ok(raw) => {
            let reasoning = raw.reasoning.unwrap_or_default();
            match raw.action.as_deref() {
                Some("modify") => Judgment::Modify {
                    new_content: raw.new_content,
                    reasoning,
                },
                _ => Judgment::Dissolve { reasoning },
            }
        }
        Err(e) => {
            warn!(error = %e, "unparseable contradiction judgment, dissolving");
            Judgment::Dissolve {
                reasoning: String::new(),
            }
        }
    }
}

/// Judge backed by a chat provider.
pub struct LlmContradictionJudge {
    provider: Arc<dyn ProviderAdapter>,
}

impl LlmContradictionJudge {
    pub fn new(provider: Arc<dyn ProviderAdapter>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl ContradictionJudge for LlmContradictionJudge {
    async fn judge(&self, case: &ContradictionCase) -> Result<Judgment, TesseraError> {
        let request = ChatRequest {
            messages: vec![
                ChatMessage::system(SYSTEM_PROMPT),
                ChatMessage::user(render_case(case)),
            ],
            temperature: 0.1,
            max_tokens: 1024,
        };
        let reply = self.provider.chat(request).await?;
        let judgment = parse_judgment(&reply);
        debug!(?judgment, "contradiction judged");
        Ok(judgment)
    }
}

/// Stand-in used when no provider is configured; every case dissolves via
/// the caller's failure path.
pub(crate) struct UnavailableJudge;

#[async_trait]
impl ContradictionJudge for UnavailableJudge {
    async fn judge(&self, _case: &ContradictionCase) -> Result<Judgment, TesseraError> {
        Err(TesseraError::AdapterNotFound {
            adapter_type: AdapterType::Provider,
            name: "contradiction-judge".into(),
        })
    }
}
