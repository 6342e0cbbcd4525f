// SPDX-FileCopyrightText: 2026 Tessera Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Applies a structured reflection result to the trait engine.
//!
//! The reflection itself (prompting a model over recent memories) happens
//! elsewhere; this module consumes its JSON and drives the state machine in a
//! fixed order: expire, promote, create, reinforce, upgrade, contradict,
//! decay.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tessera_config::TraitsConfig;
use tessera_core::TesseraError;
use tracing::{info, warn};

use crate::fenced::parse_fenced;
use crate::judge::ContradictionJudge;
use crate::trait_engine::{
    MAX_TREND_WINDOW_DAYS, MaintenanceReport, ResolutionOutcome, TraitEngine, TraitOutcome,
    UpgradeOutcome,
};
use crate::types::{QualityGrade, TraitSubtype};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TrendProposal {
    pub content: String,
    #[serde(default)]
    pub evidence_ids: Vec<String>,
    #[serde(default)]
    pub window_days: Option<i64>,
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BehaviorProposal {
    pub content: String,
    #[serde(default)]
    pub evidence_ids: Vec<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ReinforcementProposal {
    pub trait_id: String,
    #[serde(default)]
    pub new_evidence_ids: Vec<String>,
    #[serde(default)]
    pub quality_grade: QualityGrade,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UpgradeProposal {
    pub from_trait_ids: Vec<String>,
    pub new_content: String,
    pub new_subtype: TraitSubtype,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ContradictionProposal {
    pub trait_id: String,
    #[serde(default)]
    pub contradicting_evidence_ids: Vec<String>,
}

/// What a reflection pass proposes.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct ReflectionOutcome {
    #[serde(default)]
    pub new_trends: Vec<TrendProposal>,
    #[serde(default)]
    pub new_behaviors: Vec<BehaviorProposal>,
    #[serde(default)]
    pub reinforcements: Vec<ReinforcementProposal>,
    #[serde(default)]
    pub upgrades: Vec<UpgradeProposal>,
    #[serde(default)]
    pub contradictions: Vec<ContradictionProposal>,
}

impl ReflectionOutcome {
    /// Parse a model reply, accepting fenced JSON.
    pub fn from_llm_text(text: &str) -> Result<Self, TesseraError> {
        parse_fenced(text).map_err(|e| TesseraError::Provider {
            message: format!("reflection result is not valid JSON: {e}"),
            source: Some(Box::new(e)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ReflectionStats {
    pub traits_created: usize,
    pub traits_updated: usize,
    pub traits_dissolved: usize,
}

impl ReflectionStats {
    fn count(&mut self, outcome: &TraitOutcome) {
        match outcome {
            TraitOutcome::Created { .. } => self.traits_created += 1,
            TraitOutcome::Merged { .. } | TraitOutcome::Updated { .. } => {
                self.traits_updated += 1
            }
            TraitOutcome::Terminal { .. } | TraitOutcome::NotFound { .. } => {}
        }
    }
}

impl From<MaintenanceReport> for ReflectionStats {
    fn from(report: MaintenanceReport) -> Self {
        Self {
            traits_created: 0,
            traits_updated: report.promoted,
            traits_dissolved: report.expired + report.decay.dissolved,
        }
    }
}

/// Drives the trait engine from reflection results.
pub struct Reflector {
    engine: TraitEngine,
    judge: Arc<dyn ContradictionJudge>,
    defaults: TraitsConfig,
}

impl Reflector {
    pub fn new(
        engine: TraitEngine,
        judge: Arc<dyn ContradictionJudge>,
        defaults: TraitsConfig,
    ) -> Self {
        Self {
            engine,
            judge,
            defaults,
        }
    }

    /// Expire, promote and decay with no new proposals.
    pub async fn run_maintenance(&self, owner: &str) -> Result<ReflectionStats, TesseraError> {
        Ok(self.engine.run_maintenance(owner).await?.into())
    }

    /// Apply one reflection result.
    ///
    /// Storage failures in the expire, promote and decay sweeps abort the
    /// pass. A failing proposal is logged and skipped so one bad item does
    /// not discard the rest.
    pub async fn apply(
        &self,
        owner: &str,
        outcome: &ReflectionOutcome,
    ) -> Result<ReflectionStats, TesseraError> {
        let mut stats = ReflectionStats::default();

        stats.traits_dissolved += self.engine.expire_trends(owner).await?;
        stats.traits_updated += self.engine.promote_trends(owner).await?;

        for trend in &outcome.new_trends {
            let context = trend
                .context
                .as_deref()
                .unwrap_or(&self.defaults.default_context);
            let window = match trend.window_days {
                Some(days) if (1..=MAX_TREND_WINDOW_DAYS).contains(&days) => days,
                Some(days) => {
                    warn!(
                        owner,
                        window_days = days,
                        fallback = self.defaults.default_window_days,
                        "trend window out of range, using default"
                    );
                    self.defaults.default_window_days
                }
                None => self.defaults.default_window_days,
            };
            match self
                .engine
                .create_trend(owner, &trend.content, &trend.evidence_ids, window, context)
                .await
            {
                Ok(result) => stats.count(&result),
                Err(e) => warn!(owner, error = %e, "trend proposal skipped"),
            }
        }

        for behavior in &outcome.new_behaviors {
            let context = behavior
                .context
                .as_deref()
                .unwrap_or(&self.defaults.default_context);
            let confidence = behavior
                .confidence
                .unwrap_or(self.defaults.default_behavior_confidence);
            match self
                .engine
                .create_behavior(owner, &behavior.content, &behavior.evidence_ids, confidence, context)
                .await
            {
                Ok(result) => stats.count(&result),
                Err(e) => warn!(owner, error = %e, "behavior proposal skipped"),
            }
        }

        for item in &outcome.reinforcements {
            match self
                .engine
                .reinforce_trait(owner, &item.trait_id, &item.new_evidence_ids, item.quality_grade)
                .await
            {
                Ok(result) => stats.count(&result),
                Err(e) => warn!(owner, trait_id = %item.trait_id, error = %e, "reinforcement skipped"),
            }
        }

        for upgrade in &outcome.upgrades {
            match self
                .engine
                .try_upgrade(
                    owner,
                    &upgrade.from_trait_ids,
                    &upgrade.new_content,
                    upgrade.new_subtype,
                )
                .await
            {
                Ok(UpgradeOutcome::Upgraded { .. }) => stats.traits_created += 1,
                Ok(UpgradeOutcome::Skipped { .. }) => {}
                Err(e) => warn!(owner, error = %e, "upgrade skipped"),
            }
        }

        for item in &outcome.contradictions {
            let applied = match self
                .engine
                .apply_contradiction(owner, &item.trait_id, &item.contradicting_evidence_ids)
                .await
            {
                Ok(applied) => applied,
                Err(e) => {
                    warn!(owner, trait_id = %item.trait_id, error = %e, "contradiction skipped");
                    continue;
                }
            };
            if !applied.needs_special_reflection() {
                continue;
            }
            match self
                .engine
                .resolve_contradiction(owner, &item.trait_id, self.judge.as_ref())
                .await
            {
                Ok(ResolutionOutcome::Dissolved { .. }) => stats.traits_dissolved += 1,
                Ok(ResolutionOutcome::Modified { .. }) => stats.traits_updated += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(owner, trait_id = %item.trait_id, error = %e, "special reflection failed")
                }
            }
        }

        stats.traits_dissolved += self.engine.apply_decay(owner).await?.dissolved;

        info!(
            owner,
            created = stats.traits_created,
            updated = stats.traits_updated,
            dissolved = stats.traits_dissolved,
            "reflection applied"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_model_reply_with_defaults() {
        let reply = r#"```json
{
  "new_trends": [{"content": "codes late at night", "evidence_ids": ["m1"]}],
  "reinforcements": [{"trait_id": "t1"}],
  "upgrades": [{"from_trait_ids": ["a", "b"], "new_content": "night owl", "new_subtype": "preference"}]
}
```"#;
        let outcome = ReflectionOutcome::from_llm_text(reply).unwrap();
        assert_eq!(outcome.new_trends[0].window_days, None);
        assert_eq!(outcome.reinforcements[0].quality_grade, QualityGrade::C);
        assert!(outcome.reinforcements[0].new_evidence_ids.is_empty());
        assert_eq!(outcome.upgrades[0].new_subtype, TraitSubtype::Preference);
        assert!(outcome.new_behaviors.is_empty());
        assert!(outcome.contradictions.is_empty());
    }

    #[test]
    fn rejects_non_json() {
        let err = ReflectionOutcome::from_llm_text("no reflections today").unwrap_err();
        assert!(matches!(err, TesseraError::Provider { .. }));
    }

    #[test]
    fn maintenance_report_folds_into_stats() {
        let report = MaintenanceReport {
            expired: 2,
            promoted: 1,
            decay: crate::trait_engine::DecayStats {
                decayed: 4,
                dissolved: 1,
            },
        };
        let stats = ReflectionStats::from(report);
        assert_eq!(stats.traits_dissolved, 3);
        assert_eq!(stats.traits_updated, 1);
    }
}
