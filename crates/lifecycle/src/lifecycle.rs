use std::sync::Arc;

use metrics::counter;
use rand::Rng;
use smallvec::SmallVec;
use stagehand_core::StageConfig;
use tracing::debug;

use crate::error::{EvalError, StageError};
use crate::resource::Resource;
use crate::stage::Stage;

/// Ordered, read-only stage set.
#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    stages: Vec<Arc<Stage>>,
}

impl Lifecycle {
    /// Build every stage; any error rejects the whole set. Stages without a
    /// selector are dropped.
    pub fn new(configs: &[StageConfig]) -> Result<Self, StageError> {
        let mut stages = Vec::with_capacity(configs.len());
        for config in configs {
            let stage = Stage::new(config)?;
            if stage.is_inert() {
                debug!(stage = %stage.name(), "skipping inert stage");
                continue;
            }
            stages.push(Arc::new(stage));
        }
        Ok(Self { stages })
    }

    pub fn from_stages(stages: impl IntoIterator<Item = Stage>) -> Self {
        Self { stages: stages.into_iter().filter(|s| !s.is_inert()).map(Arc::new).collect() }
    }

    /// Stages whose `resourceRef` names this group and kind.
    pub fn for_kind(&self, api_group: &str, kind: &str) -> Lifecycle {
        Self { stages: self.stages.iter().filter(|s| s.targets(api_group, kind)).cloned().collect() }
    }

    pub fn stages(&self) -> &[Arc<Stage>] { &self.stages }
    pub fn len(&self) -> usize { self.stages.len() }
    pub fn is_empty(&self) -> bool { self.stages.is_empty() }
    pub fn get(&self, name: &str) -> Option<&Arc<Stage>> { self.stages.iter().find(|s| s.name() == name) }

    /// Matching stages in configuration order.
    pub fn matches(&self, resource: &Resource) -> Vec<&Arc<Stage>> {
        self.stages.iter().filter(|s| s.matches(resource)).collect()
    }

    /// Weighted random choice among the matching stages.
    ///
    /// Weights of 1 or less count as zero; when all are zero the choice is
    /// uniform. Weight expression errors propagate.
    pub fn pick<R: Rng + ?Sized>(&self, resource: &Resource, rng: &mut R) -> Result<Option<&Arc<Stage>>, EvalError> {
        let matched = self.matches(resource);
        let picked = match matched.len() {
            0 => None,
            1 => Some(matched[0]),
            n => {
                let weights = matched
                    .iter()
                    .map(|s| s.weight(resource, &mut *rng).map(|w| if w > 1 { w } else { 0 }))
                    .collect::<Result<SmallVec<[i64; 8]>, _>>()?;
                let total = weights.iter().fold(0i64, |acc, w| acc.saturating_add(*w));
                if total == 0 {
                    Some(matched[rng.gen_range(0..n)])
                } else {
                    let mut r = rng.gen_range(0..total);
                    let mut chosen = matched[n - 1];
                    for (&stage, w) in matched.iter().zip(weights.iter()) {
                        r -= w;
                        if r < 0 {
                            chosen = stage;
                            break;
                        }
                    }
                    Some(chosen)
                }
            }
        };
        if let Some(stage) = picked {
            debug!(resource = %resource.display_name(), stage = %stage.name(), candidates = matched.len(), "picked stage");
            counter!("stage_pick_total", 1u64, "stage" => stage.name().to_string());
        }
        Ok(picked)
    }
}
