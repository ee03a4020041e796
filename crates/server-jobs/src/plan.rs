// crates/server-jobs/src/plan.rs
//! Fixed stage sequences per job kind.
//!
//! Each stage owns a fixed slice of the progress bar; the values do not
//! reflect how much work a stage actually does.

use super::types::JobKind;

/// One named step of a job's processing sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stage {
    pub name: &'static str,
    pub description: &'static str,
    /// Progress reported when the stage begins.
    pub progress: f64,
}

const fn stage(name: &'static str, description: &'static str, progress: f64) -> Stage {
    Stage {
        name,
        description,
        progress,
    }
}

const AGGREGATION: &[Stage] = &[
    stage("validation", "Validating aggregation request", 0.1),
    stage("data_collection", "Collecting source records", 0.2),
    stage("normalization", "Normalizing record fields", 0.4),
    stage("aggregation", "Aggregating field values", 0.6),
    stage("quality_check", "Checking aggregate quality", 0.8),
    stage("result_generation", "Generating aggregation result", 0.9),
];

const MINING: &[Stage] = &[
    stage("validation", "Validating mining request", 0.1),
    stage("data_loading", "Loading dataset", 0.2),
    stage("feature_extraction", "Extracting features", 0.4),
    stage("model_execution", "Running mining algorithm", 0.6),
    stage("evaluation", "Evaluating mining output", 0.8),
    stage("result_generation", "Generating mining result", 0.9),
];

const LIFECYCLE: &[Stage] = &[
    stage("validation", "Validating lifecycle request", 0.1),
    stage("inventory", "Building record inventory", 0.2),
    stage("policy_evaluation", "Evaluating lifecycle policy", 0.4),
    stage("stage_execution", "Executing lifecycle stage", 0.6),
    stage("verification", "Verifying lifecycle changes", 0.8),
    stage("result_generation", "Generating lifecycle report", 0.9),
];

/// Ordered stages for one job kind. The last stage runs the core computation.
#[derive(Debug, Clone, Copy)]
pub struct StagePlan {
    stages: &'static [Stage],
}

impl StagePlan {
    pub fn for_kind(kind: JobKind) -> Self {
        let stages = match kind {
            JobKind::Aggregation => AGGREGATION,
            JobKind::Mining => MINING,
            JobKind::Lifecycle => LIFECYCLE,
        };
        Self { stages }
    }

    pub fn stages(&self) -> &'static [Stage] {
        self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
