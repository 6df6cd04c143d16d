//! Final stage: envelope assembly and request teardown.

use crate::dispatch::DispatchOutcome;
use crate::error::ControlError;
use crate::scratch::ScratchDir;
use crate::types::{Artifact, ExecutionPlan, ResponseEnvelope, TaskStatus};
use tracing::{info, warn};

/// Everything a caller of the pipeline gets back.
#[derive(Debug, Default)]
pub struct ControlOutcome {
    pub envelope: ResponseEnvelope,
    /// Files produced by tasks, in plan order.
    pub artifacts: Vec<Artifact>,
}

impl ControlOutcome {
    /// The artifact to hand back as the response body, if any: the one
    /// produced last in plan order.
    pub fn primary_artifact(&self) -> Option<&Artifact> {
        self.artifacts.last()
    }
}

pub struct ResultAggregator;

impl ResultAggregator {
    /// Combines a dispatched plan into its envelope and removes the scratch
    /// directory.
    pub fn complete(plan: ExecutionPlan, dispatched: DispatchOutcome, scratch: ScratchDir) -> ControlOutcome {
        scratch.cleanup();

        let failed = dispatched
            .results
            .iter()
            .filter(|r| r.status != TaskStatus::Success)
            .count();
        info!(
            task_count = dispatched.results.len(),
            failed,
            artifacts = dispatched.artifacts.len(),
            "Execution results aggregated."
        );

        ControlOutcome {
            envelope: ResponseEnvelope::completed(plan, dispatched.results),
            artifacts: dispatched.artifacts,
        }
    }

    /// Envelope for a pipeline that stopped before dispatch.
    pub fn short_circuit(error: &ControlError, scratch: Option<ScratchDir>) -> ControlOutcome {
        if let Some(scratch) = scratch {
            scratch.cleanup();
        }
        if error.is_no_services() {
            info!(reason = %error, "Pipeline stopped before dispatch.");
        } else {
            warn!(error = %error, "Pipeline failed before dispatch.");
        }
        ControlOutcome {
            envelope: ResponseEnvelope::failed(error.to_string()),
            artifacts: Vec::new(),
        }
    }
}
