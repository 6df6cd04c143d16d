use super::extract::PlanExtractor;
use super::llm_client::LlmClient;
use super::prompt::render_prompt;
use crate::discovery::ServiceSnapshot;
use crate::error::ControlError;
use crate::types::{AnalyzedFile, ExecutionPlan};
use std::sync::Arc;
use tracing::{error, info, instrument, trace, warn};

/// Turns a query and the live catalog into an execution plan.
///
/// Only an unusable completion backend is an error. Whatever the model
/// answers, a plan comes back, possibly empty.
pub struct PlanCompiler {
    llm: Arc<dyn LlmClient>,
    extractor: PlanExtractor,
}

impl PlanCompiler {
    pub fn new(llm: Arc<dyn LlmClient>, extractor: PlanExtractor) -> Self {
        Self { llm, extractor }
    }

    #[instrument(skip_all, fields(services = snapshot.services.len(), files = files.len()))]
    pub async fn compile(
        &self,
        snapshot: &ServiceSnapshot,
        files: &[AnalyzedFile],
        query: &str,
    ) -> Result<ExecutionPlan, ControlError> {
        let prompt = render_prompt(snapshot, files, query);
        trace!(prompt = %prompt, "Planner prompt.");

        let completion = self.llm.complete(&prompt).await.map_err(|e| {
            error!(error = %e, "Completion backend unavailable.");
            ControlError::PlanCompilationUnavailable(format!("{:#}", e))
        })?;
        trace!(completion = %completion, "Raw planner response.");

        let plan = self.extractor.extract(&completion);
        for task in plan.tasks.iter().filter(|t| !snapshot.contains(&t.service_id)) {
            warn!(task_name = %task.task_name, service_id = %task.service_id, "Planned task names a service outside the snapshot.");
        }
        info!(task_count = plan.len(), "Execution plan compiled.");
        Ok(plan)
    }
}
