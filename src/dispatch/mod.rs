//! Executes the tasks of a plan against their endpoints.
//!
//! Every task yields exactly one [`TaskResult`], in plan order. Failures stay
//! with the task that caused them: a missing file or an unsupported method
//! is reported without touching the network, and a timeout or refused
//! connection becomes an `EXCEPTION` result while the other tasks carry on.

mod response;

pub use response::{classify, ReceivedResponse};

use crate::error::TaskFailure;
use crate::scratch::ScratchDir;
use crate::types::{Artifact, ExecutionPlan, Task, TaskInput, TaskResult, TaskStatus};
use futures_util::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder};
use serde_json::json;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// `{name}` segments left over from an endpoint template. Other braces, such
/// as `?filter={}` or inline JSON, are literal.
static PLACEHOLDER: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"\{[A-Za-z_][A-Za-z0-9_]*\}").ok());

/// How many tasks of one plan may be in flight at once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchStrategy {
    /// One task at a time, in plan order.
    Sequential,
    Parallel { max_in_flight: usize },
}

impl DispatchStrategy {
    fn in_flight(&self) -> usize {
        match self {
            DispatchStrategy::Sequential => 1,
            DispatchStrategy::Parallel { max_in_flight } => (*max_in_flight).max(1),
        }
    }
}

/// Results in plan order, plus any files the services produced.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub results: Vec<TaskResult>,
    pub artifacts: Vec<Artifact>,
}

pub struct TaskDispatcher {
    client: reqwest::Client,
    strategy: DispatchStrategy,
    task_timeout: Duration,
}

impl TaskDispatcher {
    pub fn new(client: reqwest::Client, strategy: DispatchStrategy, task_timeout: Duration) -> Self {
        Self {
            client,
            strategy,
            task_timeout,
        }
    }

    #[instrument(skip_all, fields(task_count = plan.len(), strategy = ?self.strategy))]
    pub async fn dispatch(&self, plan: &ExecutionPlan, scratch: &ScratchDir) -> DispatchOutcome {
        // Futures are built up front: a mapping closure over borrowed tasks
        // makes the stream lose `Send`. `buffered` yields in submission
        // order whatever the completion order.
        let pending: Vec<_> = plan
            .tasks
            .iter()
            .map(|task| self.dispatch_task(task, scratch))
            .collect();
        let outcomes: Vec<(TaskResult, Option<Artifact>)> = stream::iter(pending)
            .buffered(self.strategy.in_flight())
            .collect()
            .await;

        let mut outcome = DispatchOutcome::default();
        for (result, artifact) in outcomes {
            outcome.results.push(result);
            outcome.artifacts.extend(artifact);
        }
        outcome
    }

    /// Runs one task. Never fails: every failure is folded into the result.
    pub async fn dispatch_task(&self, task: &Task, scratch: &ScratchDir) -> (TaskResult, Option<Artifact>) {
        let (result, artifact) = match self.try_dispatch(task, scratch).await {
            Ok(outcome) => outcome,
            Err(TaskFailure::Validation {
                status_code,
                message,
            }) => (TaskResult::error(task, status_code, message), None),
            Err(TaskFailure::Transport(description)) => (TaskResult::exception(task, description), None),
        };

        match result.status {
            TaskStatus::Success => {
                info!(task_name = %task.task_name, status_code = result.status_code, "Task completed.")
            }
            TaskStatus::Error => {
                warn!(task_name = %task.task_name, status_code = result.status_code, result = %result.result, "Task failed.")
            }
            TaskStatus::Exception => {
                warn!(task_name = %task.task_name, result = %result.result, "Task raised an exception.")
            }
        }
        (result, artifact)
    }

    async fn try_dispatch(
        &self,
        task: &Task,
        scratch: &ScratchDir,
    ) -> Result<(TaskResult, Option<Artifact>), TaskFailure> {
        let upload = match &task.input {
            TaskInput::File(name) => Some(load_upload(name, scratch).await?),
            _ => None,
        };
        let method = task.operation.method().ok_or_else(|| {
            TaskFailure::validation(405, format!("Unsupported operation '{}'", task.operation))
        })?;
        let url = validate_endpoint(&task.endpoint)?;

        let request = self.build_request(method, url, task, upload)?;
        debug!(task_name = %task.task_name, operation = %task.operation, endpoint = %task.endpoint, "Dispatching task.");

        let call = async {
            let response = request
                .send()
                .await
                .map_err(|e| TaskFailure::Transport(describe_transport_error(&e)))?;
            ReceivedResponse::read(response)
                .await
                .map_err(|e| TaskFailure::Transport(describe_transport_error(&e)))
        };
        let received = timeout(self.task_timeout, call).await.map_err(|_| {
            TaskFailure::Transport(format!(
                "HTTP request timed out after {}ms",
                self.task_timeout.as_millis()
            ))
        })??;

        Ok(classify(task, received))
    }

    fn build_request(
        &self,
        method: Method,
        url: Url,
        task: &Task,
        upload: Option<(String, Vec<u8>)>,
    ) -> Result<RequestBuilder, TaskFailure> {
        let mut request = self.client.request(method, url);

        if let Some((filename, bytes)) = upload {
            let mime_type = mime_guess::from_path(&filename).first_or_octet_stream();
            let part = Part::bytes(bytes)
                .file_name(filename)
                .mime_str(mime_type.essence_str())
                .map_err(|e| TaskFailure::validation(400, format!("Invalid upload part: {}", e)))?;
            return Ok(request.multipart(Form::new().part("file", part)));
        }

        if task.operation.carries_body() {
            request = match &task.input {
                TaskInput::Text(text) => request.json(&json!({ "input": text })),
                TaskInput::Json(value) => request.json(value),
                TaskInput::File(_) => request,
            };
        }
        Ok(request)
    }
}

/// Reads a file named by a task from the request scratch directory.
async fn load_upload(name: &str, scratch: &ScratchDir) -> Result<(String, Vec<u8>), TaskFailure> {
    let path = scratch
        .resolve(name)
        .await
        .ok_or_else(|| TaskFailure::validation(404, format!("File '{}' not found", name)))?;
    let bytes = tokio::fs::read(&path).await.map_err(|e| {
        TaskFailure::validation(500, format!("Failed to read file '{}': {}", name, e))
    })?;
    Ok((name.trim().to_string(), bytes))
}

fn validate_endpoint(endpoint: &str) -> Result<Url, TaskFailure> {
    if let Some(placeholder) = PLACEHOLDER.as_ref().and_then(|re| re.find(endpoint)) {
        return Err(TaskFailure::validation(
            400,
            format!(
                "Endpoint '{}' contains unresolved placeholder '{}'",
                endpoint,
                placeholder.as_str()
            ),
        ));
    }
    let url = Url::parse(endpoint.trim())
        .map_err(|e| TaskFailure::validation(400, format!("Invalid endpoint '{}': {}", endpoint, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(TaskFailure::validation(
            400,
            format!("Unsupported endpoint scheme '{}'", other),
        )),
    }
}

/// reqwest's own message hides the cause (refused, reset, ...), so the
/// source chain is appended.
fn describe_transport_error(error: &reqwest::Error) -> String {
    let mut description = if error.is_timeout() {
        format!("HTTP request timed out: {}", error)
    } else {
        format!("HTTP request failed: {}", error)
    };
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        description.push_str(": ");
        description.push_str(&cause.to_string());
        source = cause.source();
    }
    description
}
