//! Request orchestration: resolver, compiler, dispatcher, aggregator.

use crate::aggregate::{ControlOutcome, ResultAggregator};
use crate::config::ControlConfig;
use crate::discovery::{ConsulRegistry, HttpCatalog, ServiceSnapshotResolver};
use crate::dispatch::TaskDispatcher;
use crate::error::ControlError;
use crate::planner::{OllamaLlmClient, PlanCompiler, PlanExtractor};
use crate::scratch::ScratchDir;
use crate::types::UploadedFile;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, instrument};

/// Owns the pipeline stages; one instance serves every request.
pub struct Controller {
    resolver: ServiceSnapshotResolver,
    compiler: PlanCompiler,
    dispatcher: TaskDispatcher,
    scratch_root: PathBuf,
    request_timeout: Duration,
}

impl Controller {
    pub fn new(
        resolver: ServiceSnapshotResolver,
        compiler: PlanCompiler,
        dispatcher: TaskDispatcher,
        scratch_root: impl Into<PathBuf>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            compiler,
            dispatcher,
            scratch_root: scratch_root.into(),
            request_timeout,
        }
    }

    /// Wires the HTTP-backed collaborators described by `config`.
    pub fn from_config(config: &ControlConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;

        let resolver = ServiceSnapshotResolver::new(
            Arc::new(ConsulRegistry::new(&config.discovery.registry_url, client.clone())),
            Arc::new(HttpCatalog::new(&config.discovery.catalog_url, client.clone())),
            config.discovery.self_registration_key.clone(),
        )
        .with_endpoint_rewrite(config.discovery.endpoint_rewrite.clone());

        let compiler = PlanCompiler::new(
            Arc::new(OllamaLlmClient::new(&config.llm, client.clone())),
            PlanExtractor::new(&config.llm.reasoning_delimiter),
        );

        let dispatcher = TaskDispatcher::new(
            client,
            config.dispatch.strategy(),
            config.dispatch.task_timeout(),
        );

        Ok(Self::new(
            resolver,
            compiler,
            dispatcher,
            config.scratch.root.clone(),
            config.request_timeout(),
        ))
    }

    /// Runs the whole pipeline for one request.
    ///
    /// Always returns an envelope. The request scratch directory is gone by
    /// the time this returns, including when the request timed out.
    #[instrument(skip_all, fields(request_id = %uuid::Uuid::new_v4(), uploads = uploads.len()))]
    pub async fn control(&self, query: &str, uploads: Vec<UploadedFile>) -> ControlOutcome {
        info!(query = %query, "Control request received.");
        let scratch = match ScratchDir::create(&self.scratch_root).await {
            Ok(scratch) => scratch,
            Err(e) => return ResultAggregator::short_circuit(&ControlError::Scratch(e), None),
        };

        // On timeout the pipeline future is dropped, and the scratch
        // directory with it.
        match timeout(self.request_timeout, self.run(query, &uploads, scratch)).await {
            Ok(outcome) => outcome,
            Err(_) => ResultAggregator::short_circuit(
                &ControlError::RequestTimeout(self.request_timeout.as_secs()),
                None,
            ),
        }
    }

    async fn run(&self, query: &str, uploads: &[UploadedFile], scratch: ScratchDir) -> ControlOutcome {
        let files = match scratch.store_all(uploads).await {
            Ok(files) => files,
            Err(e) => return ResultAggregator::short_circuit(&ControlError::Scratch(e), Some(scratch)),
        };

        let snapshot = match self.resolver.resolve(query).await {
            Ok(snapshot) => snapshot,
            Err(e) => return ResultAggregator::short_circuit(&e, Some(scratch)),
        };

        let plan = match self.compiler.compile(&snapshot, &files, query).await {
            Ok(plan) => plan,
            Err(e) => return ResultAggregator::short_circuit(&e, Some(scratch)),
        };

        let dispatched = self.dispatcher.dispatch(&plan, &scratch).await;
        ResultAggregator::complete(plan, dispatched, scratch)
    }
}
