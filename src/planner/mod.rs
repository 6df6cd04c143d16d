//! Plan compilation: prompt the completion backend with the live service
//! catalog and turn its answer into an execution plan.

pub mod compiler;
pub mod extract;
pub mod llm_client;
pub mod prompt;

pub use compiler::PlanCompiler;
pub use extract::{ExtractionFailure, PlanExtractor};
pub use llm_client::{LlmClient, OllamaLlmClient};
pub use prompt::render_prompt;
