//! Planner prompt rendering.

use crate::discovery::ServiceSnapshot;
use crate::types::AnalyzedFile;
use serde::Serialize;
use serde_json::{json, Value};

fn example_plan() -> Value {
    json!({
        "tasks": [
            {
                "task_name": "analyze text",
                "service_id": "svc-001",
                "endpoint": "service endpoint",
                "input": "[TEXT]text to analyze[/TEXT]",
                "operation": "POST"
            },
            {
                "task_name": "extract text from the uploaded document",
                "service_id": "svc-002",
                "endpoint": "service endpoint",
                "input": "[FILE]uploaded filename[/FILE]",
                "operation": "POST"
            },
            {
                "task_name": "retrieve report",
                "service_id": "svc-003",
                "endpoint": "service endpoint",
                "input": "",
                "operation": "GET"
            }
        ]
    })
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "[]".to_string())
}

/// Renders the planning prompt. Identical inputs give identical prompts.
pub fn render_prompt(snapshot: &ServiceSnapshot, files: &[AnalyzedFile], query: &str) -> String {
    format!(
        r#"<|system|>
You have access to a list of services registered in a distributed system, each described by:
- services
- capabilities
- endpoints
- optional user-provided files

You will receive a query in natural language and must:
1. Decompose it into atomic tasks.
2. Associate each task with one compatible service based on its capabilities, endpoints and the file types.
3. Return an execution plan.

REPLY ONLY with a valid JSON object, WITHOUT any introductory text or comments.

TEMPLATE (fill the fields with the data provided below, never copy the placeholder values):
{example}

RULES:
- Use only the data provided. Do not invent services or endpoints.
- Endpoint URLs and HTTP operations must match the ENDPOINTS section exactly.
- Endpoints may contain path parameter placeholders in curly brackets, e.g. {{city}}.
- You MUST replace these placeholders with actual values extracted from the query.
- NEVER return an endpoint containing unresolved placeholders.
- Decide, given the endpoint, whether a value is a path parameter or a query parameter.
- "operation" is one of GET, POST, PUT, DELETE.
- To send an uploaded file to a service, set "input" to [FILE]<filename>[/FILE] using a filename from FILES.
- Otherwise set "input" to the text to send, optionally wrapped as [TEXT]...[/TEXT]; use "" when nothing is sent.
- If files are images, prefer OCR / image-processing services.
- If files are PDFs or documents, prefer text-extraction or analysis services.
- If files are tabular (CSV, Excel), prefer data-processing services.
- If no service can handle the file type, do NOT invent one.
<|end|>
<|user|>
SERVICES:
{services}

CAPABILITIES:
{capabilities}

ENDPOINTS:
{endpoints}

FILES:
{files}

QUERY:
{query}
<|end|>
<|assistant|>
"#,
        example = to_json(&example_plan()),
        services = to_json(&snapshot.preambles()),
        capabilities = to_json(&snapshot.capabilities()),
        endpoints = to_json(&snapshot.endpoints()),
        files = to_json(&files),
        query = query.trim(),
    )
}
