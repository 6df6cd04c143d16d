//! Data model shared by the pipeline stages.
//!
//! Wire names follow the JSON the surrounding services already speak
//! (`task_name`, `execution_plan`, `_id`, ...), so the structs here are
//! serialized as-is into prompts, plans and response envelopes.

use bytes::Bytes;
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

// --- Services ---

/// A catalog entry describing one service and the operations it exposes.
///
/// Operation keys have the form `"METHOD PATH"`. Maps are ordered so that
/// prompts rendered from them are byte-for-byte reproducible.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(default, deserialize_with = "lenient_map")]
    pub capabilities: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "lenient_map")]
    pub endpoints: BTreeMap<String, String>,
}

/// Public part of a descriptor shown to the planner.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ServicePreamble {
    pub id: String,
    pub name: String,
    pub description: String,
}

impl ServiceDescriptor {
    pub fn preamble(&self) -> ServicePreamble {
        ServicePreamble {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
        }
    }

    /// Removes an operation from both the capability and endpoint maps.
    pub fn strip_operation(&mut self, operation_key: &str) {
        self.capabilities.remove(operation_key);
        self.endpoints.remove(operation_key);
    }
}

/// Catalog documents are not always tidy: `null` names and non-object
/// capability fields show up in practice. Those collapse to empty values.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn lenient_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Object(map) => map
            .into_iter()
            .map(|(key, value)| {
                let text = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                (key, text)
            })
            .collect(),
        _ => BTreeMap::new(),
    })
}

// --- Files ---

/// Coarse file class used to steer the planner towards suitable services.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Document,
    Image,
    Tabular,
    Unknown,
}

impl FileCategory {
    pub fn from_mime(mime: Option<&str>) -> Self {
        match mime {
            Some("application/pdf") => FileCategory::Document,
            Some(m) if m.starts_with("image/") => FileCategory::Image,
            Some("text/csv") | Some("application/vnd.ms-excel") => FileCategory::Tabular,
            _ => FileCategory::Unknown,
        }
    }
}

/// A file received with the request, as stored in the scratch directory.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AnalyzedFile {
    pub filename: String,
    pub content_type: Option<String>,
    pub size_bytes: u64,
    #[serde(skip)]
    pub storage_path: PathBuf,
    pub category: FileCategory,
}

/// Raw upload as received at ingress.
#[derive(Clone, Debug)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Bytes,
}

// --- Plan ---

/// HTTP operation of a task. Anything other than the four supported verbs is
/// kept verbatim so the plan still parses and the task fails on its own.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operation {
    Get,
    Post,
    Put,
    Delete,
    Unsupported(String),
}

impl Operation {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "GET" => Operation::Get,
            "POST" => Operation::Post,
            "PUT" => Operation::Put,
            "DELETE" => Operation::Delete,
            other => Operation::Unsupported(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Operation::Get => "GET",
            Operation::Post => "POST",
            Operation::Put => "PUT",
            Operation::Delete => "DELETE",
            Operation::Unsupported(raw) => raw,
        }
    }

    /// `None` for unsupported operations.
    pub fn method(&self) -> Option<reqwest::Method> {
        match self {
            Operation::Get => Some(reqwest::Method::GET),
            Operation::Post => Some(reqwest::Method::POST),
            Operation::Put => Some(reqwest::Method::PUT),
            Operation::Delete => Some(reqwest::Method::DELETE),
            Operation::Unsupported(_) => None,
        }
    }

    /// Whether a JSON body is attached for text and structured inputs.
    pub fn carries_body(&self) -> bool {
        matches!(self, Operation::Post | Operation::Put)
    }
}

impl From<String> for Operation {
    fn from(raw: String) -> Self {
        Operation::parse(&raw)
    }
}

impl From<Operation> for String {
    fn from(op: Operation) -> Self {
        op.as_str().to_string()
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const TEXT_TAG: &str = "TEXT";
const FILE_TAG: &str = "FILE";

/// Payload of a task.
///
/// The planner writes inputs as strings and may wrap them in
/// `[TEXT]...[/TEXT]` or `[FILE]...[/FILE]`. A tag only counts when it wraps
/// the whole string, so text that merely contains brackets stays text. A
/// `[FILE]` payload holds no further `[FILE]` tags; `[TEXT]` removes exactly
/// one layer, which lets any text be written back wrapped and read unchanged.
#[derive(Clone, Debug, PartialEq)]
pub enum TaskInput {
    Text(String),
    /// Name of a file in the request scratch directory.
    File(String),
    /// Structured body forwarded untouched.
    Json(Value),
}

impl Default for TaskInput {
    fn default() -> Self {
        TaskInput::Text(String::new())
    }
}

impl TaskInput {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Some(name) = unwrap_tag(trimmed, FILE_TAG) {
            let (open, close) = tag_pair(FILE_TAG);
            if !name.contains(open.as_str()) && !name.contains(close.as_str()) {
                return TaskInput::File(name.trim().to_string());
            }
        }
        if let Some(text) = unwrap_tag(trimmed, TEXT_TAG) {
            return TaskInput::Text(text.to_string());
        }
        TaskInput::Text(raw.to_string())
    }
}

fn tag_pair(kind: &str) -> (String, String) {
    (format!("[{}]", kind), format!("[/{}]", kind))
}

/// Strips one outer `[kind]...[/kind]` layer.
fn unwrap_tag<'a>(raw: &'a str, kind: &str) -> Option<&'a str> {
    let (open, close) = tag_pair(kind);
    raw.strip_prefix(open.as_str())?.strip_suffix(close.as_str())
}

impl Serialize for TaskInput {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TaskInput::Text(text) => {
                // Text that would read back as a tag gets an explicit wrapper.
                if TaskInput::parse(text) == *self {
                    serializer.serialize_str(text)
                } else {
                    serializer.serialize_str(&format!("[{0}]{1}[/{0}]", TEXT_TAG, text))
                }
            }
            TaskInput::File(name) => {
                serializer.serialize_str(&format!("[{0}]{1}[/{0}]", FILE_TAG, name))
            }
            TaskInput::Json(value) => value.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for TaskInput {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::String(raw) => TaskInput::parse(&raw),
            Value::Null => TaskInput::default(),
            other => TaskInput::Json(other),
        })
    }
}

/// One step of an execution plan, bound to a concrete endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(default)]
    pub task_name: String,
    #[serde(default)]
    pub service_id: String,
    pub endpoint: String,
    #[serde(default)]
    pub input: TaskInput,
    pub operation: Operation,
}

/// Ordered tasks produced by the planner. Serializes to `{}` when empty.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<Task>,
}

impl ExecutionPlan {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }
}

// --- Results ---

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Endpoint answered with a 2xx status.
    Success,
    /// Endpoint answered with another status, or the task failed validation.
    Error,
    /// The call never produced a response.
    Exception,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_name: String,
    pub operation: Operation,
    pub status: TaskStatus,
    pub status_code: u16,
    pub result: Value,
}

impl TaskResult {
    pub fn success(task: &Task, status_code: u16, result: Value) -> Self {
        Self::with_status(task, TaskStatus::Success, status_code, result)
    }

    pub fn error(task: &Task, status_code: u16, result: impl Into<Value>) -> Self {
        Self::with_status(task, TaskStatus::Error, status_code, result.into())
    }

    pub fn exception(task: &Task, description: impl Into<String>) -> Self {
        Self::with_status(
            task,
            TaskStatus::Exception,
            500,
            Value::String(description.into()),
        )
    }

    fn with_status(task: &Task, status: TaskStatus, status_code: u16, result: Value) -> Self {
        Self {
            task_name: task.task_name.clone(),
            operation: task.operation.clone(),
            status,
            status_code,
            result,
        }
    }
}

/// A file produced by a downstream service.
#[derive(Clone, Debug, PartialEq)]
pub struct Artifact {
    pub task_name: String,
    pub filename: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl Artifact {
    /// What the task result reports in place of the raw bytes.
    pub fn descriptor(&self) -> Value {
        json!({
            "artifact": {
                "filename": self.filename,
                "content_type": self.content_type,
                "size_bytes": self.bytes.len(),
            }
        })
    }
}

/// What every caller of the control pipeline receives.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub execution_plan: ExecutionPlan,
    pub execution_results: Vec<TaskResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResponseEnvelope {
    pub fn completed(execution_plan: ExecutionPlan, execution_results: Vec<TaskResult>) -> Self {
        Self {
            execution_plan,
            execution_results,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            execution_plan: ExecutionPlan::empty(),
            execution_results: Vec::new(),
            error: Some(message.into()),
        }
    }
}
