//! Classification of endpoint responses into task results.

use crate::types::{Artifact, Task, TaskResult};
use bytes::Bytes;
use mime::Mime;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use serde_json::Value;

/// A fully read endpoint response.
#[derive(Clone, Debug)]
pub struct ReceivedResponse {
    pub status_code: u16,
    pub content_type: Option<String>,
    /// File name offered through `Content-Disposition`, if any.
    pub filename: Option<String>,
    pub body: Bytes,
}

impl ReceivedResponse {
    pub async fn read(response: reqwest::Response) -> Result<Self, reqwest::Error> {
        let status_code = response.status().as_u16();
        let headers = response.headers();
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let filename = headers
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(disposition_filename);
        let body = response.bytes().await?;
        Ok(Self {
            status_code,
            content_type,
            filename,
            body,
        })
    }

    fn mime(&self) -> Option<Mime> {
        self.content_type.as_deref().and_then(|ct| ct.parse().ok())
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, PartialEq)]
enum BodyKind {
    Json,
    Text,
    Binary,
}

fn body_kind(mime: Option<&Mime>) -> BodyKind {
    let Some(mime) = mime else {
        return BodyKind::Text;
    };
    let subtype = mime.subtype();
    let suffix = mime.suffix();
    if subtype == mime::JSON || suffix == Some(mime::JSON) {
        return BodyKind::Json;
    }
    if mime.type_() == mime::TEXT
        || subtype == mime::XML
        || suffix == Some(mime::XML)
        || subtype == mime::JAVASCRIPT
        || subtype == mime::WWW_FORM_URLENCODED
    {
        return BodyKind::Text;
    }
    BodyKind::Binary
}

/// Maps a response to the task's result.
///
/// 2xx is `SUCCESS` with the body as JSON, text, `null` when empty, or an
/// artifact descriptor for binary payloads. Anything else is `ERROR` with
/// the body text.
pub fn classify(task: &Task, response: ReceivedResponse) -> (TaskResult, Option<Artifact>) {
    let status_code = response.status_code;
    if !(200..300).contains(&status_code) {
        return (TaskResult::error(task, status_code, response.text()), None);
    }
    if response.body.is_empty() {
        return (TaskResult::success(task, status_code, Value::Null), None);
    }

    let mime = response.mime();
    match body_kind(mime.as_ref()) {
        BodyKind::Json => {
            let value = serde_json::from_slice(&response.body)
                .unwrap_or_else(|_| Value::String(response.text()));
            (TaskResult::success(task, status_code, value), None)
        }
        BodyKind::Text => (
            TaskResult::success(task, status_code, Value::String(response.text())),
            None,
        ),
        BodyKind::Binary => {
            let content_type = mime
                .as_ref()
                .map(|m| m.essence_str().to_string())
                .unwrap_or_else(|| mime::APPLICATION_OCTET_STREAM.to_string());
            let filename = response
                .filename
                .clone()
                .unwrap_or_else(|| default_filename(&task.task_name, &content_type));
            let artifact = Artifact {
                task_name: task.task_name.clone(),
                filename,
                content_type,
                bytes: response.body,
            };
            let result = TaskResult::success(task, status_code, artifact.descriptor());
            (result, Some(artifact))
        }
    }
}

fn disposition_filename(header: &str) -> Option<String> {
    header
        .split(';')
        .map(str::trim)
        .find_map(|param| param.strip_prefix("filename="))
        .map(|name| name.trim().trim_matches('"'))
        .and_then(|name| std::path::Path::new(name).file_name()?.to_str())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

fn default_filename(task_name: &str, content_type: &str) -> String {
    let stem: String = task_name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    let stem = if stem.trim_matches('_').is_empty() {
        "artifact".to_string()
    } else {
        stem
    };
    let extension = mime_guess::get_mime_extensions_str(content_type)
        .and_then(|exts| exts.first())
        .copied()
        .unwrap_or("bin");
    format!("{}.{}", stem, extension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Operation, TaskInput, TaskStatus};
    use serde_json::json;

    fn task() -> Task {
        Task {
            task_name: "render report".into(),
            service_id: "svc".into(),
            endpoint: "http://svc/report".into(),
            input: TaskInput::default(),
            operation: Operation::Get,
        }
    }

    fn received(status_code: u16, content_type: Option<&str>, body: &'static [u8]) -> ReceivedResponse {
        ReceivedResponse {
            status_code,
            content_type: content_type.map(str::to_string),
            filename: None,
            body: Bytes::from_static(body),
        }
    }

    #[test]
    fn json_text_and_empty_bodies() {
        let (result, artifact) = classify(
            &task(),
            received(200, Some("application/json; charset=utf-8"), br#"{"temp": 21}"#),
        );
        assert_eq!(result.status, TaskStatus::Success);
        assert_eq!(result.result, json!({"temp": 21}));
        assert!(artifact.is_none());

        let (result, _) = classify(&task(), received(200, Some("text/plain"), b"sunny"));
        assert_eq!(result.result, json!("sunny"));

        let (result, _) = classify(&task(), received(204, None, b""));
        assert_eq!(result.status_code, 204);
        assert_eq!(result.result, Value::Null);

        // Declared JSON that does not parse is kept as text.
        let (result, _) = classify(&task(), received(200, Some("application/json"), b"oops"));
        assert_eq!(result.result, json!("oops"));
    }

    #[test]
    fn non_2xx_is_error_with_body() {
        let (result, artifact) = classify(&task(), received(404, Some("text/plain"), b"no such city"));
        assert_eq!(result.status, TaskStatus::Error);
        assert_eq!(result.status_code, 404);
        assert_eq!(result.result, json!("no such city"));
        assert!(artifact.is_none());
    }

    #[test]
    fn binary_body_becomes_artifact() {
        let (result, artifact) = classify(&task(), received(200, Some("application/pdf"), b"%PDF-1.4"));
        let artifact = artifact.unwrap();

        assert_eq!(artifact.filename, "render_report.pdf");
        assert_eq!(artifact.content_type, "application/pdf");
        assert_eq!(artifact.task_name, "render report");
        assert_eq!(result.result["artifact"]["size_bytes"], 8);
        assert_eq!(result.result["artifact"]["filename"], "render_report.pdf");
    }

    #[test]
    fn disposition_name_wins_and_is_flattened() {
        let mut response = received(200, Some("image/png"), b"\x89PNG");
        response.filename = disposition_filename(r#"attachment; filename="../chart.png""#);
        let (_, artifact) = classify(&task(), response);
        assert_eq!(artifact.unwrap().filename, "chart.png");

        assert_eq!(disposition_filename("inline"), None);
    }
}
