use crate::config::ControlConfig;
use crate::controller::Controller;
use crate::discovery::{ConsulRegistry, HttpCatalog, ServiceSnapshotResolver};
use crate::dispatch::{DispatchStrategy, TaskDispatcher};
use crate::planner::{PlanCompiler, PlanExtractor};
use crate::tests::mocks::{descriptor, live, spawn_delayed_server, MockCatalog, MockLlmClient, MockRegistry};
use crate::types::{TaskStatus, UploadedFile};
use bytes::Bytes;
use mockito::{Matcher, Server};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn controller(
    registry: MockRegistry,
    catalog: MockCatalog,
    llm: Arc<MockLlmClient>,
    scratch_root: &Path,
    request_timeout: Duration,
) -> Controller {
    Controller::new(
        ServiceSnapshotResolver::new(Arc::new(registry), Arc::new(catalog), "POST /register"),
        PlanCompiler::new(llm, PlanExtractor::new("</think>")),
        TaskDispatcher::new(
            reqwest::Client::new(),
            DispatchStrategy::Parallel { max_in_flight: 4 },
            Duration::from_secs(5),
        ),
        scratch_root,
        request_timeout,
    )
}

fn scratch_is_empty(root: &Path) -> bool {
    std::fs::read_dir(root).unwrap().next().is_none()
}

fn upload(name: &str, body: &'static [u8]) -> UploadedFile {
    UploadedFile {
        filename: name.to_string(),
        bytes: Bytes::from_static(body),
    }
}

#[tokio::test]
async fn weather_for_rome_end_to_end() {
    let mut registry = Server::new_async().await;
    let mut catalog = Server::new_async().await;
    let mut ollama = Server::new_async().await;
    let mut weather = Server::new_async().await;

    let _registry = registry
        .mock("GET", "/v1/agent/services")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "weather-1": {"ID": "weather-1", "Service": "weather", "Meta": {"service_doc_id": "doc-weather"}},
                "billing-1": {"ID": "billing-1", "Service": "billing", "Meta": {}}
            })
            .to_string(),
        )
        .create_async()
        .await;
    let _catalog = catalog
        .mock("POST", "/index/search")
        .match_body(Matcher::Json(json!({"query": "What is the weather in Rome?"})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({"results": [
                {
                    "_id": "doc-weather",
                    "name": "Weather",
                    "description": "Current weather by city",
                    "capabilities": {
                        "GET /weather/{city}": "Current weather for a city",
                        "POST /register": "Self registration"
                    },
                    "endpoints": {
                        "GET /weather/{city}": format!("{}/weather/{{city}}", weather.url()),
                        "POST /register": format!("{}/register", weather.url())
                    }
                },
                {"_id": "doc-orphan", "name": "Offline", "description": "", "capabilities": {}, "endpoints": {}}
            ]})
            .to_string(),
        )
        .create_async()
        .await;

    let plan = json!({"tasks": [{
        "task_name": "get weather in Rome",
        "service_id": "doc-weather",
        "endpoint": format!("{}/weather/Rome", weather.url()),
        "input": "",
        "operation": "GET"
    }]});
    let completion = format!("<think>Rome is the city.</think>\n{}", plan);
    let llm = ollama
        .mock("POST", "/api/generate")
        .match_body(Matcher::AllOf(vec![
            Matcher::PartialJson(json!({"stream": false, "options": {"temperature": 0.0}})),
            // Only live services reach the prompt, minus self-registration.
            Matcher::Regex("GET /weather/\\{city\\}".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"response": completion}).to_string())
        .expect(1)
        .create_async()
        .await;
    let weather_call = weather
        .mock("GET", "/weather/Rome")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"city": "Rome", "temperature": 21}"#)
        .create_async()
        .await;

    let scratch_root = tempdir().unwrap();
    let mut config = ControlConfig::default();
    config.discovery.registry_url = registry.url();
    config.discovery.catalog_url = catalog.url();
    config.llm.base_url = ollama.url();
    config.scratch.root = scratch_root.path().to_path_buf();
    let controller = Controller::from_config(&config).unwrap();

    let outcome = controller.control("What is the weather in Rome?", Vec::new()).await;

    llm.assert_async().await;
    weather_call.assert_async().await;
    let envelope = outcome.envelope;
    assert!(envelope.error.is_none());
    assert_eq!(envelope.execution_plan.len(), 1);
    assert_eq!(envelope.execution_results.len(), 1);
    let result = &envelope.execution_results[0];
    assert_eq!(result.status, TaskStatus::Success);
    assert_eq!(result.status_code, 200);
    assert_eq!(result.result, json!({"city": "Rome", "temperature": 21}));
    assert!(scratch_is_empty(scratch_root.path()));
}

#[tokio::test]
async fn orphaned_catalog_entry_never_reaches_the_prompt() {
    let mut registry = Server::new_async().await;
    let mut catalog = Server::new_async().await;

    let _registry = registry
        .mock("GET", "/v1/agent/services")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "weather-1": {"ID": "weather-1", "Service": "weather", "Meta": {"service_doc_id": "doc-weather"}}
            })
            .to_string(),
        )
        .create_async()
        .await;
    let _catalog = catalog
        .mock("POST", "/index/search")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({"results": [
                {
                    "_id": "doc-orphan",
                    "name": "Offline Forecasts",
                    "description": "Seven day forecasts",
                    "capabilities": {"GET /forecast/{city}": "Forecast for a city"},
                    "endpoints": {"GET /forecast/{city}": "http://offline:9000/forecast/{city}"}
                },
                {
                    "_id": "doc-weather",
                    "name": "Weather",
                    "description": "Current weather by city",
                    "capabilities": {
                        "GET /weather/{city}": "Current weather for a city",
                        "POST /register": "Self registration"
                    },
                    "endpoints": {
                        "GET /weather/{city}": "http://weather:8000/weather/{city}",
                        "POST /register": "http://weather:8000/register"
                    }
                }
            ]})
            .to_string(),
        )
        .create_async()
        .await;

    let root = tempdir().unwrap();
    let llm = Arc::new(MockLlmClient::new());
    let client = reqwest::Client::new();
    let controller = Controller::new(
        ServiceSnapshotResolver::new(
            Arc::new(ConsulRegistry::new(&registry.url(), client.clone())),
            Arc::new(HttpCatalog::new(&catalog.url(), client.clone())),
            "POST /register",
        ),
        PlanCompiler::new(llm.clone(), PlanExtractor::new("</think>")),
        TaskDispatcher::new(client, DispatchStrategy::Sequential, Duration::from_secs(5)),
        root.path(),
        Duration::from_secs(10),
    );

    let outcome = controller.control("What is the weather in Rome?", Vec::new()).await;

    assert!(outcome.envelope.error.is_none());
    let calls = llm.calls();
    assert_eq!(calls.len(), 1);
    let prompt = &calls[0];
    assert!(prompt.contains("doc-weather"));
    assert!(prompt.contains("GET /weather/{city}"));
    for absent in ["doc-orphan", "Offline Forecasts", "/forecast/", "offline:9000", "POST /register"] {
        assert!(!prompt.contains(absent), "prompt mentions {}", absent);
    }
}

#[tokio::test]
async fn no_catalog_match_short_circuits_before_planning() {
    let root = tempdir().unwrap();
    let llm = Arc::new(MockLlmClient::new());
    let controller = controller(
        MockRegistry::with(vec![live("a", None)]),
        MockCatalog::with(vec![]),
        llm.clone(),
        root.path(),
        Duration::from_secs(10),
    );

    let outcome = controller
        .control("translate this", vec![upload("doc.pdf", b"%PDF")])
        .await;

    assert!(llm.calls().is_empty());
    assert_eq!(
        serde_json::to_value(&outcome.envelope).unwrap(),
        json!({
            "execution_plan": {},
            "execution_results": [],
            "error": "No services matched the query"
        })
    );
    assert!(scratch_is_empty(root.path()));
}

#[tokio::test]
async fn nothing_live_short_circuits_before_planning() {
    let root = tempdir().unwrap();
    let llm = Arc::new(MockLlmClient::new());
    let controller = controller(
        MockRegistry::with(vec![live("unrelated", None)]),
        MockCatalog::with(vec![descriptor("svc-1")]),
        llm.clone(),
        root.path(),
        Duration::from_secs(10),
    );

    let outcome = controller.control("anything", Vec::new()).await;

    assert!(llm.calls().is_empty());
    assert_eq!(
        outcome.envelope.error.as_deref(),
        Some("None of the discovered services are currently available in the registry")
    );
    assert!(outcome.envelope.execution_plan.is_empty());
    assert!(scratch_is_empty(root.path()));
}

#[tokio::test]
async fn discovery_and_backend_failures_are_reported_in_envelope() {
    let root = tempdir().unwrap();
    let catalog = Arc::new(MockCatalog::failing());
    let controller_a = Controller::new(
        ServiceSnapshotResolver::new(
            Arc::new(MockRegistry::with(vec![live("svc-1", None)])),
            catalog.clone(),
            "POST /register",
        ),
        PlanCompiler::new(Arc::new(MockLlmClient::new()), PlanExtractor::new("</think>")),
        TaskDispatcher::new(reqwest::Client::new(), DispatchStrategy::Sequential, Duration::from_secs(5)),
        root.path(),
        Duration::from_secs(10),
    );
    let outcome = controller_a.control("q", Vec::new()).await;
    assert_eq!(catalog.queries(), vec!["q".to_string()]);
    assert!(outcome
        .envelope
        .error
        .unwrap()
        .starts_with("Service discovery unavailable"));

    let controller_b = controller(
        MockRegistry::with(vec![live("svc-1", None)]),
        MockCatalog::with(vec![descriptor("svc-1")]),
        Arc::new(MockLlmClient::failing("connection refused")),
        root.path(),
        Duration::from_secs(10),
    );
    let outcome = controller_b.control("q", Vec::new()).await;
    let error = outcome.envelope.error.unwrap();
    assert!(error.starts_with("Plan compilation unavailable"));
    assert!(error.contains("connection refused"));
    assert!(scratch_is_empty(root.path()));
}

#[tokio::test]
async fn unusable_completion_yields_empty_completed_envelope() {
    let root = tempdir().unwrap();
    let controller = controller(
        MockRegistry::with(vec![live("svc-1", None)]),
        MockCatalog::with(vec![descriptor("svc-1")]),
        Arc::new(MockLlmClient::new().with_default_response("<think>hmm</think> I can't do that.")),
        root.path(),
        Duration::from_secs(10),
    );

    let outcome = controller.control("q", Vec::new()).await;

    assert!(outcome.envelope.error.is_none());
    assert!(outcome.envelope.execution_plan.is_empty());
    assert!(outcome.envelope.execution_results.is_empty());
}

#[tokio::test]
async fn uploaded_file_reaches_prompt_and_endpoint() {
    let mut ocr = Server::new_async().await;
    let ocr_call = ocr
        .mock("POST", "/ocr")
        .match_body(Matcher::Regex(r#"filename="scan.png""#.into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"text": "hello"}"#)
        .create_async()
        .await;

    let plan = json!({"tasks": [{
        "task_name": "ocr",
        "service_id": "svc-ocr",
        "endpoint": format!("{}/ocr", ocr.url()),
        "input": "[FILE]scan.png[/FILE]",
        "operation": "POST"
    }]})
    .to_string();
    let llm = Arc::new(MockLlmClient::new().with_response("\"filename\": \"scan.png\"", &plan));

    let root = tempdir().unwrap();
    let controller = controller(
        MockRegistry::with(vec![live("svc-ocr", None)]),
        MockCatalog::with(vec![descriptor("svc-ocr")]),
        llm.clone(),
        root.path(),
        Duration::from_secs(10),
    );

    let outcome = controller
        .control("read the text in this image", vec![upload("scan.png", b"\x89PNG")])
        .await;

    ocr_call.assert_async().await;
    assert!(llm.calls()[0].contains("\"category\": \"image\""));
    assert_eq!(outcome.envelope.execution_results[0].status, TaskStatus::Success);
    assert_eq!(outcome.envelope.execution_results[0].result, json!({"text": "hello"}));
    assert!(scratch_is_empty(root.path()));
}

#[tokio::test]
async fn request_timeout_still_removes_scratch() {
    let base = spawn_delayed_server().await;
    let plan = json!({"tasks": [{
        "task_name": "slow",
        "service_id": "svc-1",
        "endpoint": format!("{}/slow/3000", base),
        "input": "",
        "operation": "GET"
    }]})
    .to_string();

    let root = tempdir().unwrap();
    let registry = MockRegistry::with(vec![live("svc-1", None)]);
    let controller = controller(
        registry,
        MockCatalog::with(vec![descriptor("svc-1")]),
        Arc::new(MockLlmClient::new().with_default_response(&plan)),
        root.path(),
        Duration::from_secs(1),
    );

    let outcome = controller
        .control("slow things", vec![upload("a.txt", b"a")])
        .await;

    assert_eq!(outcome.envelope.error.as_deref(), Some("Request timed out after 1s"));
    assert!(outcome.envelope.execution_results.is_empty());
    assert!(scratch_is_empty(root.path()));
}
