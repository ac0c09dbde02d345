use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    routing::{get, post},
    Router,
};
use quiz_generator::{
    config::Config,
    routes,
    services::{
        fallback_store::JsonQuestionBank,
        model_client::{ModelClient, ModelError},
        prompt_builder::GenerationRequest,
    },
    AppState,
};
use serde_json::{json, Value as JsonValue};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

struct ScriptedClient {
    available: bool,
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedClient {
    fn new(available: bool, responses: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            available,
            responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
        })
    }
}

#[async_trait]
impl ModelClient for ScriptedClient {
    async fn check_availability(&self) -> bool {
        self.available
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<String, ModelError> {
        Ok(self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }
}

const TWO_BLOCKS: &str = "Question: What is 5 + 5?\nA) 10\nB) 11\nC) 12\nD) 13\nAnswer: A\n\n\
Question: What is 3 x 3?\nA) 6\nB) 8\nC) 9\nD) 12\nAnswer: C";

const ONE_BLOCK: &str =
    "Question: Which organ pumps blood?\nA) Lung\nB) Heart\nC) Liver\nD) Kidney\nAnswer: B";

fn bank_dir() -> TempDir {
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join("elementary");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("math.json"),
        json!([
            {"question": "What is 1 + 1?", "options": ["1", "2", "3", "4"], "answer": "2"},
            {"question": "What is 2 + 2?", "options": ["2", "3", "4", "5"], "answer": "4"},
            {"question": "What is 9 - 3?", "options": ["5", "6", "7", "8"], "correct_answer": "B"}
        ])
        .to_string(),
    )
    .unwrap();
    root
}

fn test_config(bank: &Path) -> Config {
    let bank = bank.to_string_lossy().to_string();
    Config::from_lookup(move |name| match name {
        "MAX_ATTEMPTS" => Some("2".to_string()),
        "ATTEMPT_TIMEOUT_SECS" => Some("5".to_string()),
        "BUILD_TIMEOUT_SECS" => Some("30".to_string()),
        "MAX_QUESTIONS_PER_SECTION" => Some("10".to_string()),
        "QUESTION_BANK_DIR" => Some(bank.clone()),
        _ => None,
    })
    .expect("config")
}

/// The returned guard owns the bank directory; keep it alive for the test.
fn app(client: Arc<ScriptedClient>) -> (TempDir, Router) {
    let bank = bank_dir();
    let config = test_config(bank.path());
    let state = AppState::from_parts(
        client,
        Arc::new(JsonQuestionBank::new(bank.path())),
        &config,
    );

    let app = Router::new()
        .route("/health", get(routes::health::health))
        .route("/api/quiz/availability", get(routes::quiz::availability))
        .route("/api/quiz/generate", post(routes::quiz::generate_questions))
        .route("/api/quiz/build", post(routes::quiz::build_quiz))
        .route("/api/quiz/jobs", post(routes::quiz::enqueue_quiz_job))
        .route("/api/quiz/jobs/:id", get(routes::quiz::get_quiz_job))
        .with_state(state);
    (bank, app)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<JsonValue>) -> (StatusCode, JsonValue) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    let json = if bytes.is_empty() {
        JsonValue::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn health_and_availability() {
    let (_bank, app) = app(ScriptedClient::new(false, &[]));

    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = send(&app, "GET", "/api/quiz/availability", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["available"], false);
    assert_eq!(body["backend"], "ollama");
}

#[tokio::test]
async fn generate_returns_model_questions_with_report() {
    let (_bank, app) = app(ScriptedClient::new(true, &[TWO_BLOCKS]));
    let (status, body) = send(
        &app,
        "POST",
        "/api/quiz/generate",
        Some(json!({"subject": "Mathematics", "level": "Elementary", "count": 2})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let questions = body["questions"].as_array().unwrap();
    assert_eq!(questions.len(), 2);
    assert_eq!(questions[0]["id"], "MATH-001");
    assert_eq!(questions[0]["correct_answer"], "10");
    assert_eq!(questions[1]["correct_answer"], "9");
    assert_eq!(questions[1]["category"], "Mathematics");
    assert_eq!(questions[1]["source"], "model");
    assert_eq!(body["report"]["from_model"], 2);
    assert_eq!(body["report"]["from_fallback"], 0);
    assert!(!body["logs"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn generate_tops_up_from_bank() {
    // two attempts, one question each time it answers
    let (_bank, app) = app(ScriptedClient::new(true, &[ONE_BLOCK, "no questions here"]));
    let (status, body) = send(
        &app,
        "POST",
        "/api/quiz/generate",
        Some(json!({"subject": "Mathematics", "level": "Elementary", "count": 3})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["questions"].as_array().unwrap().len(), 3);
    assert_eq!(body["report"]["from_model"], 1);
    assert_eq!(body["report"]["from_fallback"], 2);
    assert_eq!(body["report"]["model_attempts"], 2);
    assert_eq!(body["questions"][2]["source"], "bank");
}

#[tokio::test]
async fn unavailable_backend_serves_bank_or_fails_when_required() {
    let (_bank, app) = app(ScriptedClient::new(false, &[]));

    let (status, body) = send(
        &app,
        "POST",
        "/api/quiz/generate",
        Some(json!({"subject": "Mathematics", "level": "Elementary", "count": 5})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["questions"].as_array().unwrap().len(), 3);
    assert_eq!(body["report"]["model_attempts"], 0);
    assert_eq!(body["report"]["shortfall"], 2);

    let (status, body) = send(
        &app,
        "POST",
        "/api/quiz/generate",
        Some(json!({"subject": "Mathematics", "level": "Elementary", "count": 1, "require_model": true})),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("unavailable"));
}

#[tokio::test]
async fn invalid_payloads_are_rejected() {
    let (_bank, app) = app(ScriptedClient::new(true, &[]));

    let (status, body) = send(
        &app,
        "POST",
        "/api/quiz/generate",
        Some(json!({"subject": "Physics", "level": "Elementary", "count": 0})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, _) = send(
        &app,
        "POST",
        "/api/quiz/generate",
        Some(json!({"subject": "Physics", "level": "Elementary", "count": 11})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "POST", "/api/quiz/build", Some(json!({"sections": []}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn build_concatenates_sections_in_order() {
    let (_bank, app) = app(ScriptedClient::new(true, &[TWO_BLOCKS, ONE_BLOCK]));
    let (status, body) = send(
        &app,
        "POST",
        "/api/quiz/build",
        Some(json!({
            "sections": [
                {"subject": "Mathematics", "level": "Elementary", "count": 2},
                {"subject": "Biology", "level": "Elementary", "count": 1}
            ]
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let questions = body["questions"].as_array().unwrap();
    assert_eq!(questions.len(), 3);
    assert_eq!(questions[0]["category"], "Mathematics");
    assert_eq!(questions[2]["category"], "Biology");
    assert_eq!(questions[2]["id"], "BIOL-003");
    assert_eq!(body["report"]["requested"], 3);
    assert_eq!(body["report"]["from_model"], 3);
}

#[tokio::test]
async fn jobs_run_in_background_and_can_be_polled() {
    let (_bank, app) = app(ScriptedClient::new(true, &[TWO_BLOCKS]));

    let (status, body) = send(
        &app,
        "POST",
        "/api/quiz/jobs",
        Some(json!({"sections": [{"subject": "Mathematics", "level": "Elementary", "count": 2}]})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let mut view = JsonValue::Null;
    for _ in 0..200 {
        let (status, body) = send(&app, "GET", &format!("/api/quiz/jobs/{}", job_id), None).await;
        assert_eq!(status, StatusCode::OK);
        if body["status"] == "succeeded" || body["status"] == "failed" {
            view = body;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(view["status"], "succeeded");
    assert_eq!(view["result"]["questions"].as_array().unwrap().len(), 2);
    assert_eq!(view["progress"]["phase"], "done");

    let (status, body) = send(
        &app,
        "GET",
        &format!("/api/quiz/jobs/{}", Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}
