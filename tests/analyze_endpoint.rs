use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use mockito::Matcher;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;
use trust_layer::api::AnalyzeService;
use trust_layer::config::{Config, JiraConfig};
use trust_layer::server::{create_app, AppState};

const GEMINI_PATH: &str = "/v1beta/models/gemini-1.5-flash:generateContent";
const GEMINI_OK_BODY: &str =
    r#"{"candidates":[{"content":{"parts":[{"text":"Here is the analysis."}],"role":"model"}}]}"#;

fn base_config(output: &TempDir, gemini: &mockito::ServerGuard) -> Config {
    Config {
        shared_secret: "secret".into(),
        gemini_api_key: Some("test-key".into()),
        gemini_model: "gemini-1.5-flash".into(),
        gemini_base_url: gemini.url(),
        github_token: None,
        github_base_url: "http://127.0.0.1:1".into(),
        jira: None,
        output_dir: output.path().to_path_buf(),
        public_base_url: None,
        port: 0,
        require_issue_key: false,
        attach_in_background: false,
        jira_add_comment: false,
    }
}

fn app_for(config: Config) -> Router {
    let service = AnalyzeService::new(config).unwrap();
    create_app(AppState {
        service: Arc::new(service),
    })
}

async fn post_analyze(app: Router, api_key: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/analyze")
                .header("x-api-key", api_key)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_analyze_without_issue_key_skips_upload() {
    let output = TempDir::new().unwrap();
    let mut gemini = mockito::Server::new_async().await;
    let mut jira = mockito::Server::new_async().await;

    // The prompt must reach the provider unchanged when no githubUrl is given
    let gemini_mock = gemini
        .mock("POST", GEMINI_PATH)
        .match_query(Matcher::UrlEncoded("key".into(), "test-key".into()))
        .match_body(Matcher::PartialJson(json!({
            "contents": [{ "parts": [{ "text": "hello" }] }]
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(GEMINI_OK_BODY)
        .expect(1)
        .create_async()
        .await;
    let jira_mock = jira
        .mock("POST", Matcher::Regex(r"^/rest/api/3/issue/.*".into()))
        .expect(0)
        .create_async()
        .await;

    let config = Config {
        jira: Some(JiraConfig {
            base_url: jira.url(),
            email: "bot@example.com".into(),
            api_token: "jira-token".into(),
        }),
        ..base_config(&output, &gemini)
    };

    let (status, body) = post_analyze(app_for(config), "secret", json!({ "prompt": "hello" })).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "Here is the analysis.");
    assert!(body["pdfUrl"].as_str().unwrap().ends_with(".pdf"));
    assert!(body.get("jira").is_none());
    gemini_mock.assert_async().await;
    jira_mock.assert_async().await;
}

#[tokio::test]
async fn test_wrong_api_key_is_unauthorized_without_provider_call() {
    let output = TempDir::new().unwrap();
    let mut gemini = mockito::Server::new_async().await;
    let gemini_mock = gemini
        .mock("POST", GEMINI_PATH)
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let (status, body) = post_analyze(
        app_for(base_config(&output, &gemini)),
        "wrong",
        json!({ "prompt": "hello" }),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, json!({ "error": "Unauthorized" }));
    gemini_mock.assert_async().await;
}

#[tokio::test]
async fn test_missing_provider_credential_is_misconfiguration() {
    let output = TempDir::new().unwrap();
    let gemini = mockito::Server::new_async().await;

    let config = Config {
        gemini_api_key: None,
        ..base_config(&output, &gemini)
    };
    let (status, body) = post_analyze(app_for(config), "secret", json!({ "prompt": "hello" })).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "Server misconfiguration" }));
}

#[tokio::test]
async fn test_empty_provider_text_substitutes_notice() {
    let output = TempDir::new().unwrap();
    let mut gemini = mockito::Server::new_async().await;

    // Well-formed response whose parts join to whitespace only
    let _mock = gemini
        .mock("POST", GEMINI_PATH)
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"candidates":[{"content":{"parts":[{"text":"  "},{"text":"\n"}],"role":"model"}}]}"#)
        .create_async()
        .await;

    let (status, body) = post_analyze(
        app_for(base_config(&output, &gemini)),
        "secret",
        json!({ "prompt": "hello" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], trust_layer::api::EMPTY_RESULT_NOTICE);
    assert!(body["pdfUrl"].as_str().unwrap().ends_with(".pdf"));
}

#[tokio::test]
async fn test_provider_failure_maps_to_ai_request_failed() {
    let output = TempDir::new().unwrap();
    let mut gemini = mockito::Server::new_async().await;
    let _mock = gemini
        .mock("POST", GEMINI_PATH)
        .match_query(Matcher::Any)
        .with_status(503)
        .with_body("overloaded")
        .create_async()
        .await;

    let (status, body) = post_analyze(
        app_for(base_config(&output, &gemini)),
        "secret",
        json!({ "prompt": "hello" }),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "AI request failed" }));
}

#[tokio::test]
async fn test_synchronous_attach_returns_jira_url() {
    let output = TempDir::new().unwrap();
    let mut gemini = mockito::Server::new_async().await;
    let mut jira = mockito::Server::new_async().await;

    let _gemini_mock = gemini
        .mock("POST", GEMINI_PATH)
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(GEMINI_OK_BODY)
        .create_async()
        .await;
    let jira_mock = jira
        .mock("POST", "/rest/api/3/issue/PROJ-7/attachments")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"[{"filename":"AI_Analysis_PROJ-7.pdf","content":"https://jira.example/att/7","size":321}]"#,
        )
        .expect(1)
        .create_async()
        .await;

    let config = Config {
        jira: Some(JiraConfig {
            base_url: jira.url(),
            email: "bot@example.com".into(),
            api_token: "jira-token".into(),
        }),
        attach_in_background: false,
        ..base_config(&output, &gemini)
    };

    let (status, body) = post_analyze(
        app_for(config),
        "secret",
        json!({ "prompt": "hello", "issueKey": "PROJ-7" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["jira"], "https://jira.example/att/7");
    assert!(body["pdfUrl"]
        .as_str()
        .unwrap()
        .ends_with("AI_Analysis_PROJ-7.pdf"));
    jira_mock.assert_async().await;
}

#[tokio::test]
async fn test_synchronous_attach_failure_maps_to_upload_failed() {
    let output = TempDir::new().unwrap();
    let mut gemini = mockito::Server::new_async().await;
    let mut jira = mockito::Server::new_async().await;

    let _gemini_mock = gemini
        .mock("POST", GEMINI_PATH)
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(GEMINI_OK_BODY)
        .create_async()
        .await;
    // 401 is terminal, so exactly one attempt and no backoff waits
    let jira_mock = jira
        .mock("POST", "/rest/api/3/issue/PROJ-11/attachments")
        .with_status(401)
        .with_body(r#"{"errorMessages":["Unauthorized"]}"#)
        .expect(1)
        .create_async()
        .await;

    let config = Config {
        jira: Some(JiraConfig {
            base_url: jira.url(),
            email: "bot@example.com".into(),
            api_token: "jira-token".into(),
        }),
        attach_in_background: false,
        ..base_config(&output, &gemini)
    };

    let (status, body) = post_analyze(
        app_for(config),
        "secret",
        json!({ "prompt": "hello", "issueKey": "PROJ-11" }),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "Attachment upload failed" }));
    jira_mock.assert_async().await;
}

#[tokio::test]
async fn test_background_attach_reports_processing_and_is_pollable() {
    let output = TempDir::new().unwrap();
    let mut gemini = mockito::Server::new_async().await;
    let mut jira = mockito::Server::new_async().await;

    let _gemini_mock = gemini
        .mock("POST", GEMINI_PATH)
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(GEMINI_OK_BODY)
        .create_async()
        .await;
    let _jira_mock = jira
        .mock("POST", "/rest/api/3/issue/PROJ-8/attachments")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"[{"filename":"AI_Analysis_PROJ-8.pdf","content":"https://jira.example/att/8","size":99}]"#,
        )
        .create_async()
        .await;

    let config = Config {
        jira: Some(JiraConfig {
            base_url: jira.url(),
            email: "bot@example.com".into(),
            api_token: "jira-token".into(),
        }),
        attach_in_background: true,
        ..base_config(&output, &gemini)
    };
    let app = app_for(config);

    let (status, body) = post_analyze(
        app.clone(),
        "secret",
        json!({ "prompt": "hello", "issueKey": "PROJ-8" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["jira"], "processing");

    // The tracker records the outcome shortly after the response went out
    let mut last_state = Value::Null;
    for _ in 0..100 {
        let (status, body) = get_json(app.clone(), "/attachments/PROJ-8").await;
        assert_eq!(status, StatusCode::OK);
        last_state = body["state"].clone();
        if last_state == "completed" {
            assert_eq!(body["attachment"]["url"], "https://jira.example/att/8");
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("background attachment never completed, last state: {last_state}");
}

#[tokio::test]
async fn test_github_context_is_appended_to_prompt() {
    let output = TempDir::new().unwrap();
    let mut gemini = mockito::Server::new_async().await;
    let mut github = mockito::Server::new_async().await;

    let _readme = github
        .mock("GET", "/repos/octocat/hello/contents/README.md")
        .with_status(200)
        .with_body("# Hello repo")
        .create_async()
        .await;
    let _tree = github
        .mock("GET", "/repos/octocat/hello/git/trees/main?recursive=1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"tree":[{"path":"src/main.rs","type":"blob"}]}"#)
        .create_async()
        .await;
    let gemini_mock = gemini
        .mock("POST", GEMINI_PATH)
        .match_query(Matcher::Any)
        .match_body(Matcher::Regex("Repository context".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(GEMINI_OK_BODY)
        .expect(1)
        .create_async()
        .await;

    let config = Config {
        github_base_url: github.url(),
        ..base_config(&output, &gemini)
    };
    let (status, _body) = post_analyze(
        app_for(config),
        "secret",
        json!({ "prompt": "review this", "githubUrl": "https://github.com/octocat/hello" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    gemini_mock.assert_async().await;
}

#[tokio::test]
async fn test_unreachable_github_degrades_to_plain_prompt() {
    let output = TempDir::new().unwrap();
    let mut gemini = mockito::Server::new_async().await;

    let gemini_mock = gemini
        .mock("POST", GEMINI_PATH)
        .match_query(Matcher::Any)
        .match_body(Matcher::PartialJson(json!({
            "contents": [{ "parts": [{ "text": "review this" }] }]
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(GEMINI_OK_BODY)
        .expect(1)
        .create_async()
        .await;

    // github_base_url in base_config points at a closed port
    let (status, body) = post_analyze(
        app_for(base_config(&output, &gemini)),
        "secret",
        json!({ "prompt": "review this", "githubUrl": "https://github.com/octocat/hello" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "Here is the analysis.");
    gemini_mock.assert_async().await;
}

#[tokio::test]
async fn test_unknown_attachment_status_is_not_found() {
    let output = TempDir::new().unwrap();
    let gemini = mockito::Server::new_async().await;

    let (status, body) = get_json(app_for(base_config(&output, &gemini)), "/attachments/NOPE-1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "error": "Unknown issue key" }));
}

#[tokio::test]
async fn test_health_endpoint() {
    let output = TempDir::new().unwrap();
    let gemini = mockito::Server::new_async().await;

    let (status, body) = get_json(app_for(base_config(&output, &gemini)), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "trust-layer");
    assert_eq!(body["status"], "healthy");
}
