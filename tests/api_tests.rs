//! HTTP API tests against the full router.

mod common;

use axum_test::TestServer;
use common::mocks::MockLLMClient;
use common::{other_pdf, sample_pdf, test_state, upload_pdf};
use openrag::api::create_app;
use openrag::AppState;
use serde_json::{json, Value};

fn create_test_server(state: AppState) -> TestServer {
    TestServer::new(create_app(state)).expect("Failed to create test server")
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health_reports_vector_store() {
    let server = create_test_server(test_state(None));

    let response = server.get("/api/health").await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["vector_store"], "in-memory");
    assert_eq!(body["vector_store_reachable"], true);
}

#[tokio::test]
async fn test_routes_live_under_api_prefix() {
    let server = create_test_server(test_state(None));
    server.get("/health").await.assert_status_not_found();
}

// ============================================================================
// Ingest
// ============================================================================

#[tokio::test]
async fn test_ingest_endpoint() {
    let state = test_state(None);
    upload_pdf(&state, "vectors", sample_pdf()).await;
    let server = create_test_server(state);

    let response = server
        .post("/api/ingest")
        .json(&json!({ "file_name": "vectors" }))
        .await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["file"], "vectors");
    assert_eq!(body["pages"], 2);
    assert_eq!(body["id_range"][0], 0);
}

#[tokio::test]
async fn test_ingest_empty_name_is_bad_request() {
    let server = create_test_server(test_state(None));

    let response = server
        .post("/api/ingest")
        .json(&json!({ "file_name": "" }))
        .await;
    response.assert_status_bad_request();

    let body: Value = response.json();
    assert!(body["error"].as_str().unwrap().contains("file_name"));
}

#[tokio::test]
async fn test_ingest_missing_file_is_not_found() {
    let server = create_test_server(test_state(None));

    server
        .post("/api/ingest")
        .json(&json!({ "file_name": "nowhere" }))
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn test_ingest_malformed_pdf_is_server_error() {
    let state = test_state(None);
    upload_pdf(&state, "broken", b"not a pdf".to_vec()).await;
    let server = create_test_server(state);

    server
        .post("/api/ingest")
        .json(&json!({ "file_name": "broken" }))
        .await
        .assert_status_internal_server_error();
}

// ============================================================================
// Jobs
// ============================================================================

#[tokio::test]
async fn test_jobs_endpoint_queues_extract_stage() {
    let state = test_state(None);
    let server = create_test_server(state.clone());

    let response = server
        .post("/api/jobs")
        .json(&json!({ "file_name": "vectors" }))
        .await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["queue"], "openrag-jobs");
    assert_eq!(body["queued"], 1);

    let messages = state.queue.peek_messages(5);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, body["message_id"].as_str().unwrap());
    let job: Value = serde_json::from_str(&messages[0].content).unwrap();
    assert_eq!(job, json!({ "file_name": "vectors", "stage": "extract" }));
}

#[tokio::test]
async fn test_jobs_empty_name_is_bad_request() {
    let state = test_state(None);
    let server = create_test_server(state.clone());

    server
        .post("/api/jobs")
        .json(&json!({ "file_name": " " }))
        .await
        .assert_status_bad_request();
    assert_eq!(state.queue.approximate_len(), 0);
}

// ============================================================================
// Query and documents
// ============================================================================

#[tokio::test]
async fn test_query_endpoint_with_llm() {
    let state = test_state(Some(MockLLMClient::new("A crisp crust.")));
    upload_pdf(&state, "bread", other_pdf()).await;
    state.pipeline.ingest("bread", false).await.unwrap();
    let server = create_test_server(state);

    let response = server
        .post("/api/query")
        .json(&json!({ "question": "What does a hot oven give the loaf?" }))
        .await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["answer"], "A crisp crust.");
    let chunks = body["chunks"].as_array().unwrap();
    assert!(!chunks.is_empty());
    assert_eq!(chunks[0]["file"], "bread");
}

#[tokio::test]
async fn test_query_endpoint_retrieval_only() {
    let state = test_state(Some(MockLLMClient::new("unused")));
    upload_pdf(&state, "bread", other_pdf()).await;
    state.pipeline.ingest("bread", false).await.unwrap();
    let server = create_test_server(state);

    let response = server
        .post("/api/query")
        .json(&json!({ "question": "starter", "generate": false, "top_k": 1, "max_neighbors": 1 }))
        .await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert!(body["answer"].is_null());
    assert_eq!(body["chunks"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_query_rejects_empty_question_and_zero_top_k() {
    let server = create_test_server(test_state(None));

    server
        .post("/api/query")
        .json(&json!({ "question": "" }))
        .await
        .assert_status_bad_request();
    server
        .post("/api/query")
        .json(&json!({ "question": "anything", "top_k": 0 }))
        .await
        .assert_status_bad_request();
}

#[tokio::test]
async fn test_llm_failure_is_bad_gateway() {
    let state = test_state(Some(MockLLMClient::failing()));
    upload_pdf(&state, "bread", other_pdf()).await;
    state.pipeline.ingest("bread", false).await.unwrap();
    let server = create_test_server(state);

    server
        .post("/api/query")
        .json(&json!({ "question": "flour" }))
        .await
        .assert_status(axum::http::StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_documents_lists_id_ranges() {
    let state = test_state(None);
    upload_pdf(&state, "vectors", sample_pdf()).await;
    upload_pdf(&state, "bread", other_pdf()).await;
    let first = state.pipeline.ingest("vectors", false).await.unwrap();
    state.pipeline.ingest("bread", false).await.unwrap();
    let server = create_test_server(state);

    let response = server.get("/api/documents").await;
    response.assert_status_ok();

    let body: Vec<Value> = response.json();
    assert_eq!(body.len(), 2);
    let vectors = body.iter().find(|d| d["file"] == "vectors").unwrap();
    assert_eq!(vectors["start"], 0);
    assert_eq!(vectors["chunks"], first.chunks as u64);
}

#[tokio::test]
async fn test_documents_empty() {
    let server = create_test_server(test_state(None));

    let response = server.get("/api/documents").await;
    response.assert_status_ok();
    let body: Vec<Value> = response.json();
    assert!(body.is_empty());
}
