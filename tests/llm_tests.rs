//! Chat completion client against a mock server.

use openrag::llm::{LLMClient, OpenAIClient, Provider};
use openrag::types::AppError;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn chat_response(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }]
    })
}

#[tokio::test]
async fn test_generate_with_system_sends_both_messages() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "messages": [
                { "role": "system", "content": "Be brief." },
                { "role": "user", "content": "What is RAG?" }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_response("Retrieval first.")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = OpenAIClient::new(
        "sk-test".to_string(),
        mock_server.uri(),
        "gpt-4o-mini".to_string(),
    )
    .unwrap();

    let answer = client
        .generate_with_system("Be brief.", "What is RAG?")
        .await
        .unwrap();
    assert_eq!(answer, "Retrieval first.");
    assert_eq!(client.model_name(), "gpt-4o-mini");
}

#[tokio::test]
async fn test_generate_with_history_keeps_roles() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({
            "messages": [
                { "role": "user", "content": "hi" },
                { "role": "assistant", "content": "hello" },
                { "role": "user", "content": "again" }
            ],
            "temperature": 0.0
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_response("ok")))
        .mount(&mock_server)
        .await;

    let client = OpenAIClient::new(String::new(), mock_server.uri(), "m".to_string())
        .unwrap()
        .with_temperature(0.0);
    let history = vec![
        ("user".to_string(), "hi".to_string()),
        ("assistant".to_string(), "hello".to_string()),
        ("user".to_string(), "again".to_string()),
    ];

    assert_eq!(client.generate_with_history(&history).await.unwrap(), "ok");
}

#[tokio::test]
async fn test_error_status_is_llm_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&mock_server)
        .await;

    let client = OpenAIClient::new(String::new(), mock_server.uri(), "m".to_string()).unwrap();
    match client.generate("q").await.unwrap_err() {
        AppError::LLM(message) => assert!(message.contains("500")),
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_empty_choices_is_llm_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
        .mount(&mock_server)
        .await;

    let client = OpenAIClient::new(String::new(), mock_server.uri(), "m".to_string()).unwrap();
    assert!(matches!(client.generate("q").await, Err(AppError::LLM(_))));
}

#[tokio::test]
async fn test_ollama_provider_uses_openai_compatible_endpoint() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({ "model": "llama3.2" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_response("local answer")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = Provider::Ollama {
        base_url: mock_server.uri(),
        model: "llama3.2".to_string(),
    };
    let client = provider.create_client().unwrap();

    assert_eq!(client.generate("q").await.unwrap(), "local answer");
    assert_eq!(client.model_name(), "llama3.2");
}
