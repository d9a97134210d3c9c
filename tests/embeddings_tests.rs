//! OpenAI-compatible embedding client against a mock server.

use openrag::rag::cache::EmbeddingCache;
use openrag::rag::embeddings::{embed_padded, OpenAIVectorizer, Vectorizer};
use openrag::types::AppError;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn embedding_response(vector: &[f32]) -> serde_json::Value {
    json!({
        "object": "list",
        "data": [{ "object": "embedding", "index": 0, "embedding": vector }],
        "model": "text-embedding-3-small",
        "usage": { "prompt_tokens": 3, "total_tokens": 3 }
    })
}

#[tokio::test]
async fn test_vectorize_posts_input_and_model() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "input": "hello world",
            "model": "text-embedding-3-small",
            "encoding_format": "float"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(embedding_response(&[0.1, 0.2, 0.3])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let vectorizer = OpenAIVectorizer::new(
        format!("{}/v1/", mock_server.uri()),
        "sk-test",
        "text-embedding-3-small",
    )
    .unwrap();

    assert_eq!(vectorizer.name(), "text-embedding-3-small");
    assert_eq!(vectorizer.dimensions(), Some(1536));
    let vector = vectorizer.vectorize("hello world").await.unwrap();
    assert_eq!(vector, vec![0.1, 0.2, 0.3]);
}

#[tokio::test]
async fn test_vectorize_error_status_is_embedding_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&mock_server)
        .await;

    let vectorizer = OpenAIVectorizer::new(mock_server.uri(), "", "custom-model").unwrap();
    let err = vectorizer.vectorize("text").await.unwrap_err();

    match err {
        AppError::Embedding(message) => {
            assert!(message.contains("429"));
            assert!(message.contains("rate limited"));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_vectorize_empty_data_is_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .mount(&mock_server)
        .await;

    let vectorizer = OpenAIVectorizer::new(mock_server.uri(), "", "custom-model").unwrap();
    assert_eq!(vectorizer.dimensions(), None);
    assert!(matches!(
        vectorizer.vectorize("text").await,
        Err(AppError::Embedding(_))
    ));
}

#[tokio::test]
async fn test_embed_padded_caches_remote_vectors() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(embedding_response(&[1.0, 2.0])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let vectorizer = OpenAIVectorizer::new(mock_server.uri(), "", "custom-model").unwrap();
    let cache = EmbeddingCache::new(10);

    let first = embed_padded(&vectorizer, "same text", 4, Some(&cache))
        .await
        .unwrap();
    let second = embed_padded(&vectorizer, "same text", 4, Some(&cache))
        .await
        .unwrap();

    assert_eq!(first, vec![1.0, 2.0, 0.0, 0.0]);
    assert_eq!(first, second);
    assert_eq!(cache.stats().hits, 1);
}
