//! Ollama clients against a fake runtime served on an ephemeral port.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use chat_assist::config::{EmbeddingConfig, ModelRuntimeConfig};
use chat_assist::embedding::{Embedder, OllamaEmbedder};
use chat_assist::error::{GenerationError, RetrievalError};
use chat_assist::generation::{Generator, OllamaGenerator};
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

type Captured = Arc<Mutex<Vec<Value>>>;

async fn spawn_fake(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Serve `body` from `/api/generate`, recording request bodies.
async fn fake_generate(status: StatusCode, body: &'static str) -> (String, Captured) {
    let captured: Captured = Arc::new(Mutex::new(Vec::new()));
    let router = Router::new()
        .route(
            "/api/generate",
            post(
                move |State(captured): State<Captured>, Json(request): Json<Value>| async move {
                    captured.lock().unwrap().push(request);
                    (status, [("content-type", "application/x-ndjson")], body).into_response()
                },
            ),
        )
        .with_state(captured.clone());
    (spawn_fake(router).await, captured)
}

fn runtime(url: &str) -> ModelRuntimeConfig {
    ModelRuntimeConfig {
        url: url.to_string(),
        timeout_secs: 10,
        ..Default::default()
    }
}

async fn drain(generator: &OllamaGenerator) -> Vec<Result<String, GenerationError>> {
    generator
        .generate("deepseek-r1:8b", "hello")
        .await
        .unwrap()
        .collect()
        .await
}

#[tokio::test]
async fn test_generate_streams_fragments_until_done() {
    let (url, captured) = fake_generate(
        StatusCode::OK,
        concat!(
            "{\"model\":\"deepseek-r1:8b\",\"response\":\"<think>\",\"done\":false}\n",
            "{\"model\":\"deepseek-r1:8b\",\"response\":\"ok</think>Hi\",\"done\":false}\n",
            "{\"model\":\"deepseek-r1:8b\",\"response\":\" there\",\"done\":false}\n",
            "{\"model\":\"deepseek-r1:8b\",\"response\":\"\",\"done\":true}\n",
        ),
    )
    .await;

    let generator = OllamaGenerator::new(&runtime(&url)).unwrap();
    let items = drain(&generator).await;
    let text: Vec<String> = items.into_iter().map(|i| i.unwrap()).collect();
    assert_eq!(text.concat(), "<think>ok</think>Hi there");

    let request = captured.lock().unwrap()[0].clone();
    assert_eq!(request["model"], "deepseek-r1:8b");
    assert_eq!(request["prompt"], "hello");
    assert_eq!(request["stream"], true);
    let temperature = request["options"]["temperature"].as_f64().unwrap();
    assert!((temperature - 0.6).abs() < 1e-6);
}

#[tokio::test]
async fn test_truncated_stream_ends_with_incomplete() {
    let (url, _) = fake_generate(
        StatusCode::OK,
        "{\"response\":\"Partial\",\"done\":false}\n{\"response\":\" answ\",\"done\":false}\n",
    )
    .await;

    let generator = OllamaGenerator::new(&runtime(&url)).unwrap();
    let items = drain(&generator).await;
    assert_eq!(items.len(), 3);
    assert_eq!(items[0].as_ref().unwrap(), "Partial");
    assert!(matches!(items[2], Err(GenerationError::Incomplete(_))));
}

#[tokio::test]
async fn test_missing_model_is_unavailable() {
    let (url, _) = fake_generate(StatusCode::NOT_FOUND, "{\"error\":\"model 'x' not found\"}").await;
    let generator = OllamaGenerator::new(&runtime(&url)).unwrap();
    match generator.generate("x", "hello").await {
        Err(GenerationError::Unavailable(message)) => assert!(message.contains("not found")),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("expected an error"),
    }
}

#[tokio::test]
async fn test_connection_refused_is_unavailable() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let generator = OllamaGenerator::new(&runtime(&format!("http://{}", addr))).unwrap();
    assert!(matches!(
        generator.generate("x", "hello").await,
        Err(GenerationError::Unavailable(_))
    ));

    let embedder = OllamaEmbedder::new(&EmbeddingConfig {
        url: Some(format!("http://{}", addr)),
        ..Default::default()
    })
    .unwrap();
    assert!(matches!(
        embedder.embed(&["x".to_string()]).await,
        Err(RetrievalError::Unavailable(_))
    ));
}

#[tokio::test]
async fn test_embed_returns_one_vector_per_input() {
    let router = Router::new().route(
        "/api/embed",
        post(|Json(request): Json<Value>| async move {
            let inputs = request["input"].as_array().cloned().unwrap_or_default();
            let embeddings: Vec<Value> = inputs
                .iter()
                .map(|i| json!([i.as_str().unwrap().len() as f32, 1.0]))
                .collect();
            Json(json!({ "model": request["model"], "embeddings": embeddings }))
        }),
    );
    let url = spawn_fake(router).await;

    let embedder = OllamaEmbedder::new(&EmbeddingConfig {
        url: Some(url),
        ..Default::default()
    })
    .unwrap();
    let vectors = embedder
        .embed(&["ab".to_string(), "abcd".to_string()])
        .await
        .unwrap();
    assert_eq!(vectors, vec![vec![2.0, 1.0], vec![4.0, 1.0]]);

    let query = embedder.embed_query("xyz").await.unwrap();
    assert_eq!(query, vec![3.0, 1.0]);
}

#[tokio::test]
async fn test_embed_count_mismatch_is_error() {
    let router = Router::new().route(
        "/api/embed",
        post(|| async { Json(json!({ "embeddings": [[1.0, 0.0]] })) }),
    );
    let url = spawn_fake(router).await;

    let embedder = OllamaEmbedder::new(&EmbeddingConfig {
        url: Some(url),
        ..Default::default()
    })
    .unwrap();
    let result = embedder
        .embed(&["a".to_string(), "b".to_string()])
        .await;
    assert!(result.is_err());
}
