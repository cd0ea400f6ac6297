//! End-to-end turns through a session with deterministic fakes standing in
//! for the embedding model and the language model.

use async_trait::async_trait;
use chat_assist::config::{Config, ContextMode, CorpusPolicy};
use chat_assist::error::{GenerationError, RetrievalError};
use chat_assist::generation::{Generator, TextStream};
use chat_assist::embedding::Embedder;
use chat_assist::session::{Services, Session};
use futures::StreamExt;
use std::sync::{Arc, Mutex};

// ─── Fakes ──────────────────────────────────────────────────────────

const VOCAB: &[&str] = &["rust", "cargo", "python", "pytorch", "kubernetes", "docker"];

/// Counts vocabulary words. A small constant keeps vectors non-zero.
struct KeywordEmbedder;

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keywords"
    }

    fn dims(&self) -> usize {
        VOCAB.len()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        Ok(texts
            .iter()
            .map(|t| {
                let lower = t.to_lowercase();
                VOCAB
                    .iter()
                    .map(|w| lower.matches(w).count() as f32 + 0.01)
                    .collect()
            })
            .collect())
    }
}

/// Answers every prompt with `answer`, recording prompts.
struct EchoGenerator {
    answer: String,
    prompts: Mutex<Vec<String>>,
}

impl EchoGenerator {
    fn new(answer: &str) -> Arc<Self> {
        Arc::new(Self {
            answer: answer.to_string(),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn last_prompt(&self) -> String {
        self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Generator for EchoGenerator {
    async fn generate(&self, _model: &str, prompt: &str) -> Result<TextStream, GenerationError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let fragments: Vec<Result<String, GenerationError>> = self
            .answer
            .split_inclusive(' ')
            .map(|s| Ok(s.to_string()))
            .collect();
        Ok(futures::stream::iter(fragments).boxed())
    }
}

fn services(config: Config, generator: Arc<EchoGenerator>) -> Arc<Services> {
    Arc::new(Services::new(config, Arc::new(KeywordEmbedder), generator).unwrap())
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_retrieves_relevant_upload() {
    let mut config = Config::default();
    config.session.corpus_policy = CorpusPolicy::Append;
    config.retrieval.top_k = 1;
    let generator = EchoGenerator::new("Use cargo build.");
    let mut session = Session::new(services(config, generator.clone()));

    for (name, text) in [
        ("rust.txt", "Rust projects are built with cargo. Cargo fetches crates."),
        ("ml.txt", "Python notebooks train models with PyTorch."),
        ("ops.txt", "Kubernetes schedules Docker containers."),
    ] {
        let report = session.upload(name, text.as_bytes()).await.unwrap();
        assert!(report.indexed);
    }

    let turn = session.submit("How do I build a Rust crate with cargo?", |_| {}).await;
    assert!(turn.complete);
    assert_eq!(turn.text, "Use cargo build.");
    assert_eq!(turn.passages.len(), 1);
    assert_eq!(turn.passages[0].source_id, "rust.txt");

    let prompt = generator.last_prompt();
    assert!(prompt.starts_with(&Config::default().model_runtime.system_prompt));
    assert!(prompt.contains("Cargo fetches crates"));
    assert!(!prompt.contains("PyTorch"));
    assert!(prompt.ends_with("user: How do I build a Rust crate with cargo?"));
}

#[tokio::test]
async fn test_replace_policy_forgets_earlier_upload() {
    let generator = EchoGenerator::new("ok");
    let mut session = Session::new(services(Config::default(), generator.clone()));

    session
        .upload("rust.txt", b"Rust and cargo notes")
        .await
        .unwrap();
    session
        .upload("ops.txt", b"Kubernetes and docker notes")
        .await
        .unwrap();
    assert_eq!(session.corpus().documents().len(), 1);

    session.submit("cargo?", |_| {}).await;
    assert!(!generator.last_prompt().contains("Rust and cargo notes"));
}

#[tokio::test]
async fn test_history_stays_bounded_across_turns() {
    let mut config = Config::default();
    config.history.max_messages = 6;
    let generator = EchoGenerator::new("noted");
    let mut session = Session::new(services(config, generator.clone()));

    for i in 0..5 {
        session.submit(&format!("question {}", i), |_| {}).await;
        assert!(session.history().len() <= 6);
    }
    assert_eq!(session.history().len(), 6);

    // The fifth prompt saw only the six most recent messages.
    let prompt = generator.last_prompt();
    assert!(!prompt.contains("user: question 0"));
    assert!(prompt.contains("user: question 1"));
    assert!(prompt.contains("user: question 4"));
}

#[tokio::test]
async fn test_budget_holds_in_both_modes() {
    let mut config = Config::default();
    config.retrieval.context_budget = 120;
    config.retrieval.top_k = 5;
    config.chunking.chunk_size = 50;
    config.chunking.overlap = 10;
    let generator = EchoGenerator::new("ok");
    let mut session = Session::new(services(config, generator));

    let text = "rust cargo ".repeat(40);
    session.upload("big.txt", text.as_bytes()).await.unwrap();

    let smart = session.submit("rust", |_| {}).await;
    let smart_chars: usize = smart.passages.iter().map(|p| p.text.chars().count()).sum();
    assert!(smart_chars <= 120);
    assert!(!smart.passages.is_empty());

    session.set_mode(ContextMode::Full);
    let full = session.submit("rust", |_| {}).await;
    assert_eq!(full.passages.len(), 1);
    assert_eq!(full.passages[0].text.chars().count(), 120);
    assert!(full.passages[0].truncated);
}

#[tokio::test]
async fn test_switching_model_keeps_history() {
    let generator = EchoGenerator::new("hi");
    let mut session = Session::new(services(Config::default(), generator.clone()));
    session.submit("remember the number 7", |_| {}).await;
    session.set_model("DeepSeek-R1 1.5B").unwrap();
    let turn = session.submit("what number?", |_| {}).await;
    assert_eq!(turn.model, "DeepSeek-R1 1.5B");
    assert!(generator.last_prompt().contains("user: remember the number 7"));
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let generator = EchoGenerator::new("ok");
    let services = services(Config::default(), generator.clone());
    let mut a = Session::new(services.clone());
    let mut b = Session::new(services);

    a.upload("secret.txt", b"rust cargo secret plans").await.unwrap();
    a.submit("first", |_| {}).await;
    b.submit("cargo?", |_| {}).await;

    assert!(b.corpus().is_empty());
    assert_eq!(b.history().len(), 2);
    assert!(!generator.last_prompt().contains("secret plans"));
    assert!(!generator.last_prompt().contains("user: first"));
}
