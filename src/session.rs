//! Chat sessions.
//!
//! A [`Session`] is the explicit per-user context: the selected model, the
//! context mode, bounded history, the uploaded corpus and the standing
//! context. Sessions share nothing mutable. What they do share lives in
//! [`Services`]: validated configuration and stateless clients.
//!
//! [`Session::submit`] runs one turn and always returns a [`ChatTurn`];
//! retrieval and generation failures end up in [`ChatTurn::error`]
//! instead of propagating.

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use futures::StreamExt;

use crate::assembler::{ContextAssembler, Passage};
use crate::chunk::Chunker;
use crate::config::{Config, ContextMode, ModelCatalog};
use crate::corpus::{Corpus, IngestReport};
use crate::embedding::{create_embedder, Embedder};
use crate::error::{ConfigError, SessionError};
use crate::extract::{extract_document, extract_file, load_standing_context};
use crate::generation::{Generator, OllamaGenerator};
use crate::history::ConversationHistory;
use crate::index::InMemoryIndex;
use crate::models::{Document, Message};
use crate::reasoning::{ReasoningSplitter, Segment};

/// Shared, immutable dependencies of every session.
pub struct Services {
    pub config: Config,
    pub catalog: ModelCatalog,
    chunker: Chunker,
    assembler: ContextAssembler,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
}

impl Services {
    /// Wire up services with explicit clients.
    pub fn new(
        config: Config,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let catalog = ModelCatalog::from_config(&config)?;
        let chunker = Chunker::from_config(&config.chunking)?;
        let assembler = ContextAssembler::from_config(&config);
        Ok(Self {
            config,
            catalog,
            chunker,
            assembler,
            embedder,
            generator,
        })
    }

    /// Build the Ollama-backed clients described by `config`.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let generator = Arc::new(OllamaGenerator::new(&config.model_runtime)?);
        Ok(Self::new(config, embedder, generator)?)
    }

    fn new_corpus(&self) -> Corpus {
        Corpus::new(
            self.chunker.clone(),
            self.embedder.clone(),
            Box::new(InMemoryIndex::new(self.config.retrieval.metric)),
            self.config.session.corpus_policy,
        )
        .with_batch_size(self.config.embedding.batch_size)
        .with_retries(self.config.retrieval.max_retries)
    }
}

/// Result of one chat turn.
#[derive(Debug, Clone, Serialize)]
pub struct ChatTurn {
    /// Answer text with reasoning removed.
    pub text: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub reasoning: String,
    /// False when generation failed or the stream was cut short.
    pub complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub model: String,
    pub passages: Vec<Passage>,
}

pub struct Session {
    id: Uuid,
    services: Arc<Services>,
    model: String,
    mode: ContextMode,
    history: ConversationHistory,
    corpus: Corpus,
    standing_context: Option<String>,
}

impl Session {
    /// Start a session on the default model and mode. The standing context
    /// file, if configured, is read once here.
    pub fn new(services: Arc<Services>) -> Self {
        let standing_context = services
            .config
            .session
            .standing_context
            .as_deref()
            .and_then(|path| match load_standing_context(path) {
                Ok(text) => Some(text),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "standing context not loaded");
                    None
                }
            });

        let session = Self {
            id: Uuid::new_v4(),
            model: services.catalog.default_name().to_string(),
            mode: services.config.session.default_mode,
            history: ConversationHistory::new(services.config.history.max_messages),
            corpus: services.new_corpus(),
            standing_context,
            services,
        };
        tracing::info!(session = %session.id, model = %session.model, "session started");
        session
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Display name of the selected model.
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn mode(&self) -> ContextMode {
        self.mode
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    /// Switch model by display name. History is kept.
    pub fn set_model(&mut self, name: &str) -> Result<(), SessionError> {
        if self.services.catalog.resolve(name).is_none() {
            return Err(SessionError::UnknownModel(name.to_string()));
        }
        self.model = name.to_string();
        tracing::info!(session = %self.id, model = name, "model changed");
        Ok(())
    }

    pub fn set_mode(&mut self, mode: ContextMode) {
        self.mode = mode;
    }

    /// Extract and ingest an uploaded file.
    pub async fn upload(&mut self, name: &str, bytes: &[u8]) -> Result<IngestReport, SessionError> {
        let document = extract_document(name, bytes)?;
        Ok(self.ingest(document).await)
    }

    pub async fn upload_path(&mut self, path: &Path) -> Result<IngestReport, SessionError> {
        let document = extract_file(path)?;
        Ok(self.ingest(document).await)
    }

    async fn ingest(&mut self, document: Document) -> IngestReport {
        let report = self.corpus.ingest(document).await;
        tracing::info!(
            session = %self.id,
            source = %report.source_id,
            chunks = report.chunks,
            indexed = report.indexed,
            "document uploaded"
        );
        report
    }

    /// Forget history and uploaded documents. Model and mode are kept.
    pub async fn reset(&mut self) {
        self.history.clear();
        self.corpus.clear().await;
        tracing::info!(session = %self.id, "session reset");
    }

    /// Run one turn. `on_segment` sees answer and reasoning text as it
    /// streams in.
    pub async fn submit<F>(&mut self, query: &str, mut on_segment: F) -> ChatTurn
    where
        F: FnMut(&Segment) + Send,
    {
        let started = Instant::now();
        let mut turn = ChatTurn {
            text: String::new(),
            reasoning: String::new(),
            complete: false,
            error: None,
            model: self.model.clone(),
            passages: Vec::new(),
        };

        let query = query.trim();
        if query.is_empty() {
            turn.error = Some("message is empty".to_string());
            return turn;
        }

        let Some(tag) = self.services.catalog.resolve(&self.model).map(str::to_string) else {
            turn.error = Some(SessionError::UnknownModel(self.model.clone()).to_string());
            return turn;
        };

        let context = self
            .services
            .assembler
            .assemble(
                query,
                &self.history,
                &self.corpus,
                self.mode,
                self.standing_context.as_deref(),
            )
            .await;
        let prompt = context.render();
        turn.passages = context.passages;

        self.history.append(Message::user(query));

        let mut stream = match self.services.generator.generate(&tag, &prompt).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(session = %self.id, model = %tag, error = %e, "generation failed");
                turn.error = Some(e.to_string());
                return turn;
            }
        };

        let mut splitter = ReasoningSplitter::new();
        let mut complete = true;
        while let Some(item) = stream.next().await {
            match item {
                Ok(fragment) => {
                    for segment in splitter.push(&fragment) {
                        collect(&mut turn, &segment);
                        on_segment(&segment);
                    }
                }
                Err(e) => {
                    tracing::warn!(session = %self.id, model = %tag, error = %e, "generation incomplete");
                    turn.error = Some(e.to_string());
                    complete = false;
                    break;
                }
            }
        }
        for segment in splitter.finish() {
            collect(&mut turn, &segment);
            on_segment(&segment);
        }
        turn.complete = complete;

        let answer = turn.text.trim();
        if !answer.is_empty() {
            self.history.append(Message::assistant(answer));
        }

        tracing::info!(
            session = %self.id,
            model = %tag,
            complete,
            chars = turn.text.chars().count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "turn finished"
        );
        turn
    }
}

fn collect(turn: &mut ChatTurn, segment: &Segment) {
    match segment {
        Segment::Answer(text) => turn.text.push_str(text),
        Segment::Reasoning(text) => turn.reasoning.push_str(text),
    }
}
