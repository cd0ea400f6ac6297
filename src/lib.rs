//! # chat-assist
//!
//! A chat assistant for locally hosted language models (Ollama), with
//! per-session retrieval over uploaded files.
//!
//! ## Architecture
//!
//! ```text
//! upload ──▶ extract ──▶ chunk ──▶ embed ──▶ index      (per session)
//!                                              │
//! query ──▶ assembler ◀── history ◀────────────┘
//!              │
//!              ▼
//!          generator ──▶ reasoning splitter ──▶ history / caller
//! ```
//!
//! Each turn assembles `[system prompt][standing context][retrieved
//! context][history][query]`, streams the completion from the runtime, and
//! stores the answer (reasoning removed) in the bounded history.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and the model catalog |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`chunk`] | Window and section chunking |
//! | [`embedding`] | Embedding providers and vector math |
//! | [`index`] | Vector index trait and in-memory implementation |
//! | [`corpus`] | Per-session documents and their index |
//! | [`history`] | Bounded conversation history |
//! | [`assembler`] | Prompt assembly under a context budget |
//! | [`generation`] | Streaming Ollama client |
//! | [`reasoning`] | `<think>` span separation |
//! | [`extract`] | Text extraction for uploads |
//! | [`session`] | Chat sessions and shared services |
//! | [`server`] | JSON HTTP API |
//! | [`repl`] | Terminal chat |

pub mod assembler;
pub mod chunk;
pub mod config;
pub mod corpus;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generation;
pub mod history;
pub mod index;
pub mod models;
pub mod reasoning;
pub mod repl;
pub mod server;
pub mod session;
