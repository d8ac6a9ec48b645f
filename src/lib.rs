//! Embedding lifecycle and retrieval core for retrieval-augmented generation.
//!
//! Free text is embedded into vectors, persisted in named collections of a vector
//! store, and retrieved by similarity. One expensive embedding model is loaded
//! once per process and shared by every component that needs it.
//!
//! # Architecture
//!
//! - **Embeddings**: pluggable [`embedding::ModelLoader`]s. `local` runs a
//!   sentence-transformer export through ONNX Runtime; `hashing` is a
//!   dependency-free feature-hashing embedder
//! - **Model sharing**: [`SharedModelRegistry`] loads each model name once and
//!   hands the same instance to every caller
//! - **Storage**: SQLite with [sqlite-vec](https://github.com/asg017/sqlite-vec),
//!   one `vec0` table per collection, all-or-nothing batch writes
//! - **Components**: [`InputProcessor`] for generic inputs,
//!   [`ConversationContextManager`] for user/assistant turns, and [`Pipeline`]
//!   for batch ingestion with reporting
//!
//! # Modules
//!
//! - [`config`] — Configuration loading from TOML files and environment variables
//! - [`embedding`] — Embedding providers, load-once models, and the shared registry
//! - [`store`] — Persistent vector store: collections, upsert, k-NN query
//! - [`processor`] — Ingestion and similarity search over one collection
//! - [`conversation`] — Conversation turn memory
//! - [`pipeline`] — Batch pipeline and convenience entry points
//! - [`ids`] — Record id generation
//! - [`error`] — Error taxonomy

pub mod config;
pub mod conversation;
pub mod embedding;
pub mod error;
pub mod ids;
pub mod pipeline;
pub mod processor;
pub mod store;

pub use conversation::{ConversationContextManager, Role};
pub use embedding::registry::SharedModelRegistry;
pub use embedding::{EmbeddingModel, EmbeddingProvider, ModelLoader};
pub use error::{RagError, RagResult};
pub use pipeline::{BatchReport, Pipeline};
pub use processor::InputProcessor;
pub use store::{Metadata, SearchMatch, VectorStore};
