//! Helpline Vector crate - FAQ embedding index and embedding services.
//!
//! Provides an in-memory FAQ index with cosine similarity search over an
//! atomically swapped snapshot, an embedding service trait with ONNX and
//! mock implementations, and a knowledge base that keeps the index in sync
//! with the FAQ repository.

pub mod embedding;
pub mod index;
pub mod knowledge;

pub use embedding::{DynEmbeddingService, EmbeddingService, MockEmbedding, OnnxEmbeddingService};
pub use index::{cosine_similarity, EmbeddingIndex, EmbeddingSnapshot, RefreshReport, ScoredFaq};
pub use knowledge::FaqKnowledgeBase;
