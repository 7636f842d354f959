//! Embedding service trait and implementations.
//!
//! - `OnnxEmbeddingService` runs a sentence-transformer ONNX export (the
//!   default deployment uses all-MiniLM-L6-v2, 384 dimensions) through ort
//!   and tokenizes with the HuggingFace tokenizers crate.
//! - `MockEmbedding` provides deterministic hash-based vectors for testing.

use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use helpline_core::error::HelplineError;
use ort::session::Session;
use ort::value::TensorRef;
use tokenizers::Tokenizer;
use tracing::info;

/// Dimensionality of all-MiniLM-L6-v2 sentence embeddings.
pub const DEFAULT_DIMENSIONS: usize = 384;

/// Service for generating text embeddings.
///
/// Implementations must be deterministic: identical input text yields an
/// identical vector.
pub trait EmbeddingService: Send + Sync {
    /// Generate an embedding vector for the given text.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, HelplineError>> + Send;

    /// Return the dimensionality of vectors produced by this service.
    fn dimensions(&self) -> usize;

    /// Stable id of the model behind this service. Stored next to each
    /// persisted vector; vectors from another model are never reused.
    fn model_id(&self) -> &str;
}

/// Future returned by [`DynEmbeddingService::embed_boxed`].
pub type EmbedFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<f32>, HelplineError>> + Send + 'a>>;

/// Object-safe version of [`EmbeddingService`] for dynamic dispatch.
///
/// A blanket implementation covers every `EmbeddingService`, so the index
/// can hold an `Arc<dyn DynEmbeddingService>` without a generic parameter.
pub trait DynEmbeddingService: Send + Sync {
    fn embed_boxed<'a>(&'a self, text: &'a str) -> EmbedFuture<'a>;

    fn dimensions(&self) -> usize;

    fn model_id(&self) -> &str;
}

impl<T: EmbeddingService> DynEmbeddingService for T {
    fn embed_boxed<'a>(&'a self, text: &'a str) -> EmbedFuture<'a> {
        Box::pin(self.embed(text))
    }

    fn dimensions(&self) -> usize {
        EmbeddingService::dimensions(self)
    }

    fn model_id(&self) -> &str {
        EmbeddingService::model_id(self)
    }
}

// ---------------------------------------------------------------------------
// OnnxEmbeddingService
// ---------------------------------------------------------------------------

/// ONNX Runtime-backed embedding service using a sentence-transformer model.
///
/// Expects a model directory containing `model.onnx` and `tokenizer.json`.
/// The model takes `input_ids`, `attention_mask`, and `token_type_ids` and
/// produces token-level embeddings, which are mean-pooled under the
/// attention mask and L2-normalized.
#[derive(Clone)]
pub struct OnnxEmbeddingService {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<Tokenizer>,
    dimensions: usize,
    model_id: String,
}

impl std::fmt::Debug for OnnxEmbeddingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEmbeddingService")
            .field("model_id", &self.model_id)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

fn unavailable(context: &str, e: impl std::fmt::Display) -> HelplineError {
    HelplineError::EmbeddingUnavailable(format!("{}: {}", context, e))
}

impl OnnxEmbeddingService {
    /// Load a sentence-transformer model from the given directory.
    pub fn from_directory(model_dir: &Path) -> Result<Self, HelplineError> {
        Self::from_files(
            &model_dir.join("model.onnx"),
            &model_dir.join("tokenizer.json"),
        )
    }

    /// Load from explicit model and tokenizer file paths.
    pub fn from_files(model_path: &Path, tokenizer_path: &Path) -> Result<Self, HelplineError> {
        for (what, path) in [("ONNX model", model_path), ("Tokenizer", tokenizer_path)] {
            if !path.exists() {
                return Err(HelplineError::EmbeddingUnavailable(format!(
                    "{} not found at {}",
                    what,
                    path.display()
                )));
            }
        }

        let session = Session::builder()
            .map_err(|e| unavailable("ONNX session builder", e))?
            .with_intra_threads(1)
            .map_err(|e| unavailable("ONNX set threads", e))?
            .commit_from_file(model_path)
            .map_err(|e| unavailable("ONNX load model", e))?;

        // Output is [batch, seq_len, hidden_dim]; dynamic dims report <= 0.
        let dimensions = session
            .outputs()
            .first()
            .and_then(|out| out.dtype().tensor_shape())
            .and_then(|shape| shape.last().copied())
            .filter(|d| *d > 0)
            .map_or(DEFAULT_DIMENSIONS, |d| d as usize);

        let tokenizer =
            Tokenizer::from_file(tokenizer_path).map_err(|e| unavailable("Load tokenizer", e))?;

        info!(
            model = %model_path.display(),
            dimensions,
            "Loaded ONNX embedding model"
        );

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
            dimensions,
            model_id: format!("onnx:{}", model_path.display()),
        })
    }

    fn embed_sync(&self, text: &str) -> Result<Vec<f32>, HelplineError> {
        if text.is_empty() {
            return Err(HelplineError::EmbeddingUnavailable(
                "Cannot embed empty text".to_string(),
            ));
        }

        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| unavailable("Tokenization failed", e))?;

        let to_i64 = |values: &[u32]| values.iter().map(|&v| v as i64).collect::<Vec<i64>>();
        let input_ids = to_i64(encoding.get_ids());
        let attention_mask = to_i64(encoding.get_attention_mask());
        let token_type_ids = to_i64(encoding.get_type_ids());
        let seq_len = input_ids.len();

        let ids_array = ndarray::Array2::from_shape_vec((1, seq_len), input_ids)
            .map_err(|e| unavailable("input_ids array", e))?;
        let mask_array = ndarray::Array2::from_shape_vec((1, seq_len), attention_mask.clone())
            .map_err(|e| unavailable("attention_mask array", e))?;
        let type_array = ndarray::Array2::from_shape_vec((1, seq_len), token_type_ids)
            .map_err(|e| unavailable("token_type_ids array", e))?;

        let ids_ref =
            TensorRef::from_array_view(&ids_array).map_err(|e| unavailable("input_ids", e))?;
        let mask_ref = TensorRef::from_array_view(&mask_array)
            .map_err(|e| unavailable("attention_mask", e))?;
        let type_ref = TensorRef::from_array_view(&type_array)
            .map_err(|e| unavailable("token_type_ids", e))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| unavailable("Session lock poisoned", e))?;
        let outputs = session
            .run(ort::inputs![ids_ref, mask_ref, type_ref])
            .map_err(|e| unavailable("ONNX inference failed", e))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| unavailable("Extract embeddings", e))?;

        let hidden_dim = match shape.iter().copied().collect::<Vec<i64>>().as_slice() {
            [.., _, last] if *last > 0 => *last as usize,
            other => {
                return Err(HelplineError::EmbeddingUnavailable(format!(
                    "Unexpected output shape: {:?}",
                    other
                )))
            }
        };

        Ok(mean_pool(data, &attention_mask, hidden_dim))
    }
}

/// Average token vectors whose mask is set, then L2-normalize.
///
/// `token_embeddings` is the flattened `[seq_len, hidden_dim]` block.
fn mean_pool(token_embeddings: &[f32], mask: &[i64], hidden_dim: usize) -> Vec<f32> {
    let mut pooled = vec![0.0f32; hidden_dim];
    let mut count = 0.0f32;

    for (token, row) in mask.iter().zip(token_embeddings.chunks_exact(hidden_dim)) {
        if *token > 0 {
            for (acc, v) in pooled.iter_mut().zip(row) {
                *acc += v;
            }
            count += 1.0;
        }
    }

    if count > 0.0 {
        for val in &mut pooled {
            *val /= count;
        }
    }
    l2_normalize(&mut pooled);
    pooled
}

fn l2_normalize(values: &mut [f32]) {
    let norm: f32 = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in values {
            *val /= norm;
        }
    }
}

impl EmbeddingService for OnnxEmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, HelplineError> {
        // Inference is CPU-bound; keep it off the async workers.
        let service = self.clone();
        let text = text.to_string();

        tokio::task::spawn_blocking(move || service.embed_sync(&text))
            .await
            .map_err(|e| unavailable("Embedding task panicked", e))?
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// ---------------------------------------------------------------------------
// MockEmbedding
// ---------------------------------------------------------------------------

/// Mock embedding service returning deterministic unit vectors.
///
/// The output is derived from a hash of the whole input text: identical
/// inputs produce identical vectors, different inputs are close to
/// orthogonal. It carries no semantics.
#[derive(Debug, Clone)]
pub struct MockEmbedding {
    dimensions: usize,
    model_id: String,
}

impl Default for MockEmbedding {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEmbedding {
    pub fn new() -> Self {
        Self::with_dimensions(DEFAULT_DIMENSIONS)
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions,
            model_id: format!("mock-hash-{}", dimensions),
        }
    }

    fn hash_to_vector(&self, text: &str) -> Vec<f32> {
        let mut result: Vec<f32> = (0..self.dimensions)
            .map(|i| {
                let mut hasher = DefaultHasher::new();
                text.hash(&mut hasher);
                i.hash(&mut hasher);
                let h = hasher.finish();
                (((h as f64) / (u64::MAX as f64)) * 2.0 - 1.0) as f32
            })
            .collect();
        l2_normalize(&mut result);
        result
    }
}

impl EmbeddingService for MockEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, HelplineError> {
        if text.is_empty() {
            return Err(HelplineError::EmbeddingUnavailable(
                "Cannot embed empty text".to_string(),
            ));
        }
        Ok(self.hash_to_vector(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_embedding_dimension() {
        let service = MockEmbedding::new();
        let vec = service.embed("hello world").await.unwrap();
        assert_eq!(vec.len(), 384);
    }

    #[tokio::test]
    async fn test_mock_embedding_custom_dimension() {
        let service = MockEmbedding::with_dimensions(8);
        assert_eq!(service.embed("x").await.unwrap().len(), 8);
        assert_eq!(EmbeddingService::dimensions(&service), 8);
    }

    #[test]
    fn test_mock_model_id_tracks_dimensions() {
        assert_eq!(EmbeddingService::model_id(&MockEmbedding::new()), "mock-hash-384");
        assert_ne!(
            EmbeddingService::model_id(&MockEmbedding::with_dimensions(8)),
            EmbeddingService::model_id(&MockEmbedding::new())
        );
    }

    #[tokio::test]
    async fn test_mock_embedding_deterministic() {
        let service = MockEmbedding::new();
        let v1 = service.embed("same text").await.unwrap();
        let v2 = service.embed("same text").await.unwrap();
        assert_eq!(v1, v2);
    }

    #[tokio::test]
    async fn test_mock_embedding_different_inputs() {
        let service = MockEmbedding::new();
        let v1 = service.embed("text one").await.unwrap();
        let v2 = service.embed("text two").await.unwrap();
        assert_ne!(v1, v2);
    }

    #[tokio::test]
    async fn test_mock_embedding_empty_text() {
        let result = MockEmbedding::new().embed("").await;
        assert!(matches!(
            result,
            Err(HelplineError::EmbeddingUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_mock_embedding_unit_norm() {
        let vec = MockEmbedding::new().embed("norm check").await.unwrap();
        let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_dyn_dispatch() {
        let service: Arc<dyn DynEmbeddingService> = Arc::new(MockEmbedding::new());
        let vec = service.embed_boxed("dyn").await.unwrap();
        assert_eq!(vec.len(), service.dimensions());
    }

    #[test]
    fn test_onnx_missing_model() {
        let result = OnnxEmbeddingService::from_directory(Path::new("/nonexistent"));
        assert!(matches!(
            result,
            Err(HelplineError::EmbeddingUnavailable(_))
        ));
    }

    // ---- Pooling ----

    #[test]
    fn test_mean_pool_skips_masked_tokens() {
        // Two tokens of dim 2; the second is padding.
        let data = [3.0f32, 4.0, 100.0, 100.0];
        let pooled = mean_pool(&data, &[1, 0], 2);
        assert!((pooled[0] - 0.6).abs() < 1e-6);
        assert!((pooled[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_mean_pool_averages_tokens() {
        let data = [1.0f32, 0.0, 0.0, 1.0];
        let pooled = mean_pool(&data, &[1, 1], 2);
        let expected = 1.0 / 2.0f32.sqrt();
        assert!((pooled[0] - expected).abs() < 1e-6);
        assert!((pooled[1] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_mean_pool_all_masked_is_zero() {
        let pooled = mean_pool(&[1.0, 2.0], &[0], 2);
        assert_eq!(pooled, vec![0.0, 0.0]);
    }
}
