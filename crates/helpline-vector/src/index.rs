//! In-memory FAQ index with exhaustive cosine similarity search.
//!
//! The index owns an immutable [`EmbeddingSnapshot`] behind an `RwLock`.
//! Queries clone the current `Arc` and scan it without holding the lock;
//! refreshes build a replacement off to the side and swap it in, so a reader
//! always sees either the old or the new snapshot in full.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use helpline_core::error::HelplineError;
use helpline_core::types::FaqEntry;

use crate::embedding::{DynEmbeddingService, EmbeddingService};

/// An FAQ entry paired with its similarity to a query.
#[derive(Debug, Clone)]
pub struct ScoredFaq {
    pub entry: FaqEntry,
    /// Cosine similarity in [-1, 1]; higher is closer.
    pub similarity: f64,
}

#[derive(Debug, Clone)]
struct IndexedFaq {
    entry: FaqEntry,
    vector: Vec<f32>,
}

/// Immutable set of FAQ vectors keyed by FAQ id.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingSnapshot {
    entries: BTreeMap<i64, IndexedFaq>,
}

impl EmbeddingSnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entry and vector stored for `faq_id`.
    pub fn get(&self, faq_id: i64) -> Option<(&FaqEntry, &[f32])> {
        self.entries
            .get(&faq_id)
            .map(|indexed| (&indexed.entry, indexed.vector.as_slice()))
    }

    /// FAQ ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.entries.keys().copied()
    }
}

/// Outcome of [`EmbeddingIndex::refresh`].
#[derive(Debug, Clone, Default)]
pub struct RefreshReport {
    /// Entries whose embedding was computed during this refresh, with the
    /// new vector filled in. Callers persist these.
    pub embedded: Vec<FaqEntry>,
    /// Entries whose stored embedding was reused.
    pub reused: usize,
    /// Size of the new snapshot.
    pub total: usize,
}

/// Semantic index over FAQ entries.
pub struct EmbeddingIndex {
    embedder: Arc<dyn DynEmbeddingService>,
    dimensions: usize,
    model_id: String,
    current: RwLock<Arc<EmbeddingSnapshot>>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for EmbeddingIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingIndex")
            .field("model_id", &self.model_id)
            .field("dimensions", &self.dimensions)
            .field("len", &self.len())
            .finish()
    }
}

fn lock_poisoned(e: impl std::fmt::Display) -> HelplineError {
    HelplineError::Storage(format!("Lock poisoned: {}", e))
}

impl EmbeddingIndex {
    /// Create an empty index whose dimensionality is taken from the embedder.
    pub fn new<E: EmbeddingService + 'static>(embedder: E) -> Self {
        Self::new_dyn(Arc::new(embedder))
    }

    pub fn new_dyn(embedder: Arc<dyn DynEmbeddingService>) -> Self {
        let dimensions = embedder.dimensions();
        let model_id = embedder.model_id().to_string();
        Self {
            embedder,
            dimensions,
            model_id,
            current: RwLock::new(Arc::new(EmbeddingSnapshot::default())),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Id of the embedder, stored alongside persisted vectors.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// The snapshot queries currently run against.
    pub fn snapshot(&self) -> Result<Arc<EmbeddingSnapshot>, HelplineError> {
        let current = self.current.read().map_err(lock_poisoned)?;
        Ok(Arc::clone(&current))
    }

    pub fn len(&self) -> usize {
        self.current.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Embed `text`, checking the result has the index dimensionality.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, HelplineError> {
        let vector = self.embedder.embed_boxed(text).await?;
        if vector.len() != self.dimensions {
            return Err(HelplineError::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }
        Ok(vector)
    }

    /// Rebuild the snapshot from `entries`.
    ///
    /// A stored embedding is reused only when it came from this index's
    /// model and has the right dimension. Everything else is embedded from
    /// `"{question} {answer}"`. On failure the previous snapshot stays in
    /// place.
    pub async fn refresh(&self, entries: &[FaqEntry]) -> Result<RefreshReport, HelplineError> {
        let _guard = self.refresh_lock.lock().await;

        let mut next = BTreeMap::new();
        let mut report = RefreshReport::default();

        for entry in entries {
            let same_model = entry.embedding_model.as_deref() == Some(self.model_id.as_str());
            let vector = match &entry.embedding {
                Some(existing) if same_model && existing.len() == self.dimensions => {
                    report.reused += 1;
                    existing.clone()
                }
                _ => {
                    let vector = self.embed(&entry.embedding_text()).await?;
                    report.embedded.push(FaqEntry {
                        embedding: Some(vector.clone()),
                        embedding_model: Some(self.model_id.clone()),
                        ..entry.clone()
                    });
                    vector
                }
            };
            next.insert(
                entry.id,
                IndexedFaq {
                    entry: FaqEntry {
                        embedding: None,
                        embedding_model: None,
                        ..entry.clone()
                    },
                    vector,
                },
            );
        }

        report.total = next.len();
        let snapshot = Arc::new(EmbeddingSnapshot { entries: next });
        *self.current.write().map_err(lock_poisoned)? = snapshot;

        info!(
            total = report.total,
            embedded = report.embedded.len(),
            reused = report.reused,
            "FAQ index refreshed"
        );
        Ok(report)
    }

    /// The at most `k` entries most similar to `text` whose similarity
    /// exceeds `similarity_floor`, best first. Ties go to the lower id.
    pub async fn query(
        &self,
        text: &str,
        k: usize,
        similarity_floor: f64,
    ) -> Result<Vec<ScoredFaq>, HelplineError> {
        let snapshot = self.snapshot()?;
        if k == 0 || snapshot.is_empty() {
            return Ok(Vec::new());
        }

        let query = self.embed(text).await?;

        let mut scored: Vec<ScoredFaq> = snapshot
            .entries
            .values()
            .filter_map(|indexed| {
                let similarity = cosine_similarity(&query, &indexed.vector);
                (similarity > similarity_floor).then(|| ScoredFaq {
                    entry: indexed.entry.clone(),
                    similarity,
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.entry.id.cmp(&b.entry.id))
        });
        scored.truncate(k);

        debug!(hits = scored.len(), k, "FAQ query");
        Ok(scored)
    }
}

/// Cosine similarity between two vectors, computed in f64.
///
/// Returns 0.0 for mismatched lengths, zero-magnitude vectors, or a
/// non-finite result.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b)
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();
    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    let similarity = dot / (mag_a * mag_b);
    if similarity.is_finite() {
        similarity.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
    use std::time::Duration;

    use crate::embedding::MockEmbedding;

    /// Maps known words to fixed axes so similarity is predictable.
    struct AxisEmbedding {
        calls: Arc<AtomicUsize>,
        delay: Duration,
        fail: Arc<AtomicBool>,
    }

    impl AxisEmbedding {
        fn new() -> Self {
            Self {
                calls: Arc::new(AtomicUsize::new(0)),
                delay: Duration::ZERO,
                fail: Arc::new(AtomicBool::new(false)),
            }
        }

        fn failing() -> Self {
            let embedder = Self::new();
            embedder.fail.store(true, AtomicOrdering::SeqCst);
            embedder
        }
    }

    impl EmbeddingService for AxisEmbedding {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, HelplineError> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail.load(AtomicOrdering::SeqCst) {
                return Err(HelplineError::EmbeddingUnavailable("offline".into()));
            }
            let mut v = vec![0.0f32; 4];
            let lower = text.to_lowercase();
            for (axis, word) in ["password", "billing", "shipping", "account"]
                .iter()
                .enumerate()
            {
                if lower.contains(word) {
                    v[axis] = 1.0;
                }
            }
            Ok(v)
        }

        fn dimensions(&self) -> usize {
            4
        }

        fn model_id(&self) -> &str {
            "axis-test"
        }
    }

    fn faq(id: i64, question: &str, answer: &str) -> FaqEntry {
        FaqEntry {
            id,
            question: question.to_string(),
            answer: answer.to_string(),
            category: None,
            embedding: None,
            embedding_model: None,
        }
    }

    fn sample_faqs() -> Vec<FaqEntry> {
        vec![
            faq(1, "How do I reset my password?", "Use the forgot link."),
            faq(2, "Where is my billing statement?", "Under settings."),
            faq(3, "How long does shipping take?", "Three to five days."),
        ]
    }

    // ---- Refresh ----

    #[tokio::test]
    async fn test_refresh_embeds_missing_vectors() {
        let index = EmbeddingIndex::new(AxisEmbedding::new());
        let report = index.refresh(&sample_faqs()).await.unwrap();

        assert_eq!(report.total, 3);
        assert_eq!(report.reused, 0);
        assert_eq!(report.embedded.len(), 3);
        assert!(report.embedded.iter().all(|e| e.embedding.is_some()));
        assert_eq!(index.len(), 3);
    }

    #[tokio::test]
    async fn test_refresh_reuses_stored_vectors() {
        let embedder = AxisEmbedding::new();
        let calls = Arc::clone(&embedder.calls);
        let index = EmbeddingIndex::new(embedder);

        let mut faqs = sample_faqs();
        faqs[0].embedding = Some(vec![1.0, 0.0, 0.0, 0.0]);
        faqs[0].embedding_model = Some("axis-test".to_string());
        // Wrong dimension is recomputed.
        faqs[1].embedding = Some(vec![1.0, 0.0]);
        faqs[1].embedding_model = Some("axis-test".to_string());

        let report = index.refresh(&faqs).await.unwrap();
        assert_eq!(report.reused, 1);
        assert_eq!(report.embedded.len(), 2);
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 2);
        assert_eq!(
            report.embedded.iter().map(|e| e.id).collect::<Vec<_>>(),
            vec![2, 3]
        );
    }

    #[tokio::test]
    async fn test_refresh_reembeds_vectors_from_other_model() {
        let embedder = AxisEmbedding::new();
        let calls = Arc::clone(&embedder.calls);
        let index = EmbeddingIndex::new(embedder);

        let mut faqs = sample_faqs();
        // Right dimension, wrong producer.
        faqs[0].embedding = Some(vec![0.0, 0.0, 0.0, 1.0]);
        faqs[0].embedding_model = Some("mock-hash-4".to_string());
        // Legacy vector with no recorded model.
        faqs[1].embedding = Some(vec![0.0, 1.0, 0.0, 0.0]);

        let report = index.refresh(&faqs).await.unwrap();
        assert_eq!(report.reused, 0);
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 3);
        assert!(report
            .embedded
            .iter()
            .all(|e| e.embedding_model.as_deref() == Some("axis-test")));

        let snapshot = index.snapshot().unwrap();
        let (_, vector) = snapshot.get(1).unwrap();
        assert_eq!(vector, &[1.0, 0.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_refresh_drops_removed_entries() {
        let index = EmbeddingIndex::new(AxisEmbedding::new());
        index.refresh(&sample_faqs()).await.unwrap();
        index.refresh(&sample_faqs()[..1]).await.unwrap();

        let snapshot = index.snapshot().unwrap();
        assert_eq!(snapshot.ids().collect::<Vec<_>>(), vec![1]);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_snapshot() {
        let embedder = AxisEmbedding::new();
        let fail = Arc::clone(&embedder.fail);
        let index = EmbeddingIndex::new(embedder);
        index.refresh(&sample_faqs()).await.unwrap();

        fail.store(true, AtomicOrdering::SeqCst);
        let mut grown = sample_faqs();
        grown.push(faq(4, "Delete my account", "Contact us."));
        let result = index.refresh(&grown).await;
        assert!(matches!(
            result,
            Err(HelplineError::EmbeddingUnavailable(_))
        ));

        let snapshot = index.snapshot().unwrap();
        assert_eq!(snapshot.ids().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_rejected() {
        struct Short;
        impl EmbeddingService for Short {
            async fn embed(&self, _text: &str) -> Result<Vec<f32>, HelplineError> {
                Ok(vec![1.0, 0.0])
            }
            fn dimensions(&self) -> usize {
                4
            }
            fn model_id(&self) -> &str {
                "short-test"
            }
        }

        let index = EmbeddingIndex::new(Short);
        let result = index.refresh(&sample_faqs()).await;
        assert!(matches!(
            result,
            Err(HelplineError::DimensionMismatch {
                expected: 4,
                actual: 2
            })
        ));
    }

    #[tokio::test]
    async fn test_query_during_refresh_sees_old_snapshot() {
        let index = Arc::new(EmbeddingIndex::new(AxisEmbedding {
            delay: Duration::from_millis(50),
            ..AxisEmbedding::new()
        }));
        let seeder = AxisEmbedding::new();
        let mut seeded = sample_faqs();
        for entry in &mut seeded {
            entry.embedding = Some(seeder.embed(&entry.embedding_text()).await.unwrap());
        }
        index.refresh(&seeded).await.unwrap();

        let refreshing = Arc::clone(&index);
        let handle = tokio::spawn(async move {
            let mut grown = sample_faqs();
            grown.push(faq(4, "Delete my account", "Contact us."));
            refreshing.refresh(&grown).await.unwrap();
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(index.snapshot().unwrap().len(), 3);

        handle.await.unwrap();
        assert_eq!(index.snapshot().unwrap().len(), 4);
    }

    // ---- Query ----

    #[tokio::test]
    async fn test_query_ranks_best_match_first() {
        let index = EmbeddingIndex::new(AxisEmbedding::new());
        index.refresh(&sample_faqs()).await.unwrap();

        let hits = index.query("forgot my password", 3, 0.5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry.id, 1);
        assert!((hits[0].similarity - 1.0).abs() < 1e-9);
        assert!(hits[0].entry.embedding.is_none());
    }

    #[tokio::test]
    async fn test_query_ties_break_by_id() {
        let index = EmbeddingIndex::new(AxisEmbedding::new());
        let faqs = vec![
            faq(7, "billing", "b"),
            faq(2, "billing", "a"),
            faq(5, "billing", "c"),
        ];
        index.refresh(&faqs).await.unwrap();

        let hits = index.query("billing", 10, 0.0).await.unwrap();
        assert_eq!(
            hits.iter().map(|h| h.entry.id).collect::<Vec<_>>(),
            vec![2, 5, 7]
        );
    }

    #[tokio::test]
    async fn test_query_respects_k_and_floor() {
        let index = EmbeddingIndex::new(MockEmbedding::with_dimensions(16));
        let faqs: Vec<FaqEntry> = (1..=20)
            .map(|i| faq(i, &format!("question {}", i), "answer"))
            .collect();
        index.refresh(&faqs).await.unwrap();

        for (k, floor) in [(1, -1.0), (5, -1.0), (5, 0.2), (50, 0.0)] {
            let hits = index.query("question 3", k, floor).await.unwrap();
            assert!(hits.len() <= k);
            assert!(hits.iter().all(|h| h.similarity > floor));
            assert!(hits.windows(2).all(|w| w[0].similarity >= w[1].similarity));
        }
    }

    #[tokio::test]
    async fn test_query_floor_is_exclusive() {
        let index = EmbeddingIndex::new(AxisEmbedding::new());
        index
            .refresh(&[faq(1, "password", "x"), faq(2, "password billing", "y")])
            .await
            .unwrap();

        // Entry 2 sits at exactly 1/sqrt(2) from the query.
        let floor = 1.0 / 2.0f64.sqrt();
        let hits = index.query("password", 3, floor - 1e-9).await.unwrap();
        assert_eq!(hits.len(), 2);
        let hits = index.query("password", 3, 1.0).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_query_empty_index_skips_embedding() {
        let embedder = AxisEmbedding::failing();
        let calls = Arc::clone(&embedder.calls);
        let index = EmbeddingIndex::new(embedder);

        let hits = index.query("anything", 3, 0.5).await.unwrap();
        assert!(hits.is_empty());
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_query_zero_k() {
        let index = EmbeddingIndex::new(AxisEmbedding::new());
        index.refresh(&sample_faqs()).await.unwrap();
        assert!(index.query("password", 0, 0.0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_query_embedder_failure() {
        let mut faqs = sample_faqs();
        for entry in &mut faqs {
            entry.embedding = Some(vec![1.0, 0.0, 0.0, 0.0]);
            entry.embedding_model = Some("axis-test".to_string());
        }
        let index = EmbeddingIndex::new(AxisEmbedding::failing());
        index.refresh(&faqs).await.unwrap();

        let result = index.query("password", 3, 0.5).await;
        assert!(matches!(
            result,
            Err(HelplineError::EmbeddingUnavailable(_))
        ));
    }

    // ---- Cosine ----

    #[test]
    fn test_cosine_similarity_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_cosine_similarity_length_mismatch() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_cosine_similarity_non_finite() {
        assert_eq!(cosine_similarity(&[f32::NAN, 1.0], &[1.0, 1.0]), 0.0);
    }
}
