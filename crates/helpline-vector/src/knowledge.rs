//! FAQ knowledge base: keeps the embedding index in step with the repository.

use std::sync::Arc;

use tracing::{info, warn};

use helpline_core::error::HelplineError;
use helpline_core::repository::SupportRepository;

use crate::index::{EmbeddingIndex, RefreshReport, ScoredFaq};

/// Couples an [`EmbeddingIndex`] to the FAQ rows of a [`SupportRepository`].
///
/// Nothing refreshes implicitly. Callers run [`FaqKnowledgeBase::sync`]
/// after mutating FAQs.
#[derive(Clone)]
pub struct FaqKnowledgeBase {
    repo: Arc<dyn SupportRepository>,
    index: Arc<EmbeddingIndex>,
}

impl FaqKnowledgeBase {
    pub fn new(repo: Arc<dyn SupportRepository>, index: Arc<EmbeddingIndex>) -> Self {
        Self { repo, index }
    }

    pub fn index(&self) -> &Arc<EmbeddingIndex> {
        &self.index
    }

    /// Reload FAQs, refresh the index, and persist any newly computed
    /// embeddings tagged with the index's model id.
    pub async fn sync(&self) -> Result<RefreshReport, HelplineError> {
        let entries = self.repo.faq_entries()?;
        let report = self.index.refresh(&entries).await?;

        let model = self.index.model_id();
        for entry in &report.embedded {
            if let Some(vector) = &entry.embedding {
                // The snapshot already holds the vector; a failed write only
                // costs a re-embed on the next sync.
                if let Err(e) = self.repo.store_faq_embedding(entry.id, model, vector) {
                    warn!(faq_id = entry.id, error = %e, "Failed to persist FAQ embedding");
                }
            }
        }

        info!(
            total = report.total,
            embedded = report.embedded.len(),
            "FAQ knowledge base synced"
        );
        Ok(report)
    }

    /// Shorthand for [`EmbeddingIndex::query`].
    pub async fn search(
        &self,
        text: &str,
        k: usize,
        similarity_floor: f64,
    ) -> Result<Vec<ScoredFaq>, HelplineError> {
        self.index.query(text, k, similarity_floor).await
    }
}

impl std::fmt::Debug for FaqKnowledgeBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaqKnowledgeBase")
            .field("index", &self.index)
            .finish()
    }
}
