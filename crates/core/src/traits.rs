use async_trait::async_trait;

use crate::error::ServiceError;
use crate::models::{Retrieved, VectorEntry};

/// Seam over the external similarity-search service. Index management is
/// idempotent: ensuring an existing index and deleting a missing one both
/// succeed as no-ops.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn ensure_index(&self) -> Result<(), ServiceError>;

    async fn delete_index(&self) -> Result<(), ServiceError>;

    /// Insert-or-overwrite, keyed by entry id.
    async fn upsert(&self, entries: &[VectorEntry]) -> Result<(), ServiceError>;

    /// Top-k similarity search restricted to one document partition,
    /// most-similar-first.
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        doc_key: &str,
    ) -> Result<Vec<Retrieved>, ServiceError>;
}
