use crate::database::{models::RetrievedChunk, Repository};
use crate::services::EmbeddingService;
use crate::utils::limiters::Limiters;
use anyhow::Result;
use pgvector::Vector;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// Embeds a question and pulls the top-k nearest chunks for one document,
/// mirroring `original_source/server/app/core/retrieval.py`.
pub struct Retriever {
    repository: Arc<Repository>,
    embedding_service: Arc<EmbeddingService>,
    limiters: Arc<Limiters>,
    top_k: i64,
}

impl Retriever {
    pub fn new(
        repository: Arc<Repository>,
        embedding_service: Arc<EmbeddingService>,
        limiters: Arc<Limiters>,
        top_k: i64,
    ) -> Self {
        Self {
            repository,
            embedding_service,
            limiters,
            top_k,
        }
    }

    pub async fn retrieve(
        &self,
        workspace_id: Uuid,
        document_id: Uuid,
        question: &str,
    ) -> Result<(Vec<RetrievedChunk>, Vec<f32>, i64)> {
        let embedding = self.embedding_service.embed(question).await?;

        let (_permit, wait) = Limiters::acquire_timed(
            self.limiters.db_search.clone(),
            self.limiters.acquire_timeout,
            "db_search",
        )
        .await?;
        debug!(wait_ms = wait.as_millis() as u64, op = "db_search", "wait_queue");

        let exec_start = Instant::now();
        let vector = Vector::from(embedding.vector.clone());
        let chunks = self
            .repository
            .top_k_chunks(workspace_id, document_id, vector, self.top_k)
            .await?;
        debug!(exec_ms = exec_start.elapsed().as_millis() as u64, op = "db_search", "exec");

        Ok((chunks, embedding.vector, embedding.tokens_embed))
    }
}
