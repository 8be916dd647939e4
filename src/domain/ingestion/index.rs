use super::chunker::{chunk_text, content_hash};
use crate::database::models::Chunk;
use crate::database::Repository;
use crate::domain::budget::BudgetLedger;
use crate::services::embedding_service::EmbeddingService;
use crate::utils::token_estimator::estimate_embedding_tokens;
use anyhow::{bail, Context, Result};
use pgvector::Vector;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Chunks extracted pages, embeds each chunk, and reserves/commits the
/// embedding token cost per chunk as it goes. Ported from
/// `original_source/worker/jobs/ingest_index.py::ingest_index`.
pub struct IndexJob {
    repository: Arc<Repository>,
    embedding_service: Arc<EmbeddingService>,
    budget: Arc<BudgetLedger>,
}

impl IndexJob {
    pub fn new(repository: Arc<Repository>, embedding_service: Arc<EmbeddingService>, budget: Arc<BudgetLedger>) -> Self {
        Self {
            repository,
            embedding_service,
            budget,
        }
    }

    pub async fn run(&self, workspace_id: Uuid, document_id: Uuid) -> Result<()> {
        let document = self
            .repository
            .get_document(workspace_id, document_id)
            .await?
            .context("document not found for indexing")?;

        let accepted = ["indexing", "uploaded", "extracting"];
        if !accepted.contains(&document.status.as_str()) {
            bail!("document status must be indexing or uploaded (got: {})", document.status);
        }
        self.repository
            .transition_document_status(workspace_id, document_id, &accepted, "indexing")
            .await?;

        match self.index(workspace_id, document_id).await {
            Ok((chunks_total, embeddings_total, embedding_tokens_used)) => {
                self.repository
                    .transition_document_status(workspace_id, document_id, &["indexing"], "ready")
                    .await?;
                info!(
                    %document_id, chunks_total, embeddings_total, embedding_tokens_used,
                    "indexing complete"
                );
                Ok(())
            }
            Err(e) => {
                warn!(%document_id, error = %e, "indexing failed");
                self.repository
                    .update_document_status(workspace_id, document_id, "failed", Some(&truncate(&e.to_string(), 2000)))
                    .await?;
                Err(e)
            }
        }
    }

    async fn index(&self, workspace_id: Uuid, document_id: Uuid) -> Result<(usize, usize, i64)> {
        let pages = self.repository.list_pages_ordered(workspace_id, document_id).await?;
        self.repository.wipe_chunks_and_embeddings(workspace_id, document_id).await?;

        let mut rows = Vec::new();
        let mut chunk_index = 0i32;
        for page in &pages {
            for piece in chunk_text(&page.content) {
                let token_count = estimate_embedding_tokens(&piece) as i32;
                rows.push(Chunk {
                    id: Uuid::new_v4(),
                    workspace_id,
                    document_id,
                    page_start: page.page_number,
                    page_end: page.page_number,
                    chunk_index,
                    content_hash: content_hash(&piece),
                    content: piece,
                    token_count,
                });
                chunk_index += 1;
            }
        }

        self.repository.batch_insert_chunks(&rows).await?;

        let mut outstanding: Vec<i64> = Vec::new();
        let mut embedding_tokens_used = 0i64;
        let mut embeddings_total = 0usize;

        let result = self.embed_all(workspace_id, document_id, &rows, &mut outstanding).await;

        match result {
            Ok(tokens_used) => {
                embedding_tokens_used = tokens_used;
                embeddings_total = rows.len();
            }
            Err(e) => {
                for amount in outstanding.into_iter().rev() {
                    if let Err(release_err) = self.budget.release(workspace_id, amount).await {
                        warn!(%document_id, error = %release_err, "failed to release reserved embedding tokens");
                    }
                }
                return Err(e);
            }
        }

        Ok((rows.len(), embeddings_total, embedding_tokens_used))
    }

    async fn embed_all(
        &self,
        workspace_id: Uuid,
        document_id: Uuid,
        rows: &[Chunk],
        outstanding: &mut Vec<i64>,
    ) -> Result<i64> {
        let model = self.embedding_service.model_name().to_string();
        let mut total_tokens = 0i64;

        for row in rows {
            let estimated_tokens = estimate_embedding_tokens(&row.content);

            self.budget.reserve(workspace_id, estimated_tokens).await?;
            outstanding.push(estimated_tokens);

            let embedding = self.embedding_service.embed(&row.content).await?;

            self.repository
                .insert_chunk_embedding(row.id, workspace_id, document_id, Vector::from(embedding.vector), &model)
                .await?;

            let committed = embedding.tokens_embed.min(estimated_tokens);
            self.budget.commit(workspace_id, committed).await?;
            if estimated_tokens > committed {
                self.budget.release(workspace_id, estimated_tokens - committed).await?;
            }
            outstanding.pop();

            total_tokens += committed;
        }

        Ok(total_tokens)
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
