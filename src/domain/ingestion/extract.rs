use crate::database::Repository;
use crate::queue::{IngestJob, JobQueue};
use crate::storage::ObjectStore;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Downloads the source PDF, extracts per-page text with `lopdf`, and hands
/// the document off to indexing. Ported from
/// `original_source/worker/jobs/ingest_extract.py::ingest_extract`.
pub struct ExtractJob {
    repository: Arc<Repository>,
    object_store: Arc<dyn ObjectStore>,
    queue: Arc<dyn JobQueue>,
}

impl ExtractJob {
    pub fn new(repository: Arc<Repository>, object_store: Arc<dyn ObjectStore>, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            repository,
            object_store,
            queue,
        }
    }

    pub async fn run(&self, workspace_id: Uuid, document_id: Uuid) -> Result<()> {
        let document = self
            .repository
            .get_document(workspace_id, document_id)
            .await?
            .context("document not found for extraction")?;

        self.repository
            .transition_document_status(
                workspace_id,
                document_id,
                &["uploaded", "pending_upload"],
                "extracting",
            )
            .await?;

        match self.extract(workspace_id, document_id, &document.bucket, &document.storage_path).await {
            Ok(pages_total) => {
                self.repository
                    .set_document_page_count(workspace_id, document_id, pages_total)
                    .await?;

                self.queue
                    .enqueue(IngestJob::Index { workspace_id, document_id })
                    .await?;

                info!(%document_id, pages_total, "extraction complete, queued for indexing");
                Ok(())
            }
            Err(e) => {
                warn!(%document_id, error = %e, "extraction failed");
                self.repository
                    .update_document_status(
                        workspace_id,
                        document_id,
                        "failed",
                        Some(&truncate(&e.to_string(), 2000)),
                    )
                    .await?;
                Err(e)
            }
        }
    }

    async fn extract(&self, workspace_id: Uuid, document_id: Uuid, bucket: &str, storage_path: &str) -> Result<i32> {
        let bytes = self.object_store.get_object(bucket, storage_path).await?;
        let pdf = lopdf::Document::load_mem(&bytes).context("failed to parse PDF")?;
        let page_numbers: Vec<u32> = pdf.get_pages().keys().copied().collect();
        let pages_total = page_numbers.len() as i32;

        self.repository.delete_pages(workspace_id, document_id).await?;

        let mut sorted_pages = page_numbers;
        sorted_pages.sort_unstable();
        for (index, page_number) in sorted_pages.iter().enumerate() {
            let text = pdf.extract_text(&[*page_number]).unwrap_or_default();
            self.repository
                .insert_page(workspace_id, document_id, (index + 1) as i32, &text)
                .await?;
        }

        Ok(pages_total)
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
