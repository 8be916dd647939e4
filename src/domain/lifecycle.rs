use crate::config::{LimitsConfig, RateLimitConfig, StorageConfig};
use crate::database::models::Document;
use crate::database::Repository;
use crate::queue::{IngestJob, JobQueue};
use crate::rate_limit::RateLimiter;
use crate::storage::ObjectStore;
use crate::utils::error::ApiError;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

pub struct UploadPrepared {
    pub document: Document,
    pub upload_url: String,
}

/// Upload-prepare/-complete/delete/retry/reindex state machine (spec §4.6).
pub struct DocumentLifecycle {
    repository: Arc<Repository>,
    object_store: Arc<dyn ObjectStore>,
    queue: Arc<dyn JobQueue>,
    rate_limiter: Arc<dyn RateLimiter>,
    limits: LimitsConfig,
    rate_limits: RateLimitConfig,
    storage: StorageConfig,
}

impl DocumentLifecycle {
    pub fn new(
        repository: Arc<Repository>,
        object_store: Arc<dyn ObjectStore>,
        queue: Arc<dyn JobQueue>,
        rate_limiter: Arc<dyn RateLimiter>,
        limits: LimitsConfig,
        rate_limits: RateLimitConfig,
        storage: StorageConfig,
    ) -> Self {
        Self {
            repository,
            object_store,
            queue,
            rate_limiter,
            limits,
            rate_limits,
            storage,
        }
    }

    pub async fn prepare_upload(
        &self,
        workspace_id: Uuid,
        filename: &str,
        content_type: &str,
        size_bytes: i64,
        idempotency_key: Option<&str>,
    ) -> Result<UploadPrepared, ApiError> {
        self.rate_limiter
            .check(
                &format!("rate_limit:documents_upload_prepare:{workspace_id}"),
                self.rate_limits.upload_prepare_limit,
                self.rate_limits.upload_prepare_window_seconds,
            )
            .await?;

        if !self.limits.allowed_content_types.iter().any(|t| t == content_type) {
            return Err(ApiError::Validation(format!("unsupported content type: {content_type}")));
        }
        if size_bytes <= 0 || size_bytes as u64 > self.limits.max_file_size_bytes {
            return Err(ApiError::Validation(format!(
                "file size must be between 1 and {} bytes",
                self.limits.max_file_size_bytes
            )));
        }

        if self.repository.count_documents(workspace_id).await? >= self.limits.max_documents_per_workspace {
            return Err(ApiError::Conflict("workspace has reached its document limit".to_string()));
        }

        if let Some(key) = idempotency_key {
            if let Some(existing) = self.repository.find_document_by_idempotency_key(workspace_id, key).await? {
                return self.resume_or_conflict(existing).await;
            }
        }

        let sanitized = sanitize_filename(filename).ok_or_else(|| ApiError::Validation("filename is empty after sanitization".to_string()))?;
        let document_id = Uuid::new_v4();
        let storage_path = format!("{workspace_id}/{document_id}/{sanitized}");

        let document = match self
            .repository
            .create_document(workspace_id, &sanitized, content_type, size_bytes, &self.storage.bucket, &storage_path, idempotency_key)
            .await
        {
            Ok(document) => document,
            Err(e) if is_unique_violation(&e) && idempotency_key.is_some() => {
                let key = idempotency_key.expect("checked above");
                self.repository
                    .find_document_by_idempotency_key(workspace_id, key)
                    .await?
                    .ok_or(ApiError::Conflict("lost the idempotency race but the winner's row is missing".to_string()))?
            }
            Err(e) => return Err(e.into()),
        };

        let upload_url = self
            .object_store
            .presign_upload(&document.bucket, &document.storage_path, self.storage.upload_url_expires_seconds);

        Ok(UploadPrepared { document, upload_url })
    }

    async fn resume_or_conflict(&self, existing: Document) -> Result<UploadPrepared, ApiError> {
        if matches!(existing.status.as_str(), "pending_upload" | "uploading") {
            let upload_url = self.object_store.presign_upload(
                &existing.bucket,
                &existing.storage_path,
                self.storage.upload_url_expires_seconds,
            );
            return Ok(UploadPrepared { document: existing, upload_url });
        }
        Err(ApiError::Conflict("a document with this idempotency key has already progressed past upload".to_string()))
    }

    pub async fn complete_upload(&self, workspace_id: Uuid, document_id: Uuid, bucket: &str, storage_path: &str) -> Result<Document, ApiError> {
        let document = self
            .repository
            .get_document(workspace_id, document_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("document not found".to_string()))?;

        if document.bucket != bucket || document.storage_path != storage_path {
            return Err(ApiError::Validation("bucket/storage_path do not match the prepared upload".to_string()));
        }
        if !matches!(document.status.as_str(), "uploading" | "pending_upload") {
            return Err(ApiError::Conflict("document is not awaiting upload completion".to_string()));
        }
        if !self.object_store.object_exists(bucket, storage_path).await? {
            return Err(ApiError::Conflict("uploaded object was not found in storage".to_string()));
        }

        let transitioned = self
            .repository
            .transition_document_status(workspace_id, document_id, &["uploading", "pending_upload"], "uploaded")
            .await?;
        if !transitioned {
            return Err(ApiError::Conflict("document status changed concurrently".to_string()));
        }

        self.queue.enqueue(IngestJob::Extract { workspace_id, document_id }).await?;

        self.repository
            .get_document(workspace_id, document_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("document not found".to_string()))
    }

    pub async fn delete(&self, workspace_id: Uuid, document_id: Uuid) -> Result<(), ApiError> {
        let document = self
            .repository
            .get_document(workspace_id, document_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("document not found".to_string()))?;

        if !self.repository.delete_document(workspace_id, document_id).await? {
            return Err(ApiError::NotFound("document not found".to_string()));
        }

        if let Err(e) = self.object_store.delete_object(&document.bucket, &document.storage_path).await {
            warn!(%document_id, error = %e, "best-effort storage delete failed");
        }

        Ok(())
    }

    pub async fn retry(&self, workspace_id: Uuid, document_id: Uuid) -> Result<(), ApiError> {
        let transitioned = self
            .repository
            .transition_document_status(workspace_id, document_id, &["failed"], "uploaded")
            .await?;
        if !transitioned {
            return Err(ApiError::Conflict("document is not in a failed state".to_string()));
        }

        self.queue.enqueue(IngestJob::Extract { workspace_id, document_id }).await?;
        Ok(())
    }

    pub async fn reindex(&self, workspace_id: Uuid, document_id: Uuid) -> Result<(), ApiError> {
        let document = self
            .repository
            .get_document(workspace_id, document_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("document not found".to_string()))?;

        let expected: &[&str] = &["ready", "indexed", "failed"];
        if document.page_count > 0 {
            let transitioned = self.repository.transition_document_status(workspace_id, document_id, expected, "indexing").await?;
            if !transitioned {
                return Err(ApiError::Conflict("document status changed concurrently".to_string()));
            }
            self.queue.enqueue(IngestJob::Index { workspace_id, document_id }).await?;
        } else {
            let transitioned = self.repository.transition_document_status(workspace_id, document_id, expected, "uploaded").await?;
            if !transitioned {
                return Err(ApiError::Conflict("document status changed concurrently".to_string()));
            }
            self.queue.enqueue(IngestJob::Extract { workspace_id, document_id }).await?;
        }

        Ok(())
    }
}

/// Basename, keep `[A-Za-z0-9._-]`, collapse `_`, strip leading/trailing `_`.
fn sanitize_filename(filename: &str) -> Option<String> {
    let basename = filename.rsplit(['/', '\\']).next().unwrap_or(filename);

    let mut sanitized = String::with_capacity(basename.len());
    let mut last_was_underscore = false;
    for ch in basename.chars() {
        let mapped = if ch.is_ascii_alphanumeric() || ch == '.' || ch == '-' {
            ch
        } else {
            '_'
        };
        if mapped == '_' {
            if last_was_underscore {
                continue;
            }
            last_was_underscore = true;
        } else {
            last_was_underscore = false;
        }
        sanitized.push(mapped);
    }

    let trimmed = sanitized.trim_matches('_');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn is_unique_violation(e: &anyhow::Error) -> bool {
    e.downcast_ref::<sqlx::Error>()
        .and_then(|e| e.as_database_error())
        .map(|e| e.code().as_deref() == Some("23505"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_filename_keeps_allowed_characters_and_collapses_underscores() {
        assert_eq!(sanitize_filename("My Report (final)!!.pdf").as_deref(), Some("My_Report_final_.pdf"));
    }

    #[test]
    fn sanitize_filename_strips_path_components() {
        assert_eq!(sanitize_filename("../../etc/passwd").as_deref(), Some("passwd"));
    }

    #[test]
    fn sanitize_filename_rejects_all_punctuation() {
        assert_eq!(sanitize_filename("***"), None);
    }
}
