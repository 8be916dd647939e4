use super::models::{
    ChatMessage, ChatSession, Chunk, Document, DocumentPage, RetrievedChunk, Workspace,
    QUERY_LOG_CHAT_MARKER,
};
use super::DbPool;
use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use pgvector::Vector;
use serde_json::json;
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

pub struct Repository {
    pool: DbPool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DocumentProgress {
    pub pages_total: i64,
    pub pages_extracted_count: i64,
    pub chunks_count: i64,
    pub embeddings_count: i64,
}

#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct DailyQueryVolume {
    pub day: NaiveDate,
    pub total: i64,
    pub errors: i64,
}

#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct LatencyStats {
    pub avg_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub sample_count: i64,
}

#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct TopDocument {
    pub document_id: Uuid,
    pub query_count: i64,
}

#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct RecentError {
    pub id: Uuid,
    pub error_message: String,
    pub created_at: DateTime<Utc>,
}

impl Repository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    // ---------------------------------------------------------------- workspaces

    pub async fn create_workspace(&self, owner_id: Uuid, name: &str) -> Result<Workspace> {
        let workspace = sqlx::query_as::<_, Workspace>(
            r#"INSERT INTO workspaces (owner_id, name)
               VALUES ($1, $2)
               RETURNING id, owner_id, name, created_at"#,
        )
        .bind(owner_id)
        .bind(name)
        .fetch_one(self.pool.get())
        .await?;

        Ok(workspace)
    }

    pub async fn get_workspace_by_owner(&self, owner_id: Uuid) -> Result<Option<Workspace>> {
        let workspace = sqlx::query_as::<_, Workspace>(
            "SELECT id, owner_id, name, created_at FROM workspaces WHERE owner_id = $1",
        )
        .bind(owner_id)
        .fetch_optional(self.pool.get())
        .await?;

        Ok(workspace)
    }

    pub async fn get_workspace(&self, workspace_id: Uuid) -> Result<Option<Workspace>> {
        let workspace = sqlx::query_as::<_, Workspace>(
            "SELECT id, owner_id, name, created_at FROM workspaces WHERE id = $1",
        )
        .bind(workspace_id)
        .fetch_optional(self.pool.get())
        .await?;

        Ok(workspace)
    }

    // ----------------------------------------------------------------- documents

    #[allow(clippy::too_many_arguments)]
    pub async fn create_document(
        &self,
        workspace_id: Uuid,
        filename: &str,
        content_type: &str,
        size_bytes: i64,
        bucket: &str,
        storage_path: &str,
        idempotency_key: Option<&str>,
    ) -> Result<Document> {
        let document = sqlx::query_as::<_, Document>(
            r#"INSERT INTO documents
                (workspace_id, filename, content_type, size_bytes, bucket, storage_path, status, idempotency_key)
               VALUES ($1, $2, $3, $4, $5, $6, 'pending_upload', $7)
               RETURNING id, workspace_id, filename, content_type, size_bytes, bucket, storage_path,
                         status, page_count, error_message, idempotency_key, created_at, updated_at"#,
        )
        .bind(workspace_id)
        .bind(filename)
        .bind(content_type)
        .bind(size_bytes)
        .bind(bucket)
        .bind(storage_path)
        .bind(idempotency_key)
        .fetch_one(self.pool.get())
        .await?;

        Ok(document)
    }

    pub async fn find_document_by_idempotency_key(
        &self,
        workspace_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<Document>> {
        let document = sqlx::query_as::<_, Document>(
            r#"SELECT id, workspace_id, filename, content_type, size_bytes, bucket, storage_path,
                      status, page_count, error_message, idempotency_key, created_at, updated_at
               FROM documents
               WHERE workspace_id = $1 AND idempotency_key = $2"#,
        )
        .bind(workspace_id)
        .bind(idempotency_key)
        .fetch_optional(self.pool.get())
        .await?;

        Ok(document)
    }

    pub async fn get_document(
        &self,
        workspace_id: Uuid,
        document_id: Uuid,
    ) -> Result<Option<Document>> {
        let document = sqlx::query_as::<_, Document>(
            r#"SELECT id, workspace_id, filename, content_type, size_bytes, bucket, storage_path,
                      status, page_count, error_message, idempotency_key, created_at, updated_at
               FROM documents
               WHERE id = $1 AND workspace_id = $2"#,
        )
        .bind(document_id)
        .bind(workspace_id)
        .fetch_optional(self.pool.get())
        .await?;

        Ok(document)
    }

    pub async fn count_documents(&self, workspace_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM documents WHERE workspace_id = $1")
            .bind(workspace_id)
            .fetch_one(self.pool.get())
            .await?;
        Ok(count)
    }

    pub async fn list_documents(
        &self,
        workspace_id: Uuid,
        status: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Document>, i64)> {
        let documents = sqlx::query_as::<_, Document>(
            r#"SELECT id, workspace_id, filename, content_type, size_bytes, bucket, storage_path,
                      status, page_count, error_message, idempotency_key, created_at, updated_at
               FROM documents
               WHERE workspace_id = $1 AND ($2::text IS NULL OR status = $2)
               ORDER BY created_at DESC
               LIMIT $3 OFFSET $4"#,
        )
        .bind(workspace_id)
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool.get())
        .await?;

        let total: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM documents WHERE workspace_id = $1 AND ($2::text IS NULL OR status = $2)",
        )
        .bind(workspace_id)
        .bind(status)
        .fetch_one(self.pool.get())
        .await?;

        Ok((documents, total))
    }

    pub async fn documents_by_status(&self, workspace_id: Uuid) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            "SELECT status, count(*) AS c FROM documents WHERE workspace_id = $1 GROUP BY status",
        )
        .bind(workspace_id)
        .fetch_all(self.pool.get())
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| (r.get::<String, _>("status"), r.get::<i64, _>("c")))
            .collect())
    }

    pub async fn update_document_status(
        &self,
        workspace_id: Uuid,
        document_id: Uuid,
        status: &str,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"UPDATE documents
               SET status = $1, error_message = $2, updated_at = now()
               WHERE id = $3 AND workspace_id = $4"#,
        )
        .bind(status)
        .bind(error_message)
        .bind(document_id)
        .bind(workspace_id)
        .execute(self.pool.get())
        .await?;

        Ok(())
    }

    /// Compare-and-swap status transition; returns whether a row was updated.
    pub async fn transition_document_status(
        &self,
        workspace_id: Uuid,
        document_id: Uuid,
        expected_statuses: &[&str],
        new_status: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE documents
               SET status = $1, error_message = NULL, updated_at = now()
               WHERE id = $2 AND workspace_id = $3 AND status = ANY($4)"#,
        )
        .bind(new_status)
        .bind(document_id)
        .bind(workspace_id)
        .bind(expected_statuses)
        .execute(self.pool.get())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn set_document_page_count(
        &self,
        workspace_id: Uuid,
        document_id: Uuid,
        page_count: i32,
    ) -> Result<()> {
        sqlx::query(
            r#"UPDATE documents
               SET page_count = $1, status = 'indexing', error_message = NULL, updated_at = now()
               WHERE id = $2 AND workspace_id = $3"#,
        )
        .bind(page_count)
        .bind(document_id)
        .bind(workspace_id)
        .execute(self.pool.get())
        .await?;

        Ok(())
    }

    pub async fn delete_document(&self, workspace_id: Uuid, document_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = $1 AND workspace_id = $2")
            .bind(document_id)
            .bind(workspace_id)
            .execute(self.pool.get())
            .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn document_progress(
        &self,
        workspace_id: Uuid,
        document_id: Uuid,
    ) -> Result<DocumentProgress> {
        let pages_extracted_count: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM document_pages WHERE workspace_id = $1 AND document_id = $2",
        )
        .bind(workspace_id)
        .bind(document_id)
        .fetch_one(self.pool.get())
        .await?;

        let chunks_count: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM chunks WHERE workspace_id = $1 AND document_id = $2",
        )
        .bind(workspace_id)
        .bind(document_id)
        .fetch_one(self.pool.get())
        .await?;

        let embeddings_count: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM chunk_embeddings WHERE workspace_id = $1 AND document_id = $2",
        )
        .bind(workspace_id)
        .bind(document_id)
        .fetch_one(self.pool.get())
        .await?;

        let pages_total: i64 = sqlx::query_scalar(
            "SELECT page_count FROM documents WHERE id = $1 AND workspace_id = $2",
        )
        .bind(document_id)
        .bind(workspace_id)
        .fetch_optional(self.pool.get())
        .await?
        .unwrap_or(0);

        Ok(DocumentProgress {
            pages_total,
            pages_extracted_count,
            chunks_count,
            embeddings_count,
        })
    }

    // ------------------------------------------------------------ document pages

    pub async fn delete_pages(&self, workspace_id: Uuid, document_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM document_pages WHERE workspace_id = $1 AND document_id = $2")
            .bind(workspace_id)
            .bind(document_id)
            .execute(self.pool.get())
            .await?;
        Ok(())
    }

    pub async fn insert_page(
        &self,
        workspace_id: Uuid,
        document_id: Uuid,
        page_number: i32,
        content: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO document_pages (workspace_id, document_id, page_number, content)
               VALUES ($1, $2, $3, $4)"#,
        )
        .bind(workspace_id)
        .bind(document_id)
        .bind(page_number)
        .bind(content)
        .execute(self.pool.get())
        .await?;
        Ok(())
    }

    pub async fn list_pages_ordered(
        &self,
        workspace_id: Uuid,
        document_id: Uuid,
    ) -> Result<Vec<DocumentPage>> {
        let pages = sqlx::query_as::<_, DocumentPage>(
            r#"SELECT workspace_id, document_id, page_number, content
               FROM document_pages
               WHERE workspace_id = $1 AND document_id = $2
               ORDER BY page_number ASC"#,
        )
        .bind(workspace_id)
        .bind(document_id)
        .fetch_all(self.pool.get())
        .await?;

        Ok(pages)
    }

    pub async fn get_page(
        &self,
        workspace_id: Uuid,
        document_id: Uuid,
        page_number: i32,
    ) -> Result<Option<DocumentPage>> {
        let page = sqlx::query_as::<_, DocumentPage>(
            r#"SELECT workspace_id, document_id, page_number, content
               FROM document_pages
               WHERE workspace_id = $1 AND document_id = $2 AND page_number = $3"#,
        )
        .bind(workspace_id)
        .bind(document_id)
        .bind(page_number)
        .fetch_optional(self.pool.get())
        .await?;

        Ok(page)
    }

    // ------------------------------------------------------------------- chunks

    pub async fn wipe_chunks_and_embeddings(&self, workspace_id: Uuid, document_id: Uuid) -> Result<()> {
        let mut tx = self.pool.get().begin().await?;

        sqlx::query("DELETE FROM chunk_embeddings WHERE workspace_id = $1 AND document_id = $2")
            .bind(workspace_id)
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM chunks WHERE workspace_id = $1 AND document_id = $2")
            .bind(workspace_id)
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn batch_insert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        let mut query_builder = sqlx::QueryBuilder::new(
            "INSERT INTO chunks (id, workspace_id, document_id, page_start, page_end, chunk_index, content, content_hash, token_count) ",
        );

        query_builder.push_values(chunks, |mut b, chunk| {
            b.push_bind(chunk.id)
                .push_bind(chunk.workspace_id)
                .push_bind(chunk.document_id)
                .push_bind(chunk.page_start)
                .push_bind(chunk.page_end)
                .push_bind(chunk.chunk_index)
                .push_bind(&chunk.content)
                .push_bind(&chunk.content_hash)
                .push_bind(chunk.token_count);
        });

        query_builder.build().execute(self.pool.get()).await?;
        debug!("inserted {} chunks", chunks.len());
        Ok(())
    }

    pub async fn insert_chunk_embedding(
        &self,
        chunk_id: Uuid,
        workspace_id: Uuid,
        document_id: Uuid,
        embedding: Vector,
        embedding_model: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO chunk_embeddings (chunk_id, workspace_id, document_id, embedding, embedding_model)
               VALUES ($1, $2, $3, $4, $5)"#,
        )
        .bind(chunk_id)
        .bind(workspace_id)
        .bind(document_id)
        .bind(embedding)
        .bind(embedding_model)
        .execute(self.pool.get())
        .await?;

        Ok(())
    }

    // ---------------------------------------------------------------- retrieval

    /// Cosine-distance top-k over a single document, ascending by distance
    /// (spec §4.2, `original_source/server/app/core/retrieval.py`).
    pub async fn top_k_chunks(
        &self,
        workspace_id: Uuid,
        document_id: Uuid,
        query_embedding: Vector,
        k: i64,
    ) -> Result<Vec<RetrievedChunk>> {
        let rows = sqlx::query_as::<_, RetrievedChunk>(
            r#"SELECT
                c.id AS chunk_id,
                c.document_id AS document_id,
                c.page_start AS page_number,
                c.chunk_index AS chunk_index,
                (ce.embedding <=> $3) AS score,
                c.content AS chunk_text,
                COALESCE(dp.content, c.content) AS page_text,
                c.token_count AS token_count
               FROM chunk_embeddings ce
               JOIN chunks c ON c.id = ce.chunk_id
               LEFT JOIN document_pages dp
                 ON dp.workspace_id = c.workspace_id
                AND dp.document_id = c.document_id
                AND dp.page_number = c.page_start
               WHERE ce.workspace_id = $1 AND ce.document_id = $2
               ORDER BY score ASC, c.chunk_index ASC
               LIMIT $4"#,
        )
        .bind(workspace_id)
        .bind(document_id)
        .bind(query_embedding)
        .bind(k)
        .fetch_all(self.pool.get())
        .await?;

        Ok(rows)
    }

    /// Single chunk lookup, scoped to the workspace (citation detail).
    pub async fn get_chunk(&self, workspace_id: Uuid, chunk_id: Uuid) -> Result<Option<Chunk>> {
        let chunk = sqlx::query_as::<_, Chunk>(
            r#"SELECT id, workspace_id, document_id, page_start, page_end, chunk_index, content, content_hash, token_count
               FROM chunks
               WHERE id = $1 AND workspace_id = $2"#,
        )
        .bind(chunk_id)
        .bind(workspace_id)
        .fetch_optional(self.pool.get())
        .await?;

        Ok(chunk)
    }

    /// Batch chunk lookup, used to resolve page numbers for a query log's
    /// `retrieved_chunk_ids` (spec §4.5, `original_source/server/app/api/queries.py`).
    pub async fn get_chunks_by_ids(&self, workspace_id: Uuid, chunk_ids: &[Uuid]) -> Result<Vec<Chunk>> {
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }

        let chunks = sqlx::query_as::<_, Chunk>(
            r#"SELECT id, workspace_id, document_id, page_start, page_end, chunk_index, content, content_hash, token_count
               FROM chunks
               WHERE workspace_id = $1 AND id = ANY($2)"#,
        )
        .bind(workspace_id)
        .bind(chunk_ids)
        .fetch_all(self.pool.get())
        .await?;

        Ok(chunks)
    }

    // -------------------------------------------------------------- query logs

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_query_log(
        &self,
        workspace_id: Uuid,
        user_id: Uuid,
        document_id: Option<Uuid>,
        query_text: &str,
        documents_searched: &[Uuid],
        retrieved_chunk_ids: &[Uuid],
        chunk_scores: &[f64],
        answer_text: Option<&str>,
        error_message: Option<&str>,
        retrieval_latency_ms: i32,
        llm_latency_ms: Option<i32>,
        total_latency_ms: i32,
        embedding_tokens_used: i32,
        llm_input_tokens: Option<i32>,
        llm_output_tokens: Option<i32>,
        total_tokens_used: i32,
    ) -> Result<Uuid> {
        let id: Uuid = sqlx::query_scalar(
            r#"INSERT INTO query_logs
                (workspace_id, user_id, document_id, query_text, documents_searched,
                 retrieved_chunk_ids, chunk_scores, answer_text, error_message,
                 retrieval_latency_ms, llm_latency_ms, total_latency_ms,
                 embedding_tokens_used, llm_input_tokens, llm_output_tokens, total_tokens_used)
               VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16)
               RETURNING id"#,
        )
        .bind(workspace_id)
        .bind(user_id)
        .bind(document_id)
        .bind(query_text)
        .bind(documents_searched)
        .bind(retrieved_chunk_ids)
        .bind(chunk_scores)
        .bind(answer_text)
        .bind(error_message)
        .bind(retrieval_latency_ms)
        .bind(llm_latency_ms)
        .bind(total_latency_ms)
        .bind(embedding_tokens_used)
        .bind(llm_input_tokens)
        .bind(llm_output_tokens)
        .bind(total_tokens_used)
        .fetch_one(self.pool.get())
        .await?;

        Ok(id)
    }

    pub async fn list_query_logs(
        &self,
        workspace_id: Uuid,
        document_id: Option<Uuid>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<sqlx::postgres::PgRow>, i64)> {
        let rows = sqlx::query(
            r#"SELECT id, document_id, query_text, answer_text, created_at,
                      retrieved_chunk_ids, chunk_scores
               FROM query_logs
               WHERE workspace_id = $1
                 AND COALESCE(error_message, '') <> $2
                 AND ($3::uuid IS NULL OR $3 = ANY(documents_searched))
               ORDER BY created_at DESC
               LIMIT $4 OFFSET $5"#,
        )
        .bind(workspace_id)
        .bind(QUERY_LOG_CHAT_MARKER)
        .bind(document_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool.get())
        .await?;

        let total: i64 = sqlx::query_scalar(
            r#"SELECT count(*) FROM query_logs
               WHERE workspace_id = $1
                 AND COALESCE(error_message, '') <> $2
                 AND ($3::uuid IS NULL OR $3 = ANY(documents_searched))"#,
        )
        .bind(workspace_id)
        .bind(QUERY_LOG_CHAT_MARKER)
        .bind(document_id)
        .fetch_one(self.pool.get())
        .await?;

        Ok((rows, total))
    }

    pub async fn get_query_log(
        &self,
        workspace_id: Uuid,
        query_id: Uuid,
    ) -> Result<Option<sqlx::postgres::PgRow>> {
        let row = sqlx::query(
            r#"SELECT * FROM query_logs
               WHERE id = $1 AND workspace_id = $2 AND COALESCE(error_message, '') <> $3"#,
        )
        .bind(query_id)
        .bind(workspace_id)
        .bind(QUERY_LOG_CHAT_MARKER)
        .fetch_optional(self.pool.get())
        .await?;

        Ok(row)
    }

    /// Daily query volume/error counts over the trailing `days`, oldest first
    /// (`original_source/server/app/api/usage.py`).
    pub async fn daily_query_volume(&self, workspace_id: Uuid, days: i32) -> Result<Vec<DailyQueryVolume>> {
        let rows = sqlx::query_as::<_, DailyQueryVolume>(
            r#"SELECT date_trunc('day', created_at)::date AS day,
                      count(*) AS total,
                      count(*) FILTER (WHERE error_message IS NOT NULL) AS errors
               FROM query_logs
               WHERE workspace_id = $1
                 AND COALESCE(error_message, '') <> $2
                 AND created_at >= now() - ($3 || ' days')::interval
               GROUP BY day
               ORDER BY day ASC"#,
        )
        .bind(workspace_id)
        .bind(QUERY_LOG_CHAT_MARKER)
        .bind(days.to_string())
        .fetch_all(self.pool.get())
        .await?;

        Ok(rows)
    }

    /// Average/p95 latency over the trailing 24 hours.
    pub async fn latency_stats_last_24h(&self, workspace_id: Uuid) -> Result<LatencyStats> {
        let stats = sqlx::query_as::<_, LatencyStats>(
            r#"SELECT
                 avg(total_latency_ms)::float8 AS avg_ms,
                 percentile_cont(0.95) WITHIN GROUP (ORDER BY total_latency_ms)::float8 AS p95_ms,
                 count(*) AS sample_count
               FROM query_logs
               WHERE workspace_id = $1
                 AND COALESCE(error_message, '') <> $2
                 AND created_at >= now() - interval '24 hours'"#,
        )
        .bind(workspace_id)
        .bind(QUERY_LOG_CHAT_MARKER)
        .fetch_one(self.pool.get())
        .await?;

        Ok(stats)
    }

    pub async fn top_documents_by_query_count(&self, workspace_id: Uuid, limit: i64) -> Result<Vec<TopDocument>> {
        let rows = sqlx::query_as::<_, TopDocument>(
            r#"SELECT document_id, count(*) AS query_count
               FROM query_logs
               WHERE workspace_id = $1 AND document_id IS NOT NULL AND COALESCE(error_message, '') <> $2
               GROUP BY document_id
               ORDER BY query_count DESC
               LIMIT $3"#,
        )
        .bind(workspace_id)
        .bind(QUERY_LOG_CHAT_MARKER)
        .bind(limit)
        .fetch_all(self.pool.get())
        .await?;

        Ok(rows)
    }

    pub async fn recent_errors(&self, workspace_id: Uuid, limit: i64) -> Result<Vec<RecentError>> {
        let rows = sqlx::query_as::<_, RecentError>(
            r#"SELECT id, error_message, created_at
               FROM query_logs
               WHERE workspace_id = $1 AND error_message IS NOT NULL AND error_message <> $2
               ORDER BY created_at DESC
               LIMIT $3"#,
        )
        .bind(workspace_id)
        .bind(QUERY_LOG_CHAT_MARKER)
        .bind(limit)
        .fetch_all(self.pool.get())
        .await?;

        Ok(rows)
    }

    // -------------------------------------------------------------- chat sessions

    /// Capability probe: does this workspace's schema carry a dedicated
    /// `chat_sessions` table? Mirrors `_chat_sessions_table_exists` in
    /// `original_source/server/app/api/chats.py`.
    pub async fn chat_sessions_table_exists(&self) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT to_regclass('public.chat_sessions') IS NOT NULL",
        )
        .fetch_one(self.pool.get())
        .await?;

        Ok(exists)
    }

    pub async fn create_chat_session(
        &self,
        workspace_id: Uuid,
        document_id: Option<Uuid>,
        title: &str,
        messages: &[ChatMessage],
    ) -> Result<ChatSession> {
        if self.chat_sessions_table_exists().await? {
            let row = sqlx::query(
                r#"INSERT INTO chat_sessions (workspace_id, document_id, title, messages)
                   VALUES ($1, $2, $3, $4)
                   RETURNING id, workspace_id, document_id, title, started_at, ended_at"#,
            )
            .bind(workspace_id)
            .bind(document_id)
            .bind(title)
            .bind(serde_json::to_value(messages)?)
            .fetch_one(self.pool.get())
            .await?;

            return Ok(ChatSession {
                id: row.get("id"),
                workspace_id: row.get("workspace_id"),
                document_id: row.get("document_id"),
                title: row.get("title"),
                messages: messages.to_vec(),
                started_at: row.get("started_at"),
                ended_at: row.get("ended_at"),
            });
        }

        let payload = json!({
            "messages": messages,
            "started_at": Utc::now(),
            "ended_at": Option::<DateTime<Utc>>::None,
        });

        let id: Uuid = sqlx::query_scalar(
            r#"INSERT INTO query_logs (workspace_id, user_id, document_id, query_text, error_message, answer_text)
               VALUES ($1, $1, $2, $3, $4, $5)
               RETURNING id"#,
        )
        .bind(workspace_id)
        .bind(document_id)
        .bind(title)
        .bind(QUERY_LOG_CHAT_MARKER)
        .bind(payload.to_string())
        .fetch_one(self.pool.get())
        .await?;

        Ok(ChatSession {
            id,
            workspace_id,
            document_id,
            title: title.to_string(),
            messages: messages.to_vec(),
            started_at: Utc::now(),
            ended_at: None,
        })
    }

    pub async fn get_chat_session(
        &self,
        workspace_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<ChatSession>> {
        if self.chat_sessions_table_exists().await? {
            let row = sqlx::query(
                r#"SELECT id, workspace_id, document_id, title, messages, started_at, ended_at
                   FROM chat_sessions WHERE id = $1 AND workspace_id = $2"#,
            )
            .bind(session_id)
            .bind(workspace_id)
            .fetch_optional(self.pool.get())
            .await?;

            return Ok(row.map(|r| {
                let messages: serde_json::Value = r.get("messages");
                ChatSession {
                    id: r.get("id"),
                    workspace_id: r.get("workspace_id"),
                    document_id: r.get("document_id"),
                    title: r.get("title"),
                    messages: serde_json::from_value(messages).unwrap_or_default(),
                    started_at: r.get("started_at"),
                    ended_at: r.get("ended_at"),
                }
            }));
        }

        let row = sqlx::query(
            r#"SELECT id, workspace_id, document_id, query_text, answer_text
               FROM query_logs
               WHERE id = $1 AND workspace_id = $2 AND error_message = $3"#,
        )
        .bind(session_id)
        .bind(workspace_id)
        .bind(QUERY_LOG_CHAT_MARKER)
        .fetch_optional(self.pool.get())
        .await?;

        Ok(row.map(|r| {
            let payload: serde_json::Value = r
                .get::<Option<String>, _>("answer_text")
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_else(|| json!({"messages": []}));

            ChatSession {
                id: r.get("id"),
                workspace_id: r.get("workspace_id"),
                document_id: r.get("document_id"),
                title: r.get("query_text"),
                messages: serde_json::from_value(payload["messages"].clone()).unwrap_or_default(),
                started_at: Utc::now(),
                ended_at: None,
            }
        }))
    }

    pub async fn update_chat_session(
        &self,
        workspace_id: Uuid,
        session_id: Uuid,
        title: Option<&str>,
        messages: Option<&[ChatMessage]>,
        ended: bool,
    ) -> Result<bool> {
        if self.chat_sessions_table_exists().await? {
            let result = sqlx::query(
                r#"UPDATE chat_sessions
                   SET title = COALESCE($1, title),
                       messages = COALESCE($2, messages),
                       ended_at = CASE WHEN $3 THEN now() ELSE ended_at END,
                       updated_at = now()
                   WHERE id = $4 AND workspace_id = $5"#,
            )
            .bind(title)
            .bind(messages.map(serde_json::to_value).transpose()?)
            .bind(ended)
            .bind(session_id)
            .bind(workspace_id)
            .execute(self.pool.get())
            .await?;

            return Ok(result.rows_affected() == 1);
        }

        let result = sqlx::query(
            r#"UPDATE query_logs
               SET query_text = COALESCE($1, query_text),
                   answer_text = COALESCE($2, answer_text)
               WHERE id = $3 AND workspace_id = $4 AND error_message = $5"#,
        )
        .bind(title)
        .bind(
            messages
                .map(|m| json!({"messages": m}).to_string()),
        )
        .bind(session_id)
        .bind(workspace_id)
        .bind(QUERY_LOG_CHAT_MARKER)
        .execute(self.pool.get())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn list_chat_sessions(&self, workspace_id: Uuid) -> Result<Vec<ChatSession>> {
        if self.chat_sessions_table_exists().await? {
            let rows = sqlx::query(
                r#"SELECT id, workspace_id, document_id, title, messages, started_at, ended_at
                   FROM chat_sessions WHERE workspace_id = $1 ORDER BY started_at DESC"#,
            )
            .bind(workspace_id)
            .fetch_all(self.pool.get())
            .await?;

            return Ok(rows
                .into_iter()
                .map(|r| {
                    let messages: serde_json::Value = r.get("messages");
                    ChatSession {
                        id: r.get("id"),
                        workspace_id: r.get("workspace_id"),
                        document_id: r.get("document_id"),
                        title: r.get("title"),
                        messages: serde_json::from_value(messages).unwrap_or_default(),
                        started_at: r.get("started_at"),
                        ended_at: r.get("ended_at"),
                    }
                })
                .collect());
        }

        let rows = sqlx::query(
            r#"SELECT id, workspace_id, document_id, query_text, answer_text, created_at
               FROM query_logs
               WHERE workspace_id = $1 AND error_message = $2
               ORDER BY created_at DESC"#,
        )
        .bind(workspace_id)
        .bind(QUERY_LOG_CHAT_MARKER)
        .fetch_all(self.pool.get())
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                let payload: serde_json::Value = r
                    .get::<Option<String>, _>("answer_text")
                    .and_then(|s| serde_json::from_str(&s).ok())
                    .unwrap_or_else(|| json!({"messages": []}));

                ChatSession {
                    id: r.get("id"),
                    workspace_id: r.get("workspace_id"),
                    document_id: r.get("document_id"),
                    title: r.get("query_text"),
                    messages: serde_json::from_value(payload["messages"].clone()).unwrap_or_default(),
                    started_at: r.get("created_at"),
                    ended_at: None,
                }
            })
            .collect())
    }
}
