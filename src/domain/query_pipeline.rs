use super::answerer::{Answerer, StreamEvent};
use super::budget::BudgetLedger;
use super::prompts::INSUFFICIENT_CONTEXT_MESSAGE;
use super::retriever::Retriever;
use crate::config::RagConfig;
use crate::database::models::QUERY_LOG_CHAT_MARKER;
use crate::database::Repository;
use crate::rate_limit::RateLimiter;
use crate::utils::error::{ApiError, BudgetSnapshot};
use crate::utils::token_estimator::{estimate_llm_input_tokens, estimate_query_tokens};
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    pub document_id: Uuid,
    pub page_number: i32,
    pub chunk_id: Uuid,
    pub score: f64,
    pub snippet: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub usage: BudgetSnapshot,
}

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Meta { request_id: Uuid, document_id: Uuid, top_k: usize },
    Delta(String),
    Citations(Vec<Citation>),
    Usage(BudgetSnapshot),
    Done,
    Error { code: &'static str, message: String },
}

/// Releases an outstanding reservation if the pipeline exits (error or a
/// dropped SSE stream) before the reservation is explicitly committed.
struct ReservationGuard {
    budget: Arc<BudgetLedger>,
    workspace_id: Uuid,
    remaining: i64,
}

impl ReservationGuard {
    fn defuse(&mut self) {
        self.remaining = 0;
    }
}

impl Drop for ReservationGuard {
    fn drop(&mut self) {
        if self.remaining <= 0 {
            return;
        }
        let budget = self.budget.clone();
        let workspace_id = self.workspace_id;
        let amount = self.remaining;
        tokio::spawn(async move {
            if let Err(e) = budget.release(workspace_id, amount).await {
                warn!(error = %e, "failed to release abandoned token reservation");
            }
        });
    }
}

pub struct QueryPipeline {
    repository: Arc<Repository>,
    retriever: Arc<Retriever>,
    answerer: Arc<Answerer>,
    budget: Arc<BudgetLedger>,
    rate_limiter: Arc<dyn RateLimiter>,
    rag: RagConfig,
    llm_max_output_tokens: i64,
    query_rate_limit: u32,
    query_rate_window_seconds: u64,
}

#[allow(clippy::too_many_arguments)]
impl QueryPipeline {
    pub fn new(
        repository: Arc<Repository>,
        retriever: Arc<Retriever>,
        answerer: Arc<Answerer>,
        budget: Arc<BudgetLedger>,
        rate_limiter: Arc<dyn RateLimiter>,
        rag: RagConfig,
        llm_max_output_tokens: i64,
        query_rate_limit: u32,
        query_rate_window_seconds: u64,
    ) -> Self {
        Self {
            repository,
            retriever,
            answerer,
            budget,
            rate_limiter,
            rag,
            llm_max_output_tokens,
            query_rate_limit,
            query_rate_window_seconds,
        }
    }

    async fn enforce_rate_limit(&self, workspace_id: Uuid) -> Result<(), ApiError> {
        let key = format!("rate_limit:query:{workspace_id}");
        self.rate_limiter
            .check(&key, self.query_rate_limit, self.query_rate_window_seconds)
            .await
    }

    fn validate_question(&self, question: &str) -> Result<String, ApiError> {
        let question = question.trim().to_string();
        if question.is_empty() || question.chars().count() > self.rag.max_question_chars {
            return Err(ApiError::Validation(format!(
                "question must be between 1 and {} characters",
                self.rag.max_question_chars
            )));
        }
        Ok(question)
    }

    async fn require_ready_document(
        &self,
        workspace_id: Uuid,
        document_id: Uuid,
    ) -> Result<(), ApiError> {
        let document = self
            .repository
            .get_document(workspace_id, document_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("document not found".to_string()))?;

        if document.status != "ready" {
            return Err(ApiError::Conflict("document is not ready for querying".to_string()));
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn log_query(
        &self,
        workspace_id: Uuid,
        user_id: Uuid,
        document_id: Uuid,
        question: &str,
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
    ) {
        if !self.rag.log_each_query {
            return;
        }

        if let Err(e) = self
            .repository
            .insert_query_log(
                workspace_id,
                user_id,
                Some(document_id),
                question,
                &[document_id],
                retrieved_chunk_ids,
                chunk_scores,
                answer_text,
                error_message,
                retrieval_latency_ms,
                llm_latency_ms,
                total_latency_ms,
                embedding_tokens_used,
                llm_input_tokens,
                llm_output_tokens,
                total_tokens_used,
            )
            .await
        {
            error!(error = %e, "failed to persist query log");
        }
    }

    pub async fn run_query(
        &self,
        workspace_id: Uuid,
        user_id: Uuid,
        document_id: Uuid,
        question: &str,
    ) -> Result<QueryOutcome, ApiError> {
        self.enforce_rate_limit(workspace_id).await?;
        let question = self.validate_question(question)?;
        self.require_ready_document(workspace_id, document_id).await?;

        let request_started = Instant::now();
        let retrieval_started = Instant::now();
        let (chunks, _query_embedding, embedding_tokens) =
            self.retriever.retrieve(workspace_id, document_id, &question).await?;
        let retrieval_latency_ms = retrieval_started.elapsed().as_millis() as i32;

        let estimated_total = estimate_query_tokens(&question)
            + estimate_llm_input_tokens(&question, &chunks)
            + self.llm_max_output_tokens;

        let mut guard = ReservationGuard {
            budget: self.budget.clone(),
            workspace_id,
            remaining: 0,
        };

        self.budget.reserve(workspace_id, estimated_total).await?;
        guard.remaining = estimated_total;

        if chunks.is_empty() {
            let committed = embedding_tokens.min(estimated_total);
            let usage_now = self.budget.commit(workspace_id, committed).await?;
            if estimated_total > committed {
                self.budget.release(workspace_id, estimated_total - committed).await?;
            }
            guard.defuse();

            let total_latency_ms = request_started.elapsed().as_millis() as i32;
            self.log_query(
                workspace_id,
                user_id,
                document_id,
                &question,
                &[],
                &[],
                Some(INSUFFICIENT_CONTEXT_MESSAGE),
                None,
                retrieval_latency_ms,
                None,
                total_latency_ms,
                embedding_tokens as i32,
                None,
                None,
                committed as i32,
            )
            .await;

            return Ok(QueryOutcome {
                answer: INSUFFICIENT_CONTEXT_MESSAGE.to_string(),
                citations: vec![],
                usage: usage_now,
            });
        }

        let llm_started = Instant::now();
        let llm_result = match self.answerer.answer(&question, &chunks).await {
            Ok(result) => result,
            Err(e) => {
                drop(guard);
                return Err(ApiError::Upstream(e.to_string()));
            }
        };
        let llm_latency_ms = llm_started.elapsed().as_millis() as i32;

        let answer_text = if llm_result.answer.is_empty() {
            INSUFFICIENT_CONTEXT_MESSAGE.to_string()
        } else {
            llm_result.answer.clone()
        };

        let actual_total = embedding_tokens + llm_result.total_tokens as i64;
        let committed = actual_total.min(estimated_total);
        let usage_now = self.budget.commit(workspace_id, committed).await?;
        if estimated_total > committed {
            self.budget.release(workspace_id, estimated_total - committed).await?;
        }
        guard.defuse();

        let citations: Vec<Citation> = chunks
            .iter()
            .map(|c| Citation {
                document_id: c.document_id,
                page_number: c.page_number,
                chunk_id: c.chunk_id,
                score: c.score,
                snippet: c.snippet(),
            })
            .collect();

        let total_latency_ms = request_started.elapsed().as_millis() as i32;
        self.log_query(
            workspace_id,
            user_id,
            document_id,
            &question,
            &chunks.iter().map(|c| c.chunk_id).collect::<Vec<_>>(),
            &chunks.iter().map(|c| c.score).collect::<Vec<_>>(),
            Some(&answer_text),
            None,
            retrieval_latency_ms,
            Some(llm_latency_ms),
            total_latency_ms,
            embedding_tokens as i32,
            Some(llm_result.input_tokens),
            Some(llm_result.output_tokens),
            committed as i32,
        )
        .await;

        Ok(QueryOutcome {
            answer: answer_text,
            citations,
            usage: usage_now,
        })
    }

    pub fn run_query_stream(
        self: Arc<Self>,
        workspace_id: Uuid,
        user_id: Uuid,
        document_id: Uuid,
        question: String,
    ) -> Pin<Box<dyn Stream<Item = PipelineEvent> + Send>> {
        let stream = async_stream::stream! {
            let request_id = Uuid::new_v4();

            if let Err(e) = self.enforce_rate_limit(workspace_id).await {
                yield PipelineEvent::Error { code: error_code(&e), message: e.to_string() };
                return;
            }

            let question = match self.validate_question(&question) {
                Ok(q) => q,
                Err(e) => {
                    yield PipelineEvent::Error { code: error_code(&e), message: e.to_string() };
                    return;
                }
            };

            if let Err(e) = self.require_ready_document(workspace_id, document_id).await {
                yield PipelineEvent::Error { code: error_code(&e), message: e.to_string() };
                return;
            }

            let request_started = Instant::now();
            let retrieval_started = Instant::now();
            let (chunks, _query_embedding, embedding_tokens) = match self.retriever.retrieve(workspace_id, document_id, &question).await {
                Ok(r) => r,
                Err(e) => {
                    yield PipelineEvent::Error { code: "RETRIEVAL_FAILED", message: e.to_string() };
                    return;
                }
            };
            let retrieval_latency_ms = retrieval_started.elapsed().as_millis() as i32;

            let estimated_total = estimate_query_tokens(&question)
                + estimate_llm_input_tokens(&question, &chunks)
                + self.llm_max_output_tokens;

            let mut guard = ReservationGuard { budget: self.budget.clone(), workspace_id, remaining: 0 };

            if let Err(e) = self.budget.reserve(workspace_id, estimated_total).await {
                yield PipelineEvent::Error { code: error_code(&e), message: e.to_string() };
                return;
            }
            guard.remaining = estimated_total;

            yield PipelineEvent::Meta { request_id, document_id, top_k: self.rag.top_k };

            if chunks.is_empty() {
                yield PipelineEvent::Delta(INSUFFICIENT_CONTEXT_MESSAGE.to_string());

                let committed = embedding_tokens.min(estimated_total);
                let usage_now = match self.budget.commit(workspace_id, committed).await {
                    Ok(u) => u,
                    Err(e) => {
                        yield PipelineEvent::Error { code: error_code(&e), message: e.to_string() };
                        return;
                    }
                };
                if estimated_total > committed {
                    let _ = self.budget.release(workspace_id, estimated_total - committed).await;
                }
                guard.defuse();

                let total_latency_ms = request_started.elapsed().as_millis() as i32;
                self.log_query(
                    workspace_id, user_id, document_id, &question, &[], &[],
                    Some(INSUFFICIENT_CONTEXT_MESSAGE), None, retrieval_latency_ms, None,
                    total_latency_ms, embedding_tokens as i32, None, None, committed as i32,
                ).await;

                yield PipelineEvent::Citations(vec![]);
                yield PipelineEvent::Usage(usage_now);
                yield PipelineEvent::Done;
                return;
            }

            let llm_started = Instant::now();
            let mut answer_stream = match self.answerer.stream_answer(&question, &chunks).await {
                Ok(s) => s,
                Err(e) => {
                    drop(guard);
                    yield PipelineEvent::Error { code: "LLM_FAILED", message: e.to_string() };
                    return;
                }
            };

            let mut final_result = None;
            while let Some(event) = answer_stream.next().await {
                match event {
                    Ok(StreamEvent::Delta(text)) => yield PipelineEvent::Delta(text),
                    Ok(StreamEvent::Done(result)) => final_result = Some(result),
                    Err(e) => {
                        drop(guard);
                        yield PipelineEvent::Error { code: "LLM_FAILED", message: e.to_string() };
                        return;
                    }
                }
            }
            let llm_latency_ms = llm_started.elapsed().as_millis() as i32;

            let Some(llm_result) = final_result else {
                drop(guard);
                yield PipelineEvent::Error { code: "LLM_FAILED", message: "stream ended without a result".to_string() };
                return;
            };

            let answer_text = if llm_result.answer.is_empty() {
                INSUFFICIENT_CONTEXT_MESSAGE.to_string()
            } else {
                llm_result.answer.clone()
            };

            let actual_total = embedding_tokens + llm_result.total_tokens as i64;
            let committed = actual_total.min(estimated_total);
            let usage_now = match self.budget.commit(workspace_id, committed).await {
                Ok(u) => u,
                Err(e) => {
                    yield PipelineEvent::Error { code: error_code(&e), message: e.to_string() };
                    return;
                }
            };
            if estimated_total > committed {
                let _ = self.budget.release(workspace_id, estimated_total - committed).await;
            }
            guard.defuse();

            let citations: Vec<Citation> = chunks.iter().map(|c| Citation {
                document_id: c.document_id,
                page_number: c.page_number,
                chunk_id: c.chunk_id,
                score: c.score,
                snippet: c.snippet(),
            }).collect();

            let total_latency_ms = request_started.elapsed().as_millis() as i32;
            self.log_query(
                workspace_id, user_id, document_id, &question,
                &chunks.iter().map(|c| c.chunk_id).collect::<Vec<_>>(),
                &chunks.iter().map(|c| c.score).collect::<Vec<_>>(),
                Some(&answer_text), None, retrieval_latency_ms, Some(llm_latency_ms),
                total_latency_ms, embedding_tokens as i32,
                Some(llm_result.input_tokens), Some(llm_result.output_tokens), committed as i32,
            ).await;

            yield PipelineEvent::Citations(citations);
            yield PipelineEvent::Usage(usage_now);
            yield PipelineEvent::Done;
        };

        Box::pin(stream)
    }
}

fn error_code(e: &ApiError) -> &'static str {
    match e {
        ApiError::Validation(_) => "INVALID_QUESTION",
        ApiError::NotFound(_) => "DOCUMENT_NOT_FOUND",
        ApiError::Conflict(_) => "DOCUMENT_NOT_READY",
        ApiError::BudgetExceeded(_) => "BUDGET_EXCEEDED",
        ApiError::InvalidReservation => "INVALID_RESERVATION",
        ApiError::RateLimited => "RATE_LIMITED",
        ApiError::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
        ApiError::Upstream(_) => "QUERY_FAILED",
        ApiError::Unauthorized => "UNAUTHORIZED",
        ApiError::Forbidden(_) => "FORBIDDEN",
        ApiError::Internal(_) => "QUERY_FAILED",
    }
}

/// Sentinel used when a chat turn reuses the query pipeline but should not
/// surface in `/queries` history (spec §9).
pub const CHAT_TURN_MARKER: &str = QUERY_LOG_CHAT_MARKER;
