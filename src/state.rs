use std::sync::Arc;

use crate::auth::JwtManager;
use crate::config::Settings;
use crate::database::{DbPool, Repository};
use crate::domain::answerer::Answerer;
use crate::domain::budget::BudgetLedger;
use crate::domain::ingestion::{ExtractJob, IndexJob};
use crate::domain::lifecycle::DocumentLifecycle;
use crate::domain::query_pipeline::QueryPipeline;
use crate::domain::retriever::Retriever;
use crate::queue::JobQueue;
use crate::rate_limit::RateLimiter;
use crate::security::{CustomHeaderValidator, IpWhitelist, WorkspaceAuthorization};
use crate::services::EmbeddingService;
use crate::storage::ObjectStore;
use crate::utils::limiters::Limiters;

/// Embedding batch size for ingestion; the donor hardcoded this rather than
/// exposing it as a tunable.
const EMBEDDING_BATCH_SIZE: usize = 16;

/// Application state shared across handlers and the worker binary.
#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub db_pool: DbPool,
    pub repository: Arc<Repository>,
    pub embedding_service: Arc<EmbeddingService>,
    pub budget: Arc<BudgetLedger>,
    pub retriever: Arc<Retriever>,
    pub answerer: Arc<Answerer>,
    pub query_pipeline: Arc<QueryPipeline>,
    pub lifecycle: Arc<DocumentLifecycle>,
    pub extract_job: Arc<ExtractJob>,
    pub index_job: Arc<IndexJob>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub queue: Arc<dyn JobQueue>,
    pub object_store: Arc<dyn ObjectStore>,
    pub authorization: Arc<WorkspaceAuthorization>,
    pub jwt_manager: Arc<JwtManager>,
    pub ip_whitelist: Arc<IpWhitelist>,
    pub header_validator: Arc<CustomHeaderValidator>,
    pub limiters: Arc<Limiters>,
}

impl AppState {
    pub async fn build(settings: Settings) -> anyhow::Result<Self> {
        let db_pool = DbPool::new(&settings.database).await?;
        let repository = Arc::new(Repository::new(db_pool.clone()));
        let limiters = Arc::new(Limiters::new(&settings.limits));

        let embedding_service = Arc::new(EmbeddingService::new(
            settings.embedding.base_url.clone(),
            settings.embedding.clone(),
            limiters.clone(),
            EMBEDDING_BATCH_SIZE,
        ));

        let budget = Arc::new(BudgetLedger::new(db_pool.clone(), settings.budget.daily_token_limit));
        let retriever = Arc::new(Retriever::new(
            repository.clone(),
            embedding_service.clone(),
            limiters.clone(),
            settings.rag.top_k as i64,
        ));
        let answerer = Arc::new(Answerer::new(settings.llm.clone(), limiters.clone()));

        let rate_limiter: Arc<dyn RateLimiter> = Arc::new(crate::rate_limit::RedisRateLimiter::new(&settings.redis.url)?);
        let queue: Arc<dyn JobQueue> = Arc::new(crate::queue::RedisJobQueue::new(&settings.redis.url, "ingest")?);
        let object_store: Arc<dyn ObjectStore> = Arc::new(crate::storage::HttpObjectStore::new(settings.storage.base_url.clone()));

        let query_pipeline = Arc::new(QueryPipeline::new(
            repository.clone(),
            retriever.clone(),
            answerer.clone(),
            budget.clone(),
            rate_limiter.clone(),
            settings.rag.clone(),
            settings.llm.max_output_tokens as i64,
            settings.rate_limits.query_limit,
            settings.rate_limits.query_window_seconds,
        ));

        let lifecycle = Arc::new(DocumentLifecycle::new(
            repository.clone(),
            object_store.clone(),
            queue.clone(),
            rate_limiter.clone(),
            settings.limits.clone(),
            settings.rate_limits.clone(),
            settings.storage.clone(),
        ));

        let extract_job = Arc::new(ExtractJob::new(repository.clone(), object_store.clone(), queue.clone()));
        let index_job = Arc::new(IndexJob::new(repository.clone(), embedding_service.clone(), budget.clone()));

        let authorization = Arc::new(WorkspaceAuthorization::new(repository.clone()));
        let jwt_manager = Arc::new(JwtManager::new(&settings.auth.jwt_secret, settings.auth.jwt_expiration_seconds));

        let ip_whitelist = Arc::new(IpWhitelist::new(
            settings.config_path(),
            settings.security.allowed_ips.clone(),
        )?);
        let header_validator = Arc::new(CustomHeaderValidator::new(
            settings.security.custom_headers.app_id.clone(),
            settings.security.custom_headers.api_key.clone(),
            !settings.security.custom_headers.request_signature.is_empty(),
            settings.security.custom_headers.timestamp_tolerance,
        ));

        Ok(Self {
            settings,
            db_pool,
            repository,
            embedding_service,
            budget,
            retriever,
            answerer,
            query_pipeline,
            lifecycle,
            extract_job,
            index_job,
            rate_limiter,
            queue,
            object_store,
            authorization,
            jwt_manager,
            ip_whitelist,
            header_validator,
            limiters,
        })
    }
}
