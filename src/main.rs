use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Extension, Router,
};
use std::net::SocketAddr;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::info;

use rag_platform::config::Settings;
use rag_platform::state::AppState;
use rag_platform::{handlers, security};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info,rag_platform=debug".to_string()))
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .init();

    info!("starting RAG API server");

    let settings = Settings::load()?;
    info!("configuration loaded");

    let state = AppState::build(settings).await?;
    info!("application state built");

    (*state.ip_whitelist).clone().start_watcher()?;
    info!("IP whitelist watcher started");

    let addr = SocketAddr::from((
        state.settings.server.host.parse::<std::net::IpAddr>()?,
        state.settings.server.port,
    ));

    let app = build_router(state);

    info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}

fn build_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::readiness_check));

    let protected_routes = Router::new()
        .route("/auth/me", get(handlers::auth::me))
        .route("/workspaces", post(handlers::workspaces::create_workspace))
        .route("/workspaces/me", get(handlers::workspaces::get_my_workspace))
        .route("/documents", get(handlers::documents::list_documents))
        .route("/documents/upload-prepare", post(handlers::documents::upload_prepare))
        .route("/documents/upload-complete", post(handlers::documents::upload_complete))
        .route(
            "/documents/{document_id}",
            get(handlers::documents::get_document).delete(handlers::documents::delete_document),
        )
        .route("/documents/{document_id}/pages/{page_number}", get(handlers::documents::get_page))
        .route("/documents/{document_id}/retry", post(handlers::documents::retry_document))
        .route("/documents/{document_id}/reindex", post(handlers::documents::reindex_document))
        .route("/query", post(handlers::query::run_query))
        .route("/query/stream", post(handlers::query::run_query_stream))
        .route("/queries", get(handlers::queries::list_queries))
        .route("/queries/{query_id}", get(handlers::queries::get_query))
        .route("/citations/{chunk_id}", get(handlers::citations::get_citation))
        .route(
            "/chats/sessions",
            post(handlers::chats::create_chat_session).get(handlers::chats::list_chat_sessions),
        )
        .route(
            "/chats/sessions/{session_id}",
            get(handlers::chats::get_chat_session).patch(handlers::chats::update_chat_session),
        )
        .route("/usage/today", get(handlers::usage::today))
        .route("/usage/observability", get(handlers::usage::observability))
        .layer(middleware::from_fn(security::middleware::security_middleware))
        .layer(Extension(state.ip_whitelist.clone()))
        .layer(Extension(state.header_validator.clone()));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
        .layer(
            CorsLayer::permissive()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default().include_headers(true)))
        .layer(DefaultBodyLimit::max(100 * 1024 * 1024))
}
