//! HTTP server setup and configuration.

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use super::handlers;
use crate::config::Config;

/// Response header carrying the per-request correlation id.
pub const REQUEST_ID_HEADER: &str = "x-chatrelay-request-id";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub http_client: Client,
    pub config: Arc<Config>,
}

/// Correlation id assigned to each inbound request.
#[derive(Debug, Clone, Copy)]
pub struct RequestId(pub Uuid);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Assign a correlation id, expose it to handlers, echo it to the client.
async fn assign_request_id(mut request: Request, next: Next) -> Response {
    let id = RequestId(Uuid::new_v4());
    request.extensions_mut().insert(id);

    let mut response = next.run(request).await;
    response.headers_mut().insert(
        HeaderName::from_static(REQUEST_ID_HEADER),
        HeaderValue::from_str(&id.to_string()).unwrap(),
    );
    response
}

/// Create the axum router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(handlers::chat))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(middleware::from_fn(assign_request_id))
        // Browser frontends live on other origins
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Build the shared upstream HTTP client from the configured timeouts.
///
/// No whole-request timeout is applied unless configured: it would sever
/// long-lived streams.
pub fn build_http_client(config: &Config) -> reqwest::Result<Client> {
    let mut builder = Client::builder()
        .connect_timeout(Duration::from_secs(config.upstream.connect_timeout_secs));
    if let Some(secs) = config.upstream.request_timeout_secs {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    builder.build()
}

/// Run the HTTP server.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let listen_addr = config.server.listen.clone();

    let http_client = build_http_client(&config)?;

    let state = AppState {
        http_client,
        config: Arc::new(config),
    };

    tracing::info!(
        address = %listen_addr,
        upstream = %state.config.upstream.url,
        api_key_configured = state.config.upstream.api_key.is_some(),
        "Starting chatrelay server"
    );

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
