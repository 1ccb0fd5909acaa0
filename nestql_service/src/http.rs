use std::sync::Arc;

use axum::extract::State;
use axum::http::header::{HeaderName, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;
use tracing::{info, warn};

use nestql::database::postgres::{PgProvider, Postgres};
use nestql::session::ConnectionProvider;
use nestql::{Database, Engine, Format, NestError, OutputMode};

use crate::config::ServiceConfig;

pub type AppState = Arc<Engine<Postgres, PgProvider>>;

pub const BRANCH_WARNINGS: &str = "x-nestql-branch-warnings";

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, msg: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse { error: msg.into() }),
    )
        .into_response()
}

pub fn status_for(error: &NestError) -> StatusCode {
    match error {
        NestError::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
        NestError::QueryExecution { source, .. } => status_for(source),
        error if error.is_client_error() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn router(engine: Engine<Postgres, PgProvider>) -> Router {
    Router::new()
        .route("/json", post(post_json))
        .route("/xml", post(post_xml))
        .with_state(Arc::new(engine))
}

async fn post_json(State(engine): State<AppState>, body: String) -> Response {
    handle(&engine, Format::Json, &body).await
}

async fn post_xml(State(engine): State<AppState>, body: String) -> Response {
    handle(&engine, Format::Xml, &body).await
}

async fn handle<DB, P>(engine: &Engine<DB, P>, format: Format, body: &str) -> Response
where
    DB: Database,
    P: ConnectionProvider<DB>,
{
    let request: serde_json::Value = match serde_json::from_str(body) {
        Ok(request) => request,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("request body is not JSON: {e}"),
            )
        }
    };

    match nestql::process(engine, &request, OutputMode::new(format)).await {
        Ok(processed) => (
            StatusCode::OK,
            [
                (CONTENT_TYPE, HeaderValue::from_static(format.content_type())),
                (
                    HeaderName::from_static(BRANCH_WARNINGS),
                    HeaderValue::from(processed.warnings.len()),
                ),
            ],
            processed.document,
        )
            .into_response(),
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                warn!(error = %e, %status, "request failed");
            }
            error_response(status, e.to_string())
        }
    }
}

pub async fn serve(config: &ServiceConfig) -> anyhow::Result<()> {
    let provider = PgProvider::connect_lazy(&config.database)?;
    let engine = Engine::new(provider).with_options(config.resolve.options());

    let addr = (config.server.host.as_str(), config.server.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {}:{}: {}", addr.0, addr.1, e))?;
    info!(address = %listener.local_addr()?, "listening");

    axum::serve(listener, router(engine))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
    }
}
