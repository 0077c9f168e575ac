use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::bail_runner;
use crate::error::ModelResult;
use crate::inference::models::model::ModelBase;
use crate::inference::qa_pipeline::QaPipeline;
use crate::inference::task::answer::{AnswerHandler, AnswerRequest, AnswerResponse};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<QaPipeline>,
    pub base: Arc<ModelBase>,
    pub request_timeout: Duration,
}

#[derive(Deserialize, Serialize, Debug)]
pub struct HealthResponse {
    pub status: String,
    pub model: ModelBase,
}

pub fn build_router(state: AppState) -> Router {
    let text_router = Router::new().route("/answer", post(handle_answer_request));

    Router::new()
        .nest("/text", text_router)
        .route("/health", get(handle_health_request))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(listener: TcpListener, router: Router) -> anyhow::Result<()> {
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutting down..."),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }
}

#[axum_macros::debug_handler]
async fn handle_answer_request(
    State(state): State<AppState>,
    Json(req): Json<AnswerRequest>,
) -> ModelResult<(StatusCode, Json<AnswerResponse>)> {
    if req.question.trim().is_empty() {
        bail_runner!(StatusCode::BAD_REQUEST, "Field question must not be empty");
    }

    // The blocking task keeps running after a timeout, only the response is abandoned.
    let pipeline = state.pipeline.clone();
    let task = tokio::task::spawn_blocking(move || pipeline.run_answer(req));
    match tokio::time::timeout(state.request_timeout, task).await {
        Ok(joined) => Ok((StatusCode::OK, Json(joined??))),
        Err(_) => {
            warn!("Inference exceeded {:?}", state.request_timeout);
            bail_runner!(
                StatusCode::GATEWAY_TIMEOUT,
                "Inference did not finish within {} ms",
                state.request_timeout.as_millis()
            )
        }
    }
}

#[axum_macros::debug_handler]
async fn handle_health_request(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        model: state.base.as_ref().clone(),
    })
}
