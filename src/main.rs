use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use hlsforge::adapters::aws::s3::S3Adapter;
use hlsforge::adapters::local::fs::FsAdapter;
use hlsforge::adapters::process::TokioProcessRunner;
use hlsforge::application::health::health_report;
use hlsforge::domain::jobs::{JobRequest, JobStatus};
use hlsforge::error::{JobError, JobFailure};
use hlsforge::ports::process::ProcessRunner;
use hlsforge::ports::storage::StoragePort;
use hlsforge::{Pipeline, WorkerConfig};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

struct AppState<R> {
    pipeline: Pipeline<R>,
    local_storage: Option<FsAdapter>,
}

#[tokio::main]
async fn main() {
    let config = WorkerConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let local_storage = config
        .storage_local_dir
        .clone()
        .map(|dir| FsAdapter::new(dir, config.storage_base_url.clone()));
    let runner = TokioProcessRunner::new(config.progress_log_interval);
    let bind_address = config.bind_address();
    let pipeline = Pipeline::new(config, runner).expect("Failed to build HTTP client");

    let state = Arc::new(AppState {
        pipeline,
        local_storage,
    });

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .expect("Failed to bind TCP listener");
    info!("Listening at {}", bind_address);
    axum::serve(listener, app(state))
        .await
        .expect("Server failed to start");
}

fn app<R>(state: Arc<AppState<R>>) -> Router
where
    R: ProcessRunner + 'static,
{
    Router::new()
        .route("/health", get(health::<R>))
        .route("/jobs", post(create_job::<R>))
        .route("/run", post(run_envelope::<R>))
        .with_state(state)
}

async fn health<R>(State(state): State<Arc<AppState<R>>>) -> Response
where
    R: ProcessRunner + 'static,
{
    health_response(&state).await
}

async fn create_job<R>(
    State(state): State<Arc<AppState<R>>>,
    Json(request): Json<JobRequest>,
) -> Response
where
    R: ProcessRunner + 'static,
{
    transcode(&state, request).await
}

#[derive(Debug, Deserialize)]
struct Envelope {
    input: Value,
}

/// Serverless-style entrypoint: `{"input": {"action": ..., ...job}}`.
async fn run_envelope<R>(
    State(state): State<Arc<AppState<R>>>,
    Json(envelope): Json<Envelope>,
) -> Response
where
    R: ProcessRunner + 'static,
{
    let action = envelope
        .input
        .get("action")
        .and_then(Value::as_str)
        .unwrap_or("transcode")
        .to_string();

    match action.as_str() {
        "health" => health_response(&state).await,
        "transcode" => match serde_json::from_value::<JobRequest>(envelope.input) {
            Ok(request) => transcode(&state, request).await,
            Err(e) => bad_request(format!("invalid job request: {}", e)),
        },
        other => bad_request(format!("unknown action {:?}", other)),
    }
}

async fn health_response<R>(state: &AppState<R>) -> Response
where
    R: ProcessRunner + 'static,
{
    let config = state.pipeline.config();
    let report = health_report(
        state.pipeline.runner(),
        state.pipeline.detector(),
        &config.ffmpeg_path,
        config.probe_step_timeout,
    )
    .await;
    Json(report).into_response()
}

async fn transcode<R>(state: &AppState<R>, request: JobRequest) -> Response
where
    R: ProcessRunner + 'static,
{
    let job = match request.validate() {
        Ok(job) => job,
        Err(e) => {
            let failure = JobFailure::from(&JobError::from(e));
            return (StatusCode::BAD_REQUEST, Json(failure)).into_response();
        }
    };

    let storage: Option<Box<dyn StoragePort>> = match (&state.local_storage, &job.destination) {
        _ if !job.publish.upload => None,
        (Some(local), _) => Some(Box::new(local.clone())),
        (None, Some(destination)) => Some(Box::new(S3Adapter::from_destination(destination).await)),
        (None, None) => None,
    };

    let result = state.pipeline.run(&job, storage.as_deref()).await;
    let status = match result.status {
        JobStatus::Completed => StatusCode::OK,
        JobStatus::Failed => StatusCode::UNPROCESSABLE_ENTITY,
    };
    (status, Json(result)).into_response()
}

fn bad_request(message: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "kind": "ConfigError", "message": message })),
    )
        .into_response()
}
