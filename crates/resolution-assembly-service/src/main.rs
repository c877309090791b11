use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use resolution_assembly_api::{
    AffectedResolutions, AssembleRequest, AssembleResponse, MigrateResult, ResolutionAssemblyApi,
    ValidChangesResponse, API_CONTRACT_VERSION,
};
use resolution_assembly_core::{ChangeId, ChangeRecord, RawChange, Resolution, ResolutionKey};
use resolution_assembly_store_sqlite::SchemaStatus;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use ulid::Ulid;

const SERVICE_CONTRACT_VERSION: &str = "service.v1";

#[derive(Debug, Clone)]
struct ServiceState {
    api: ResolutionAssemblyApi,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    #[serde(skip)]
    status: StatusCode,
    service_contract_version: &'static str,
    error: String,
}

#[derive(Debug, Clone, Deserialize)]
struct MigrateRequest {
    dry_run: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct CandidatesRequest {
    resolution: ResolutionKey,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct AddedResolution {
    resolution: ResolutionKey,
}

#[derive(Debug, Clone, Serialize)]
struct CandidateChanges {
    resolution: ResolutionKey,
    changes: Vec<ChangeRecord>,
}

#[derive(Debug, Parser)]
#[command(name = "resolution-assembly-service")]
#[command(about = "Local HTTP service for resolution assembly")]
struct Args {
    #[arg(long, default_value = "./resolutions.sqlite3")]
    db: PathBuf,
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl ServiceError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, service_contract_version: SERVICE_CONTRACT_VERSION, error: message.into() }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            service_contract_version: SERVICE_CONTRACT_VERSION,
            error: message.into(),
        }
    }
}

impl ServiceState {
    /// Runs one API call on the blocking pool; `SQLite` access never happens on the reactor.
    async fn call<T, F>(&self, operation: F) -> Result<T, ServiceError>
    where
        F: FnOnce(&ResolutionAssemblyApi) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let api = self.api.clone();
        match tokio::task::spawn_blocking(move || operation(&api)).await {
            Ok(result) => result.map_err(|err| ServiceError::bad_request(format!("{err:#}"))),
            Err(err) => {
                tracing::error!(error = %err, "blocking task failed");
                Err(ServiceError::internal(format!("request task failed: {err}")))
            }
        }
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/db/schema-version", post(db_schema_version))
        .route("/v1/db/migrate", post(db_migrate))
        .route("/v1/resolutions", post(resolution_add))
        .route("/v1/changes", post(change_add))
        .route("/v1/changes/candidates", post(change_candidates))
        .route("/v1/changes/:change_id/affected", get(change_affected))
        .route("/v1/assemble", post(assemble))
        .route("/v1/validity", post(validity))
        .with_state(state)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let state = ServiceState { api: ResolutionAssemblyApi::new(args.db.clone()) };
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, db = %args.db.display(), "resolution assembly service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn db_schema_version(State(state): State<ServiceState>) -> Result<Json<ServiceEnvelope<SchemaStatus>>, ServiceError> {
    let status = state.call(ResolutionAssemblyApi::schema_status).await?;
    Ok(Json(envelope(status)))
}

async fn db_migrate(
    State(state): State<ServiceState>,
    Json(request): Json<MigrateRequest>,
) -> Result<Json<ServiceEnvelope<MigrateResult>>, ServiceError> {
    let result = state.call(move |api| api.migrate(request.dry_run)).await?;
    Ok(Json(envelope(result)))
}

async fn resolution_add(
    State(state): State<ServiceState>,
    Json(resolution): Json<Resolution>,
) -> Result<Json<ServiceEnvelope<AddedResolution>>, ServiceError> {
    let key = state.call(move |api| api.add_resolution(&resolution)).await?;
    Ok(Json(envelope(AddedResolution { resolution: key })))
}

async fn change_add(
    State(state): State<ServiceState>,
    Json(change): Json<RawChange>,
) -> Result<Json<ServiceEnvelope<AffectedResolutions>>, ServiceError> {
    let affected = state.call(move |api| api.add_change(&change)).await?;
    Ok(Json(envelope(affected)))
}

async fn change_candidates(
    State(state): State<ServiceState>,
    Json(request): Json<CandidatesRequest>,
) -> Result<Json<ServiceEnvelope<CandidateChanges>>, ServiceError> {
    let resolution = request.resolution.clone();
    let changes = state.call(move |api| api.candidate_changes(&request.resolution)).await?;
    Ok(Json(envelope(CandidateChanges { resolution, changes })))
}

async fn change_affected(
    State(state): State<ServiceState>,
    Path(change_id): Path<String>,
) -> Result<Json<ServiceEnvelope<AffectedResolutions>>, ServiceError> {
    let parsed = Ulid::from_string(&change_id)
        .map_err(|err| ServiceError::bad_request(format!("invalid change id {change_id}: {err}")))?;
    let affected = state.call(move |api| api.affected_resolutions(ChangeId(parsed))).await?;
    Ok(Json(envelope(affected)))
}

async fn assemble(
    State(state): State<ServiceState>,
    Json(request): Json<AssembleRequest>,
) -> Result<Json<ServiceEnvelope<AssembleResponse>>, ServiceError> {
    let response = state.call(move |api| api.assemble(&request)).await?;
    Ok(Json(envelope(response)))
}

async fn validity(
    State(state): State<ServiceState>,
    Json(request): Json<AssembleRequest>,
) -> Result<Json<ServiceEnvelope<ValidChangesResponse>>, ServiceError> {
    let response = state.call(move |api| api.valid_changes(&request)).await?;
    Ok(Json(envelope(response)))
}
