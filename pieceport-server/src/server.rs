use crate::config::Config;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State, rejection::BytesRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use pieceport_core::{
    ErrorKind, FileBlobStore, HttpLedger, LedgerService, LifecycleOptions, Piece, PieceError,
    PieceManager, PieceSource, PieceStore, PieceSummary, ReconcileOutcome, Result,
    TransactionReconciler,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub struct ServerState {
    pub manager: Arc<PieceManager>,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PreparePieceRequest {
    #[serde(default)]
    source_path: Option<PathBuf>,
    #[serde(default)]
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct MonitorResponse {
    outcome: ReconcileOutcome,
    piece: Piece,
}

pub async fn run_server(config: Config) -> Result<()> {
    let store = Arc::new(PieceStore::new(config.storage.db_path())?);
    let blobs = Arc::new(FileBlobStore::new(config.storage.blob_dir())?);
    let ledger: Arc<dyn LedgerService> = Arc::new(HttpLedger::new(
        &config.ledger.base_url,
        config.ledger.timeout(),
    )?);

    let manager = Arc::new(PieceManager::new(
        store,
        blobs,
        ledger,
        LifecycleOptions {
            sector_size: config.proof.sector_size,
        },
    )?);

    let reconciler = if config.reconciler.enabled {
        Some(TransactionReconciler::new(manager.clone(), config.reconciler.interval()).spawn())
    } else {
        tracing::warn!("transaction reconciler disabled; pending pieces resolve only on monitor");
        None
    };

    let app = router(Arc::new(ServerState {
        manager,
        max_upload_bytes: config.server.max_upload_bytes,
    }));

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr).await?;
    tracing::info!("Server listening on {}", config.server.bind_addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    if let Some(handle) = reconciler {
        handle.stop().await;
    }

    served?;
    Ok(())
}

pub fn router(state: Arc<ServerState>) -> Router {
    let body_limit = DefaultBodyLimit::max(state.max_upload_bytes);

    Router::new()
        .route("/health", get(health_handler))
        .route("/pieces", get(list_pieces).post(prepare_piece))
        .route("/pieces/:id", get(get_piece).put(upload_piece))
        .route("/pieces/:id/content", get(get_piece_content))
        .route("/pieces/:id/proofset/:proof_set_id", post(add_to_proof_set))
        .route("/pieces/:id/transaction/status", get(transaction_status))
        .route("/pieces/:id/transaction/monitor", post(monitor_transaction))
        .layer(body_limit)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict | ErrorKind::State => StatusCode::CONFLICT,
        ErrorKind::Ledger => StatusCode::BAD_GATEWAY,
        ErrorKind::Persistence | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: PieceError) -> Response {
    let status = status_for(error.kind());
    if status.is_server_error() {
        tracing::error!(error = %error, "request failed");
    } else {
        tracing::debug!(error = %error, "request rejected");
    }

    let resp = ApiResponse::<()> {
        success: false,
        data: None,
        error: Some(error.to_string()),
    };
    (status, Json(resp)).into_response()
}

/// Body extraction failures, oversized uploads included, in the usual envelope.
fn rejection_response(rejection: BytesRejection) -> Response {
    let status = rejection.status();
    tracing::debug!(status = %status, error = %rejection.body_text(), "request body rejected");

    let resp = ApiResponse::<()> {
        success: false,
        data: None,
        error: Some(rejection.body_text()),
    };
    (status, Json(resp)).into_response()
}

fn success_response<T: Serialize>(status: StatusCode, data: T) -> Response {
    let resp = ApiResponse {
        success: true,
        data: Some(data),
        error: None,
    };
    (status, Json(resp)).into_response()
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn prepare_piece(
    State(state): State<Arc<ServerState>>,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => return rejection_response(rejection),
    };

    let request = if body.is_empty() {
        PreparePieceRequest::default()
    } else {
        match serde_json::from_slice::<PreparePieceRequest>(&body) {
            Ok(request) => request,
            Err(e) => {
                return error_response(PieceError::Validation(format!(
                    "invalid prepare request: {}",
                    e
                )));
            }
        }
    };

    let source = match (request.source_path, request.size) {
        (Some(_), Some(_)) => {
            return error_response(PieceError::Validation(
                "specify either source_path or size, not both".to_string(),
            ));
        }
        (Some(path), None) => PieceSource::File(path),
        (None, size) => PieceSource::Declared { size },
    };

    match state.manager.prepare_piece(source).await {
        Ok(piece) => success_response(StatusCode::CREATED, piece),
        Err(e) => error_response(e),
    }
}

async fn list_pieces(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<ListQuery>,
) -> Response {
    match state.manager.list_pieces(query.limit) {
        Ok(pieces) => success_response(StatusCode::OK, pieces),
        Err(e) => error_response(e),
    }
}

async fn get_piece(State(state): State<Arc<ServerState>>, Path(id): Path<String>) -> Response {
    match state.manager.get_piece(&id) {
        Ok(piece) => success_response(StatusCode::OK, piece),
        Err(e) => error_response(e),
    }
}

/// An empty body uploads from the file the piece was prepared from.
async fn upload_piece(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => return rejection_response(rejection),
    };

    let result = if body.is_empty() {
        match state.manager.get_piece(&id) {
            Ok(piece) if piece.source_path.is_some() => {
                state.manager.upload_from_source(&id).await
            }
            Ok(_) => state.manager.upload_piece(&id, body).await,
            Err(e) => Err(e),
        }
    } else {
        state.manager.upload_piece(&id, body).await
    };

    match result {
        Ok(piece) => success_response(StatusCode::OK, piece),
        Err(e) => error_response(e),
    }
}

async fn get_piece_content(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Response {
    match state.manager.piece_content(&id).await {
        Ok(data) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            data,
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

async fn add_to_proof_set(
    State(state): State<Arc<ServerState>>,
    Path((id, proof_set_id)): Path<(String, u64)>,
) -> Response {
    match state.manager.add_piece_to_proof_set(&id, proof_set_id).await {
        Ok(piece) => success_response(StatusCode::OK, piece),
        Err(e) => error_response(e),
    }
}

async fn transaction_status(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Response {
    match state.manager.get_piece(&id) {
        Ok(piece) => success_response::<PieceSummary>(StatusCode::OK, piece.summary()),
        Err(e) => error_response(e),
    }
}

async fn monitor_transaction(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Response {
    match state.manager.monitor_transaction(&id).await {
        Ok(result) => success_response(
            StatusCode::OK,
            MonitorResponse {
                outcome: result.outcome,
                piece: result.piece,
            },
        ),
        Err(e) => error_response(e),
    }
}
