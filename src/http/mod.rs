//! Upload and inspection endpoints.

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::node::Node;
use crate::replication::{Entry, PeerId, Version};
use crate::util::errors::ReplicationError;

const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;
const DEFAULT_UPLOAD_NAME: &str = "unnamed";

pub type AppState = Arc<Node>;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResponse {
    pub status: &'static str,
    pub version: Version,
    pub content_id: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct PeersResponse {
    pub peers: Vec<PeerId>,
}

#[derive(Debug, Serialize)]
pub struct LogResponse {
    pub version: Version,
    pub entries: Vec<Entry>,
}

pub fn router(node: AppState) -> Router {
    Router::new()
        .route("/files", post(upload_file))
        .route("/peers", get(list_peers))
        .route("/log", get(show_log))
        .route("/blobs/{cid}", get(fetch_blob))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(node)
}

/// Serve until `shutdown` is cancelled
pub async fn serve(node: AppState, listen_addr: &str, shutdown: CancellationToken) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!("HTTP server listening on {}", listener.local_addr()?);

    axum::serve(listener, router(node))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

fn error_body(status: StatusCode, error: String, details: Option<serde_json::Value>) -> Response {
    (status, Json(ErrorResponse { error, details })).into_response()
}

pub fn error_response(err: &ReplicationError) -> Response {
    let status = match err {
        ReplicationError::NoPeers => StatusCode::SERVICE_UNAVAILABLE,
        ReplicationError::NotLeader => StatusCode::FORBIDDEN,
        e if e.is_quorum_failure() => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let details = match err {
        ReplicationError::QuorumTimeout {
            version,
            acks,
            required,
        } => Some(serde_json::json!({
            "version": version,
            "acks": acks,
            "required": required,
        })),
        ReplicationError::Diverged { version, checksums } => Some(serde_json::json!({
            "version": version,
            "checksums": checksums
                .iter()
                .map(|(peer, hash)| serde_json::json!({ "peerId": peer, "hash": hash }))
                .collect::<Vec<_>>(),
        })),
        _ => None,
    };

    error_body(status, err.to_string(), details)
}

/// Replicate an already-extracted upload
pub async fn commit_upload(node: &Node, upload: Option<(Vec<u8>, String)>) -> Response {
    let Some((data, name)) = upload else {
        return error_body(StatusCode::BAD_REQUEST, "No file uploaded".to_string(), None);
    };

    tracing::info!("Received upload {} ({} bytes)", name, data.len());

    match node.submit(data, &name).await {
        Ok(committed) => (
            StatusCode::OK,
            Json(CommitResponse {
                status: "committed",
                version: committed.version,
                content_id: committed.content_id,
            }),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST /files
async fn upload_file(State(node): State<AppState>, mut multipart: Multipart) -> Response {
    let mut upload = None;

    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.file_name().is_none() && field.name() != Some("file") {
                    continue;
                }
                let name = field
                    .file_name()
                    .filter(|n| !n.is_empty())
                    .unwrap_or(DEFAULT_UPLOAD_NAME)
                    .to_string();
                match field.bytes().await {
                    Ok(bytes) => {
                        upload = Some((bytes.to_vec(), name));
                        break;
                    }
                    Err(e) => {
                        return error_body(StatusCode::BAD_REQUEST, e.body_text(), None);
                    }
                }
            }
            Ok(None) => break,
            Err(e) => return error_body(StatusCode::BAD_REQUEST, e.body_text(), None),
        }
    }

    commit_upload(&node, upload).await
}

/// GET /peers
async fn list_peers(State(node): State<AppState>) -> Json<PeersResponse> {
    Json(PeersResponse {
        peers: node.peers(),
    })
}

/// GET /log
async fn show_log(State(node): State<AppState>) -> Json<LogResponse> {
    let (version, entries) = node.log_snapshot();
    Json(LogResponse { version, entries })
}

/// GET /blobs/{cid}
async fn fetch_blob(State(node): State<AppState>, Path(cid): Path<String>) -> Response {
    match node.fetch_blob(&cid).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response(),
        Err(e) => {
            tracing::debug!("Blob {} unavailable: {}", cid, e);
            error_body(StatusCode::NOT_FOUND, e.to_string(), None)
        }
    }
}
