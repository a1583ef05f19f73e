//! Embedded HTTP server that hands out files from the shared root.
//!
//! The only route is `GET /download?name=<basename>`. There is no
//! authentication: anyone who can reach the port can fetch any regular file
//! directly inside the shared root, and nothing else.

use crate::error::ServeError;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::stream;
use parking_lot::Mutex;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Size of each body chunk streamed to a client.
pub const STREAM_CHUNK_SIZE: usize = 4096;

#[derive(Clone)]
struct ServerState {
    /// Canonical form of the shared root.
    root: Arc<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct DownloadParams {
    #[serde(default)]
    name: Option<String>,
}

/// Handle to a running file server. Dropping it signals shutdown; call
/// [`FileServer::stop`] to also wait for the serving task.
pub struct FileServer {
    local_addr: SocketAddr,
    root: PathBuf,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FileServer {
    /// Bind `addr` and start serving `root`.
    pub async fn start(root: &Path, addr: SocketAddr) -> Result<Self, ServeError> {
        let canonical_root = tokio::fs::canonicalize(root)
            .await
            .map_err(|source| ServeError::Root {
                path: root.to_path_buf(),
                source,
            })?;

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|source| ServeError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServeError::Bind { addr, source })?;

        let app = router(canonical_root.clone());
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(err) = server.await {
                error!("File server terminated unexpectedly: {}", err);
            }
        });

        info!(
            "File server on {} serving {}",
            local_addr,
            canonical_root.display()
        );

        Ok(Self {
            local_addr,
            root: canonical_root,
            shutdown: Mutex::new(Some(shutdown_tx)),
            task: Mutex::new(Some(task)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Signal graceful shutdown and wait for the serving task to exit.
    pub async fn stop(&self) {
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(());
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!("File server task failed: {}", err);
            }
        }
        info!("File server on {} stopped", self.local_addr);
    }
}

impl Drop for FileServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.get_mut().take() {
            let _ = tx.send(());
        }
    }
}

fn router(root: PathBuf) -> Router {
    Router::new()
        .route("/download", get(handle_download))
        .layer(TraceLayer::new_for_http())
        .with_state(ServerState {
            root: Arc::new(root),
        })
}

async fn handle_download(
    State(state): State<ServerState>,
    Query(params): Query<DownloadParams>,
) -> Response {
    let Some(requested) = params.name.filter(|name| !name.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "missing file name").into_response();
    };

    let name = match basename(&requested) {
        Some(name) => name,
        None => return (StatusCode::BAD_REQUEST, "invalid file name").into_response(),
    };

    let candidate = state.root.join(name);
    let resolved = match tokio::fs::canonicalize(&candidate).await {
        Ok(path) => path,
        Err(_) => return (StatusCode::NOT_FOUND, "file not found").into_response(),
    };
    if !is_strictly_within(&resolved, &state.root) {
        warn!("Rejected download outside shared root: {:?}", requested);
        return (StatusCode::FORBIDDEN, "access denied").into_response();
    }

    let file = match tokio::fs::File::open(&resolved).await {
        Ok(file) => file,
        Err(_) => return (StatusCode::NOT_FOUND, "file not found").into_response(),
    };
    let metadata = match file.metadata().await {
        Ok(metadata) if metadata.is_file() => metadata,
        _ => return (StatusCode::NOT_FOUND, "file not found").into_response(),
    };

    debug!("Serving {} ({} bytes)", name, metadata.len());
    let body = Body::from_stream(file_chunks(file));

    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(metadata.len()));
    headers.insert(header::CONTENT_DISPOSITION, content_disposition(name));
    response
}

/// Last `/`-separated component of a requested name, or `None` when what
/// remains could still address something other than a plain file.
fn basename(requested: &str) -> Option<&str> {
    let name = requested.rsplit('/').next().unwrap_or("");
    if name.is_empty() || name.contains("..") || name.contains('/') || name.contains('\\') {
        return None;
    }
    Some(name)
}

fn is_strictly_within(path: &Path, root: &Path) -> bool {
    path != root && path.starts_with(root)
}

fn file_chunks(
    file: tokio::fs::File,
) -> impl futures::Stream<Item = std::io::Result<Vec<u8>>> + Send + 'static {
    stream::unfold(Some(file), |state| async move {
        let mut file = state?;
        let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
        match file.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(buf), Some(file)))
            }
            Err(err) => Some((Err(err), None)),
        }
    })
}

fn content_disposition(name: &str) -> HeaderValue {
    let value = if name.bytes().all(|b| b.is_ascii_graphic() || b == b' ') {
        let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
        format!("attachment; filename=\"{escaped}\"")
    } else {
        let encoded = url::form_urlencoded::byte_serialize(name.as_bytes())
            .collect::<String>()
            .replace('+', "%20");
        format!("attachment; filename*=UTF-8''{encoded}")
    };
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}
