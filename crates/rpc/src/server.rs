use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use peershare_registry::{
    Endpoint, HolderId, LivenessSweeper, PeerRegistry, RegistryError, SearchGroup,
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::api::{
    AnnounceRequest, AnnounceResponse, ErrorResponse, HealthResponse, HeartbeatRequest,
    HeartbeatResponse, HolderLookupResponse, STATUS_SUCCESS,
};

#[derive(Clone)]
pub struct AppState {
    pub registry: PeerRegistry,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(registry: PeerRegistry) -> Self {
        Self {
            registry,
            start_time: Instant::now(),
        }
    }

    fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    fn authenticate(&self, headers: &HeaderMap) -> Result<HolderId, ApiError> {
        let credential = bearer_credential(headers)
            .ok_or_else(|| ApiError::unauthorized("missing bearer credential"))?;
        Ok(self.registry.holders().authenticate(credential)?)
    }
}

type SharedState = Arc<AppState>;

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new<S: Into<String>>(status: StatusCode, message: S) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn not_found<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn unauthorized<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = Json(ErrorResponse {
            error: self.message,
        });
        let mut response = (self.status, payload).into_response();
        if self.status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                header::HeaderValue::from_static("Bearer"),
            );
        }
        response
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Validation(msg) => Self::bad_request(msg),
            RegistryError::NotFound(msg) => Self::not_found(msg),
            RegistryError::Unauthorized(msg) => Self::unauthorized(msg),
            RegistryError::Conflict(_) => Self::new(StatusCode::CONFLICT, err.to_string()),
            RegistryError::Storage(err) => {
                warn!("Registry storage failure: {:#}", err);
                Self::internal("registry storage failure")
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    q: String,
}

/// Bind `addr`, run the liveness sweeper and serve the tracker API until
/// `shutdown` resolves.
pub async fn start_server<F>(registry: PeerRegistry, addr: &str, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = bind_listener(addr).await?;
    info!(
        "Tracker listening on {}",
        listener.local_addr().context("listener has no local address")?
    );

    let sweeper = LivenessSweeper::spawn(registry.clone());
    let served = serve(listener, AppState::new(registry), shutdown).await;
    sweeper.stop().await;
    served
}

/// Serve the tracker API on an already bound listener.
pub async fn serve<F>(listener: tokio::net::TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .context("tracker server terminated unexpectedly")
}

async fn bind_listener(addr: &str) -> Result<tokio::net::TcpListener> {
    if let Ok(socket_addr) = addr.parse::<SocketAddr>() {
        tokio::net::TcpListener::bind(socket_addr)
            .await
            .with_context(|| format!("failed to bind tracker listener on {socket_addr}"))
    } else {
        tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind tracker listener on {addr}"))
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/announce", post(handle_announce))
        .route("/heartbeat", post(handle_heartbeat))
        .route("/search", get(handle_search))
        .route("/holder/:label", get(handle_holder_lookup))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

async fn handle_health(
    State(state): State<SharedState>,
) -> Result<Json<HealthResponse>, ApiError> {
    let stats = state.registry.stats()?;
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.uptime_seconds(),
        holders: stats.holders,
        records: stats.records,
        offers: stats.offers,
    }))
}

async fn handle_announce(
    State(state): State<SharedState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Result<Json<AnnounceRequest>, JsonRejection>,
) -> Result<Json<AnnounceResponse>, ApiError> {
    let holder_id = state.authenticate(&headers)?;
    let Json(request) = body?;

    if request.holder_id != holder_id {
        return Err(ApiError::unauthorized(
            "credential does not belong to this holder",
        ));
    }

    let ip_address = request
        .ip_address
        .unwrap_or_else(|| remote.ip().to_canonical());
    let endpoint = Endpoint::new(ip_address, request.port, request.public_url);
    let announced = state
        .registry
        .announce(holder_id, endpoint, request.files)?;

    Ok(Json(AnnounceResponse {
        status: STATUS_SUCCESS.to_string(),
        announced,
    }))
}

async fn handle_heartbeat(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    let holder_id = state.authenticate(&headers)?;

    let observed = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        let request: HeartbeatRequest = serde_json::from_slice(&body)
            .map_err(|err| ApiError::bad_request(format!("invalid heartbeat body: {err}")))?;
        Some(request)
    };

    let report = state.registry.heartbeat(holder_id, observed)?;
    let response = if report.refreshed == 0 {
        HeartbeatResponse::warning("No active files found. Please re-announce.")
    } else if report.endpoint_drift {
        HeartbeatResponse::warning("Endpoint changed. Please re-announce.")
    } else {
        HeartbeatResponse::success()
    };

    if response.is_warning() {
        debug!("Heartbeat from holder {} answered with a warning", holder_id);
    }
    Ok(Json(response))
}

async fn handle_search(
    State(state): State<SharedState>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<Vec<SearchGroup>>, ApiError> {
    let Query(params) = params?;
    Ok(Json(state.registry.search(&params.q)?))
}

async fn handle_holder_lookup(
    State(state): State<SharedState>,
    Path(label): Path<String>,
) -> Result<Json<HolderLookupResponse>, ApiError> {
    let holder = state
        .registry
        .holders()
        .find_by_label(&label)
        .ok_or_else(|| ApiError::not_found(format!("holder '{label}' not found")))?;
    Ok(Json(HolderLookupResponse {
        holder_id: holder.id,
        label: holder.label,
    }))
}

fn bearer_credential(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
