#![forbid(unsafe_code)]

//! Axum proxy in front of the Pexels API.
//!
//! Browsers only ever talk to these routes; the API key stays in this
//! process. Upstream payloads are passed through untouched, and any upstream
//! failure turns into a generic 500 so the UI can fall back to an empty row.

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Path as AxumPath, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::Parser;
use reelfront::{
    config::{RuntimeOverrides, RuntimeSettings, resolve_runtime_settings},
    logging::init_tracing,
    upstream::{
        CURATED_PAGE_SIZE, POPULAR_PAGE_SIZE, SEARCH_PAGE_SIZE, UpstreamClient, UpstreamConfig,
        UpstreamError,
    },
};
use serde::Deserialize;
use serde_json::Value;
use tokio::signal;
use tracing::{error, info};

const PHOTOS_FAILURE: &str = "Failed to fetch photos";
const VIDEOS_FAILURE: &str = "Failed to fetch videos";
const VIDEO_FAILURE: &str = "Failed to fetch video";

#[derive(Debug, Parser)]
#[command(name = "backend", about = "Serve the media proxy API")]
struct Cli {
    /// Address to bind (overrides REELFRONT_HOST).
    #[arg(long)]
    host: Option<String>,
    /// Port to bind (overrides REELFRONT_PORT).
    #[arg(long)]
    port: Option<u16>,
    /// Alternate `.env` file to read settings from.
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
struct BackendArgs {
    listen_host: IpAddr,
    port: u16,
    upstream: UpstreamConfig,
}

impl Cli {
    fn overrides(self) -> RuntimeOverrides {
        RuntimeOverrides {
            host: self.host,
            port: self.port,
            env_path: self.env_file,
            ..RuntimeOverrides::default()
        }
    }
}

impl BackendArgs {
    fn parse() -> Result<Self> {
        let settings = resolve_runtime_settings(Cli::parse().overrides())?;
        Self::from_settings(&settings)
    }

    fn from_settings(settings: &RuntimeSettings) -> Result<Self> {
        let listen_host = parse_host_arg(&settings.host)?;
        let upstream = UpstreamConfig::from_settings(settings)?;
        Ok(Self {
            listen_host,
            port: settings.port,
            upstream,
        })
    }
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/REELFRONT_HOST")
}

/// Shared state injected into every handler.
#[derive(Clone)]
struct AppState {
    upstream: Arc<UpstreamClient>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Default, Deserialize)]
struct PopularParams {
    per_page: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchParams {
    query: Option<String>,
    per_page: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("info");
    let BackendArgs {
        listen_host,
        port,
        upstream,
    } = BackendArgs::parse()?;

    let state = AppState {
        upstream: Arc::new(UpstreamClient::new(upstream)),
    };
    let app = router(state);

    let addr = SocketAddr::new(listen_host, port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!("API server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/media/curated", get(curated))
        .route("/api/media/videos/popular", get(popular_videos))
        .route("/api/media/videos/search", get(search_videos))
        .route("/api/media/videos/{id}", get(single_video))
        .fallback(api_fallback)
        .with_state(state)
}

async fn shutdown_signal() {
    // Only graceful shutdown depends on this; Ctrl+C still ends the process.
    if let Err(err) = signal::ctrl_c().await {
        error!("Failed to install Ctrl+C handler: {}", err);
    }
}

async fn api_fallback() -> ApiError {
    ApiError::not_found("endpoint not found")
}

async fn curated(State(state): State<AppState>) -> ApiResult<Response> {
    proxy(&state, PHOTOS_FAILURE, |client| {
        client.fetch_curated(CURATED_PAGE_SIZE)
    })
    .await
}

async fn popular_videos(
    State(state): State<AppState>,
    Query(params): Query<PopularParams>,
) -> ApiResult<Response> {
    let per_page = parse_per_page(params.per_page.as_deref(), POPULAR_PAGE_SIZE);
    proxy(&state, VIDEOS_FAILURE, move |client| {
        client.fetch_popular_videos(per_page)
    })
    .await
}

async fn search_videos(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Response> {
    let query = params.query.unwrap_or_default();
    let per_page = parse_per_page(params.per_page.as_deref(), SEARCH_PAGE_SIZE);
    proxy(&state, VIDEOS_FAILURE, move |client| {
        client.search_videos(&query, per_page)
    })
    .await
}

async fn single_video(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Response> {
    let id = id
        .trim()
        .parse::<u64>()
        .map_err(|_| ApiError::not_found("video not found"))?;
    proxy(&state, VIDEO_FAILURE, move |client| client.fetch_video(id)).await
}

/// Runs the blocking upstream call off the async workers and maps failures
/// to an opaque 500 carrying `failure`.
async fn proxy<F>(state: &AppState, failure: &'static str, call: F) -> ApiResult<Response>
where
    F: FnOnce(&UpstreamClient) -> Result<Value, UpstreamError> + Send + 'static,
{
    let client = state.upstream.clone();
    let result = tokio::task::spawn_blocking(move || call(&client)).await;
    match result {
        Ok(Ok(body)) => Ok(passthrough(body, state.upstream.cache_ttl())),
        Ok(Err(err)) => {
            error!(error = %err, "{failure}");
            Err(ApiError::internal(failure))
        }
        Err(err) => {
            error!(error = %err, "upstream task aborted");
            Err(ApiError::internal(failure))
        }
    }
}

fn passthrough(body: Value, ttl: Duration) -> Response {
    let mut response = Json(body).into_response();
    if let Ok(value) = HeaderValue::from_str(&format!("public, max-age={}", ttl.as_secs())) {
        response.headers_mut().insert(header::CACHE_CONTROL, value);
    }
    response
}

/// Non-numeric, zero or missing values fall back to the route default.
fn parse_per_page(value: Option<&str>, default: u32) -> u32 {
    value
        .and_then(|value| value.trim().parse::<u32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::to_bytes, extract::State as AxumState, http::HeaderMap};
    use reelfront::config::{build_runtime_settings, read_env_file};
    use serde_json::json;
    use std::collections::HashMap;
    use tempfile::tempdir;

    async fn fake_search(
        headers: HeaderMap,
        Query(params): Query<HashMap<String, String>>,
    ) -> Response {
        if headers.get("authorization").map(|value| value.as_bytes()) != Some(&b"test-key"[..]) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        let per_page: u64 = params
            .get("per_page")
            .and_then(|value| value.parse().ok())
            .unwrap_or(0);
        let videos: Vec<Value> = (1..=per_page)
            .map(|id| json!({ "id": id, "duration": id * 60 }))
            .collect();
        Json(json!({
            "query": params.get("query").cloned().unwrap_or_default(),
            "per_page": per_page,
            "videos": videos,
        }))
        .into_response()
    }

    async fn spawn_fake_upstream() -> String {
        let app = Router::new()
            .route("/videos/search", get(fake_search))
            .route(
                "/videos/popular",
                get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
            )
            .route(
                "/v1/curated",
                get(|Query(params): Query<HashMap<String, String>>| async move {
                    Json(json!({ "per_page": params.get("per_page").cloned(), "photos": [] }))
                }),
            )
            .route(
                "/videos/videos/{id}",
                get(|AxumPath(id): AxumPath<u64>| async move { Json(json!({ "id": id })) }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn test_state() -> AppState {
        AppState {
            upstream: Arc::new(UpstreamClient::new(UpstreamConfig {
                api_key: "test-key".into(),
                base_url: spawn_fake_upstream().await,
                cache_ttl: Duration::from_secs(3600),
            })),
        }
    }

    async fn body_json(response: Response) -> Value {
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("backend").chain(args.iter().copied())).unwrap()
    }

    /// Resolves settings from the CLI and its `.env` file only, ignoring the
    /// process environment.
    fn settings_without_env(cli: Cli) -> RuntimeSettings {
        let overrides = cli.overrides();
        let env_path = overrides.env_path.clone().unwrap();
        let file_vars = read_env_file(&env_path).unwrap();
        build_runtime_settings(&file_vars, |_| None, overrides)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn search_passes_upstream_payload_through() {
        let state = test_state().await;
        let response = search_videos(
            AxumState(state),
            Query(SearchParams {
                query: Some("anime".into()),
                per_page: Some("5".into()),
            }),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "public, max-age=3600"
        );

        let payload = body_json(response).await;
        assert_eq!(payload["query"], "anime");
        let items = reelfront::media::normalize_feed(&payload, &[]);
        assert_eq!(items.len(), 5);
        assert_eq!(items[4].id, 5);
        assert_eq!(items[4].duration_display, "5:00");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn search_defaults_to_empty_query_and_ten_results() {
        let state = test_state().await;
        let response = search_videos(AxumState(state), Query(SearchParams::default()))
            .await
            .unwrap();
        let payload = body_json(response).await;
        assert_eq!(payload["query"], "");
        assert_eq!(payload["per_page"], 10);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upstream_503_becomes_generic_500() {
        let state = test_state().await;
        let err = popular_videos(
            AxumState(state),
            Query(PopularParams {
                per_page: Some("5".into()),
            }),
        )
        .await
        .unwrap_err();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "Failed to fetch videos" })
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn curated_uses_fixed_page_size() {
        let state = test_state().await;
        let response = curated(AxumState(state)).await.unwrap();
        assert_eq!(body_json(response).await["per_page"], "5");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn curated_failure_mentions_photos() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let state = AppState {
            upstream: Arc::new(UpstreamClient::new(UpstreamConfig {
                api_key: "test-key".into(),
                base_url: format!("http://{addr}"),
                cache_ttl: Duration::from_secs(3600),
            })),
        };
        let response = curated(AxumState(state)).await.unwrap_err().into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["error"], PHOTOS_FAILURE);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn single_video_validates_id() {
        let state = test_state().await;
        let err = single_video(AxumState(state.clone()), AxumPath("abc".into()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let response = single_video(AxumState(state), AxumPath("42".into()))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["id"], 42);
    }

    #[tokio::test]
    async fn unknown_routes_answer_json_404() {
        let response = api_fallback().await.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "endpoint not found");
    }

    #[tokio::test]
    async fn api_error_serializes_json() {
        let response = ApiError::internal("boom").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert_eq!(body_json(response).await["error"], "boom");
    }

    #[test]
    fn per_page_falls_back_to_default() {
        assert_eq!(parse_per_page(None, 5), 5);
        assert_eq!(parse_per_page(Some("12"), 5), 12);
        assert_eq!(parse_per_page(Some(" 7 "), 5), 7);
        assert_eq!(parse_per_page(Some("0"), 10), 10);
        assert_eq!(parse_per_page(Some("-3"), 10), 10);
        assert_eq!(parse_per_page(Some("many"), 10), 10);
    }

    #[test]
    fn backend_args_read_env_file() {
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");
        std::fs::write(
            &env_path,
            "PEXELS_API_KEY=\"from-file\"\nPEXELS_API_BASE=\"http://127.0.0.1:9\"\n",
        )
        .unwrap();
        let settings = settings_without_env(cli(&[
            "--env-file",
            env_path.to_str().unwrap(),
            "--host",
            "0.0.0.0",
            "--port",
            "4242",
        ]));
        let args = BackendArgs::from_settings(&settings).unwrap();
        assert_eq!(args.listen_host, "0.0.0.0".parse::<IpAddr>().unwrap());
        assert_eq!(args.port, 4242);
        assert_eq!(args.upstream.base_url, "http://127.0.0.1:9");
    }

    #[test]
    fn backend_args_reject_bad_host() {
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");
        std::fs::write(&env_path, "PEXELS_API_KEY=\"k\"\n").unwrap();
        let settings = settings_without_env(cli(&[
            "--env-file",
            env_path.to_str().unwrap(),
            "--host",
            "not-an-ip",
        ]));
        let err = BackendArgs::from_settings(&settings).unwrap_err();
        assert!(err.to_string().contains("REELFRONT_HOST"));
    }
}
