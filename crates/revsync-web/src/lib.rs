//! JSON HTTP API over the ingestion orchestrator.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use revsync_core::Platform;
use revsync_sync::{
    build_live_orchestrator, IngestError, IngestionOrchestrator, IngestionReport, IngestionRequest,
    PlatformOutcome, SyncConfig, DEFAULT_COUNTRY,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use tracing::{error, info};

pub const CRATE_NAME: &str = "revsync-web";

const APP_STORE_EXAMPLE: &str =
    "/reviews/appstore?appId=123456789&startDate=2024-01-01&endDate=2024-12-31&country=tw";
const GOOGLE_PLAY_EXAMPLE: &str =
    "/reviews/googleplay?appId=com.example.app&startDate=2024-01-01&endDate=2024-12-31";
const ALL_EXAMPLE: &str =
    "/reviews/all?appStoreId=123456789&googlePlayId=com.example.app&startDate=2024-01-01&endDate=2024-12-31";
const WRITE_EXAMPLE: &str = r#"/reviews/all/write (POST) body: { "appStoreId": "123", "googlePlayId": "com.example.app", "startDate": "2024-01-01", "endDate": "2024-12-31" }"#;
const UPDATE_EXAMPLE: &str =
    r#"/reviews/update (POST) body: { "appStoreId": "123", "googlePlayId": "com.example.app", "country": "tw" }"#;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<IngestionOrchestrator>,
    pub default_country: String,
}

impl AppState {
    pub fn new(orchestrator: Arc<IngestionOrchestrator>) -> Self {
        Self {
            orchestrator,
            default_country: DEFAULT_COUNTRY.to_string(),
        }
    }

    pub fn with_default_country(mut self, country: impl Into<String>) -> Self {
        self.default_country = country.into();
        self
    }

    fn country_or_default(&self, country: Option<&str>) -> String {
        present(country).unwrap_or(self.default_country.as_str()).to_string()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlatformQuery {
    app_id: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
    country: Option<String>,
}

/// Shared by `GET /reviews/all` (query string) and the two POST routes (JSON body).
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MultiPlatformParams {
    app_store_id: Option<String>,
    google_play_id: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
    country: Option<String>,
}

impl MultiPlatformParams {
    fn has_target(&self) -> bool {
        present(self.app_store_id.as_deref()).is_some() || present(self.google_play_id.as_deref()).is_some()
    }

    fn apply_targets(&self, mut request: IngestionRequest) -> IngestionRequest {
        if let Some(id) = present(self.app_store_id.as_deref()) {
            request = request.app_store(id);
        }
        if let Some(id) = present(self.google_play_id.as_deref()) {
            request = request.google_play(id);
        }
        request
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn platform_key(platform: Platform) -> &'static str {
    match platform {
        Platform::AppStore => "appStore",
        Platform::GooglePlay => "googlePlay",
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/reviews/appstore", get(app_store_handler))
        .route("/reviews/googleplay", get(google_play_handler))
        .route("/reviews/all", get(all_reviews_handler))
        .route("/reviews/update", post(update_handler))
        .route("/reviews/all/write", post(write_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "review API listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = SyncConfig::from_env();
    let orchestrator = build_live_orchestrator(&config).await?;
    let state = AppState::new(Arc::new(orchestrator)).with_default_country(config.country.clone());
    serve(state, config.web_port).await
}

async fn index_handler() -> Response {
    Json(json!({
        "message": "App Review Ingestion API",
        "endpoints": [
            "GET /reviews/appstore?appId=123&startDate=2024-01-01&endDate=2024-12-31&country=tw",
            "GET /reviews/googleplay?appId=com.example.app&startDate=2024-01-01&endDate=2024-12-31",
            "GET /reviews/all?appStoreId=123&googlePlayId=com.example.app&startDate=2024-01-01&endDate=2024-12-31",
            "POST /reviews/update",
            "POST /reviews/all/write",
            "GET /health",
        ],
    }))
    .into_response()
}

async fn health_handler() -> Response {
    Json(json!({ "status": "OK", "timestamp": Utc::now().to_rfc3339() })).into_response()
}

async fn app_store_handler(State(state): State<Arc<AppState>>, Query(query): Query<PlatformQuery>) -> Response {
    platform_reviews(&state, Platform::AppStore, query).await
}

async fn google_play_handler(State(state): State<Arc<AppState>>, Query(query): Query<PlatformQuery>) -> Response {
    platform_reviews(&state, Platform::GooglePlay, query).await
}

async fn platform_reviews(state: &AppState, platform: Platform, query: PlatformQuery) -> Response {
    let example = match platform {
        Platform::AppStore => APP_STORE_EXAMPLE,
        Platform::GooglePlay => GOOGLE_PLAY_EXAMPLE,
    };
    let (Some(app_id), Some(start), Some(end)) = (
        present(query.app_id.as_deref()),
        present(query.start_date.as_deref()),
        present(query.end_date.as_deref()),
    ) else {
        return bad_request("appId, startDate and endDate are required", example);
    };

    let country = state.country_or_default(query.country.as_deref());
    let request = IngestionRequest::explicit(start, end).country(country.clone());
    let request = match platform {
        Platform::AppStore => request.app_store(app_id),
        Platform::GooglePlay => request.google_play(app_id),
    };

    info!(%platform, app_id, start, end, %country, "fetching reviews");
    let mut report = match state.orchestrator.fetch(&request).await {
        Ok(report) => report,
        Err(err) => return ingest_error(err, example),
    };
    let Some(outcome) = report.platforms.remove(&platform) else {
        return server_error(format!("no result for {platform}"));
    };
    if let Some(err) = outcome.error {
        return server_error(err);
    }

    Json(json!({
        "platform": platform.display_name(),
        "appId": app_id,
        "dateRange": { "startDate": start, "endDate": end },
        "country": country,
        "count": outcome.count,
        "reviews": outcome.reviews,
    }))
    .into_response()
}

async fn all_reviews_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MultiPlatformParams>,
) -> Response {
    let (true, Some(start), Some(end)) = (
        params.has_target(),
        present(params.start_date.as_deref()),
        present(params.end_date.as_deref()),
    ) else {
        return bad_request(
            "provide at least one of appStoreId or googlePlayId, plus startDate and endDate",
            ALL_EXAMPLE,
        );
    };

    let country = state.country_or_default(params.country.as_deref());
    let request = params.apply_targets(IngestionRequest::explicit(start, end).country(country));
    let report = match state.orchestrator.fetch(&request).await {
        Ok(report) => report,
        Err(err) => return ingest_error(err, ALL_EXAMPLE),
    };

    let platforms = per_platform(&report, |outcome| json!({ "count": outcome.count, "reviews": outcome.reviews }));
    Json(json!({
        "dateRange": { "startDate": start, "endDate": end },
        "totalCount": report.total_count,
        "platforms": platforms,
    }))
    .into_response()
}

async fn update_handler(State(state): State<Arc<AppState>>, Json(params): Json<MultiPlatformParams>) -> Response {
    if !params.has_target() {
        return bad_request("provide at least one of appStoreId or googlePlayId", UPDATE_EXAMPLE);
    }
    let country = state.country_or_default(params.country.as_deref());
    let request = params.apply_targets(IngestionRequest::incremental().country(country));
    let report = match state.orchestrator.ingest(&request).await {
        Ok(report) => report,
        Err(err) => return ingest_error(err, UPDATE_EXAMPLE),
    };

    let updated = per_platform(&report, |outcome| {
        json!({
            "count": outcome.count,
            "written": outcome.written,
            "duplicates": outcome.duplicates,
            "window": outcome.window,
        })
    });
    Json(json!({
        "updated": updated,
        "dateRange": { "start": "latest stored review", "end": Utc::now().date_naive().to_string() },
        "totalWritten": report.total_written,
    }))
    .into_response()
}

async fn write_handler(State(state): State<Arc<AppState>>, Json(params): Json<MultiPlatformParams>) -> Response {
    let (true, Some(start), Some(end)) = (
        params.has_target(),
        present(params.start_date.as_deref()),
        present(params.end_date.as_deref()),
    ) else {
        return bad_request(
            "provide at least one of appStoreId or googlePlayId, plus startDate and endDate",
            WRITE_EXAMPLE,
        );
    };

    let country = state.country_or_default(params.country.as_deref());
    let request = params.apply_targets(IngestionRequest::explicit(start, end).country(country));
    let report = match state.orchestrator.ingest(&request).await {
        Ok(report) => report,
        Err(err) => return ingest_error(err, WRITE_EXAMPLE),
    };

    let results = per_platform(&report, |outcome| {
        json!({
            "count": outcome.count,
            "written": outcome.written,
            "duplicates": outcome.duplicates,
        })
    });
    Json(json!({
        "message": "reviews written to store",
        "dateRange": { "startDate": start, "endDate": end },
        "totalWritten": report.total_written,
        "results": results,
    }))
    .into_response()
}

/// `{appStore: .., googlePlay: ..}` with `{error}` in place of a failed platform's body.
fn per_platform(report: &IngestionReport, body: impl Fn(&PlatformOutcome) -> Value) -> Map<String, Value> {
    report
        .platforms
        .iter()
        .map(|(platform, outcome)| {
            let value = match &outcome.error {
                Some(err) => json!({ "error": err }),
                None => body(outcome),
            };
            (platform_key(*platform).to_string(), value)
        })
        .collect()
}

fn bad_request(message: impl Into<String>, example: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": message.into(), "example": example })),
    )
        .into_response()
}

fn ingest_error(err: IngestError, example: &str) -> Response {
    match err {
        IngestError::Config(message) => bad_request(message, example),
    }
}

fn server_error(message: impl Into<String>) -> Response {
    let message = message.into();
    error!(error = %message, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": message })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use http_body_util::BodyExt;
    use revsync_adapters::ScriptedSourceResolver;
    use revsync_storage::MemoryReviewStore;
    use revsync_sync::PageBudget;
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use tower::ServiceExt;

    fn workspace_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .canonicalize()
            .unwrap()
    }

    fn test_app(resolver: ScriptedSourceResolver) -> (Router, Arc<MemoryReviewStore>) {
        let store = Arc::new(MemoryReviewStore::new());
        let orchestrator = IngestionOrchestrator::new(Arc::new(resolver), store.clone())
            .with_budget(Platform::AppStore, PageBudget::new(50, Duration::ZERO))
            .with_budget(Platform::GooglePlay, PageBudget::new(20, Duration::ZERO));
        (app(AppState::new(Arc::new(orchestrator))), store)
    }

    fn fixture_app() -> (Router, Arc<MemoryReviewStore>) {
        test_app(ScriptedSourceResolver::from_fixture_dir(workspace_root().join("fixtures")).unwrap())
    }

    async fn json_body(resp: Response) -> Value {
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn handler_smoke_index_and_health() {
        let (app, _) = fixture_app();
        let resp = app.clone().oneshot(get("/")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert!(body["endpoints"].as_array().unwrap().len() >= 4);

        let resp = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["status"], "OK");
    }

    #[tokio::test]
    async fn app_store_route_returns_windowed_reviews() {
        let (app, store) = fixture_app();
        let resp = app
            .oneshot(get("/reviews/appstore?appId=352743563&startDate=2024-01-01&endDate=2024-01-31"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = json_body(resp).await;
        assert_eq!(body["platform"], "App Store");
        assert_eq!(body["country"], "tw");
        assert_eq!(body["count"], 1);
        assert_eq!(body["reviews"][0]["author"], "Alice");
        assert_eq!(body["dateRange"]["endDate"], "2024-01-31");
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn missing_parameters_are_a_bad_request_with_example() {
        let (app, _) = fixture_app();
        let resp = app
            .clone()
            .oneshot(get("/reviews/googleplay?appId=com.mtk&startDate=2024-01-01"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = json_body(resp).await;
        assert!(body["example"].as_str().unwrap().starts_with("/reviews/googleplay"));

        let resp = app
            .oneshot(post_json("/reviews/update", json!({ "country": "tw" })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn inverted_window_is_a_bad_request() {
        let (app, _) = fixture_app();
        let resp = app
            .oneshot(get("/reviews/appstore?appId=1&startDate=2024-02-01&endDate=2024-01-01"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unavailable_platform_is_a_server_error_on_its_own_route() {
        let (app, _) = test_app(ScriptedSourceResolver::new().unavailable(Platform::AppStore, "feed removed"));
        let resp = app
            .oneshot(get("/reviews/appstore?appId=1&startDate=2024-01-01&endDate=2024-01-31"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json_body(resp).await["error"].as_str().unwrap().contains("feed removed"));
    }

    #[tokio::test]
    async fn all_route_isolates_platform_failures() {
        let resolver = ScriptedSourceResolver::from_fixture_dir(workspace_root().join("fixtures"))
            .unwrap()
            .unavailable(Platform::AppStore, "feed removed");
        let (app, _) = test_app(resolver);
        let resp = app
            .oneshot(get(
                "/reviews/all?appStoreId=1&googlePlayId=com.mtk&startDate=2024-01-01&endDate=2024-01-31",
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = json_body(resp).await;
        assert!(body["platforms"]["appStore"]["error"].is_string());
        assert_eq!(body["platforms"]["googlePlay"]["count"], 3);
        assert_eq!(body["totalCount"], 3);
    }

    #[tokio::test]
    async fn write_route_persists_once() {
        let (app, store) = fixture_app();
        let payload = json!({
            "appStoreId": "352743563",
            "googlePlayId": "com.mtk",
            "startDate": "2024-01-01",
            "endDate": "2024-01-31",
        });

        let resp = app.clone().oneshot(post_json("/reviews/all/write", payload.clone())).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["results"]["appStore"]["written"], 1);
        assert_eq!(body["results"]["googlePlay"]["written"], 3);
        assert_eq!(store.len().await, 4);

        let resp = app.oneshot(post_json("/reviews/all/write", payload)).await.unwrap();
        let body = json_body(resp).await;
        assert_eq!(body["totalWritten"], 0);
        assert_eq!(body["results"]["googlePlay"]["duplicates"], 3);
        assert_eq!(store.len().await, 4);
    }

    #[tokio::test]
    async fn update_route_ingests_from_the_default_start() {
        let (app, store) = fixture_app();
        let resp = app
            .oneshot(post_json("/reviews/update", json!({ "appStoreId": "352743563" })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = json_body(resp).await;
        assert_eq!(body["updated"]["appStore"]["written"], 3);
        assert!(body["updated"]["appStore"]["window"]["start"]
            .as_str()
            .unwrap()
            .starts_with("2023-01-01"));
        assert_eq!(store.len().await, 3);
    }
}
