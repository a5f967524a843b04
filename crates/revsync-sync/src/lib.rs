//! Review ingestion: bounded pagination, dedup against the store, watermark planning
//! and the per-platform orchestrator driving them.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use revsync_adapters::{LiveSourceResolver, ReviewSource, SourceError, SourceResolver};
use revsync_core::{
    end_of_day, parse_review_date, DateWindow, Fingerprint, FingerprintMode, Platform, Review,
    WindowDecision, WindowError,
};
use revsync_storage::{
    BackoffPolicy, HttpClientConfig, HttpFetcher, Notifier, ReviewStore, SqliteReviewStore,
    StoreError, StoreScope, WatermarkQuery, WebhookNotifier,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "revsync-sync";
pub const DEFAULT_COUNTRY: &str = "tw";
pub const DEFAULT_START_DATE: &str = "2023-01-01";

fn fallback_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Exhaustion budget for one source: request cap plus the pause between requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageBudget {
    pub max_requests: u32,
    pub delay: Duration,
}

impl PageBudget {
    pub fn new(max_requests: u32, delay: Duration) -> Self {
        Self { max_requests, delay }
    }

    pub fn app_store() -> Self {
        Self::new(50, Duration::from_millis(500))
    }

    pub fn google_play() -> Self {
        Self::new(20, Duration::from_millis(800))
    }

    pub fn for_platform(platform: Platform) -> Self {
        match platform {
            Platform::AppStore => Self::app_store(),
            Platform::GooglePlay => Self::google_play(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The source reported no further pages, or returned an empty one.
    Exhausted,
    /// A review older than the window start was seen.
    HardStop,
    BudgetSpent,
    PageFailed(String),
}

#[derive(Debug, Clone)]
pub struct PageRun {
    pub reviews: Vec<Review>,
    pub requests: u32,
    pub skipped: usize,
    pub stop: StopReason,
}

impl PageRun {
    pub fn budget_exhausted(&self) -> bool {
        self.stop == StopReason::BudgetSpent
    }
}

/// Walks a newest-first source until the window's start is crossed, the source runs
/// dry, or the budget is spent.
#[derive(Debug, Clone, Copy)]
pub struct Paginator {
    budget: PageBudget,
}

impl Paginator {
    pub fn new(budget: PageBudget) -> Self {
        Self { budget }
    }

    pub async fn run(&self, source: &dyn ReviewSource, window: &DateWindow) -> Result<PageRun, SourceError> {
        let platform = source.platform();
        let mut cursor = source.first_cursor();
        let mut reviews = Vec::new();
        let mut requests = 0u32;
        let mut skipped = 0usize;

        let stop = loop {
            if requests >= self.budget.max_requests {
                break StopReason::BudgetSpent;
            }
            if requests > 0 && !self.budget.delay.is_zero() {
                tokio::time::sleep(self.budget.delay).await;
            }
            requests += 1;

            let page = match source.fetch_page(&cursor).await {
                Ok(page) => page,
                Err(SourceError::Transient(message)) => {
                    warn!(%platform, %cursor, error = %message, "page fetch failed; keeping partial results");
                    break StopReason::PageFailed(message);
                }
                Err(err) if requests == 1 => return Err(err),
                Err(err) => {
                    warn!(%platform, %cursor, error = %err, "source went away mid-run; keeping partial results");
                    break StopReason::PageFailed(err.to_string());
                }
            };
            if page.reviews.is_empty() {
                break StopReason::Exhausted;
            }

            let mut hard_stop = false;
            for raw in page.reviews {
                let Some(date) = parse_review_date(&raw.date) else {
                    warn!(%platform, date = %raw.date, "skipping review with unparseable date");
                    skipped += 1;
                    continue;
                };
                match window.classify(date) {
                    WindowDecision::Include => reviews.push(Review::normalize(raw, date, platform)),
                    WindowDecision::Exclude => {}
                    WindowDecision::StopSource => {
                        hard_stop = true;
                        break;
                    }
                }
            }
            info!(%platform, %cursor, request = requests, kept = reviews.len(), "fetched review page");

            if hard_stop {
                break StopReason::HardStop;
            }
            match page.next {
                Some(next) => cursor = next,
                None => break StopReason::Exhausted,
            }
        };

        Ok(PageRun {
            reviews,
            requests,
            skipped,
            stop,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    pub new_reviews: Vec<Review>,
    pub duplicate_count: usize,
}

/// Drops candidates whose fingerprint is already persisted. Order is preserved and the
/// existing set is never extended, so repeats inside one batch all pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deduplicator {
    mode: FingerprintMode,
}

impl Deduplicator {
    pub fn new(mode: FingerprintMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> FingerprintMode {
        self.mode
    }

    pub fn filter_new(&self, candidates: Vec<Review>, existing: &HashSet<Fingerprint>) -> DedupOutcome {
        let mut outcome = DedupOutcome::default();
        for review in candidates {
            if existing.contains(&review.fingerprint(self.mode)) {
                outcome.duplicate_count += 1;
            } else {
                outcome.new_reviews.push(review);
            }
        }
        outcome
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkScope {
    /// Latest date across every row of the platform.
    #[default]
    Sheet,
    /// Latest date for the same app and country only.
    App,
}

impl FromStr for WatermarkScope {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sheet" | "platform" => Ok(Self::Sheet),
            "app" => Ok(Self::App),
            other => Err(format!("unknown watermark scope {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SyncPlanner {
    default_start: DateTime<Utc>,
    scope: WatermarkScope,
}

impl Default for SyncPlanner {
    fn default() -> Self {
        Self::new(fallback_start(), WatermarkScope::default())
    }
}

impl SyncPlanner {
    pub fn new(default_start: DateTime<Utc>, scope: WatermarkScope) -> Self {
        Self { default_start, scope }
    }

    pub fn default_start(&self) -> DateTime<Utc> {
        self.default_start
    }

    pub fn scope(&self) -> WatermarkScope {
        self.scope
    }

    pub fn query_for(&self, scope: &StoreScope) -> WatermarkQuery {
        match self.scope {
            WatermarkScope::Sheet => WatermarkQuery::whole_sheet(scope.platform),
            WatermarkScope::App => WatermarkQuery::for_scope(scope),
        }
    }

    pub async fn resolve_start_date(
        &self,
        store: &dyn ReviewStore,
        scope: &StoreScope,
    ) -> Result<DateTime<Utc>, StoreError> {
        let watermark = store.read_watermark(&self.query_for(scope)).await?;
        Ok(watermark.unwrap_or(self.default_start))
    }

    /// `[watermark, end of today]`. The watermark day itself is re-read; dedup drops it.
    pub async fn incremental_window(
        &self,
        store: &dyn ReviewStore,
        scope: &StoreScope,
        now: DateTime<Utc>,
    ) -> Result<DateWindow, PlatformError> {
        let start = self.resolve_start_date(store, scope).await?;
        let end = end_of_day(now.date_naive()).max(start);
        Ok(DateWindow::new(start, end)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowMode {
    Explicit { start: String, end: String },
    Incremental,
}

#[derive(Debug, Clone)]
pub struct IngestionRequest {
    pub app_store_id: Option<String>,
    pub google_play_id: Option<String>,
    pub country: String,
    pub window: WindowMode,
}

impl IngestionRequest {
    pub fn explicit(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self::with_window(WindowMode::Explicit {
            start: start.into(),
            end: end.into(),
        })
    }

    pub fn incremental() -> Self {
        Self::with_window(WindowMode::Incremental)
    }

    fn with_window(window: WindowMode) -> Self {
        Self {
            app_store_id: None,
            google_play_id: None,
            country: DEFAULT_COUNTRY.to_string(),
            window,
        }
    }

    pub fn app_store(mut self, app_id: impl Into<String>) -> Self {
        self.app_store_id = Some(app_id.into());
        self
    }

    pub fn google_play(mut self, app_id: impl Into<String>) -> Self {
        self.google_play_id = Some(app_id.into());
        self
    }

    pub fn country(mut self, country: impl Into<String>) -> Self {
        self.country = country.into();
        self
    }

    pub fn targets(&self) -> Vec<(Platform, &str)> {
        [
            (Platform::AppStore, self.app_store_id.as_deref()),
            (Platform::GooglePlay, self.google_play_id.as_deref()),
        ]
        .into_iter()
        .filter_map(|(platform, id)| {
            id.map(str::trim)
                .filter(|id| !id.is_empty())
                .map(|id| (platform, id))
        })
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestError {
    #[error("invalid ingestion request: {0}")]
    Config(String),
}

/// Failure inside one platform's run; recorded on its outcome, never propagated.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Window(#[from] WindowError),
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformOutcome {
    pub app_id: String,
    pub window: Option<DateWindow>,
    pub count: usize,
    pub written: usize,
    pub duplicates: usize,
    pub requests: u32,
    pub budget_exhausted: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reviews: Vec<Review>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionReport {
    pub platforms: BTreeMap<Platform, PlatformOutcome>,
    pub total_count: usize,
    pub total_written: usize,
}

impl IngestionReport {
    fn record(&mut self, platform: Platform, outcome: PlatformOutcome) {
        self.total_count += outcome.count;
        self.total_written += outcome.written;
        self.platforms.insert(platform, outcome);
    }

    pub fn outcome(&self, platform: Platform) -> Option<&PlatformOutcome> {
        self.platforms.get(&platform)
    }

    pub fn has_errors(&self) -> bool {
        self.platforms.values().any(|o| o.error.is_some())
    }
}

pub struct IngestionOrchestrator {
    resolver: Arc<dyn SourceResolver>,
    store: Arc<dyn ReviewStore>,
    notifier: Option<Arc<dyn Notifier>>,
    planner: SyncPlanner,
    dedup: Deduplicator,
    budgets: BTreeMap<Platform, PageBudget>,
}

impl IngestionOrchestrator {
    pub fn new(resolver: Arc<dyn SourceResolver>, store: Arc<dyn ReviewStore>) -> Self {
        Self {
            resolver,
            store,
            notifier: None,
            planner: SyncPlanner::default(),
            dedup: Deduplicator::default(),
            budgets: Platform::ALL
                .into_iter()
                .map(|p| (p, PageBudget::for_platform(p)))
                .collect(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_planner(mut self, planner: SyncPlanner) -> Self {
        self.planner = planner;
        self
    }

    pub fn with_fingerprint_mode(mut self, mode: FingerprintMode) -> Self {
        self.dedup = Deduplicator::new(mode);
        self
    }

    pub fn with_budget(mut self, platform: Platform, budget: PageBudget) -> Self {
        self.budgets.insert(platform, budget);
        self
    }

    /// Applies planner, fingerprint mode and budgets from `config`.
    pub fn configured(self, config: &SyncConfig) -> Self {
        self.with_planner(SyncPlanner::new(config.default_start, config.watermark_scope))
            .with_fingerprint_mode(config.fingerprint_mode)
            .with_budget(Platform::AppStore, config.app_store_budget)
            .with_budget(Platform::GooglePlay, config.google_play_budget)
    }

    pub fn budget(&self, platform: Platform) -> PageBudget {
        self.budgets
            .get(&platform)
            .copied()
            .unwrap_or_else(|| PageBudget::for_platform(platform))
    }

    pub fn store(&self) -> Arc<dyn ReviewStore> {
        self.store.clone()
    }

    /// Fetch only; reviews are returned on each outcome and nothing is persisted.
    pub async fn fetch(&self, request: &IngestionRequest) -> Result<IngestionReport, IngestError> {
        self.run(request, false).await
    }

    /// Fetch, drop already-stored reviews, append the rest.
    pub async fn ingest(&self, request: &IngestionRequest) -> Result<IngestionReport, IngestError> {
        self.run(request, true).await
    }

    async fn run(&self, request: &IngestionRequest, persist: bool) -> Result<IngestionReport, IngestError> {
        let targets = request.targets();
        if targets.is_empty() {
            return Err(IngestError::Config(
                "at least one of appStoreId or googlePlayId is required".into(),
            ));
        }
        let explicit = match &request.window {
            WindowMode::Explicit { start, end } => {
                if start.trim().is_empty() || end.trim().is_empty() {
                    return Err(IngestError::Config("startDate and endDate are required".into()));
                }
                Some(DateWindow::from_dates(start, end).map_err(|e| IngestError::Config(e.to_string()))?)
            }
            WindowMode::Incremental => None,
        };
        let country = match request.country.trim() {
            "" => DEFAULT_COUNTRY.to_string(),
            c => c.to_ascii_lowercase(),
        };

        let mut report = IngestionReport::default();
        for (platform, app_id) in targets {
            let scope = StoreScope::new(platform, app_id, country.clone());
            let span = info_span!("platform_run", %platform, app_id, country = %country, persist);
            let outcome = self.run_platform(&scope, explicit, persist).instrument(span).await;
            report.record(platform, outcome);
        }
        info!(
            total_count = report.total_count,
            total_written = report.total_written,
            "ingestion run finished"
        );
        Ok(report)
    }

    async fn run_platform(&self, scope: &StoreScope, explicit: Option<DateWindow>, persist: bool) -> PlatformOutcome {
        let mut outcome = PlatformOutcome {
            app_id: scope.app_id.clone(),
            ..PlatformOutcome::default()
        };
        if let Err(err) = self.drive_platform(scope, explicit, persist, &mut outcome).await {
            warn!(platform = %scope.platform, error = %err, "platform run failed");
            outcome.error = Some(err.to_string());
        }
        outcome
    }

    async fn drive_platform(
        &self,
        scope: &StoreScope,
        explicit: Option<DateWindow>,
        persist: bool,
        outcome: &mut PlatformOutcome,
    ) -> Result<(), PlatformError> {
        let platform = scope.platform;
        let source = self.resolver.resolve(platform, &scope.app_id, &scope.country)?;
        let window = match explicit {
            Some(window) => window,
            None => {
                self.planner
                    .incremental_window(self.store.as_ref(), scope, Utc::now())
                    .await?
            }
        };
        outcome.window = Some(window);

        let run = Paginator::new(self.budget(platform)).run(source.as_ref(), &window).await?;
        outcome.requests = run.requests;
        outcome.budget_exhausted = run.budget_exhausted();
        outcome.count = run.reviews.len();
        info!(%platform, %window, count = outcome.count, requests = run.requests, stop = ?run.stop, "pagination finished");

        if let Some(notifier) = &self.notifier {
            if !run.reviews.is_empty() {
                notifier.notify(platform, &run.reviews).await;
            }
        }

        if !persist {
            outcome.reviews = run.reviews;
            return Ok(());
        }

        let existing = self.store.read_fingerprints(platform, self.dedup.mode()).await?;
        let dedup = self.dedup.filter_new(run.reviews, &existing);
        outcome.duplicates = dedup.duplicate_count;
        if dedup.duplicate_count > 0 {
            info!(%platform, duplicates = dedup.duplicate_count, "skipped already stored reviews");
        }
        outcome.written = self.store.append(scope, &dedup.new_reviews).await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub lang: String,
    pub country: String,
    pub default_start: DateTime<Utc>,
    pub watermark_scope: WatermarkScope,
    pub fingerprint_mode: FingerprintMode,
    pub app_store_budget: PageBudget,
    pub google_play_budget: PageBudget,
    pub webhook_url: Option<String>,
    pub scheduler_enabled: bool,
    pub sync_cron_1: String,
    pub sync_cron_2: String,
    pub web_port: u16,
    pub apps_file: PathBuf,
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_budget(requests_key: &str, delay_key: &str, default: PageBudget) -> PageBudget {
    PageBudget::new(
        env_parse(requests_key, default.max_requests),
        Duration::from_millis(env_parse(delay_key, default.delay.as_millis() as u64)),
    )
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://./data/reviews.db".to_string()),
            user_agent: std::env::var("REVSYNC_USER_AGENT")
                .unwrap_or_else(|_| "revsync-bot/0.1".to_string()),
            http_timeout_secs: env_parse("REVSYNC_HTTP_TIMEOUT_SECS", 20),
            lang: std::env::var("REVSYNC_LANG").unwrap_or_else(|_| "zh-TW".to_string()),
            country: std::env::var("REVSYNC_COUNTRY").unwrap_or_else(|_| DEFAULT_COUNTRY.to_string()),
            default_start: std::env::var("REVSYNC_DEFAULT_START")
                .ok()
                .and_then(|v| parse_review_date(&v))
                .unwrap_or_else(fallback_start),
            watermark_scope: env_parse("REVSYNC_WATERMARK_SCOPE", WatermarkScope::Sheet),
            fingerprint_mode: env_parse("REVSYNC_FINGERPRINT", FingerprintMode::Prefix),
            app_store_budget: env_budget("APPSTORE_MAX_PAGES", "APPSTORE_DELAY_MS", PageBudget::app_store()),
            google_play_budget: env_budget(
                "GOOGLEPLAY_MAX_REQUESTS",
                "GOOGLEPLAY_DELAY_MS",
                PageBudget::google_play(),
            ),
            webhook_url: std::env::var("MAKE_WEBHOOK_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            scheduler_enabled: std::env::var("REVSYNC_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            sync_cron_1: std::env::var("SYNC_CRON_1").unwrap_or_else(|_| "0 0 6 * * *".to_string()),
            sync_cron_2: std::env::var("SYNC_CRON_2").unwrap_or_else(|_| "0 0 18 * * *".to_string()),
            web_port: env_parse("REVSYNC_WEB_PORT", 3000),
            apps_file: std::env::var("REVSYNC_APPS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./apps.yaml")),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: self.http_timeout(),
            user_agent: Some(self.user_agent.clone()),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Opens the SQLite store, runs migrations and wires live sources plus the optional webhook.
pub async fn build_live_orchestrator(config: &SyncConfig) -> Result<IngestionOrchestrator> {
    let store = SqliteReviewStore::connect(&config.database_url)
        .await
        .with_context(|| format!("connecting to {}", config.database_url))?;
    store.migrate().await.context("running review store migrations")?;

    let http = Arc::new(HttpFetcher::new(config.http_client_config())?);
    let resolver = LiveSourceResolver::new(http, config.lang.clone());
    let mut orchestrator =
        IngestionOrchestrator::new(Arc::new(resolver), Arc::new(store)).configured(config);

    if let Some(url) = &config.webhook_url {
        let notifier = WebhookNotifier::new(url.clone(), config.http_timeout())?;
        orchestrator = orchestrator.with_notifier(Arc::new(notifier));
    }
    Ok(orchestrator)
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppRegistry {
    #[serde(default)]
    pub apps: Vec<AppConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub name: String,
    #[serde(default)]
    pub app_store_id: Option<String>,
    #[serde(default)]
    pub google_play_id: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl AppConfig {
    pub fn request(&self, window: WindowMode, default_country: &str) -> IngestionRequest {
        IngestionRequest {
            app_store_id: self.app_store_id.clone(),
            google_play_id: self.google_play_id.clone(),
            country: self
                .country
                .clone()
                .unwrap_or_else(|| default_country.to_string()),
            window,
        }
    }
}

impl AppRegistry {
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing app registry")
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn enabled(&self) -> impl Iterator<Item = &AppConfig> {
        self.apps.iter().filter(|app| app.enabled)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppRunSummary {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<IngestionReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub apps: Vec<AppRunSummary>,
}

impl UpdateRunSummary {
    pub fn total_written(&self) -> usize {
        self.apps
            .iter()
            .filter_map(|a| a.report.as_ref())
            .map(|r| r.total_written)
            .sum()
    }
}

/// Incremental ingest for every enabled registry entry. One app failing does not stop the rest.
pub async fn run_registry_update(
    orchestrator: &IngestionOrchestrator,
    registry: &AppRegistry,
    default_country: &str,
) -> UpdateRunSummary {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let mut apps = Vec::new();

    for app in registry.enabled() {
        let request = app.request(WindowMode::Incremental, default_country);
        let span = info_span!("registry_app", %run_id, app = %app.name);
        let summary = match orchestrator.ingest(&request).instrument(span).await {
            Ok(report) => AppRunSummary {
                name: app.name.clone(),
                report: Some(report),
                error: None,
            },
            Err(err) => {
                warn!(app = %app.name, error = %err, "skipping registry entry");
                AppRunSummary {
                    name: app.name.clone(),
                    report: None,
                    error: Some(err.to_string()),
                }
            }
        };
        apps.push(summary);
    }

    UpdateRunSummary {
        run_id,
        started_at,
        finished_at: Utc::now(),
        apps,
    }
}

pub async fn run_update_once_from_env() -> Result<UpdateRunSummary> {
    let config = SyncConfig::from_env();
    let registry = AppRegistry::load(&config.apps_file).await?;
    let orchestrator = build_live_orchestrator(&config).await?;
    let summary = run_registry_update(&orchestrator, &registry, &config.country).await;
    info!(
        run_id = %summary.run_id,
        apps = summary.apps.len(),
        written = summary.total_written(),
        "registry update finished"
    );
    Ok(summary)
}

pub async fn maybe_build_scheduler(
    config: &SyncConfig,
    orchestrator: Arc<IngestionOrchestrator>,
    registry: Arc<AppRegistry>,
) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    for cron in [&config.sync_cron_1, &config.sync_cron_2] {
        let orchestrator = orchestrator.clone();
        let registry = registry.clone();
        let country = config.country.clone();
        let job = Job::new_async(cron, move |_uuid, _l| {
            let orchestrator = orchestrator.clone();
            let registry = registry.clone();
            let country = country.clone();
            Box::pin(async move {
                let summary = run_registry_update(&orchestrator, &registry, &country).await;
                info!(run_id = %summary.run_id, written = summary.total_written(), "scheduled update finished");
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
    }
    Ok(Some(sched))
}
