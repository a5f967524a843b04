//! Review persistence, HTTP transport and webhook delivery for revsync.

use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use revsync_core::{canonical_date, parse_review_date, Fingerprint, FingerprintMode, Platform, Review};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "revsync-storage";

/// Where a batch of reviews belongs: one platform "sheet", tagged with app and country.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreScope {
    pub platform: Platform,
    pub app_id: String,
    pub country: String,
}

impl StoreScope {
    pub fn new(platform: Platform, app_id: impl Into<String>, country: impl Into<String>) -> Self {
        Self {
            platform,
            app_id: app_id.into(),
            country: country.into(),
        }
    }
}

/// Filter for the watermark lookup. `None` fields are not filtered on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatermarkQuery {
    pub platform: Platform,
    pub app_id: Option<String>,
    pub country: Option<String>,
}

impl WatermarkQuery {
    pub fn whole_sheet(platform: Platform) -> Self {
        Self {
            platform,
            app_id: None,
            country: None,
        }
    }

    pub fn for_scope(scope: &StoreScope) -> Self {
        Self {
            platform: scope.platform,
            app_id: Some(scope.app_id.clone()),
            country: Some(scope.country.clone()),
        }
    }

    fn matches(&self, row: &StoredReview) -> bool {
        row.review.platform == self.platform
            && self.app_id.as_deref().map_or(true, |id| id == row.app_id)
            && self.country.as_deref().map_or(true, |c| c == row.country)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored row is unreadable: {0}")]
    Corrupt(String),
    #[error("{0}")]
    Unavailable(String),
}

/// Append-only review persistence.
#[async_trait]
pub trait ReviewStore: Send + Sync {
    /// Fingerprints of every persisted row on the platform's sheet.
    async fn read_fingerprints(
        &self,
        platform: Platform,
        mode: FingerprintMode,
    ) -> Result<HashSet<Fingerprint>, StoreError>;

    /// Latest persisted review date matching `query`, if any row matches.
    async fn read_watermark(&self, query: &WatermarkQuery) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Appends `reviews` under `scope`. An empty slice is a no-op.
    async fn append(&self, scope: &StoreScope, reviews: &[Review]) -> Result<usize, StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredReview {
    pub id: Uuid,
    pub app_id: String,
    pub country: String,
    pub review: Review,
}

#[derive(Debug, Default)]
pub struct MemoryReviewStore {
    rows: Mutex<Vec<StoredReview>>,
}

impl MemoryReviewStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }
}

#[async_trait]
impl ReviewStore for MemoryReviewStore {
    async fn read_fingerprints(
        &self,
        platform: Platform,
        mode: FingerprintMode,
    ) -> Result<HashSet<Fingerprint>, StoreError> {
        let rows = self.rows.lock().await;
        Ok(rows
            .iter()
            .filter(|row| row.review.platform == platform)
            .map(|row| row.review.fingerprint(mode))
            .collect())
    }

    async fn read_watermark(&self, query: &WatermarkQuery) -> Result<Option<DateTime<Utc>>, StoreError> {
        let rows = self.rows.lock().await;
        Ok(rows
            .iter()
            .filter(|row| query.matches(row))
            .map(|row| row.review.date)
            .max())
    }

    async fn append(&self, scope: &StoreScope, reviews: &[Review]) -> Result<usize, StoreError> {
        if reviews.is_empty() {
            return Ok(0);
        }
        let mut rows = self.rows.lock().await;
        rows.extend(reviews.iter().map(|review| StoredReview {
            id: Uuid::new_v4(),
            app_id: scope.app_id.clone(),
            country: scope.country.clone(),
            review: Review {
                platform: scope.platform,
                ..review.clone()
            },
        }));
        Ok(reviews.len())
    }
}

/// SQLite-backed store; one `reviews` table partitioned by platform.
#[derive(Debug, Clone)]
pub struct SqliteReviewStore {
    pool: SqlitePool,
}

impl SqliteReviewStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Create the schema. Safe to run repeatedly.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reviews (
                id TEXT PRIMARY KEY,
                platform TEXT NOT NULL,
                app_id TEXT NOT NULL,
                country TEXT NOT NULL,
                date TEXT NOT NULL,
                score INTEGER NOT NULL,
                text TEXT NOT NULL,
                version TEXT,
                title TEXT,
                author TEXT NOT NULL,
                inserted_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_reviews_platform_date ON reviews(platform, date DESC)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_reviews_scope ON reviews(platform, app_id, country)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count(&self, platform: Platform) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reviews WHERE platform = ?")
            .bind(platform.slug())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl ReviewStore for SqliteReviewStore {
    async fn read_fingerprints(
        &self,
        platform: Platform,
        mode: FingerprintMode,
    ) -> Result<HashSet<Fingerprint>, StoreError> {
        let rows = sqlx::query("SELECT date, author, text FROM reviews WHERE platform = ?")
            .bind(platform.slug())
            .fetch_all(&self.pool)
            .await?;

        let mut out = HashSet::with_capacity(rows.len());
        for row in rows {
            let date: String = row.try_get("date")?;
            let author: String = row.try_get("author")?;
            let text: String = row.try_get("text")?;
            out.insert(Fingerprint::from_parts(mode, &date, &author, &text));
        }
        Ok(out)
    }

    async fn read_watermark(&self, query: &WatermarkQuery) -> Result<Option<DateTime<Utc>>, StoreError> {
        let mut sql = String::from("SELECT MAX(date) FROM reviews WHERE platform = ?");
        if query.app_id.is_some() {
            sql.push_str(" AND app_id = ?");
        }
        if query.country.is_some() {
            sql.push_str(" AND country = ?");
        }

        let mut scalar = sqlx::query_scalar::<_, Option<String>>(&sql).bind(query.platform.slug());
        if let Some(app_id) = &query.app_id {
            scalar = scalar.bind(app_id.as_str());
        }
        if let Some(country) = &query.country {
            scalar = scalar.bind(country.as_str());
        }

        match scalar.fetch_one(&self.pool).await? {
            None => Ok(None),
            Some(raw) => parse_review_date(&raw)
                .map(Some)
                .ok_or_else(|| StoreError::Corrupt(format!("date column holds {raw:?}"))),
        }
    }

    async fn append(&self, scope: &StoreScope, reviews: &[Review]) -> Result<usize, StoreError> {
        if reviews.is_empty() {
            return Ok(0);
        }
        let inserted_at = canonical_date(Utc::now());
        let mut tx = self.pool.begin().await?;
        for review in reviews {
            sqlx::query(
                r#"
                INSERT INTO reviews (id, platform, app_id, country, date, score, text, version, title, author, inserted_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(scope.platform.slug())
            .bind(&scope.app_id)
            .bind(&scope.country)
            .bind(review.date_key())
            .bind(review.score)
            .bind(&review.text)
            .bind(review.version.as_deref())
            .bind(review.title.as_deref())
            .bind(&review.author)
            .bind(&inserted_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(reviews.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Shared HTTP client for review sources, retrying transient failures.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            backoff: config.backoff,
        })
    }

    pub async fn get(&self, platform: Platform, url: &str) -> Result<FetchedResponse, FetchError> {
        self.send_with_retry(platform, url, |client| client.get(url))
            .instrument(info_span!("http_get", platform = platform.slug(), url))
            .await
    }

    pub async fn post_form(
        &self,
        platform: Platform,
        url: &str,
        form: &[(&str, &str)],
    ) -> Result<FetchedResponse, FetchError> {
        self.send_with_retry(platform, url, |client| client.post(url).form(form))
            .instrument(info_span!("http_post", platform = platform.slug(), url))
            .await
    }

    async fn send_with_retry<F>(
        &self,
        platform: Platform,
        url: &str,
        build: F,
    ) -> Result<FetchedResponse, FetchError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let mut attempt = 0usize;
        loop {
            let can_retry = attempt < self.backoff.max_retries;
            match build(&self.client).send().await {
                Ok(resp) if resp.status().is_success() => {
                    let body = resp.bytes().await?.to_vec();
                    return Ok(FetchedResponse { body });
                }
                Ok(resp) => {
                    let status = resp.status();
                    if !(can_retry && classify_status(status) == RetryDisposition::Retryable) {
                        return Err(FetchError::HttpStatus {
                            status: status.as_u16(),
                            url: resp.url().to_string(),
                        });
                    }
                    warn!(%platform, status = status.as_u16(), attempt, "retrying review request");
                }
                Err(err) => {
                    if !(can_retry && classify_reqwest_error(&err) == RetryDisposition::Retryable) {
                        return Err(FetchError::Request(err));
                    }
                    warn!(%platform, error = %err, attempt, url, "retrying review request");
                }
            }
            tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
            attempt += 1;
        }
    }
}

/// Out-of-band delivery of a fetched batch. Implementations swallow their own failures.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, platform: Platform, reviews: &[Review]);
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    platform: &'static str,
    count: usize,
    reviews: &'a [Review],
}

/// POSTs `{platform, count, reviews}` JSON to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building webhook client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, platform: Platform, reviews: &[Review]) {
        let payload = WebhookPayload {
            platform: platform.display_name(),
            count: reviews.len(),
            reviews,
        };
        match self.client.post(&self.url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!(%platform, count = reviews.len(), "delivered reviews to webhook");
            }
            Ok(resp) => {
                warn!(%platform, status = resp.status().as_u16(), "webhook rejected review batch");
            }
            Err(err) => {
                warn!(%platform, error = %err, "webhook delivery failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn review(platform: Platform, day: u32, author: &str, text: &str) -> Review {
        Review {
            date: Utc.with_ymd_and_hms(2024, 1, day, 9, 0, 0).single().unwrap(),
            score: 4,
            text: text.to_string(),
            version: Some("2.0.1".into()),
            title: None,
            author: author.to_string(),
            platform,
        }
    }

    async fn sqlite_store(dir: &tempfile::TempDir) -> SqliteReviewStore {
        let url = format!("sqlite://{}", dir.path().join("nested/reviews.db").display());
        let store = SqliteReviewStore::connect(&url).await.expect("connect");
        store.migrate().await.expect("migrate");
        store
    }

    #[tokio::test]
    async fn memory_store_appends_and_reads_back_fingerprints() {
        let store = MemoryReviewStore::new();
        let scope = StoreScope::new(Platform::GooglePlay, "com.example", "tw");
        assert_eq!(store.append(&scope, &[]).await.unwrap(), 0);

        let batch = vec![
            review(Platform::GooglePlay, 3, "Alice", "Great app!!!"),
            review(Platform::GooglePlay, 5, "Bob", "Crashes on start"),
        ];
        assert_eq!(store.append(&scope, &batch).await.unwrap(), 2);

        let fps = store
            .read_fingerprints(Platform::GooglePlay, FingerprintMode::Prefix)
            .await
            .unwrap();
        assert_eq!(fps.len(), 2);
        assert!(fps.contains(&batch[0].fingerprint(FingerprintMode::Prefix)));
        assert!(store
            .read_fingerprints(Platform::AppStore, FingerprintMode::Prefix)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn memory_watermark_respects_query_scope() {
        let store = MemoryReviewStore::new();
        store
            .append(
                &StoreScope::new(Platform::AppStore, "111", "tw"),
                &[review(Platform::AppStore, 10, "a", "x")],
            )
            .await
            .unwrap();
        store
            .append(
                &StoreScope::new(Platform::AppStore, "222", "tw"),
                &[review(Platform::AppStore, 20, "b", "y")],
            )
            .await
            .unwrap();

        let broad = store
            .read_watermark(&WatermarkQuery::whole_sheet(Platform::AppStore))
            .await
            .unwrap();
        assert_eq!(broad.map(|d| d.format("%d").to_string()), Some("20".into()));

        let scoped = store
            .read_watermark(&WatermarkQuery::for_scope(&StoreScope::new(Platform::AppStore, "111", "tw")))
            .await
            .unwrap();
        assert_eq!(scoped.map(|d| d.format("%d").to_string()), Some("10".into()));

        let other = store
            .read_watermark(&WatermarkQuery::whole_sheet(Platform::GooglePlay))
            .await
            .unwrap();
        assert_eq!(other, None);
    }

    #[tokio::test]
    async fn sqlite_store_round_trips_rows_and_watermark() {
        let dir = tempdir().expect("tempdir");
        let store = sqlite_store(&dir).await;
        store.migrate().await.expect("migrate is idempotent");

        let scope = StoreScope::new(Platform::AppStore, "352743563", "tw");
        assert_eq!(
            store
                .read_watermark(&WatermarkQuery::whole_sheet(Platform::AppStore))
                .await
                .unwrap(),
            None
        );

        let batch = vec![
            review(Platform::AppStore, 15, "Alice", "Great app!!!"),
            review(Platform::AppStore, 2, "Bob", ""),
        ];
        assert_eq!(store.append(&scope, &batch).await.unwrap(), 2);
        assert_eq!(store.append(&scope, &[]).await.unwrap(), 0);
        assert_eq!(store.count(Platform::AppStore).await.unwrap(), 2);

        let watermark = store
            .read_watermark(&WatermarkQuery::whole_sheet(Platform::AppStore))
            .await
            .unwrap();
        assert_eq!(watermark, Some(batch[0].date));

        let scoped_elsewhere = store
            .read_watermark(&WatermarkQuery {
                platform: Platform::AppStore,
                app_id: Some("999".into()),
                country: None,
            })
            .await
            .unwrap();
        assert_eq!(scoped_elsewhere, None);

        for mode in [FingerprintMode::Prefix, FingerprintMode::ContentHash] {
            let fps = store.read_fingerprints(Platform::AppStore, mode).await.unwrap();
            assert!(batch.iter().all(|r| fps.contains(&r.fingerprint(mode))));
        }
        store.close().await;
    }

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(350));
    }

    #[test]
    fn rate_limits_and_server_errors_are_retryable() {
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), RetryDisposition::NonRetryable);
    }

    #[test]
    fn fetched_body_reads_as_lossy_text() {
        let resp = FetchedResponse { body: b")]}'\n[\xff]".to_vec() };
        assert_eq!(resp.text(), ")]}'\n[\u{fffd}]");
    }

    #[tokio::test]
    async fn webhook_failures_are_swallowed() {
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/hook", Duration::from_millis(500)).unwrap();
        notifier
            .notify(Platform::AppStore, &[review(Platform::AppStore, 1, "a", "b")])
            .await;
        assert_eq!(notifier.url(), "http://127.0.0.1:9/hook");
    }
}
