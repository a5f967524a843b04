//! Review source contracts, live App Store / Google Play sources and scripted sources.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use revsync_core::{canonical_date, PageCursor, Platform, RawReview, ReviewPage};
use revsync_storage::{FetchError, HttpFetcher};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "revsync-adapters";

/// The customer-reviews feed serves at most ten pages per app and country.
pub const APP_STORE_LAST_PAGE: u32 = 10;
pub const GOOGLE_PLAY_PAGE_SIZE: u32 = 150;
const GOOGLE_PLAY_SORT_NEWEST: u32 = 2;
const GOOGLE_PLAY_RPC_ID: &str = "UsvDTd";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// A single page failed; the source may still hold more.
    #[error("page fetch failed: {0}")]
    Transient(String),
    /// The source cannot be used at all for this app.
    #[error("source unavailable: {0}")]
    Unavailable(String),
}

impl From<FetchError> for SourceError {
    fn from(err: FetchError) -> Self {
        SourceError::Transient(err.to_string())
    }
}

/// One platform's paginated review feed, newest first.
#[async_trait]
pub trait ReviewSource: Send + Sync {
    fn platform(&self) -> Platform;

    fn first_cursor(&self) -> PageCursor {
        PageCursor::Start
    }

    async fn fetch_page(&self, cursor: &PageCursor) -> Result<ReviewPage, SourceError>;
}

/// Builds the source for one `(platform, app, country)` triple.
pub trait SourceResolver: Send + Sync {
    fn resolve(
        &self,
        platform: Platform,
        app_id: &str,
        country: &str,
    ) -> Result<Box<dyn ReviewSource>, SourceError>;
}

pub struct AppStoreSource {
    http: Arc<HttpFetcher>,
    app_id: String,
    country: String,
}

impl AppStoreSource {
    pub fn new(http: Arc<HttpFetcher>, app_id: impl Into<String>, country: impl Into<String>) -> Self {
        Self {
            http,
            app_id: app_id.into(),
            country: country.into().to_ascii_lowercase(),
        }
    }

    pub fn page_url(&self, page: u32) -> String {
        format!(
            "https://itunes.apple.com/{}/rss/customerreviews/page={}/id={}/sortby=mostrecent/json",
            self.country, page, self.app_id
        )
    }
}

#[async_trait]
impl ReviewSource for AppStoreSource {
    fn platform(&self) -> Platform {
        Platform::AppStore
    }

    fn first_cursor(&self) -> PageCursor {
        PageCursor::Index(1)
    }

    async fn fetch_page(&self, cursor: &PageCursor) -> Result<ReviewPage, SourceError> {
        let page = match cursor {
            PageCursor::Start => 1,
            PageCursor::Index(n) => *n,
            PageCursor::Token(_) => {
                return Err(SourceError::Transient(
                    "App Store feed is paged by index, not token".into(),
                ))
            }
        };
        let resp = self.http.get(Platform::AppStore, &self.page_url(page)).await?;
        let reviews = parse_app_store_feed(&resp.text())?;
        debug!(page, entries = reviews.len(), app_id = %self.app_id, "parsed App Store feed page");
        let next = (!reviews.is_empty() && page < APP_STORE_LAST_PAGE).then(|| PageCursor::Index(page + 1));
        Ok(ReviewPage::new(reviews, next))
    }
}

fn label<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a str> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    cur.get("label")?.as_str()
}

/// Parse one page of the App Store customer-reviews JSON feed.
pub fn parse_app_store_feed(body: &str) -> Result<Vec<RawReview>, SourceError> {
    let value: JsonValue = serde_json::from_str(body)
        .map_err(|e| SourceError::Transient(format!("invalid App Store feed JSON: {e}")))?;

    let entries = match value.get("feed").and_then(|feed| feed.get("entry")) {
        None | Some(JsonValue::Null) => return Ok(Vec::new()),
        Some(JsonValue::Array(items)) => items.iter().collect::<Vec<_>>(),
        Some(single) => vec![single],
    };

    // Entries without a rating are app metadata, not reviews.
    Ok(entries
        .into_iter()
        .filter(|entry| entry.get("im:rating").is_some())
        .map(|entry| RawReview {
            date: label(entry, &["updated"]).unwrap_or_default().to_string(),
            score: label(entry, &["im:rating"]).and_then(|s| s.trim().parse().ok()),
            text: label(entry, &["content"]).map(ToString::to_string),
            version: label(entry, &["im:version"]).map(ToString::to_string),
            title: label(entry, &["title"]).map(ToString::to_string),
            author: label(entry, &["author", "name"]).map(ToString::to_string),
        })
        .collect())
}

pub struct GooglePlaySource {
    http: Arc<HttpFetcher>,
    app_id: String,
    country: String,
    lang: String,
    page_size: u32,
}

impl GooglePlaySource {
    pub fn new(
        http: Arc<HttpFetcher>,
        app_id: impl Into<String>,
        country: impl Into<String>,
        lang: impl Into<String>,
    ) -> Self {
        Self {
            http,
            app_id: app_id.into(),
            country: country.into().to_ascii_lowercase(),
            lang: lang.into(),
            page_size: GOOGLE_PLAY_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn batchexecute_url(&self) -> String {
        format!(
            "https://play.google.com/_/PlayStoreUi/data/batchexecute?rpcids=qnKhOb&f.sid=-697906427155521722&bl=boq_playuiserver_20190903.08_p0&hl={}&gl={}&authuser&soc-app=121&soc-platform=1&soc-device=1&_reqid=1065213",
            self.lang, self.country
        )
    }
}

#[async_trait]
impl ReviewSource for GooglePlaySource {
    fn platform(&self) -> Platform {
        Platform::GooglePlay
    }

    async fn fetch_page(&self, cursor: &PageCursor) -> Result<ReviewPage, SourceError> {
        let token = match cursor {
            PageCursor::Start => None,
            PageCursor::Token(token) => Some(token.as_str()),
            PageCursor::Index(_) => {
                return Err(SourceError::Transient(
                    "Google Play reviews are paged by token, not index".into(),
                ))
            }
        };
        let f_req = google_play_request_body(&self.app_id, self.page_size, token);
        let resp = self
            .http
            .post_form(Platform::GooglePlay, &self.batchexecute_url(), &[("f.req", f_req.as_str())])
            .await?;
        let (reviews, next_token) = parse_google_play_response(&resp.text())?;
        debug!(entries = reviews.len(), has_next = next_token.is_some(), app_id = %self.app_id, "parsed Google Play batch");
        Ok(ReviewPage::new(reviews, next_token.map(PageCursor::Token)))
    }
}

/// `f.req` form value for the newest-first review RPC.
pub fn google_play_request_body(app_id: &str, page_size: u32, token: Option<&str>) -> String {
    let inner = json!([
        null,
        null,
        [2, GOOGLE_PLAY_SORT_NEWEST, [page_size, null, token], null, []],
        [app_id, 7]
    ]);
    json!([[[GOOGLE_PLAY_RPC_ID, inner.to_string(), null, "generic"]]]).to_string()
}

fn json_at<'a>(value: &'a JsonValue, path: &[usize]) -> Option<&'a JsonValue> {
    let mut cur = value;
    for index in path {
        cur = cur.get(*index)?;
    }
    Some(cur)
}

fn google_play_review(row: &JsonValue) -> RawReview {
    let date = json_at(row, &[5, 0])
        .and_then(JsonValue::as_i64)
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(canonical_date)
        .unwrap_or_default();
    let text_at = |path: &[usize]| json_at(row, path).and_then(JsonValue::as_str).map(ToString::to_string);
    RawReview {
        date,
        score: json_at(row, &[2]).and_then(JsonValue::as_i64),
        text: text_at(&[4]),
        version: text_at(&[10]),
        title: None,
        author: text_at(&[1, 0]),
    }
}

/// Parse a batchexecute response into reviews plus the continuation token.
pub fn parse_google_play_response(body: &str) -> Result<(Vec<RawReview>, Option<String>), SourceError> {
    let start = body
        .find('[')
        .ok_or_else(|| SourceError::Transient("batchexecute response has no JSON payload".into()))?;
    let outer: JsonValue = serde_json::Deserializer::from_str(&body[start..])
        .into_iter::<JsonValue>()
        .next()
        .ok_or_else(|| SourceError::Transient("batchexecute response is empty".into()))?
        .map_err(|e| SourceError::Transient(format!("invalid batchexecute envelope: {e}")))?;

    let Some(embedded) = json_at(&outer, &[0, 2]).and_then(JsonValue::as_str) else {
        return Ok((Vec::new(), None));
    };
    let data: JsonValue = serde_json::from_str(embedded)
        .map_err(|e| SourceError::Transient(format!("invalid review payload: {e}")))?;

    let reviews = json_at(&data, &[0])
        .and_then(JsonValue::as_array)
        .map(|rows| rows.iter().map(google_play_review).collect())
        .unwrap_or_default();
    let token = json_at(&data, &[1, 1])
        .and_then(JsonValue::as_str)
        .filter(|t| !t.is_empty())
        .map(ToString::to_string);
    Ok((reviews, token))
}

/// Resolves live HTTP-backed sources sharing one fetcher.
pub struct LiveSourceResolver {
    http: Arc<HttpFetcher>,
    lang: String,
}

impl LiveSourceResolver {
    pub fn new(http: Arc<HttpFetcher>, lang: impl Into<String>) -> Self {
        Self {
            http,
            lang: lang.into(),
        }
    }
}

impl SourceResolver for LiveSourceResolver {
    fn resolve(
        &self,
        platform: Platform,
        app_id: &str,
        country: &str,
    ) -> Result<Box<dyn ReviewSource>, SourceError> {
        let app_id = app_id.trim();
        if app_id.is_empty() {
            return Err(SourceError::Unavailable(format!("{platform} app id is empty")));
        }
        match platform {
            Platform::AppStore => {
                if !app_id.chars().all(|c| c.is_ascii_digit()) {
                    return Err(SourceError::Unavailable(format!(
                        "App Store ids are numeric, got {app_id:?}"
                    )));
                }
                Ok(Box::new(AppStoreSource::new(self.http.clone(), app_id, country)))
            }
            Platform::GooglePlay => Ok(Box::new(GooglePlaySource::new(
                self.http.clone(),
                app_id,
                country,
                self.lang.clone(),
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    Page(Vec<RawReview>),
    Fail(SourceError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorStyle {
    Index,
    Token,
}

/// Serves a fixed list of pages, mimicking either pagination transport.
#[derive(Debug, Clone)]
pub struct ScriptedSource {
    platform: Platform,
    steps: Vec<ScriptStep>,
    style: CursorStyle,
    requests: Arc<AtomicUsize>,
}

impl ScriptedSource {
    pub fn new(platform: Platform, steps: Vec<ScriptStep>) -> Self {
        let style = match platform {
            Platform::AppStore => CursorStyle::Index,
            Platform::GooglePlay => CursorStyle::Token,
        };
        Self {
            platform,
            steps,
            style,
            requests: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn from_pages(platform: Platform, pages: Vec<Vec<RawReview>>) -> Self {
        Self::new(platform, pages.into_iter().map(ScriptStep::Page).collect())
    }

    pub fn with_style(mut self, style: CursorStyle) -> Self {
        self.style = style;
        self
    }

    fn with_counter(mut self, requests: Arc<AtomicUsize>) -> Self {
        self.requests = requests;
        self
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn cursor_for(&self, position: usize) -> PageCursor {
        match self.style {
            CursorStyle::Index => PageCursor::Index(position as u32 + 1),
            CursorStyle::Token => PageCursor::Token(format!("page-{position}")),
        }
    }

    fn position_of(&self, cursor: &PageCursor) -> Result<usize, SourceError> {
        match cursor {
            PageCursor::Start => Ok(0),
            PageCursor::Index(n) => Ok((*n as usize).saturating_sub(1)),
            PageCursor::Token(token) => token
                .strip_prefix("page-")
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| SourceError::Transient(format!("unknown continuation token {token:?}"))),
        }
    }
}

#[async_trait]
impl ReviewSource for ScriptedSource {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn first_cursor(&self) -> PageCursor {
        match self.style {
            CursorStyle::Index => PageCursor::Index(1),
            CursorStyle::Token => PageCursor::Start,
        }
    }

    async fn fetch_page(&self, cursor: &PageCursor) -> Result<ReviewPage, SourceError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let position = self.position_of(cursor)?;
        match self.steps.get(position) {
            None => Ok(ReviewPage::default()),
            Some(ScriptStep::Fail(err)) => Err(err.clone()),
            Some(ScriptStep::Page(reviews)) => {
                let next = (position + 1 < self.steps.len()).then(|| self.cursor_for(position + 1));
                Ok(ReviewPage::new(reviews.clone(), next))
            }
        }
    }
}

/// Offline resolver backed by scripted pages, e.g. loaded from `fixtures/`.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSourceResolver {
    scripts: BTreeMap<Platform, Vec<ScriptStep>>,
    unavailable: BTreeMap<Platform, String>,
    counters: BTreeMap<Platform, Arc<AtomicUsize>>,
}

impl ScriptedSourceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_steps(mut self, platform: Platform, steps: Vec<ScriptStep>) -> Self {
        self.scripts.insert(platform, steps);
        self.counters
            .entry(platform)
            .or_insert_with(|| Arc::new(AtomicUsize::new(0)));
        self
    }

    pub fn with_pages(self, platform: Platform, pages: Vec<Vec<RawReview>>) -> Self {
        self.with_steps(platform, pages.into_iter().map(ScriptStep::Page).collect())
    }

    pub fn unavailable(mut self, platform: Platform, reason: impl Into<String>) -> Self {
        self.unavailable.insert(platform, reason.into());
        self
    }

    /// Total page fetches issued against `platform` across every resolved source.
    pub fn requests(&self, platform: Platform) -> usize {
        self.counters
            .get(&platform)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Loads `<dir>/<platform-slug>/pages.json` for each platform that has one.
    pub fn from_fixture_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut resolver = Self::new();
        for platform in Platform::ALL {
            let path = dir.join(platform.slug()).join("pages.json");
            if !path.exists() {
                continue;
            }
            let fixture = load_review_pages_fixture(&path)?;
            if Platform::from_slug(&fixture.platform) != Some(platform) {
                bail!(
                    "fixture {} declares platform={} but lives under {}",
                    path.display(),
                    fixture.platform,
                    platform.slug()
                );
            }
            resolver = resolver.with_pages(platform, fixture.pages);
        }
        Ok(resolver)
    }
}

impl SourceResolver for ScriptedSourceResolver {
    fn resolve(
        &self,
        platform: Platform,
        _app_id: &str,
        _country: &str,
    ) -> Result<Box<dyn ReviewSource>, SourceError> {
        if let Some(reason) = self.unavailable.get(&platform) {
            return Err(SourceError::Unavailable(reason.clone()));
        }
        let steps = self
            .scripts
            .get(&platform)
            .ok_or_else(|| SourceError::Unavailable(format!("no scripted pages for {platform}")))?;
        let counter = self.counters.get(&platform).cloned().unwrap_or_default();
        Ok(Box::new(
            ScriptedSource::new(platform, steps.clone()).with_counter(counter),
        ))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewPagesFixture {
    pub platform: String,
    pub pages: Vec<Vec<RawReview>>,
}

pub fn load_review_pages_fixture(path: impl AsRef<Path>) -> Result<ReviewPagesFixture> {
    read_json_file(path)
}

fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use revsync_storage::HttpClientConfig;
    use std::path::PathBuf;

    fn workspace_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .canonicalize()
            .expect("workspace root")
    }

    fn fixture_text(platform: Platform, name: &str) -> String {
        let path = workspace_root()
            .join("fixtures")
            .join(platform.slug())
            .join("sample")
            .join(name);
        fs::read_to_string(&path).expect("read fixture")
    }

    fn raw(date: &str) -> RawReview {
        RawReview {
            date: date.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn app_store_feed_fixture_parses_every_review_entry() {
        let reviews = parse_app_store_feed(&fixture_text(Platform::AppStore, "customerreviews_page1.json")).unwrap();
        assert_eq!(reviews.len(), 3);

        assert_eq!(reviews[0].date, "2024-02-01T10:15:00-07:00");
        assert_eq!(reviews[0].author.as_deref(), Some("小明"));
        assert_eq!(reviews[0].score, Some(2));
        assert_eq!(reviews[0].title.as_deref(), Some("更新後閃退"));

        assert_eq!(reviews[1].text.as_deref(), Some("Great app!!!"));
        assert_eq!(reviews[1].version.as_deref(), Some("5.3.2"));

        assert_eq!(reviews[2].author, None);
        assert_eq!(reviews[2].version, None);
        assert_eq!(reviews[2].text.as_deref(), Some(""));
    }

    #[test]
    fn app_store_feed_without_entries_is_an_empty_page() {
        let reviews = parse_app_store_feed(&fixture_text(Platform::AppStore, "customerreviews_empty.json")).unwrap();
        assert!(reviews.is_empty());
    }

    #[test]
    fn app_store_feed_accepts_single_object_entry_and_skips_metadata() {
        let body = r#"{"feed":{"entry":{"updated":{"label":"2024-01-01T00:00:00Z"},"im:rating":{"label":"3"},"content":{"label":"meh"}}}}"#;
        assert_eq!(parse_app_store_feed(body).unwrap().len(), 1);

        let metadata_only = r#"{"feed":{"entry":[{"im:name":{"label":"Some App"}}]}}"#;
        assert!(parse_app_store_feed(metadata_only).unwrap().is_empty());

        assert!(matches!(parse_app_store_feed("<html>"), Err(SourceError::Transient(_))));
    }

    #[test]
    fn google_play_fixture_parses_reviews_and_token() {
        let (reviews, token) =
            parse_google_play_response(&fixture_text(Platform::GooglePlay, "batchexecute_page1.txt")).unwrap();
        assert_eq!(token.as_deref(), Some("CpEBCgaSEm5leHQtcGFnZQ"));
        assert_eq!(reviews.len(), 3);

        assert_eq!(reviews[0].date, "2024-01-28T00:00:00Z");
        assert_eq!(reviews[0].author.as_deref(), Some("Bob"));
        assert_eq!(reviews[0].score, Some(1));
        assert_eq!(reviews[0].version.as_deref(), Some("5.3.2"));
        assert_eq!(reviews[0].title, None);

        assert_eq!(reviews[1].text.as_deref(), Some("非常好用的應用程式"));
        assert_eq!(reviews[1].version, None);

        assert_eq!(reviews[2].author, None);
        assert_eq!(reviews[2].text, None);
    }

    #[test]
    fn google_play_last_page_has_no_token() {
        let (reviews, token) =
            parse_google_play_response(&fixture_text(Platform::GooglePlay, "batchexecute_last.txt")).unwrap();
        assert_eq!(reviews.len(), 1);
        assert_eq!(token, None);

        assert!(matches!(
            parse_google_play_response(")]}'\n\nnope"),
            Err(SourceError::Transient(_))
        ));
    }

    #[test]
    fn google_play_request_body_embeds_app_and_token() {
        let body = google_play_request_body("com.mtk", 150, Some("tok"));
        let outer: JsonValue = serde_json::from_str(&body).unwrap();
        assert_eq!(outer[0][0][0], "UsvDTd");
        let inner: JsonValue = serde_json::from_str(outer[0][0][1].as_str().unwrap()).unwrap();
        assert_eq!(inner[2][1], 2);
        assert_eq!(inner[2][2][0], 150);
        assert_eq!(inner[2][2][2], "tok");
        assert_eq!(inner[3][0], "com.mtk");

        let first: JsonValue = serde_json::from_str(&google_play_request_body("com.mtk", 150, None)).unwrap();
        let inner: JsonValue = serde_json::from_str(first[0][0][1].as_str().unwrap()).unwrap();
        assert!(inner[2][2][2].is_null());
    }

    #[test]
    fn live_sources_build_expected_urls() {
        let http = Arc::new(HttpFetcher::new(HttpClientConfig::default()).unwrap());
        let app_store = AppStoreSource::new(http.clone(), "352743563", "TW");
        assert_eq!(
            app_store.page_url(3),
            "https://itunes.apple.com/tw/rss/customerreviews/page=3/id=352743563/sortby=mostrecent/json"
        );
        let play = GooglePlaySource::new(http, "com.mtk", "tw", "zh-TW");
        assert!(play.batchexecute_url().contains("hl=zh-TW&gl=tw"));
    }

    #[test]
    fn live_resolver_rejects_unusable_ids() {
        let http = Arc::new(HttpFetcher::new(HttpClientConfig::default()).unwrap());
        let resolver = LiveSourceResolver::new(http, "zh-TW");
        assert!(matches!(
            resolver.resolve(Platform::AppStore, "com.mtk", "tw"),
            Err(SourceError::Unavailable(_))
        ));
        assert!(matches!(
            resolver.resolve(Platform::GooglePlay, "  ", "tw"),
            Err(SourceError::Unavailable(_))
        ));
        let source = resolver.resolve(Platform::AppStore, "352743563", "tw").unwrap();
        assert_eq!(source.first_cursor(), PageCursor::Index(1));
    }

    #[tokio::test]
    async fn scripted_source_walks_pages_with_either_cursor_style() {
        for style in [CursorStyle::Index, CursorStyle::Token] {
            let source = ScriptedSource::from_pages(
                Platform::AppStore,
                vec![vec![raw("2024-01-02")], vec![raw("2024-01-01")]],
            )
            .with_style(style);

            let first = source.fetch_page(&source.first_cursor()).await.unwrap();
            assert_eq!(first.reviews.len(), 1);
            let next = first.next.expect("second page");
            let second = source.fetch_page(&next).await.unwrap();
            assert_eq!(second.reviews[0].date, "2024-01-01");
            assert_eq!(second.next, None);
            assert_eq!(source.requests(), 2);
        }
    }

    #[tokio::test]
    async fn scripted_resolver_reports_unavailable_platforms_and_counts_requests() {
        let resolver = ScriptedSourceResolver::new()
            .with_steps(
                Platform::GooglePlay,
                vec![ScriptStep::Fail(SourceError::Transient("429".into()))],
            )
            .unavailable(Platform::AppStore, "store offline");

        assert!(matches!(
            resolver.resolve(Platform::AppStore, "1", "tw"),
            Err(SourceError::Unavailable(reason)) if reason == "store offline"
        ));

        let source = resolver.resolve(Platform::GooglePlay, "com.mtk", "tw").unwrap();
        assert!(source.fetch_page(&source.first_cursor()).await.is_err());
        assert_eq!(resolver.requests(Platform::GooglePlay), 1);
    }

    #[test]
    fn fixture_dir_loads_pages_for_both_platforms() {
        let resolver = ScriptedSourceResolver::from_fixture_dir(workspace_root().join("fixtures")).unwrap();
        for platform in Platform::ALL {
            assert!(resolver.resolve(platform, "any", "tw").is_ok(), "{platform}");
        }
    }
}
