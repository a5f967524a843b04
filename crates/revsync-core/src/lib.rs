//! Core review model, date window and dedup fingerprint for revsync.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const CRATE_NAME: &str = "revsync-core";

/// Author recorded when a source omits the reviewer name.
pub const ANONYMOUS_AUTHOR: &str = "Anonymous";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Platform {
    #[serde(rename = "App Store")]
    AppStore,
    #[serde(rename = "Google Play")]
    GooglePlay,
}

impl Platform {
    pub const ALL: [Platform; 2] = [Platform::AppStore, Platform::GooglePlay];

    /// Stable identifier used in routes, config keys and store rows.
    pub fn slug(self) -> &'static str {
        match self {
            Platform::AppStore => "appstore",
            Platform::GooglePlay => "googleplay",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Platform::AppStore => "App Store",
            Platform::GooglePlay => "Google Play",
        }
    }

    pub fn from_slug(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().replace(['-', '_', ' '], "").as_str() {
            "appstore" | "ios" => Some(Platform::AppStore),
            "googleplay" | "android" => Some(Platform::GooglePlay),
            _ => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Review fields exactly as a source reported them, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawReview {
    pub date: String,
    #[serde(default)]
    pub score: Option<i64>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
}

/// Platform-agnostic review as handed to dedup and persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub date: DateTime<Utc>,
    pub score: i64,
    pub text: String,
    pub version: Option<String>,
    pub title: Option<String>,
    pub author: String,
    pub platform: Platform,
}

impl Review {
    pub fn normalize(raw: RawReview, date: DateTime<Utc>, platform: Platform) -> Self {
        let author = raw
            .author
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| ANONYMOUS_AUTHOR.to_string());
        Self {
            date,
            score: raw.score.unwrap_or(0),
            text: raw.text.unwrap_or_default(),
            version: raw.version.filter(|v| !v.trim().is_empty()),
            title: match platform {
                Platform::AppStore => raw.title,
                Platform::GooglePlay => None,
            },
            author,
            platform,
        }
    }

    pub fn date_key(&self) -> String {
        canonical_date(self.date)
    }

    pub fn fingerprint(&self, mode: FingerprintMode) -> Fingerprint {
        Fingerprint::from_parts(mode, &self.date_key(), &self.author, &self.text)
    }
}

/// RFC 3339 UTC with second precision; sorts lexicographically in time order.
pub fn canonical_date(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a source or caller supplied date.
///
/// Accepts RFC 3339, naive `YYYY-MM-DDTHH:MM:SS[.fff]` (read as UTC) and bare
/// `YYYY-MM-DD` (midnight UTC).
pub fn parse_review_date(input: &str) -> Option<DateTime<Utc>> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    let day = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
    Some(day.and_hms_opt(0, 0, 0)?.and_utc())
}

/// Like [`parse_review_date`], but a bare date means the last instant of that day.
pub fn parse_window_end(input: &str) -> Option<DateTime<Utc>> {
    match NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d") {
        Ok(day) => Some(end_of_day(day)),
        Err(_) => parse_review_date(input),
    }
}

pub fn end_of_day(day: NaiveDate) -> DateTime<Utc> {
    day.and_hms_nano_opt(23, 59, 59, 999_999_999)
        .map(|t| t.and_utc())
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    #[error("invalid {field} date: {value:?}")]
    InvalidDate { field: &'static str, value: String },
    #[error("window start {start} is after end {end}")]
    Inverted {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowDecision {
    Include,
    /// Newer than the window; keep paging.
    Exclude,
    /// Older than the window; nothing later from this source can qualify.
    StopSource,
}

/// Inclusive `[start, end]` range used to filter newest-first review streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WindowBounds")]
pub struct DateWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Deserialize)]
struct WindowBounds {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TryFrom<WindowBounds> for DateWindow {
    type Error = WindowError;

    fn try_from(bounds: WindowBounds) -> Result<Self, Self::Error> {
        Self::new(bounds.start, bounds.end)
    }
}

impl DateWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, WindowError> {
        if start > end {
            return Err(WindowError::Inverted { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn from_dates(start: &str, end: &str) -> Result<Self, WindowError> {
        let start_at = parse_review_date(start).ok_or_else(|| WindowError::InvalidDate {
            field: "start",
            value: start.to_string(),
        })?;
        let end_at = parse_window_end(end).ok_or_else(|| WindowError::InvalidDate {
            field: "end",
            value: end.to_string(),
        })?;
        Self::new(start_at, end_at)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn classify(&self, date: DateTime<Utc>) -> WindowDecision {
        if date < self.start {
            WindowDecision::StopSource
        } else if date > self.end {
            WindowDecision::Exclude
        } else {
            WindowDecision::Include
        }
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", canonical_date(self.start), canonical_date(self.end))
    }
}

/// Opaque pagination position. Sources use either a page index or a token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageCursor {
    Start,
    Index(u32),
    Token(String),
}

impl fmt::Display for PageCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageCursor::Start => f.write_str("start"),
            PageCursor::Index(i) => write!(f, "page {i}"),
            PageCursor::Token(t) => write!(f, "token {}", t.chars().take(12).collect::<String>()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewPage {
    pub reviews: Vec<RawReview>,
    /// `None` once the source has no further pages.
    pub next: Option<PageCursor>,
}

impl ReviewPage {
    pub fn new(reviews: Vec<RawReview>, next: Option<PageCursor>) -> Self {
        Self { reviews, next }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintMode {
    /// `(date, author, text length, first five chars)`.
    #[default]
    Prefix,
    /// SHA-256 over date, author and the full text.
    ContentHash,
}

impl FromStr for FingerprintMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prefix" => Ok(FingerprintMode::Prefix),
            "sha256" | "content_hash" | "content-hash" | "hash" => Ok(FingerprintMode::ContentHash),
            other => Err(format!("unknown fingerprint mode {other:?}")),
        }
    }
}

/// Dedup key for a persisted or candidate review.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Fingerprint {
    Prefix {
        date: String,
        author: String,
        text_len: usize,
        text_prefix: String,
    },
    ContentHash(String),
}

impl Fingerprint {
    pub const PREFIX_CHARS: usize = 5;

    /// Lengths and prefixes count Unicode scalar values, not bytes.
    pub fn from_parts(mode: FingerprintMode, date: &str, author: &str, text: &str) -> Self {
        match mode {
            FingerprintMode::Prefix => Fingerprint::Prefix {
                date: date.to_string(),
                author: author.to_string(),
                text_len: text.chars().count(),
                text_prefix: text.chars().take(Self::PREFIX_CHARS).collect(),
            },
            FingerprintMode::ContentHash => {
                let mut hasher = Sha256::new();
                hasher.update(date.as_bytes());
                hasher.update([0x1f]);
                hasher.update(author.as_bytes());
                hasher.update([0x1f]);
                hasher.update(text.as_bytes());
                Fingerprint::ContentHash(hex::encode(hasher.finalize()))
            }
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fingerprint::Prefix {
                date,
                author,
                text_len,
                text_prefix,
            } => write!(f, "{date}__{author}__{text_len}__{text_prefix}"),
            Fingerprint::ContentHash(hash) => f.write_str(hash),
        }
    }
}
