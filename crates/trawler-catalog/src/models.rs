//! Catalog data model: sources, tools and crawler strategies.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CatalogError;

/// Kind of place tools are discovered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    GithubAwesomeList,
    GithubRepository,
    Website,
    RssFeed,
    ManuallyAdded,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::GithubAwesomeList => "github_awesome_list",
            SourceType::GithubRepository => "github_repository",
            SourceType::Website => "website",
            SourceType::RssFeed => "rss_feed",
            SourceType::ManuallyAdded => "manually_added",
        }
    }

    /// Guess the type from a URL: GitHub URLs mentioning "awesome" are
    /// awesome lists, other GitHub URLs are repositories, the rest websites.
    pub fn detect(url: &str) -> Self {
        let lower = url.to_ascii_lowercase();
        if lower.contains("github.com") {
            if lower.contains("awesome") {
                SourceType::GithubAwesomeList
            } else {
                SourceType::GithubRepository
            }
        } else {
            SourceType::Website
        }
    }

    /// Whether a built-in strategy handles this type.
    pub fn has_known_crawler(&self) -> bool {
        matches!(
            self,
            SourceType::GithubAwesomeList | SourceType::GithubRepository
        )
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "github_awesome_list" => Ok(SourceType::GithubAwesomeList),
            "github_repository" => Ok(SourceType::GithubRepository),
            "website" => Ok(SourceType::Website),
            "rss_feed" => Ok(SourceType::RssFeed),
            "manually_added" => Ok(SourceType::ManuallyAdded),
            other => Err(CatalogError::InvalidData(format!(
                "unknown source type: {other}"
            ))),
        }
    }
}

/// Outcome of the most recent crawl of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStatus {
    Success,
    Failed,
}

impl CrawlStatus {
    pub fn from_success(success: bool) -> Self {
        if success {
            CrawlStatus::Success
        } else {
            CrawlStatus::Failed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlStatus::Success => "success",
            CrawlStatus::Failed => "failed",
        }
    }
}

impl FromStr for CrawlStatus {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(CrawlStatus::Success),
            "failed" => Ok(CrawlStatus::Failed),
            other => Err(CatalogError::InvalidData(format!(
                "unknown crawl status: {other}"
            ))),
        }
    }
}

/// A place tools are listed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub url: String,
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub has_known_crawler: bool,
    pub crawler_id: Option<String>,
    pub last_crawled: Option<DateTime<Utc>>,
    pub last_crawl_status: Option<CrawlStatus>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Source {
    /// A new, never-crawled source.
    pub fn new(url: impl Into<String>, name: impl Into<String>, source_type: SourceType) -> Self {
        Self {
            id: format!("source-{}", Uuid::new_v4()),
            url: url.into(),
            name: name.into(),
            source_type,
            has_known_crawler: source_type.has_known_crawler(),
            crawler_id: None,
            last_crawled: None,
            last_crawl_status: None,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_known_crawler(mut self, known: bool) -> Self {
        self.has_known_crawler = known;
        self
    }

    /// Never crawled, or last crawled before `now - threshold`.
    ///
    /// A threshold reaching past the earliest representable time leaves
    /// only never-crawled sources due.
    pub fn is_due(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        match self.last_crawled {
            None => true,
            Some(at) => now
                .checked_sub_signed(threshold)
                .is_some_and(|cutoff| at < cutoff),
        }
    }
}

/// A discovered tool. Unique by `url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub id: String,
    pub name: String,
    pub description: String,
    pub url: String,
    pub source_url: String,
    pub first_discovered: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Tool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        url: impl Into<String>,
        source_url: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: format!("tool-{}", Uuid::new_v4()),
            name: name.into(),
            description: description.into(),
            url: url.into(),
            source_url: source_url.into(),
            first_discovered: now,
            last_updated: now,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Extraction code bound to a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlerStrategy {
    pub id: String,
    pub source_id: String,
    pub source_type: SourceType,
    pub implementation: String,
    pub description: String,
    pub created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl CrawlerStrategy {
    pub fn new(source: &Source, implementation: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: format!("crawler-{}", Uuid::new_v4()),
            source_id: source.id.clone(),
            source_type: source.source_type,
            implementation: implementation.into(),
            description: description.into(),
            created: now,
            last_modified: now,
        }
    }
}

/// Counts from a batch tool upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveSummary {
    pub inserted: usize,
    pub updated: usize,
}

/// Host part of a URL, or the URL itself when it does not parse.
pub fn domain_of(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}

pub(crate) fn parse_dt(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
