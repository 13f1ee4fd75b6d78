//! SQLite-backed catalog.

use std::path::Path;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use crate::models::{CrawlStatus, CrawlerStrategy, SaveSummary, Source, SourceType, Tool, parse_dt};
use crate::storage::{SourceStore, StrategyStore, ToolStore};
use crate::{CatalogError, Result};

/// Current schema version, stored in `PRAGMA user_version`.
const SCHEMA_VERSION: i32 = 1;

const SOURCE_COLUMNS: &str = "id, url, name, type, has_known_crawler, crawler_id, last_crawled, last_crawl_status, metadata";

/// Sources, tools and strategies in one SQLite database.
///
/// Thread-safe via internal `Mutex<Connection>`.
pub struct SqliteCatalog {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCatalog").finish_non_exhaustive()
    }
}

impl SqliteCatalog {
    /// Open (or create) the catalog at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;
        info!("Catalog opened at {:?}", path);
        Ok(store)
    }

    /// Open an in-memory catalog (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock();
        let current_version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if current_version >= SCHEMA_VERSION {
            debug!("Catalog schema up to date (version {})", current_version);
            return Ok(());
        }

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sources (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                name TEXT NOT NULL,
                type TEXT NOT NULL,
                has_known_crawler INTEGER NOT NULL DEFAULT 0,
                crawler_id TEXT,
                last_crawled TEXT,
                last_crawl_status TEXT,
                metadata TEXT NOT NULL DEFAULT '{}'
            );

            CREATE INDEX IF NOT EXISTS idx_sources_url ON sources(url);

            CREATE TABLE IF NOT EXISTS tools (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL,
                url TEXT NOT NULL UNIQUE,
                source_url TEXT NOT NULL,
                first_discovered TEXT NOT NULL,
                last_updated TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}'
            );

            CREATE TABLE IF NOT EXISTS crawler_strategies (
                id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL,
                source_type TEXT NOT NULL,
                implementation TEXT NOT NULL,
                description TEXT NOT NULL,
                created TEXT NOT NULL,
                last_modified TEXT NOT NULL
            );
            "#,
        )?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        info!(
            "Catalog schema migrated from version {} to {}",
            current_version, SCHEMA_VERSION
        );
        Ok(())
    }

    fn query_sources(&self, sql: &str, param: Option<&str>) -> Result<Vec<Source>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows = match param {
            Some(p) => stmt.query_map(params![p], row_to_raw_source)?,
            None => stmt.query_map([], row_to_raw_source)?,
        };
        rows.map(|r| r.map_err(CatalogError::from).and_then(RawSource::into_source))
            .collect()
    }
}

// ── Row mapping ─────────────────────────────────────────────────────

struct RawSource {
    id: String,
    url: String,
    name: String,
    source_type: String,
    has_known_crawler: bool,
    crawler_id: Option<String>,
    last_crawled: Option<String>,
    last_crawl_status: Option<String>,
    metadata: String,
}

impl RawSource {
    fn into_source(self) -> Result<Source> {
        Ok(Source {
            id: self.id,
            url: self.url,
            name: self.name,
            source_type: self.source_type.parse::<SourceType>()?,
            has_known_crawler: self.has_known_crawler,
            crawler_id: self.crawler_id,
            last_crawled: self.last_crawled.as_deref().map(parse_dt),
            last_crawl_status: self
                .last_crawl_status
                .as_deref()
                .map(str::parse::<CrawlStatus>)
                .transpose()?,
            metadata: serde_json::from_str(&self.metadata)?,
        })
    }
}

fn row_to_raw_source(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawSource> {
    Ok(RawSource {
        id: row.get(0)?,
        url: row.get(1)?,
        name: row.get(2)?,
        source_type: row.get(3)?,
        has_known_crawler: row.get::<_, i32>(4)? != 0,
        crawler_id: row.get(5)?,
        last_crawled: row.get(6)?,
        last_crawl_status: row.get(7)?,
        metadata: row.get(8)?,
    })
}

fn row_to_tool(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Tool, String)> {
    Ok((
        Tool {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            url: row.get(3)?,
            source_url: row.get(4)?,
            first_discovered: parse_dt(&row.get::<_, String>(5)?),
            last_updated: parse_dt(&row.get::<_, String>(6)?),
            metadata: serde_json::Map::new(),
        },
        row.get(7)?,
    ))
}

// ── SourceStore ─────────────────────────────────────────────────────

#[async_trait]
impl SourceStore for SqliteCatalog {
    async fn list_all(&self) -> Result<Vec<Source>> {
        self.query_sources(
            &format!("SELECT {SOURCE_COLUMNS} FROM sources ORDER BY rowid"),
            None,
        )
    }

    async fn list_due_for_crawl(&self, threshold: Duration) -> Result<Vec<Source>> {
        let now = Utc::now();
        let all = SourceStore::list_all(self).await?;
        Ok(all.into_iter().filter(|s| s.is_due(now, threshold)).collect())
    }

    async fn record_crawl_outcome(&self, source_id: &str, success: bool) -> Result<bool> {
        let changed = self.conn.lock().execute(
            "UPDATE sources SET last_crawled = ?1, last_crawl_status = ?2 WHERE id = ?3",
            params![
                Utc::now().to_rfc3339(),
                CrawlStatus::from_success(success).as_str(),
                source_id
            ],
        )?;
        Ok(changed > 0)
    }

    async fn save_many(&self, sources: &[Source]) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for source in sources {
            tx.execute(
                "INSERT INTO sources (id, url, name, type, has_known_crawler, crawler_id, last_crawled, last_crawl_status, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET
                    url = excluded.url,
                    name = excluded.name,
                    type = excluded.type,
                    has_known_crawler = excluded.has_known_crawler,
                    crawler_id = excluded.crawler_id,
                    last_crawled = excluded.last_crawled,
                    last_crawl_status = excluded.last_crawl_status,
                    metadata = excluded.metadata",
                params![
                    source.id,
                    source.url,
                    source.name,
                    source.source_type.as_str(),
                    source.has_known_crawler as i32,
                    source.crawler_id,
                    source.last_crawled.map(|t| t.to_rfc3339()),
                    source.last_crawl_status.map(|s| s.as_str()),
                    serde_json::to_string(&source.metadata)?,
                ],
            )?;
        }
        tx.commit()?;
        Ok(sources.len())
    }

    async fn get(&self, id: &str) -> Result<Option<Source>> {
        Ok(self
            .query_sources(
                &format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE id = ?1"),
                Some(id),
            )?
            .into_iter()
            .next())
    }

    async fn get_by_url(&self, url: &str) -> Result<Option<Source>> {
        Ok(self
            .query_sources(
                &format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE url = ?1 ORDER BY rowid LIMIT 1"),
                Some(url),
            )?
            .into_iter()
            .next())
    }

    async fn set_crawler_id(&self, source_id: &str, crawler_id: &str) -> Result<bool> {
        let changed = self.conn.lock().execute(
            "UPDATE sources SET crawler_id = ?1 WHERE id = ?2",
            params![crawler_id, source_id],
        )?;
        Ok(changed > 0)
    }
}

// ── ToolStore ───────────────────────────────────────────────────────

#[async_trait]
impl ToolStore for SqliteCatalog {
    async fn save_many(&self, tools: &[Tool]) -> Result<SaveSummary> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut summary = SaveSummary::default();

        for tool in tools {
            let metadata = serde_json::to_string(&tool.metadata)?;
            let existing: Option<String> = tx
                .query_row(
                    "SELECT id FROM tools WHERE url = ?1",
                    params![tool.url],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(id) = existing {
                tx.execute(
                    "UPDATE tools SET name = ?1, description = ?2, metadata = ?3, last_updated = ?4
                     WHERE id = ?5",
                    params![
                        tool.name,
                        tool.description,
                        metadata,
                        tool.last_updated.to_rfc3339(),
                        id
                    ],
                )?;
                summary.updated += 1;
            } else {
                tx.execute(
                    "INSERT INTO tools (id, name, description, url, source_url, first_discovered, last_updated, metadata)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        tool.id,
                        tool.name,
                        tool.description,
                        tool.url,
                        tool.source_url,
                        tool.first_discovered.to_rfc3339(),
                        tool.last_updated.to_rfc3339(),
                        metadata
                    ],
                )?;
                summary.inserted += 1;
            }
        }

        tx.commit()?;
        debug!(
            inserted = summary.inserted,
            updated = summary.updated,
            "Saved tools"
        );
        Ok(summary)
    }

    async fn list_all(&self) -> Result<Vec<Tool>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, description, url, source_url, first_discovered, last_updated, metadata
             FROM tools ORDER BY name COLLATE NOCASE",
        )?;
        let rows = stmt.query_map([], row_to_tool)?;
        rows.map(|r| -> Result<Tool> {
            let (mut tool, metadata) = r?;
            tool.metadata = serde_json::from_str(&metadata)?;
            Ok(tool)
        })
        .collect()
    }
}

// ── StrategyStore ───────────────────────────────────────────────────

#[async_trait]
impl StrategyStore for SqliteCatalog {
    async fn get(&self, id: &str) -> Result<Option<CrawlerStrategy>> {
        let conn = self.conn.lock();
        let raw = conn
            .query_row(
                "SELECT id, source_id, source_type, implementation, description, created, last_modified
                 FROM crawler_strategies WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()?;

        raw.map(
            |(id, source_id, source_type, implementation, description, created, last_modified)|
             -> Result<CrawlerStrategy> {
                Ok(CrawlerStrategy {
                    id,
                    source_id,
                    source_type: source_type.parse()?,
                    implementation,
                    description,
                    created: parse_dt(&created),
                    last_modified: parse_dt(&last_modified),
                })
            },
        )
        .transpose()
    }

    async fn save(&self, strategy: &CrawlerStrategy) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO crawler_strategies (id, source_id, source_type, implementation, description, created, last_modified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                implementation = excluded.implementation,
                description = excluded.description,
                last_modified = excluded.last_modified",
            params![
                strategy.id,
                strategy.source_id,
                strategy.source_type.as_str(),
                strategy.implementation,
                strategy.description,
                strategy.created.to_rfc3339(),
                strategy.last_modified.to_rfc3339()
            ],
        )?;
        Ok(())
    }
}
