//! Source registration: seed lists and ad-hoc URLs.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::{Source, SourceType, domain_of};
use crate::storage::SourceStore;
use crate::{CatalogError, Result};

/// One configured source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedSource {
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl SeedSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: None,
        }
    }
}

/// Sources to register before crawling.
///
/// The same shape is used for the `[sources]` config section and for
/// stand-alone seed files:
///
/// ```toml
/// [[awesome_lists]]
/// url = "https://github.com/punkpeye/awesome-mcp-servers"
///
/// [[websites]]
/// url = "https://mcp.so"
/// name = "MCP.so"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeedList {
    #[serde(default)]
    pub awesome_lists: Vec<SeedSource>,
    #[serde(default)]
    pub websites: Vec<SeedSource>,
}

impl SeedList {
    /// Read a seed list from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| CatalogError::SeedFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| CatalogError::SeedFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Append the entries of `other`.
    pub fn extend(&mut self, other: SeedList) {
        self.awesome_lists.extend(other.awesome_lists);
        self.websites.extend(other.websites);
    }

    pub fn is_empty(&self) -> bool {
        self.awesome_lists.is_empty() && self.websites.is_empty()
    }

    /// Build sources for every seed whose URL is not in `known_urls`.
    fn to_sources(&self, known_urls: &mut HashSet<String>) -> Vec<Source> {
        let lists = self.awesome_lists.iter().map(|seed| {
            let name = seed
                .name
                .clone()
                .unwrap_or_else(|| format!("Awesome MCP Tools ({})", domain_of(&seed.url)));
            (seed, name, SourceType::GithubAwesomeList, true)
        });
        let sites = self.websites.iter().map(|seed| {
            let name = seed
                .name
                .clone()
                .unwrap_or_else(|| format!("MCP Tools ({})", domain_of(&seed.url)));
            (seed, name, SourceType::Website, false)
        });

        lists
            .chain(sites)
            .filter(|(seed, ..)| known_urls.insert(seed.url.clone()))
            .map(|(seed, name, source_type, known)| {
                Source::new(seed.url.clone(), name, source_type).with_known_crawler(known)
            })
            .collect()
    }
}

/// Register every seed not already present in `store`.
///
/// Returns the newly added sources.
pub async fn seed_sources(store: &dyn SourceStore, seeds: &SeedList) -> Result<Vec<Source>> {
    let mut known_urls: HashSet<String> = store
        .list_all()
        .await?
        .into_iter()
        .map(|s| s.url)
        .collect();

    let new_sources = seeds.to_sources(&mut known_urls);
    if !new_sources.is_empty() {
        store.save_many(&new_sources).await?;
    }
    info!(added = new_sources.len(), "Seeded sources");
    Ok(new_sources)
}

/// Add a single source by URL, detecting its type when not given.
///
/// Returns the existing source when the URL is already registered.
pub async fn add_source_by_url(
    store: &dyn SourceStore,
    url: &str,
    name: Option<&str>,
    source_type: Option<SourceType>,
) -> Result<Source> {
    if let Some(existing) = store.get_by_url(url).await? {
        return Ok(existing);
    }

    let source_type = source_type.unwrap_or_else(|| SourceType::detect(url));
    let name = name
        .map(str::to_string)
        .unwrap_or_else(|| format!("MCP Tools ({})", domain_of(url)));
    let source = Source::new(url, name, source_type);
    store.save_many(std::slice::from_ref(&source)).await?;
    info!(source_id = %source.id, url, %source_type, "Added source");
    Ok(source)
}
