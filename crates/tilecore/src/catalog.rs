//! Catalog entries and the remote capability that hands out installer links.
//!
//! The remote API is opaque to the rest of the crate: everything downstream
//! only needs `get_download_info(item) -> {downlink}`.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// A game entry in the user's library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub image_url: String,
}

impl CatalogItem {
    pub fn new(id: u64, name: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            image_url: image_url.into(),
        }
    }
}

impl fmt::Display for CatalogItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Where to fetch the installer for an item.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DownloadInfo {
    pub downlink: String,
}

/// Remote API surface consumed by the install pipeline.
///
/// Called from worker threads, hence `Send + Sync`.
pub trait CatalogApi: Send + Sync {
    fn get_download_info(&self, item: &CatalogItem) -> Result<DownloadInfo>;
}

const USER_AGENT: &str = concat!("minitile/", env!("CARGO_PKG_VERSION"));

/// JSON-over-HTTP catalog client.
///
/// Expects `GET {base_url}/products/{id}/downlink` to answer with
/// `{"downlink": "<url>"}`.
#[derive(Debug, Clone)]
pub struct HttpCatalogApi {
    base_url: String,
    token: Option<String>,
}

impl HttpCatalogApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

impl CatalogApi for HttpCatalogApi {
    fn get_download_info(&self, item: &CatalogItem) -> Result<DownloadInfo> {
        let url = format!("{}/products/{}/downlink", self.base_url, item.id);
        let mut request = ureq::get(&url).set("User-Agent", USER_AGENT);
        if let Some(token) = &self.token {
            request = request.set("Authorization", &format!("Bearer {token}"));
        }

        let info: DownloadInfo = request
            .call()
            .with_context(|| format!("Download info request failed for {}", item.name))?
            .into_json()
            .context("Failed to parse download info response")?;

        if info.downlink.is_empty() {
            bail!("Catalog returned an empty downlink for {}", item.name);
        }
        Ok(info)
    }
}

/// An entry of an on-disk catalog file.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    #[serde(flatten)]
    pub item: CatalogItem,
    #[serde(default)]
    pub downlink: Option<String>,
}

/// A catalog read from a local JSON file: a list of items, each with an
/// optional direct downlink.
#[derive(Debug, Clone, Default)]
pub struct CatalogFile {
    items: Vec<CatalogItem>,
    downlinks: HashMap<u64, String>,
}

impl CatalogFile {
    pub fn parse(content: &str) -> Result<Self> {
        let entries: Vec<CatalogEntry> =
            serde_json::from_str(content).context("Failed to parse catalog")?;

        let mut catalog = CatalogFile::default();
        for entry in entries {
            if let Some(link) = entry.downlink {
                catalog.downlinks.insert(entry.item.id, link);
            }
            catalog.items.push(entry.item);
        }
        Ok(catalog)
    }

    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog {:?}", path))?;
        Self::parse(&content)
    }

    pub fn items(&self) -> &[CatalogItem] {
        &self.items
    }

    pub fn find(&self, id: u64) -> Option<&CatalogItem> {
        self.items.iter().find(|i| i.id == id)
    }
}

impl CatalogApi for CatalogFile {
    fn get_download_info(&self, item: &CatalogItem) -> Result<DownloadInfo> {
        match self.downlinks.get(&item.id) {
            Some(link) => Ok(DownloadInfo {
                downlink: link.clone(),
            }),
            None => bail!("No downlink listed for {} ({})", item.name, item.id),
        }
    }
}
