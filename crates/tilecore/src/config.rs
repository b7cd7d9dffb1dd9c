//! User settings stored at `~/.config/minitile/settings.json`.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::install::ArchiveTool;

/// Persisted application settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory games get installed into, one subdirectory per game.
    pub library_root: PathBuf,
    /// Holds staged installers (`download/`) and extraction scratch space (`extract/`).
    pub cache_dir: PathBuf,
    /// Command used to unpack installers.
    pub archive_tool: ArchiveTool,
    /// Per-item install directories that replace `library_root/<name>`.
    pub install_overrides: HashMap<u64, PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            library_root: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("~"))
                .join("GOG Games"),
            cache_dir: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("~/.cache"))
                .join("minitile"),
            archive_tool: ArchiveTool::default(),
            install_overrides: HashMap::new(),
        }
    }
}

impl Settings {
    /// Default settings file location.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("minitile")
            .join("settings.json")
    }

    /// Load settings, falling back to defaults when the file doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No settings at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings {:?}", path))?;
        serde_json::from_str(&content).with_context(|| format!("Invalid settings file {:?}", path))
    }

    /// Write settings next to their final location, then rename over it.
    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .context("Settings path has no parent directory")?;
        std::fs::create_dir_all(parent)?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        writeln!(tmp, "{}", self.to_json_pretty()?)?;
        tmp.persist(path)
            .with_context(|| format!("Failed to write settings {:?}", path))?;
        Ok(())
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Explicit install directory for an item, if one was configured.
    pub fn install_override(&self, item_id: u64) -> Option<&Path> {
        self.install_overrides.get(&item_id).map(PathBuf::as_path)
    }

    pub fn set_install_override(&mut self, item_id: u64, dir: impl Into<PathBuf>) {
        self.install_overrides.insert(item_id, dir.into());
    }
}
