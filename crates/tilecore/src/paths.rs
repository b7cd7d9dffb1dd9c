//! Path layout: install directories, staging files and extraction scratch dirs.

use std::path::{Path, PathBuf};

use crate::catalog::CatalogItem;

/// Sentinel whose presence means "installed".
pub const INSTALL_MARKER: &str = "gameinfo";

/// Launcher script shipped at the root of an installed game.
pub const START_SCRIPT: &str = "start.sh";

/// Subdirectory holding the game binaries and the `goggame-<id>.info` manifest.
pub const GAME_SUBDIR: &str = "game";

/// Where an item is (or will be) installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallTarget {
    pub install_dir: PathBuf,
    /// Replaces `start.sh` as the primary executable when set.
    pub executable_hint: Option<PathBuf>,
}

impl InstallTarget {
    pub fn new(install_dir: impl Into<PathBuf>) -> Self {
        Self {
            install_dir: install_dir.into(),
            executable_hint: None,
        }
    }

    pub fn with_executable_hint(mut self, exe: impl Into<PathBuf>) -> Self {
        self.executable_hint = Some(exe.into());
        self
    }

    pub fn marker_path(&self) -> PathBuf {
        self.install_dir.join(INSTALL_MARKER)
    }

    /// Existence of the marker file is the only durable record of an install.
    pub fn is_installed(&self) -> bool {
        self.marker_path().is_file()
    }

    pub fn primary_executable(&self) -> PathBuf {
        self.executable_hint
            .clone()
            .unwrap_or_else(|| self.install_dir.join(START_SCRIPT))
    }

    pub fn game_dir(&self) -> PathBuf {
        self.install_dir.join(GAME_SUBDIR)
    }

    pub fn manifest_path(&self, item: &CatalogItem) -> PathBuf {
        self.game_dir().join(format!("goggame-{}.info", item.id))
    }
}

/// Computes install directories from the library root.
#[derive(Debug, Clone)]
pub struct InstallDirResolver {
    library_root: PathBuf,
}

impl InstallDirResolver {
    pub fn new(library_root: impl Into<PathBuf>) -> Self {
        Self {
            library_root: library_root.into(),
        }
    }

    pub fn library_root(&self) -> &Path {
        &self.library_root
    }

    /// Use `override_dir` when it is an existing directory, otherwise
    /// `library_root/<item name>`.
    pub fn resolve(&self, item: &CatalogItem, override_dir: Option<&Path>) -> InstallTarget {
        match override_dir {
            Some(dir) if dir.is_dir() => InstallTarget::new(dir),
            _ => InstallTarget::new(self.library_root.join(&item.name)),
        }
    }
}

/// Per-item scratch locations under the cache directory.
///
/// Everything is keyed by item id so two items never share a path.
#[derive(Debug, Clone)]
pub struct CachePaths {
    cache_dir: PathBuf,
}

impl CachePaths {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    pub fn download_dir(&self) -> PathBuf {
        self.cache_dir.join("download")
    }

    pub fn staging_path(&self, item: &CatalogItem) -> PathBuf {
        self.download_dir().join(format!("{}.sh", item.id))
    }

    pub fn extract_dir(&self, item: &CatalogItem) -> PathBuf {
        self.cache_dir.join("extract").join(item.id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: u64, name: &str) -> CatalogItem {
        CatalogItem::new(id, name, "")
    }

    #[test]
    fn test_resolve_default() {
        let resolver = InstallDirResolver::new("/games");
        let target = resolver.resolve(&item(1, "Teenagent"), None);
        assert_eq!(target.install_dir, PathBuf::from("/games/Teenagent"));
        assert_eq!(target.marker_path(), PathBuf::from("/games/Teenagent/gameinfo"));
        assert_eq!(
            target.primary_executable(),
            PathBuf::from("/games/Teenagent/start.sh")
        );
    }

    #[test]
    fn test_resolve_existing_override() {
        let tmp = tempfile::tempdir().unwrap();
        let resolver = InstallDirResolver::new("/games");
        let target = resolver.resolve(&item(1, "Teenagent"), Some(tmp.path()));
        assert_eq!(target.install_dir, tmp.path());
    }

    #[test]
    fn test_resolve_missing_override_falls_back() {
        let resolver = InstallDirResolver::new("/games");
        let target = resolver.resolve(&item(1, "Teenagent"), Some(Path::new("/nonexistent/dir")));
        assert_eq!(target.install_dir, PathBuf::from("/games/Teenagent"));
    }

    #[test]
    fn test_manifest_path() {
        let target = InstallTarget::new("/games/Teenagent");
        assert_eq!(
            target.manifest_path(&item(1207658924, "Teenagent")),
            PathBuf::from("/games/Teenagent/game/goggame-1207658924.info")
        );
    }

    #[test]
    fn test_executable_hint() {
        let target = InstallTarget::new("/games/x").with_executable_hint("/games/x/run.sh");
        assert_eq!(target.primary_executable(), PathBuf::from("/games/x/run.sh"));
    }

    #[test]
    fn test_cache_paths_are_namespaced() {
        let cache = CachePaths::new("/cache");
        let a = item(1, "Same Name");
        let b = item(2, "Same Name");
        assert_ne!(cache.staging_path(&a), cache.staging_path(&b));
        assert_ne!(cache.extract_dir(&a), cache.extract_dir(&b));
        assert_eq!(cache.staging_path(&a), PathBuf::from("/cache/download/1.sh"));
        assert_eq!(cache.extract_dir(&b), PathBuf::from("/cache/extract/2"));
    }

    #[test]
    fn test_is_installed() {
        let tmp = tempfile::tempdir().unwrap();
        let target = InstallTarget::new(tmp.path());
        assert!(!target.is_installed());
        std::fs::write(target.marker_path(), "").unwrap();
        assert!(target.is_installed());
    }
}
