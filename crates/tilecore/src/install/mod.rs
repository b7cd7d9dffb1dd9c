//! Installer extraction.
//!
//! A staged installer is unpacked into a per-item scratch directory, the
//! payload (`data/noarch`) is moved into the install directory, and both the
//! scratch directory and the staged file are removed no matter how the
//! operation ends.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::CatalogItem;
use crate::paths::{CachePaths, InstallTarget, INSTALL_MARKER};

/// Location of the game files inside an unpacked installer.
pub const PAYLOAD_SUBPATH: &str = "data/noarch";

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("Failed to run {program}: {source}")]
    ToolUnavailable {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Extraction failed ({status}): {stderr}")]
    ExtractFailed { status: ExitStatus, stderr: String },
    #[error("Installer has no data/noarch directory (looked in {0:?})")]
    MissingPayload(PathBuf),
    #[error("Failed to move {from:?} -> {to:?}: {source}")]
    MoveFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> InstallError + '_ {
    move |source| InstallError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// External unpacking command.
///
/// `{archive}` and `{dest}` in `args` are replaced with the staged file and
/// the scratch directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveTool {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for ArchiveTool {
    fn default() -> Self {
        Self {
            program: "unzip".to_string(),
            args: ["-qq", "{archive}", "-d", "{dest}"]
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

impl ArchiveTool {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    fn command(&self, archive: &Path, dest: &Path) -> Command {
        let archive = archive.to_string_lossy();
        let dest = dest.to_string_lossy();
        let mut cmd = Command::new(&self.program);
        for arg in &self.args {
            cmd.arg(arg.replace("{archive}", &archive).replace("{dest}", &dest));
        }
        cmd
    }

    /// Unpack `archive` into `dest`.
    pub fn extract(&self, archive: &Path, dest: &Path) -> Result<(), InstallError> {
        tracing::debug!("Running {} on {:?}", self.program, archive);
        let output = self
            .command(archive, dest)
            .stdin(std::process::Stdio::null())
            .output()
            .map_err(|source| InstallError::ToolUnavailable {
                program: self.program.clone(),
                source,
            })?;

        // unzip exits 1 on warnings (e.g. the shell stub in front of the zip) but still extracts
        let tolerated = self.program == "unzip" && output.status.code() == Some(1);
        if !output.status.success() && !tolerated {
            return Err(InstallError::ExtractFailed {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Removes the scratch directory and staged artifact when dropped.
struct Scratch<'a> {
    extract_dir: &'a Path,
    staged: &'a Path,
}

impl Drop for Scratch<'_> {
    fn drop(&mut self) {
        if self.extract_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(self.extract_dir) {
                tracing::warn!("Failed to remove {:?}: {e}", self.extract_dir);
            }
        }
        if self.staged.exists() {
            if let Err(e) = std::fs::remove_file(self.staged) {
                tracing::warn!("Failed to remove {:?}: {e}", self.staged);
            }
        }
    }
}

/// Unpacks staged installers into the library.
#[derive(Debug, Clone)]
pub struct Extractor {
    tool: ArchiveTool,
    cache: CachePaths,
}

impl Extractor {
    pub fn new(tool: ArchiveTool, cache: CachePaths) -> Self {
        Self { tool, cache }
    }

    /// Unpack `staged` and move its payload to `target.install_dir`.
    ///
    /// The marker file only becomes visible once every other payload file is
    /// in place.
    pub fn extract_and_install(
        &self,
        item: &CatalogItem,
        staged: &Path,
        target: &InstallTarget,
    ) -> Result<(), InstallError> {
        let extract_dir = self.cache.extract_dir(item);
        let _scratch = Scratch {
            extract_dir: &extract_dir,
            staged,
        };

        if extract_dir.exists() {
            tracing::debug!("Removing leftover extraction dir {:?}", extract_dir);
            std::fs::remove_dir_all(&extract_dir).map_err(io_err(&extract_dir))?;
        }
        std::fs::create_dir_all(&extract_dir).map_err(io_err(&extract_dir))?;

        tracing::info!("Extracting {:?} for {}", staged, item.name);
        self.tool.extract(staged, &extract_dir)?;

        let payload = extract_dir.join(PAYLOAD_SUBPATH);
        if !payload.is_dir() {
            return Err(InstallError::MissingPayload(extract_dir.clone()));
        }

        let install_dir = &target.install_dir;
        if let Some(library_root) = install_dir.parent() {
            std::fs::create_dir_all(library_root).map_err(io_err(library_root))?;
        }

        if install_dir.exists() {
            merge_into(&payload, install_dir)?;
        } else {
            move_dir(&payload, install_dir)?;
        }

        if !target.is_installed() {
            write_marker(target, item)?;
        }

        tracing::info!("Installed {} into {:?}", item.name, install_dir);
        Ok(())
    }
}

/// Move a whole directory to a path that doesn't exist yet.
///
/// Falls back to copying into a hidden sibling and renaming that, so the
/// destination still appears in one step across filesystems.
fn move_dir(from: &Path, to: &Path) -> Result<(), InstallError> {
    let move_failed = |source| InstallError::MoveFailed {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    };

    match std::fs::rename(from, to) {
        Ok(()) => return Ok(()),
        Err(e) => tracing::debug!("rename {:?} -> {:?} failed ({e}), copying", from, to),
    }

    let parent = to.parent().unwrap_or(Path::new("."));
    let sibling = tempfile::Builder::new()
        .prefix(".minitile-")
        .tempdir_in(parent)
        .map_err(move_failed)?;
    copy_dir_recursive(from, sibling.path()).map_err(move_failed)?;
    std::fs::rename(sibling.path(), to).map_err(move_failed)?;
    Ok(())
}

/// Move payload entries into an existing directory, marker last.
fn merge_into(payload: &Path, install_dir: &Path) -> Result<(), InstallError> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(payload)
        .map_err(io_err(payload))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    entries.sort_by_key(|p| p.file_name().is_some_and(|n| n == INSTALL_MARKER));

    for src in entries {
        let Some(name) = src.file_name() else { continue };
        let dest = install_dir.join(name);
        move_entry(&src, &dest).map_err(|source| InstallError::MoveFailed {
            from: src.clone(),
            to: dest.clone(),
            source,
        })?;
    }
    Ok(())
}

fn move_entry(src: &Path, dest: &Path) -> std::io::Result<()> {
    if dest.is_dir() {
        std::fs::remove_dir_all(dest)?;
    } else if dest.exists() {
        std::fs::remove_file(dest)?;
    }

    if std::fs::rename(src, dest).is_ok() {
        return Ok(());
    }
    if src.is_dir() {
        copy_dir_recursive(src, dest)?;
        std::fs::remove_dir_all(src)
    } else {
        std::fs::copy(src, dest)?;
        std::fs::remove_file(src)
    }
}

/// Write-then-rename so readers never see a half-written marker.
fn write_marker(target: &InstallTarget, item: &CatalogItem) -> Result<(), InstallError> {
    let marker = target.marker_path();
    let mut tmp =
        tempfile::NamedTempFile::new_in(&target.install_dir).map_err(io_err(&marker))?;
    writeln!(tmp, "{}", item.name).map_err(io_err(&marker))?;
    tmp.persist(&marker).map_err(|e| InstallError::Io {
        path: marker.clone(),
        source: e.error,
    })?;
    Ok(())
}

/// Recursively copy a directory tree.
fn copy_dir_recursive(src: &Path, dest: &Path) -> std::io::Result<usize> {
    let mut count = 0;
    for entry in walkdir::WalkDir::new(src) {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        let target = dest.join(rel);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
            count += 1;
        }
    }
    Ok(count)
}
