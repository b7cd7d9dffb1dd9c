//! `goggame-<id>.info` sidecar files.
//!
//! Only the ordered `playTasks` list matters for launching; everything else
//! in the file is ignored.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Failed to read manifest {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid manifest {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Bad arguments for play task in {path:?}: {source}")]
    Arguments {
        path: PathBuf,
        #[source]
        source: shell_words::ParseError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlayTask {
    /// Executable path, relative to the `game/` directory.
    pub path: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Command line as a single shell-quoted string.
    #[serde(default)]
    pub arguments: Option<String>,
}

impl PlayTask {
    pub fn argv(&self) -> Result<Vec<String>, shell_words::ParseError> {
        match self.arguments.as_deref() {
            Some(args) => shell_words::split(args),
            None => Ok(Vec::new()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameManifest {
    #[serde(default)]
    pub play_tasks: Vec<PlayTask>,
}

impl GameManifest {
    pub fn parse(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    pub fn read(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|source| ManifestError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn first_task(&self) -> Option<&PlayTask> {
        self.play_tasks.first()
    }
}
