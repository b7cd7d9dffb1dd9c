//! Starting installed games.
//!
//! `start.sh` is tried first. Installs without it fall back to the first
//! play task of `game/goggame-<id>.info`, started from inside `game/`.
//! Either way the child gets a short probe window: exiting within it counts
//! as a failed start, surviving it counts as a running game.

pub mod manifest;
pub mod process;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::catalog::CatalogItem;
use crate::paths::InstallTarget;
use manifest::{GameManifest, ManifestError};
use process::{LaunchConfig, ProbeOutcome};

pub use process::RunningProcess;

/// How long a game has to stay alive to count as started.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Shown when a game dies without writing to stderr.
pub const NO_ERROR_MESSAGE: &str = "No error message was returned";

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("No executable was found in {0:?}")]
    NotFound(PathBuf),
    #[error("{0}")]
    ExitedEarly(String),
    #[error("Couldn't start {path:?}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("Lost track of the game process: {0}")]
    Probe(#[source] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct Launcher {
    probe_timeout: Duration,
}

impl Default for Launcher {
    fn default() -> Self {
        Self {
            probe_timeout: PROBE_TIMEOUT,
        }
    }
}

impl Launcher {
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Resolve the executable for an installed item.
    pub fn resolve(
        &self,
        target: &InstallTarget,
        item: &CatalogItem,
    ) -> Result<LaunchConfig, LaunchError> {
        let primary = target.primary_executable();
        if primary.is_file() {
            return Ok(LaunchConfig::new(primary));
        }

        let manifest_path = target.manifest_path(item);
        if !manifest_path.is_file() {
            return Err(LaunchError::NotFound(target.install_dir.clone()));
        }

        let manifest = GameManifest::read(&manifest_path)?;
        let Some(task) = manifest.first_task() else {
            tracing::warn!("{:?} lists no play tasks", manifest_path);
            return Err(LaunchError::NotFound(target.install_dir.clone()));
        };

        let game_dir = target.game_dir();
        // Task paths are relative to game/, though some are written from the install root.
        let binary = [game_dir.join(&task.path), target.install_dir.join(&task.path)]
            .into_iter()
            .find(|p| p.is_file())
            .ok_or_else(|| LaunchError::NotFound(target.install_dir.clone()))?;

        let arguments = task.argv().map_err(|source| ManifestError::Arguments {
            path: manifest_path.clone(),
            source,
        })?;

        tracing::debug!("Using play task {:?} from {:?}", task.path, manifest_path);
        Ok(LaunchConfig::new(binary)
            .with_arguments(arguments)
            .with_working_dir(game_dir))
    }

    /// Start the game and probe it.
    pub fn launch(
        &self,
        target: &InstallTarget,
        item: &CatalogItem,
    ) -> Result<RunningProcess, LaunchError> {
        let config = self.resolve(target, item)?;
        tracing::info!("Starting {} via {:?}", item.name, config.binary);

        let child = process::spawn(&config).map_err(|source| LaunchError::Spawn {
            path: config.binary.clone(),
            source,
        })?;

        match process::probe(child, &config.binary, self.probe_timeout)
            .map_err(LaunchError::Probe)?
        {
            ProbeOutcome::Running(running) => {
                tracing::info!("{} is running (pid {})", item.name, running.id());
                Ok(running)
            }
            ProbeOutcome::Exited { status, stderr } => {
                tracing::warn!("{} exited during startup ({status})", item.name);
                let message = if stderr.is_empty() {
                    NO_ERROR_MESSAGE.to_string()
                } else {
                    stderr
                };
                Err(LaunchError::ExitedEarly(message))
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn write_script(path: &Path, body: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn item() -> CatalogItem {
        CatalogItem::new(1207658924, "Unreal Gold", "")
    }

    fn write_manifest(target: &InstallTarget, task_path: &str) {
        let path = target.manifest_path(&item());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            format!(r#"{{"playTasks": [{{"path": "{task_path}"}}, {{"path": "other"}}]}}"#),
        )
        .unwrap();
    }

    fn quick() -> Launcher {
        Launcher::default().with_probe_timeout(Duration::from_millis(500))
    }

    #[test]
    fn test_start_script_exits_early() {
        let tmp = tempfile::tempdir().unwrap();
        let target = InstallTarget::new(tmp.path());
        write_script(&tmp.path().join("start.sh"), "echo 'missing library' >&2\nexit 1");

        let err = Launcher::default().launch(&target, &item()).unwrap_err();
        match err {
            LaunchError::ExitedEarly(message) => assert_eq!(message, "missing library"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_silent_exit_gets_placeholder() {
        let tmp = tempfile::tempdir().unwrap();
        let target = InstallTarget::new(tmp.path());
        write_script(&tmp.path().join("start.sh"), "exit 0");

        let err = quick().launch(&target, &item()).unwrap_err();
        assert_eq!(err.to_string(), NO_ERROR_MESSAGE);
    }

    #[test]
    fn test_alive_after_probe_is_success() {
        let tmp = tempfile::tempdir().unwrap();
        let target = InstallTarget::new(tmp.path());
        write_script(&tmp.path().join("start.sh"), "exec sleep 30");

        let mut running = quick().launch(&target, &item()).unwrap();
        assert_eq!(running.binary(), tmp.path().join("start.sh"));
        assert!(running.try_wait().unwrap().is_none());
        running.kill().unwrap();
    }

    #[test]
    fn test_manifest_fallback_uses_game_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let target = InstallTarget::new(tmp.path());
        write_manifest(&target, "game/bin/run");
        write_script(&tmp.path().join("game/bin/run"), "echo \"cwd=$(pwd -P)\" >&2\nexit 2");

        let config = quick().resolve(&target, &item()).unwrap();
        assert_eq!(config.binary, tmp.path().join("game/bin/run"));
        assert_eq!(config.working_dir, Some(tmp.path().join("game")));

        let err = quick().launch(&target, &item()).unwrap_err();
        let game_dir = tmp.path().join("game").canonicalize().unwrap();
        match err {
            LaunchError::ExitedEarly(message) => {
                assert_eq!(message, format!("cwd={}", game_dir.display()))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_manifest_path_relative_to_game_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let target = InstallTarget::new(tmp.path());
        write_manifest(&target, "bin/run");
        write_script(&tmp.path().join("game/bin/run"), "exec sleep 30");

        let mut running = quick().launch(&target, &item()).unwrap();
        assert_eq!(running.binary(), tmp.path().join("game/bin/run"));
        running.kill().unwrap();
    }

    #[test]
    fn test_manifest_task_arguments_passed() {
        let tmp = tempfile::tempdir().unwrap();
        let target = InstallTarget::new(tmp.path());
        let path = target.manifest_path(&item());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            r#"{"playTasks": [{"path": "run", "arguments": "-conf 'game one.conf'"}]}"#,
        )
        .unwrap();
        write_script(&tmp.path().join("game/run"), "echo \"$1|$2\" >&2\nexit 3");

        let err = quick().launch(&target, &item()).unwrap_err();
        match err {
            LaunchError::ExitedEarly(message) => assert_eq!(message, "-conf|game one.conf"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_manifest_bad_arguments() {
        let tmp = tempfile::tempdir().unwrap();
        let target = InstallTarget::new(tmp.path());
        let path = target.manifest_path(&item());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"playTasks": [{"path": "run", "arguments": "'open"}]}"#).unwrap();
        write_script(&tmp.path().join("game/run"), "exit 0");

        let err = quick().resolve(&target, &item()).unwrap_err();
        assert!(matches!(err, LaunchError::Manifest(ManifestError::Arguments { .. })));
    }

    #[test]
    fn test_nothing_to_run() {
        let tmp = tempfile::tempdir().unwrap();
        let target = InstallTarget::new(tmp.path());
        let err = quick().launch(&target, &item()).unwrap_err();
        assert!(matches!(err, LaunchError::NotFound(ref dir) if dir == tmp.path()));
    }

    #[test]
    fn test_manifest_task_missing_on_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let target = InstallTarget::new(tmp.path());
        write_manifest(&target, "bin/run");
        let err = quick().launch(&target, &item()).unwrap_err();
        assert!(matches!(err, LaunchError::NotFound(_)));
    }

    #[test]
    fn test_broken_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let target = InstallTarget::new(tmp.path());
        let path = target.manifest_path(&item());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{").unwrap();

        let err = quick().launch(&target, &item()).unwrap_err();
        assert!(matches!(err, LaunchError::Manifest(ManifestError::Parse { .. })));
    }

    #[test]
    fn test_start_script_not_executable() {
        let tmp = tempfile::tempdir().unwrap();
        let target = InstallTarget::new(tmp.path());
        std::fs::write(tmp.path().join("start.sh"), "#!/bin/sh\n").unwrap();

        let err = quick().launch(&target, &item()).unwrap_err();
        assert!(matches!(err, LaunchError::Spawn { .. }));
    }
}
