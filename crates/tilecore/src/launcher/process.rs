use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

/// How often a freshly spawned game is polled while probing.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Configuration for launching an executable.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// Path to the executable or launcher script.
    pub binary: PathBuf,
    /// Command-line arguments.
    pub arguments: Vec<String>,
    /// Working directory for the child only; ours is never changed.
    pub working_dir: Option<PathBuf>,
}

impl LaunchConfig {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            arguments: Vec::new(),
            working_dir: None,
        }
    }

    pub fn with_arguments(mut self, args: Vec<String>) -> Self {
        self.arguments = args;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(&self.arguments)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

/// Spawn with piped stdout/stderr.
///
/// A script that was written a moment ago can still be "busy" while another
/// thread forks; that case is retried a few times.
pub fn spawn(config: &LaunchConfig) -> std::io::Result<Child> {
    let mut attempts = 0;
    loop {
        match config.command().spawn() {
            Err(e) if is_text_busy(&e) && attempts < 5 => {
                attempts += 1;
                std::thread::sleep(Duration::from_millis(20));
            }
            other => return other,
        }
    }
}

#[cfg(unix)]
fn is_text_busy(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(libc::ETXTBSY)
}

#[cfg(not(unix))]
fn is_text_busy(_err: &std::io::Error) -> bool {
    false
}

/// A game that survived the startup probe.
#[derive(Debug)]
pub struct RunningProcess {
    child: Child,
    binary: PathBuf,
}

impl RunningProcess {
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    pub fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait()
    }

    pub fn kill(&mut self) -> std::io::Result<()> {
        self.child.kill()?;
        self.child.wait().map(|_| ())
    }

    pub fn into_child(self) -> Child {
        self.child
    }
}

/// Result of watching a child for the probe window.
#[derive(Debug)]
pub enum ProbeOutcome {
    Running(RunningProcess),
    Exited { status: ExitStatus, stderr: String },
}

/// Wait up to `timeout` for `child` to exit.
///
/// A child that is still alive afterwards is considered started. One that
/// exited has its remaining stderr collected.
pub fn probe(
    mut child: Child,
    binary: &Path,
    timeout: Duration,
) -> std::io::Result<ProbeOutcome> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            let output = child.wait_with_output()?;
            return Ok(ProbeOutcome::Exited {
                status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(ProbeOutcome::Running(RunningProcess {
                child,
                binary: binary.to_path_buf(),
            }));
        }
        std::thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}
