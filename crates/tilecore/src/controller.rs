//! Per-item install/launch state machine.
//!
//! An [`ItemController`] lives on the interactive thread. Downloads, installs
//! and launch probes run on worker threads and report back over a channel;
//! [`ItemController::pump`] applies those reports in the order they were sent
//! and fires the registered callbacks.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;

use thiserror::Error;

use crate::catalog::{CatalogApi, CatalogItem};
use crate::config::Settings;
use crate::download::{
    ArtifactSource, Download, DownloadError, HttpSource, Progress, ProgressEvent,
};
use crate::install::{Extractor, InstallError};
use crate::launcher::{LaunchError, Launcher, RunningProcess};
use crate::paths::{CachePaths, InstallDirResolver, InstallTarget};

/// What the UI shows for an item.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemState {
    NotInstalled,
    Downloading(Progress),
    Installing,
    Installed,
    /// Installed, but the last start failed. Cleared by acknowledging it.
    LaunchFailed(String),
}

impl ItemState {
    pub fn name(&self) -> &'static str {
        match self {
            ItemState::NotInstalled => "not installed",
            ItemState::Downloading(_) => "downloading",
            ItemState::Installing => "installing",
            ItemState::Installed => "installed",
            ItemState::LaunchFailed(_) => "launch failed",
        }
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemState::Downloading(Progress::Fraction(p)) => {
                write!(f, "downloading ({:.0}%)", p * 100.0)
            }
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("{item} is busy")]
    Busy { item: String },
    #[error("Cannot {action} {item} while it is {state}")]
    InvalidTransition {
        item: String,
        action: &'static str,
        state: &'static str,
    },
    #[error("Failed to start worker thread: {0}")]
    Worker(#[source] std::io::Error),
}

/// Everything that can end an install attempt.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Could not get download info: {0:#}")]
    Api(anyhow::Error),
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error(transparent)]
    Install(#[from] InstallError),
}

/// A failure meant for a modal dialog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorNotice {
    pub item_id: u64,
    pub item_name: String,
    pub headline: String,
    pub detail: String,
}

impl ErrorNotice {
    fn install_failed(item: &CatalogItem, detail: impl Into<String>) -> Self {
        Self {
            item_id: item.id,
            item_name: item.name.clone(),
            headline: format!("Failed to install {}:", item.name),
            detail: detail.into(),
        }
    }

    fn start_failed(item: &CatalogItem, detail: impl Into<String>) -> Self {
        Self {
            item_id: item.id,
            item_name: item.name.clone(),
            headline: format!("Failed to start {}:", item.name),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for ErrorNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n{}", self.headline, self.detail)
    }
}

type ProgressCallback = Rc<dyn Fn(u64, &ProgressEvent)>;
type StateCallback = Rc<dyn Fn(u64, &ItemState)>;
type ErrorCallback = Rc<dyn Fn(u64, &ErrorNotice)>;

/// Callback slots the UI registers against. Invoked on the interactive thread only.
#[derive(Clone, Default)]
pub struct Callbacks {
    progress: Option<ProgressCallback>,
    state_changed: Option<StateCallback>,
    error: Option<ErrorCallback>,
}

impl Callbacks {
    pub fn on_progress(&mut self, cb: impl Fn(u64, &ProgressEvent) + 'static) {
        self.progress = Some(Rc::new(cb));
    }

    pub fn on_state_changed(&mut self, cb: impl Fn(u64, &ItemState) + 'static) {
        self.state_changed = Some(Rc::new(cb));
    }

    pub fn on_error(&mut self, cb: impl Fn(u64, &ErrorNotice) + 'static) {
        self.error = Some(Rc::new(cb));
    }
}

/// Shared, thread-safe collaborators used by every item's workers.
pub struct Pipeline {
    api: Arc<dyn CatalogApi>,
    source: Arc<dyn ArtifactSource>,
    resolver: InstallDirResolver,
    cache: CachePaths,
    extractor: Extractor,
    launcher: Launcher,
    overrides: HashMap<u64, PathBuf>,
}

impl Pipeline {
    pub fn new(settings: &Settings, api: Arc<dyn CatalogApi>) -> Self {
        let cache = CachePaths::new(&settings.cache_dir);
        Self {
            api,
            source: Arc::new(HttpSource),
            resolver: InstallDirResolver::new(&settings.library_root),
            extractor: Extractor::new(settings.archive_tool.clone(), cache.clone()),
            cache,
            launcher: Launcher::default(),
            overrides: settings.install_overrides.clone(),
        }
    }

    pub fn with_source(mut self, source: Arc<dyn ArtifactSource>) -> Self {
        self.source = source;
        self
    }

    pub fn with_launcher(mut self, launcher: Launcher) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn cache(&self) -> &CachePaths {
        &self.cache
    }

    fn resolve(&self, item: &CatalogItem) -> InstallTarget {
        let override_dir = self.overrides.get(&item.id).map(PathBuf::as_path);
        self.resolver.resolve(item, override_dir)
    }

    fn install(
        &self,
        item: &CatalogItem,
        target: &InstallTarget,
        tx: &Sender<WorkerEvent>,
    ) -> Result<(), PipelineError> {
        let info = self.api.get_download_info(item).map_err(PipelineError::Api)?;
        let staging = self.cache.staging_path(item);

        let download = Download::start(self.source.as_ref(), &info.downlink, &staging)?;
        // Size is known once the body is open.
        let _ = tx.send(WorkerEvent::Progress(download.current()));
        for event in download {
            let _ = tx.send(WorkerEvent::Progress(event?));
        }

        let _ = tx.send(WorkerEvent::Installing);
        self.extractor.extract_and_install(item, &staging, target)?;
        Ok(())
    }
}

/// Reports from a worker. The last one sent is always terminal.
#[derive(Debug)]
enum WorkerEvent {
    Progress(ProgressEvent),
    Installing,
    Installed,
    InstallFailed(ErrorNotice),
    Launched(RunningProcess),
    LaunchFailed(ErrorNotice),
}

/// Drives one catalog item through download, install and launch.
pub struct ItemController {
    item: Arc<CatalogItem>,
    pipeline: Arc<Pipeline>,
    target: Option<InstallTarget>,
    state: ItemState,
    worker: Option<Receiver<WorkerEvent>>,
    callbacks: Callbacks,
    process: Option<RunningProcess>,
}

impl ItemController {
    pub fn new(item: Arc<CatalogItem>, pipeline: Arc<Pipeline>) -> Self {
        let mut controller = Self {
            item,
            pipeline,
            target: None,
            state: ItemState::NotInstalled,
            worker: None,
            callbacks: Callbacks::default(),
            process: None,
        };
        controller.state = controller.disk_state();
        controller
    }

    pub fn item(&self) -> &CatalogItem {
        &self.item
    }

    pub fn state(&self) -> &ItemState {
        &self.state
    }

    /// A download, install or launch probe is in flight.
    pub fn is_busy(&self) -> bool {
        self.worker.is_some()
    }

    pub fn callbacks_mut(&mut self) -> &mut Callbacks {
        &mut self.callbacks
    }

    pub fn set_callbacks(&mut self, callbacks: Callbacks) {
        self.callbacks = callbacks;
    }

    /// Resolved once, then reused for the controller's lifetime.
    pub fn install_target(&mut self) -> &InstallTarget {
        let pipeline = &self.pipeline;
        let item = &self.item;
        self.target.get_or_insert_with(|| pipeline.resolve(item))
    }

    /// The process started by the last successful run, if not taken yet.
    pub fn take_process(&mut self) -> Option<RunningProcess> {
        self.process.take()
    }

    fn disk_state(&mut self) -> ItemState {
        if self.install_target().is_installed() {
            ItemState::Installed
        } else {
            ItemState::NotInstalled
        }
    }

    /// Recompute the state from the install marker. No-op while busy.
    pub fn load_state(&mut self) -> &ItemState {
        if self.is_busy() {
            return &self.state;
        }
        let state = match (self.disk_state(), &self.state) {
            (ItemState::Installed, ItemState::LaunchFailed(reason)) => {
                ItemState::LaunchFailed(reason.clone())
            }
            (disk, _) => disk,
        };
        self.set_state(state);
        &self.state
    }

    /// `NotInstalled -> Downloading`, with the work on a new thread.
    pub fn request_install(&mut self) -> Result<(), ControllerError> {
        self.guard("install", |s| matches!(s, ItemState::NotInstalled))?;

        let item = Arc::clone(&self.item);
        let pipeline = Arc::clone(&self.pipeline);
        let target = self.install_target().clone();

        self.spawn_worker("install", move |tx| {
            let event = match pipeline.install(&item, &target, &tx) {
                Ok(()) => WorkerEvent::Installed,
                Err(e) => {
                    tracing::error!("Install of {} failed: {e}", item.name);
                    WorkerEvent::InstallFailed(ErrorNotice::install_failed(&item, e.to_string()))
                }
            };
            let _ = tx.send(event);
        })?;

        tracing::info!("Install requested for {}", self.item.name);
        self.set_state(ItemState::Downloading(Progress::Indeterminate));
        Ok(())
    }

    /// Start the game. The state stays `Installed` unless the start fails.
    pub fn request_run(&mut self) -> Result<(), ControllerError> {
        self.guard("run", |s| matches!(s, ItemState::Installed))?;

        let item = Arc::clone(&self.item);
        let pipeline = Arc::clone(&self.pipeline);
        let target = self.install_target().clone();

        self.spawn_worker("launch", move |tx| {
            let event = match pipeline.launcher.launch(&target, &item) {
                Ok(process) => WorkerEvent::Launched(process),
                Err(e) => WorkerEvent::LaunchFailed(launch_notice(&item, &e)),
            };
            let _ = tx.send(event);
        })?;

        tracing::info!("Run requested for {}", self.item.name);
        Ok(())
    }

    /// Dismiss a launch failure: `LaunchFailed -> Installed`.
    pub fn acknowledge_error(&mut self) {
        if matches!(self.state, ItemState::LaunchFailed(_)) {
            self.set_state(ItemState::Installed);
            self.load_state();
        }
    }

    /// Apply every report that has arrived so far. Returns how many were applied.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Some(rx) = &self.worker {
            match rx.try_recv() {
                Ok(event) => {
                    self.apply(event);
                    applied += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.worker_lost();
                    applied += 1;
                }
            }
        }
        applied
    }

    /// Block until the in-flight operation finishes, applying reports as they come.
    pub fn wait(&mut self) {
        while let Some(rx) = &self.worker {
            match rx.recv() {
                Ok(event) => self.apply(event),
                Err(_) => self.worker_lost(),
            }
        }
    }

    fn guard(
        &self,
        action: &'static str,
        allowed: impl Fn(&ItemState) -> bool,
    ) -> Result<(), ControllerError> {
        if self.is_busy() {
            tracing::debug!("Ignoring {action} for {}: busy", self.item.name);
            return Err(ControllerError::Busy {
                item: self.item.name.clone(),
            });
        }
        if !allowed(&self.state) {
            return Err(ControllerError::InvalidTransition {
                item: self.item.name.clone(),
                action,
                state: self.state.name(),
            });
        }
        Ok(())
    }

    fn spawn_worker(
        &mut self,
        kind: &str,
        work: impl FnOnce(Sender<WorkerEvent>) + Send + 'static,
    ) -> Result<(), ControllerError> {
        let (tx, rx) = mpsc::channel();
        std::thread::Builder::new()
            .name(format!("{kind}-{}", self.item.id))
            .spawn(move || work(tx))
            .map_err(ControllerError::Worker)?;
        self.worker = Some(rx);
        Ok(())
    }

    fn apply(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Progress(event) => {
                if let Some(cb) = &self.callbacks.progress {
                    cb(self.item.id, &event);
                }
                self.set_state(ItemState::Downloading(event.progress()));
            }
            WorkerEvent::Installing => self.set_state(ItemState::Installing),
            WorkerEvent::Installed => {
                self.worker = None;
                self.load_state();
            }
            WorkerEvent::InstallFailed(notice) => {
                self.worker = None;
                self.load_state();
                self.report(&notice);
            }
            WorkerEvent::Launched(process) => {
                self.worker = None;
                self.process = Some(process);
            }
            WorkerEvent::LaunchFailed(notice) => {
                self.worker = None;
                self.set_state(ItemState::LaunchFailed(notice.detail.clone()));
                self.report(&notice);
            }
        }
    }

    /// The worker went away without a terminal report (it panicked).
    fn worker_lost(&mut self) {
        self.worker = None;
        let notice = match self.state {
            ItemState::Downloading(_) | ItemState::Installing => {
                let detail = "The install worker stopped unexpectedly";
                ErrorNotice::install_failed(&self.item, detail)
            }
            _ => ErrorNotice::start_failed(&self.item, "The launch worker stopped unexpectedly"),
        };
        tracing::error!("{}", notice);
        self.load_state();
        self.report(&notice);
    }

    fn report(&self, notice: &ErrorNotice) {
        if let Some(cb) = &self.callbacks.error {
            cb(self.item.id, notice);
        }
    }

    fn set_state(&mut self, state: ItemState) {
        if self.state == state {
            return;
        }
        tracing::debug!("{}: {} -> {}", self.item.name, self.state, state);
        self.state = state;
        if let Some(cb) = &self.callbacks.state_changed {
            cb(self.item.id, &self.state);
        }
    }
}

fn launch_notice(item: &CatalogItem, err: &LaunchError) -> ErrorNotice {
    tracing::error!("Failed to start {}: {err}", item.name);
    ErrorNotice::start_failed(item, err.to_string())
}
