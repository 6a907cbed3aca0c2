//! Per-target build bookkeeping.
//!
//! Each target (one per editor window) has at most one current process and
//! one current printer. A new request first yields to whatever is running:
//! the user either stops the running build or abandons the new one.

use crate::error::BuildError;
use crate::host::{DisplayHost, UserInterface};
use crate::panel::Panel;
use crate::printer::{PanelPrinter, PrintJob};
use crate::process::ProcessHandle;
use crate::toolchain::ToolchainProfile;
use crate::CompletionNotifier;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

pub const YIELD_MESSAGE: &str = "There is already a build running. Would you like to stop it?";
pub const STOP_BUILD_LABEL: &str = "Stop Running Build";

/// Identifies an editor window (or any other independent build context).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetId(String);

impl TargetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TargetId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TargetId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TargetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Reported in the completion event, e.g. `build` or `cross_compile`.
    pub task: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
}

#[derive(Debug)]
pub enum RequestOutcome {
    Started(ProcessHandle),
    /// The user chose not to go ahead. Nothing was launched.
    Abandoned,
}

impl RequestOutcome {
    pub fn process(&self) -> Option<&ProcessHandle> {
        match self {
            RequestOutcome::Started(process) => Some(process),
            RequestOutcome::Abandoned => None,
        }
    }

    pub fn is_started(&self) -> bool {
        matches!(self, RequestOutcome::Started(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    NothingToCancel,
}

#[derive(Debug, Default)]
struct TargetSlot {
    process: Option<ProcessHandle>,
    printer: Option<PanelPrinter>,
}

impl TargetSlot {
    fn clear_process(&mut self, id: Uuid) {
        if self.process.as_ref().is_some_and(|p| p.id() == id) {
            self.process = None;
        }
    }

    fn release_printer(&mut self, id: Uuid) {
        if self.printer.as_ref().is_some_and(|p| p.id() == id) {
            self.printer = None;
        }
    }
}

#[derive(Debug, Default)]
struct TargetEntry {
    /// Held for the whole of one request, prompts included.
    gate: Arc<tokio::sync::Mutex<()>>,
    slot: Mutex<TargetSlot>,
}

/// Target id to entry. Entries are created on first use and dropped by
/// `close_target`.
#[derive(Debug, Default)]
struct BuildRegistry {
    targets: Mutex<HashMap<TargetId, Arc<TargetEntry>>>,
}

impl BuildRegistry {
    fn entry(&self, target: &TargetId) -> Arc<TargetEntry> {
        self.targets
            .lock()
            .entry(target.clone())
            .or_default()
            .clone()
    }

    fn get(&self, target: &TargetId) -> Option<Arc<TargetEntry>> {
        self.targets.lock().get(target).cloned()
    }

    fn remove(&self, target: &TargetId) -> Option<Arc<TargetEntry>> {
        self.targets.lock().remove(target)
    }

    fn len(&self) -> usize {
        self.targets.lock().len()
    }
}

pub struct BuildCoordinator {
    registry: BuildRegistry,
    display: Arc<dyn DisplayHost>,
    ui: Arc<dyn UserInterface>,
    notifier: Arc<CompletionNotifier>,
    channel: String,
    env_vars: Arc<[String]>,
}

impl std::fmt::Debug for BuildCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildCoordinator")
            .field("channel", &self.channel)
            .field("targets", &self.registry.len())
            .finish()
    }
}

impl BuildCoordinator {
    pub fn new(
        profile: &ToolchainProfile,
        display: Arc<dyn DisplayHost>,
        ui: Arc<dyn UserInterface>,
        notifier: Arc<CompletionNotifier>,
    ) -> Self {
        Self {
            registry: BuildRegistry::default(),
            display,
            ui,
            notifier,
            channel: profile.name.clone(),
            env_vars: profile.env_vars.clone().into(),
        }
    }

    /// Channel completion events are published on.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn notifier(&self) -> &Arc<CompletionNotifier> {
        &self.notifier
    }

    /// Yield, then launch.
    pub async fn request_build(
        &self,
        target: &TargetId,
        request: BuildRequest,
    ) -> Result<RequestOutcome, BuildError> {
        match self.reserve(target).await {
            Some(reservation) => reservation.launch(request).map(RequestOutcome::Started),
            None => Ok(RequestOutcome::Abandoned),
        }
    }

    /// Take the target's request gate and apply the yield policy.
    ///
    /// `None` means the user kept the running build; the new request is
    /// abandoned. Otherwise whatever was running has been terminated and the
    /// returned reservation holds the gate until it launches or is dropped.
    pub async fn reserve(&self, target: &TargetId) -> Option<Reservation<'_>> {
        let entry = self.registry.entry(target);
        let gate = entry.gate.clone().lock_owned().await;

        let running = entry.slot.lock().process.clone().filter(|p| !p.is_finished());
        if let Some(process) = running {
            let message = format!("{}\n\n{}", self.channel, YIELD_MESSAGE);
            if !self.ui.confirm(&message, STOP_BUILD_LABEL).await {
                tracing::info!(%target, process = %process.id(), "kept running build, request abandoned");
                return None;
            }
            process.terminate();
            entry.slot.lock().clear_process(process.id());
        }

        Some(Reservation {
            coordinator: self,
            target: target.clone(),
            entry,
            _gate: gate,
        })
    }

    fn launch(
        &self,
        target: &TargetId,
        entry: &Arc<TargetEntry>,
        request: BuildRequest,
    ) -> Result<ProcessHandle, BuildError> {
        let BuildRequest {
            task,
            args,
            cwd,
            env,
        } = request;
        let process = ProcessHandle::launch(args, cwd, env)?;

        let existing = entry.slot.lock().printer.clone().filter(|p| !p.is_finished());
        let panel = match &existing {
            Some(printer) => printer.panel().clone(),
            None => Panel::open(self.display.fresh_surface(target)),
        };

        let release_entry = entry.clone();
        let job = PrintJob {
            task,
            process: process.clone(),
            panel,
            existing,
            env_vars: self.env_vars.clone(),
            notifier: self.notifier.clone(),
            channel: self.channel.clone(),
            on_release: Some(Box::new(move |id| {
                release_entry.slot.lock().release_printer(id);
            })),
        };

        {
            let mut slot = entry.slot.lock();
            let printer = PanelPrinter::spawn(job).inspect_err(|_| {
                process.terminate();
            })?;
            tracing::debug!(%target, process = %process.id(), printer = %printer.id(), "build registered");
            slot.printer = Some(printer);
            slot.process = Some(process.clone());
        }

        self.display.reveal(target);
        Ok(process)
    }

    /// Stop the target's build, if one is running.
    pub fn cancel(&self, target: &TargetId) -> CancelOutcome {
        let Some(entry) = self.registry.get(target) else {
            return CancelOutcome::NothingToCancel;
        };
        let process = entry.slot.lock().process.take();
        match process {
            Some(process) if process.terminate() => {
                tracing::info!(%target, process = %process.id(), "build cancelled");
                CancelOutcome::Cancelled
            }
            _ => CancelOutcome::NothingToCancel,
        }
    }

    /// The target went away: stop its build and forget it.
    pub fn close_target(&self, target: &TargetId) {
        let Some(entry) = self.registry.remove(target) else {
            return;
        };
        let process = entry.slot.lock().process.take();
        if let Some(process) = process {
            process.terminate();
        }
        tracing::debug!(%target, "target closed");
    }

    pub fn is_running(&self, target: &TargetId) -> bool {
        self.current_process(target)
            .is_some_and(|process| !process.is_finished())
    }

    pub fn current_process(&self, target: &TargetId) -> Option<ProcessHandle> {
        self.registry.get(target)?.slot.lock().process.clone()
    }

    pub fn current_printer(&self, target: &TargetId) -> Option<PanelPrinter> {
        self.registry.get(target)?.slot.lock().printer.clone()
    }

    pub fn reveal(&self, target: &TargetId) {
        self.display.reveal(target);
    }

    /// Number of targets with an entry.
    pub fn target_count(&self) -> usize {
        self.registry.len()
    }
}

/// Exclusive right to start the next build on one target.
pub struct Reservation<'a> {
    coordinator: &'a BuildCoordinator,
    target: TargetId,
    entry: Arc<TargetEntry>,
    _gate: OwnedMutexGuard<()>,
}

impl Reservation<'_> {
    pub fn target(&self) -> &TargetId {
        &self.target
    }

    /// Launch the process, attach a printer, register both, and reveal the
    /// panel. On a launch error nothing is registered.
    pub fn launch(self, request: BuildRequest) -> Result<ProcessHandle, BuildError> {
        self.coordinator.launch(&self.target, &self.entry, request)
    }
}
