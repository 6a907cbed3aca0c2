//! The user-facing operations: build, cross-compile, get, cancel, and so on.
//!
//! Each operation reports a failure to the user once, through
//! `UserInterface::error_message`, and also returns it.

use crate::coordinator::{BuildCoordinator, BuildRequest, CancelOutcome, RequestOutcome, Reservation, TargetId};
use crate::error::BuildError;
use crate::host::{EnvironmentResolver, HostServices, TerminalLauncher, UserInterface, WorkspaceResolver};
use crate::toolchain::{BuildTask, ToolchainProfile};
use crate::CompletionNotifier;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

pub const CROSS_COMPILE_TASK: &str = "cross_compile";
pub const GET_TASK: &str = "get";

/// What every launch needs, resolved while holding the target's gate.
struct Prepared {
    cwd: PathBuf,
    executable: PathBuf,
    env: BTreeMap<String, String>,
}

pub struct BuildCommands {
    profile: ToolchainProfile,
    coordinator: Arc<BuildCoordinator>,
    ui: Arc<dyn UserInterface>,
    environment: Arc<dyn EnvironmentResolver>,
    workspace: Arc<dyn WorkspaceResolver>,
    terminal: Arc<dyn TerminalLauncher>,
}

impl BuildCommands {
    pub fn new(profile: ToolchainProfile, host: HostServices, notifier: Arc<CompletionNotifier>) -> Self {
        let coordinator = Arc::new(BuildCoordinator::new(
            &profile,
            host.display,
            host.ui.clone(),
            notifier,
        ));
        Self {
            profile,
            coordinator,
            ui: host.ui,
            environment: host.environment,
            workspace: host.workspace,
            terminal: host.terminal,
        }
    }

    pub fn profile(&self) -> &ToolchainProfile {
        &self.profile
    }

    pub fn coordinator(&self) -> &Arc<BuildCoordinator> {
        &self.coordinator
    }

    /// `<exe> <task> <flags...>`
    pub async fn build(&self, target: &TargetId, task: BuildTask) -> Result<RequestOutcome, BuildError> {
        let Some(reservation) = self.coordinator.reserve(target).await else {
            return Ok(RequestOutcome::Abandoned);
        };
        let prepared = self.prepare(target)?;
        let args = self.profile.command(&prepared.executable, task.as_str(), &[]);
        self.launch(reservation, task.as_str(), args, prepared)
    }

    /// Ask for an OS/arch pair, then `<exe> build <flags...>` with the
    /// profile's OS and arch variables set to it.
    pub async fn cross_compile(&self, target: &TargetId) -> Result<RequestOutcome, BuildError> {
        let Some(reservation) = self.coordinator.reserve(target).await else {
            return Ok(RequestOutcome::Abandoned);
        };
        let mut prepared = self.prepare(target)?;

        let labels = self.profile.cross_target_labels();
        let chosen = self
            .ui
            .select_from_list(&labels)
            .await
            .and_then(|index| self.profile.cross_targets.get(index));
        let Some(cross) = chosen else {
            tracing::debug!(%target, "cross-compile target picker dismissed");
            return Ok(RequestOutcome::Abandoned);
        };

        prepared.env.insert(self.profile.os_var.clone(), cross.os.clone());
        prepared.env.insert(self.profile.arch_var.clone(), cross.arch.clone());
        let args = self
            .profile
            .command(&prepared.executable, BuildTask::Build.as_str(), &[]);
        self.launch(reservation, CROSS_COMPILE_TASK, args, prepared)
    }

    /// Ask for a package URL, then `<exe> get <flags...> <url>`.
    pub async fn get_package(&self, target: &TargetId) -> Result<RequestOutcome, BuildError> {
        let Some(reservation) = self.coordinator.reserve(target).await else {
            return Ok(RequestOutcome::Abandoned);
        };
        let prepared = self.prepare(target)?;

        let label = format!("{} get", self.profile.executable);
        let url = self
            .ui
            .prompt_text(&label)
            .await
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());
        let Some(url) = url else {
            return Ok(RequestOutcome::Abandoned);
        };

        let args = self.profile.command(&prepared.executable, GET_TASK, &[url]);
        self.launch(reservation, GET_TASK, args, prepared)
    }

    pub fn cancel(&self, target: &TargetId) -> CancelOutcome {
        self.coordinator.cancel(target)
    }

    pub fn is_cancel_enabled(&self, target: &TargetId) -> bool {
        self.coordinator.is_running(target)
    }

    pub fn reopen_output(&self, target: &TargetId) {
        self.coordinator.reveal(target);
    }

    /// Open a terminal in the working directory with the variables that come
    /// from settings. Shell-provided values are inherited as they are.
    pub fn open_terminal(&self, target: &TargetId) -> Result<(), BuildError> {
        let cwd = self.working_dir(target).inspect_err(|err| self.report(err))?;
        let overrides = self.environment.env_overrides(&self.profile.env_vars);
        self.terminal
            .launch_terminal(&cwd, &overrides)
            .inspect_err(|err| self.report(err))
    }

    pub fn close_target(&self, target: &TargetId) {
        self.coordinator.close_target(target);
    }

    fn prepare(&self, target: &TargetId) -> Result<Prepared, BuildError> {
        let resolve = || -> Result<Prepared, BuildError> {
            let cwd = self.working_dir(target)?;
            let executable = self.environment.resolve_executable(&self.profile.executable)?;
            let env = self
                .environment
                .resolve_env(&self.profile.required_vars, &self.profile.optional_vars())?;
            Ok(Prepared {
                cwd,
                executable,
                env,
            })
        };
        resolve().inspect_err(|err| self.report(err))
    }

    fn working_dir(&self, target: &TargetId) -> Result<PathBuf, BuildError> {
        match self.workspace.current_working_context(target) {
            Some(dir) if dir.is_dir() => Ok(dir),
            _ => Err(BuildError::NoWorkingDirectory),
        }
    }

    fn launch(
        &self,
        reservation: Reservation<'_>,
        task: &str,
        args: Vec<String>,
        prepared: Prepared,
    ) -> Result<RequestOutcome, BuildError> {
        let request = BuildRequest {
            task: task.to_string(),
            args,
            cwd: prepared.cwd,
            env: prepared.env,
        };
        reservation
            .launch(request)
            .map(RequestOutcome::Started)
            .inspect_err(|err| self.report(err))
    }

    fn report(&self, err: &BuildError) {
        tracing::warn!(error = %err, "build request failed");
        self.ui.error_message(&err.user_message(&self.profile.name));
    }
}
