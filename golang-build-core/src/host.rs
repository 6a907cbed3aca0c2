//! What the core needs from the editor (or whatever is hosting it).

use crate::coordinator::TargetId;
use crate::error::BuildError;
use crate::panel::TextSurface;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Hands out the output surface for a target.
pub trait DisplayHost: Send + Sync {
    /// A cleared surface for a new build. Hosts usually reuse one surface
    /// per target and empty it here.
    fn fresh_surface(&self, target: &TargetId) -> Arc<dyn TextSurface>;

    /// Bring the target's output surface into view.
    fn reveal(&self, target: &TargetId);
}

#[async_trait]
pub trait UserInterface: Send + Sync {
    /// Yes/no question. `action_label` names the "yes" button.
    async fn confirm(&self, message: &str, action_label: &str) -> bool;

    /// `None` when the user dismisses the prompt.
    async fn prompt_text(&self, label: &str) -> Option<String>;

    /// Index of the chosen option, `None` when dismissed.
    async fn select_from_list(&self, options: &[String]) -> Option<usize>;

    fn error_message(&self, message: &str);
}

pub trait EnvironmentResolver: Send + Sync {
    /// Full path of the toolchain executable.
    fn resolve_executable(&self, name: &str) -> Result<PathBuf, BuildError>;

    /// Values for `required` (all must be set) and whichever of `optional`
    /// are set, from settings first and then the shell.
    fn resolve_env(
        &self,
        required: &[String],
        optional: &[String],
    ) -> Result<BTreeMap<String, String>, BuildError>;

    /// Only those of `vars` that come from settings rather than the shell.
    fn env_overrides(&self, vars: &[String]) -> BTreeMap<String, String>;
}

pub trait WorkspaceResolver: Send + Sync {
    /// Directory builds for `target` run in, if there is one.
    fn current_working_context(&self, target: &TargetId) -> Option<PathBuf>;
}

pub trait TerminalLauncher: Send + Sync {
    fn launch_terminal(&self, cwd: &Path, env: &BTreeMap<String, String>) -> Result<(), BuildError>;
}

/// The host's collaborators, bundled for `BuildCommands::new`.
#[derive(Clone)]
pub struct HostServices {
    pub display: Arc<dyn DisplayHost>,
    pub ui: Arc<dyn UserInterface>,
    pub environment: Arc<dyn EnvironmentResolver>,
    pub workspace: Arc<dyn WorkspaceResolver>,
    pub terminal: Arc<dyn TerminalLauncher>,
}
