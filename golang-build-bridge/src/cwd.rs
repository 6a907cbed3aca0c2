//! Working directory resolution.
//!
//! A build runs in the directory of the open file when there is one, and in
//! the first open folder otherwise. The CLI models "open file" and "open
//! folders" with `--file` and `--dir`.

use golang_build_core::TargetId;
use golang_build_core::host::WorkspaceResolver;

use directories::BaseDirs;
use std::path::{Path, PathBuf};

/// What is open in a window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceContext {
    pub active_file: Option<PathBuf>,
    pub folders: Vec<PathBuf>,
}

impl WorkspaceContext {
    pub fn new(active_file: Option<PathBuf>, folders: Vec<PathBuf>) -> Self {
        Self {
            active_file,
            folders,
        }
    }

    /// Build a context from `--file` / `--dir` style arguments. With neither,
    /// the process's current directory is the one open folder.
    pub fn from_args(file: Option<&str>, dir: Option<&str>) -> Self {
        let active_file = file.map(resolve_tilde);
        let folders = match dir {
            Some(dir) => vec![resolve_tilde(dir)],
            None if active_file.is_none() => std::env::current_dir().into_iter().collect(),
            None => Vec::new(),
        };
        Self::new(active_file, folders)
    }

    /// The directory builds run in, if it exists on disk.
    ///
    /// An open file always wins over folders, even when its directory is
    /// missing; that reports "nothing open" rather than silently building
    /// somewhere else.
    pub fn working_dir(&self) -> Option<PathBuf> {
        let candidate = match &self.active_file {
            // A bare file name lives in the current directory.
            Some(file) => match file.parent() {
                Some(parent) if parent.as_os_str().is_empty() => std::env::current_dir().ok(),
                parent => parent.map(Path::to_path_buf),
            },
            None => self.folders.first().cloned(),
        }?;
        candidate.is_dir().then_some(candidate)
    }
}

/// The same context for every target; the CLI only has one window.
#[derive(Debug, Clone)]
pub struct StaticWorkspace {
    context: WorkspaceContext,
}

impl StaticWorkspace {
    pub fn new(context: WorkspaceContext) -> Self {
        Self { context }
    }
}

impl WorkspaceResolver for StaticWorkspace {
    fn current_working_context(&self, target: &TargetId) -> Option<PathBuf> {
        let dir = self.context.working_dir();
        tracing::debug!(%target, dir = ?dir, "working directory");
        dir
    }
}

/// Replace a leading `~` with the home directory.
pub fn resolve_tilde(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') || rest.starts_with('\\') => rest,
        _ => return PathBuf::from(path),
    };
    match BaseDirs::new() {
        Some(dirs) => {
            let home = dirs.home_dir();
            let rest = rest.trim_start_matches(['/', '\\']);
            if rest.is_empty() {
                home.to_path_buf()
            } else {
                home.join(rest)
            }
        }
        None => PathBuf::from(path),
    }
}
