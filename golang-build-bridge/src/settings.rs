//! Settings files and environment resolution.
//!
//! Two TOML files feed the toolchain environment: the user's
//! `settings.toml` in the platform config directory, and `.golang-build.toml`
//! in the working directory. Each has an `[env]` table and per-OS
//! `[env.os.<os>]` tables. A variable is looked up in the project file
//! (OS-specific first), then the user file (OS-specific first), then the
//! shell environment.
//!
//! ```toml
//! executable = "/usr/local/go/bin/go"
//!
//! [env]
//! GOPATH = "~/go"
//!
//! [env.os.windows]
//! GOPATH = "C:\\go"
//!
//! [toolchain]
//! flags = ["-v", "-race"]
//! cross_targets = ["linux/amd64", "darwin/arm64"]
//! ```

use golang_build_core::host::EnvironmentResolver;
use golang_build_core::{BuildError, CrossTarget, ToolchainProfile};

use directories::ProjectDirs;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const PROJECT_FILE: &str = ".golang-build.toml";
pub const USER_FILE: &str = "settings.toml";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid cross target in {path}: {message}")]
    InvalidTarget { path: PathBuf, message: String },
}

/// Where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingSource {
    ProjectOs,
    Project,
    UserOs,
    User,
    Shell,
}

impl SettingSource {
    pub fn label(self) -> &'static str {
        match self {
            SettingSource::ProjectOs => "project file (os-specific)",
            SettingSource::Project => "project file",
            SettingSource::UserOs => "user settings (os-specific)",
            SettingSource::User => "user settings",
            SettingSource::Shell => "shell",
        }
    }

    /// True for values set in a settings file rather than inherited from the shell.
    pub fn is_override(self) -> bool {
        !matches!(self, SettingSource::Shell)
    }
}

impl std::fmt::Display for SettingSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EnvTable {
    /// Per-OS values, keyed by `std::env::consts::OS` (`linux`, `macos`, `windows`, ...).
    pub os: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(flatten)]
    pub vars: BTreeMap<String, String>,
}

/// Partial `ToolchainProfile`; only the keys present replace the defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ToolchainOverrides {
    pub name: Option<String>,
    pub executable: Option<String>,
    pub flags: Option<Vec<String>>,
    pub env_vars: Option<Vec<String>>,
    pub required_vars: Option<Vec<String>>,
    pub os_var: Option<String>,
    pub arch_var: Option<String>,
    /// `os/arch` strings.
    pub cross_targets: Option<Vec<String>>,
}

impl ToolchainOverrides {
    fn apply(&self, profile: &mut ToolchainProfile, path: &Path) -> Result<(), SettingsError> {
        if let Some(name) = &self.name {
            profile.name = name.clone();
        }
        if let Some(executable) = &self.executable {
            profile.executable = executable.clone();
        }
        if let Some(flags) = &self.flags {
            profile.flags = flags.clone();
        }
        if let Some(env_vars) = &self.env_vars {
            profile.env_vars = env_vars.clone();
        }
        if let Some(required) = &self.required_vars {
            profile.required_vars = required.clone();
        }
        if let Some(os_var) = &self.os_var {
            profile.os_var = os_var.clone();
        }
        if let Some(arch_var) = &self.arch_var {
            profile.arch_var = arch_var.clone();
        }
        if let Some(targets) = &self.cross_targets {
            profile.cross_targets = targets
                .iter()
                .map(|target| target.parse::<CrossTarget>())
                .collect::<Result<_, _>>()
                .map_err(|err| SettingsError::InvalidTarget {
                    path: path.to_path_buf(),
                    message: err.to_string(),
                })?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SettingsFile {
    pub executable: Option<PathBuf>,
    pub env: EnvTable,
    pub toolchain: Option<ToolchainOverrides>,
}

impl SettingsFile {
    pub fn parse(text: &str, path: &Path) -> Result<Self, SettingsError> {
        toml::from_str(text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// `Ok(None)` when the file does not exist.
    pub fn read(path: &Path) -> Result<Option<Self>, SettingsError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text, path).map(Some),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(SettingsError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    fn lookup(&self, os: &str, name: &str) -> (Option<&String>, Option<&String>) {
        let os_value = self.env.os.get(os).and_then(|vars| vars.get(name));
        (os_value, self.env.vars.get(name))
    }
}

/// A loaded settings file and the path it came from.
#[derive(Debug, Clone)]
struct Layer {
    path: PathBuf,
    file: SettingsFile,
}

/// Every settings layer plus a snapshot of the shell environment.
#[derive(Debug, Clone)]
pub struct Settings {
    project: Option<Layer>,
    user: Option<Layer>,
    shell: BTreeMap<String, String>,
    os: String,
}

impl Settings {
    /// Load the user file and, when `project_dir` is given, its project file.
    pub fn load(project_dir: Option<&Path>) -> Result<Self, SettingsError> {
        let user = match user_settings_path() {
            Some(path) => read_layer(path)?,
            None => None,
        };
        let project = match project_dir {
            Some(dir) => read_layer(dir.join(PROJECT_FILE))?,
            None => None,
        };
        let shell = std::env::vars().collect();

        let settings = Self::from_parts(user, project, shell);
        tracing::debug!(
            user = ?settings.user.as_ref().map(|l| &l.path),
            project = ?settings.project.as_ref().map(|l| &l.path),
            "settings loaded"
        );
        Ok(settings)
    }

    pub fn from_parts(
        user: Option<(PathBuf, SettingsFile)>,
        project: Option<(PathBuf, SettingsFile)>,
        shell: BTreeMap<String, String>,
    ) -> Self {
        let layer = |(path, file): (PathBuf, SettingsFile)| Layer { path, file };
        Self {
            project: project.map(layer),
            user: user.map(layer),
            shell,
            os: std::env::consts::OS.to_string(),
        }
    }

    /// Resolve OS-specific tables for `os` instead of the running platform.
    pub fn with_os(mut self, os: impl Into<String>) -> Self {
        self.os = os.into();
        self
    }

    /// First value for `name` in lookup order, with where it came from.
    pub fn lookup(&self, name: &str) -> Option<(String, SettingSource)> {
        let layers = [
            (&self.project, SettingSource::ProjectOs, SettingSource::Project),
            (&self.user, SettingSource::UserOs, SettingSource::User),
        ];
        for (layer, os_source, source) in layers {
            let Some(layer) = layer else { continue };
            let (os_value, value) = layer.file.lookup(&self.os, name);
            if let Some(value) = os_value {
                return Some((expand_home(value), os_source));
            }
            if let Some(value) = value {
                return Some((expand_home(value), source));
            }
        }
        self.shell
            .get(name)
            .map(|value| (value.clone(), SettingSource::Shell))
    }

    /// Explicit executable path from the project file, else the user file.
    pub fn executable(&self) -> Option<PathBuf> {
        [&self.project, &self.user]
            .into_iter()
            .flatten()
            .find_map(|layer| layer.file.executable.as_deref())
            .map(|path| PathBuf::from(expand_home(&path.to_string_lossy())))
    }

    /// The Go profile with the user's and then the project's `[toolchain]`
    /// overrides applied.
    pub fn profile(&self) -> Result<ToolchainProfile, SettingsError> {
        let mut profile = ToolchainProfile::go();
        for layer in [&self.user, &self.project].into_iter().flatten() {
            if let Some(overrides) = &layer.file.toolchain {
                overrides.apply(&mut profile, &layer.path)?;
            }
        }
        Ok(profile)
    }
}

fn read_layer(path: PathBuf) -> Result<Option<(PathBuf, SettingsFile)>, SettingsError> {
    Ok(SettingsFile::read(&path)?.map(|file| (path, file)))
}

/// `settings.toml` in the platform config directory, if there is a home.
pub fn user_settings_path() -> Option<PathBuf> {
    ProjectDirs::from("com", "DrTomLLC", "golang-build")
        .map(|dirs| dirs.config_dir().join(USER_FILE))
}

fn expand_home(value: &str) -> String {
    crate::cwd::resolve_tilde(value).to_string_lossy().into_owned()
}

/// `EnvironmentResolver` over loaded `Settings`.
#[derive(Debug, Clone)]
pub struct SettingsResolver {
    settings: Settings,
}

impl SettingsResolver {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

impl EnvironmentResolver for SettingsResolver {
    fn resolve_executable(&self, name: &str) -> Result<PathBuf, BuildError> {
        if let Some(path) = self.settings.executable() {
            if path.is_file() {
                return Ok(path);
            }
            tracing::warn!(path = %path.display(), "configured executable does not exist");
            return Err(BuildError::ExecutableNotFound {
                name: path.display().to_string(),
            });
        }

        let found = match self.settings.lookup("PATH") {
            Some((search_path, _)) => {
                let cwd = std::env::current_dir().unwrap_or_default();
                which::which_in(name, Some(search_path), cwd)
            }
            None => which::which(name),
        };
        found.map_err(|err| {
            tracing::debug!(%name, error = %err, "executable lookup failed");
            BuildError::ExecutableNotFound {
                name: name.to_string(),
            }
        })
    }

    fn resolve_env(
        &self,
        required: &[String],
        optional: &[String],
    ) -> Result<BTreeMap<String, String>, BuildError> {
        let mut env = BTreeMap::new();
        for name in required {
            let (value, source) = self
                .settings
                .lookup(name)
                .filter(|(value, _)| !value.is_empty())
                .ok_or_else(|| BuildError::MissingEnvVar { name: name.clone() })?;
            tracing::debug!(%name, %source, "resolved required variable");
            env.insert(name.clone(), value);
        }
        for name in optional {
            if let Some((value, _)) = self.settings.lookup(name) {
                env.insert(name.clone(), value);
            }
        }
        // A PATH from settings must reach the child too.
        if let Some((path, source)) = self.settings.lookup("PATH") {
            if source.is_override() {
                env.insert("PATH".to_string(), path);
            }
        }
        Ok(env)
    }

    fn env_overrides(&self, vars: &[String]) -> BTreeMap<String, String> {
        vars.iter()
            .filter_map(|name| {
                let (value, source) = self.settings.lookup(name)?;
                source.is_override().then(|| (name.clone(), value))
            })
            .collect()
    }
}
