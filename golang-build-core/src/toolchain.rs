//! Toolchain configuration: which executable, which flags, which variables.
//!
//! The default profile is Go's. Hosts may override any field from settings.

use crate::error::BuildError;

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// The plain build tasks, run as `<exe> <task> <flags...>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildTask {
    Build,
    Test,
    Install,
    Clean,
}

impl BuildTask {
    pub const ALL: [BuildTask; 4] = [
        BuildTask::Build,
        BuildTask::Test,
        BuildTask::Install,
        BuildTask::Clean,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BuildTask::Build => "build",
            BuildTask::Test => "test",
            BuildTask::Install => "install",
            BuildTask::Clean => "clean",
        }
    }
}

impl std::fmt::Display for BuildTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildTask {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|task| task.as_str() == s)
            .ok_or_else(|| BuildError::Config(format!("unknown task {:?}", s)))
    }
}

/// One OS/architecture pair offered for cross-compilation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CrossTarget {
    pub os: String,
    pub arch: String,
}

impl CrossTarget {
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }

    /// What the picker shows.
    pub fn label(&self) -> String {
        format!("OS: {}, ARCH: {}", self.os, self.arch)
    }
}

impl std::fmt::Display for CrossTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}

/// Parses `os/arch`, e.g. `linux/arm64`.
impl FromStr for CrossTarget {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((os, arch)) if !os.is_empty() && !arch.is_empty() => Ok(Self::new(os, arch)),
            _ => Err(BuildError::Config(format!(
                "expected a target of the form os/arch, got {:?}",
                s
            ))),
        }
    }
}

const GO_CROSS_TARGETS: &[(&str, &str)] = &[
    ("darwin", "386"),
    ("darwin", "amd64"),
    ("darwin", "arm"),
    ("darwin", "arm64"),
    ("dragonfly", "amd64"),
    ("freebsd", "386"),
    ("freebsd", "amd64"),
    ("freebsd", "arm"),
    ("linux", "386"),
    ("linux", "amd64"),
    ("linux", "arm"),
    ("linux", "arm64"),
    ("linux", "ppc64"),
    ("linux", "ppc64le"),
    ("netbsd", "386"),
    ("netbsd", "amd64"),
    ("netbsd", "arm"),
    ("openbsd", "386"),
    ("openbsd", "amd64"),
    ("openbsd", "arm"),
    ("plan9", "386"),
    ("plan9", "amd64"),
    ("solaris", "amd64"),
    ("windows", "386"),
    ("windows", "amd64"),
];

const GO_ENV_VARS: &[&str] = &[
    "GOPATH",
    "GOROOT",
    "GOROOT_FINAL",
    "GOBIN",
    "GOHOSTOS",
    "GOHOSTARCH",
    "GOOS",
    "GOARCH",
    "GOARM",
    "GO386",
    "GORACE",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainProfile {
    /// Shown in titles and used as the completion event channel.
    pub name: String,
    pub executable: String,
    pub flags: Vec<String>,
    /// Every variable the toolchain understands, in header order.
    pub env_vars: Vec<String>,
    /// Subset of `env_vars` that must be set.
    pub required_vars: Vec<String>,
    pub os_var: String,
    pub arch_var: String,
    pub cross_targets: Vec<CrossTarget>,
}

impl Default for ToolchainProfile {
    fn default() -> Self {
        Self::go()
    }
}

impl ToolchainProfile {
    pub fn go() -> Self {
        Self {
            name: "Golang Build".to_string(),
            executable: "go".to_string(),
            flags: vec!["-v".to_string()],
            env_vars: GO_ENV_VARS.iter().map(|v| v.to_string()).collect(),
            required_vars: vec!["GOPATH".to_string()],
            os_var: "GOOS".to_string(),
            arch_var: "GOARCH".to_string(),
            cross_targets: GO_CROSS_TARGETS
                .iter()
                .map(|(os, arch)| CrossTarget::new(*os, *arch))
                .collect(),
        }
    }

    /// `env_vars` minus `required_vars`.
    pub fn optional_vars(&self) -> Vec<String> {
        self.env_vars
            .iter()
            .filter(|var| !self.required_vars.contains(var))
            .cloned()
            .collect()
    }

    /// `[exe, subcommand, flags..., extra...]`
    pub fn command(&self, executable: &Path, subcommand: &str, extra: &[String]) -> Vec<String> {
        let mut args = Vec::with_capacity(2 + self.flags.len() + extra.len());
        args.push(executable.to_string_lossy().into_owned());
        args.push(subcommand.to_string());
        args.extend(self.flags.iter().cloned());
        args.extend(extra.iter().cloned());
        args
    }

    pub fn cross_target_labels(&self) -> Vec<String> {
        self.cross_targets.iter().map(CrossTarget::label).collect()
    }
}
