use thiserror::Error;

/// Request-level failures. Process outcomes (non-zero exit, cancellation)
/// are not errors; they travel through `BuildResult`.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("unable to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no command to run")]
    EmptyCommand,

    #[error("No files or folders are open, or the open file or folder does not exist on disk")]
    NoWorkingDirectory,

    #[error("unable to find the {name} executable")]
    ExecutableNotFound { name: String },

    #[error("the {name} environment variable is required but was not set")]
    MissingEnvVar { name: String },

    #[error("the output of this process is already being drained")]
    OutputTaken,

    #[error("the output panel was closed before the write completed")]
    PanelClosed,

    #[error("unable to open a terminal: {0}")]
    Terminal(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl BuildError {
    /// The message shown to the user, titled with the package name.
    pub fn user_message(&self, title: &str) -> String {
        format!("{}\n\n{}", title, self)
    }
}
