pub mod commands;
pub mod coordinator;
pub mod error;
pub mod host;
pub mod multiplexer;
pub mod panel;
pub mod printer;
pub mod process;
pub mod toolchain;

// Re-export the main types so hosts can just use `golang_build_core::BuildCommands`
pub use commands::BuildCommands;
pub use coordinator::{BuildCoordinator, BuildRequest, CancelOutcome, RequestOutcome, TargetId};
pub use error::BuildError;
pub use panel::{BufferSurface, Panel, PanelStatus, TextSurface};
pub use printer::{PanelPrinter, PrinterPhase};
pub use process::{BuildResult, ProcessHandle};
pub use toolchain::{BuildTask, CrossTarget, ToolchainProfile};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Event name published on the profile's channel once a build's footer is on screen.
pub const BUILD_COMPLETE_EVENT: &str = "build_complete";

/// One item on a process's output channel.
///
/// Order is preserved within stdout and within stderr. Chunks from the two
/// streams are interleaved as they were read; there is no ordering between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputChunk {
    Stdout(String),
    Stderr(String),
    Eof,
}

/// Published exactly once per process, after its footer has been written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub task: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub env: BTreeMap<String, String>,
    pub runtime: Duration,
    pub result: BuildResult,
}

/// The process-wide notifier completion events are published through.
pub type CompletionNotifier = golang_build_events::EventBus<CompletionEvent>;
