//! golang-build bridge library target.
//!
//! The console host and settings resolver behind the `golang-build` binary.
//! `main.rs` is the entry point; this target lets `tests/*.rs` reach the logic.

pub mod console;
pub mod cwd;
pub mod settings;
pub mod util;

use golang_build_core::BuildResult;

/// The target id the CLI runs everything on.
pub const CLI_TARGET: &str = "cli";

/// Process exit code for a finished build: 0 success, 130 cancelled, 1 otherwise.
pub fn exit_code(result: BuildResult) -> u8 {
    match result {
        BuildResult::Success => 0,
        BuildResult::Cancelled => 130,
        BuildResult::Error | BuildResult::Running => 1,
    }
}
