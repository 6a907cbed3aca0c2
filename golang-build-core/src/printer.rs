//! Drains one process's output onto a panel.
//!
//! A printer writes a header describing the command, streams every chunk in
//! arrival order, writes a footer with the elapsed time and result, and then
//! publishes the completion event. When a new build reuses a panel whose
//! previous printer is still busy, the new printer waits for that one to
//! finish before writing anything.

use crate::error::BuildError;
use crate::panel::{Panel, PanelStatus};
use crate::process::{BuildResult, OutputReceiver, ProcessHandle};
use crate::{BUILD_COMPLETE_EVENT, CompletionEvent, CompletionNotifier, OutputChunk};

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

pub const HEADER_SEPARATOR: &str = "\n\n";
pub const FOOTER_SEPARATOR: &str = "\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PrinterPhase {
    Created,
    WritingHeader,
    Streaming,
    WritingFooter,
    Finished,
}

/// Called with the printer's id once it is finished, before the completion
/// event goes out.
pub type ReleaseHook = Box<dyn FnOnce(Uuid) + Send + 'static>;

/// Everything a printer needs.
pub struct PrintJob {
    pub task: String,
    pub process: ProcessHandle,
    pub panel: Panel,
    /// The printer currently writing to `panel`, if any.
    pub existing: Option<PanelPrinter>,
    /// Variables to list in the header, in this order, when set.
    pub env_vars: Arc<[String]>,
    pub notifier: Arc<CompletionNotifier>,
    pub channel: String,
    pub on_release: Option<ReleaseHook>,
}

#[derive(Debug, Clone)]
pub struct PanelPrinter {
    id: Uuid,
    process_id: Uuid,
    panel: Panel,
    phase: watch::Receiver<PrinterPhase>,
}

impl PanelPrinter {
    /// Take the process's output channel and start draining it.
    pub fn spawn(job: PrintJob) -> Result<Self, BuildError> {
        let PrintJob {
            task,
            process,
            panel,
            existing,
            env_vars,
            notifier,
            channel,
            on_release,
        } = job;

        let output = process.take_output().ok_or(BuildError::OutputTaken)?;
        let existing = existing.filter(|printer| !printer.is_finished());
        if existing.is_none() {
            panel.set_status(PanelStatus::running());
        }

        let id = Uuid::new_v4();
        let (phase_tx, phase) = watch::channel(PrinterPhase::Created);
        let printer = Self {
            id,
            process_id: process.id(),
            panel: panel.clone(),
            phase,
        };

        let drain = Drain {
            id,
            task,
            process,
            panel,
            existing,
            env_vars,
            notifier,
            channel,
            on_release,
            phase: phase_tx,
        };
        tokio::spawn(drain.run(output));

        Ok(printer)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn process_id(&self) -> Uuid {
        self.process_id
    }

    pub fn panel(&self) -> &Panel {
        &self.panel
    }

    pub fn phase(&self) -> PrinterPhase {
        *self.phase.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.phase() == PrinterPhase::Finished
    }

    /// Resolves once the footer is written. Also resolves if the printer
    /// task went away without finishing.
    pub async fn wait_finished(&self) {
        let mut phase = self.phase.clone();
        let _ = phase
            .wait_for(|phase| *phase == PrinterPhase::Finished)
            .await;
    }
}

struct Drain {
    id: Uuid,
    task: String,
    process: ProcessHandle,
    panel: Panel,
    existing: Option<PanelPrinter>,
    env_vars: Arc<[String]>,
    notifier: Arc<CompletionNotifier>,
    channel: String,
    on_release: Option<ReleaseHook>,
    phase: watch::Sender<PrinterPhase>,
}

impl Drain {
    async fn run(self, mut output: OutputReceiver) {
        if let Some(existing) = &self.existing {
            tracing::debug!(printer = %self.id, previous = %existing.id(), "waiting for previous printer");
            existing.wait_finished().await;
        }

        self.phase.send_replace(PrinterPhase::WritingHeader);
        self.panel
            .write_separated(render_header(&self.process, &self.env_vars), HEADER_SEPARATOR);

        self.phase.send_replace(PrinterPhase::Streaming);
        while let Some(chunk) = output.recv().await {
            match chunk {
                OutputChunk::Stdout(text) | OutputChunk::Stderr(text) => self.panel.write(text),
                OutputChunk::Eof => break,
            }
        }

        self.phase.send_replace(PrinterPhase::WritingFooter);
        let result = self.process.result();
        let runtime = self.process.runtime().unwrap_or_default();
        self.panel.set_status(PanelStatus::finished(result));
        if let Err(err) = self
            .panel
            .write_and_wait(render_footer(runtime, result), Some(FOOTER_SEPARATOR))
            .await
        {
            tracing::warn!(printer = %self.id, error = %err, "footer not written");
        }

        self.phase.send_replace(PrinterPhase::Finished);
        if let Some(release) = self.on_release {
            release(self.id);
        }

        tracing::info!(
            printer = %self.id,
            process = %self.process.id(),
            task = %self.task,
            %result,
            "build complete"
        );
        let event = CompletionEvent {
            task: self.task,
            args: self.process.args().to_vec(),
            working_dir: self.process.cwd().to_path_buf(),
            env: self.process.env().clone(),
            runtime,
            result,
        };
        self.notifier
            .publish(&self.channel, BUILD_COMPLETE_EVENT, event);
    }
}

/// The block written before a process's output.
///
/// Only variables from `env_vars` that the process was given appear, in
/// `env_vars` order.
pub fn render_header(process: &ProcessHandle, env_vars: &[String]) -> String {
    let mut header = String::new();
    let shown: Vec<(&String, &String)> = env_vars
        .iter()
        .filter_map(|name| process.env().get(name).map(|value| (name, value)))
        .collect();

    if !shown.is_empty() {
        header.push_str("> Environment:\n");
        for (name, value) in shown {
            let _ = writeln!(header, ">   {}={}", name, value);
        }
    }
    let _ = writeln!(header, "> Directory: {}", process.cwd().display());
    let _ = writeln!(header, "> Command: {}", process.command_line());
    header.push_str("> Output:\n");
    header
}

pub fn render_footer(runtime: Duration, result: BuildResult) -> String {
    format!(
        "> Elapsed: {:.3}s\n> Result: {}",
        runtime.as_secs_f64(),
        result.title()
    )
}
