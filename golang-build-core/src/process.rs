//! A supervised toolchain process.
//!
//! `ProcessHandle` owns one child process plus everything the panel needs to
//! describe it afterwards: how it was started, when it started and ended, and
//! how it ended. Output arrives on a single channel of `OutputChunk`s fed by
//! the two stream readers in `multiplexer`.
//!
//! Finishing happens exactly once. Four parties can try to finish a process:
//! the stdout reader, the stderr reader, the supervisor that reaps the child,
//! and `terminate()`. They all go through the same `Lifecycle` lock, and the
//! first one to find the process still running performs the transition.

use crate::OutputChunk;
use crate::error::BuildError;
use crate::multiplexer::{self, ChunkSink, StreamKind};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// How a process ended (or that it has not yet).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildResult {
    Running,
    Success,
    Error,
    Cancelled,
}

impl BuildResult {
    pub fn is_finished(self) -> bool {
        !matches!(self, BuildResult::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BuildResult::Running => "running",
            BuildResult::Success => "success",
            BuildResult::Error => "error",
            BuildResult::Cancelled => "cancelled",
        }
    }

    /// Titled form used in the panel footer.
    pub fn title(self) -> &'static str {
        match self {
            BuildResult::Running => "Running",
            BuildResult::Success => "Success",
            BuildResult::Error => "Error",
            BuildResult::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for BuildResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type OutputReceiver = mpsc::UnboundedReceiver<OutputChunk>;

/// Mutable process state. Only ever touched under `Shared::lifecycle`.
struct Lifecycle {
    result: BuildResult,
    finished_at: Option<DateTime<Utc>>,
    exit_code: Option<i32>,
    exited: bool,
    open_streams: usize,
    sender: Option<mpsc::UnboundedSender<OutputChunk>>,
    kill: Option<oneshot::Sender<()>>,
}

impl Lifecycle {
    /// The finishing transition. Returns false if some other party already
    /// finished the process.
    fn finish(&mut self, result: BuildResult) -> bool {
        if self.result.is_finished() {
            return false;
        }
        self.result = result;
        self.finished_at = Some(Utc::now());
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(OutputChunk::Eof);
        }
        true
    }
}

struct Shared {
    id: Uuid,
    args: Vec<String>,
    cwd: PathBuf,
    env: BTreeMap<String, String>,
    started_at: DateTime<Utc>,
    lifecycle: Mutex<Lifecycle>,
    result_tx: watch::Sender<BuildResult>,
    gone_tx: watch::Sender<bool>,
    output: Mutex<Option<OutputReceiver>>,
}

impl Shared {
    /// Natural finish: needs both streams closed and the exit code collected.
    fn settle(&self, lifecycle: &mut Lifecycle) {
        if !lifecycle.exited || lifecycle.open_streams > 0 {
            return;
        }
        let result = if lifecycle.exit_code == Some(0) {
            BuildResult::Success
        } else {
            BuildResult::Error
        };
        if lifecycle.finish(result) {
            self.result_tx.send_replace(result);
            tracing::info!(
                process = %self.id,
                exit_code = ?lifecycle.exit_code,
                %result,
                "process finished"
            );
        }
    }
}

impl ChunkSink for Shared {
    fn push(&self, chunk: OutputChunk) -> bool {
        let lifecycle = self.lifecycle.lock();
        match &lifecycle.sender {
            Some(sender) => {
                // A dropped receiver is fine; keep draining so the child never blocks on a full pipe.
                let _ = sender.send(chunk);
                true
            }
            None => false,
        }
    }

    fn stream_closed(&self, kind: StreamKind) {
        let mut lifecycle = self.lifecycle.lock();
        lifecycle.open_streams = lifecycle.open_streams.saturating_sub(1);
        tracing::debug!(process = %self.id, stream = kind.as_str(), "stream closed");
        self.settle(&mut lifecycle);
    }

    fn process_gone(&self) -> watch::Receiver<bool> {
        self.gone_tx.subscribe()
    }
}

/// Handle to one launched process. Cloning is cheap; all clones refer to
/// the same process.
#[derive(Clone)]
pub struct ProcessHandle {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("id", &self.shared.id)
            .field("args", &self.shared.args)
            .field("cwd", &self.shared.cwd)
            .field("result", &self.result())
            .finish()
    }
}

impl ProcessHandle {
    /// Spawn `args[0]` with the remaining args, in `cwd`, with `env` applied
    /// over the inherited environment.
    ///
    /// Must be called from within a tokio runtime: the stream readers and the
    /// supervisor are spawned as tasks.
    pub fn launch(
        args: Vec<String>,
        cwd: impl Into<PathBuf>,
        env: BTreeMap<String, String>,
    ) -> Result<Self, BuildError> {
        let cwd = cwd.into();
        let Some((program, rest)) = args.split_first() else {
            return Err(BuildError::EmptyCommand);
        };

        let mut command = Command::new(program);
        command
            .args(rest)
            .current_dir(&cwd)
            .envs(&env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(windows)]
        command.creation_flags(CREATE_NO_WINDOW);

        let started_at = Utc::now();
        let mut child = command.spawn().map_err(|source| BuildError::Spawn {
            program: program.clone(),
            source,
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let open_streams = usize::from(stdout.is_some()) + usize::from(stderr.is_some());

        let (sender, receiver) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = oneshot::channel();
        let (result_tx, _) = watch::channel(BuildResult::Running);
        let (gone_tx, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            id: Uuid::new_v4(),
            args,
            cwd,
            env,
            started_at,
            lifecycle: Mutex::new(Lifecycle {
                result: BuildResult::Running,
                finished_at: None,
                exit_code: None,
                exited: false,
                open_streams,
                sender: Some(sender),
                kill: Some(kill_tx),
            }),
            result_tx,
            gone_tx,
            output: Mutex::new(Some(receiver)),
        });

        tracing::info!(
            process = %shared.id,
            pid = ?child.id(),
            command = %shell_words::join(&shared.args),
            cwd = %shared.cwd.display(),
            "process launched"
        );

        if let Some(stdout) = stdout {
            multiplexer::spawn_reader(shared.clone(), stdout, StreamKind::Stdout);
        }
        if let Some(stderr) = stderr {
            multiplexer::spawn_reader(shared.clone(), stderr, StreamKind::Stderr);
        }
        tokio::spawn(supervise(shared.clone(), child, kill_rx));

        Ok(Self { shared })
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn args(&self) -> &[String] {
        &self.shared.args
    }

    pub fn cwd(&self) -> &Path {
        &self.shared.cwd
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.shared.env
    }

    /// The args quoted the way a shell would need them.
    pub fn command_line(&self) -> String {
        shell_words::join(&self.shared.args)
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.shared.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.shared.lifecycle.lock().finished_at
    }

    pub fn result(&self) -> BuildResult {
        self.shared.lifecycle.lock().result
    }

    pub fn is_finished(&self) -> bool {
        self.result().is_finished()
    }

    /// Exit code of a naturally finished process. `None` while running, when
    /// killed by a signal, or when the code could not be collected.
    pub fn exit_code(&self) -> Option<i32> {
        self.shared.lifecycle.lock().exit_code
    }

    /// `finished_at - started_at`, once finished.
    pub fn runtime(&self) -> Option<Duration> {
        self.finished_at()
            .map(|end| (end - self.shared.started_at).to_std().unwrap_or_default())
    }

    /// Take the output channel. Only the first caller gets it.
    pub fn take_output(&self) -> Option<OutputReceiver> {
        self.shared.output.lock().take()
    }

    /// Stop the process early.
    ///
    /// No-op if the process already finished, in which case this returns false.
    /// Otherwise the result becomes `Cancelled`, the end of stream is queued,
    /// and the supervisor kills and reaps the child.
    ///
    /// A child that has exited while its streams are still draining counts as
    /// running; terminating it in that window still yields `Cancelled`.
    pub fn terminate(&self) -> bool {
        let kill = {
            let mut lifecycle = self.shared.lifecycle.lock();
            if !lifecycle.finish(BuildResult::Cancelled) {
                return false;
            }
            lifecycle.kill.take()
        };

        self.shared.result_tx.send_replace(BuildResult::Cancelled);
        if let Some(kill) = kill {
            let _ = kill.send(());
        }
        self.shared.gone_tx.send_replace(true);

        tracing::info!(process = %self.shared.id, "process terminated");
        true
    }

    /// Wait until the process reaches a terminal result.
    pub async fn wait(&self) -> BuildResult {
        let mut results = self.shared.result_tx.subscribe();
        match results.wait_for(|result| result.is_finished()).await {
            Ok(result) => *result,
            Err(_) => self.result(),
        }
    }
}

/// Owns the child: reaps it on natural exit, or kills and reaps it when
/// `terminate()` fires the kill signal.
async fn supervise(shared: Arc<Shared>, mut child: Child, kill: oneshot::Receiver<()>) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill => {
            if let Err(err) = child.start_kill() {
                tracing::warn!(process = %shared.id, error = %err, "failed to kill process");
            }
            child.wait().await
        }
    };

    let exit_code = match status {
        Ok(status) => status.code(),
        Err(err) => {
            tracing::warn!(process = %shared.id, error = %err, "failed to collect exit status");
            None
        }
    };

    {
        let mut lifecycle = shared.lifecycle.lock();
        lifecycle.exited = true;
        lifecycle.exit_code = exit_code;
        shared.settle(&mut lifecycle);
    }
    shared.gone_tx.send_replace(true);
}
