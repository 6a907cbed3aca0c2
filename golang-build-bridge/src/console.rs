//! Console implementations of the host traits.
//!
//! Build output goes to stdout; questions, errors, and logs go to stderr so
//! the output can be piped.

use golang_build_core::host::{DisplayHost, TerminalLauncher, UserInterface};
use golang_build_core::panel::{PanelStatus, TextSurface};
use golang_build_core::{BuildError, TargetId};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

/// How much trailing text a surface keeps for `ends_with`.
const TAIL_BYTES: usize = 64;

/// A write-only surface over any writer. Only the tail of what was written
/// is kept, which is all the separator rule needs.
pub struct ConsoleSurface {
    out: Mutex<Box<dyn Write + Send>>,
    state: Mutex<TailState>,
}

#[derive(Default)]
struct TailState {
    chars: usize,
    tail: String,
    status: PanelStatus,
}

impl ConsoleSurface {
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(out)),
            state: Mutex::new(TailState::default()),
        }
    }

    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }

    pub fn status(&self) -> PanelStatus {
        self.state.lock().status
    }
}

impl std::fmt::Debug for ConsoleSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ConsoleSurface")
            .field("chars", &state.chars)
            .field("status", &state.status)
            .finish()
    }
}

impl TextSurface for ConsoleSurface {
    fn len(&self) -> usize {
        self.state.lock().chars
    }

    fn ends_with(&self, suffix: &str) -> bool {
        self.state.lock().tail.ends_with(suffix)
    }

    fn append(&self, text: &str) {
        {
            let mut out = self.out.lock();
            if let Err(err) = out.write_all(text.as_bytes()).and_then(|_| out.flush()) {
                tracing::warn!(error = %err, "console write failed");
            }
        }

        let mut state = self.state.lock();
        state.chars += text.chars().count();
        state.tail.push_str(text);
        if state.tail.len() > TAIL_BYTES {
            let mut cut = state.tail.len() - TAIL_BYTES;
            while !state.tail.is_char_boundary(cut) {
                cut += 1;
            }
            state.tail.drain(..cut);
        }
    }

    fn set_status(&self, status: PanelStatus) {
        tracing::debug!(finished = status.finished, result = ?status.result, "panel status");
        self.state.lock().status = status;
    }
}

/// Every target writes to stdout.
#[derive(Debug, Default)]
pub struct ConsoleHost;

impl DisplayHost for ConsoleHost {
    fn fresh_surface(&self, target: &TargetId) -> Arc<dyn TextSurface> {
        tracing::debug!(%target, "new console surface");
        Arc::new(ConsoleSurface::stdout())
    }

    fn reveal(&self, _target: &TargetId) {}
}

/// Prompts on stderr, answers from stdin.
///
/// Answers given up front (`--yes`, a URL argument, `--target`) are used
/// without prompting.
pub struct ConsoleUi {
    assume_yes: bool,
    text: Mutex<Option<String>>,
    choice: Mutex<Option<usize>>,
    stdin: tokio::sync::Mutex<Option<Lines<BufReader<Stdin>>>>,
}

impl std::fmt::Debug for ConsoleUi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleUi")
            .field("assume_yes", &self.assume_yes)
            .finish()
    }
}

impl ConsoleUi {
    pub fn new(assume_yes: bool) -> Self {
        Self {
            assume_yes,
            text: Mutex::new(None),
            choice: Mutex::new(None),
            stdin: tokio::sync::Mutex::new(None),
        }
    }

    pub fn with_text(self, text: Option<String>) -> Self {
        *self.text.lock() = text;
        self
    }

    pub fn with_choice(self, choice: Option<usize>) -> Self {
        *self.choice.lock() = choice;
        self
    }

    /// `None` at end of input.
    async fn read_line(&self) -> Option<String> {
        let mut stdin = self.stdin.lock().await;
        let lines = stdin.get_or_insert_with(|| BufReader::new(tokio::io::stdin()).lines());
        match lines.next_line().await {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read stdin");
                None
            }
        }
    }
}

#[async_trait]
impl UserInterface for ConsoleUi {
    async fn confirm(&self, message: &str, action_label: &str) -> bool {
        if self.assume_yes {
            return true;
        }
        eprintln!("{message}");
        eprint!("{action_label}? [y/N] ");
        let answer = self.read_line().await.unwrap_or_default();
        parse_yes(&answer)
    }

    async fn prompt_text(&self, label: &str) -> Option<String> {
        let preset = self.text.lock().take();
        if preset.is_some() {
            return preset;
        }
        eprint!("{label}: ");
        self.read_line().await
    }

    async fn select_from_list(&self, options: &[String]) -> Option<usize> {
        let preset = self.choice.lock().take();
        if preset.is_some() {
            return preset;
        }
        for (number, option) in options.iter().enumerate() {
            eprintln!("{:>3}) {}", number + 1, option);
        }
        eprint!("Select [1-{}]: ", options.len());
        let answer = self.read_line().await?;
        parse_choice(&answer, options.len())
    }

    fn error_message(&self, message: &str) {
        tracing::error!(%message, "build request failed");
        eprintln!("{message}");
    }
}

pub fn parse_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// 1-based answer to a 0-based index.
pub fn parse_choice(answer: &str, count: usize) -> Option<usize> {
    let number: usize = answer.trim().parse().ok()?;
    (1..=count).contains(&number).then(|| number - 1)
}

/// Opens the platform's terminal emulator.
#[derive(Debug, Default)]
pub struct SystemTerminal;

impl SystemTerminal {
    /// Program and args for a terminal opened in `cwd`.
    pub fn command_for(cwd: &Path) -> Result<Vec<String>, BuildError> {
        let cwd = cwd.to_string_lossy().into_owned();
        if cfg!(target_os = "macos") {
            return Ok(vec!["open".into(), "-a".into(), "Terminal".into(), cwd]);
        }
        if cfg!(windows) {
            return Ok(vec!["cmd".into(), "/C".into(), "start".into(), "cmd".into()]);
        }

        let from_env = std::env::var("TERMINAL").ok().filter(|t| !t.is_empty());
        let program = from_env
            .into_iter()
            .chain(["x-terminal-emulator", "gnome-terminal", "konsole", "xterm"].map(String::from))
            .find(|candidate| which::which(candidate).is_ok())
            .ok_or_else(|| BuildError::Terminal("no terminal emulator found".to_string()))?;
        Ok(vec![program])
    }
}

impl TerminalLauncher for SystemTerminal {
    fn launch_terminal(&self, cwd: &Path, env: &BTreeMap<String, String>) -> Result<(), BuildError> {
        let args = Self::command_for(cwd)?;
        let Some((program, rest)) = args.split_first() else {
            return Err(BuildError::EmptyCommand);
        };

        tracing::info!(%program, cwd = %cwd.display(), overrides = env.len(), "opening terminal");
        tokio::process::Command::new(program)
            .args(rest)
            .current_dir(cwd)
            .envs(env)
            .stdin(std::process::Stdio::null())
            .spawn()
            .map(|_| ())
            .map_err(|err| BuildError::Terminal(format!("{program}: {err}")))
    }
}
