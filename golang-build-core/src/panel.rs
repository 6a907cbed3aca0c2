//! The output panel.
//!
//! Hosts hand out `TextSurface`s. Everything that writes to a surface goes
//! through a `Panel`, which queues the write onto the surface's single owner
//! task, so writes land in the order they were queued no matter which task
//! issued them.

use crate::error::BuildError;
use crate::process::BuildResult;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// A host-provided text area the build output goes to.
pub trait TextSurface: Send + Sync {
    /// Current content length, in chars.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ends_with(&self, suffix: &str) -> bool;

    fn append(&self, text: &str);

    /// Records whether the build shown on the surface has finished.
    fn set_status(&self, _status: PanelStatus) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PanelStatus {
    pub finished: bool,
    pub result: Option<BuildResult>,
}

impl PanelStatus {
    pub fn running() -> Self {
        Self {
            finished: false,
            result: None,
        }
    }

    pub fn finished(result: BuildResult) -> Self {
        Self {
            finished: true,
            result: Some(result),
        }
    }
}

#[derive(Debug)]
enum SurfaceTask {
    Write {
        text: String,
        separator: Option<String>,
        ack: Option<oneshot::Sender<()>>,
    },
    Status(PanelStatus),
}

/// Write handle for one surface. Clones share the same owner task.
#[derive(Debug, Clone)]
pub struct Panel {
    id: Uuid,
    tasks: mpsc::UnboundedSender<SurfaceTask>,
}

impl Panel {
    /// Start the owner task for `surface`. Needs a tokio runtime.
    pub fn open(surface: Arc<dyn TextSurface>) -> Self {
        let (tasks, mut queue) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        tokio::spawn(async move {
            while let Some(task) = queue.recv().await {
                apply(surface.as_ref(), task);
            }
            tracing::debug!(panel = %id, "panel writer stopped");
        });
        Self { id, tasks }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn write(&self, text: impl Into<String>) {
        self.enqueue(text.into(), None, None);
    }

    /// Append `text`, first appending `separator` unless the surface is
    /// empty or already ends with it.
    pub fn write_separated(&self, text: impl Into<String>, separator: &str) {
        self.enqueue(text.into(), Some(separator.to_string()), None);
    }

    /// Like `write_separated`, but resolves only once the text is on the surface.
    pub async fn write_and_wait(
        &self,
        text: impl Into<String>,
        separator: Option<&str>,
    ) -> Result<(), BuildError> {
        let (ack, done) = oneshot::channel();
        self.tasks
            .send(SurfaceTask::Write {
                text: text.into(),
                separator: separator.map(str::to_string),
                ack: Some(ack),
            })
            .map_err(|_| BuildError::PanelClosed)?;
        done.await.map_err(|_| BuildError::PanelClosed)
    }

    pub fn set_status(&self, status: PanelStatus) {
        if self.tasks.send(SurfaceTask::Status(status)).is_err() {
            tracing::debug!(panel = %self.id, "status dropped, panel closed");
        }
    }

    fn enqueue(&self, text: String, separator: Option<String>, ack: Option<oneshot::Sender<()>>) {
        let task = SurfaceTask::Write {
            text,
            separator,
            ack,
        };
        if self.tasks.send(task).is_err() {
            tracing::debug!(panel = %self.id, "write dropped, panel closed");
        }
    }
}

fn apply(surface: &dyn TextSurface, task: SurfaceTask) {
    match task {
        SurfaceTask::Write {
            text,
            separator,
            ack,
        } => {
            match separator {
                Some(sep) if !surface.is_empty() && !surface.ends_with(&sep) => {
                    surface.append(&format!("{sep}{text}"));
                }
                _ => surface.append(&text),
            }
            if let Some(ack) = ack {
                let _ = ack.send(());
            }
        }
        SurfaceTask::Status(status) => surface.set_status(status),
    }
}

/// An in-memory surface. Used by tests and by hosts that only need the text.
#[derive(Debug, Clone, Default)]
pub struct BufferSurface {
    inner: Arc<Mutex<BufferState>>,
}

#[derive(Debug, Default)]
struct BufferState {
    text: String,
    chars: usize,
    status: PanelStatus,
}

impl BufferSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        self.inner.lock().text.clone()
    }

    pub fn status(&self) -> PanelStatus {
        self.inner.lock().status
    }
}

impl TextSurface for BufferSurface {
    fn len(&self) -> usize {
        self.inner.lock().chars
    }

    fn ends_with(&self, suffix: &str) -> bool {
        self.inner.lock().text.ends_with(suffix)
    }

    fn append(&self, text: &str) {
        let mut state = self.inner.lock();
        state.text.push_str(text);
        state.chars += text.chars().count();
    }

    fn set_status(&self, status: PanelStatus) {
        self.inner.lock().status = status;
    }
}
