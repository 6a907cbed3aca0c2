//! Stream readers feeding a process's output channel.
//!
//! One reader task per stream. Each forwards decoded text as it arrives and
//! reports when its stream is done. Once the process is gone, a reader keeps
//! draining for `DRAIN_GRACE` after the last read and then gives up, so a
//! grandchild holding the pipe open cannot stall the build forever.

use crate::OutputChunk;

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const READ_CHUNK_SIZE: usize = 32 * 1024;
pub const DRAIN_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }

    pub fn chunk(self, text: String) -> OutputChunk {
        match self {
            StreamKind::Stdout => OutputChunk::Stdout(text),
            StreamKind::Stderr => OutputChunk::Stderr(text),
        }
    }
}

/// Where readers deliver what they read.
pub trait ChunkSink: Send + Sync + 'static {
    /// Queue a chunk. Returns false once the sink no longer accepts output,
    /// which tells the reader to stop.
    fn push(&self, chunk: OutputChunk) -> bool;

    /// The reader for `kind` hit end of stream or a read error.
    fn stream_closed(&self, kind: StreamKind);

    /// Flips to true once the process has exited or been terminated.
    fn process_gone(&self) -> watch::Receiver<bool>;
}

pub fn spawn_reader<S, R>(sink: Arc<S>, stream: R, kind: StreamKind) -> JoinHandle<()>
where
    S: ChunkSink + ?Sized,
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        read_stream(&*sink, stream, kind).await;
        sink.stream_closed(kind);
    })
}

async fn read_stream<S, R>(sink: &S, mut stream: R, kind: StreamKind)
where
    S: ChunkSink + ?Sized,
    R: AsyncRead + Unpin,
{
    let mut gone = sink.process_gone();
    let mut exited = *gone.borrow();
    let mut decoder = Utf8Decoder::default();
    let mut buf = vec![0u8; READ_CHUNK_SIZE];

    loop {
        let read = if exited {
            match tokio::time::timeout(DRAIN_GRACE, stream.read(&mut buf)).await {
                Ok(read) => read,
                Err(_) => {
                    tracing::debug!(stream = kind.as_str(), "stream idle after exit, closing");
                    break;
                }
            }
        } else {
            tokio::select! {
                biased;
                read = stream.read(&mut buf) => read,
                changed = gone.changed() => {
                    exited = changed.is_err() || *gone.borrow();
                    continue;
                }
            }
        };

        match read {
            Ok(0) => break,
            Ok(n) => {
                let text = decoder.decode(&buf[..n]);
                if !text.is_empty() && !sink.push(kind.chunk(text)) {
                    return;
                }
            }
            Err(err) => {
                tracing::warn!(stream = kind.as_str(), error = %err, "read failed, closing stream");
                break;
            }
        }
    }

    let rest = decoder.finish();
    if !rest.is_empty() {
        sink.push(kind.chunk(rest));
    }
}

/// Incremental UTF-8 decoding.
///
/// A multi-byte character split across two reads is held back until the
/// rest of it arrives. Invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let split = self.pending.len() - incomplete_tail_len(&self.pending);
        let text = String::from_utf8_lossy(&self.pending[..split]).into_owned();
        self.pending.drain(..split);
        text
    }

    /// Flush whatever is held back, lossily.
    pub fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

/// Length of a truncated sequence at the end of `bytes`, 0 if it ends on a
/// character boundary.
fn incomplete_tail_len(bytes: &[u8]) -> usize {
    let start = bytes.len().saturating_sub(3);
    for i in (start..bytes.len()).rev() {
        let byte = bytes[i];
        if byte & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let needed = match byte {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => return 0,
        };
        let have = bytes.len() - i;
        return if have < needed { have } else { 0 };
    }
    0
}
