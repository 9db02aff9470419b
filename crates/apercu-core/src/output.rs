//! Output sink and the driver loop that feeds it.

use std::io::{self, Write};

use futures::{Stream, StreamExt};
use thiserror::Error;

use crate::error::RpcError;
use crate::format::OutputFormat;
use crate::types::TailEvent;

/// Where rendered event lines go.
pub trait OutputSink {
    /// Write one line. The sink adds the line terminator.
    fn write_line(&mut self, line: &str) -> io::Result<()>;
}

/// Collects lines in memory.
impl OutputSink for Vec<String> {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.push(line.to_string());
        Ok(())
    }
}

/// Line-buffered writer over any [`Write`], flushed after every event so
/// `apercu ... | grep` sees lines as they arrive.
pub struct WriterSink<W: Write> {
    inner: W,
}

impl<W: Write> WriterSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> OutputSink for WriterSink<W> {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.inner, "{line}")?;
        self.inner.flush()
    }
}

/// Why [`run_tail`] stopped early.
#[derive(Debug, Error)]
pub enum TailError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("write failed: {0}")]
    Output(#[from] io::Error),
}

/// Drive `events` to completion, writing one line per event.
///
/// Returns `Ok(())` when the stream ends, or the first error.
pub async fn run_tail<S, O>(events: S, format: OutputFormat, sink: &mut O) -> Result<(), TailError>
where
    S: Stream<Item = Result<TailEvent, RpcError>>,
    O: OutputSink + ?Sized,
{
    futures::pin_mut!(events);
    let mut written = 0u64;
    while let Some(event) = events.next().await {
        let event = event?;
        sink.write_line(&format.render(&event))?;
        written += 1;
    }
    tracing::debug!(events = written, "tail stream finished");
    Ok(())
}
