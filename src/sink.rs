//! Where ticks go.

use std::io::Write;

use tokio::sync::mpsc;

use crate::error::PipelineError;
use crate::types::AggregateTick;

pub trait TickSink: Send {
    fn publish(&mut self, tick: &AggregateTick) -> Result<(), PipelineError>;

    /// Called once when the run stops.
    fn flush(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }
}

/// Forwards ticks into an unbounded channel. Fails once the receiver is gone.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<AggregateTick>,
}

impl ChannelSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AggregateTick>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TickSink for ChannelSink {
    fn publish(&mut self, tick: &AggregateTick) -> Result<(), PipelineError> {
        self.tx
            .send(tick.clone())
            .map_err(|_| PipelineError::SinkClosed)
    }
}

/// Writes one publisher payload per line: `{"id": "...", "data": [...]}`.
///
/// Flushes after every line unless `with_flush_every` batches them; wrap
/// slow writers such as stdout in a `BufWriter` and batch.
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
    published: u64,
    flush_every: u64,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            published: 0,
            flush_every: 1,
        }
    }

    pub fn with_flush_every(mut self, lines: u64) -> Self {
        self.flush_every = lines.max(1);
        self
    }

    pub fn published(&self) -> u64 {
        self.published
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> TickSink for JsonLinesSink<W> {
    fn publish(&mut self, tick: &AggregateTick) -> Result<(), PipelineError> {
        let line = serde_json::to_string(&tick.to_payload())?;
        writeln!(self.writer, "{}", line)?;
        self.published += 1;
        if self.published % self.flush_every == 0 {
            self.writer.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), PipelineError> {
        self.writer.flush()?;
        Ok(())
    }
}
