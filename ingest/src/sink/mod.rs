//! Durable emission of samples.
mod console;
mod memory;

use async_trait::async_trait;
use error_stack::Result;

use crate::{error::IngestError, types::Sample};

pub use self::console::ConsoleSink;
pub use self::memory::InMemorySink;

/// A buffered time-series writer.
///
/// `write` only buffers. `flush` commits everything buffered since the previous flush as one
/// unit, or nothing, and leaves the buffer empty in both cases.
#[async_trait]
pub trait TimeSeriesSink: Send {
    async fn write(&mut self, sample: Sample) -> Result<(), IngestError>;

    /// Commits the buffered samples, returning how many were committed.
    async fn flush(&mut self) -> Result<usize, IngestError>;

    /// Drops the buffered samples without writing them.
    fn discard(&mut self);

    /// Number of samples waiting for the next flush.
    fn pending(&self) -> usize;
}

/// Creates one sink per run, so that concurrent runs never share a buffer.
pub trait SinkFactory: Send + Sync {
    fn create_sink(&self) -> Box<dyn TimeSeriesSink>;
}

#[async_trait]
impl<S> TimeSeriesSink for Box<S>
where
    S: TimeSeriesSink + ?Sized,
{
    async fn write(&mut self, sample: Sample) -> Result<(), IngestError> {
        (**self).write(sample).await
    }

    async fn flush(&mut self) -> Result<usize, IngestError> {
        (**self).flush().await
    }

    fn discard(&mut self) {
        (**self).discard()
    }

    fn pending(&self) -> usize {
        (**self).pending()
    }
}
