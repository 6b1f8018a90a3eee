use tracing::{debug, info, warn};

use crate::errors::{BufferError, WriteError};
use crate::sink::Row;
use crate::source::{OffsetCursor, Position};

/// Where a batch gets flushed to.
#[allow(async_fn_in_trait)]
pub trait BatchWriter {
    async fn write_batch(&self, table: &str, rows: &[Row]) -> Result<(), WriteError>;
}

/// A successful flush: how many rows were written and the cursor they authorize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flushed {
    pub rows: usize,
    pub cursor: OffsetCursor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Accumulating,
    /// A flush was triggered and has not succeeded yet.
    Flushing,
    /// Drained on shutdown; accepts nothing.
    Drained,
}

/// Accumulates rows until `batch_size` is reached and flushes them as one unit.
///
/// Clearing the rows and handing out the offset cursor for them happen in the
/// same step, only after the writer reported success. A failed flush keeps
/// both the rows and their positions so the same batch can be retried.
pub struct BatchBuffer {
    table: String,
    batch_size: usize,
    rows: Vec<Row>,
    pending: OffsetCursor,
    state: BufferState,
    draining: bool,
}

impl BatchBuffer {
    pub fn new(table: impl Into<String>, batch_size: usize) -> Self {
        Self {
            table: table.into(),
            batch_size: batch_size.max(1),
            rows: Vec::with_capacity(batch_size),
            pending: OffsetCursor::new(),
            state: BufferState::Accumulating,
            draining: false,
        }
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Adds a row and flushes once the batch is full.
    ///
    /// Returns the flush result when the row completed a batch.
    pub async fn append<W: BatchWriter>(
        &mut self,
        row: Row,
        position: Position,
        writer: &W,
    ) -> Result<Option<Flushed>, BufferError> {
        self.ensure_accepting()?;
        self.rows.push(row);
        self.pending.advance(position);

        if self.rows.len() >= self.batch_size {
            self.state = BufferState::Flushing;
            return self.flush(writer).await;
        }
        Ok(None)
    }

    /// Records the position of a message that produced no row, so the next
    /// authorized cursor moves past it.
    pub fn skip(&mut self, position: Position) -> Result<(), BufferError> {
        self.ensure_accepting()?;
        self.pending.advance(position);
        Ok(())
    }

    /// Writes the current batch. Also used to retry after a failed flush.
    pub async fn flush<W: BatchWriter>(
        &mut self,
        writer: &W,
    ) -> Result<Option<Flushed>, BufferError> {
        if self.state == BufferState::Drained {
            return Ok(None);
        }
        if self.rows.is_empty() && self.pending.is_empty() {
            self.finish_flush();
            return Ok(None);
        }

        self.state = BufferState::Flushing;
        if !self.rows.is_empty() {
            debug!(table = %self.table, rows = self.rows.len(), "Flushing batch");
            if let Err(e) = writer.write_batch(&self.table, &self.rows).await {
                warn!(table = %self.table, rows = self.rows.len(), error = %e, "Batch flush failed");
                return Err(BufferError::Write(e));
            }
            info!(table = %self.table, rows = self.rows.len(), "Flushed batch");
        }

        let rows = self.rows.len();
        self.rows.clear();
        let cursor = std::mem::take(&mut self.pending);
        self.finish_flush();
        Ok(Some(Flushed { rows, cursor }))
    }

    /// Flushes whatever is left below the threshold and moves to `Drained`.
    /// A failure leaves the buffer in `Flushing` with nothing authorized.
    pub async fn flush_remaining<W: BatchWriter>(
        &mut self,
        writer: &W,
    ) -> Result<Option<Flushed>, BufferError> {
        self.draining = true;
        self.flush(writer).await
    }

    fn finish_flush(&mut self) {
        self.state = if self.draining {
            BufferState::Drained
        } else {
            BufferState::Accumulating
        };
    }

    fn ensure_accepting(&self) -> Result<(), BufferError> {
        match self.state {
            BufferState::Accumulating => Ok(()),
            state => Err(BufferError::NotAccepting { state }),
        }
    }
}
