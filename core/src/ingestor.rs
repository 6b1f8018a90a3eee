use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::buffer::{BatchBuffer, BufferState, Flushed};
use crate::config::{DeadLetterPolicy, IngestConfig};
use crate::errors::{BufferError, IngestionError, MalformedRecordError, Result, SourceError, WriteError};
use crate::sink::Store;
use crate::sink::connector::StoreHandle;
use crate::source::{MessageBatch, OffsetCursor, Position, Source};
use crate::telemetry::IngestMetrics;
use crate::transform::RecordTransformer;

/// The ingestor orchestrates the data flow from source -> sink.
///
/// Everything runs on one sequential control flow. The source is never
/// polled while a flush is outstanding or being retried, so at most one
/// batch is ahead of what has been committed.
pub struct Ingestor<S: Source, K: Store> {
    source: S,
    store: StoreHandle<K>,
    transformer: RecordTransformer,
    buffer: BatchBuffer,
    dead_letter: DeadLetterPolicy,
    max_retries: u32,
    retry_delay: Duration,
    source_retry_delay: Duration,
    /// Flushed but not yet acknowledged by the source.
    uncommitted: OffsetCursor,
    metrics: IngestMetrics,
}

impl<S: Source, K: Store> Ingestor<S, K> {
    pub fn new(config: &IngestConfig, source: S, store: StoreHandle<K>) -> Self {
        let metrics = IngestMetrics {
            connect_attempts: store.connect_attempts(),
            ..IngestMetrics::default()
        };

        Self {
            source,
            store,
            transformer: RecordTransformer::new(&config.record, &config.sink.column_family),
            buffer: BatchBuffer::new(&config.sink.table_name, config.processing.batch_size),
            dead_letter: config.processing.dead_letter,
            max_retries: config.processing.max_retries,
            retry_delay: config.processing.retry_delay(),
            source_retry_delay: config.processing.source_retry_delay(),
            uncommitted: OffsetCursor::new(),
            metrics,
        }
    }

    /// Runs a single poll-transform-flush-commit cycle and returns how many
    /// messages were polled.
    ///
    /// High-level logic:
    /// 1. Fetch a batch of messages from the source.
    /// 2. Transform each message into a row and append it to the buffer.
    /// 3. Whenever the buffer flushes, commit the offsets it authorized.
    /// 4. If a flush fails, retry it before touching the source again.
    pub async fn run_once(&mut self) -> Result<usize> {
        let batch = self.source.next_batch().await?;
        self.process_batch(batch).await
    }

    pub async fn process_batch(&mut self, batch: MessageBatch) -> Result<usize> {
        let polled = batch.len();

        for message in batch.messages {
            self.metrics.total_messages += 1;
            self.metrics.bytes_processed += message.payload.len() as u64;
            let position = message.position;

            let row = match self.transformer.transform(&message) {
                Ok(row) => row,
                Err(e) => {
                    self.handle_malformed(position, e)?;
                    continue;
                }
            };

            let flushed = match self.buffer.append(row, position, &self.store).await {
                Ok(flushed) => flushed,
                Err(BufferError::Write(e)) => self.retry_flush(e).await?,
                Err(e) => return Err(e.into()),
            };
            if let Some(flushed) = flushed {
                self.on_flushed(flushed).await?;
            }
        }

        Ok(polled)
    }

    /// Polls until `shutdown` resolves, then drains the buffer.
    ///
    /// Shutdown is only observed while waiting on the source; an in-flight
    /// flush or retry always runs to completion first.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!(batch_size = self.buffer.batch_size(), "Start consuming");
        tokio::pin!(shutdown);

        loop {
            let polled = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                polled = self.source.next_batch() => polled,
            };

            match polled {
                Ok(batch) => {
                    self.process_batch(batch).await?;
                }
                Err(e) => {
                    let e = IngestionError::from(e);
                    if !e.is_retryable() {
                        return Err(e);
                    }
                    warn!(error = %e, retry_in = ?self.source_retry_delay, "Polling the source failed");
                    tokio::select! {
                        biased;
                        _ = &mut shutdown => {
                            info!("Shutdown requested");
                            break;
                        }
                        _ = sleep(self.source_retry_delay) => {}
                    }
                }
            }
        }

        self.shutdown().await
    }

    /// Flushes any remaining data in the buffer and commits the corresponding
    /// offsets. This MUST be called during a graceful shutdown.
    ///
    /// If the remainder cannot be written within the retry budget nothing is
    /// committed for it and the error is returned.
    pub async fn shutdown(&mut self) -> Result<()> {
        info!(rows = self.buffer.len(), "Draining batch buffer");

        let flushed = match self.buffer.flush_remaining(&self.store).await {
            Ok(flushed) => flushed,
            Err(BufferError::Write(e)) => self.retry_flush(e).await?,
            Err(e) => return Err(e.into()),
        };
        match flushed {
            Some(flushed) => self.on_flushed(flushed).await?,
            None => self.commit().await?,
        }

        if let Err(e) = self.source.shutdown().await {
            warn!(error = %e, "Source did not shut down cleanly");
        }
        info!(metrics = ?self.metrics, "Stream ingestion stopped");
        Ok(())
    }

    /// Closes the store connection. Used on both the graceful and the fatal path.
    pub async fn close(&mut self) {
        self.store.close().await;
    }

    pub fn get_metrics(&self) -> &IngestMetrics {
        &self.metrics
    }

    pub fn buffer_state(&self) -> BufferState {
        self.buffer.state()
    }

    /// Re-attempts the pending batch with linear backoff until it succeeds or
    /// `max_retries` more attempts have failed.
    async fn retry_flush(&mut self, first: WriteError) -> Result<Option<Flushed>> {
        self.metrics.flush_failures += 1;
        let mut last = first;

        for attempt in 1..=self.max_retries {
            let delay = self.retry_delay * attempt;
            warn!(
                attempt,
                max_retries = self.max_retries,
                retry_in = ?delay,
                error = %last,
                "Batch flush failed, retrying"
            );
            sleep(delay).await;
            self.metrics.write_retries += 1;

            match self.buffer.flush(&self.store).await {
                Ok(flushed) => return Ok(flushed),
                Err(BufferError::Write(e)) => {
                    self.metrics.flush_failures += 1;
                    last = e;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let attempts = self.max_retries + 1;
        error!(attempts, rows = self.buffer.len(), error = %last, "Batch flush retries exhausted");
        Err(IngestionError::RetriesExhausted { attempts, last })
    }

    async fn on_flushed(&mut self, flushed: Flushed) -> Result<()> {
        if flushed.rows > 0 {
            self.metrics.record_flush(flushed.rows);
        }
        self.uncommitted.merge(&flushed.cursor);
        self.commit().await
    }

    /// Commits everything flushed so far. A failed commit keeps the cursor for
    /// the next attempt; the rows are already durable and only risk redelivery.
    async fn commit(&mut self) -> Result<()> {
        if self.uncommitted.is_empty() {
            return Ok(());
        }

        match self.source.commit(&self.uncommitted).await {
            Ok(()) => {
                self.metrics.kafka_commits += 1;
                for position in self.uncommitted.iter() {
                    debug!(partition = position.partition, offset = position.offset, "Committed");
                }
                self.uncommitted = OffsetCursor::new();
                Ok(())
            }
            Err(e @ SourceError::Unrecoverable(_)) => Err(e.into()),
            Err(e) => {
                self.metrics.commit_failures += 1;
                warn!(error = %e, "Offset commit failed, will retry with the next flush");
                Ok(())
            }
        }
    }

    fn handle_malformed(&mut self, position: Position, error: MalformedRecordError) -> Result<()> {
        self.metrics.malformed_messages += 1;
        match self.dead_letter {
            DeadLetterPolicy::LogAndSkip => {
                warn!(
                    partition = position.partition,
                    offset = position.offset,
                    error = %error,
                    "Skipping malformed record"
                );
                self.buffer.skip(position)?;
                Ok(())
            }
            DeadLetterPolicy::Fail => {
                error!(
                    partition = position.partition,
                    offset = position.offset,
                    error = %error,
                    "Malformed record, stopping"
                );
                Err(error.into())
            }
        }
    }
}
