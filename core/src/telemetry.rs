use serde::Serialize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ingest_core=info,runner_container=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct IngestMetrics {
    pub total_messages: usize,
    pub malformed_messages: usize,
    pub rows_written: usize,
    pub bytes_processed: u64,
    pub avg_batch_size: f64,
    pub flushes: usize,
    pub flush_failures: usize,
    pub write_retries: usize,
    pub kafka_commits: usize,
    pub commit_failures: usize,
    pub connect_attempts: u64,
}

impl IngestMetrics {
    pub fn record_flush(&mut self, rows: usize) {
        self.flushes += 1;
        self.rows_written += rows;
        self.avg_batch_size = self.rows_written as f64 / self.flushes as f64;
    }
}
