use std::future::Future;
use std::process::ExitCode;

use tracing::{error, info};

use crate::config::IngestConfig;
use crate::errors::{IngestionError, SourceError};
use crate::ingestor::Ingestor;
use crate::sink::Store;
use crate::sink::connector::{ConnectSettings, StoreConnector, StoreHandle};
use crate::source::Source;

/// How a supervised pipeline ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Graceful,
    Fatal { code: u8 },
}

impl Outcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            Outcome::Graceful => 0,
            Outcome::Fatal { code } => *code,
        }
    }
}

impl From<Outcome> for ExitCode {
    fn from(outcome: Outcome) -> Self {
        ExitCode::from(outcome.exit_code())
    }
}

/// Owns the pipeline lifecycle and turns fatal errors into an exit status.
///
/// It never retries a failed pipeline itself. Offsets are only committed
/// after durable writes, so an external process manager can simply restart
/// the process and it resumes from the last committed position.
pub struct Supervisor {
    config: IngestConfig,
}

impl Supervisor {
    pub fn new(config: IngestConfig) -> Self {
        Self { config }
    }

    /// Connects to the store (blocking until it is reachable), provisions the
    /// table, builds the source and runs the ingestor until `shutdown`.
    pub async fn supervise<K, S, M, Fut, F>(&self, store: K, make_source: M, shutdown: F) -> Outcome
    where
        K: Store,
        S: Source,
        M: FnOnce() -> Fut,
        Fut: Future<Output = Result<S, SourceError>>,
        F: Future<Output = ()>,
    {
        let settings = ConnectSettings::from(&self.config.processing);
        let mut handle = StoreConnector::new(store, settings).connect().await;

        let sink = &self.config.sink;
        if let Err(e) = handle.ensure_schema(&sink.table_name, &sink.column_family).await {
            return self.abort(&mut handle, e.into()).await;
        }

        let source = match make_source().await {
            Ok(source) => source,
            Err(e) => return self.abort(&mut handle, e.into()).await,
        };

        let mut ingestor = Ingestor::new(&self.config, source, handle);
        let result = ingestor.run(shutdown).await;
        ingestor.close().await;

        match result {
            Ok(()) => {
                info!("Pipeline stopped gracefully");
                Outcome::Graceful
            }
            Err(e) => Self::fatal(e),
        }
    }

    async fn abort<K: Store>(&self, handle: &mut StoreHandle<K>, e: IngestionError) -> Outcome {
        handle.close().await;
        Self::fatal(e)
    }

    fn fatal(e: IngestionError) -> Outcome {
        let code = e.exit_code();
        error!(error = %e, code, "Terminating pipeline");
        Outcome::Fatal { code }
    }
}
