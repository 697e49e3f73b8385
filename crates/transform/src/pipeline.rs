use apmx_core::config::ConfigWatcher;
use apmx_core::model::transaction::ImmutableTransaction;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::transformer::{TransactionTransformer, TransformOutcome};

/// Hands finished transactions to a background transformer task.
#[derive(Clone)]
pub struct TransformPipeline {
    tx: mpsc::Sender<ImmutableTransaction>,
}

pub struct PipelineConfig {
    pub channel_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
        }
    }
}

/// Counters returned when the worker stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub transformed: u64,
    pub ignored: u64,
    pub failed: u64,
    pub failed_makers: u64,
}

impl TransformPipeline {
    /// Spawns the worker. It reads the newest config snapshot from `config`
    /// for every transaction and stops once every pipeline handle is dropped.
    pub fn spawn(
        transformer: TransactionTransformer,
        config: ConfigWatcher,
        cfg: PipelineConfig,
    ) -> (Self, JoinHandle<PipelineStats>) {
        let (tx, rx) = mpsc::channel(cfg.channel_capacity);
        let worker = tokio::spawn(run_transformer(transformer, config, rx));
        (Self { tx }, worker)
    }

    pub async fn submit(&self, transaction: ImmutableTransaction) {
        if self.tx.send(transaction).await.is_err() {
            warn!("transform pipeline dropped transaction: receiver closed");
        }
    }
}

async fn run_transformer(
    transformer: TransactionTransformer,
    config: ConfigWatcher,
    mut rx: mpsc::Receiver<ImmutableTransaction>,
) -> PipelineStats {
    let mut stats = PipelineStats::default();
    while let Some(transaction) = rx.recv().await {
        let snapshot = config.current();
        match transformer.transform(&snapshot, &transaction) {
            Ok(TransformOutcome::Transformed { failed_makers }) => {
                stats.transformed += 1;
                stats.failed_makers += failed_makers as u64;
            }
            Ok(TransformOutcome::Ignored) => stats.ignored += 1,
            Err(e) => {
                stats.failed += 1;
                warn!(error = ?e, guid = %transaction.guid, "failed to transform transaction");
            }
        }
    }
    debug!(?stats, "transform pipeline stopped");
    stats
}
