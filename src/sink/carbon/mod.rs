pub mod namespace;
pub mod wire;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::CarbonConfig;

use super::{SinkState, Snapshot};

use self::namespace::{MetricKind, NamespaceBuilder};
use self::wire::MetricBatch;

/// Carbon (Graphite) network sink.
///
/// Opens a fresh connection per flush, writes one encoded payload, and
/// closes. The connect-write-close round trip runs on a spawned task
/// with a timeout, so an unreachable collector cannot stall the tick
/// loop or delay the other sinks.
pub struct CarbonSink {
    cfg: CarbonConfig,
    namespace: NamespaceBuilder,
    state: Arc<SinkState>,
    io_tasks: JoinSet<()>,
}

impl CarbonSink {
    pub fn new(cfg: CarbonConfig) -> Self {
        let namespace = NamespaceBuilder::new(&cfg.prefixes);
        Self {
            cfg,
            namespace,
            state: Arc::new(SinkState::default()),
            io_tasks: JoinSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        "carbon"
    }

    /// Health state handle; readable while I/O tasks are in flight.
    pub fn state(&self) -> Arc<SinkState> {
        Arc::clone(&self.state)
    }

    /// Namespaces and encodes the snapshot, then hands the payload to a
    /// spawned delivery task. Delivery failures are recorded in the sink
    /// health state and logged; they never propagate.
    pub async fn flush(&mut self, timestamp: i64, snapshot: Snapshot) -> Result<()> {
        // Reap finished delivery tasks without blocking.
        while self.io_tasks.try_join_next().is_some() {}

        let batch = self.build_batch(timestamp, &snapshot);

        let payload = if self.cfg.pickle {
            batch.to_pickle()
        } else {
            batch.to_text().into_bytes()
        };

        let port = if self.cfg.pickle {
            self.cfg.pickle_port
        } else {
            self.cfg.text_port
        };
        let addr = format!("{}:{}", self.cfg.host, port);
        let io_timeout = self.cfg.io_timeout;
        let state = Arc::clone(&self.state);

        self.io_tasks.spawn(async move {
            let started = Instant::now();
            match tokio::time::timeout(io_timeout, send_payload(&addr, &payload)).await {
                Ok(Ok(())) => {
                    state.record_success(now_secs(), started.elapsed(), payload.len());
                    debug!(%addr, bytes = payload.len(), "carbon payload delivered");
                }
                Ok(Err(e)) => {
                    state.record_failure(now_secs());
                    warn!(%addr, error = %e, "carbon flush failed");
                }
                Err(_) => {
                    state.record_failure(now_secs());
                    warn!(%addr, timeout = ?io_timeout, "carbon flush timed out");
                }
            }
        });

        Ok(())
    }

    /// Waits for in-flight deliveries; each is bounded by the I/O timeout.
    pub async fn close(&mut self) -> Result<()> {
        while let Some(res) = self.io_tasks.join_next().await {
            if let Err(e) = res {
                warn!(error = %e, "carbon delivery task join failed");
            }
        }
        Ok(())
    }

    /// Flattens the snapshot into a namespaced batch, with the sink's
    /// own health metrics from the previous cycle appended.
    fn build_batch(&self, timestamp: i64, snapshot: &Snapshot) -> MetricBatch {
        let mut batch = MetricBatch::new();

        // Sort for reproducible payloads; map iteration order is not.
        let mut entries: Vec<_> = snapshot.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        for (key, value) in entries {
            batch.add(
                self.namespace.key_for(MetricKind::Gauge, key),
                *value,
                timestamp,
            );
        }

        let state = &self.state;
        batch.add(
            self.namespace.stats_key("last_exception"),
            state.last_exception.load(Ordering::Relaxed) as f64,
            timestamp,
        );
        batch.add(
            self.namespace.stats_key("last_flush"),
            state.last_flush.load(Ordering::Relaxed) as f64,
            timestamp,
        );
        batch.add(
            self.namespace.stats_key("flush_time"),
            state.flush_time_ms.load(Ordering::Relaxed) as f64,
            timestamp,
        );
        batch.add(
            self.namespace.stats_key("flush_length"),
            state.flush_length.load(Ordering::Relaxed) as f64,
            timestamp,
        );

        batch
    }
}

async fn send_payload(addr: &str, payload: &[u8]) -> Result<()> {
    let mut stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("connecting to {addr}"))?;
    stream.write_all(payload).await.context("writing payload")?;
    stream.shutdown().await.context("closing connection")?;
    Ok(())
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}
