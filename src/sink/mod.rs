pub mod carbon;
pub mod csv;
pub mod influx;

#[cfg(test)]
pub(crate) mod mock;

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Result;

use crate::config::Config;

/// Point-in-time copy of the latest-value store, handed to each sink
/// for the duration of one flush call.
pub type Snapshot = HashMap<String, f64>;

/// Per-sink health bookkeeping.
///
/// Atomics so spawned I/O tasks can record outcomes after the flush call
/// has already returned. Each sink owns its own state; it is never
/// shared across sinks.
#[derive(Debug, Default)]
pub struct SinkState {
    /// Unix seconds of the last successful delivery.
    pub last_flush: AtomicI64,
    /// Unix seconds of the last delivery failure.
    pub last_exception: AtomicI64,
    /// Duration of the last successful delivery in milliseconds.
    pub flush_time_ms: AtomicI64,
    /// Size of the last successful payload in bytes.
    pub flush_length: AtomicU64,
}

impl SinkState {
    pub fn record_success(&self, now: i64, elapsed: Duration, payload_len: usize) {
        self.last_flush.store(now, Ordering::Relaxed);
        self.flush_time_ms
            .store(elapsed.as_millis().min(i64::MAX as u128) as i64, Ordering::Relaxed);
        self.flush_length
            .store(payload_len as u64, Ordering::Relaxed);
    }

    pub fn record_failure(&self, now: i64) {
        self.last_exception.store(now, Ordering::Relaxed);
    }
}

/// Sink dispatches snapshots to a configured backend.
///
/// Enum dispatch rather than trait objects keeps the async flush path
/// free of `Pin<Box<dyn Future>>` indirection, and doubles as the static
/// backend registry: every backend is a variant, selected at startup
/// from its config enable flag.
pub enum Sink {
    Carbon(carbon::CarbonSink),
    Csv(csv::CsvSink),
    Influx(influx::InfluxSink),
    #[cfg(test)]
    Mock(mock::MockSink),
}

impl Sink {
    /// Returns the sink's name for logging.
    pub fn name(&self) -> &str {
        match self {
            Self::Carbon(s) => s.name(),
            Self::Csv(s) => s.name(),
            Self::Influx(s) => s.name(),
            #[cfg(test)]
            Self::Mock(s) => s.name(),
        }
    }

    /// Delivers one snapshot to the backend.
    pub async fn flush(&mut self, timestamp: i64, snapshot: Snapshot) -> Result<()> {
        match self {
            Self::Carbon(s) => s.flush(timestamp, snapshot).await,
            Self::Csv(s) => s.flush(timestamp, snapshot).await,
            Self::Influx(s) => s.flush(timestamp, snapshot).await,
            #[cfg(test)]
            Self::Mock(s) => s.flush(timestamp, snapshot).await,
        }
    }

    /// Releases the backend's resources.
    pub async fn close(&mut self) -> Result<()> {
        match self {
            Self::Carbon(s) => s.close().await,
            Self::Csv(s) => s.close().await,
            Self::Influx(s) => s.close().await,
            #[cfg(test)]
            Self::Mock(s) => s.close().await,
        }
    }
}

/// Builds the enabled sinks in configuration order.
///
/// Construction failures (for example an unusable CSV log directory)
/// are fatal here, before the flush loop ever starts.
pub fn build_sinks(cfg: &Config) -> Result<Vec<Sink>> {
    let mut sinks = Vec::new();

    if cfg.sinks.carbon.enabled {
        sinks.push(Sink::Carbon(carbon::CarbonSink::new(
            cfg.sinks.carbon.clone(),
        )));
    }

    if cfg.sinks.csv.enabled {
        sinks.push(Sink::Csv(csv::CsvSink::new(
            cfg.sinks.csv.clone(),
            &cfg.measurements,
        )?));
    }

    if cfg.sinks.influx.enabled {
        sinks.push(Sink::Influx(influx::InfluxSink::new(
            cfg.sinks.influx.clone(),
            &cfg.measurements,
        )?));
    }

    Ok(sinks)
}
