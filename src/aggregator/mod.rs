use std::collections::HashMap;

use tracing::warn;

use crate::sink::{Sink, Snapshot};

/// Latest-value store with sink fan-out.
///
/// `update` overwrites the last value per key; `flush` hands a
/// point-in-time copy of the store to every configured sink. Both paths
/// are driven from the single-owner agent loop, so a flush never
/// observes a partially applied update.
pub struct Aggregator {
    store: HashMap<String, f64>,
    sinks: Vec<Sink>,
    closed: bool,
}

impl Aggregator {
    pub fn new(sinks: Vec<Sink>) -> Self {
        Self {
            store: HashMap::new(),
            sinks,
            closed: false,
        }
    }

    /// Records the latest value for a measurement key. Last write wins;
    /// values are stored as-is, including NaN (sinks filter before
    /// transmission).
    pub fn update(&mut self, key: &str, value: f64) {
        self.store.insert(key.to_string(), value);
    }

    /// Number of distinct keys currently held.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Takes a point-in-time snapshot and delivers it to every sink in
    /// configured order. A failing sink is logged and skipped; the
    /// remaining sinks still receive the same snapshot, and the next
    /// cycle proceeds normally.
    pub async fn flush(&mut self, timestamp: i64) {
        let snapshot: Snapshot = self.store.clone();
        for sink in &mut self.sinks {
            if let Err(e) = sink.flush(timestamp, snapshot.clone()).await {
                warn!(sink = sink.name(), error = %e, "sink flush failed");
            }
        }
    }

    /// Closes every sink exactly once, in configured order. Per-sink
    /// failures are logged so the remaining sinks still get a chance to
    /// release their resources. Subsequent calls are no-ops.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        for sink in &mut self.sinks {
            if let Err(e) = sink.close().await {
                warn!(sink = sink.name(), error = %e, "sink close failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use crate::sink::mock::MockSink;
    use crate::sink::Snapshot;

    use super::*;

    fn recording_sink() -> (Sink, Arc<Mutex<Vec<(i64, Snapshot)>>>, Arc<Mutex<usize>>) {
        let mock = MockSink::default();
        let flushes = Arc::clone(&mock.flushes);
        let closes = Arc::clone(&mock.closes);
        (Sink::Mock(mock), flushes, closes)
    }

    #[tokio::test]
    async fn test_snapshot_is_last_write_wins() {
        let (sink, flushes, _) = recording_sink();
        let mut agg = Aggregator::new(vec![sink]);

        agg.update("sog", 1.0);
        agg.update("cog", 90.0);
        agg.update("sog", 2.5);
        agg.flush(100).await;

        let flushes = flushes.lock().unwrap();
        assert_eq!(flushes.len(), 1);
        let (ts, snapshot) = &flushes[0];
        assert_eq!(*ts, 100);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get("sog"), Some(&2.5));
        assert_eq!(snapshot.get("cog"), Some(&90.0));
    }

    #[tokio::test]
    async fn test_snapshot_has_no_unexpected_keys() {
        let (sink, flushes, _) = recording_sink();
        let mut agg = Aggregator::new(vec![sink]);

        agg.flush(1).await;
        agg.update("depth", 12.0);
        agg.flush(2).await;

        let flushes = flushes.lock().unwrap();
        assert!(flushes[0].1.is_empty());
        assert_eq!(flushes[1].1.len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_is_point_in_time_copy() {
        let (sink, flushes, _) = recording_sink();
        let mut agg = Aggregator::new(vec![sink]);

        agg.update("sog", 1.0);
        agg.flush(1).await;
        agg.update("sog", 99.0);

        // The already-delivered snapshot is unaffected by later updates.
        let flushes = flushes.lock().unwrap();
        assert_eq!(flushes[0].1.get("sog"), Some(&1.0));
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_block_later_sinks() {
        let failing = Sink::Mock(MockSink {
            fail_flush: true,
            ..MockSink::default()
        });
        let (ok_sink, flushes, _) = recording_sink();
        let mut agg = Aggregator::new(vec![failing, ok_sink]);

        agg.update("sog", 3.0);
        agg.flush(10).await;
        agg.flush(11).await;

        // The healthy sink saw both cycles despite the first sink failing.
        let flushes = flushes.lock().unwrap();
        assert_eq!(flushes.len(), 2);
        assert_eq!(flushes[0].1.get("sog"), Some(&3.0));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (sink, _, closes) = recording_sink();
        let mut agg = Aggregator::new(vec![sink]);

        agg.close().await;
        agg.close().await;

        assert_eq!(*closes.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_close_without_flushes() {
        let (sink, flushes, closes) = recording_sink();
        let mut agg = Aggregator::new(vec![sink]);

        agg.close().await;

        assert!(flushes.lock().unwrap().is_empty());
        assert_eq!(*closes.lock().unwrap(), 1);
    }
}
