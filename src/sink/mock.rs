use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};

use super::Snapshot;

/// Test sink that records every call and can be made to fail.
#[derive(Debug, Default)]
pub(crate) struct MockSink {
    pub fail_flush: bool,
    pub flushes: Arc<Mutex<Vec<(i64, Snapshot)>>>,
    pub closes: Arc<Mutex<usize>>,
}

impl MockSink {
    pub fn name(&self) -> &str {
        "mock"
    }

    pub async fn flush(&mut self, timestamp: i64, snapshot: Snapshot) -> Result<()> {
        if self.fail_flush {
            bail!("mock flush failure");
        }
        self.flushes.lock().unwrap().push((timestamp, snapshot));
        Ok(())
    }

    pub async fn close(&mut self) -> Result<()> {
        *self.closes.lock().unwrap() += 1;
        Ok(())
    }
}
