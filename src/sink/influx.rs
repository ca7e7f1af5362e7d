use std::fmt::Write as _;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use reqwest::Client;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::InfluxConfig;

use super::Snapshot;

/// Upper bound on one batch write to the database.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// InfluxDB line-protocol sink with debounced batch writes.
///
/// Each flush queues one point carrying every configured field; the
/// queue drains to the database when it reaches `batch_size` points or
/// `flush_budget` has elapsed since the last drain, whichever comes
/// first. Drains run on spawned tasks; write failures are logged and
/// the batch is dropped.
pub struct InfluxSink {
    cfg: InfluxConfig,
    fields: Vec<String>,
    client: Client,
    queue: Vec<String>,
    last_drain: Instant,
    io_tasks: JoinSet<()>,
}

impl InfluxSink {
    pub fn new(cfg: InfluxConfig, measurements: &[String]) -> Result<Self> {
        if measurements.is_empty() {
            bail!("influx sink requires at least one configured measurement");
        }

        let client = Client::builder()
            .timeout(WRITE_TIMEOUT)
            .build()
            .context("building influx http client")?;

        Ok(Self {
            fields: measurements.to_vec(),
            cfg,
            client,
            queue: Vec::new(),
            last_drain: Instant::now(),
            io_tasks: JoinSet::new(),
        })
    }

    pub fn name(&self) -> &str {
        "influx"
    }

    pub async fn flush(&mut self, timestamp: i64, snapshot: Snapshot) -> Result<()> {
        while self.io_tasks.try_join_next().is_some() {}

        self.queue.push(self.encode_point(timestamp, &snapshot));
        if self.should_drain() {
            self.drain();
        }
        Ok(())
    }

    /// Drains whatever is queued and waits for in-flight writes.
    pub async fn close(&mut self) -> Result<()> {
        self.drain();
        while let Some(res) = self.io_tasks.join_next().await {
            if let Err(e) = res {
                warn!(error = %e, "influx write task join failed");
            }
        }
        Ok(())
    }

    /// One line-protocol point with one field per configured key.
    /// Keys absent from the snapshot (or non-finite) default to 0.
    fn encode_point(&self, timestamp: i64, snapshot: &Snapshot) -> String {
        let mut line = escape_ident(&self.cfg.database);
        line.push(' ');
        for (i, key) in self.fields.iter().enumerate() {
            if i > 0 {
                line.push(',');
            }
            let value = snapshot
                .get(key)
                .copied()
                .filter(|v| v.is_finite())
                .unwrap_or(0.0);
            line.push_str(&escape_ident(key));
            let _ = write!(line, "={value}");
        }
        let _ = write!(line, " {timestamp}");
        line
    }

    fn should_drain(&self) -> bool {
        self.queue.len() >= self.cfg.batch_size
            || self.last_drain.elapsed() >= self.cfg.flush_budget
    }

    fn drain(&mut self) {
        if self.queue.is_empty() {
            return;
        }

        let body = self.queue.join("\n");
        let points = self.queue.len();
        self.queue.clear();
        self.last_drain = Instant::now();

        let url = format!("{}/write", self.cfg.url.trim_end_matches('/'));
        let database = self.cfg.database.clone();
        let client = self.client.clone();

        self.io_tasks.spawn(async move {
            let result = client
                .post(&url)
                .query(&[("db", database.as_str()), ("precision", "s")])
                .body(body)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    debug!(%url, points, "influx batch written");
                }
                Ok(resp) => {
                    warn!(%url, status = %resp.status(), "influx write rejected");
                }
                Err(e) => {
                    warn!(%url, error = %e, "influx write failed");
                }
            }
        });
    }
}

/// Escapes the characters line protocol treats specially in identifiers.
fn escape_ident(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, ',' | ' ' | '=') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
