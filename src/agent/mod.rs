use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregator::Aggregator;
use crate::config::Config;
use crate::sink;

/// Agent wires the update listener, the flush scheduler, and the
/// aggregator together and drives them from a single task.
pub struct Agent {
    cfg: Config,
    cancel: CancellationToken,
    run_task: Option<tokio::task::JoinHandle<()>>,
}

impl Agent {
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            cancel: CancellationToken::new(),
            run_task: None,
        }
    }

    /// Builds the sinks, binds the update listener, and starts the run
    /// loop. Sink construction failures are fatal here, before any
    /// flush happens.
    pub async fn start(&mut self) -> Result<()> {
        let sinks = sink::build_sinks(&self.cfg)?;
        let names: Vec<&str> = sinks.iter().map(sink::Sink::name).collect();
        info!(
            sinks = ?names,
            interval = ?self.cfg.flush_interval,
            "starting telemetry fan-out",
        );

        let socket = UdpSocket::bind(&self.cfg.listen.addr)
            .await
            .with_context(|| format!("binding update listener on {}", self.cfg.listen.addr))?;
        info!(addr = %self.cfg.listen.addr, "update listener bound");

        let aggregator = Aggregator::new(sinks);
        let cancel = self.cancel.clone();
        let interval = self.cfg.flush_interval;

        self.run_task = Some(tokio::spawn(run_loop(
            aggregator, socket, interval, cancel,
        )));

        Ok(())
    }

    /// Signals the run loop to stop and waits for the sinks to close.
    pub async fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();
        if let Some(task) = self.run_task.take() {
            task.await.context("joining agent run task")?;
        }
        Ok(())
    }
}

/// Single-owner event loop. Both the update path and the flush path run
/// here, so a flush always sees a consistent store without any locking.
async fn run_loop(
    mut aggregator: Aggregator,
    socket: UdpSocket,
    flush_interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick completes immediately; consume it so the initial
    // flush happens one full interval after startup.
    ticker.tick().await;

    let mut buf = [0u8; 2048];

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("agent run loop stopping");
                aggregator.close().await;
                return;
            }

            _ = ticker.tick() => {
                let ts = chrono::Utc::now().timestamp();
                aggregator.flush(ts).await;
            }

            recv = socket.recv_from(&mut buf) => {
                match recv {
                    Ok((n, _)) => handle_datagram(&mut aggregator, &buf[..n]),
                    Err(e) => warn!(error = %e, "update listener receive failed"),
                }
            }
        }
    }
}

/// Parses `<key> <value>` lines out of one datagram and applies them.
/// A malformed line is logged and skipped, leaving the store unchanged
/// for that key.
fn handle_datagram(aggregator: &mut Aggregator, data: &[u8]) {
    let text = match std::str::from_utf8(data) {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "discarding non-utf8 update datagram");
            return;
        }
    };

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_update(line) {
            Some((key, value)) => {
                debug!(key, value, "measurement updated");
                aggregator.update(key, value);
            }
            None => warn!(line, "discarding malformed update line"),
        }
    }
}

fn parse_update(line: &str) -> Option<(&str, f64)> {
    let (key, value) = line.split_once(char::is_whitespace)?;
    if key.is_empty() {
        return None;
    }
    let value: f64 = value.trim().parse().ok()?;
    Some((key, value))
}
