use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{TimeZone, Utc};
use tracing::{info, warn};

use crate::config::CsvConfig;

use super::Snapshot;

/// Rolling CSV file sink.
///
/// Appends one row per flush to `<base>-YYYYMMDDHH.csv`, rolling to a
/// new file when the flush timestamp crosses a UTC hour boundary. The
/// column layout is fixed at construction from the configured
/// measurement keys.
pub struct CsvSink {
    log_base: String,
    columns: Vec<String>,
    header: String,
    open: Option<OpenFile>,
}

struct OpenFile {
    writer: BufWriter<File>,
    /// Hours since the epoch, derived from the flush timestamp.
    hour: i64,
}

impl CsvSink {
    /// Fails fast when the log directory is missing or read-only, so a
    /// misconfigured sink is caught at startup rather than on the first
    /// flush.
    pub fn new(cfg: CsvConfig, measurements: &[String]) -> Result<Self> {
        if measurements.is_empty() {
            bail!("csv sink requires at least one configured measurement");
        }

        let dir = Path::new(&cfg.log_base)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let meta = std::fs::metadata(dir)
            .with_context(|| format!("csv log directory {} is not accessible", dir.display()))?;
        if !meta.is_dir() {
            bail!("csv log path {} is not a directory", dir.display());
        }
        if meta.permissions().readonly() {
            bail!("csv log directory {} is not writable", dir.display());
        }

        let mut header = String::from("ts");
        for key in measurements {
            header.push(',');
            header.push_str(key);
        }

        Ok(Self {
            log_base: cfg.log_base,
            columns: measurements.to_vec(),
            header,
            open: None,
        })
    }

    pub fn name(&self) -> &str {
        "csv"
    }

    /// Appends one positional row for the snapshot. Keys absent from the
    /// snapshot are written as `0`.
    pub async fn flush(&mut self, timestamp: i64, snapshot: Snapshot) -> Result<()> {
        self.roll_if_needed(timestamp)?;
        let Some(open) = self.open.as_mut() else {
            bail!("csv writer unavailable");
        };

        let mut row = timestamp.to_string();
        for key in &self.columns {
            row.push(',');
            match snapshot.get(key) {
                Some(v) if v.is_finite() => row.push_str(&to_precision4(*v)),
                Some(v) => {
                    warn!(key = %key, value = %v, "writing 0 for non-finite csv value");
                    row.push('0');
                }
                None => row.push('0'),
            }
        }

        writeln!(open.writer, "{row}").context("writing csv row")?;
        open.writer.flush().context("flushing csv row")?;
        Ok(())
    }

    /// Flushes and closes the current handle if one is open; calling
    /// with no open handle is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(mut open) = self.open.take() {
            open.writer.flush().context("flushing csv writer")?;
        }
        Ok(())
    }

    fn file_name(&self, timestamp: i64) -> Result<PathBuf> {
        let dt = Utc
            .timestamp_opt(timestamp, 0)
            .single()
            .context("flush timestamp out of range")?;
        Ok(PathBuf::from(format!(
            "{}-{}.csv",
            self.log_base,
            dt.format("%Y%m%d%H")
        )))
    }

    /// Opens the file for the flush timestamp's UTC hour, closing the
    /// previous handle on an hour change. The header is written only
    /// when the target file is new or empty.
    fn roll_if_needed(&mut self, timestamp: i64) -> Result<()> {
        let hour = timestamp.div_euclid(3600);
        if matches!(&self.open, Some(open) if open.hour == hour) {
            return Ok(());
        }

        if let Some(mut previous) = self.open.take() {
            if let Err(e) = previous.writer.flush() {
                warn!(error = %e, "flushing previous csv file failed");
            }
        }

        let path = self.file_name(timestamp)?;
        let write_header = std::fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening csv file {}", path.display()))?;
        let mut writer = BufWriter::new(file);

        if write_header {
            info!(path = %path.display(), "logging telemetry to new csv file");
            writeln!(writer, "{}", self.header).context("writing csv header")?;
        }

        self.open = Some(OpenFile { writer, hour });
        Ok(())
    }
}

/// Formats a value with 4 significant digits, matching JS
/// `toPrecision(4)`: fixed notation in the normal range, exponential
/// outside it.
fn to_precision4(value: f64) -> String {
    if value == 0.0 {
        return "0.000".to_string();
    }
    let exp = value.abs().log10().floor() as i32;
    if !(-6..4).contains(&exp) {
        format!("{value:.3e}")
    } else {
        let decimals = (3 - exp).max(0) as usize;
        format!("{value:.decimals$}")
    }
}
