//! Graphite wire-protocol encoders.
//!
//! Two encodings of an ordered metric batch: the newline-delimited text
//! protocol and the length-prefixed binary pickle protocol. Both preserve
//! the order metrics were added in and produce byte-identical output for
//! identical input.

use std::fmt::Write as _;

use tracing::warn;

// Minimally necessary pickle protocol-0 opcodes.
const MARK: u8 = b'(';
const STOP: u8 = b'.';
const LONG: u8 = b'L';
const STRING: u8 = b'S';
const APPEND: u8 = b'a';
const LIST: u8 = b'l';
const TUPLE: u8 = b't';

/// A single measurement bound for the collector.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub key: String,
    pub value: f64,
    pub timestamp: i64,
}

/// An ordered batch of metrics for one flush cycle.
#[derive(Debug, Default)]
pub struct MetricBatch {
    metrics: Vec<Metric>,
}

impl MetricBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a metric, keeping insertion order.
    pub fn add(&mut self, key: impl Into<String>, value: f64, timestamp: i64) {
        self.metrics.push(Metric {
            key: key.into(),
            value,
            timestamp,
        });
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Encodes the batch as `<key> <value> <timestamp>` lines.
    ///
    /// Non-empty output ends with exactly one trailing newline; an empty
    /// batch encodes to the empty string.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for m in &self.metrics {
            if !m.value.is_finite() {
                warn!(key = %m.key, value = m.value, "skipping non-finite metric");
                continue;
            }
            let _ = writeln!(out, "{} {} {}", m.key, m.value, m.timestamp);
        }
        out
    }

    /// Encodes the batch as a pickled list of `(key, (timestamp, value))`
    /// tuples, prefixed with the 4-byte big-endian body length.
    ///
    /// The timestamp is a protocol-0 long-integer field; the value is a
    /// string literal, which the Graphite receiver coerces.
    pub fn to_pickle(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(32 * self.metrics.len() + 3);
        body.push(MARK);
        body.push(LIST);

        for m in &self.metrics {
            if !m.value.is_finite() {
                warn!(key = %m.key, value = m.value, "skipping non-finite metric");
                continue;
            }
            body.push(MARK);
            push_string(&mut body, &m.key);
            body.push(MARK);
            push_long(&mut body, m.timestamp);
            push_string(&mut body, &m.value.to_string());
            body.push(TUPLE);
            body.push(TUPLE);
            body.push(APPEND);
        }

        body.push(STOP);

        let len = u32::try_from(body.len()).unwrap_or(u32::MAX);
        let mut out = Vec::with_capacity(4 + body.len());
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&body);
        out
    }
}

fn push_string(buf: &mut Vec<u8>, s: &str) {
    buf.push(STRING);
    buf.push(b'\'');
    buf.extend_from_slice(s.as_bytes());
    buf.extend_from_slice(b"'\n");
}

fn push_long(buf: &mut Vec<u8>, n: i64) {
    buf.push(LONG);
    buf.extend_from_slice(n.to_string().as_bytes());
    buf.extend_from_slice(b"L\n");
}
