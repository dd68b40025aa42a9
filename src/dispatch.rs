use std::fmt::Write as _;
use std::io::{self, Write};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

const HOSTNAME_ENV: &str = "COLLECTD_HOSTNAME";
const DEFAULT_HOSTNAME: &str = "localhost";

/// One value list handed to a sink.
#[derive(Clone, Debug, PartialEq)]
pub struct Series {
    /// Lower-cased `redis[.instance].section`
    pub plugin: String,
    /// The metric group, e.g. `clients`
    pub kind: String,
    pub values: Vec<f64>,
    pub timestamp: DateTime<Utc>,
}

pub trait Dispatch {
    fn dispatch(&mut self, series: &Series) -> io::Result<()>;

    /// Called once at the end of every cycle.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The configured host name, the one collectd passes to exec plugins or
/// `localhost`.
pub fn hostname(configured: Option<&str>) -> String {
    if let Some(hostname) = configured {
        return hostname.to_string();
    }

    match std::env::var(HOSTNAME_ENV) {
        Ok(hostname) if !hostname.is_empty() => hostname,
        _ => DEFAULT_HOSTNAME.to_string(),
    }
}

/// Writes collectd's plain text protocol, suitable for the `exec` plugin.
///
/// ```text
/// PUTVAL "web-1/redis.clients/clients" interval=10 1718000000:5:0
/// ```
pub struct Putval<W> {
    writer: W,
    host: String,
    interval: Duration,

    buf: String,
}

impl<W: Write> Putval<W> {
    pub fn new(writer: W, host: String, interval: Duration) -> Self {
        Putval {
            writer,
            host,
            interval,
            buf: String::with_capacity(128),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Dispatch for Putval<W> {
    fn dispatch(&mut self, series: &Series) -> io::Result<()> {
        self.buf.clear();

        // writing to a String never fails
        let _ = write!(
            self.buf,
            "PUTVAL \"{}/{}/{}\" interval={} {}",
            self.host,
            series.plugin,
            series.kind,
            self.interval.as_secs_f64(),
            series.timestamp.timestamp()
        );
        for value in &series.values {
            if value.is_finite() {
                let _ = write!(self.buf, ":{value}");
            } else {
                self.buf.push_str(":U");
            }
        }
        self.buf.push('\n');

        self.writer.write_all(self.buf.as_bytes())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

#[derive(Serialize)]
struct Record<'a> {
    host: &'a str,
    plugin: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    time: i64,
    interval: f64,
    values: &'a [f64],
}

/// One JSON object per line.
pub struct JsonLines<W> {
    writer: W,
    host: String,
    interval: Duration,
}

impl<W: Write> JsonLines<W> {
    pub fn new(writer: W, host: String, interval: Duration) -> Self {
        JsonLines {
            writer,
            host,
            interval,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Dispatch for JsonLines<W> {
    fn dispatch(&mut self, series: &Series) -> io::Result<()> {
        let record = Record {
            host: &self.host,
            plugin: &series.plugin,
            kind: &series.kind,
            time: series.timestamp.timestamp(),
            interval: self.interval.as_secs_f64(),
            values: &series.values,
        };

        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer.write_all(b"\n")
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}
