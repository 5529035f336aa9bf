//! Append-only write-ahead log.
//!
//! Textual, line-delimited, whitespace-separated:
//!
//! ```text
//! <timestamp> SET <key> <expires_at> <data…>
//! <timestamp> DELETE <key>
//! ```
//!
//! Timestamps are RFC 3339. The leading timestamp is informational only;
//! replay ignores it. Replay is tolerant: any line that does not parse is
//! skipped, which keeps recovery alive across a crash mid-append.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

use crate::store::Value;

/// Open handle to the log file, positioned at end-of-file for appends.
pub struct Wal {
    writer: BufWriter<tokio::fs::File>,
    path: PathBuf,
}

impl Wal {
    /// Open or create the log at `path`, replay its contents into a fresh
    /// map, and leave the file positioned for appending.
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<(Self, HashMap<String, Value>)> {
        let path = path.as_ref().to_path_buf();

        let mut data = HashMap::new();
        match tokio::fs::read(&path).await {
            Ok(raw) => {
                let text = String::from_utf8_lossy(&raw);
                let mut replayed = 0usize;
                for line in text.lines() {
                    if replay_line(&mut data, line) {
                        replayed += 1;
                    }
                }
                debug!(path = %path.display(), replayed, entries = data.len(), "replayed write-ahead log");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok((
            Self {
                writer: BufWriter::new(file),
                path,
            },
            data,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a SET record. The record is flushed before returning so each
    /// append is durable at line granularity.
    pub async fn append_set(&mut self, key: &str, value: &Value) -> std::io::Result<()> {
        let line = format!(
            "{} SET {} {} {}\n",
            Utc::now().to_rfc3339(),
            key,
            value.expires_at.to_rfc3339(),
            value.data
        );
        self.append(line.as_bytes()).await
    }

    /// Append a DELETE record.
    pub async fn append_delete(&mut self, key: &str) -> std::io::Result<()> {
        let line = format!("{} DELETE {}\n", Utc::now().to_rfc3339(), key);
        self.append(line.as_bytes()).await
    }

    async fn append(&mut self, line: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(line).await?;
        self.writer.flush().await
    }
}

/// Apply a single log line to `data`. Returns whether the line was applied.
///
/// Fields are separated by single ASCII spaces; `data` is the join of every
/// field after the expiry, so values containing spaces survive a round trip.
fn replay_line(data: &mut HashMap<String, Value>, line: &str) -> bool {
    let fields: Vec<&str> = line.split(' ').collect();
    if fields.len() < 3 {
        return false;
    }

    match fields[1] {
        "SET" => {
            if fields.len() < 5 {
                return false;
            }
            let expires_at = match DateTime::parse_from_rfc3339(fields[3]) {
                Ok(ts) => ts.with_timezone(&Utc),
                Err(_) => return false,
            };
            data.insert(
                fields[2].to_string(),
                Value {
                    data: fields[4..].join(" "),
                    expires_at,
                },
            );
            true
        }
        "DELETE" => {
            data.remove(fields[2]);
            true
        }
        _ => false,
    }
}

#[cfg(test)]
pub(crate) fn replay_line_for_tests(data: &mut HashMap<String, Value>, line: &str) -> bool {
    replay_line(data, line)
}
