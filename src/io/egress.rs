//! Transit egress - writes count, transit and summary records to file
//!
//! Records are written in JSONL format (one JSON object per line)
//! to the file specified in config. Each line carries the run id, the
//! site id and the wall-clock write time.

use crate::io::egress_channel::EgressRecord;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable) run id
pub fn new_run_id() -> String {
    Uuid::now_v7().to_string()
}

#[derive(Serialize)]
struct EgressLine<'a> {
    run: &'a str,
    site: &'a str,
    ts: String,
    #[serde(flatten)]
    record: &'a EgressRecord,
}

/// Egress writer for transit records
pub struct Egress {
    file_path: String,
    run_id: String,
    site_id: String,
}

impl Egress {
    pub fn new(file_path: &str, run_id: &str, site_id: &str) -> Self {
        info!(file_path = %file_path, run = %run_id, "egress_initialized");
        Self { file_path: file_path.to_string(), run_id: run_id.to_string(), site_id: site_id.to_string() }
    }

    fn to_json(&self, record: &EgressRecord) -> serde_json::Result<String> {
        serde_json::to_string(&EgressLine {
            run: &self.run_id,
            site: &self.site_id,
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            record,
        })
    }

    /// Write a record to the egress file
    /// Returns true if successful, false otherwise
    pub fn write_record(&self, record: &EgressRecord) -> bool {
        let result = self
            .to_json(record)
            .map_err(std::io::Error::from)
            .and_then(|json| self.append_line(&json));

        match result {
            Ok(()) => {
                debug!(kind = %record.kind(), "record_egressed");
                true
            }
            Err(e) => {
                error!(kind = %record.kind(), error = %e, "record_egress_failed");
                false
            }
        }
    }

    /// Append a line to the egress file
    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    /// Drain the channel until every sender is dropped
    pub async fn run(self, mut rx: mpsc::Receiver<EgressRecord>) -> usize {
        let mut written = 0;
        while let Some(record) = rx.recv().await {
            if self.write_record(&record) {
                written += 1;
            }
        }
        info!(file_path = %self.file_path, written = %written, "egress_closed");
        written
    }
}
