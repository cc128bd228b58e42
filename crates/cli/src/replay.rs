//! JSON-lines replay input.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

use switchboard_engine::{InboundMessage, OutboundMessage};

/// One replay line. `direction` selects the entry point; outbound is assumed
/// when it is missing.
#[derive(Debug, Deserialize)]
#[serde(tag = "direction", rename_all = "lowercase")]
pub enum ReplayEntry {
    Outbound(OutboundMessage),
    Inbound(InboundMessage),
}

/// Parse one line. Blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str) -> Result<Option<ReplayEntry>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let mut value: serde_json::Value = serde_json::from_str(line).context("invalid JSON")?;
    if let Some(obj) = value.as_object_mut() {
        obj.entry("direction").or_insert_with(|| "outbound".into());
    }
    let entry = serde_json::from_value(value).context("not a message object")?;
    Ok(Some(entry))
}

/// Read every entry from `path`, skipping lines that fail to parse.
pub fn read_entries(path: &Path) -> Result<Vec<ReplayEntry>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut entries = Vec::new();

    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {}", path.display()))?;
        match parse_line(&line) {
            Ok(Some(entry)) => entries.push(entry),
            Ok(None) => {}
            Err(e) => warn!(line = idx + 1, error = %e, "Skipping replay line"),
        }
    }
    Ok(entries)
}
