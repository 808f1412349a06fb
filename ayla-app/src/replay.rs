//! Recorded dialogue sessions: one JSON object per line,
//! `{ "atMs": 120, "event": { "type": "audioChunk", ... } }`.
//!
//! Blank lines and lines starting with `#` are skipped.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use ayla_core::SessionEvent;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayEntry {
    /// Offset from session start.
    pub at_ms: u64,
    pub event: SessionEvent,
}

impl ReplayEntry {
    pub fn at(&self) -> Duration {
        Duration::from_millis(self.at_ms)
    }
}

/// Parse a session log. Entries come back in time order; entries sharing a
/// timestamp keep their file order.
pub fn parse_session(reader: impl BufRead) -> Result<Vec<ReplayEntry>> {
    let mut entries = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading line {}", index + 1))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let entry: ReplayEntry = serde_json::from_str(trimmed)
            .with_context(|| format!("malformed session entry on line {}", index + 1))?;
        entries.push(entry);
    }
    entries.sort_by_key(|e| e.at_ms);
    Ok(entries)
}

pub fn read_session(path: &Path) -> Result<Vec<ReplayEntry>> {
    let file = File::open(path)
        .with_context(|| format!("opening session log {}", path.display()))?;
    parse_session(BufReader::new(file))
}

/// Hands out entries as the session clock passes them.
#[derive(Debug)]
pub struct ReplayCursor {
    entries: Vec<ReplayEntry>,
    next: usize,
}

impl ReplayCursor {
    pub fn new(entries: Vec<ReplayEntry>) -> Self {
        Self { entries, next: 0 }
    }

    /// Every not yet returned entry due at or before `elapsed`.
    pub fn due(&mut self, elapsed: Duration) -> &[ReplayEntry] {
        let start = self.next;
        while self
            .entries
            .get(self.next)
            .is_some_and(|e| e.at() <= elapsed)
        {
            self.next += 1;
        }
        &self.entries[start..self.next]
    }

    pub fn is_exhausted(&self) -> bool {
        self.next >= self.entries.len()
    }

    /// Timestamp of the last entry, zero for an empty log.
    pub fn last_at(&self) -> Duration {
        self.entries.last().map(ReplayEntry::at).unwrap_or_default()
    }
}
