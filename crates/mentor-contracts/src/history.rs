use std::path::Path;

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::json;

use crate::pages::Mode;

/// One completed interaction. For image mode `output` is the download
/// filename, never the image bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    mode: Mode,
    prompt: String,
    output: String,
}

impl HistoryEntry {
    pub fn new(mode: Mode, prompt: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            mode,
            prompt: prompt.into(),
            output: output.into(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn output(&self) -> &str {
        &self.output
    }
}

/// Append-only, insertion-ordered interaction log scoped to one session.
#[derive(Debug, Clone, Default)]
pub struct HistoryStore {
    entries: Vec<HistoryEntry>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(
        &mut self,
        mode: Mode,
        prompt: impl Into<String>,
        output: impl Into<String>,
    ) -> &HistoryEntry {
        self.push(HistoryEntry::new(mode, prompt, output))
    }

    pub fn push(&mut self, entry: HistoryEntry) -> &HistoryEntry {
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    /// Newest first.
    pub fn list_reversed(&self) -> impl DoubleEndedIterator<Item = &HistoryEntry> + '_ {
        self.entries.iter().rev()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count_by_mode(&self, mode: Mode) -> usize {
        self.entries.iter().filter(|entry| entry.mode == mode).count()
    }

    /// Writes a snapshot of the log in insertion order. The file is never
    /// read back.
    pub fn export(&self, path: &Path, session_id: &str) -> anyhow::Result<()> {
        let payload = json!({
            "session_id": session_id,
            "exported_at": Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
            "entries": self.entries,
        });
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&payload)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}

/// Title shown above an entry in the history page, `idx` counting from 1
/// over the newest-first listing.
pub fn entry_title(entry: &HistoryEntry, idx: usize) -> String {
    format!("{} #{idx}", entry.mode)
}
