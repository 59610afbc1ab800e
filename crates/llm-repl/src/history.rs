use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history file {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

/// Input-line history. Consecutive duplicates are collapsed and the last
/// `max_entries` lines are written back when the history is dropped.
#[derive(Debug)]
pub struct CommandHistory {
    path: Option<PathBuf>,
    entries: Vec<String>,
    max_entries: usize,
}

impl CommandHistory {
    pub fn load(path: PathBuf, max_entries: usize) -> Self {
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) => text
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(str::to_string)
                .collect(),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "failed to read history file");
                Vec::new()
            }
        };
        Self {
            path: Some(path),
            entries,
            max_entries,
        }
    }

    #[cfg(test)]
    pub fn in_memory(max_entries: usize) -> Self {
        Self {
            path: None,
            entries: Vec::new(),
            max_entries,
        }
    }

    #[cfg(test)]
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn add(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() || self.entries.last().is_some_and(|last| last == line) {
            return;
        }
        self.entries.push(line.to_string());
    }

    pub fn save(&self) -> Result<(), HistoryError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let start = self.entries.len().saturating_sub(self.max_entries);
        let mut text = self.entries[start..].join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| HistoryError::Io {
                path: path.clone(),
                source,
            })?;
        }
        std::fs::write(path, text).map_err(|source| HistoryError::Io {
            path: path.clone(),
            source,
        })
    }
}

impl Drop for CommandHistory {
    fn drop(&mut self) {
        if let Err(error) = self.save() {
            tracing::warn!(%error, "failed to save command history");
        }
    }
}
