use std::io;
use std::path::{Path, PathBuf};

use llm_repl_ai::{Conversation, LlmError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TranscriptError {
    #[error("I/O error on {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("invalid JSON in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid conversation in {}: {source}", path.display())]
    Format { path: PathBuf, source: LlmError },
}

/// Writes the conversation as a pretty-printed `[{role, content}]` array.
pub fn save_conversation(path: &Path, conversation: &Conversation) -> Result<(), TranscriptError> {
    let text = serde_json::to_string_pretty(&conversation.to_document()).map_err(|source| {
        TranscriptError::Json {
            path: path.to_path_buf(),
            source,
        }
    })?;
    std::fs::write(path, text).map_err(|source| TranscriptError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn load_conversation(path: &Path) -> Result<Conversation, TranscriptError> {
    let text = std::fs::read_to_string(path).map_err(|source| TranscriptError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let document: serde_json::Value =
        serde_json::from_str(&text).map_err(|source| TranscriptError::Json {
            path: path.to_path_buf(),
            source,
        })?;
    Conversation::from_document(&document).map_err(|source| TranscriptError::Format {
        path: path.to_path_buf(),
        source,
    })
}
