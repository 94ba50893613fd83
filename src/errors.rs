use std::path::PathBuf;

use thiserror::Error;

/// Chatlog Errors
#[derive(Debug, Error)]
pub enum ChatlogError {
    #[error("No API key set. Export OPENAI_API_KEY or pass --api-key.")]
    MissingApiKey,
    #[error("The completion response contained no message content.")]
    EmptyCompletion,
    #[error("Input closed before an answer was given.")]
    NoInput,
    #[error("Failed to read history directory: {}. Is it a directory?", .dir.display())]
    HistoryDirUnreadable { dir: PathBuf },
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("Malformed completion response: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error(transparent)]
    StdioError(#[from] std::io::Error),
}
