//! Runtime settings resolved from the command line and environment.

use std::{path::PathBuf, time::Duration};

use crate::cli::{Args, Model};
use crate::errors::ChatlogError;

/// Validated settings for a chat or listing run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub history_dir: PathBuf,
    pub model: Model,
    pub api_base: String,
    pub api_key: String,
    pub stream: bool,
    pub timeout: Duration,
}

impl Settings {
    pub fn from_args(args: &Args) -> Result<Self, ChatlogError> {
        let api_key = args
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(ChatlogError::MissingApiKey)?;
        Ok(Settings {
            history_dir: args.history_dir.clone(),
            model: args.model,
            api_base: args.api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            stream: args.stream,
            timeout: Duration::from_secs(args.timeout_secs),
        })
    }
}
