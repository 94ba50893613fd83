use std::{
    fmt::{self, Display},
    path::PathBuf,
    str::FromStr,
};

use clap::{command, Parser, Subcommand};

/// The default model to use for chats.
pub const DEFAULT_LLM: Model = Model::Gpt35Turbo;
/// The default directory chat logs are written to, relative to the working directory.
pub const DEFAULT_HISTORY_DIR: &str = "history";
/// The default API host. `/v1/chat/completions` is appended to it.
pub const DEFAULT_API_BASE: &str = "https://api.openai.com";
/// The default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Various models supported by chatlog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Model {
    Gpt35Turbo,
    Gpt4o,
    Gpt4oMini,
    O3Mini,
}

impl Model {
    pub fn all_models() -> Vec<String> {
        [Model::Gpt35Turbo, Model::Gpt4o, Model::Gpt4oMini, Model::O3Mini]
            .iter()
            .map(|m| m.to_string())
            .collect()
    }
}

impl FromStr for Model {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gpt-3.5-turbo" | "gpt3.5-turbo" => Ok(Model::Gpt35Turbo),
            "gpt-4o" | "gpt4o" => Ok(Model::Gpt4o),
            "gpt-4o-mini" | "gpt4o-mini" => Ok(Model::Gpt4oMini),
            "o3-mini" | "o3mini" => Ok(Model::O3Mini),
            _ => Err(format!(
                "Invalid model: {}. Choose from: {}.",
                s,
                Model::all_models().join(", ")
            )),
        }
    }
}

impl Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Model::Gpt35Turbo => write!(f, "gpt-3.5-turbo"),
            Model::Gpt4o => write!(f, "gpt-4o"),
            Model::Gpt4oMini => write!(f, "gpt-4o-mini"),
            Model::O3Mini => write!(f, "o3-mini"),
        }
    }
}

/// CLI for `chatlog`
///
/// Without a subcommand an interactive chat is started.
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,
    /// Directory holding the chat log files.
    #[arg(long, global = true, env = "CHATLOG_HISTORY_DIR", default_value = DEFAULT_HISTORY_DIR)]
    pub history_dir: PathBuf,
    #[arg(short, long, env = "CHATLOG_MODEL", default_value_t = DEFAULT_LLM)]
    pub model: Model,
    #[arg(long, env = "CHATLOG_API_BASE", default_value = DEFAULT_API_BASE)]
    pub api_base: String,
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
    /// Print replies as they are generated.
    #[arg(short, long)]
    pub stream: bool,
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: u64,
}

/// Chatlog subcommands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Lists the stored chat logs with their summaries.
    #[command(alias = "l")]
    List,
}
