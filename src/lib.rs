//! # chatlog
//! Chat with an LLM from the terminal and keep every conversation in a plain-text log.
//!
//! Each session either starts a new log in the history directory or resumes an existing
//! one, replaying its transcript to the model. Typing `stop` asks the model for a short
//! summary, writes it into the log header and ends the session.
//!
//! ## Usage
//! ```shell
//! $ chatlog          # interactive chat
//! $ chatlog list     # show stored logs and their summaries
//! ```
//!
//! ## Environment Variables:
//! - `OPENAI_API_KEY`: Required for chats. The API key used for completions.
//! - `CHATLOG_HISTORY_DIR`: Optional. Where logs are stored (default: `history`).
//! - `CHATLOG_MODEL`: Optional. The model to use (default: gpt-3.5-turbo, also valid: gpt-4o, gpt-4o-mini, o3-mini)
//! - `CHATLOG_API_BASE`: Optional. An OpenAI compatible host (default: `https://api.openai.com`).
//! - `RUST_LOG`: Optional. Log filter for diagnostics written to stderr (default: `chatlog=warn`).
//!
//! ## Notes:
//! - The log format uses fixed markers (`Summary: `, `User:`, `ChatGPT:`) with no escaping.
//!   Messages containing a marker will be misread when the log is resumed.
//!
pub mod cli;
pub mod config;
pub mod errors;
pub mod history;
pub mod openai;
pub mod session;
