//! Reading and writing the plain-text chat logs.
//!
//! A log file looks like
//!
//! ```text
//! Summary: <summary>
//!
//! \t*** Starting the chat ***
//!
//! User: <prompt>
//!
//! ChatGPT: <reply>
//!
//! \t** Above chat history stored on 2024-01-01 12:00:00! **
//! ```
//!
//! The summary region is rewritten in place when a session ends, everything else is
//! only ever appended to. Nothing is escaped: a message containing one of the markers
//! will confuse both the summary splice and the transcript parser.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDateTime};
use tracing::debug;

use crate::errors::ChatlogError;
use crate::openai::{ChatMessage, Role};

/// Marks the start of the mutable summary region.
pub const SUMMARY_MARKER: &str = "Summary: ";
/// Marks the end of the summary region and the start of the conversation.
pub const START_MARKER: &str = "\t*** Starting the chat ***";
/// Returned by [`summary_of`] for logs without a summary region.
pub const NO_SUMMARY: &str = "No summary found.";
/// Starts a user message.
pub const USER_PREFIX: &str = "User:";
/// Starts a model reply.
pub const ASSISTANT_PREFIX: &str = "ChatGPT:";
/// Written when a session ends; a resumed log holds one per session.
pub const FOOTER_PREFIX: &str = "\t** Above chat history stored on ";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A chat log found in the history directory.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub name: String,
    pub path: PathBuf,
    pub modified: NaiveDateTime,
    pub summary: String,
}

/// File name for a new chat log started at `now`, e.g. `chat_2024-01-01 12-00-00.txt`.
pub fn history_filename(now: NaiveDateTime) -> String {
    format!("chat_{}.txt", now.format("%Y-%m-%d %H-%M-%S"))
}

/// Get the string contents of a log file, replacing invalid UTF-8.
pub fn read_log<P: AsRef<Path>>(path: P) -> Result<String, ChatlogError> {
    let mut file = File::open(path.as_ref())?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).to_string())
}

/// Extract the summary region from log contents.
pub fn summary_of(text: &str) -> String {
    let Some(idx) = text.find(SUMMARY_MARKER) else {
        return NO_SUMMARY.to_string();
    };
    let rest = &text[idx + SUMMARY_MARKER.len()..];
    let end = rest.find(START_MARKER).unwrap_or(rest.len());
    rest[..end].trim().to_string()
}

/// Read the summary of the log file at `path`.
pub fn read_summary<P: AsRef<Path>>(path: P) -> Result<String, ChatlogError> {
    Ok(summary_of(&read_log(path)?))
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Byte-level splice of the summary region, leaving everything outside it untouched.
fn splice_summary_bytes(bytes: &[u8], new_summary: &str) -> Option<Vec<u8>> {
    let idx = find_bytes(bytes, SUMMARY_MARKER.as_bytes())?;
    let end = idx + find_bytes(&bytes[idx..], START_MARKER.as_bytes())?;
    let mut spliced = Vec::with_capacity(bytes.len() + new_summary.len());
    spliced.extend_from_slice(&bytes[..idx]);
    spliced.extend_from_slice(format!("{}{}\n\n", SUMMARY_MARKER, new_summary).as_bytes());
    spliced.extend_from_slice(&bytes[end..]);
    Some(spliced)
}

/// Replace the summary region of `text` with `new_summary`.
///
/// Returns `None` if either marker is missing, in which case nothing should be written.
pub fn splice_summary(text: &str, new_summary: &str) -> Option<String> {
    let spliced = splice_summary_bytes(text.as_bytes(), new_summary)?;
    String::from_utf8(spliced).ok()
}

/// Rewrite the summary region of the log at `path` in place.
///
/// Works on raw bytes so logs holding invalid UTF-8 keep them outside the summary region.
/// Returns whether the summary was replaced. The file is untouched otherwise.
pub fn replace_summary<P: AsRef<Path>>(path: P, new_summary: &str) -> Result<bool, ChatlogError> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    match splice_summary_bytes(&bytes, new_summary) {
        Some(updated) => {
            fs::write(path, updated)?;
            debug!(path = %path.display(), "summary replaced");
            Ok(true)
        }
        None => Ok(false),
    }
}

fn append<P: AsRef<Path>>(path: P, text: &str) -> Result<(), ChatlogError> {
    let mut log = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path.as_ref())?;
    log.write_all(text.as_bytes())?;
    log.flush()?;
    Ok(())
}

/// Start a new log with an empty summary region.
pub fn create_log<P: AsRef<Path>>(path: P) -> Result<(), ChatlogError> {
    debug!(path = %path.as_ref().display(), "creating chat log");
    append(path, &format!("{}\n{}\n\n", SUMMARY_MARKER, START_MARKER))
}

/// Append one prompt and its reply.
pub fn append_exchange<P: AsRef<Path>>(
    path: P,
    prompt: &str,
    reply: &str,
) -> Result<(), ChatlogError> {
    append(
        path,
        &format!(
            "{} {}\n\n{} {}\n\n",
            USER_PREFIX, prompt, ASSISTANT_PREFIX, reply
        ),
    )
}

/// Append the end-of-session footer stamped with `now`.
pub fn append_footer<P: AsRef<Path>>(path: P, now: NaiveDateTime) -> Result<(), ChatlogError> {
    append(
        path,
        &format!("{}{}! **\n\n", FOOTER_PREFIX, now.format(TIMESTAMP_FORMAT)),
    )
}

/// Rebuild the transcript stored in log contents.
///
/// Lines following a `User:` or `ChatGPT:` line belong to that message until the next
/// message, marker or footer, so multi-line replies survive a reload.
pub fn parse_transcript(text: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    let mut current: Option<ChatMessage> = None;

    let mut finish = |current: &mut Option<ChatMessage>| {
        if let Some(mut msg) = current.take() {
            msg.content = msg.content.trim().to_string();
            messages.push(msg);
        }
    };

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix(USER_PREFIX) {
            finish(&mut current);
            current = Some(ChatMessage::new(Role::User, rest));
        } else if let Some(rest) = line.strip_prefix(ASSISTANT_PREFIX) {
            finish(&mut current);
            current = Some(ChatMessage::new(Role::Assistant, rest));
        } else if line.starts_with(START_MARKER) || line.starts_with(FOOTER_PREFIX) {
            finish(&mut current);
        } else if let Some(msg) = current.as_mut() {
            msg.content.push('\n');
            msg.content.push_str(line);
        }
    }
    finish(&mut current);
    messages
}

/// Load the transcript stored in the log file at `path`.
pub fn load_transcript<P: AsRef<Path>>(path: P) -> Result<Vec<ChatMessage>, ChatlogError> {
    Ok(parse_transcript(&read_log(path)?))
}

/// List the `.txt` logs in `dir`, sorted by file name.
pub fn list_history<P: AsRef<Path>>(dir: P) -> Result<Vec<HistoryEntry>, ChatlogError> {
    let dir = dir.as_ref();
    let entries = fs::read_dir(dir).map_err(|_| ChatlogError::HistoryDirUnreadable {
        dir: dir.to_path_buf(),
    })?;

    let mut history = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let is_log = path.extension().is_some_and(|ext| ext == "txt");
        if !is_log || !path.is_file() {
            continue;
        }
        let modified: DateTime<Local> = entry.metadata()?.modified()?.into();
        history.push(HistoryEntry {
            name: entry.file_name().to_string_lossy().to_string(),
            summary: read_summary(&path)?,
            modified: modified.naive_local(),
            path,
        });
    }
    history.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(history)
}
