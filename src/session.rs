//! The interactive chat session: pick or create a log, relay prompts, summarize on exit.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::errors::ChatlogError;
use crate::history::{self, HistoryEntry};
use crate::openai::{ChatMessage, OpenAiClient, Role};

/// Ends the chat loop.
pub const STOP_COMMAND: &str = "stop";
/// Sent as a final user message to obtain the summary stored in the log header.
pub const SUMMARY_PROMPT: &str = "Summarize the chat history so far in 255 characters max";

const LOAD_HISTORY_MSG: &str = "Do you want to load a chat history file? (y/n): ";
const CHOOSE_FILE_MSG: &str = "Please choose a chat history file to load:\n";
const STOP_MSG: &str = "\nChat history stored and script stopped.";

/// Write the numbered listing of chat logs.
pub fn write_listing<W: Write>(out: &mut W, entries: &[HistoryEntry]) -> io::Result<()> {
    for (i, entry) in entries.iter().enumerate() {
        writeln!(
            out,
            "{}.\t{} - Last modified: {}\n{}\n",
            i + 1,
            entry.name,
            entry.modified.format("%Y-%m-%d %H:%M:%S"),
            entry.summary
        )?;
    }
    Ok(())
}

/// A chat session over arbitrary input and output, stdin/stdout in [`run_chat`].
pub struct Session<'a, R: BufRead, W: Write> {
    client: &'a OpenAiClient,
    input: R,
    output: W,
    history_dir: PathBuf,
    stream: bool,
    messages: Vec<ChatMessage>,
}

impl<'a, R: BufRead, W: Write> Session<'a, R, W> {
    pub fn new(
        client: &'a OpenAiClient,
        input: R,
        output: W,
        history_dir: impl Into<PathBuf>,
        stream: bool,
    ) -> Self {
        Session {
            client,
            input,
            output,
            history_dir: history_dir.into(),
            stream,
            messages: Vec::new(),
        }
    }

    /// The transcript sent to the model on the next turn.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Run until the stop command or end of input. Returns the log file written to.
    pub fn run(&mut self) -> Result<PathBuf, ChatlogError> {
        let logfile = self.open_log()?;
        info!(logfile = %logfile.display(), "chat started");
        loop {
            let Some(line) = self.prompt("User: ")? else {
                debug!("input closed, stopping");
                break;
            };
            if line.trim().eq_ignore_ascii_case(STOP_COMMAND) {
                break;
            }
            self.turn(&logfile, &line)?;
        }
        self.finish(&logfile)?;
        Ok(logfile)
    }

    /// Read one line without its line ending. `None` once input is closed.
    fn read_line(&mut self) -> Result<Option<String>, ChatlogError> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let len = line.trim_end_matches(['\n', '\r']).len();
        line.truncate(len);
        Ok(Some(line))
    }

    fn prompt(&mut self, text: &str) -> Result<Option<String>, ChatlogError> {
        write!(self.output, "{}", text)?;
        self.output.flush()?;
        self.read_line()
    }

    /// Ask whether to resume a log, and either load one or create a fresh one.
    fn open_log(&mut self) -> Result<PathBuf, ChatlogError> {
        let answer = self
            .prompt(LOAD_HISTORY_MSG)?
            .ok_or(ChatlogError::NoInput)?;
        if answer.trim().eq_ignore_ascii_case("y") {
            let entries = history::list_history(&self.history_dir)?;
            if entries.is_empty() {
                writeln!(self.output, "No chat history files found, starting a new chat.")?;
            } else {
                let path = self.choose_log(&entries)?;
                self.load_log(&path)?;
                return Ok(path);
            }
        }
        self.new_log()
    }

    fn choose_log(&mut self, entries: &[HistoryEntry]) -> Result<PathBuf, ChatlogError> {
        writeln!(self.output, "\n")?;
        writeln!(self.output, "{}", CHOOSE_FILE_MSG)?;
        write_listing(&mut self.output, entries)?;
        self.output.flush()?;

        loop {
            let selection = self.read_line()?.ok_or(ChatlogError::NoInput)?;
            match selection.trim().parse::<usize>() {
                Ok(n) if (1..=entries.len()).contains(&n) => {
                    return Ok(entries[n - 1].path.clone());
                }
                _ => {
                    write!(
                        self.output,
                        "Invalid selection, enter a number between 1 and {}: ",
                        entries.len()
                    )?;
                    self.output.flush()?;
                }
            }
        }
    }

    fn load_log(&mut self, path: &Path) -> Result<(), ChatlogError> {
        let content = history::read_log(path)?;
        self.messages = history::parse_transcript(&content);
        debug!(messages = self.messages.len(), "transcript restored");
        writeln!(self.output, "Loaded chat history from file: {}\n", path.display())?;
        writeln!(self.output, "Chat history content:\n")?;
        writeln!(self.output, "{}", content)?;
        Ok(())
    }

    fn new_log(&mut self) -> Result<PathBuf, ChatlogError> {
        let path = self
            .history_dir
            .join(history::history_filename(Local::now().naive_local()));
        history::create_log(&path)?;
        Ok(path)
    }

    /// Relay one prompt. A failed completion is reported and leaves log and transcript as they were.
    fn turn(&mut self, logfile: &Path, prompt: &str) -> Result<(), ChatlogError> {
        self.messages.push(ChatMessage::new(Role::User, prompt));

        let reply = if self.stream {
            write!(self.output, "\nChatGPT: ")?;
            self.output.flush()?;
            let reply = self.client.complete_streaming(&self.messages, &mut self.output);
            writeln!(self.output, "\n")?;
            reply
        } else {
            let reply = self.client.complete(&self.messages);
            if let Ok(reply) = &reply {
                writeln!(self.output, "\nChatGPT: {}\n", reply)?;
            }
            reply
        };

        match reply {
            Ok(reply) => {
                history::append_exchange(logfile, prompt, &reply)?;
                self.messages.push(ChatMessage::new(Role::Assistant, &reply));
            }
            Err(e) => {
                warn!(error = %e, "completion failed");
                writeln!(self.output, "Error querying ChatGPT: {}", e)?;
                self.messages.pop();
            }
        }
        Ok(())
    }

    /// Store a model-written summary in the log header and stamp the footer.
    fn finish(&mut self, logfile: &Path) -> Result<(), ChatlogError> {
        self.messages.push(ChatMessage::new(Role::User, SUMMARY_PROMPT));
        match self.client.complete(&self.messages) {
            Ok(summary) => match history::replace_summary(logfile, &summary) {
                Ok(true) => writeln!(self.output, "\nSummary updated successfully!")?,
                Ok(false) => writeln!(self.output, "\nKeyword not found in file.")?,
                Err(e) => {
                    warn!(error = %e, "failed to store summary, keeping previous summary");
                    writeln!(self.output, "\nFailed to store summary: {}", e)?;
                }
            },
            Err(e) => {
                warn!(error = %e, "summary request failed, keeping previous summary");
                writeln!(self.output, "Error querying ChatGPT: {}", e)?;
            }
        }
        history::append_footer(logfile, Local::now().naive_local())?;
        writeln!(self.output, "{}", STOP_MSG)?;
        self.output.flush()?;
        Ok(())
    }
}

/// Start an interactive chat on stdin/stdout
pub fn run_chat(settings: &Settings) -> Result<(), ChatlogError> {
    fs::create_dir_all(&settings.history_dir)?;
    let client = OpenAiClient::new(settings)?;
    let stdin = io::stdin();
    let stdout = io::stdout();
    Session::new(
        &client,
        stdin.lock(),
        stdout.lock(),
        &settings.history_dir,
        settings.stream,
    )
    .run()?;
    Ok(())
}

/// Print the stored chat logs and their summaries
pub fn run_list(history_dir: &Path) -> Result<(), ChatlogError> {
    let stdout = io::stdout();
    write_history(&mut stdout.lock(), history_dir)
}

/// Write the listing of `history_dir`, or a note when it holds no logs.
pub fn write_history<W: Write>(out: &mut W, history_dir: &Path) -> Result<(), ChatlogError> {
    let entries = history::list_history(history_dir)?;
    if entries.is_empty() {
        writeln!(out, "No chat history files in {}.", history_dir.display())?;
    } else {
        write_listing(out, &entries)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mockito::Matcher;
    use tempfile::TempDir;

    use super::*;
    use crate::cli::Model;
    use crate::history::{FOOTER_PREFIX, START_MARKER};

    fn completion_body(content: &str) -> String {
        serde_json::json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
        })
        .to_string()
    }

    fn client_for(server: &mockito::Server) -> OpenAiClient {
        let settings = Settings {
            history_dir: "history".into(),
            model: Model::Gpt35Turbo,
            api_base: server.url(),
            api_key: "test-key".to_string(),
            stream: false,
            timeout: Duration::from_secs(5),
        };
        OpenAiClient::new(&settings).unwrap()
    }

    fn mock_summary(server: &mut mockito::Server, summary: &str) -> mockito::Mock {
        server
            .mock("POST", "/v1/chat/completions")
            .match_body(Matcher::Regex(SUMMARY_PROMPT.to_string()))
            .with_status(200)
            .with_body(completion_body(summary))
            .expect(1)
            .create()
    }

    fn only_log(dir: &Path) -> PathBuf {
        let mut logs: Vec<PathBuf> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(logs.len(), 1);
        logs.remove(0)
    }

    #[test]
    fn test_new_chat_is_logged_and_summarized() {
        let dir = TempDir::new().unwrap();
        let mut server = mockito::Server::new();
        let summary = mock_summary(&mut server, "Greetings were exchanged.");
        let chat = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body(completion_body("Hello, human."))
            .expect(2)
            .create();

        let client = client_for(&server);
        let mut output = Vec::new();
        let logfile = Session::new(
            &client,
            "n\nhello\nhow are you\nStop\n".as_bytes(),
            &mut output,
            dir.path(),
            false,
        )
        .run()
        .unwrap();

        summary.assert();
        chat.assert();
        assert_eq!(logfile, only_log(dir.path()));

        let text = fs::read_to_string(&logfile).unwrap();
        let expected_head = format!(
            "Summary: Greetings were exchanged.\n\n{}\n\n\
             User: hello\n\nChatGPT: Hello, human.\n\n\
             User: how are you\n\nChatGPT: Hello, human.\n\n{}",
            START_MARKER, FOOTER_PREFIX
        );
        assert!(text.starts_with(&expected_head), "unexpected log: {text}");
        assert!(text.ends_with("! **\n\n"));

        let printed = String::from_utf8(output).unwrap();
        assert!(printed.starts_with("Do you want to load a chat history file? (y/n): User: "));
        assert!(printed.contains("\nChatGPT: Hello, human.\n\n"));
        assert!(printed.contains("Summary updated successfully!"));
        assert!(printed.ends_with("Chat history stored and script stopped.\n"));
    }

    #[test]
    fn test_resumed_chat_replays_transcript() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chat_2024-03-09 09-00-00.txt");
        fs::write(
            &path,
            format!(
                "Summary: Talked about cats.\n\n{}\n\n\
                 User: do you like cats\n\nChatGPT: Yes.\n\n\
                 {}2024-03-09 09:05:00! **\n\n",
                START_MARKER, FOOTER_PREFIX
            ),
        )
        .unwrap();

        let mut server = mockito::Server::new();
        let summary = mock_summary(&mut server, "Talked about cats and dogs.");
        let chat = server
            .mock("POST", "/v1/chat/completions")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "messages": [
                    {"role": "user", "content": "do you like cats"},
                    {"role": "assistant", "content": "Yes."},
                    {"role": "user", "content": "and dogs?"}
                ]
            })))
            .with_status(200)
            .with_body(completion_body("Also yes."))
            .expect(1)
            .create();

        let client = client_for(&server);
        let mut output = Vec::new();
        let mut session = Session::new(
            &client,
            "y\n7\nfirst\n1\nand dogs?\nstop\n".as_bytes(),
            &mut output,
            dir.path(),
            false,
        );
        let logfile = session.run().unwrap();
        let transcript_len = session.messages().len();
        drop(session);

        summary.assert();
        chat.assert();
        assert_eq!(logfile, path);
        // restored pair, new pair, summary request
        assert_eq!(transcript_len, 5);

        let printed = String::from_utf8(output).unwrap();
        assert!(printed.contains("Please choose a chat history file to load:"));
        assert!(printed.contains("1.\tchat_2024-03-09 09-00-00.txt - Last modified: "));
        assert!(printed.contains("\nTalked about cats.\n"));
        assert_eq!(
            printed
                .matches("Invalid selection, enter a number between 1 and 1: ")
                .count(),
            2
        );
        assert!(printed.contains("Chat history content:"));

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Summary: Talked about cats and dogs.\n\n"));
        assert!(text.contains("! **\n\nUser: and dogs?\n\nChatGPT: Also yes.\n\n"));
        assert_eq!(text.matches(FOOTER_PREFIX).count(), 2);
    }

    #[test]
    fn test_failed_turn_is_not_logged() {
        let dir = TempDir::new().unwrap();
        let mut server = mockito::Server::new();
        let summary = mock_summary(&mut server, "Nothing much.");
        let failing = server
            .mock("POST", "/v1/chat/completions")
            .with_status(500)
            .expect(1)
            .create();
        let chat = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body(completion_body("Recovered."))
            .expect(1)
            .create();

        let client = client_for(&server);
        let mut output = Vec::new();
        let mut session = Session::new(
            &client,
            "n\nfirst try\nsecond try\n".as_bytes(),
            &mut output,
            dir.path(),
            false,
        );
        let logfile = session.run().unwrap();
        let sent: Vec<String> = session
            .messages()
            .iter()
            .map(|m| m.content.clone())
            .collect();
        drop(session);

        summary.assert();
        failing.assert();
        chat.assert();
        assert_eq!(sent, vec!["second try", "Recovered.", SUMMARY_PROMPT]);

        let text = fs::read_to_string(&logfile).unwrap();
        assert!(!text.contains("first try"));
        assert!(text.contains("User: second try\n\nChatGPT: Recovered.\n\n"));
        assert!(String::from_utf8(output)
            .unwrap()
            .contains("Error querying ChatGPT: "));
    }

    #[test]
    fn test_empty_history_starts_new_chat() {
        let dir = TempDir::new().unwrap();
        let mut server = mockito::Server::new();
        let summary = mock_summary(&mut server, "Empty chat.");

        let client = client_for(&server);
        let mut output = Vec::new();
        let logfile = Session::new(&client, "y\nstop\n".as_bytes(), &mut output, dir.path(), false)
            .run()
            .unwrap();

        summary.assert();
        assert!(String::from_utf8(output)
            .unwrap()
            .contains("No chat history files found, starting a new chat."));
        assert_eq!(history::read_summary(&logfile).unwrap(), "Empty chat.");
    }

    #[test]
    fn test_failed_summary_still_writes_footer() {
        let dir = TempDir::new().unwrap();
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(503)
            .create();

        let client = client_for(&server);
        let mut output = Vec::new();
        let logfile = Session::new(&client, "n\nstop\n".as_bytes(), &mut output, dir.path(), false)
            .run()
            .unwrap();

        let text = fs::read_to_string(&logfile).unwrap();
        assert!(text.starts_with(&format!("Summary: \n{}\n\n{}", START_MARKER, FOOTER_PREFIX)));
    }

    #[test]
    fn test_streaming_turn_prints_reply() {
        let dir = TempDir::new().unwrap();
        let mut server = mockito::Server::new();
        let summary = mock_summary(&mut server, "Streamed.");
        let chat = server
            .mock("POST", "/v1/chat/completions")
            .match_body(Matcher::PartialJson(serde_json::json!({"stream": true})))
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(
                "data: {\"choices\":[{\"delta\":{\"content\":\"Hi \"}}]}\n\n\
                 data: {\"choices\":[{\"delta\":{\"content\":\"there\"}}]}\n\n\
                 data: [DONE]\n\n",
            )
            .expect(1)
            .create();

        let client = client_for(&server);
        let mut output = Vec::new();
        let logfile = Session::new(&client, "n\nhey\nstop\n".as_bytes(), &mut output, dir.path(), true)
            .run()
            .unwrap();

        summary.assert();
        chat.assert();
        assert!(String::from_utf8(output)
            .unwrap()
            .contains("\nChatGPT: Hi there\n\n"));
        assert!(fs::read_to_string(&logfile)
            .unwrap()
            .contains("User: hey\n\nChatGPT: Hi there\n\n"));
    }

    #[test]
    fn test_resume_log_with_invalid_utf8_then_stop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chat_2024-03-09 09-00-00.txt");
        let mut original = format!("Summary: old\n\n{}\n\nUser: caf", START_MARKER).into_bytes();
        original.extend_from_slice(b"\xE9\n\nChatGPT: Coffee.\n\n");
        fs::write(&path, &original).unwrap();

        let mut server = mockito::Server::new();
        let summary = mock_summary(&mut server, "Ordered coffee.");

        let client = client_for(&server);
        let mut output = Vec::new();
        let logfile = Session::new(&client, "y\n1\nstop\n".as_bytes(), &mut output, dir.path(), false)
            .run()
            .unwrap();

        summary.assert();
        assert_eq!(logfile, path);
        let bytes = fs::read(&path).unwrap();
        let mut expected_head = format!("Summary: Ordered coffee.\n\n{}\n\nUser: caf", START_MARKER)
            .into_bytes();
        expected_head.extend_from_slice(b"\xE9\n\nChatGPT: Coffee.\n\n");
        assert!(bytes.starts_with(&expected_head));
        assert!(String::from_utf8_lossy(&bytes).contains(FOOTER_PREFIX));

        let printed = String::from_utf8(output).unwrap();
        assert!(printed.contains("Summary updated successfully!"));
        assert!(printed.ends_with("Chat history stored and script stopped.\n"));
    }

    #[test]
    fn test_resume_log_without_summary_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        let original = "User: hi\n\nChatGPT: hello\n\n";
        fs::write(&path, original).unwrap();

        let mut server = mockito::Server::new();
        let summary = mock_summary(&mut server, "A greeting.");

        let client = client_for(&server);
        let mut output = Vec::new();
        Session::new(&client, "y\n1\nstop\n".as_bytes(), &mut output, dir.path(), false)
            .run()
            .unwrap();

        summary.assert();
        let printed = String::from_utf8(output).unwrap();
        assert!(printed.contains("1.\tnotes.txt - Last modified: "));
        assert!(printed.contains(&format!("\n{}\n", history::NO_SUMMARY)));
        assert!(printed.contains("\nKeyword not found in file.\n"));

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with(&format!("{}{}", original, FOOTER_PREFIX)));
    }

    #[test]
    fn test_write_history_empty_dir() {
        let dir = TempDir::new().unwrap();
        let mut out = Vec::new();
        write_history(&mut out, dir.path()).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            format!("No chat history files in {}.\n", dir.path().display())
        );
    }

    #[test]
    fn test_write_history_numbers_logs() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("chat_2024-03-09 09-00-00.txt"),
            format!("Summary: First chat.\n\n{}\n\n", START_MARKER),
        )
        .unwrap();
        fs::write(
            dir.path().join("chat_2024-03-10 09-00-00.txt"),
            format!("Summary: Second chat.\n\n{}\n\n", START_MARKER),
        )
        .unwrap();

        let mut out = Vec::new();
        write_history(&mut out, dir.path()).unwrap();
        let printed = String::from_utf8(out).unwrap();

        let first = printed
            .find("1.\tchat_2024-03-09 09-00-00.txt - Last modified: ")
            .unwrap();
        let second = printed
            .find("2.\tchat_2024-03-10 09-00-00.txt - Last modified: ")
            .unwrap();
        assert!(first < second);
        assert!(printed.contains("\nFirst chat.\n\n"));
        assert!(printed.contains("\nSecond chat.\n\n"));
    }

    #[test]
    fn test_write_history_missing_dir() {
        let dir = TempDir::new().unwrap();
        let result = write_history(&mut Vec::new(), &dir.path().join("nope"));
        assert!(matches!(result, Err(ChatlogError::HistoryDirUnreadable { .. })));
    }

    #[test]
    fn test_closed_input_at_first_prompt() {
        let dir = TempDir::new().unwrap();
        let server = mockito::Server::new();
        let client = client_for(&server);
        let result = Session::new(&client, "".as_bytes(), Vec::new(), dir.path(), false).run();
        assert!(matches!(result, Err(ChatlogError::NoInput)));
    }
}
