//! Utilities for querying the OpenAI API via the chat completions endpoint.
//!
//! For specific details on request/response schemas, see the [OpenAI API chat completions docs](https://platform.openai.com/docs/api-reference/chat/create).

use std::io::{BufRead, BufReader, Write};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cli::Model;
use crate::config::Settings;
use crate::errors::ChatlogError;

const COMPLETIONS_PATH: &str = "/v1/chat/completions";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Role {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "assistant")]
    Assistant,
}

/// A `chat/completions` `messages` item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: &str) -> Self {
        ChatMessage {
            role,
            content: content.to_string(),
        }
    }
}

/// A `chat/completions` request body
#[derive(Serialize)]
pub struct ChatRequest<'a> {
    pub model: String,
    pub messages: &'a [ChatMessage],
    pub stream: bool,
}

/// A `chat/completions` response message
#[derive(Deserialize)]
pub struct ChatResponseMessage {
    pub content: Option<String>,
}

/// A `chat/completions` response choice
#[derive(Deserialize)]
pub struct ChatChoice {
    pub message: ChatResponseMessage,
}

/// A `chat/completions` response
#[derive(Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<ChatChoice>,
}

/// A `chat/completions` streaming response delta
#[derive(Deserialize)]
pub struct ChatDelta {
    pub content: Option<String>,
}

/// A `chat/completions` streaming response choice
#[derive(Deserialize)]
pub struct ChatStreamChoice {
    pub delta: ChatDelta,
}

/// A `chat/completions` streaming response
#[derive(Deserialize)]
pub struct ChatStreamResponse {
    pub choices: Vec<ChatStreamChoice>,
}

/// Blocking client for the chat completions endpoint.
pub struct OpenAiClient {
    client: reqwest::blocking::Client,
    url: String,
    api_key: String,
    model: Model,
}

impl OpenAiClient {
    pub fn new(settings: &Settings) -> Result<Self, ChatlogError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(settings.timeout)
            .build()?;
        Ok(OpenAiClient {
            client,
            url: format!("{}{}", settings.api_base, COMPLETIONS_PATH),
            api_key: settings.api_key.clone(),
            model: settings.model,
        })
    }

    fn send(
        &self,
        messages: &[ChatMessage],
        stream: bool,
    ) -> Result<reqwest::blocking::Response, ChatlogError> {
        debug!(
            model = %self.model,
            messages = messages.len(),
            stream,
            "sending chat completion request"
        );
        let req_body = ChatRequest {
            model: self.model.to_string(),
            messages,
            stream,
        };
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&req_body)
            .send()?
            .error_for_status()?;
        Ok(response)
    }

    /// Send the whole transcript and return the first choice's content.
    pub fn complete(&self, messages: &[ChatMessage]) -> Result<String, ChatlogError> {
        let body = self.send(messages, false)?.text()?;
        let parsed: ChatResponse = serde_json::from_str(&body)?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(ChatlogError::EmptyCompletion)
    }

    /// Like [`OpenAiClient::complete`], but writes the reply to `out` as it streams in.
    pub fn complete_streaming<W: Write>(
        &self,
        messages: &[ChatMessage],
        out: &mut W,
    ) -> Result<String, ChatlogError> {
        let response = self.send(messages, true)?;

        let mut reader = BufReader::new(response);
        let mut line = String::new();
        let mut complete_response = String::new();

        while reader.read_line(&mut line)? != 0 {
            let trimmed = line.trim();
            if let Some(data) = trimmed.strip_prefix("data: ") {
                let data = data.trim();
                if data == "[DONE]" {
                    break;
                }
                let parsed: ChatStreamResponse = serde_json::from_str(data)?;
                if let Some(content) = parsed
                    .choices
                    .first()
                    .and_then(|choice| choice.delta.content.as_deref())
                {
                    out.write_all(content.as_bytes())?;
                    out.flush()?;
                    complete_response.push_str(content);
                }
            }
            line.clear();
        }

        if complete_response.is_empty() {
            return Err(ChatlogError::EmptyCompletion);
        }
        Ok(complete_response)
    }
}
