use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Capabilities announced by the endpoint in its `ready` message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadyFeatures {
    #[serde(default)]
    pub available_functions: Vec<String>,
}

/// Message received from the voice endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Ready {
        #[serde(default)]
        features: Option<ReadyFeatures>,
    },
    /// Base64 PCM16LE mono at the playback rate
    Audio { data: String },
    /// Transcript fragment
    Text { data: String },
    /// The user started speaking over the response
    Interrupted {
        #[serde(default)]
        message: Option<String>,
    },
    TurnComplete,
    ToolCall {
        function_name: String,
        #[serde(default)]
        arguments: serde_json::Value,
    },
    ToolResult {
        function_name: String,
        #[serde(default)]
        result: serde_json::Value,
    },
    SearchCode { code: String },
    SearchResult { output: String },
    Error { data: String },
}

impl ControlMessage {
    /// Parse one inbound text frame
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("Failed to parse message")
    }

    /// Wire `type` tag, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::Ready { .. } => "ready",
            ControlMessage::Audio { .. } => "audio",
            ControlMessage::Text { .. } => "text",
            ControlMessage::Interrupted { .. } => "interrupted",
            ControlMessage::TurnComplete => "turn_complete",
            ControlMessage::ToolCall { .. } => "tool_call",
            ControlMessage::ToolResult { .. } => "tool_result",
            ControlMessage::SearchCode { .. } => "search_code",
            ControlMessage::SearchResult { .. } => "search_result",
            ControlMessage::Error { .. } => "error",
        }
    }
}

/// Message sent to the voice endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Base64 PCM16LE mono at the capture rate
    Audio { data: String },
    Text { data: String },
    /// End the session
    Stop,
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize message")
    }
}
