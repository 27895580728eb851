//! Wire protocol between the coordinator and conversation viewers.
//!
//! One JSON object per WebSocket text frame, discriminated by `type`.

use serde::{Deserialize, Serialize};

use crate::types::Role;

/// Frames a viewer sends on a conversation socket.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "prompt")]
    Prompt { text: String },

    #[serde(rename = "cancel")]
    Cancel,
}

/// A persisted turn as sent in the `history` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
}

/// Frames the coordinator sends to viewers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },

    #[serde(rename = "tool_use")]
    ToolUse { tool: String, input: String },

    #[serde(rename = "tool_result")]
    ToolResult { tool: String, output: String },

    #[serde(rename = "done")]
    Done { result: String },

    #[serde(rename = "error")]
    Error { message: String },

    #[serde(rename = "cancelled")]
    Cancelled,

    #[serde(rename = "history")]
    History { messages: Vec<HistoryMessage> },

    #[serde(rename = "stream_active")]
    StreamActive,

    #[serde(rename = "stream_resume")]
    StreamResume {
        #[serde(rename = "accumulatedText")]
        accumulated_text: String,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// `done`, `error` and `cancelled` end a generation.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Done { .. } | Self::Error { .. } | Self::Cancelled
        )
    }

    /// Serialize to a single JSON text frame.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!("{{\"type\":\"error\",\"message\":\"failed to encode frame: {e}\"}}")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_prompt_deserializes() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"prompt","text":"hi"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Prompt { text: "hi".into() });
    }

    #[test]
    fn client_cancel_deserializes() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"cancel"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Cancel);
    }

    #[test]
    fn unknown_client_type_is_rejected() {
        let result = serde_json::from_str::<ClientMessage>(r#"{"type":"delete"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn text_delta_wire_shape() {
        let json = ServerMessage::TextDelta { text: "hel".into() }.to_json();
        assert_eq!(json, r#"{"type":"text_delta","text":"hel"}"#);
    }

    #[test]
    fn unit_variants_carry_only_type() {
        assert_eq!(ServerMessage::Cancelled.to_json(), r#"{"type":"cancelled"}"#);
        assert_eq!(
            ServerMessage::StreamActive.to_json(),
            r#"{"type":"stream_active"}"#
        );
    }

    #[test]
    fn stream_resume_uses_camel_case_field() {
        let json = ServerMessage::StreamResume {
            accumulated_text: "so far".into(),
        }
        .to_json();
        assert_eq!(json, r#"{"type":"stream_resume","accumulatedText":"so far"}"#);
    }

    #[test]
    fn history_wire_shape() {
        let msg = ServerMessage::History {
            messages: vec![HistoryMessage {
                id: "m1".into(),
                role: Role::User,
                content: "hello".into(),
                created_at: 1_700_000_000_000,
            }],
        };
        let value: serde_json::Value = serde_json::from_str(&msg.to_json()).unwrap();
        assert_eq!(value["type"], "history");
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["messages"][0]["createdAt"], 1_700_000_000_000_i64);
    }

    #[test]
    fn terminal_classification() {
        assert!(ServerMessage::Done { result: String::new() }.is_terminal());
        assert!(ServerMessage::error("boom").is_terminal());
        assert!(ServerMessage::Cancelled.is_terminal());
        assert!(!ServerMessage::TextDelta { text: "x".into() }.is_terminal());
        assert!(!ServerMessage::StreamActive.is_terminal());
        assert!(!ServerMessage::ToolUse {
            tool: "Read".into(),
            input: "{}".into()
        }
        .is_terminal());
    }
}
