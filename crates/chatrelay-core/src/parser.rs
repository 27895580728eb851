//! Stream-JSON line parser.
//!
//! The generator writes one JSON event per line. Only a handful of event
//! kinds matter to viewers; everything else (system, status, rate-limit
//! notices, malformed output) is dropped here.

use chatrelay_common::ServerMessage;
use serde_json::Value;

/// Parse one complete stdout line into a viewer-facing message.
///
/// Pure and total: never panics, returns `None` for anything it does not
/// recognize. Buffering of partial lines is the caller's job.
pub fn parse_line(line: &str) -> Option<ServerMessage> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let parsed: Value = serde_json::from_str(trimmed).ok()?;
    parse_event(&parsed)
}

fn parse_event(event: &Value) -> Option<ServerMessage> {
    match event["type"].as_str()? {
        "content_block_delta" => parse_text_delta(event),
        // Partial-message mode wraps raw API events in an envelope.
        "stream_event" => match event["event"]["type"].as_str() {
            Some("content_block_delta") => parse_text_delta(&event["event"]),
            _ => None,
        },
        "assistant" => first_block(event, "tool_use").map(|block| ServerMessage::ToolUse {
            tool: block["name"].as_str().unwrap_or("unknown").to_string(),
            input: text_or_json(&block["input"]),
        }),
        "user" => first_block(event, "tool_result").map(|block| ServerMessage::ToolResult {
            tool: block["tool_use_id"].as_str().unwrap_or("unknown").to_string(),
            output: text_or_json(&block["content"]),
        }),
        "result" => Some(parse_result(event)),
        _ => None,
    }
}

fn parse_text_delta(event: &Value) -> Option<ServerMessage> {
    let delta = &event["delta"];
    if delta["type"] != "text_delta" {
        return None;
    }
    delta["text"].as_str().map(|text| ServerMessage::TextDelta {
        text: text.to_string(),
    })
}

/// First content block of `kind`, looking in `message.content` then `content`.
fn first_block<'a>(event: &'a Value, kind: &str) -> Option<&'a Value> {
    let content = match &event["message"]["content"] {
        Value::Null => &event["content"],
        content => content,
    };
    content
        .as_array()?
        .iter()
        .find(|block| block["type"] == kind)
}

fn parse_result(event: &Value) -> ServerMessage {
    if event["subtype"] == "success" {
        let result = match &event["result"] {
            Value::Null => String::new(),
            other => text_or_json(other),
        };
        return ServerMessage::Done { result };
    }

    let message = match &event["error"]["message"] {
        Value::Null => match event["errors"].as_array() {
            Some(errors) => errors
                .iter()
                .map(|e| match &e["message"] {
                    Value::Null => text_or_json(e),
                    message => text_or_json(message),
                })
                .collect::<Vec<_>>()
                .join("; "),
            None => "Unknown error".to_string(),
        },
        message => text_or_json(message),
    };
    ServerMessage::Error { message }
}

/// Strings pass through; any other JSON value is re-serialized.
fn text_or_json(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
