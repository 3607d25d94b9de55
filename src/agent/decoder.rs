//! Protocol decoder: one stdout line in, one [`Event`] out.
//!
//! # Wire format
//!
//! Each line is a JSON object carrying a `type` discriminator:
//!
//! | `type`     | Required fields              | Maps to                  |
//! |------------|------------------------------|--------------------------|
//! | `text`     | `content`                    | [`Event::TextChunk`]     |
//! | `tool_use` | `tool`, `input`              | [`Event::ToolUse`]       |
//! | `result`   | `is_error`                   | [`Event::Result`]        |
//! | *(other)*  | *(none)*                     | [`Event::SystemNotice`]  |
//!
//! Invalid JSON, a non-object line, a missing `type`, or a missing required
//! field yields [`Event::DecodeError`]. Decoding never fails past this
//! boundary; empty lines produce no event.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

/// One decoded unit of the agent's output stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Incremental assistant text.
    TextChunk {
        /// Text to append to the reply.
        content: String,
    },
    /// The agent invoked a tool; surfaced for audit only.
    ToolUse {
        /// Tool name.
        tool: String,
        /// Tool input arguments.
        input: Map<String, Value>,
    },
    /// The agent finished the turn.
    Result {
        /// Whether the turn failed.
        is_error: bool,
        /// Agent-side conversation identifier, when reported.
        session_id: Option<String>,
        /// Number of agent turns consumed (0 when not reported).
        turn_count: u32,
    },
    /// Any other well-formed message (init banners, status, …).
    SystemNotice {
        /// Notice subtype: the message's `subtype` field, else `"unknown"`.
        subtype: String,
        /// The full decoded message.
        raw: Value,
    },
    /// A line that could not be decoded.
    DecodeError {
        /// The offending line, verbatim.
        raw_line: String,
    },
}

impl Event {
    /// Whether this event ends the current turn.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Result { .. })
    }
}

#[derive(Debug, Deserialize)]
struct TextFields {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ToolUseFields {
    tool: String,
    input: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ResultFields {
    is_error: bool,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    num_turns: Option<u32>,
}

/// Decode a single line of agent stdout.
///
/// Returns `None` for empty or whitespace-only lines.
#[must_use]
pub fn decode(line: &str) -> Option<Event> {
    if line.trim().is_empty() {
        return None;
    }

    let decode_error = || Event::DecodeError {
        raw_line: line.to_owned(),
    };

    let value = match serde_json::from_str::<Value>(line) {
        Ok(value) if value.is_object() => value,
        _ => return Some(decode_error()),
    };

    let Some(kind) = value.get("type").and_then(Value::as_str) else {
        return Some(decode_error());
    };

    let event = match kind {
        "text" => fields::<TextFields>(&value).map(|f| Event::TextChunk { content: f.content }),
        "tool_use" => fields::<ToolUseFields>(&value).map(|f| Event::ToolUse {
            tool: f.tool,
            input: f.input,
        }),
        "result" => fields::<ResultFields>(&value).map(|f| Event::Result {
            is_error: f.is_error,
            session_id: f.session_id,
            turn_count: f.num_turns.unwrap_or(0),
        }),
        _ => {
            let subtype = value
                .get("subtype")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_owned();
            Some(Event::SystemNotice {
                subtype,
                raw: value.clone(),
            })
        }
    };

    Some(event.unwrap_or_else(decode_error))
}

fn fields<T: DeserializeOwned>(value: &Value) -> Option<T> {
    T::deserialize(value).ok()
}
