use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::narration::Moment;

/// One decoded event from either collaborator stream, discriminated by the
/// `type` field of the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Moment(Moment),
    /// A chat text delta. Deltas are cumulative, never full replacements.
    Text {
        #[serde(alias = "delta")]
        content: String,
    },
    ToolStart {
        #[serde(alias = "tool", alias = "tool_name")]
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<Value>,
    },
    ToolResult {
        #[serde(alias = "tool", alias = "tool_name")]
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
    },
    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// `message` may be missing or empty; the event still ends the stream.
    Error {
        #[serde(default, alias = "error")]
        message: String,
    },
}

impl StreamEvent {
    /// The wire discriminant, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Moment(_) => "moment",
            StreamEvent::Text { .. } => "text",
            StreamEvent::ToolStart { .. } => "tool_start",
            StreamEvent::ToolResult { .. } => "tool_result",
            StreamEvent::Done { .. } => "done",
            StreamEvent::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Error { .. })
    }
}
