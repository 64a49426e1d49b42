//! Raw feed records and their decoded form.
//!
//! The feed delivers untyped `{type, properties}` records. They are decoded
//! once, at the consumer boundary, into [`AgentEvent`]; everything past that
//! point matches on variants instead of poking at JSON.

use serde_json::Value;

/// One record as delivered by the server-sent event feed.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub properties: Value,
}

impl RawEvent {
    pub fn new(event_type: impl Into<String>, properties: Value) -> Self {
        Self {
            event_type: event_type.into(),
            properties,
        }
    }
}

/// Start/end pair reported by the runtime for parts and tool calls.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PartTime {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReasoningPart {
    pub session_id: Option<String>,
    pub text: String,
    pub time: PartTime,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolStatus {
    Pending,
    Running,
    Completed,
    Error,
    Other(String),
}

impl ToolStatus {
    fn parse(value: &str) -> Self {
        match value {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "completed" => Self::Completed,
            "error" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Other(other) => other,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolPart {
    pub session_id: Option<String>,
    pub tool: String,
    pub call_id: Option<String>,
    pub status: ToolStatus,
    pub title: Option<String>,
    pub input: Value,
    pub output: Option<String>,
    pub time: PartTime,
}

impl ToolPart {
    /// Declared title, falling back to the tool identifier.
    pub fn display_name(&self) -> &str {
        self.title
            .as_deref()
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .unwrap_or(&self.tool)
    }
}

/// One file entry of a diff batch.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Deserialize)]
pub struct FileDiff {
    pub file: String,
    #[serde(default)]
    pub before: String,
    #[serde(default)]
    pub after: String,
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
}

/// One checklist item of a todo update.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TodoItem {
    #[serde(default)]
    pub id: Option<String>,
    pub content: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

/// Known feed events plus an explicit fallback.
#[derive(Clone, Debug, PartialEq)]
pub enum AgentEvent {
    Reasoning(ReasoningPart),
    Tool(ToolPart),
    /// Streaming text tokens. Never turned into progress entries.
    Text { session_id: Option<String> },
    SessionDiff {
        session_id: Option<String>,
        files: Vec<FileDiff>,
    },
    SessionError {
        session_id: Option<String>,
        error: Option<Value>,
    },
    TodoUpdated {
        session_id: Option<String>,
        todos: Vec<TodoItem>,
    },
    /// Low-level file notification, superseded by `SessionDiff`.
    FileEdited { file: Option<String> },
    SessionStatusChanged { session_id: Option<String> },
    Unrecognized { event_type: String },
}

impl AgentEvent {
    /// Decodes a raw record. Malformed payloads of a known type decode to
    /// `Unrecognized` so that one bad record never stops the feed.
    pub fn decode(raw: &RawEvent) -> Self {
        let props = &raw.properties;
        let decoded = match raw.event_type.as_str() {
            "message.part.updated" => decode_part(props),
            "session.diff" => decode_diff(props),
            "session.error" => Some(AgentEvent::SessionError {
                session_id: str_field(props, "sessionID"),
                error: props.get("error").filter(|v| !v.is_null()).cloned(),
            }),
            "todo.updated" => decode_todos(props),
            "file.edited" => Some(AgentEvent::FileEdited {
                file: str_field(props, "file"),
            }),
            "session.status" | "session.idle" => Some(AgentEvent::SessionStatusChanged {
                session_id: str_field(props, "sessionID"),
            }),
            _ => None,
        };
        decoded.unwrap_or_else(|| AgentEvent::Unrecognized {
            event_type: raw.event_type.clone(),
        })
    }

    /// Session the event belongs to, when the runtime says so.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::Reasoning(part) => part.session_id.as_deref(),
            Self::Tool(part) => part.session_id.as_deref(),
            Self::Text { session_id }
            | Self::SessionDiff { session_id, .. }
            | Self::SessionError { session_id, .. }
            | Self::TodoUpdated { session_id, .. }
            | Self::SessionStatusChanged { session_id } => session_id.as_deref(),
            Self::FileEdited { .. } | Self::Unrecognized { .. } => None,
        }
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(ToOwned::to_owned)
}

fn part_time(value: Option<&Value>) -> PartTime {
    value
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

fn decode_part(props: &Value) -> Option<AgentEvent> {
    let part = props.get("part")?;
    let session_id = str_field(part, "sessionID");
    match part.get("type").and_then(Value::as_str)? {
        "reasoning" => Some(AgentEvent::Reasoning(ReasoningPart {
            session_id,
            text: str_field(part, "text").unwrap_or_default(),
            time: part_time(part.get("time")),
        })),
        "tool" => {
            let state = part.get("state")?;
            Some(AgentEvent::Tool(ToolPart {
                session_id,
                tool: str_field(part, "tool").unwrap_or_else(|| "tool".to_string()),
                call_id: str_field(part, "callID"),
                status: ToolStatus::parse(state.get("status").and_then(Value::as_str)?),
                title: str_field(state, "title"),
                input: state.get("input").cloned().unwrap_or(Value::Null),
                output: str_field(state, "output"),
                time: part_time(state.get("time")),
            }))
        }
        "text" => Some(AgentEvent::Text { session_id }),
        _ => None,
    }
}

fn decode_diff(props: &Value) -> Option<AgentEvent> {
    let files = serde_json::from_value(props.get("diff")?.clone()).ok()?;
    Some(AgentEvent::SessionDiff {
        session_id: str_field(props, "sessionID"),
        files,
    })
}

fn decode_todos(props: &Value) -> Option<AgentEvent> {
    let todos = serde_json::from_value(props.get("todos")?.clone()).ok()?;
    Some(AgentEvent::TodoUpdated {
        session_id: str_field(props, "sessionID"),
        todos,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_completed_tool_part() {
        let raw = RawEvent::new(
            "message.part.updated",
            json!({"part": {
                "type": "tool", "sessionID": "ses_1", "tool": "bash", "callID": "call_1",
                "state": {"status": "completed", "title": "Run tests", "input": {"cmd": "go test"},
                          "output": "ok", "time": {"start": 1, "end": 2}}
            }}),
        );
        let AgentEvent::Tool(part) = AgentEvent::decode(&raw) else {
            panic!("expected tool part");
        };
        assert_eq!(part.status, ToolStatus::Completed);
        assert_eq!(part.display_name(), "Run tests");
        assert_eq!(part.call_id.as_deref(), Some("call_1"));
        assert_eq!(part.time.end, Some(2));
    }

    #[test]
    fn malformed_known_event_is_unrecognized() {
        let raw = RawEvent::new("session.diff", json!({"diff": "not a list"}));
        assert_eq!(
            AgentEvent::decode(&raw),
            AgentEvent::Unrecognized {
                event_type: "session.diff".into()
            }
        );
    }

    #[test]
    fn text_and_file_events_decode_to_their_variants() {
        let text = RawEvent::new(
            "message.part.updated",
            json!({"part": {"type": "text", "sessionID": "ses_1", "text": "tok"}}),
        );
        assert!(matches!(AgentEvent::decode(&text), AgentEvent::Text { .. }));
        let edited = RawEvent::new("file.edited", json!({"file": "src/app.go"}));
        assert!(matches!(
            AgentEvent::decode(&edited),
            AgentEvent::FileEdited { file: Some(_) }
        ));
    }

    #[test]
    fn raw_event_deserializes_from_feed_json() {
        let raw: RawEvent =
            serde_json::from_str(r#"{"type":"server.connected","properties":{}}"#).expect("raw");
        assert_eq!(raw.event_type, "server.connected");
        assert!(matches!(
            AgentEvent::decode(&raw),
            AgentEvent::Unrecognized { .. }
        ));
    }
}
