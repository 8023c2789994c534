use chrono::{DateTime, Utc};
use serde::de::value::StrDeserializer;
use serde::de::IntoDeserializer;
use serde::{Deserialize, Deserializer, Serialize};

/// The role of the participant that authored a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A system-level instruction or prompt.
    System,
    /// A human end-user.
    User,
    /// The AI assistant.
    Assistant,
    /// Output produced by a tool invocation.
    Tool,
}

impl Role {
    /// Wire name of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// Function payload of a [`ToolCall`]. `arguments` is raw text and only
/// guaranteed to be valid JSON once the stream has ended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Name of the function to invoke.
    #[serde(default)]
    pub name: String,
    /// Arguments as emitted by the model.
    #[serde(default)]
    pub arguments: String,
}

/// A request from the model to invoke a tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identifier assigned by the model.
    #[serde(default)]
    pub id: String,
    /// Position of the call inside its message.
    #[serde(default)]
    pub index: u32,
    /// Type tag, `"function"` in practice.
    #[serde(default, rename = "type")]
    pub kind: String,
    /// Function name and arguments.
    #[serde(default)]
    pub function: FunctionCall,
}

impl ToolCall {
    /// Parses the accumulated arguments text as JSON.
    pub fn parse_arguments(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_str(&self.function.arguments)
    }
}

/// A single message of a conversation, either sent by the caller or
/// produced by merging a stream of fragments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Author role. Unset only while no fragment has provided one.
    #[serde(
        default,
        deserialize_with = "empty_role_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub role: Option<Role>,
    /// Text content; an absent or `null` wire value becomes `""`.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
    /// Tool invocations requested by the assistant, ordered by index.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Optional participant name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// For [`Role::Tool`] messages, the call being answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    /// Creates a message with the given role and content.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role: Some(role),
            content: content.into(),
            ..Self::default()
        }
    }

    /// Creates a new message with [`Role::System`].
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Creates a new message with [`Role::User`].
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Creates a new message with [`Role::Assistant`].
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Creates a tool result answering `tool_call_id`.
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(Role::Tool, content)
        }
    }

    /// Short human-readable rendering, e.g. `assistant: Hello`.
    pub fn to_display_string(&self) -> String {
        let role = self.role.map_or("?", |r| r.as_str());
        let mut out = format!("{role}: {}", self.content);
        for call in &self.tool_calls {
            out.push_str(&format!(
                "\n  -> {}({})",
                call.function.name, call.function.arguments
            ));
        }
        out
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Reads an optional role; `""` and `null` both mean no role.
pub(crate) fn empty_role_as_none<'de, D>(deserializer: D) -> Result<Option<Role>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)?.as_deref() {
        None | Some("") => Ok(None),
        Some(name) => {
            let name: StrDeserializer<'_, D::Error> = name.into_deserializer();
            Role::deserialize(name).map(Some)
        }
    }
}

/// Unix seconds as a UTC timestamp; 0 is the wire's "unset".
pub(crate) fn unix_time(secs: i64) -> Option<DateTime<Utc>> {
    if secs == 0 {
        return None;
    }
    DateTime::from_timestamp(secs, 0)
}

/// Token counts reported by the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt.
    #[serde(default)]
    pub prompt_tokens: u32,
    /// Tokens generated.
    #[serde(default)]
    pub completion_tokens: u32,
    /// Sum reported by the service.
    #[serde(default)]
    pub total_tokens: u32,
}

/// One alternative completion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    /// Position of this choice; stable for the lifetime of a stream.
    #[serde(default)]
    pub index: u32,
    /// The merged message.
    #[serde(default)]
    pub message: Message,
    /// Why generation stopped, e.g. `stop`, `length`, `tool_calls`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// A complete chat completion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Completion identifier.
    #[serde(default)]
    pub id: String,
    /// Creation time in unix seconds.
    #[serde(default)]
    pub created: i64,
    /// Model that produced the completion.
    #[serde(default)]
    pub model: String,
    /// Token usage, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Choices ordered by index.
    #[serde(default)]
    pub choices: Vec<Choice>,
}

impl Response {
    /// Creation time as a UTC timestamp, `None` while unset.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        unix_time(self.created)
    }

    /// The first choice's message, which is all most callers need.
    pub fn message(&self) -> Option<&Message> {
        self.choices.first().map(|c| &c.message)
    }

    /// The first choice's text content, or `""`.
    pub fn text(&self) -> &str {
        self.message().map_or("", |m| m.content.as_str())
    }

    /// Multi-line rendering of every choice.
    pub fn to_display_string(&self) -> String {
        self.choices
            .iter()
            .map(|c| match &c.finish_reason {
                Some(reason) => format!("[{}] {} ({reason})", c.index, c.message.to_display_string()),
                None => format!("[{}] {}", c.index, c.message.to_display_string()),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
