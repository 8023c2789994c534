//! Partial, in-flight pieces of a chat completion as they arrive on a
//! stream. Every field is optional: a fragment only carries what changed.

use crate::message::{empty_role_as_none, Role, Usage};
use serde::{Deserialize, Serialize};

/// Partial function payload of a [`ToolCallFragment`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionFragment {
    /// Function name, usually only on the first fragment of a call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Next piece of the arguments text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// Partial tool call. `index` is the merge key; fragments without one are
/// always treated as a new call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallFragment {
    /// Merge key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    /// Call identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Type tag.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Function name and arguments piece.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionFragment>,
}

impl ToolCallFragment {
    /// A fragment carrying only an arguments piece for `index`.
    pub fn arguments(index: u32, text: impl Into<String>) -> Self {
        Self {
            index: Some(index),
            function: Some(FunctionFragment {
                name: None,
                arguments: Some(text.into()),
            }),
            ..Self::default()
        }
    }
}

/// Changes to one choice's message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    /// Present only on the first fragment of a choice. Some services send
    /// `""` on later fragments, which reads as unset.
    #[serde(
        default,
        deserialize_with = "empty_role_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub role: Option<Role>,
    /// Text to append.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Tool call pieces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallFragment>>,
    /// Participant name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Delta {
    /// A delta carrying only text.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// A delta carrying only a role.
    pub fn role(role: Role) -> Self {
        Self {
            role: Some(role),
            ..Self::default()
        }
    }

    /// A delta carrying tool call pieces.
    pub fn tool_calls(fragments: Vec<ToolCallFragment>) -> Self {
        Self {
            tool_calls: Some(fragments),
            ..Self::default()
        }
    }
}

/// Choice-level part of a [`ChatChunk`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkChoice {
    /// Target choice.
    #[serde(default)]
    pub index: u32,
    /// Message changes.
    #[serde(default)]
    pub delta: Delta,
    /// Set on the last fragment of the choice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// One decoded frame of a streaming chat completion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatChunk {
    /// Completion identifier, repeated on every frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Creation time in unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,
    /// Model name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Zero or more choice deltas.
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    /// Usage report, typically only on the final frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ChatChunk {
    /// Concatenated text content of every choice in this frame.
    pub fn text(&self) -> String {
        self.choices
            .iter()
            .filter_map(|c| c.delta.content.as_deref())
            .collect()
    }
}
