//! Progressive merging of stream fragments into a final result.
//!
//! [`ResponseAccumulator`] folds [`ChatChunk`]s into a [`Response`];
//! [`JobEventLog`] collects a fine-tuning job's event feed.

use aiwire_core::{
    ChatChunk, Choice, Delta, FineTuningEvent, FunctionCall, Message, Response, Role, ToolCall,
    ToolCallFragment, Usage,
};
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Highest number of choices one response may hold.
pub const MAX_CHOICES: u32 = 128;

/// Highest number of tool calls one message may hold.
pub const MAX_TOOL_CALLS: u32 = 512;

/// A fragment that cannot be merged. The driver skips it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergeError {
    /// Choice index at or above [`MAX_CHOICES`].
    #[error("choice index {index} exceeds the limit of {limit}")]
    ChoiceIndex {
        /// Offending index.
        index: u32,
        /// Always [`MAX_CHOICES`].
        limit: u32,
    },
    /// Tool call index at or above [`MAX_TOOL_CALLS`].
    #[error("tool call index {index} exceeds the limit of {limit}")]
    ToolCallIndex {
        /// Offending index.
        index: u32,
        /// Always [`MAX_TOOL_CALLS`].
        limit: u32,
    },
}

/// State folded from a typed fragment sequence.
///
/// The stream driver owns one accumulator per stream and calls
/// [`Accumulate::accept`] for each decoded fragment in arrival order.
pub trait Accumulate: Send {
    /// Decoded form of one frame.
    type Fragment: DeserializeOwned + Send + Sync + 'static;
    /// Result handed to the caller.
    type Output;

    /// Merges one fragment. On error the state is unchanged.
    fn accept(&mut self, fragment: &Self::Fragment) -> Result<(), MergeError>;

    /// Current result. Callable at any time, including mid-stream.
    fn snapshot(&self) -> Self::Output;
}

/// A tool call still being assembled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallDraft {
    id: Option<String>,
    kind: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl ToolCallDraft {
    fn absorb(&mut self, fragment: &ToolCallFragment) {
        fill_once(&mut self.id, fragment.id.as_deref());
        fill_once(&mut self.kind, fragment.kind.as_deref());
        if let Some(function) = &fragment.function {
            fill_once(&mut self.name, function.name.as_deref());
            if let Some(arguments) = &function.arguments {
                self.arguments.push_str(arguments);
            }
        }
    }

    fn build(&self, index: u32) -> ToolCall {
        ToolCall {
            id: self.id.clone().unwrap_or_default(),
            index,
            kind: self.kind.clone().unwrap_or_default(),
            function: FunctionCall {
                name: self.name.clone().unwrap_or_default(),
                arguments: self.arguments.clone(),
            },
        }
    }
}

fn fill_once(slot: &mut Option<String>, value: Option<&str>) {
    if slot.is_none() {
        if let Some(v) = value.filter(|v| !v.is_empty()) {
            *slot = Some(v.to_string());
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ChoiceDraft {
    role: Option<Role>,
    content: String,
    name: Option<String>,
    tool_calls: BTreeMap<u32, ToolCallDraft>,
    finish_reason: Option<String>,
}

impl ChoiceDraft {
    fn next_tool_index(&self) -> u32 {
        self.tool_calls
            .last_key_value()
            .map_or(0, |(index, _)| index + 1)
    }

    /// Rejects a delta that would push a tool call past the limit, given
    /// `next` as the first free position. Returns the first free position
    /// once the delta is merged.
    fn check(mut next: u32, delta: &Delta) -> Result<u32, MergeError> {
        let Some(fragments) = &delta.tool_calls else {
            return Ok(next);
        };
        for fragment in fragments {
            let index = fragment.index.unwrap_or(next);
            if index >= MAX_TOOL_CALLS {
                return Err(MergeError::ToolCallIndex {
                    index,
                    limit: MAX_TOOL_CALLS,
                });
            }
            next = next.max(index + 1);
        }
        Ok(next)
    }

    fn absorb(&mut self, delta: &Delta) {
        if self.role.is_none() {
            self.role = delta.role;
        }
        if let Some(content) = &delta.content {
            self.content.push_str(content);
        }
        fill_once(&mut self.name, delta.name.as_deref());

        for fragment in delta.tool_calls.iter().flatten() {
            let index = fragment.index.unwrap_or_else(|| self.next_tool_index());
            self.tool_calls.entry(index).or_default().absorb(fragment);
        }
    }

    fn build(&self, index: u32) -> Choice {
        Choice {
            index,
            message: Message {
                role: self.role,
                content: self.content.clone(),
                tool_calls: self
                    .tool_calls
                    .iter()
                    .map(|(&i, draft)| draft.build(i))
                    .collect(),
                name: self.name.clone(),
                tool_call_id: None,
            },
            finish_reason: self.finish_reason.clone(),
        }
    }
}

/// Builds a [`Response`] from streamed chat fragments.
#[derive(Debug, Clone, Default)]
pub struct ResponseAccumulator {
    id: Option<String>,
    created: Option<i64>,
    model: Option<String>,
    usage: Option<Usage>,
    choices: BTreeMap<u32, ChoiceDraft>,
}

impl ResponseAccumulator {
    /// An empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges one delta into the choice at `choice_index`, creating the
    /// choice if needed.
    pub fn merge(&mut self, delta: &Delta, choice_index: u32) -> Result<(), MergeError> {
        self.check(delta, choice_index, None)?;
        self.choices.entry(choice_index).or_default().absorb(delta);
        Ok(())
    }

    /// `pending` is the first free tool call position left by earlier
    /// deltas of the same frame, if any.
    fn check(
        &self,
        delta: &Delta,
        choice_index: u32,
        pending: Option<u32>,
    ) -> Result<u32, MergeError> {
        if choice_index >= MAX_CHOICES {
            return Err(MergeError::ChoiceIndex {
                index: choice_index,
                limit: MAX_CHOICES,
            });
        }
        let next = pending.unwrap_or_else(|| {
            self.choices
                .get(&choice_index)
                .map_or(0, ChoiceDraft::next_tool_index)
        });
        ChoiceDraft::check(next, delta)
    }

    /// Merges a whole frame: every choice delta, finish reasons, usage and
    /// the response identity. A frame that fails validation is not applied
    /// at all.
    pub fn apply(&mut self, chunk: &ChatChunk) -> Result<(), MergeError> {
        let mut pending = BTreeMap::new();
        for choice in &chunk.choices {
            let next = self.check(
                &choice.delta,
                choice.index,
                pending.get(&choice.index).copied(),
            )?;
            pending.insert(choice.index, next);
        }

        fill_once(&mut self.id, chunk.id.as_deref());
        fill_once(&mut self.model, chunk.model.as_deref());
        if self.created.is_none() {
            self.created = chunk.created;
        }
        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }

        for choice in &chunk.choices {
            let draft = self.choices.entry(choice.index).or_default();
            draft.absorb(&choice.delta);
            if let Some(reason) = &choice.finish_reason {
                draft.finish_reason = Some(reason.clone());
            }
        }
        Ok(())
    }

    /// The response assembled so far. Choice indices are dense: any gap is
    /// filled with an empty choice.
    pub fn snapshot(&self) -> Response {
        let count = self
            .choices
            .last_key_value()
            .map_or(0, |(index, _)| index + 1);
        let empty = ChoiceDraft::default();
        let choices = (0..count)
            .map(|i| self.choices.get(&i).unwrap_or(&empty).build(i))
            .collect();

        Response {
            id: self.id.clone().unwrap_or_default(),
            created: self.created.unwrap_or_default(),
            model: self.model.clone().unwrap_or_default(),
            usage: self.usage,
            choices,
        }
    }

    /// True until the first choice is created.
    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }
}

impl Accumulate for ResponseAccumulator {
    type Fragment = ChatChunk;
    type Output = Response;

    fn accept(&mut self, fragment: &ChatChunk) -> Result<(), MergeError> {
        self.apply(fragment)
    }

    fn snapshot(&self) -> Response {
        ResponseAccumulator::snapshot(self)
    }
}

/// Arrival-ordered log of a job's events.
///
/// Feeds may replay events after a reconnect; an id seen before is ignored.
#[derive(Debug, Clone, Default)]
pub struct JobEventLog {
    events: Vec<FineTuningEvent>,
    seen: HashSet<String>,
}

impl JobEventLog {
    /// An empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct events recorded.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True when nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Accumulate for JobEventLog {
    type Fragment = FineTuningEvent;
    type Output = Vec<FineTuningEvent>;

    fn accept(&mut self, event: &FineTuningEvent) -> Result<(), MergeError> {
        if !self.seen.insert(event.id.clone()) {
            debug!(event_id = %event.id, "Duplicate job event ignored");
            return Ok(());
        }
        self.events.push(event.clone());
        Ok(())
    }

    fn snapshot(&self) -> Vec<FineTuningEvent> {
        self.events.clone()
    }
}
