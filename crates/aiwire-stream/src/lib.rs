//! Streaming response assembly for the aiwire API client.
//!
//! A response body of `data:` lines flows through three stages:
//!
//! - [`FrameDecoder`]: splits the body into payload strings, stopping at
//!   the `[DONE]` sentinel.
//! - [`Accumulate`]: folds each decoded fragment into a result
//!   ([`ResponseAccumulator`] for chat, [`JobEventLog`] for job feeds).
//! - [`StreamDriver`]: the state machine tying them together, with a push
//!   adapter ([`StreamDriver::run`]) and a pull adapter ([`FragmentStream`]).
//!
//! [`relay`] forwards a body unchanged for callers that proxy it.

/// Fragment merging.
pub mod accumulator;
/// Remote job cancellation and deadlines.
pub mod cancel;
/// Line-level event decoding.
pub mod decoder;
/// Stream state machine and adapters.
pub mod driver;
/// Push-mode fragment handlers.
pub mod handler;
/// Raw body relay.
pub mod passthrough;

pub use accumulator::{
    Accumulate, JobEventLog, MergeError, ResponseAccumulator, ToolCallDraft, MAX_CHOICES,
    MAX_TOOL_CALLS,
};
pub use cancel::{deadline_token, JobCanceller};
pub use decoder::{parse_line, FrameDecoder, FrameEnd, Line};
pub use driver::{
    ByteStream, FragmentStream, StreamDriver, StreamOutcome, StreamState, Termination,
    DEFAULT_MAX_CONSECUTIVE_SKIPS,
};
pub use handler::{handler_fn, FnHandler, FragmentHandler};
pub use passthrough::{relay, RelayStats};
pub use tokio_util::sync::CancellationToken;
