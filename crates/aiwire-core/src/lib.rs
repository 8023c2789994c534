//! Core types and error definitions for the aiwire API client.
//!
//! This crate provides the foundational types shared across all aiwire
//! crates: the complete and partial shapes of a chat completion, the job
//! event model, and the error taxonomy.
//!
//! # Main types
//!
//! - [`AiwireError`]: Unified error enum for all aiwire subsystems.
//! - [`AiwireResult`]: Convenience alias for `Result<T, AiwireError>`.
//! - [`StructuredError`]: A classified failed exchange, see [`classify`].
//! - [`Response`], [`Choice`], [`Message`], [`ToolCall`], [`Usage`]: merged results.
//! - [`ChatChunk`], [`Delta`], [`ToolCallFragment`]: stream fragments.

/// Error taxonomy and HTTP failure classification.
pub mod error;
/// Partial fragments of a streaming completion.
pub mod fragment;
/// Fine-tuning job resources.
pub mod job;
/// Complete messages and responses.
pub mod message;

pub use error::{classify, ApiErrorDetail, ErrorKind, RateLimitInfo, StructuredError};
pub use fragment::{ChatChunk, ChunkChoice, Delta, FunctionFragment, ToolCallFragment};
pub use job::{FineTuningEvent, FineTuningJob};
pub use message::{Choice, FunctionCall, Message, Response, Role, ToolCall, Usage};

/// Top-level error type for aiwire.
///
/// Each variant corresponds to a stage of a call that can fail.
#[derive(Debug, thiserror::Error)]
pub enum AiwireError {
    /// The exchange failed: non-success status or no response at all.
    #[error("API error: {0}")]
    Api(#[from] StructuredError),

    /// The stream failed after it was opened.
    #[error("Stream error: {0}")]
    Stream(String),

    /// A payload could not be decoded into the expected shape.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A push-mode handler rejected a fragment.
    #[error("Handler error: {0}")]
    Handler(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// The local stream was cancelled but the remote job could not be.
    #[error("Failed to cancel job {job_id}: {source}")]
    JobCancel {
        /// Job that is still running upstream.
        job_id: String,
        /// Why the cancel request failed.
        #[source]
        source: Box<AiwireError>,
    },

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AiwireError {
    /// The classified exchange failure, if this is one.
    pub fn structured(&self) -> Option<&StructuredError> {
        match self {
            Self::Api(err) => Some(err),
            Self::JobCancel { source, .. } => source.structured(),
            _ => None,
        }
    }
}

/// A convenience `Result` alias using [`AiwireError`].
pub type AiwireResult<T> = Result<T, AiwireError>;
