//! HTTP client for the aiwire streaming core.
//!
//! [`Client`] opens chat completions and fine-tuning job feeds, classifies
//! rejected calls with [`aiwire_core::classify`], and hands streaming
//! bodies to [`aiwire_stream::StreamDriver`].

/// The [`Client`] and transport-fault classification.
pub mod client;
/// [`ClientConfig`] and its loaders.
pub mod config;
/// Request bodies.
pub mod request;

pub use client::{classify_transport, Client, REQUEST_ID_HEADER};
pub use config::ClientConfig;
pub use request::{ChatRequest, FunctionDefinition, StreamOptions, ToolDefinition};

pub use aiwire_core::{AiwireError, AiwireResult, ChatChunk, FineTuningEvent, Message, Response};
pub use aiwire_stream::{
    deadline_token, handler_fn, CancellationToken, FragmentHandler, FragmentStream, StreamOutcome,
    Termination,
};
