//! Raw byte relay for proxies that forward a body untouched.

use aiwire_core::AiwireResult;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// What a [`relay`] call forwarded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    /// Chunks written.
    pub chunks: usize,
    /// Bytes written.
    pub bytes: u64,
    /// Whether the token stopped the copy.
    pub cancelled: bool,
}

/// Copies `source` into `dest` chunk by chunk.
///
/// Holds at most one chunk at a time and flushes after each one and once
/// more at the end, also when cancelled. Cancellation is checked between
/// chunks and while waiting on the source. Source and write errors
/// propagate.
pub async fn relay<S, B, W>(
    mut source: S,
    dest: &mut W,
    token: &CancellationToken,
) -> AiwireResult<RelayStats>
where
    S: Stream<Item = AiwireResult<B>> + Unpin,
    B: AsRef<[u8]>,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut stats = RelayStats::default();
    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => {
                stats.cancelled = true;
                break;
            }
            next = source.next() => next,
        };
        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk?;
        let bytes = chunk.as_ref();
        dest.write_all(bytes).await?;
        dest.flush().await?;
        stats.chunks += 1;
        stats.bytes += bytes.len() as u64;
    }
    dest.flush().await?;
    debug!(
        chunks = stats.chunks,
        bytes = stats.bytes,
        cancelled = stats.cancelled,
        "Relay finished"
    );
    Ok(stats)
}
