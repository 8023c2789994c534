use aiwire_core::AiwireResult;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Cancels a long-running job on the remote service.
///
/// A stream bound to a job with [`StreamDriver::bind_job`] calls this when
/// it is cancelled.
///
/// [`StreamDriver::bind_job`]: crate::StreamDriver::bind_job
#[async_trait]
pub trait JobCanceller: Send + Sync {
    /// Requests cancellation of `job_id`.
    async fn cancel_job(&self, job_id: &str) -> AiwireResult<()>;
}

#[derive(Clone)]
pub(crate) struct JobBinding {
    pub(crate) job_id: String,
    pub(crate) canceller: Arc<dyn JobCanceller>,
}

impl fmt::Debug for JobBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobBinding")
            .field("job_id", &self.job_id)
            .finish_non_exhaustive()
    }
}

/// A child of `parent` that is also cancelled once `after` elapses.
///
/// Must be called inside a tokio runtime. The timer task exits early if the
/// token is cancelled by other means.
pub fn deadline_token(parent: &CancellationToken, after: Duration) -> CancellationToken {
    let token = parent.child_token();
    let timer = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(after) => {
                debug!(deadline_ms = after.as_millis() as u64, "Deadline elapsed, cancelling stream");
                timer.cancel();
            }
            _ = timer.cancelled() => {}
        }
    });
    token
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fires() {
        let parent = CancellationToken::new();
        let token = deadline_token(&parent, Duration::from_secs(5));
        assert!(!token.is_cancelled());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(token.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_parent_cancels_child() {
        let parent = CancellationToken::new();
        let token = deadline_token(&parent, Duration::from_secs(3600));
        parent.cancel();
        assert!(token.is_cancelled());
    }
}
