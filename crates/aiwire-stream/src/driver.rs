//! The streaming state machine and its push and pull adapters.
//!
//! [`StreamDriver`] owns the decoder and the accumulator of one stream.
//! [`StreamDriver::run`] feeds a [`FragmentHandler`] (push), and
//! [`FragmentStream`] exposes the same driver as a `futures::Stream`
//! (pull). Both go through [`StreamDriver::poll_next_fragment`].

use crate::accumulator::Accumulate;
use crate::cancel::{JobBinding, JobCanceller};
use crate::decoder::{FrameDecoder, FrameEnd};
use crate::handler::FragmentHandler;
use aiwire_core::{AiwireError, AiwireResult};
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::Stream;
use serde::Serialize;
use std::fmt;
use std::future::{poll_fn, Future};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{debug, info, warn};

/// Response body as delivered by the transport.
pub type ByteStream = BoxStream<'static, AiwireResult<Bytes>>;

/// Consecutive undecodable frames tolerated before a stream fails.
pub const DEFAULT_MAX_CONSECUTIVE_SKIPS: usize = 32;

/// Lifecycle of a stream once its body is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    /// Frames are being read.
    Streaming,
    /// The body ended, with or without the sentinel.
    Completed,
    /// The token fired or the caller stopped early.
    Cancelled,
    /// Transport fault, handler error or too many bad frames.
    Failed,
}

/// Why a successful outcome ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Sentinel received; the result is complete.
    Done,
    /// Body closed without the sentinel; the connection may have dropped.
    SourceClosed,
    /// Cancelled; the result holds what arrived before.
    Cancelled,
}

/// Final (or partial) result of a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamOutcome<T> {
    /// Accumulator snapshot.
    pub value: T,
    /// How the stream ended.
    pub termination: Termination,
    /// Frames that could not be decoded or merged.
    pub skipped_frames: usize,
}

impl<T> StreamOutcome<T> {
    /// True only when the sentinel was received.
    pub fn is_complete(&self) -> bool {
        self.termination == Termination::Done
    }

    /// True when the stream was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.termination == Termination::Cancelled
    }
}

/// Drives one stream: decode, merge, republish.
///
/// Cancellation is checked before every frame and also wakes a pending
/// network read. Dropping a driver that is bound to a job and was neither
/// completed nor finished spawns a best-effort remote cancel.
pub struct StreamDriver<A: Accumulate> {
    frames: FrameDecoder<ByteStream>,
    accumulator: A,
    token: CancellationToken,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    state: StreamState,
    failure: Option<String>,
    merged: usize,
    skipped: usize,
    consecutive_skips: usize,
    max_consecutive_skips: usize,
    job: Option<JobBinding>,
}

impl<A: Accumulate> StreamDriver<A> {
    /// Starts driving `body` into `accumulator`.
    pub fn new(body: ByteStream, accumulator: A, token: CancellationToken) -> Self {
        let cancelled = Box::pin(token.clone().cancelled_owned());
        Self {
            frames: FrameDecoder::new(body),
            accumulator,
            token,
            cancelled,
            state: StreamState::Streaming,
            failure: None,
            merged: 0,
            skipped: 0,
            consecutive_skips: 0,
            max_consecutive_skips: DEFAULT_MAX_CONSECUTIVE_SKIPS,
            job: None,
        }
    }

    /// The stream fails once this many frames in a row are skipped.
    pub fn with_max_consecutive_skips(mut self, max: usize) -> Self {
        self.max_consecutive_skips = max.max(1);
        self
    }

    /// Ties the stream to a remote job so that cancelling the stream also
    /// cancels the job.
    pub fn bind_job(mut self, job_id: impl Into<String>, canceller: Arc<dyn JobCanceller>) -> Self {
        self.job = Some(JobBinding {
            job_id: job_id.into(),
            canceller,
        });
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// What has been accumulated so far.
    pub fn snapshot(&self) -> A::Output {
        self.accumulator.snapshot()
    }

    /// Frames skipped so far.
    pub fn skipped_frames(&self) -> usize {
        self.skipped
    }

    /// The token this stream observes.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Advances the state machine by at most one merged fragment.
    ///
    /// Returns `Ready(None)` once the stream leaves `Streaming`. A transport
    /// fault or an exceeded skip tolerance is yielded once as an error and
    /// moves the stream to `Failed`.
    pub fn poll_next_fragment(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<Option<AiwireResult<A::Fragment>>> {
        loop {
            if self.state != StreamState::Streaming {
                return Poll::Ready(None);
            }
            if self.cancelled.as_mut().poll(cx).is_ready() {
                debug!(merged = self.merged, "Stream cancelled");
                self.state = StreamState::Cancelled;
                return Poll::Ready(None);
            }

            let payload = match ready!(Pin::new(&mut self.frames).poll_next(cx)) {
                Some(Ok(payload)) => payload,
                Some(Err(err)) => {
                    warn!(error = %err, merged = self.merged, "Stream failed mid-flight");
                    self.fail(err.to_string());
                    return Poll::Ready(Some(Err(err)));
                }
                None => {
                    self.state = StreamState::Completed;
                    info!(
                        merged = self.merged,
                        skipped = self.skipped,
                        clean = self.frames.saw_sentinel(),
                        "Stream completed"
                    );
                    return Poll::Ready(None);
                }
            };

            match self.absorb(&payload) {
                Ok(fragment) => {
                    self.merged += 1;
                    self.consecutive_skips = 0;
                    return Poll::Ready(Some(Ok(fragment)));
                }
                Err(reason) => {
                    self.skipped += 1;
                    self.consecutive_skips += 1;
                    warn!(
                        reason = %reason,
                        consecutive = self.consecutive_skips,
                        "Skipping frame"
                    );
                    if self.consecutive_skips >= self.max_consecutive_skips {
                        let message = format!(
                            "{} consecutive frames could not be decoded, last: {reason}",
                            self.consecutive_skips
                        );
                        self.fail(message.clone());
                        return Poll::Ready(Some(Err(AiwireError::Decode(message))));
                    }
                }
            }
        }
    }

    /// Awaits the next merged fragment.
    pub async fn next_fragment(&mut self) -> Option<AiwireResult<A::Fragment>> {
        poll_fn(|cx| self.poll_next_fragment(cx)).await
    }

    /// Push mode: hands every fragment to `handler` and returns the outcome.
    ///
    /// The next frame is only read after the handler returns. The handler
    /// call is raced against the token, so cancellation also interrupts a
    /// handler that is waiting.
    pub async fn run<H>(mut self, handler: &mut H) -> AiwireResult<StreamOutcome<A::Output>>
    where
        H: FragmentHandler<A::Fragment> + ?Sized,
    {
        let token = self.token.clone();
        while let Some(next) = self.next_fragment().await {
            let fragment = next?;
            tokio::select! {
                biased;
                result = handler.handle(&fragment) => {
                    if let Err(err) = result {
                        warn!(error = %err, "Fragment handler failed");
                        self.fail(err.to_string());
                        return Err(err);
                    }
                }
                _ = token.cancelled() => {
                    debug!("Cancelled while handler was running");
                    self.state = StreamState::Cancelled;
                    break;
                }
            }
        }
        self.finish().await
    }

    /// Pull mode.
    pub fn into_stream(self) -> FragmentStream<A> {
        FragmentStream { driver: self }
    }

    /// Ends the stream and returns its outcome.
    ///
    /// Finishing while still streaming is an early stop and is treated as a
    /// cancellation, including the remote job cancel if one is bound.
    pub async fn finish(mut self) -> AiwireResult<StreamOutcome<A::Output>> {
        if self.state == StreamState::Streaming {
            debug!(merged = self.merged, "Stream stopped before its end");
            self.state = StreamState::Cancelled;
        }

        let termination = match self.state {
            StreamState::Failed => {
                let reason = self
                    .failure
                    .take()
                    .unwrap_or_else(|| "stream failed".to_string());
                return Err(AiwireError::Stream(reason));
            }
            StreamState::Completed => match self.frames.termination() {
                Some(FrameEnd::Sentinel) => Termination::Done,
                _ => Termination::SourceClosed,
            },
            StreamState::Streaming | StreamState::Cancelled => {
                if let Some(job) = self.job.take() {
                    cancel_remote(job).await?;
                }
                Termination::Cancelled
            }
        };

        Ok(StreamOutcome {
            value: self.accumulator.snapshot(),
            termination,
            skipped_frames: self.skipped,
        })
    }

    fn absorb(&mut self, payload: &str) -> Result<A::Fragment, String> {
        let fragment: A::Fragment =
            serde_json::from_str(payload).map_err(|e| format!("invalid payload: {e}"))?;
        self.accumulator
            .accept(&fragment)
            .map_err(|e| format!("unmergeable fragment: {e}"))?;
        Ok(fragment)
    }

    fn fail(&mut self, reason: String) {
        self.state = StreamState::Failed;
        self.failure = Some(reason);
    }
}

async fn cancel_remote(job: JobBinding) -> AiwireResult<()> {
    info!(job_id = %job.job_id, "Cancelling remote job");
    job.canceller
        .cancel_job(&job.job_id)
        .await
        .map_err(|err| {
            warn!(job_id = %job.job_id, error = %err, "Remote job cancel failed");
            AiwireError::JobCancel {
                job_id: job.job_id.clone(),
                source: Box::new(err),
            }
        })
}

impl<A: Accumulate> Drop for StreamDriver<A> {
    fn drop(&mut self) {
        if matches!(self.state, StreamState::Completed | StreamState::Failed) {
            return;
        }
        let Some(job) = self.job.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(job_id = %job.job_id, "Stream dropped, cancelling job in background");
                handle.spawn(async move {
                    let _ = cancel_remote(job).await;
                });
            }
            Err(_) => {
                warn!(job_id = %job.job_id, "Stream dropped outside a runtime, job left running");
            }
        }
    }
}

impl<A: Accumulate> fmt::Debug for StreamDriver<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamDriver")
            .field("state", &self.state)
            .field("merged", &self.merged)
            .field("skipped", &self.skipped)
            .field("job", &self.job)
            .finish_non_exhaustive()
    }
}

/// Pull-mode view of a [`StreamDriver`].
///
/// Nothing is read from the network until the stream is polled. Call
/// [`FragmentStream::finish`] to obtain the outcome; finishing before the
/// stream is exhausted counts as cancellation.
#[derive(Debug)]
pub struct FragmentStream<A: Accumulate> {
    driver: StreamDriver<A>,
}

impl<A: Accumulate> FragmentStream<A> {
    /// Current lifecycle state.
    pub fn state(&self) -> StreamState {
        self.driver.state()
    }

    /// What has been accumulated so far.
    pub fn snapshot(&self) -> A::Output {
        self.driver.snapshot()
    }

    /// Frames skipped so far.
    pub fn skipped_frames(&self) -> usize {
        self.driver.skipped_frames()
    }

    /// Ends the stream and returns its outcome.
    pub async fn finish(self) -> AiwireResult<StreamOutcome<A::Output>> {
        self.driver.finish().await
    }
}

impl<A: Accumulate + Unpin> Stream for FragmentStream<A> {
    type Item = AiwireResult<A::Fragment>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().driver.poll_next_fragment(cx)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::accumulator::{JobEventLog, ResponseAccumulator};
    use crate::handler::handler_fn;
    use aiwire_core::{ChatChunk, FineTuningEvent, StructuredError};
    use futures_util::{stream, StreamExt};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn frame(content: &str) -> String {
        format!("data: {{\"choices\":[{{\"index\":0,\"delta\":{{\"content\":\"{content}\"}}}}]}}\n")
    }

    fn body(lines: Vec<String>) -> ByteStream {
        stream::iter(lines.into_iter().map(|l| Ok(Bytes::from(l)))).boxed()
    }

    fn open_body(lines: Vec<String>) -> ByteStream {
        stream::iter(lines.into_iter().map(|l| Ok(Bytes::from(l))))
            .chain(stream::pending())
            .boxed()
    }

    /// A finite body that counts the chunks taken from it.
    fn counted_body(lines: Vec<String>, pulled: Arc<AtomicUsize>) -> ByteStream {
        stream::iter(lines.into_iter().map(|l| Ok(Bytes::from(l))))
            .inspect(move |_| {
                pulled.fetch_add(1, Ordering::SeqCst);
            })
            .boxed()
    }

    fn driver(body: ByteStream) -> StreamDriver<ResponseAccumulator> {
        StreamDriver::new(body, ResponseAccumulator::new(), CancellationToken::new())
    }

    #[derive(Default)]
    struct RecordingCanceller {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl JobCanceller for RecordingCanceller {
        async fn cancel_job(&self, _job_id: &str) -> AiwireResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(StructuredError::connection("refused").into());
            }
            Ok(())
        }
    }

    /// Blocks on the first fragment until released.
    struct GatedHandler {
        entered: Option<oneshot::Sender<()>>,
        gate: Option<oneshot::Receiver<()>>,
        seen: usize,
    }

    #[async_trait::async_trait]
    impl FragmentHandler<ChatChunk> for GatedHandler {
        async fn handle(&mut self, _fragment: &ChatChunk) -> AiwireResult<()> {
            self.seen += 1;
            if let Some(entered) = self.entered.take() {
                let _ = entered.send(());
            }
            if let Some(gate) = self.gate.take() {
                let _ = gate.await;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_pull_until_sentinel() {
        let mut lines = vec![frame("a"), frame("b")];
        lines.push("data: [DONE]\n".into());
        let mut stream = driver(body(lines)).into_stream();

        let chunks: Vec<ChatChunk> = (&mut stream).map(Result::unwrap).collect().await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(stream.state(), StreamState::Completed);

        let outcome = stream.finish().await.unwrap();
        assert_eq!(outcome.termination, Termination::Done);
        assert_eq!(outcome.value.text(), "ab");
    }

    #[tokio::test]
    async fn test_source_closed_is_reported() {
        let outcome = driver(body(vec![frame("a")]))
            .run(&mut handler_fn(|_: &ChatChunk| Ok(())))
            .await
            .unwrap();
        assert_eq!(outcome.termination, Termination::SourceClosed);
        assert!(!outcome.is_complete());
        assert_eq!(outcome.value.text(), "a");
    }

    #[tokio::test]
    async fn test_malformed_frames_are_skipped() {
        let lines = vec![
            frame("a"),
            "data: {not json\n".into(),
            "data: {\"choices\":[{\"index\":999,\"delta\":{\"content\":\"x\"}}]}\n".into(),
            frame("b"),
            "data: [DONE]\n".into(),
        ];
        let outcome = driver(body(lines)).into_stream().finish_after_drain().await;
        assert_eq!(outcome.value.text(), "ab");
        assert_eq!(outcome.skipped_frames, 2);
        assert!(outcome.is_complete());
    }

    #[tokio::test]
    async fn test_skip_tolerance_fails_stream() {
        let mut lines = vec![frame("a")];
        lines.extend(std::iter::repeat("data: garbage\n".to_string()).take(3));
        lines.push(frame("never"));
        let mut stream = driver(body(lines)).with_max_consecutive_skips(3).into_stream();

        assert!(stream.next().await.unwrap().is_ok());
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, AiwireError::Decode(_)));
        assert!(stream.next().await.is_none());
        assert_eq!(stream.state(), StreamState::Failed);
        assert!(matches!(stream.finish().await, Err(AiwireError::Stream(_))));
    }

    #[tokio::test]
    async fn test_transport_fault_fails_stream() {
        let source = stream::iter(vec![
            Ok(Bytes::from(frame("a"))),
            Err(StructuredError::connection("reset by peer").into()),
        ])
        .boxed();
        let err = driver(source)
            .run(&mut handler_fn(|_: &ChatChunk| Ok(())))
            .await
            .unwrap_err();
        assert_eq!(
            err.structured().unwrap().kind,
            aiwire_core::ErrorKind::ConnectionFailure
        );
    }

    #[tokio::test]
    async fn test_handler_error_fails_stream() {
        let lines = vec![frame("a"), frame("b"), frame("c")];
        let mut seen = 0;
        let err = driver(body(lines))
            .run(&mut handler_fn(|_: &ChatChunk| {
                seen += 1;
                if seen == 2 {
                    return Err(AiwireError::Handler("stop".into()));
                }
                Ok(())
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, AiwireError::Handler(_)));
        assert_eq!(seen, 2);
    }

    #[tokio::test]
    async fn test_cancel_unblocks_pending_read() {
        let token = CancellationToken::new();
        let driver = StreamDriver::new(
            open_body(vec![frame("Hel"), frame("lo")]),
            ResponseAccumulator::new(),
            token.clone(),
        );

        let canceller = token.clone();
        let mut count = 0;
        let outcome = driver
            .run(&mut handler_fn(move |_: &ChatChunk| {
                count += 1;
                if count == 2 {
                    canceller.cancel();
                }
                Ok(())
            }))
            .await
            .unwrap();
        assert!(outcome.is_cancelled());
        assert_eq!(outcome.value.text(), "Hello");
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_on_network() {
        let token = CancellationToken::new();
        let mut stream = StreamDriver::new(
            open_body(vec![frame("x")]),
            ResponseAccumulator::new(),
            token.clone(),
        )
        .into_stream();

        assert!(stream.next().await.unwrap().is_ok());
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let next = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("cancellation should wake the pending read");
        assert!(next.is_none());
        assert_eq!(stream.state(), StreamState::Cancelled);
    }

    #[tokio::test]
    async fn test_slow_handler_holds_back_reads() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let lines = vec![frame("a"), frame("b"), frame("c"), "data: [DONE]\n".into()];
        let driver = driver(counted_body(lines, pulled.clone()));

        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        let mut handler = GatedHandler {
            entered: Some(entered_tx),
            gate: Some(release_rx),
            seen: 0,
        };
        let control = async {
            entered_rx.await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            let while_blocked = pulled.load(Ordering::SeqCst);
            release_tx.send(()).unwrap();
            while_blocked
        };

        let (outcome, while_blocked) = tokio::join!(driver.run(&mut handler), control);
        assert_eq!(while_blocked, 1);
        assert_eq!(outcome.unwrap().value.text(), "abc");
        assert_eq!(handler.seen, 3);
        assert_eq!(pulled.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_pull_reads_nothing_ahead() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let lines = vec![frame("a"), frame("b"), "data: [DONE]\n".into()];
        let mut stream = driver(counted_body(lines, pulled.clone())).into_stream();
        assert_eq!(pulled.load(Ordering::SeqCst), 0);

        assert_eq!(stream.next().await.unwrap().unwrap().text(), "a");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pulled.load(Ordering::SeqCst), 1);

        assert_eq!(stream.next().await.unwrap().unwrap().text(), "b");
        assert_eq!(pulled.load(Ordering::SeqCst), 2);

        assert!(stream.next().await.is_none());
        assert_eq!(pulled.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_empty_role_frame_is_not_skipped() {
        let lines = vec![
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"\",\"content\":\"Hi\"}}]}\n".to_string(),
            frame(" there"),
            "data: [DONE]\n".into(),
        ];
        let outcome = driver(body(lines))
            .run(&mut handler_fn(|_: &ChatChunk| Ok(())))
            .await
            .unwrap();
        assert_eq!(outcome.value.text(), "Hi there");
        assert_eq!(outcome.skipped_frames, 0);
    }

    #[tokio::test]
    async fn test_early_finish_cancels_bound_job() {
        let canceller = Arc::new(RecordingCanceller::default());
        let event = |id: &str| format!("data: {{\"id\":\"{id}\",\"message\":\"m\"}}\n");
        let mut stream = StreamDriver::new(
            open_body(vec![event("e1"), event("e2")]),
            JobEventLog::new(),
            CancellationToken::new(),
        )
        .bind_job("ftjob-1", canceller.clone())
        .into_stream();

        let first: FineTuningEvent = stream.next().await.unwrap().unwrap();
        assert_eq!(first.id, "e1");

        let outcome = stream.finish().await.unwrap();
        assert!(outcome.is_cancelled());
        assert_eq!(outcome.value.len(), 1);
        assert_eq!(canceller.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_job_cancel_is_reported() {
        let canceller = Arc::new(RecordingCanceller {
            fail: true,
            ..RecordingCanceller::default()
        });
        let token = CancellationToken::new();
        token.cancel();
        let err = StreamDriver::new(open_body(vec![]), JobEventLog::new(), token)
            .bind_job("ftjob-2", canceller.clone())
            .run(&mut handler_fn(|_: &FineTuningEvent| Ok(())))
            .await
            .unwrap_err();

        match err {
            AiwireError::JobCancel { job_id, source } => {
                assert_eq!(job_id, "ftjob-2");
                assert!(source.structured().is_some());
            }
            other => panic!("expected JobCancel, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_completed_stream_does_not_cancel_job() {
        let canceller = Arc::new(RecordingCanceller::default());
        let outcome = StreamDriver::new(
            body(vec!["data: {\"id\":\"e1\"}\n".into()]),
            JobEventLog::new(),
            CancellationToken::new(),
        )
        .bind_job("ftjob-3", canceller.clone())
        .run(&mut handler_fn(|_: &FineTuningEvent| Ok(())))
        .await
        .unwrap();
        assert_eq!(outcome.termination, Termination::SourceClosed);
        assert_eq!(canceller.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dropped_stream_cancels_job_in_background() {
        let canceller = Arc::new(RecordingCanceller::default());
        let stream = StreamDriver::new(open_body(vec![]), JobEventLog::new(), CancellationToken::new())
            .bind_job("ftjob-4", canceller.clone())
            .into_stream();
        drop(stream);

        for _ in 0..50 {
            if canceller.calls.load(Ordering::SeqCst) == 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("background cancel never ran");
    }

    impl FragmentStream<ResponseAccumulator> {
        async fn finish_after_drain(mut self) -> StreamOutcome<aiwire_core::Response> {
            while let Some(item) = self.next().await {
                item.unwrap();
            }
            self.finish().await.unwrap()
        }
    }
}
