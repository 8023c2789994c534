use crate::config::ClientConfig;
use crate::request::ChatRequest;
use aiwire_core::{
    classify, AiwireError, AiwireResult, ChatChunk, FineTuningEvent, FineTuningJob, Response,
    StructuredError,
};
use aiwire_stream::{
    relay, Accumulate, ByteStream, CancellationToken, FragmentHandler, FragmentStream,
    JobCanceller, JobEventLog, RelayStats, ResponseAccumulator, StreamDriver, StreamOutcome,
};
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use reqwest::{header, Method, RequestBuilder};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Header carrying the per-call id generated by the client.
pub const REQUEST_ID_HEADER: &str = "X-Client-Request-Id";

const ORGANIZATION_HEADER: &str = "OpenAI-Organization";
const PROJECT_HEADER: &str = "OpenAI-Project";

/// Classifies a transport fault that produced no HTTP response.
pub fn classify_transport(err: &reqwest::Error) -> StructuredError {
    if err.is_timeout() {
        StructuredError::timeout(err.to_string())
    } else {
        StructuredError::connection(err.to_string())
    }
}

/// Client for the chat completion and fine-tuning endpoints.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct Client {
    config: Arc<ClientConfig>,
    http: reqwest::Client,
}

impl Client {
    /// Validates `config` and builds the HTTP client.
    pub fn new(config: ClientConfig) -> AiwireResult<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| AiwireError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            config: Arc::new(config),
            http,
        })
    }

    /// Client configured from the `AIWIRE_*` environment variables.
    pub fn from_env() -> AiwireResult<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    /// Active configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Non-streaming chat completion.
    pub async fn chat(&self, request: &ChatRequest) -> AiwireResult<Response> {
        let request_id = new_request_id();
        let span = info_span!("chat", request_id = %request_id, model = %request.model);
        async {
            let builder = self
                .request(Method::POST, "/chat/completions", &request_id)
                .timeout(self.request_timeout())
                .json(&request.non_streaming());
            let response: Response = self.fetch_json(builder).await?;
            info!(
                choices = response.choices.len(),
                total_tokens = response.usage.map(|u| u.total_tokens),
                "Chat completed"
            );
            Ok::<_, AiwireError>(response)
        }
        .instrument(span)
        .await
    }

    /// Streaming chat completion, pull mode.
    ///
    /// Fails with a classified error if the server rejects the call.
    /// Otherwise every frame is delivered through the returned stream and
    /// [`FragmentStream::finish`] yields the merged response.
    pub async fn chat_stream(
        &self,
        request: &ChatRequest,
        token: CancellationToken,
    ) -> AiwireResult<FragmentStream<ResponseAccumulator>> {
        Ok(self.chat_driver(request, token).await?.into_stream())
    }

    /// Streaming chat completion, push mode.
    pub async fn chat_stream_with<H>(
        &self,
        request: &ChatRequest,
        handler: &mut H,
        token: CancellationToken,
    ) -> AiwireResult<StreamOutcome<Response>>
    where
        H: FragmentHandler<ChatChunk> + ?Sized,
    {
        self.chat_driver(request, token).await?.run(handler).await
    }

    /// Follows a fine-tuning job's event feed, pull mode.
    ///
    /// Stopping the stream before it ends cancels the job.
    pub async fn fine_tuning_events(
        &self,
        job_id: &str,
        token: CancellationToken,
    ) -> AiwireResult<FragmentStream<JobEventLog>> {
        Ok(self.events_driver(job_id, token).await?.into_stream())
    }

    /// Follows a fine-tuning job's event feed, push mode.
    ///
    /// If `token` fires the job is cancelled too; a failed cancel is
    /// reported as [`AiwireError::JobCancel`].
    pub async fn fine_tuning_events_with<H>(
        &self,
        job_id: &str,
        handler: &mut H,
        token: CancellationToken,
    ) -> AiwireResult<StreamOutcome<Vec<FineTuningEvent>>>
    where
        H: FragmentHandler<FineTuningEvent> + ?Sized,
    {
        self.events_driver(job_id, token).await?.run(handler).await
    }

    /// Asks the server to cancel a fine-tuning job.
    pub async fn cancel_fine_tuning_job(&self, job_id: &str) -> AiwireResult<FineTuningJob> {
        let request_id = new_request_id();
        let span = info_span!("cancel_job", request_id = %request_id, job_id = %job_id);
        async {
            let builder = self
                .request(
                    Method::POST,
                    &format!("/fine_tuning/jobs/{job_id}/cancel"),
                    &request_id,
                )
                .timeout(self.request_timeout());
            let job: FineTuningJob = self.fetch_json(builder).await?;
            info!(status = %job.status, "Job cancel accepted");
            Ok::<_, AiwireError>(job)
        }
        .instrument(span)
        .await
    }

    /// Copies a streaming chat body into `dest` without decoding it.
    pub async fn relay_chat<W>(
        &self,
        request: &ChatRequest,
        dest: &mut W,
        token: CancellationToken,
    ) -> AiwireResult<RelayStats>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let request_id = new_request_id();
        let span = info_span!("relay_chat", request_id = %request_id, model = %request.model);
        let builder = self
            .request(Method::POST, "/chat/completions", &request_id)
            .json(&request.streaming());
        let body = self.open(builder, &token).instrument(span.clone()).await?;
        relay(body, dest, &token).instrument(span).await
    }

    async fn chat_driver(
        &self,
        request: &ChatRequest,
        token: CancellationToken,
    ) -> AiwireResult<StreamDriver<ResponseAccumulator>> {
        let request_id = new_request_id();
        let span = info_span!("chat_stream", request_id = %request_id, model = %request.model);
        let builder = self
            .request(Method::POST, "/chat/completions", &request_id)
            .json(&request.streaming());
        let body = self.open(builder, &token).instrument(span).await?;
        Ok(self.driver(body, ResponseAccumulator::new(), token))
    }

    async fn events_driver(
        &self,
        job_id: &str,
        token: CancellationToken,
    ) -> AiwireResult<StreamDriver<JobEventLog>> {
        let request_id = new_request_id();
        let span = info_span!("job_events", request_id = %request_id, job_id = %job_id);
        let builder = self.request(
            Method::GET,
            &format!("/fine_tuning/jobs/{job_id}/events?stream=true"),
            &request_id,
        );
        let body = self.open(builder, &token).instrument(span).await?;
        let canceller: Arc<dyn JobCanceller> = Arc::new(self.clone());
        Ok(self
            .driver(body, JobEventLog::new(), token)
            .bind_job(job_id, canceller))
    }

    fn driver<A: Accumulate>(
        &self,
        body: ByteStream,
        accumulator: A,
        token: CancellationToken,
    ) -> StreamDriver<A> {
        StreamDriver::new(body, accumulator, token)
            .with_max_consecutive_skips(self.config.max_consecutive_skips)
    }

    fn request(&self, method: Method, path: &str, request_id: &str) -> RequestBuilder {
        let mut builder = self
            .http
            .request(method, self.config.endpoint(path))
            .bearer_auth(&self.config.api_key)
            .header(REQUEST_ID_HEADER, request_id);
        if let Some(org) = &self.config.organization {
            builder = builder.header(ORGANIZATION_HEADER, org);
        }
        if let Some(project) = &self.config.project {
            builder = builder.header(PROJECT_HEADER, project);
        }
        builder
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.config.request_timeout_secs)
    }

    /// Sends the request and classifies any non-success status.
    async fn send(&self, builder: RequestBuilder) -> AiwireResult<reqwest::Response> {
        let response = builder.send().await.map_err(|e| {
            let err = classify_transport(&e);
            warn!(kind = %err.kind, error = %e, "Request failed without a response");
            err
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let headers = response.headers().clone();
        let body = body_or_empty(response.text().await);
        let err = classify(status.as_u16(), &headers, &body);
        warn!(status = status.as_u16(), kind = %err.kind, "Request rejected");
        Err(err.into())
    }

    async fn fetch_json<T: serde::de::DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> AiwireResult<T> {
        let response = self.send(builder).await?;
        let bytes = response.bytes().await.map_err(|e| classify_transport(&e))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Opens a streaming body. If `token` fires first, an empty body is
    /// returned and the driver reports the cancellation.
    async fn open(
        &self,
        builder: RequestBuilder,
        token: &CancellationToken,
    ) -> AiwireResult<ByteStream> {
        let builder = builder.header(header::ACCEPT, "text/event-stream");
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("Cancelled before the stream opened");
                Ok(stream::empty().boxed())
            }
            response = self.send(builder) => {
                let response = response?;
                info!(status = response.status().as_u16(), "Stream opened");
                Ok(response
                    .bytes_stream()
                    .map(|chunk| chunk.map_err(|e| AiwireError::Api(classify_transport(&e))))
                    .boxed())
            }
        }
    }
}

/// Error body text; a body that cannot be read is logged and treated as
/// empty so the status still gets classified.
fn body_or_empty<E: std::fmt::Display>(text: Result<String, E>) -> String {
    text.unwrap_or_else(|e| {
        debug!(error = %e, "Could not read error body");
        String::new()
    })
}

#[async_trait]
impl JobCanceller for Client {
    async fn cancel_job(&self, job_id: &str) -> AiwireResult<()> {
        let job = self.cancel_fine_tuning_job(job_id).await?;
        debug!(job_id = %job.id, terminal = job.is_terminal(), "Job cancelled");
        Ok(())
    }
}

fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}
