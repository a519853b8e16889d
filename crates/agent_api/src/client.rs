use std::pin::Pin;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use crate::config::AgentApiConfig;
use crate::error::{billing_error, parse_error_message, AgentApiError};
use crate::records::{CreatedThread, MessageRecord, RunStatus, RunStatusResponse, StartedRun};
use crate::retry::{is_retryable_http_error, retry_delay, MAX_RETRIES};
use crate::url;

/// Raw transport bytes as delivered; framing happens in the decoder.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, AgentApiError>> + Send>>;

#[derive(Debug)]
pub struct AgentApiClient {
    http: Client,
    config: AgentApiConfig,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    messages: Vec<MessageRecord>,
}

impl AgentApiClient {
    pub fn new(config: AgentApiConfig) -> Result<Self, AgentApiError> {
        let mut builder = Client::builder();
        if let Some(user_agent) = config.user_agent.as_deref() {
            builder = builder.user_agent(user_agent.to_owned());
        }
        let http = builder.build().map_err(AgentApiError::from)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &AgentApiConfig {
        &self.config
    }

    fn bearer(&self) -> Result<String, AgentApiError> {
        let token = self.config.token.trim();
        if token.is_empty() {
            return Err(AgentApiError::MissingToken);
        }
        Ok(format!("Bearer {token}"))
    }

    fn rest_request(&self, builder: RequestBuilder) -> Result<RequestBuilder, AgentApiError> {
        let mut builder = builder.header(AUTHORIZATION, self.bearer()?);
        if let Some(timeout) = self.config.timeout {
            builder = builder.timeout(timeout);
        }
        Ok(builder)
    }

    /// Issue a one-shot REST request with transient-error retry.
    ///
    /// Billing and authorization rejections return immediately; only
    /// transient statuses and network failures are retried with backoff.
    async fn send_with_retry(
        &self,
        build: impl Fn(&Client) -> RequestBuilder,
    ) -> Result<Response, AgentApiError> {
        let mut last_status: Option<StatusCode> = None;
        let mut last_error = None;

        for attempt in 0..=MAX_RETRIES {
            let request = self.rest_request(build(&self.http))?;
            match request.send().await {
                Ok(response) => {
                    if response.status().is_success() {
                        return Ok(response);
                    }

                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    if let Some(billing) = billing_error(status, &body) {
                        return Err(billing);
                    }
                    let message = parse_error_message(status, &body);
                    let error = AgentApiError::Status(status, message.clone());
                    if error.is_auth() {
                        return Err(error);
                    }

                    last_status = Some(status);
                    last_error = Some(message.clone());
                    if attempt < MAX_RETRIES && is_retryable_http_error(status.as_u16(), &message)
                    {
                        tokio::time::sleep(retry_delay(attempt)).await;
                        continue;
                    }

                    return Err(error);
                }
                Err(error) => {
                    last_error = Some(error.to_string());
                    if attempt < MAX_RETRIES {
                        tokio::time::sleep(retry_delay(attempt)).await;
                        continue;
                    }
                }
            }
        }

        Err(AgentApiError::RetryExhausted {
            status: last_status,
            last_error,
        })
    }

    async fn json_response<T: DeserializeOwned>(response: Response) -> Result<T, AgentApiError> {
        response.json::<T>().await.map_err(AgentApiError::from)
    }

    pub async fn create_thread(&self) -> Result<String, AgentApiError> {
        let base = self.config.base_url.clone();
        let response = self
            .send_with_retry(|http| http.post(url::threads_url(&base)).json(&json!({})))
            .await?;
        let created: CreatedThread = Self::json_response(response).await?;
        Ok(created.thread_id)
    }

    pub async fn post_user_message(
        &self,
        thread_id: &str,
        text: &str,
    ) -> Result<MessageRecord, AgentApiError> {
        let base = self.config.base_url.clone();
        let body = json!({ "type": "user", "content": text });
        let response = self
            .send_with_retry(|http| {
                http.post(url::thread_messages_url(&base, thread_id))
                    .json(&body)
            })
            .await?;
        Self::json_response(response).await
    }

    pub async fn list_messages(
        &self,
        thread_id: &str,
    ) -> Result<Vec<MessageRecord>, AgentApiError> {
        let base = self.config.base_url.clone();
        let response = self
            .send_with_retry(|http| http.get(url::thread_messages_url(&base, thread_id)))
            .await?;
        let listed: MessagesResponse = Self::json_response(response).await?;
        Ok(listed.messages)
    }

    pub async fn start_run(&self, thread_id: &str) -> Result<String, AgentApiError> {
        let base = self.config.base_url.clone();
        let response = self
            .send_with_retry(|http| http.post(url::agent_start_url(&base, thread_id)).json(&json!({})))
            .await?;
        let started: StartedRun = Self::json_response(response).await?;
        Ok(started.agent_run_id)
    }

    pub async fn stop_run(&self, run_id: &str) -> Result<(), AgentApiError> {
        let base = self.config.base_url.clone();
        self.send_with_retry(|http| http.post(url::run_stop_url(&base, run_id)))
            .await?;
        Ok(())
    }

    pub async fn run_status(&self, run_id: &str) -> Result<RunStatus, AgentApiError> {
        let base = self.config.base_url.clone();
        let response = self
            .send_with_retry(|http| http.get(url::run_status_url(&base, run_id)))
            .await;
        match response {
            Ok(response) => {
                let status: RunStatusResponse = Self::json_response(response).await?;
                Ok(status.status)
            }
            Err(AgentApiError::Status(StatusCode::NOT_FOUND, _)) => {
                Err(AgentApiError::RunNotFound {
                    run_id: run_id.to_string(),
                })
            }
            Err(error) => Err(error),
        }
    }

    /// Open the push transport: one long-lived streaming response the
    /// server keeps appending lines to. The bearer token travels as a
    /// query parameter on this endpoint.
    pub async fn open_run_stream(&self, run_id: &str) -> Result<ByteStream, AgentApiError> {
        let token = self.config.token.trim();
        if token.is_empty() {
            return Err(AgentApiError::MissingToken);
        }

        let response = self
            .http
            .get(url::run_stream_url(&self.config.base_url, run_id))
            .query(&[("token", token)])
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(AgentApiError::from)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentApiError::Status(
                status,
                parse_error_message(status, &body),
            ));
        }

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(AgentApiError::from));
        Ok(Box::pin(bytes))
    }

    /// Open the polling fallback: repeatedly re-read the growing stream
    /// body and forward only the byte delta past the previously seen
    /// length, so repeated reads never reprocess delivered bytes.
    pub async fn open_poll_stream(&self, run_id: &str) -> Result<ByteStream, AgentApiError> {
        let state = PollState {
            http: self.http.clone(),
            url: url::run_stream_url(&self.config.base_url, run_id),
            auth: self.bearer()?,
            interval: self.config.poll_interval,
            seen: 0,
            done: false,
        };

        let stream = futures_util::stream::unfold(state, |mut state| async move {
            if state.done {
                return None;
            }

            loop {
                let response = state
                    .http
                    .get(&state.url)
                    .header(AUTHORIZATION, state.auth.clone())
                    .send()
                    .await;
                let response = match response {
                    Ok(response) => response,
                    Err(error) => {
                        state.done = true;
                        return Some((Err(AgentApiError::from(error)), state));
                    }
                };

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    state.done = true;
                    return Some((
                        Err(AgentApiError::Status(
                            status,
                            parse_error_message(status, &body),
                        )),
                        state,
                    ));
                }

                let body = match response.text().await {
                    Ok(body) => body,
                    Err(error) => {
                        state.done = true;
                        return Some((Err(AgentApiError::from(error)), state));
                    }
                };

                let bytes = body.as_bytes();
                if bytes.len() > state.seen {
                    let delta = bytes[state.seen..].to_vec();
                    state.seen = bytes.len();
                    return Some((Ok(delta), state));
                }
                if bytes.len() < state.seen {
                    // Body shrank under us; resync so future bytes are not skipped.
                    tracing::debug!(seen = state.seen, len = bytes.len(), "poll body shrank");
                    state.seen = bytes.len();
                }

                tokio::time::sleep(state.interval).await;
            }
        });

        Ok(Box::pin(stream))
    }
}

struct PollState {
    http: Client,
    url: String,
    auth: String,
    interval: Duration,
    seen: usize,
    done: bool,
}
