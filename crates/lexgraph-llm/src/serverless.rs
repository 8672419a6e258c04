//! Serverless queue-and-poll backend
//!
//! A job is queued with `POST {base}/run`, then `GET {base}/status/{id}` is
//! polled until the job leaves the queue. Streaming reads the fragments
//! produced since the previous poll from `GET {base}/stream/{id}`.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use lexgraph_core::{CompletionBackend, CompletionRequest, LexError, LlmConfig, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::{build_http_client, GenerationPayload};

/// Serverless endpoint client
pub struct ServerlessBackend {
    job: JobClient,
    status_check_delay: Duration,
    stream_delay: Duration,
}

/// Clonable handle used by the polling loops
#[derive(Clone)]
struct JobClient {
    client: Client,
    base_url: String,
    bearer_token: String,
}

#[derive(Debug, Serialize)]
struct RunRequest<'a> {
    input: &'a GenerationPayload,
}

#[derive(Debug, Deserialize)]
struct RunResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct JobStatus {
    status: String,
    #[serde(default)]
    output: Option<JobOutput>,
}

#[derive(Debug, Deserialize)]
struct JobOutput {
    response: String,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    stream: Vec<StreamChunk>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    output: String,
}

impl JobStatus {
    fn is_pending(&self) -> bool {
        matches!(self.status.as_str(), "IN_QUEUE" | "IN_PROGRESS")
    }

    fn is_completed(&self) -> bool {
        self.status == "COMPLETED"
    }
}

impl StreamResponse {
    fn joined(self) -> String {
        self.stream.into_iter().map(|c| c.output).collect()
    }
}

impl JobClient {
    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.bearer_token)
            .send()
            .await
            .map_err(|e| LexError::Completion(format!("Serverless request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LexError::Completion(format!(
                "Serverless error ({status}): {error_text}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| LexError::Completion(format!("Failed to parse serverless response: {e}")))
    }

    async fn queue(&self, payload: &GenerationPayload) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/run", self.base_url))
            .bearer_auth(&self.bearer_token)
            .json(&RunRequest { input: payload })
            .send()
            .await
            .map_err(|e| LexError::Completion(format!("Failed to queue job: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LexError::Completion(format!(
                "Serverless queue error ({status}): {error_text}"
            )));
        }

        let run: RunResponse = response
            .json()
            .await
            .map_err(|e| LexError::Completion(format!("Failed to parse job id: {e}")))?;

        tracing::debug!(job_id = %run.id, "Serverless job queued");
        Ok(run.id)
    }

    async fn status(&self, job_id: &str) -> Result<JobStatus> {
        self.get_json(&format!("{}/status/{job_id}", self.base_url))
            .await
    }

    async fn stream_output(&self, job_id: &str) -> Result<String> {
        let stream: StreamResponse = self
            .get_json(&format!("{}/stream/{job_id}", self.base_url))
            .await?;
        Ok(stream.joined())
    }
}

impl ServerlessBackend {
    /// Create a new serverless client
    pub fn new(base_url: impl Into<String>, bearer_token: impl Into<String>) -> Self {
        Self {
            job: JobClient {
                client: Client::new(),
                base_url: base_url.into().trim_end_matches('/').to_string(),
                bearer_token: bearer_token.into(),
            },
            status_check_delay: Duration::from_millis(100),
            stream_delay: Duration::ZERO,
        }
    }

    /// Create from config
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let token = config.serverless_token.clone().unwrap_or_default();
        let mut backend = Self::new(&config.serverless_base_url, token);
        backend.job.client = build_http_client(config.timeout_secs)?;
        backend.status_check_delay = Duration::from_millis(config.status_check_delay_ms);
        backend.stream_delay = Duration::from_millis(config.stream_delay_ms);
        Ok(backend)
    }
}

fn job_failed(job_id: &str, status: &JobStatus) -> LexError {
    LexError::Completion(format!(
        "Serverless job {job_id} ended with status {}",
        status.status
    ))
}

#[async_trait]
impl CompletionBackend for ServerlessBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let job_id = self.job.queue(&GenerationPayload::from(request)).await?;

        let status = loop {
            let status = self.job.status(&job_id).await?;
            if !status.is_pending() {
                break status;
            }
            tokio::time::sleep(self.status_check_delay).await;
        };

        if !status.is_completed() {
            return Err(job_failed(&job_id, &status));
        }

        status
            .output
            .map(|o| o.response)
            .ok_or_else(|| LexError::Completion(format!("Job {job_id} completed without output")))
    }

    async fn complete_stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<BoxStream<'static, Result<String>>> {
        let job_id = self.job.queue(&GenerationPayload::from(request)).await?;
        let job = self.job.clone();
        let delay = self.stream_delay;

        // (finished, first poll) state; each poll yields the fragments produced since the last one.
        let fragments = futures::stream::unfold(
            (job, job_id, false, true),
            move |(job, job_id, finished, first)| async move {
                if finished {
                    return None;
                }
                let mut first = first;
                loop {
                    if !first {
                        tokio::time::sleep(delay).await;
                    }
                    first = false;

                    let status = match job.status(&job_id).await {
                        Ok(status) => status,
                        Err(e) => return Some((Err(e), (job, job_id, true, false))),
                    };
                    let done = !status.is_pending();
                    if done && !status.is_completed() {
                        let err = job_failed(&job_id, &status);
                        return Some((Err(err), (job, job_id, true, false)));
                    }

                    match job.stream_output(&job_id).await {
                        Ok(fragment) if !fragment.is_empty() => {
                            return Some((Ok(fragment), (job, job_id, done, false)));
                        }
                        Ok(_) if done => return None,
                        Ok(_) => continue,
                        Err(e) => return Some((Err(e), (job, job_id, true, false))),
                    }
                }
            },
        );

        Ok(Box::pin(fragments))
    }

    fn name(&self) -> &str {
        "serverless"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use lexgraph_core::{ChatMessage, GenerationOptions};

    #[test]
    fn test_run_request_wraps_input() {
        let request = CompletionRequest::chat(
            vec![ChatMessage::user("Summarise the holding")],
            GenerationOptions::default(),
        );
        let payload = GenerationPayload::from(&request);
        let json = serde_json::to_value(RunRequest { input: &payload }).unwrap();

        assert_eq!(json["input"]["messages"][0]["content"], "Summarise the holding");
        assert_eq!(json["input"]["seed"], 10);
    }

    #[test]
    fn test_status_decoding() {
        let queued: JobStatus =
            serde_json::from_str(r#"{"id": "abc", "status": "IN_QUEUE"}"#).unwrap();
        assert!(queued.is_pending());
        assert!(queued.output.is_none());

        let done: JobStatus = serde_json::from_str(
            r#"{"id": "abc", "status": "COMPLETED", "output": {"response": "[{}]"}}"#,
        )
        .unwrap();
        assert!(!done.is_pending());
        assert!(done.is_completed());
        assert_eq!(done.output.unwrap().response, "[{}]");

        let failed: JobStatus = serde_json::from_str(r#"{"status": "FAILED"}"#).unwrap();
        assert!(!failed.is_pending());
        assert!(!failed.is_completed());
    }

    #[test]
    fn test_stream_response_joins_outputs() {
        let stream: StreamResponse = serde_json::from_str(
            r#"{"status": "IN_PROGRESS", "stream": [{"output": "The "}, {"output": "court"}]}"#,
        )
        .unwrap();
        assert_eq!(stream.joined(), "The court");

        let empty: StreamResponse = serde_json::from_str(r#"{"status": "IN_QUEUE"}"#).unwrap();
        assert_eq!(empty.joined(), "");
    }

    #[test]
    fn test_base_url_is_normalised() {
        let backend = ServerlessBackend::new("https://api.runpod.ai/v2/endpoint/", "token");
        assert_eq!(backend.job.base_url, "https://api.runpod.ai/v2/endpoint");
        assert_eq!(backend.name(), "serverless");
    }
}
