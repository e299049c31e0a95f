//! Backend interface for the transcription service.
//!
//! The service exposes five operations: job submission, job status, results
//! retrieval, and answering questions (typed or voice). They are modeled as
//! one async trait so the poller, conversation, and session talk to a single
//! seam; `HttpBackend` is the production implementation.

use crate::audio::AudioPayload;
use crate::error::ApiError;
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// Overall request timeout. Answer generation can take a while.
const REQUEST_TIMEOUT_SECS: u64 = 300;

/// Connect timeout for reaching the backend
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Transcript and summary for one video
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoResults {
    pub transcription: String,
    pub summary: String,
}

/// Outcome of submitting a video for transcription
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// The backend already holds results for this video; no job was queued.
    Cached {
        message: String,
        results: VideoResults,
    },
    /// A job was queued; poll `task_id` until it reaches a terminal state.
    Started { message: String, task_id: String },
}

/// State of a queued transcription job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    Pending,
    Success,
    Failure,
}

/// Status report for a queued job
#[derive(Debug, Clone, Deserialize)]
pub struct JobStatus {
    pub status: JobState,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

/// Role of one entry in the wire-format chat history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    Question,
    Answer,
}

/// One entry of the chat history as the answer endpoint expects it
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    #[serde(rename = "type")]
    pub kind: HistoryRole,
    pub text: String,
}

/// The transcription service's operations
#[async_trait]
pub trait Backend: Send + Sync {
    /// Submit a video for transcription, attributed to `client_id`.
    async fn submit_job(
        &self,
        subject_url: &str,
        client_id: &str,
    ) -> Result<SubmitOutcome, ApiError>;

    /// Check the state of a queued job.
    async fn job_status(&self, task_id: &str) -> Result<JobStatus, ApiError>;

    /// Fetch transcript and summary for a video whose job succeeded.
    async fn fetch_results(&self, subject_url: &str) -> Result<VideoResults, ApiError>;

    /// Answer a typed question about the video, grounded in `history`.
    async fn answer_text(
        &self,
        question: &str,
        subject_url: &str,
        history: &[HistoryEntry],
    ) -> Result<String, ApiError>;

    /// Answer a recorded voice question about the video.
    async fn answer_voice(
        &self,
        audio: &AudioPayload,
        subject_url: &str,
    ) -> Result<String, ApiError>;
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    video_url: &'a str,
    client_id: &'a str,
}

/// Raw submission reply; which fields are present decides the outcome.
#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    task_id: Option<String>,
    #[serde(default)]
    transcription: Option<String>,
    #[serde(default)]
    summary: Option<String>,
}

#[derive(Debug, Serialize)]
struct ResultsRequest<'a> {
    video_url: &'a str,
}

#[derive(Debug, Serialize)]
struct AnswerRequest<'a> {
    video_url: &'a str,
    chat_history: &'a [HistoryEntry],
}

impl SubmitResponse {
    fn into_outcome(self) -> Result<SubmitOutcome, ApiError> {
        let message = self.message.unwrap_or_default();
        if let Some(task_id) = self.task_id {
            return Ok(SubmitOutcome::Started { message, task_id });
        }
        match (self.transcription, self.summary) {
            (Some(transcription), Some(summary)) => Ok(SubmitOutcome::Cached {
                message,
                results: VideoResults {
                    transcription,
                    summary,
                },
            }),
            _ => Err(ApiError::InvalidResponse(
                "Submission reply carried neither a task id nor results".to_string(),
            )),
        }
    }
}

/// HTTP client for the transcription service
pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
}

impl HttpBackend {
    /// Create a backend client against `base_url`.
    pub fn new(base_url: &Url) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .context("Failed to create HTTP client for HttpBackend")?;

        Ok(Self {
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Convert a non-2xx reply into an `ApiError`, preferring the backend's
    /// `detail` field over the raw body.
    async fn error_from(response: reqwest::Response) -> ApiError {
        #[derive(Deserialize)]
        struct ErrorBody {
            detail: Option<String>,
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.detail)
            .unwrap_or(body);

        ApiError::Server { status, message }
    }

    async fn parse_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse reply: {}", e)))
    }
}

/// Extract the answer text from the answer endpoint's reply, which is either
/// a bare JSON string or a structured value.
fn extract_answer(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

#[async_trait]
impl Backend for HttpBackend {
    #[instrument(skip(self))]
    async fn submit_job(
        &self,
        subject_url: &str,
        client_id: &str,
    ) -> Result<SubmitOutcome, ApiError> {
        let response = self
            .client
            .post(self.endpoint("transcrever/"))
            .json(&SubmitRequest {
                video_url: subject_url,
                client_id,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let raw: SubmitResponse = Self::parse_json(response).await?;
        raw.into_outcome()
    }

    #[instrument(skip(self))]
    async fn job_status(&self, task_id: &str) -> Result<JobStatus, ApiError> {
        let response = self
            .client
            .get(self.endpoint(&format!("task_status/{}", task_id)))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        Self::parse_json(response).await
    }

    #[instrument(skip(self))]
    async fn fetch_results(&self, subject_url: &str) -> Result<VideoResults, ApiError> {
        let response = self
            .client
            .post(self.endpoint("transcricao/"))
            .json(&ResultsRequest {
                video_url: subject_url,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        Self::parse_json(response).await
    }

    #[instrument(skip(self, history), fields(history_len = history.len()))]
    async fn answer_text(
        &self,
        question: &str,
        subject_url: &str,
        history: &[HistoryEntry],
    ) -> Result<String, ApiError> {
        let response = self
            .client
            .post(self.endpoint("pergunta/"))
            .query(&[("pergunta", question)])
            .json(&AnswerRequest {
                video_url: subject_url,
                chat_history: history,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        Ok(extract_answer(Self::parse_json(response).await?))
    }

    #[instrument(skip(self, audio), fields(audio_bytes = audio.data.len()))]
    async fn answer_voice(
        &self,
        audio: &AudioPayload,
        subject_url: &str,
    ) -> Result<String, ApiError> {
        debug!("Uploading voice question ({} bytes)", audio.data.len());

        let part = reqwest::multipart::Part::bytes(audio.data.clone())
            .file_name(audio.file_name)
            .mime_str(audio.mime)?;
        let form = reqwest::multipart::Form::new()
            .part("audio", part)
            .text("video_url", subject_url.to_string());

        let response = self
            .client
            .post(self.endpoint("pergunta_audio/"))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        Ok(extract_answer(Self::parse_json(response).await?))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_reply_with_task_id_starts_polling() {
        let json = r#"{"message": "Transcription started.", "task_id": "T42"}"#;
        let raw: SubmitResponse = serde_json::from_str(json).expect("Failed to deserialize");
        match raw.into_outcome().expect("Failed to convert") {
            SubmitOutcome::Started { task_id, message } => {
                assert_eq!(task_id, "T42");
                assert_eq!(message, "Transcription started.");
            }
            other => panic!("Expected Started, got {:?}", other),
        }
    }

    #[test]
    fn test_submit_reply_with_results_is_cached() {
        let json = r#"{
            "message": "Transcription already exists",
            "transcription": "full text",
            "summary": "short text"
        }"#;
        let raw: SubmitResponse = serde_json::from_str(json).expect("Failed to deserialize");
        match raw.into_outcome().expect("Failed to convert") {
            SubmitOutcome::Cached { results, .. } => {
                assert_eq!(results.transcription, "full text");
                assert_eq!(results.summary, "short text");
            }
            other => panic!("Expected Cached, got {:?}", other),
        }
    }

    #[test]
    fn test_submit_reply_missing_both_is_invalid() {
        let json = r#"{"message": "ok"}"#;
        let raw: SubmitResponse = serde_json::from_str(json).expect("Failed to deserialize");
        assert!(matches!(
            raw.into_outcome(),
            Err(ApiError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_job_status_deserialization() {
        let json = r#"{"status": "SUCCESS", "result": "done"}"#;
        let status: JobStatus = serde_json::from_str(json).expect("Failed to deserialize");
        assert_eq!(status.status, JobState::Success);

        let json = r#"{"status": "PENDING"}"#;
        let status: JobStatus = serde_json::from_str(json).expect("Failed to deserialize");
        assert_eq!(status.status, JobState::Pending);
    }

    #[test]
    fn test_unknown_job_state_fails_to_parse() {
        let json = r#"{"status": "RETRYING"}"#;
        assert!(serde_json::from_str::<JobStatus>(json).is_err());
    }

    #[test]
    fn test_history_entry_wire_format() {
        let entry = HistoryEntry {
            kind: HistoryRole::Question,
            text: "What happens at 2:00?".to_string(),
        };
        let json = serde_json::to_string(&entry).expect("Failed to serialize");
        assert!(json.contains(r#""type":"question""#));
        assert!(json.contains("What happens at 2:00?"));
    }

    #[test]
    fn test_extract_answer_prefers_bare_strings() {
        assert_eq!(
            extract_answer(serde_json::json!("plain answer")),
            "plain answer"
        );
        assert_eq!(
            extract_answer(serde_json::json!({"answer": "nested"})),
            r#"{"answer":"nested"}"#
        );
    }
}
