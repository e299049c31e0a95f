//! Transcription job polling
//!
//! Tracks at most one queued transcription job, checking its status on a
//! fixed cadence until it reaches a terminal state. Submitting a new video
//! cancels the previous loop before arming the next one, so two loops can
//! never race.

use crate::backend::{Backend, JobState, SubmitOutcome, VideoResults};
use crate::error::ApiError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Time between status checks
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Status shown while a job is failing or failed
const JOB_FAILED_MESSAGE: &str = "Error processing the transcription.";

/// Status shown when a single status check could not be completed
const CHECK_FAILED_MESSAGE: &str = "Error checking task status.";

/// Events emitted by the poll loop
#[derive(Debug)]
pub enum PollEvent {
    /// The job reached `SUCCESS`; results can be fetched for this video.
    JobCompleted { subject_url: String },
    /// The job reached `FAILURE`, or its status became unreadable.
    JobFailed { message: String },
    /// One status check failed; the loop keeps going.
    CheckFailed { message: String },
}

/// Outcome of submitting a video
#[derive(Debug)]
pub enum Submission {
    /// Results already existed; nothing was queued and no polling starts.
    Cached {
        message: String,
        results: VideoResults,
    },
    /// A job was queued and the poll loop is armed.
    Accepted { message: String },
}

/// The one job currently being polled
struct ActiveTask {
    task_id: String,
    handle: JoinHandle<()>,
}

/// Owns the lifecycle of the in-flight transcription job
pub struct TaskPoller {
    backend: Arc<dyn Backend>,
    events: mpsc::UnboundedSender<PollEvent>,
    active: Option<ActiveTask>,
}

impl TaskPoller {
    pub fn new(backend: Arc<dyn Backend>, events: mpsc::UnboundedSender<PollEvent>) -> Self {
        Self {
            backend,
            events,
            active: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Submit a video for transcription, superseding any job in flight.
    ///
    /// A cached result is returned as-is and no polling begins; otherwise
    /// the poll loop is armed for the returned task id.
    pub async fn submit(
        &mut self,
        subject_url: &str,
        client_id: &str,
    ) -> Result<Submission, ApiError> {
        self.cancel();

        match self.backend.submit_job(subject_url, client_id).await? {
            SubmitOutcome::Cached { message, results } => {
                info!("Results already available for {}", subject_url);
                Ok(Submission::Cached { message, results })
            }
            SubmitOutcome::Started { message, task_id } => {
                info!("Transcription task {} queued for {}", task_id, subject_url);
                let handle = self.spawn_poll_loop(task_id.clone(), subject_url.to_string());
                self.active = Some(ActiveTask { task_id, handle });
                Ok(Submission::Accepted { message })
            }
        }
    }

    /// Stop polling and drop the active task without emitting a signal.
    pub fn cancel(&mut self) {
        if let Some(task) = self.active.take() {
            task.handle.abort();
            debug!("Stopped polling task {}", task.task_id);
        }
    }

    fn spawn_poll_loop(&self, task_id: String, subject_url: String) -> JoinHandle<()> {
        let backend = self.backend.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            // First check one full interval after submission; the submit
            // reply itself proves the job was only just queued.
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + POLL_INTERVAL, POLL_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                interval.tick().await;

                match backend.job_status(&task_id).await {
                    Ok(status) => match status.status {
                        JobState::Pending => {
                            debug!("Task {} still pending", task_id);
                        }
                        JobState::Success => {
                            info!("Task {} completed", task_id);
                            let _ = events.send(PollEvent::JobCompleted {
                                subject_url: subject_url.clone(),
                            });
                            break;
                        }
                        JobState::Failure => {
                            let detail = status
                                .result
                                .map(|v| v.to_string())
                                .unwrap_or_default();
                            error!("Task {} failed: {}", task_id, detail);
                            let _ = events.send(PollEvent::JobFailed {
                                message: JOB_FAILED_MESSAGE.to_string(),
                            });
                            break;
                        }
                    },
                    Err(e) if e.is_transient() => {
                        // One failed check; the next tick retries.
                        warn!("Status check for task {} failed: {}", task_id, e);
                        let _ = events.send(PollEvent::CheckFailed {
                            message: CHECK_FAILED_MESSAGE.to_string(),
                        });
                    }
                    Err(e) => {
                        // The status itself is unreadable; polling again
                        // risks the same malformed reply forever.
                        error!("Malformed status for task {}: {}", task_id, e);
                        let _ = events.send(PollEvent::JobFailed {
                            message: JOB_FAILED_MESSAGE.to_string(),
                        });
                        break;
                    }
                }
            }
        })
    }
}

impl Drop for TaskPoller {
    fn drop(&mut self) {
        self.cancel();
    }
}
