//! Conversation state for one video
//!
//! Ordered log of question/answer turns, capped at the most recent
//! [`TURN_CAP`] entries. Questions are resolved asynchronously against the
//! backend; each resolution is tagged with the id of the question it
//! targets, and replies whose target has since been deleted, edited away,
//! or wiped by a video change are discarded instead of appended as
//! orphaned answers.

use crate::audio::AudioPayload;
use crate::backend::{Backend, HistoryEntry, HistoryRole};
use crate::error::ApiError;
use chrono::{DateTime, Local};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Maximum number of turns kept; the oldest are dropped past this.
pub const TURN_CAP: usize = 10;

/// Content shown in place of an answer when resolution failed
pub const ANSWER_ERROR_MARKER: &str = "Error processing the question.";

/// Display label for recorded questions
pub const VOICE_QUESTION_LABEL: &str = "Voice message";

/// Kind of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnKind {
    Question,
    Answer,
}

/// Per-answer feedback tag; last write wins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feedback {
    Positive,
    Negative,
}

/// One entry in the conversation
#[derive(Debug, Clone)]
pub struct ChatTurn {
    /// Identity used to match asynchronous answers to their question. An
    /// edit assigns a fresh id, which is what invalidates in-flight replies
    /// for the old text.
    pub id: u64,
    pub kind: TurnKind,
    pub content: String,
    pub audio: Option<AudioPayload>,
    /// Set on answer turns holding an error marker instead of an answer
    pub error: bool,
    pub feedback: Option<Feedback>,
    pub at: DateTime<Local>,
}

/// Completed answer resolution, reported back over the event channel
#[derive(Debug)]
pub struct AnswerEvent {
    pub question_id: u64,
    pub result: Result<String, ApiError>,
}

/// Conversation operation errors
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("No video is active")]
    NoActiveVideo,

    #[error("No turn at index {0}")]
    OutOfBounds(usize),

    #[error("Turn {0} is not a question")]
    NotAQuestion(usize),

    #[error("Turn {0} is not an answer")]
    NotAnAnswer(usize),

    #[error("Voice questions cannot be edited")]
    VoiceQuestionNotEditable,
}

/// Ordered, mutable conversation log for the active video
pub struct Conversation {
    backend: Arc<dyn Backend>,
    events: mpsc::UnboundedSender<AnswerEvent>,
    subject_url: Option<String>,
    turns: Vec<ChatTurn>,
    next_id: u64,
}

impl Conversation {
    pub fn new(backend: Arc<dyn Backend>, events: mpsc::UnboundedSender<AnswerEvent>) -> Self {
        Self {
            backend,
            events,
            subject_url: None,
            turns: Vec::new(),
            next_id: 0,
        }
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    /// Wipe all turns and re-key the conversation to a new video.
    ///
    /// Replies still in flight for the old video are orphaned by the wipe
    /// and will be discarded on arrival.
    pub fn reset(&mut self, subject_url: &str) {
        self.turns.clear();
        self.subject_url = Some(subject_url.to_string());
        debug!("Conversation reset for {}", subject_url);
    }

    /// Append a typed question and dispatch its resolution.
    pub fn ask_text(&mut self, question: &str) -> Result<(), ChatError> {
        if self.subject_url.is_none() {
            return Err(ChatError::NoActiveVideo);
        }

        let id = self.push_question(question.to_string(), None);
        self.dispatch(id, true);
        Ok(())
    }

    /// Append a recorded voice question and dispatch its resolution.
    pub fn ask_voice(&mut self, audio: AudioPayload) -> Result<(), ChatError> {
        if self.subject_url.is_none() {
            return Err(ChatError::NoActiveVideo);
        }

        let id = self.push_question(VOICE_QUESTION_LABEL.to_string(), Some(audio));
        self.dispatch(id, true);
        Ok(())
    }

    /// Rewrite a typed question and regenerate everything after it.
    ///
    /// Later turns are discarded because their answers depended on the old
    /// text. The edited turn gets a fresh id, so replies still in flight
    /// for the previous text are dropped as stale.
    pub fn edit(&mut self, index: usize, new_text: &str) -> Result<(), ChatError> {
        let turn = self
            .turns
            .get(index)
            .ok_or(ChatError::OutOfBounds(index))?;
        if turn.kind != TurnKind::Question {
            return Err(ChatError::NotAQuestion(index));
        }
        if turn.audio.is_some() {
            return Err(ChatError::VoiceQuestionNotEditable);
        }

        self.turns.truncate(index + 1);
        let id = self.fresh_id();
        let turn = &mut self.turns[index];
        turn.id = id;
        turn.content = new_text.to_string();
        turn.at = Local::now();

        self.dispatch(id, true);
        Ok(())
    }

    /// Re-resolve the question at `index` with its original content and the
    /// history strictly before it. The question itself is not duplicated.
    pub fn retry(&mut self, index: usize) -> Result<(), ChatError> {
        let turn = self
            .turns
            .get(index)
            .ok_or(ChatError::OutOfBounds(index))?;
        if turn.kind != TurnKind::Question {
            return Err(ChatError::NotAQuestion(index));
        }

        self.dispatch(turn.id, false);
        Ok(())
    }

    /// Delete the turn at `index`; no other turn is affected.
    pub fn remove(&mut self, index: usize) -> Result<(), ChatError> {
        if index >= self.turns.len() {
            return Err(ChatError::OutOfBounds(index));
        }
        self.turns.remove(index);
        Ok(())
    }

    /// Tag an answer turn with feedback. Repeated calls overwrite.
    pub fn set_feedback(&mut self, index: usize, feedback: Feedback) -> Result<(), ChatError> {
        let turn = self
            .turns
            .get_mut(index)
            .ok_or(ChatError::OutOfBounds(index))?;
        if turn.kind != TurnKind::Answer {
            return Err(ChatError::NotAnAnswer(index));
        }
        turn.feedback = Some(feedback);
        Ok(())
    }

    /// Place a resolved answer after the question it targets.
    ///
    /// An existing answer for that question (for example an error marker
    /// being retried) is replaced; a reply whose question is gone is
    /// discarded.
    pub fn apply(&mut self, event: AnswerEvent) {
        let Some(pos) = self
            .turns
            .iter()
            .position(|t| t.kind == TurnKind::Question && t.id == event.question_id)
        else {
            debug!("Discarding stale answer for question {}", event.question_id);
            return;
        };

        let (content, error) = match event.result {
            Ok(answer) => (answer, false),
            Err(e) => {
                warn!("Failed to answer question: {}", e);
                (ANSWER_ERROR_MARKER.to_string(), true)
            }
        };

        let answer = ChatTurn {
            id: self.fresh_id(),
            kind: TurnKind::Answer,
            content,
            audio: None,
            error,
            feedback: None,
            at: Local::now(),
        };

        let has_answer = self
            .turns
            .get(pos + 1)
            .is_some_and(|next| next.kind == TurnKind::Answer);
        if has_answer {
            self.turns[pos + 1] = answer;
        } else {
            self.turns.insert(pos + 1, answer);
        }
        self.enforce_cap();
    }

    fn push_question(&mut self, content: String, audio: Option<AudioPayload>) -> u64 {
        let id = self.fresh_id();
        self.turns.push(ChatTurn {
            id,
            kind: TurnKind::Question,
            content,
            audio,
            error: false,
            feedback: None,
            at: Local::now(),
        });
        self.enforce_cap();
        id
    }

    fn fresh_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn enforce_cap(&mut self) {
        while self.turns.len() > TURN_CAP {
            self.turns.remove(0);
        }
    }

    /// Spawn the backend call resolving the question with id `question_id`.
    ///
    /// A fresh or edited question carries the history up to and including
    /// itself; a retry carries the history strictly before the turn, which
    /// in particular excludes the turn's own prior answer. The voice
    /// endpoint takes only the recording.
    fn dispatch(&self, question_id: u64, include_question: bool) {
        let Some(pos) = self
            .turns
            .iter()
            .position(|t| t.kind == TurnKind::Question && t.id == question_id)
        else {
            return;
        };
        let Some(subject_url) = self.subject_url.clone() else {
            return;
        };

        let turn = &self.turns[pos];
        let question = turn.content.clone();
        let audio = turn.audio.clone();
        let end = if include_question { pos + 1 } else { pos };
        let history: Vec<HistoryEntry> = self.turns[..end]
            .iter()
            .map(|t| HistoryEntry {
                kind: match t.kind {
                    TurnKind::Question => HistoryRole::Question,
                    TurnKind::Answer => HistoryRole::Answer,
                },
                text: t.content.clone(),
            })
            .collect();

        let backend = self.backend.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = match audio {
                Some(payload) => backend.answer_voice(&payload, &subject_url).await,
                None => backend.answer_text(&question, &subject_url, &history).await,
            };
            let _ = events.send(AnswerEvent {
                question_id,
                result,
            });
        });
    }
}
