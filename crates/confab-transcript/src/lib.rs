//! Conversation turn model and transcript aggregation.
//!
//! Turns a stream of incremental transcript events into finalized
//! conversation turns. At most one assistant turn streams at a time; it is
//! promoted to a completed turn (or discarded) when a completion or
//! interruption event arrives. Completed turns are immutable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of turns exposed in the recent window.
pub const RECENT_WINDOW: usize = 8;

/// Full-history length beyond which a trim is triggered.
pub const HISTORY_TRIM_THRESHOLD: usize = 20;

/// Number of most-recent turns retained by a trim.
pub const HISTORY_TRIM_RETAIN: usize = 12;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One complete utterance by either party. Immutable once `complete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub complete: bool,
}

impl ConversationTurn {
    fn completed(role: Role, text: String) -> Self {
        Self {
            role,
            text,
            created_at: Utc::now(),
            complete: true,
        }
    }
}

/// A not-yet-finalized assistant utterance being assembled from deltas.
#[derive(Debug, Clone)]
struct StreamingTurn {
    text: String,
}

/// Outcome of applying an assistant delta, so observers can skip
/// re-rendering when a redundant delivery changed nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOutcome {
    Applied,
    Duplicate,
}

/// Aggregates transcript events for one session.
///
/// Guarantees: turn order reflects arrival order of completion events, no
/// turn mutates after completion, and the recent window is always the
/// suffix of the (periodically trimmed) full history.
#[derive(Debug, Default)]
pub struct TranscriptLog {
    history: Vec<ConversationTurn>,
    streaming: Option<StreamingTurn>,
}

impl TranscriptLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a completed user transcript. Any in-progress streaming
    /// assistant content is discarded first: a user utterance always
    /// interrupts a pending assistant response display.
    pub fn user_completed(&mut self, transcript: &str) -> &ConversationTurn {
        self.streaming = None;
        self.push(ConversationTurn::completed(Role::User, transcript.to_owned()));
        self.history.last().expect("turn was just appended")
    }

    /// Applies an incremental assistant transcript delta.
    ///
    /// Starts a streaming turn when none is active. Deltas arrive in two
    /// shapes: true increments (appended) and cumulative replays carrying
    /// the whole text so far (they replace the accumulated text, so a
    /// redundant delivery changes nothing).
    pub fn assistant_delta(&mut self, delta: &str) -> DeltaOutcome {
        match self.streaming.as_mut() {
            None => {
                self.streaming = Some(StreamingTurn {
                    text: delta.to_owned(),
                });
                DeltaOutcome::Applied
            }
            Some(streaming) if streaming.text == delta => DeltaOutcome::Duplicate,
            Some(streaming) if delta.starts_with(&streaming.text) => {
                streaming.text = delta.to_owned();
                DeltaOutcome::Applied
            }
            Some(streaming) => {
                streaming.text.push_str(delta);
                DeltaOutcome::Applied
            }
        }
    }

    /// Finalizes the assistant's streaming turn.
    ///
    /// Prefers the event's carried full transcript over the accumulated
    /// text. Empty content produces no turn. The streaming turn is cleared
    /// either way.
    pub fn assistant_done(&mut self, transcript: Option<&str>) -> Option<&ConversationTurn> {
        let accumulated = self.streaming.take().map(|s| s.text);
        let text = match transcript {
            Some(t) if !t.is_empty() => t.to_owned(),
            _ => accumulated.unwrap_or_default(),
        };
        if text.is_empty() {
            return None;
        }
        self.push(ConversationTurn::completed(Role::Assistant, text));
        self.history.last()
    }

    /// Clears the streaming turn without emitting anything. Covers barge-in
    /// (`speech_started`) and end-of-turn with no content (`response_done`).
    pub fn interrupt(&mut self) {
        self.streaming = None;
    }

    /// Empties the full history, the recent window, and any in-flight
    /// streaming turn.
    pub fn clear(&mut self) {
        self.history.clear();
        self.streaming = None;
    }

    /// The full (trimmed) history, oldest first.
    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    /// The recent window: the last [`RECENT_WINDOW`] turns of the history.
    pub fn recent(&self) -> &[ConversationTurn] {
        let start = self.history.len().saturating_sub(RECENT_WINDOW);
        &self.history[start..]
    }

    /// The accumulated text of the live streaming turn, if any.
    pub fn streaming_text(&self) -> Option<&str> {
        self.streaming.as_ref().map(|s| s.text.as_str())
    }

    fn push(&mut self, turn: ConversationTurn) {
        self.history.push(turn);
        if self.history.len() > HISTORY_TRIM_THRESHOLD {
            let excess = self.history.len() - HISTORY_TRIM_RETAIN;
            self.history.drain(..excess);
        }
    }
}
