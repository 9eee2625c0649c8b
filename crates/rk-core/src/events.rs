//! Progress events and the broadcast event bus.
//!
//! Long-running steps report [`ProgressEvent`]s to a [`ProgressReporter`].
//! [`EventBus`] is the reporter used by front ends: it wraps a
//! `tokio::sync::broadcast` channel with a bounded ring-buffer of recent
//! events so that late subscribers can catch up.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::ids::FileId;

/// Maximum number of events retained in the ring buffer.
const MAX_RECENT_EVENTS: usize = 100;

// ---------------------------------------------------------------------------
// ProgressEvent
// ---------------------------------------------------------------------------

/// Lifecycle status carried by a [`ProgressEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Processing,
    Completed,
    Failed,
}

impl ProgressStatus {
    /// Whether no further events follow for the same step.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Processing)
    }
}

/// Encoder counters attached to compression progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubProgress {
    /// Frames encoded so far.
    pub frames: Option<u64>,
    /// Instantaneous encode rate in frames per second.
    pub fps: Option<f64>,
    /// Encode speed as a multiple of real time (ffmpeg's `speed=1.5x`).
    pub speed: Option<f64>,
}

/// One progress report for one step of one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub file_id: FileId,
    pub step_name: String,
    /// 0.0 -- 100.0
    pub percent: f32,
    pub status: ProgressStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_progress: Option<SubProgress>,
}

impl ProgressEvent {
    /// The event emitted when a step begins.
    pub fn started(file_id: FileId, step_name: impl Into<String>) -> Self {
        Self {
            file_id,
            step_name: step_name.into(),
            percent: 0.0,
            status: ProgressStatus::Processing,
            sub_progress: None,
        }
    }

    /// An intermediate event; `percent` is clamped below 100 so that only the
    /// terminal event ever reports completion.
    pub fn processing(
        file_id: FileId,
        step_name: impl Into<String>,
        percent: f32,
        sub_progress: Option<SubProgress>,
    ) -> Self {
        Self {
            file_id,
            step_name: step_name.into(),
            percent: percent.clamp(0.0, 99.0),
            status: ProgressStatus::Processing,
            sub_progress,
        }
    }

    /// The terminal event for a successful step.
    pub fn completed(file_id: FileId, step_name: impl Into<String>) -> Self {
        Self {
            file_id,
            step_name: step_name.into(),
            percent: 100.0,
            status: ProgressStatus::Completed,
            sub_progress: None,
        }
    }

    /// The terminal event for a failed step.
    pub fn failed(file_id: FileId, step_name: impl Into<String>, percent: f32) -> Self {
        Self {
            file_id,
            step_name: step_name.into(),
            percent: percent.clamp(0.0, 100.0),
            status: ProgressStatus::Failed,
            sub_progress: None,
        }
    }
}

/// A sink for [`ProgressEvent`]s.
///
/// Called from arbitrary worker threads, possibly concurrently for several
/// files. Implementations must return quickly and must not block.
pub trait ProgressReporter: Send + Sync {
    fn on_progress(&self, event: ProgressEvent);
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// A timestamped progress event ready for broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier.
    pub id: Uuid,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub progress: ProgressEvent,
}

impl Event {
    /// Create a new event with a fresh UUID and the current timestamp.
    pub fn new(progress: ProgressEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            progress,
        }
    }
}

/// Broadcast channel with a bounded ring buffer of recent events.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    recent: RwLock<VecDeque<Event>>,
}

impl EventBus {
    /// Create a new event bus.
    ///
    /// `capacity` controls the broadcast channel buffer size (not the ring
    /// buffer, which is always [`MAX_RECENT_EVENTS`]).
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            recent: RwLock::new(VecDeque::with_capacity(MAX_RECENT_EVENTS)),
        }
    }

    /// Subscribe to the broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Broadcast an event to all current subscribers and store it in the
    /// ring buffer.
    pub fn broadcast(&self, progress: ProgressEvent) {
        let event = Event::new(progress);

        {
            let mut recent = self.recent.write();
            if recent.len() >= MAX_RECENT_EVENTS {
                recent.pop_back();
            }
            recent.push_front(event.clone());
        }

        // Ignore send errors (no subscribers).
        let _ = self.tx.send(event);
    }

    /// Return the `n` most recent events (newest first).
    pub fn recent_events(&self, n: usize) -> Vec<Event> {
        let recent = self.recent.read();
        recent.iter().take(n).cloned().collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ProgressReporter for EventBus {
    fn on_progress(&self, event: ProgressEvent) {
        self.broadcast(event);
    }
}
