//! Workflow event types and the event bus
//!
//! The poller and the workflow orchestrator report progress through an
//! [`EventBus`]. Subscribers (the CLI, tests) receive every event emitted
//! after they subscribe. Emitting with no subscribers is not an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Workflow pipeline stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStage {
    Upload,
    PreAnalysis,
    PreAnalysisPolling,
    AnnotationDownload,
    Merge,
    Configuration,
    Separation,
    SeparationPolling,
    Download,
}

impl WorkflowStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStage::Upload => "upload",
            WorkflowStage::PreAnalysis => "preanalysis",
            WorkflowStage::PreAnalysisPolling => "preanalysis_polling",
            WorkflowStage::AnnotationDownload => "annotation_download",
            WorkflowStage::Merge => "merge",
            WorkflowStage::Configuration => "configuration",
            WorkflowStage::Separation => "separation",
            WorkflowStage::SeparationPolling => "separation_polling",
            WorkflowStage::Download => "download",
        }
    }
}

impl std::fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// trax event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TraxEvent {
    /// A workflow stage started
    StageStarted {
        stage: WorkflowStage,
        timestamp: DateTime<Utc>,
    },

    /// A workflow stage completed; `detail` names the produced id or artifact
    StageCompleted {
        stage: WorkflowStage,
        detail: String,
        timestamp: DateTime<Utc>,
    },

    /// A workflow stage failed
    StageFailed {
        stage: WorkflowStage,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// One status poll returned
    JobProgress {
        /// `preanalysis` or `separation`
        resource: String,
        job_id: u64,
        status: u8,
        tick: u32,
        timestamp: DateTime<Utc>,
    },

    /// One status poll failed; polling continues
    PollFailed {
        resource: String,
        job_id: u64,
        tick: u32,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A job reached its terminal state
    JobFinished {
        resource: String,
        job_id: u64,
        ticks: u32,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus for [`TraxEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TraxEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<TraxEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: TraxEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
