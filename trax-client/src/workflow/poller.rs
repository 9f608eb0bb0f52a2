//! Job status poller
//!
//! # State Progression
//! CREATED → POLLING → FINISHED
//!
//! A fixed-delay timer issues one status request per tick. A failed tick is
//! logged and reported on the event bus; polling continues. The first status
//! at 100 (or with `is_finished`) stops the timer and is returned. There is
//! no implicit deadline: callers stop a poll through the cancellation token
//! or an explicit `max_ticks`.

use crate::error::{ClientError, ClientResult};
use crate::models::{JobStatus, ResourceKind};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use trax_common::config::DEFAULT_POLL_INTERVAL;
use trax_common::events::{EventBus, TraxEvent};

/// Lower bound for the tick interval
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Anything that can report the status of a job
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_status(&self, kind: ResourceKind, job_id: u64) -> ClientResult<JobStatus>;
}

/// Poller settings
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Delay between ticks; the first request is sent one interval after start
    pub interval: Duration,
    /// Give up with [`ClientError::PollExhausted`] after this many ticks (unbounded when `None`)
    pub max_ticks: Option<u32>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_ticks: None,
        }
    }
}

impl PollerConfig {
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }
}

/// Per-job poll state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Created,
    Polling,
    Finished,
}

/// Polls job status until completion
pub struct JobPoller<S: ?Sized> {
    source: Arc<S>,
    config: PollerConfig,
    events: EventBus,
    cancel: CancellationToken,
}

impl<S: StatusSource + ?Sized> JobPoller<S> {
    pub fn new(source: Arc<S>, config: PollerConfig) -> Self {
        Self {
            source,
            config,
            events: EventBus::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Poll `job_id` until its status is complete
    ///
    /// Returns the terminal status record. Errors only on cancellation or
    /// when `max_ticks` is exhausted; individual tick failures are tolerated.
    pub async fn poll(&self, kind: ResourceKind, job_id: u64) -> ClientResult<JobStatus> {
        let mut state = PollState::Created;
        let mut ticker = tokio::time::interval(self.config.interval.max(MIN_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // interval() fires immediately once; the first request waits a full interval
        ticker.tick().await;

        transition(&mut state, PollState::Polling, kind, job_id);
        info!(
            resource = %kind,
            job_id = job_id,
            interval_ms = self.config.interval.as_millis() as u64,
            "Polling job status"
        );

        let mut tick: u32 = 0;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(ClientError::Cancelled(format!("{} {} polling", kind, job_id)));
                }
                _ = ticker.tick() => {}
            }
            tick += 1;

            let result = tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(ClientError::Cancelled(format!("{} {} polling", kind, job_id)));
                }
                result = self.source.fetch_status(kind, job_id) => result,
            };

            match result {
                Ok(status) => {
                    self.events.emit_lossy(TraxEvent::JobProgress {
                        resource: kind.to_string(),
                        job_id,
                        status: status.status,
                        tick,
                        timestamp: Utc::now(),
                    });

                    if status.is_complete() {
                        transition(&mut state, PollState::Finished, kind, job_id);
                        self.events.emit_lossy(TraxEvent::JobFinished {
                            resource: kind.to_string(),
                            job_id,
                            ticks: tick,
                            timestamp: Utc::now(),
                        });
                        info!(resource = %kind, job_id = job_id, ticks = tick, "Job finished");
                        return Ok(status);
                    }

                    debug!(
                        resource = %kind,
                        job_id = job_id,
                        status = status.status,
                        tick = tick,
                        "Job in progress"
                    );
                }
                Err(e) => {
                    warn!(
                        resource = %kind,
                        job_id = job_id,
                        tick = tick,
                        error = %e,
                        "Status poll failed, continuing"
                    );
                    self.events.emit_lossy(TraxEvent::PollFailed {
                        resource: kind.to_string(),
                        job_id,
                        tick,
                        error: e.to_string(),
                        timestamp: Utc::now(),
                    });
                }
            }

            if let Some(max) = self.config.max_ticks {
                if tick >= max {
                    return Err(ClientError::PollExhausted {
                        what: format!("{} {}", kind, job_id),
                        ticks: tick,
                    });
                }
            }
        }
    }
}

fn transition(state: &mut PollState, next: PollState, kind: ResourceKind, job_id: u64) {
    debug!(resource = %kind, job_id = job_id, from = ?*state, to = ?next, "Poll state transition");
    *state = next;
}
