use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt as _;
use tokio::task::JoinHandle;
use tracing::{Instrument as _, debug, info, warn};

use crate::cancel::CancelWatch;
use crate::config::NormalizerOptions;
use crate::event::AgentEvent;
use crate::model::RunHandle;
use crate::normalize::{RunDedup, normalize};
use crate::progress::{ProgressSink, append_best_effort};
use crate::retry::BackoffPolicy;
use crate::server::{AgentServer, EventStream};

/// Why the consumer stopped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConsumerExit {
    #[default]
    Cancelled,
    RetriesExhausted,
}

/// Counters reported when the consumer stops.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Successful feed opens.
    pub opens: u32,
    /// Reopen attempts made after a failure or disconnect.
    pub reconnects: u32,
    /// Delay slept before each reopen, in order.
    pub backoff_delays: Vec<Duration>,
    pub events: u64,
    pub entries: u64,
    pub exit: ConsumerExit,
}

/// Drains the event feed for one run and persists normalized progress.
///
/// The feed is unbounded and may drop at any time. Disconnects are retried
/// with capped exponential backoff; the retry counter resets whenever an
/// open succeeds. Running out of retries ends the consumer quietly: whether
/// the run is done is decided by the poller alone.
pub struct EventStreamConsumer {
    handle: Arc<RunHandle>,
    server: Arc<dyn AgentServer>,
    sink: Arc<dyn ProgressSink>,
    options: NormalizerOptions,
    backoff: BackoffPolicy,
    connect_timeout: Duration,
}

enum DrainEnd {
    Cancelled,
    Disconnected(String),
}

impl EventStreamConsumer {
    pub fn new(
        handle: Arc<RunHandle>,
        server: Arc<dyn AgentServer>,
        sink: Arc<dyn ProgressSink>,
        options: NormalizerOptions,
        backoff: BackoffPolicy,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            handle,
            server,
            sink,
            options,
            backoff,
            connect_timeout,
        }
    }

    /// Runs the consumer as a background task.
    pub fn spawn(self, cancel: CancelWatch) -> JoinHandle<ConsumerStats> {
        let span = tracing::info_span!(
            "event_consumer",
            run_id = %self.handle.run_id(),
            session_id = %self.handle.session_id()
        );
        tokio::spawn(self.run(cancel).instrument(span))
    }

    pub async fn run(self, mut cancel: CancelWatch) -> ConsumerStats {
        let mut dedup = RunDedup::new();
        let mut stats = ConsumerStats::default();
        let mut attempt = 0_u32;

        loop {
            if cancel.is_cancelled() {
                return self.finish(stats, ConsumerExit::Cancelled);
            }

            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.finish(stats, ConsumerExit::Cancelled),
                opened = tokio::time::timeout(
                    self.connect_timeout,
                    self.server.subscribe_events(self.handle.workspace()),
                ) => opened,
            };

            let reason = match opened {
                Ok(Ok(stream)) => {
                    stats.opens += 1;
                    attempt = 0;
                    debug!(opens = stats.opens, "event feed opened");
                    match self.drain(stream, &mut dedup, &mut cancel, &mut stats).await {
                        DrainEnd::Cancelled => {
                            return self.finish(stats, ConsumerExit::Cancelled);
                        }
                        DrainEnd::Disconnected(reason) => reason,
                    }
                }
                Ok(Err(err)) => err.to_string(),
                Err(_) => format!(
                    "event feed connect timed out after {}ms",
                    self.connect_timeout.as_millis()
                ),
            };

            attempt += 1;
            if !self.backoff.can_retry(attempt) {
                warn!(
                    attempt,
                    reason = %reason,
                    "event feed retries exhausted; no further progress will be streamed"
                );
                return self.finish(stats, ConsumerExit::RetriesExhausted);
            }
            let delay = self.backoff.delay_for_attempt(attempt);
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                reason = %reason,
                "event feed lost; reconnecting"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.finish(stats, ConsumerExit::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            stats.backoff_delays.push(delay);
            stats.reconnects += 1;
        }
    }

    async fn drain(
        &self,
        mut stream: EventStream,
        dedup: &mut RunDedup,
        cancel: &mut CancelWatch,
        stats: &mut ConsumerStats,
    ) -> DrainEnd {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return DrainEnd::Cancelled,
                next = stream.next() => next,
            };
            let raw = match next {
                Some(Ok(raw)) => raw,
                Some(Err(err)) => return DrainEnd::Disconnected(err.to_string()),
                None => return DrainEnd::Disconnected("event feed closed".to_string()),
            };

            stats.events += 1;
            let event = AgentEvent::decode(&raw);
            if let AgentEvent::Unrecognized { event_type } = &event {
                debug!(event_type = %event_type, "ignoring feed event");
            }
            for entry in normalize(&event, &self.handle, &self.options, dedup) {
                // Once teardown starts, a pending write and the rest of the batch are dropped.
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return DrainEnd::Cancelled,
                    _ = append_best_effort(self.sink.as_ref(), entry) => stats.entries += 1,
                }
            }
        }
    }

    fn finish(&self, mut stats: ConsumerStats, exit: ConsumerExit) -> ConsumerStats {
        stats.exit = exit;
        info!(
            exit = ?exit,
            opens = stats.opens,
            reconnects = stats.reconnects,
            events = stats.events,
            entries = stats.entries,
            "event consumer stopped"
        );
        stats
    }
}
