//! Timer and clock source.
//!
//! The client schedules one-shot timers (connect timeout, heart-beat) by id.
//! When a timer elapses the scheduler posts [`ClientEvent::TimerFired`] into
//! the client event channel; cancelling guarantees the event is not posted
//! later. Stale ids that still slip through are ignored by the client.
//!
//! - [`TokioScheduler`]: production; one tokio sleep task per timer, aborted
//!   on cancel.
//! - [`ManualScheduler`]: tests; records timers, never fires on its own.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::events::{ClientEvent, EventSender};

/// Identifier of a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

impl std::fmt::Display for TimerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// Source of one-shot timers and wall-clock time.
pub trait Scheduler: Send {
    /// Post [`ClientEvent::TimerFired`] for `timer` after `delay`.
    fn schedule(&mut self, timer: TimerId, delay: Duration);

    /// Cancel a pending timer. Unknown ids are ignored.
    fn cancel(&mut self, timer: TimerId);

    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;
}

/// Scheduler backed by tokio sleep tasks.
pub struct TokioScheduler {
    events: EventSender,
    runtime: tokio::runtime::Handle,
    tasks: HashMap<TimerId, tokio::task::JoinHandle<()>>,
}

impl std::fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioScheduler")
            .field("pending", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

impl TokioScheduler {
    /// Create a scheduler bound to the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails when called outside a tokio runtime.
    pub fn new(events: EventSender) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .context("TokioScheduler must be created inside a tokio runtime")?;
        Ok(Self {
            events,
            runtime,
            tasks: HashMap::new(),
        })
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, timer: TimerId, delay: Duration) {
        self.tasks.retain(|_, handle| !handle.is_finished());

        let events = self.events.clone();
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(ClientEvent::TimerFired(timer));
        });
        if let Some(previous) = self.tasks.insert(timer, handle) {
            previous.abort();
        }
    }

    fn cancel(&mut self, timer: TimerId) {
        if let Some(handle) = self.tasks.remove(&timer) {
            handle.abort();
        }
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, handle) in self.tasks.drain() {
            handle.abort();
        }
    }
}

/// A timer recorded by [`ManualScheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledTimer {
    /// Timer id to fire.
    pub id: TimerId,
    /// Requested delay.
    pub delay: Duration,
}

#[derive(Debug)]
struct ManualState {
    pending: Vec<ScheduledTimer>,
    cancelled: Vec<TimerId>,
    now: DateTime<Utc>,
}

/// Deterministic scheduler for tests.
///
/// Clones share state, so a test keeps one clone and hands the other to the
/// client. Nothing fires by itself: the test looks up [`Self::pending`] and
/// feeds `ClientEvent::TimerFired(id)` to the client.
#[derive(Debug, Clone)]
pub struct ManualScheduler {
    state: Arc<Mutex<ManualState>>,
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualScheduler {
    /// Scheduler with the clock set to the current time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ManualState {
                pending: Vec::new(),
                cancelled: Vec::new(),
                now: Utc::now(),
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Timers scheduled and not yet cancelled or taken, oldest first.
    #[must_use]
    pub fn pending(&self) -> Vec<ScheduledTimer> {
        self.lock().pending.clone()
    }

    /// Remove and return the oldest pending timer.
    pub fn take_next(&self) -> Option<ScheduledTimer> {
        let mut state = self.lock();
        if state.pending.is_empty() {
            None
        } else {
            Some(state.pending.remove(0))
        }
    }

    /// Every id passed to [`Scheduler::cancel`], in order.
    #[must_use]
    pub fn cancelled(&self) -> Vec<TimerId> {
        self.lock().cancelled.clone()
    }

    /// Pin the clock.
    pub fn set_now(&self, now: DateTime<Utc>) {
        self.lock().now = now;
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&mut self, timer: TimerId, delay: Duration) {
        let mut state = self.lock();
        state.pending.retain(|t| t.id != timer);
        state.pending.push(ScheduledTimer { id: timer, delay });
    }

    fn cancel(&mut self, timer: TimerId) {
        let mut state = self.lock();
        state.pending.retain(|t| t.id != timer);
        state.cancelled.push(timer);
    }

    fn now(&self) -> DateTime<Utc> {
        self.lock().now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event_channel;

    #[test]
    fn test_manual_scheduler_tracks_pending_and_cancelled() {
        let mut scheduler = ManualScheduler::new();
        let observer = scheduler.clone();

        scheduler.schedule(TimerId(1), Duration::from_secs(10));
        scheduler.schedule(TimerId(2), Duration::from_secs(5));
        scheduler.cancel(TimerId(1));

        assert_eq!(
            observer.pending(),
            vec![ScheduledTimer {
                id: TimerId(2),
                delay: Duration::from_secs(5)
            }]
        );
        assert_eq!(observer.cancelled(), vec![TimerId(1)]);
        assert_eq!(observer.take_next().map(|t| t.id), Some(TimerId(2)));
        assert!(observer.take_next().is_none());
    }

    #[test]
    fn test_tokio_scheduler_requires_runtime() {
        let (tx, _rx) = event_channel();
        assert!(TokioScheduler::new(tx).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_scheduler_fires_after_delay() {
        let (tx, mut rx) = event_channel();
        let mut scheduler = TokioScheduler::new(tx).expect("inside runtime");

        scheduler.schedule(TimerId(7), Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(11)).await;

        let event = rx.recv().await.expect("timer event");
        assert_eq!(event, ClientEvent::TimerFired(TimerId(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_scheduler_cancel_suppresses_event() {
        let (tx, mut rx) = event_channel();
        let mut scheduler = TokioScheduler::new(tx).expect("inside runtime");

        scheduler.schedule(TimerId(1), Duration::from_secs(10));
        scheduler.cancel(TimerId(1));
        tokio::time::advance(Duration::from_secs(20)).await;
        tokio::task::yield_now().await;

        assert!(rx.try_recv().is_err());
    }
}
