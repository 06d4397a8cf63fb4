//! Batched long-polling scheduler.
//!
//! [`PollState`] is the whole scheduler state machine as plain data: the
//! outgoing queue, the recurring entries, the error counter and the single
//! in-flight slot. [`PollScheduler`] owns one behind a mutex and drives it
//! from a spawned cycle task.
//!
//! # Cycle
//!
//! 1. Due recurring names are appended to the queue and re-armed.
//! 2. A non-empty queue is flushed into one `GET /_/a;b;...`; an empty one
//!    waits one base interval.
//! 3. The request either completes or is aborted by the guard timeout.
//!    Both outcomes consume the same in-flight token; whichever arrives
//!    first wins and the other is ignored.
//! 4. A non-empty body resets the error counter and is dispatched; an empty
//!    body without a `Server` header, or an abort, counts as a failure.
//! 5. Above two failures the next cycle waits `base << (errors - 3)`;
//!    otherwise it starts immediately.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::reply::ReplyHandler;
use super::transport::{PollResponse, PollTransport};
use crate::config::ClientConfig;
use crate::domain::{ErrorCounter, RecurringSet, RequestBatch, RequestQueue};

/// Identifies one issued poll request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InFlightToken(u64);

/// The single outstanding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InFlight {
    /// Token both completion and abort must present.
    pub token: InFlightToken,
    /// Instant the cycle that issued the request started.
    pub started_at: Instant,
}

/// When the next cycle starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextCycle {
    /// Start right away.
    Immediate,
    /// Wait this long first.
    After(Duration),
}

/// Non-empty payload to hand to the reply handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReply {
    /// Response body.
    pub payload: String,
    /// Start instant of the cycle that produced it.
    pub started_at: Instant,
}

/// What completing the in-flight request produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Payload to dispatch, if the body was non-empty.
    pub reply: Option<PendingReply>,
    /// Scheduling of the following cycle.
    pub next: NextCycle,
}

/// Scheduler state: queue, recurring entries, error counter, in-flight slot.
#[derive(Debug)]
pub struct PollState {
    queue: RequestQueue,
    recurring: RecurringSet,
    errors: ErrorCounter,
    in_flight: Option<InFlight>,
    next_token: u64,
    base_interval: Duration,
}

impl PollState {
    /// Creates an idle state with the given backoff base.
    #[must_use]
    pub fn new(base_interval: Duration) -> Self {
        Self {
            queue: RequestQueue::new(),
            recurring: RecurringSet::new(),
            errors: ErrorCounter::new(),
            in_flight: None,
            next_token: 0,
            base_interval,
        }
    }

    /// Enqueues a one-shot request for the next cycle.
    pub fn schedule(&mut self, name: impl Into<String>) {
        self.queue.push(name);
    }

    /// Registers a recurring request, due on the next cycle.
    pub fn schedule_recurring(&mut self, name: impl Into<String>, interval: Duration) {
        self.recurring.register(name, interval);
    }

    /// Removes the first recurring entry named `name`.
    pub fn cancel_recurring(&mut self, name: &str) -> bool {
        self.recurring.cancel(name)
    }

    /// Starts a cycle at `now`.
    ///
    /// Appends due recurring names, then flushes the queue. Returns `None`
    /// when there is nothing to send, or while a request is still in
    /// flight.
    pub fn begin_cycle(&mut self, now: Instant) -> Option<(InFlight, RequestBatch)> {
        if self.in_flight.is_some() {
            return None;
        }
        for name in self.recurring.collect_due(now) {
            self.queue.push(name);
        }
        let batch = self.queue.take_batch()?;

        let in_flight = InFlight {
            token: InFlightToken(self.next_token),
            started_at: now,
        };
        self.next_token = self.next_token.wrapping_add(1);
        self.in_flight = Some(in_flight);
        Some((in_flight, batch))
    }

    /// Completes the request holding `token` with `response`.
    ///
    /// Returns `None` if the token no longer owns the slot (the request was
    /// already aborted).
    pub fn complete(&mut self, token: InFlightToken, response: PollResponse) -> Option<Completion> {
        let in_flight = self.take_in_flight(token)?;

        let reply = if !response.body.is_empty() {
            self.errors.reset();
            Some(PendingReply {
                payload: response.body,
                started_at: in_flight.started_at,
            })
        } else {
            if response.is_failure() {
                self.errors.record_failure();
            }
            None
        };

        Some(Completion {
            reply,
            next: self.next_cycle(),
        })
    }

    /// Aborts the request holding `token` after the guard timeout.
    ///
    /// Returns `None` if the token no longer owns the slot (the request
    /// already completed).
    pub fn abort(&mut self, token: InFlightToken) -> Option<NextCycle> {
        self.take_in_flight(token)?;
        self.errors.record_failure();
        Some(self.next_cycle())
    }

    /// Current consecutive-failure count.
    #[must_use]
    pub fn error_count(&self) -> u8 {
        self.errors.get()
    }

    /// The outstanding request, if any.
    #[must_use]
    pub fn in_flight(&self) -> Option<InFlight> {
        self.in_flight
    }

    /// Number of names waiting for the next cycle.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Backoff base and idle tick interval.
    #[must_use]
    pub fn base_interval(&self) -> Duration {
        self.base_interval
    }

    fn take_in_flight(&mut self, token: InFlightToken) -> Option<InFlight> {
        match self.in_flight {
            Some(current) if current.token == token => self.in_flight.take(),
            _ => None,
        }
    }

    fn next_cycle(&self) -> NextCycle {
        match self.errors.backoff(self.base_interval) {
            Some(delay) => NextCycle::After(delay),
            None => NextCycle::Immediate,
        }
    }
}

/// Handle owning a [`PollState`] and its cycle task.
///
/// `schedule`, `schedule_recurring`, `cancel_recurring`, `start` and `stop`
/// are the only mutators. The state lock is never held across an await.
#[derive(Debug)]
pub struct PollScheduler {
    state: Arc<Mutex<PollState>>,
    request_timeout: Duration,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PollScheduler {
    /// Creates a stopped scheduler.
    #[must_use]
    pub fn new(base_interval: Duration, request_timeout: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            state: Arc::new(Mutex::new(PollState::new(base_interval))),
            request_timeout,
            shutdown,
            task: Mutex::new(None),
        }
    }

    /// Creates a stopped scheduler with the intervals of `config`.
    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.base_interval, config.request_timeout)
    }

    /// Enqueues a one-shot request.
    pub fn schedule(&self, name: impl Into<String>) {
        self.state.lock().schedule(name);
    }

    /// Registers a recurring request.
    pub fn schedule_recurring(&self, name: impl Into<String>, interval: Duration) {
        self.state.lock().schedule_recurring(name, interval);
    }

    /// Removes the first recurring entry named `name`.
    pub fn cancel_recurring(&self, name: &str) -> bool {
        self.state.lock().cancel_recurring(name)
    }

    /// Current consecutive-failure count.
    #[must_use]
    pub fn error_count(&self) -> u8 {
        self.state.lock().error_count()
    }

    /// Returns `true` while the cycle task is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Spawns the cycle task on the current tokio runtime.
    ///
    /// Does nothing if the task is already running.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start<T: PollTransport>(&self, transport: T, handler: Arc<dyn ReplyHandler>) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            tracing::debug!("poll scheduler already running");
            return;
        }
        self.shutdown.send_replace(false);

        let cycle = CycleLoop {
            state: Arc::clone(&self.state),
            transport,
            handler,
            request_timeout: self.request_timeout,
            shutdown: self.shutdown.subscribe(),
        };
        *task = Some(tokio::spawn(cycle.run()));
    }

    /// Stops the cycle task. Any in-flight request is dropped unanswered.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.state.lock().in_flight = None;
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

/// The spawned side of a [`PollScheduler`].
struct CycleLoop<T> {
    state: Arc<Mutex<PollState>>,
    transport: T,
    handler: Arc<dyn ReplyHandler>,
    request_timeout: Duration,
    shutdown: watch::Receiver<bool>,
}

impl<T: PollTransport> CycleLoop<T> {
    async fn run(mut self) {
        tracing::debug!("poll scheduler started");
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            let Some(next) = self.cycle().await else {
                break;
            };
            if let NextCycle::After(delay) = next {
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    _ = self.shutdown.changed() => break,
                }
            }
        }
        tracing::debug!("poll scheduler stopped");
    }

    /// Runs one cycle. Returns `None` when shutdown was requested.
    async fn cycle(&mut self) -> Option<NextCycle> {
        let (begun, base_interval) = {
            let mut state = self.state.lock();
            (state.begin_cycle(Instant::now()), state.base_interval())
        };
        let Some((in_flight, batch)) = begun else {
            return Some(NextCycle::After(base_interval));
        };

        let path = batch.path();
        tracing::debug!(%path, "poll request");

        let next = tokio::select! {
            response = self.transport.fetch(&path) => {
                let completion = self.state.lock().complete(in_flight.token, response);
                match completion {
                    Some(Completion { reply, next }) => {
                        if let Some(reply) = reply {
                            self.handler.on_reply(&reply.payload, Some(reply.started_at));
                        }
                        next
                    }
                    None => NextCycle::Immediate,
                }
            }
            () = tokio::time::sleep(self.request_timeout) => {
                let aborted = self.state.lock().abort(in_flight.token);
                tracing::debug!(%path, timeout = ?self.request_timeout, "poll request aborted");
                aborted.unwrap_or(NextCycle::Immediate)
            }
            _ = self.shutdown.changed() => return None,
        };
        Some(next)
    }
}
