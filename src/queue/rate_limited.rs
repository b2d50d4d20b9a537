//! Priority queue with interval pacing and backend throttle handling.
//!
//! # Design Decisions
//! - The tick task is the only dispatcher; callers just enqueue and wait
//! - Pending order lives in a heap of (priority, seq) slots; cancelled
//!   entries are skipped lazily when popped
//! - Result slots are oneshot senders fulfilled exactly once, by completion,
//!   cancellation or shutdown, whichever comes first

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::{AbortHandle, JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::config::RateLimitConfig;
use crate::error::{panic_message, ClientError, ClientResult};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::queue::request::Request;
use crate::resilience::backoff::calculate_backoff;
use crate::transport::TransportResponse;

/// Deferred transport attempt run when the entry is dispatched.
pub type Job = BoxFuture<'static, ClientResult<TransportResponse>>;

type ResultSlot = oneshot::Sender<ClientResult<TransportResponse>>;

/// A request waiting for dispatch.
pub struct QueueEntry {
    pub request: Request,
    pub attempt: u32,
    pub enqueued_at: Instant,
    seq: u64,
    job: Job,
    result: ResultSlot,
}

impl std::fmt::Debug for QueueEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueEntry")
            .field("request", &self.request)
            .field("attempt", &self.attempt)
            .field("seq", &self.seq)
            .finish()
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Slot {
    priority: i32,
    seq: u64,
    id: Uuid,
}

impl Ord for Slot {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Slot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct InFlight {
    result: Option<ResultSlot>,
    idempotency_key: Option<String>,
    abort: Option<AbortHandle>,
}

#[derive(Default)]
struct QueueState {
    pending: HashMap<Uuid, QueueEntry>,
    order: BinaryHeap<Slot>,
    in_flight: HashMap<Uuid, InFlight>,
    idempotency_keys: HashSet<String>,
    next_seq: u64,
    paused_until: Option<Instant>,
    consecutive_throttles: u32,
    closed: bool,
}

struct QueueInner {
    config: RateLimitConfig,
    state: Mutex<QueueState>,
}

/// Waits for the outcome of one enqueued request.
#[derive(Debug)]
pub struct QueueHandle {
    id: Uuid,
    result: oneshot::Receiver<ClientResult<TransportResponse>>,
}

impl QueueHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn wait(self) -> ClientResult<TransportResponse> {
        self.result.await.unwrap_or(Err(ClientError::Shutdown))
    }
}

/// Admission, ordering and pacing for outbound attempts.
#[derive(Clone)]
pub struct RateLimitedQueue {
    inner: Arc<QueueInner>,
}

impl std::fmt::Debug for RateLimitedQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitedQueue")
            .field("pending", &self.len())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl RateLimitedQueue {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                config,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    /// Admit `request`; `job` runs once the entry is dispatched.
    pub fn enqueue(&self, request: Request, attempt: u32, job: Job) -> ClientResult<QueueHandle> {
        let (tx, rx) = oneshot::channel();
        let id = request.id;
        let depth = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(ClientError::Shutdown);
            }
            if state.pending.len() >= self.inner.config.max_queue_size {
                tracing::warn!(
                    request_id = %id,
                    capacity = self.inner.config.max_queue_size,
                    "Queue full, rejecting request"
                );
                return Err(ClientError::QueueFull {
                    capacity: self.inner.config.max_queue_size,
                });
            }
            if let Some(key) = &request.idempotency_key {
                if !state.idempotency_keys.insert(key.clone()) {
                    return Err(ClientError::DuplicateRequest(key.clone()));
                }
            }

            let seq = state.next_seq;
            state.next_seq += 1;
            state.order.push(Slot {
                priority: request.effective_priority(),
                seq,
                id,
            });
            state.pending.insert(
                id,
                QueueEntry {
                    request,
                    attempt,
                    enqueued_at: Instant::now(),
                    seq,
                    job,
                    result: tx,
                },
            );
            state.pending.len()
        };

        metrics::record_queue_depth(depth);
        tracing::debug!(request_id = %id, attempt, depth, "Request enqueued");
        Ok(QueueHandle { id, result: rx })
    }

    /// Enqueue and wait for the result. Dropping the returned future before
    /// it resolves cancels the entry, so an abandoned request is never sent.
    pub async fn submit(&self, request: Request, attempt: u32, job: Job) -> ClientResult<TransportResponse> {
        let handle = self.enqueue(request, attempt, job)?;
        let mut guard = CancelOnDrop {
            queue: self,
            id: Some(handle.id()),
        };
        let result = handle.wait().await;
        guard.id = None;
        result
    }

    /// Cancel a queued or in-flight request. Its waiter receives `Cancelled`.
    pub fn cancel(&self, id: Uuid) -> bool {
        let mut state = self.inner.state.lock();

        if let Some(entry) = state.pending.remove(&id) {
            if let Some(key) = &entry.request.idempotency_key {
                state.idempotency_keys.remove(key);
            }
            let depth = state.pending.len();
            drop(state);
            let _ = entry.result.send(Err(ClientError::Cancelled));
            metrics::record_queue_depth(depth);
            tracing::debug!(request_id = %id, "Queued request cancelled");
            return true;
        }

        if let Some(mut flight) = state.in_flight.remove(&id) {
            if let Some(key) = &flight.idempotency_key {
                state.idempotency_keys.remove(key);
            }
            drop(state);
            if let Some(abort) = flight.abort.take() {
                abort.abort();
            }
            if let Some(result) = flight.result.take() {
                let _ = result.send(Err(ClientError::Cancelled));
            }
            tracing::debug!(request_id = %id, "In-flight request cancelled locally");
            return true;
        }

        false
    }

    /// Pending (not yet dispatched) entries.
    pub fn len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight(&self) -> usize {
        self.inner.state.lock().in_flight.len()
    }

    /// Time left before dispatch resumes after a throttle signal.
    pub fn pause_remaining(&self) -> Option<Duration> {
        let until = self.inner.state.lock().paused_until?;
        let now = Instant::now();
        (until > now).then(|| until - now)
    }

    /// Spawn the dispatch loop. It exits on shutdown, aborting running jobs
    /// and failing every outstanding entry with `Shutdown`.
    pub fn start(&self, shutdown: Arc<Shutdown>) -> JoinHandle<()> {
        let inner = self.inner.clone();
        let period = Duration::from_millis(inner.config.queue_processing_interval_ms.max(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut running = JoinSet::new();

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for (id, job) in inner.take_dispatchable(Instant::now()) {
                            let task_inner = inner.clone();
                            let abort = running.spawn(async move {
                                let outcome = match AssertUnwindSafe(job).catch_unwind().await {
                                    Ok(outcome) => outcome,
                                    Err(panic) => {
                                        let message = panic_message(panic.as_ref());
                                        tracing::error!(request_id = %id, message = %message, "Dispatched job panicked");
                                        Err(ClientError::Internal(message))
                                    }
                                };
                                task_inner.complete(id, outcome);
                            });
                            inner.attach_abort(id, abort);
                        }
                    }
                    Some(_) = running.join_next(), if !running.is_empty() => {}
                    _ = shutdown.wait() => break,
                }
            }

            running.abort_all();
            inner.close();
            tracing::info!("Request queue stopped");
        })
    }
}

struct CancelOnDrop<'a> {
    queue: &'a RateLimitedQueue,
    id: Option<Uuid>,
}

impl Drop for CancelOnDrop<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            if self.queue.cancel(id) {
                tracing::debug!(request_id = %id, "Waiter dropped, request abandoned");
            }
        }
    }
}

impl QueueInner {
    /// Pop up to one tick's budget of entries, moving their result slots
    /// into the in-flight table.
    fn take_dispatchable(&self, now: Instant) -> Vec<(Uuid, Job)> {
        let mut state = self.state.lock();
        if let Some(until) = state.paused_until {
            if until > now {
                return Vec::new();
            }
            state.paused_until = None;
            tracing::info!("Queue dispatch resumed after throttle pause");
        }

        let budget = self.config.requests_per_interval as usize;
        let mut jobs = Vec::with_capacity(budget.min(state.pending.len()));
        while jobs.len() < budget {
            let Some(slot) = state.order.pop() else { break };
            let Some(entry) = state.pending.remove(&slot.id) else { continue };

            tracing::debug!(
                request_id = %slot.id,
                target = %entry.request.target,
                attempt = entry.attempt,
                waited_ms = now.saturating_duration_since(entry.enqueued_at).as_millis() as u64,
                "Dispatching request"
            );
            state.in_flight.insert(
                slot.id,
                InFlight {
                    result: Some(entry.result),
                    idempotency_key: entry.request.idempotency_key,
                    abort: None,
                },
            );
            jobs.push((slot.id, entry.job));
        }

        if !jobs.is_empty() {
            metrics::record_queue_depth(state.pending.len());
        }
        jobs
    }

    fn attach_abort(&self, id: Uuid, abort: AbortHandle) {
        if let Some(flight) = self.state.lock().in_flight.get_mut(&id) {
            flight.abort = Some(abort);
        }
    }

    fn complete(&self, id: Uuid, outcome: ClientResult<TransportResponse>) {
        let throttle = match &outcome {
            Ok(response) if response.status == 429 => Some(response.retry_after_ms()),
            Err(ClientError::RateLimited { retry_after_ms }) => Some(*retry_after_ms),
            _ => None,
        };

        let slot = {
            let mut state = self.state.lock();
            match throttle {
                Some(retry_after_ms) => self.pause(&mut state, retry_after_ms),
                None if outcome.is_ok() => state.consecutive_throttles = 0,
                None => {}
            }
            let flight = state.in_flight.remove(&id);
            if let Some(key) = flight.as_ref().and_then(|f| f.idempotency_key.as_ref()) {
                state.idempotency_keys.remove(key);
            }
            flight.and_then(|f| f.result)
        };

        if let Some(result) = slot {
            let _ = result.send(outcome);
        }
    }

    fn pause(&self, state: &mut QueueState, retry_after_ms: Option<u64>) {
        state.consecutive_throttles = state.consecutive_throttles.saturating_add(1);
        let floor = self.config.default_backoff_ms;
        let pause_ms = match retry_after_ms {
            Some(signaled) => signaled.max(floor),
            None => {
                let backoff = calculate_backoff(state.consecutive_throttles, floor, self.config.max_backoff_ms);
                (backoff.as_millis() as u64).max(floor)
            }
        };

        let until = Instant::now() + Duration::from_millis(pause_ms);
        if state.paused_until.map_or(true, |current| until > current) {
            state.paused_until = Some(until);
        }
        tracing::warn!(
            pause_ms,
            consecutive = state.consecutive_throttles,
            "Backend throttled, pausing dispatch"
        );
    }

    fn close(&self) {
        let (pending, in_flight) = {
            let mut state = self.state.lock();
            state.closed = true;
            state.order.clear();
            state.idempotency_keys.clear();
            let pending: Vec<QueueEntry> = state.pending.drain().map(|(_, e)| e).collect();
            let in_flight: Vec<InFlight> = state.in_flight.drain().map(|(_, f)| f).collect();
            (pending, in_flight)
        };

        for entry in pending {
            let _ = entry.result.send(Err(ClientError::Shutdown));
        }
        for flight in in_flight {
            if let Some(result) = flight.result {
                let _ = result.send(Err(ClientError::Shutdown));
            }
        }
        metrics::record_queue_depth(0);
    }
}
