//! Bounded-concurrency job queue with two priority tiers.
//!
//! Jobs are keyed. Enqueuing a key that is already queued, running or
//! recently finished returns the existing handle instead of starting new
//! work; a `High` request for a queued `Normal` job moves it up. Within a
//! tier jobs start in FIFO order. A job still waiting for a slot after
//! [`QueueConfig::queue_timeout`] resolves to [`QueueError::TimedOut`]
//! without running.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use coffer_store::flight::{Flight, SingleFlight};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Default time a job may wait for a slot.
pub const DEFAULT_QUEUE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Finished jobs remembered for idempotent re-entry.
pub const DEFAULT_RESULT_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Normal,
    High,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Job waited longer than the queue timeout")]
    TimedOut,
    #[error("Job was dropped before it finished")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub name: &'static str,
    pub concurrency: usize,
    pub queue_timeout: Duration,
    pub result_capacity: usize,
}

impl QueueConfig {
    pub fn attachments() -> Self {
        Self {
            name: "attachments",
            concurrency: 3,
            ..Self::default()
        }
    }

    /// Whole sticker packs run one at a time.
    pub fn sticker_packs() -> Self {
        Self {
            name: "sticker-packs",
            concurrency: 1,
            ..Self::default()
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "default",
            concurrency: 3,
            queue_timeout: DEFAULT_QUEUE_TIMEOUT,
            result_capacity: DEFAULT_RESULT_CAPACITY,
        }
    }
}

pub type JobResult<T> = Result<T, QueueError>;

pub struct AcquisitionQueue<T: Clone> {
    slots: Arc<Slots>,
    flights: SingleFlight<String, JobResult<T>>,
}

impl<T> AcquisitionQueue<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(config: QueueConfig) -> Self {
        let flights = SingleFlight::new(config.result_capacity);
        Self {
            slots: Arc::new(Slots::new(config)),
            flights,
        }
    }

    /// Queue `job` under `key`, or join the job already known for it.
    ///
    /// `job` is only called when a new job is created. The job runs on its
    /// own task, so dropping the returned handle does not cancel it.
    pub fn enqueue<F, Fut>(&self, key: &str, priority: Priority, job: F) -> Flight<JobResult<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (flight, started) = self.flights.get_or_start(key.to_string(), || {
            let slots = Arc::clone(&self.slots);
            let ticket = slots.register(key, priority);
            let work = job();
            let handle = tokio::spawn(async move { slots.run(ticket, work).await });
            async move { handle.await.unwrap_or(Err(QueueError::Closed)) }
        });

        if !started && priority == Priority::High {
            self.slots.promote(key);
        }
        flight
    }

    /// Forget a finished job so the next enqueue runs it again.
    pub fn forget(&self, key: &str, flight: &Flight<JobResult<T>>) {
        self.flights.forget(&key.to_string(), flight);
    }

    pub fn running(&self) -> usize {
        self.slots.lock().running
    }

    pub fn waiting(&self) -> usize {
        let state = self.slots.lock();
        state.high.len() + state.normal.len()
    }

    pub fn config(&self) -> &QueueConfig {
        &self.slots.config
    }
}

struct Waiter {
    id: u64,
    key: String,
    tx: oneshot::Sender<()>,
}

struct SlotState {
    running: usize,
    high: VecDeque<Waiter>,
    normal: VecDeque<Waiter>,
}

struct Slots {
    config: QueueConfig,
    next_id: AtomicU64,
    state: Mutex<SlotState>,
}

struct Ticket {
    id: u64,
    key: String,
    /// `None` when a slot was free at registration.
    wait: Option<oneshot::Receiver<()>>,
}

/// Gives the slot back when the job ends, even by panic.
struct SlotGuard<'a>(&'a Slots);

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

impl Slots {
    fn new(config: QueueConfig) -> Self {
        Self {
            config,
            next_id: AtomicU64::new(0),
            state: Mutex::new(SlotState {
                running: 0,
                high: VecDeque::new(),
                normal: VecDeque::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn register(&self, key: &str, priority: Priority) -> Ticket {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();

        if state.running < self.config.concurrency.max(1) {
            state.running += 1;
            return Ticket {
                id,
                key: key.to_string(),
                wait: None,
            };
        }

        let (tx, rx) = oneshot::channel();
        let waiter = Waiter {
            id,
            key: key.to_string(),
            tx,
        };
        match priority {
            Priority::High => state.high.push_back(waiter),
            Priority::Normal => state.normal.push_back(waiter),
        }
        debug!(
            queue = self.config.name,
            key = %key,
            ?priority,
            waiting = state.high.len() + state.normal.len(),
            "job queued"
        );
        Ticket {
            id,
            key: key.to_string(),
            wait: Some(rx),
        }
    }

    async fn run<Fut: Future>(&self, ticket: Ticket, work: Fut) -> JobResult<Fut::Output> {
        if let Some(wait) = ticket.wait {
            match tokio::time::timeout(self.config.queue_timeout, wait).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => return Err(QueueError::Closed),
                Err(_) => {
                    self.abandon(ticket.id);
                    warn!(queue = self.config.name, key = %ticket.key, "job timed out in queue");
                    return Err(QueueError::TimedOut);
                }
            }
        }

        let _slot = SlotGuard(self);
        Ok(work.await)
    }

    fn promote(&self, key: &str) {
        let mut state = self.lock();
        if let Some(pos) = state.normal.iter().position(|w| w.key == key) {
            if let Some(waiter) = state.normal.remove(pos) {
                debug!(queue = self.config.name, key = %key, "promoted queued job");
                state.high.push_back(waiter);
            }
        }
    }

    /// Hand the slot to the next waiter, or free it.
    fn release(&self) {
        let mut state = self.lock();
        loop {
            let next = match state.high.pop_front() {
                Some(w) => Some(w),
                None => state.normal.pop_front(),
            };
            match next {
                Some(waiter) => {
                    // receiver gone means that job was abandoned
                    if waiter.tx.send(()).is_ok() {
                        return;
                    }
                }
                None => {
                    state.running = state.running.saturating_sub(1);
                    return;
                }
            }
        }
    }

    /// A timed-out waiter leaves the queue. If the slot was handed over in
    /// the meantime it is passed on.
    fn abandon(&self, id: u64) {
        let removed = {
            let mut state = self.lock();
            let before = state.high.len() + state.normal.len();
            state.high.retain(|w| w.id != id);
            state.normal.retain(|w| w.id != id);
            before != state.high.len() + state.normal.len()
        };
        if !removed {
            self.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    fn queue(concurrency: usize) -> AcquisitionQueue<u32> {
        AcquisitionQueue::new(QueueConfig {
            name: "test",
            concurrency,
            queue_timeout: Duration::from_secs(60),
            result_capacity: 16,
        })
    }

    #[tokio::test]
    async fn test_same_key_runs_once() {
        let queue = queue(3);
        let runs = Arc::new(AtomicUsize::new(0));

        let mut flights = Vec::new();
        for _ in 0..5 {
            let runs = runs.clone();
            flights.push(queue.enqueue("a", Priority::Normal, move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
                7
            }));
        }
        for flight in flights {
            assert_eq!(flight.await, Ok(7));
        }
        // finished jobs are remembered
        assert_eq!(queue.enqueue("a", Priority::High, || async { 8 }).await, Ok(7));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_forget_allows_rerun() {
        let queue = queue(1);
        let first = queue.enqueue("a", Priority::Normal, || async { 1 });
        assert_eq!(first.clone().await, Ok(1));
        queue.forget("a", &first);
        assert_eq!(queue.enqueue("a", Priority::Normal, || async { 2 }).await, Ok(2));
    }

    #[tokio::test]
    async fn test_concurrency_bound_and_priority_order() {
        let queue = queue(1);
        let gate = Arc::new(Notify::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let blocker = {
            let gate = gate.clone();
            queue.enqueue("blocker", Priority::Normal, move || async move {
                gate.notified().await;
                0
            })
        };

        let mut flights = Vec::new();
        for (key, priority, n) in [
            ("n1", Priority::Normal, 1),
            ("n2", Priority::Normal, 2),
            ("h1", Priority::High, 3),
        ] {
            let order = order.clone();
            flights.push(queue.enqueue(key, priority, move || async move {
                order.lock().unwrap().push(n);
                n
            }));
        }

        assert_eq!(queue.running(), 1);
        assert_eq!(queue.waiting(), 3);

        gate.notify_one();
        assert_eq!(blocker.await, Ok(0));
        for flight in flights {
            flight.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![3, 1, 2]);
        assert_eq!(queue.running(), 0);
    }

    #[tokio::test]
    async fn test_high_request_promotes_queued_job() {
        let queue = queue(1);
        let gate = Arc::new(Notify::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let blocker = {
            let gate = gate.clone();
            queue.enqueue("blocker", Priority::Normal, move || async move {
                gate.notified().await;
                0
            })
        };
        let mut flights = Vec::new();
        for (key, n) in [("first", 1), ("second", 2)] {
            let order = order.clone();
            flights.push(queue.enqueue(key, Priority::Normal, move || async move {
                order.lock().unwrap().push(n);
                n
            }));
        }

        // the user opened the conversation holding "second"
        let again = queue.enqueue("second", Priority::High, || async { 99 });

        gate.notify_one();
        blocker.await.unwrap();
        assert_eq!(again.await, Ok(2));
        for flight in flights {
            flight.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![2, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiting_job_times_out() {
        let queue = AcquisitionQueue::<u32>::new(QueueConfig {
            name: "test",
            concurrency: 1,
            queue_timeout: Duration::from_secs(5),
            result_capacity: 16,
        });
        let gate = Arc::new(Notify::new());
        let blocker = {
            let gate = gate.clone();
            queue.enqueue("blocker", Priority::Normal, move || async move {
                gate.notified().await;
                0
            })
        };
        let starved = queue.enqueue("starved", Priority::Normal, || async { 1 });

        assert_eq!(starved.await, Err(QueueError::TimedOut));
        assert_eq!(queue.waiting(), 0);

        gate.notify_one();
        assert_eq!(blocker.await, Ok(0));
        assert_eq!(queue.running(), 0);
    }
}
