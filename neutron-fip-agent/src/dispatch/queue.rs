use std::{
    collections::{HashMap, HashSet, VecDeque},
    hash::Hash,
    sync::Arc,
    time::Duration,
};

use log::debug;
use rand::Rng;
use tokio::sync::{Mutex, Notify};

/// Exponential per-item backoff with jitter, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_delay: Duration,
    max_retries: Option<u32>,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_retries: Option<u32>) -> Self {
        Self {
            base_delay,
            max_delay,
            max_retries,
        }
    }

    /// Delay before the `failures`-th retry (counted from 1).
    pub fn delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        let delay = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_delay);

        // 0.5x to 1.5x of the delay
        let jitter = rand::thread_rng().gen_range(0.5..1.5);

        Duration::from_secs_f64(delay.as_secs_f64() * jitter).min(self.max_delay)
    }

    pub fn allows(&self, failures: u32) -> bool {
        self.max_retries.map_or(true, |max| failures < max)
    }
}

struct QueueState<T> {
    queue: VecDeque<T>,
    dirty: HashSet<T>,
    processing: HashSet<T>,
    failures: HashMap<T, u32>,
    shutting_down: bool,
}

/// A deduplicating work queue. An item is handed to at most one worker at a
/// time; adding it again while it is processed schedules it once more after
/// `done`.
pub struct WorkQueue<T> {
    name: &'static str,
    state: Mutex<QueueState<T>>,
    available: Notify,
    drained: Notify,
    policy: RetryPolicy,
}

impl<T> WorkQueue<T>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    pub fn new(name: &'static str, policy: RetryPolicy) -> Self {
        Self {
            name,
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                failures: HashMap::new(),
                shutting_down: false,
            }),
            available: Notify::new(),
            drained: Notify::new(),
            policy,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub async fn add(&self, item: T) {
        let mut state = self.state.lock().await;

        if state.shutting_down || !state.dirty.insert(item.clone()) {
            return;
        }

        if state.processing.contains(&item) {
            return;
        }

        state.queue.push_back(item);
        drop(state);

        self.available.notify_one();
    }

    /// Re-adds the item once its backoff delay elapses.
    pub async fn add_rate_limited(self: &Arc<Self>, item: T) {
        let failures = {
            let mut state = self.state.lock().await;
            let failures = state.failures.entry(item.clone()).or_insert(0);
            *failures += 1;
            *failures
        };

        let delay = self.policy.delay(failures);
        let queue = self.clone();

        debug!("[{}] Requeueing item in {}ms", self.name, delay.as_millis());

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(item).await;
        });
    }

    pub async fn can_retry(&self, item: &T) -> bool {
        self.policy.allows(self.num_requeues(item).await)
    }

    pub async fn num_requeues(&self, item: &T) -> u32 {
        self.state
            .lock()
            .await
            .failures
            .get(item)
            .copied()
            .unwrap_or(0)
    }

    pub async fn forget(&self, item: &T) {
        self.state.lock().await.failures.remove(item);
    }

    /// Blocks until an item is available. Returns `None` once the queue is
    /// shut down and empty.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;

                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());

                    return Some(item);
                }

                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Marks the item as processed, scheduling it again if it was re-added
    /// in the meantime.
    pub async fn done(&self, item: &T) {
        let mut state = self.state.lock().await;

        state.processing.remove(item);

        if state.dirty.contains(item) {
            state.queue.push_back(item.clone());
            self.available.notify_one();
        }

        if state.processing.is_empty() {
            self.drained.notify_waiters();
        }
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn is_idle(&self) -> bool {
        let state = self.state.lock().await;

        state.queue.is_empty() && state.processing.is_empty()
    }

    pub async fn shutdown(&self) {
        self.state.lock().await.shutting_down = true;
        self.available.notify_waiters();
    }

    /// Stops accepting work and waits until items held by workers are
    /// acknowledged.
    pub async fn shutdown_with_drain(&self) {
        self.shutdown().await;

        loop {
            let drained = self.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();

            if self.state.lock().await.processing.is_empty() {
                return;
            }

            drained.await;
        }
    }
}
