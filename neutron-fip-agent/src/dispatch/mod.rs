use std::{fmt::Display, future::Future, hash::Hash, sync::Arc, time::Instant};

use log::{error, info, warn};
use tokio::task::JoinHandle;

use crate::error::Retryable;

use self::queue::WorkQueue;

pub mod keymutex;
pub mod queue;

/// Starts `count` workers draining the queue with the given handler. A failed
/// item is rescheduled with backoff while the policy allows it, so it never
/// blocks other keys.
pub fn spawn_workers<T, E, H, Fut>(
    queue: Arc<WorkQueue<T>>,
    count: usize,
    handler: H,
) -> Vec<JoinHandle<()>>
where
    T: Clone + Eq + Hash + Display + Send + Sync + 'static,
    E: Retryable + Display + Send + 'static,
    H: Fn(T) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
{
    (0..count.max(1))
        .map(|_| {
            let queue = queue.clone();
            let handler = handler.clone();

            tokio::spawn(async move {
                while let Some(item) = queue.get().await {
                    process_item(&queue, &handler, item).await;
                }
            })
        })
        .collect()
}

async fn process_item<T, E, H, Fut>(queue: &Arc<WorkQueue<T>>, handler: &H, item: T)
where
    T: Clone + Eq + Hash + Display + Send + Sync + 'static,
    E: Retryable + Display,
    H: Fn(T) -> Fut,
    Fut: Future<Output = Result<(), E>>,
{
    let started = Instant::now();
    let name = queue.name();

    match handler(item.clone()).await {
        Ok(()) => {
            queue.forget(&item).await;
            info!(
                "[{name}] Processed {item} in {}ms",
                started.elapsed().as_millis()
            );
        }
        Err(err) => {
            if err.is_retryable() && queue.can_retry(&item).await {
                warn!("[{name}] Couldn't process {item}, retrying! {err}");
                queue.add_rate_limited(item.clone()).await;
            } else {
                error!("[{name}] Dropping {item}! {err}");
                queue.forget(&item).await;
            }
        }
    }

    queue.done(&item).await;
}
