//! Bounded worker pool with ordered result gathering.
//!
//! A fixed number of worker tasks pull `(index, item)` units from a shared
//! queue. Each result is tagged with its index and the gathered output is
//! re-sorted, so callers see input order no matter which worker finished
//! first.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Result of one unit.
#[derive(Debug)]
pub enum UnitOutcome<R> {
    Done(R),
    /// The unit panicked; the message is the panic payload when it is text.
    Panicked(String),
}

/// Run `work` over every item with at most `workers` units in flight.
///
/// The returned vector has one entry per item, in input order.
pub async fn run_ordered<T, R, F, Fut>(items: Vec<T>, workers: usize, work: F) -> Vec<UnitOutcome<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(usize, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    let total = items.len();
    if total == 0 {
        return Vec::new();
    }
    let workers = workers.clamp(1, total);

    let (task_tx, task_rx) = mpsc::channel::<(usize, T)>(total);
    for (index, item) in items.into_iter().enumerate() {
        // Capacity equals the item count, so this never waits.
        if task_tx.send((index, item)).await.is_err() {
            break;
        }
    }
    drop(task_tx);

    let task_rx = Arc::new(Mutex::new(task_rx));
    let (result_tx, mut result_rx) = mpsc::channel::<(usize, UnitOutcome<R>)>(total);
    let work = Arc::new(work);

    let mut handles = Vec::with_capacity(workers);
    for worker in 0..workers {
        let task_rx = Arc::clone(&task_rx);
        let result_tx = result_tx.clone();
        let work = Arc::clone(&work);

        handles.push(tokio::spawn(async move {
            loop {
                let next = task_rx.lock().await.recv().await;
                let Some((index, item)) = next else {
                    break;
                };

                // Run the unit on its own task so a panic stays contained.
                let unit = tokio::spawn(work(index, item));
                let outcome = match unit.await {
                    Ok(result) => UnitOutcome::Done(result),
                    Err(e) => {
                        let message = panic_message(e);
                        tracing::error!("Worker {} unit {} panicked: {}", worker, index, message);
                        UnitOutcome::Panicked(message)
                    }
                };

                if result_tx.send((index, outcome)).await.is_err() {
                    break;
                }
            }
        }));
    }
    drop(result_tx);

    let mut gathered = Vec::with_capacity(total);
    while let Some(entry) = result_rx.recv().await {
        gathered.push(entry);
    }
    for handle in handles {
        let _ = handle.await;
    }

    gathered.sort_by_key(|(index, _)| *index);
    gathered.into_iter().map(|(_, outcome)| outcome).collect()
}

fn panic_message(e: tokio::task::JoinError) -> String {
    if !e.is_panic() {
        return e.to_string();
    }
    let payload = e.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
