use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Bounded input channel, N long-lived consumers, shared cancellation
/// token checked between items — the "slice → channel → N consumers"
/// pattern, reimplemented with Tokio primitives. Returns results in no
/// particular order; callers that need per-item identity should have
/// `work` fold it into `T`.
pub async fn run_pool<I, T, F, Fut>(
    items: Vec<I>,
    concurrency: usize,
    cancel: CancellationToken,
    work: F,
) -> Vec<T>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = T> + Send,
{
    let concurrency = concurrency.max(1);
    let (tx, rx) = mpsc::channel::<I>(concurrency);
    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    let work = Arc::new(work);

    let feeder = {
        let tx = tx.clone();
        tokio::spawn(async move {
            for item in items {
                if tx.send(item).await.is_err() {
                    break;
                }
            }
        })
    };
    drop(tx);

    let mut handles = Vec::with_capacity(concurrency);
    for _ in 0..concurrency {
        let rx = rx.clone();
        let work = work.clone();
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            let mut out = Vec::new();
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                let item = {
                    let mut guard = rx.lock().await;
                    guard.recv().await
                };
                match item {
                    Some(item) => out.push(work(item).await),
                    None => break,
                }
            }
            out
        }));
    }

    let _ = feeder.await;
    let mut results = Vec::new();
    for handle in handles {
        if let Ok(mut out) = handle.await {
            results.append(&mut out);
        }
    }
    results
}
