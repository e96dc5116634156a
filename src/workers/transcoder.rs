use anyhow::{anyhow, Result};
use async_channel::{Receiver, Sender};
use futures_util::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicNackOptions, BasicRejectOptions};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::state::AppState;
use crate::workers::handler::{Disposition, JobHandler};

/// Consumes the transcode queue with `worker_concurrency` jobs in flight at
/// most, until `shutdown` fires. Returns an error if the broker drops the
/// consumer, so the process exits and gets restarted.
pub async fn start_transcoder_worker(state: AppState, shutdown: CancellationToken) -> Result<()> {
    let concurrency = state.config.worker_concurrency.max(1);
    let queue_name = state.config.transcode_queue.clone();
    let consumer_tag = format!("transcoder-{}", Uuid::new_v4());
    let prefetch = u16::try_from(concurrency).unwrap_or(u16::MAX);

    let (mut consumer, handle) = state.queue.consume(&queue_name, &consumer_tag, prefetch).await?;
    info!(
        "🎥 Transcoder Worker listening on '{}' with {} workers",
        queue_name, concurrency
    );

    let handler = JobHandler::new(state.pipeline.clone());
    let (tx, rx) = async_channel::bounded::<Delivery>(concurrency);
    // `stop` keeps idle workers from taking new deliveries; `jobs` interrupts
    // the ones still running once the grace period is over.
    let stop = CancellationToken::new();
    let jobs = CancellationToken::new();

    let mut workers = JoinSet::new();
    for id in 0..concurrency {
        workers.spawn(run_worker(
            id,
            rx.clone(),
            handler.clone(),
            stop.clone(),
            jobs.clone(),
        ));
    }

    let outcome = loop {
        tokio::select! {
            _ = shutdown.cancelled() => break Ok(()),
            next = consumer.next() => match next {
                Some(Ok(delivery)) => {
                    if let Err(e) = dispatch(&tx, delivery).await {
                        break Err(e);
                    }
                }
                Some(Err(e)) => break Err(anyhow!("Consumer on '{}' failed: {}", queue_name, e)),
                None => break Err(anyhow!("Consumer on '{}' was closed by the broker", queue_name)),
            },
        }
    };

    info!("🛑 Stopping consumer '{}'", handle.tag());
    if let Err(e) = handle.cancel().await {
        warn!("{}", e);
    }
    stop.cancel();
    drain(&mut workers, &jobs, state.config.shutdown_timeout).await;

    // Deliveries buffered but never picked up go straight back.
    tx.close();
    while let Ok(delivery) = rx.try_recv() {
        settle(&delivery, Disposition::Requeue).await;
    }

    info!("🎥 Transcoder Worker stopped");
    outcome
}

async fn dispatch(tx: &Sender<Delivery>, delivery: Delivery) -> Result<()> {
    if let Err(rejected) = tx.send(delivery).await {
        settle(&rejected.0, Disposition::Requeue).await;
        return Err(anyhow!("Worker pool is gone"));
    }
    Ok(())
}

async fn run_worker(
    id: usize,
    rx: Receiver<Delivery>,
    handler: JobHandler,
    stop: CancellationToken,
    jobs: CancellationToken,
) {
    loop {
        let delivery = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            next = rx.recv() => match next {
                Ok(delivery) => delivery,
                Err(_) => break,
            },
        };

        let disposition = handler
            .handle(&delivery.data, delivery.redelivered, &jobs)
            .instrument(info_span!("job", worker = id))
            .await;
        settle(&delivery, disposition).await;
    }
    info!("Worker {} exited", id);
}

/// Waits for in-flight jobs. After `grace` they are cancelled and given
/// another `grace` to unwind before being aborted outright.
async fn drain(workers: &mut JoinSet<()>, jobs: &CancellationToken, grace: Duration) {
    if join_all(workers, grace).await {
        return;
    }

    warn!(
        "⏳ {} jobs still running after {:?}, cancelling them",
        workers.len(),
        grace
    );
    jobs.cancel();
    if !join_all(workers, grace).await {
        error!("Aborting {} workers that ignored cancellation", workers.len());
        workers.abort_all();
        while workers.join_next().await.is_some() {}
    }
}

async fn join_all(workers: &mut JoinSet<()>, limit: Duration) -> bool {
    tokio::time::timeout(limit, async {
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("Worker task panicked: {}", e);
            }
        }
    })
    .await
    .is_ok()
}

async fn settle(delivery: &Delivery, disposition: Disposition) {
    let result = match disposition {
        Disposition::Ack => delivery.ack(BasicAckOptions::default()).await,
        Disposition::Requeue => {
            delivery
                .nack(BasicNackOptions {
                    requeue: true,
                    ..BasicNackOptions::default()
                })
                .await
        }
        Disposition::DeadLetter => delivery.reject(BasicRejectOptions { requeue: false }).await,
    };

    if let Err(e) = result {
        // The broker redelivers anything left unacknowledged on this channel.
        error!("Failed to {:?} delivery {}: {}", disposition, delivery.delivery_tag, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_drain_returns_once_workers_finish() {
        let mut workers = JoinSet::new();
        workers.spawn(async { tokio::time::sleep(Duration::from_millis(10)).await });
        let jobs = CancellationToken::new();

        drain(&mut workers, &jobs, Duration::from_secs(5)).await;
        assert!(workers.is_empty());
        assert!(!jobs.is_cancelled());
    }

    #[tokio::test]
    async fn test_drain_cancels_jobs_after_grace() {
        let mut workers = JoinSet::new();
        let jobs = CancellationToken::new();
        let interrupted = Arc::new(AtomicBool::new(false));
        {
            let jobs = jobs.clone();
            let interrupted = Arc::clone(&interrupted);
            workers.spawn(async move {
                jobs.cancelled().await;
                interrupted.store(true, Ordering::SeqCst);
            });
        }

        drain(&mut workers, &jobs, Duration::from_millis(20)).await;
        assert!(jobs.is_cancelled());
        assert!(interrupted.load(Ordering::SeqCst));
        assert!(workers.is_empty());
    }

    #[tokio::test]
    async fn test_drain_aborts_stuck_workers() {
        let mut workers = JoinSet::new();
        workers.spawn(async { tokio::time::sleep(Duration::from_secs(3600)).await });

        drain(&mut workers, &CancellationToken::new(), Duration::from_millis(10)).await;
        assert!(workers.is_empty());
    }
}
