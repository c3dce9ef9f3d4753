use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use log::{debug, error, info};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::Instrument;

use crate::queue::{Delivery, ExpiredLease, FailOutcome, TaskQueue, LEASE_EXPIRED};
use crate::worker::handler::{Disposition, EvaluationHandler};

const HANDLER_PANICKED: &str = "evaluation handler panicked";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    pub worker_count: usize,
    /// Upper bound on how long an idle worker sleeps before polling the
    /// queue again. Redeliveries scheduled by backoff are picked up on poll.
    pub poll_interval: Duration,
    /// How often a busy worker renews the lease of its delivery. Must be
    /// shorter than the queue's lease timeout.
    pub heartbeat_interval: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            worker_count: 5,
            poll_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(60),
        }
    }
}

/// Fixed set of tokio tasks, each claiming and handling one delivery at a
/// time.
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl WorkerPool {
    /// Spawns the workers on the current runtime.
    ///
    /// # Panics
    /// Panics if `settings.worker_count` is 0 or the heartbeat interval is
    /// zero.
    pub fn start(
        queue: Arc<dyn TaskQueue>,
        handler: Arc<EvaluationHandler>,
        settings: WorkerSettings,
    ) -> Self {
        assert!(settings.worker_count > 0, "worker_count must be > 0");
        assert!(
            !settings.heartbeat_interval.is_zero(),
            "heartbeat_interval must be > 0"
        );
        let (shutdown, shutdown_rx) = watch::channel(false);

        let workers = (0..settings.worker_count)
            .map(|n| {
                let worker_id = format!("worker-{}", n);
                let span = tracing::info_span!("worker", id = %worker_id);
                tokio::spawn(
                    run_worker(
                        worker_id,
                        Arc::clone(&queue),
                        Arc::clone(&handler),
                        shutdown_rx.clone(),
                        settings.clone(),
                    )
                    .instrument(span),
                )
            })
            .collect();

        info!("Started {} workers", settings.worker_count);

        Self { workers, shutdown }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stops claiming new work. Deliveries already running continue.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.send_replace(true);
    }

    /// Waits for every worker to finish its current delivery and exit.
    pub async fn wait(self) {
        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.await {
                error!("Worker {} terminated abnormally: {}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }
}

async fn run_worker(
    worker_id: String,
    queue: Arc<dyn TaskQueue>,
    handler: Arc<EvaluationHandler>,
    mut shutdown: watch::Receiver<bool>,
    settings: WorkerSettings,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if *shutdown.borrow() {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match queue.reap_expired().await {
            Ok(expired) => {
                for lease in &expired {
                    release_expired(&handler, lease).await;
                }
            }
            Err(e) => error!("Worker {} failed to reap expired leases: {}", worker_id, e),
        }

        match queue.claim(&worker_id).await {
            Ok(Some(delivery)) => {
                process_delivery(
                    queue.as_ref(),
                    &handler,
                    &delivery,
                    settings.heartbeat_interval,
                )
                .await;
                continue;
            }
            Ok(None) => {}
            Err(e) => error!("Worker {} failed to claim work: {}", worker_id, e),
        }

        tokio::select! {
            _ = queue.wait_for_work(settings.poll_interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

/// Brings the job of a reaped delivery in line with its task.
async fn release_expired(handler: &EvaluationHandler, lease: &ExpiredLease) {
    match lease.outcome {
        FailOutcome::Retrying { .. } => {
            handler.release_job(&lease.job_id, LEASE_EXPIRED, true).await
        }
        FailOutcome::Dead => handler.release_job(&lease.job_id, LEASE_EXPIRED, false).await,
        FailOutcome::Stale => {}
    }
}

async fn process_delivery(
    queue: &dyn TaskQueue,
    handler: &EvaluationHandler,
    delivery: &Delivery,
    heartbeat_interval: Duration,
) {
    let span = tracing::info_span!(
        "delivery",
        job_id = %delivery.task.job_id,
        task_id = %delivery.task_id,
        attempt = delivery.attempt,
    );

    async {
        let work = AssertUnwindSafe(handler.handle(delivery)).catch_unwind();
        tokio::pin!(work);

        let mut heartbeat = tokio::time::interval(heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;

        let outcome = loop {
            tokio::select! {
                outcome = &mut work => break outcome,
                _ = heartbeat.tick() => renew_lease(queue, delivery).await,
            }
        };

        let Ok(disposition) = outcome else {
            tracing::error!("Handler panicked");
            settle_panic(queue, handler, delivery).await;
            return;
        };

        let settled = match &disposition {
            Disposition::Completed | Disposition::Duplicate => {
                queue.complete(delivery).await.map(|_| ())
            }
            Disposition::Failed { error, retryable } => {
                match queue.fail(delivery, error, *retryable).await {
                    Ok(FailOutcome::Retrying { available_at }) => {
                        tracing::info!(%available_at, "Task scheduled for redelivery");
                        Ok(())
                    }
                    Ok(FailOutcome::Dead) => {
                        tracing::warn!("Task moved to failed set");
                        Ok(())
                    }
                    Ok(FailOutcome::Stale) => Ok(()),
                    Err(e) => Err(e),
                }
            }
        };

        if let Err(e) = settled {
            tracing::error!(error = %e, "Could not settle delivery; it will be redelivered after its lease expires");
        }
    }
    .instrument(span)
    .await
}

async fn renew_lease(queue: &dyn TaskQueue, delivery: &Delivery) {
    match queue.extend_lease(delivery).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!("Lease lost while the evaluation is still running; the task was redelivered")
        }
        Err(e) => tracing::error!(error = %e, "Could not extend lease"),
    }
}

/// Settles both the task and the job after the handler panicked.
async fn settle_panic(queue: &dyn TaskQueue, handler: &EvaluationHandler, delivery: &Delivery) {
    let job_id = delivery.task.job_id.as_str();
    match queue.fail(delivery, HANDLER_PANICKED, true).await {
        Ok(FailOutcome::Retrying { available_at }) => {
            tracing::info!(%available_at, "Task scheduled for redelivery");
            handler.release_job(job_id, HANDLER_PANICKED, true).await;
        }
        Ok(FailOutcome::Dead) => {
            tracing::warn!("Task moved to failed set");
            handler.release_job(job_id, HANDLER_PANICKED, false).await;
        }
        Ok(FailOutcome::Stale) => {}
        Err(e) => {
            tracing::error!(error = %e, "Could not settle delivery; it will be redelivered after its lease expires")
        }
    }
}
