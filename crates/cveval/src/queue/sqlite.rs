use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use super::{
    Delivery, ExpiredLease, FailOutcome, QueueCounts, QueueError, QueueSettings, Task, TaskQueue,
    LEASE_EXPIRED,
};
use crate::clock::{Clock, SystemClock};
use crate::db::task_repo::{self, TaskRow};
use crate::db::{format_timestamp, parse_timestamp, Database, DatabaseError};

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(365))
}

/// Durable queue stored in the `tasks` table of the shared database.
///
/// The trait methods run their SQLite work on the blocking pool; the
/// `*_now` helpers below are the synchronous bodies.
#[derive(Clone)]
pub struct SqliteQueue {
    db: Database,
    settings: QueueSettings,
    clock: Arc<dyn Clock>,
    notify: Arc<Notify>,
}

impl SqliteQueue {
    pub fn new(db: Database, settings: QueueSettings) -> Self {
        Self::with_clock(db, settings, Arc::new(SystemClock))
    }

    pub fn with_clock(db: Database, settings: QueueSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            settings,
            clock,
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, QueueError>
    where
        F: FnOnce(&SqliteQueue) -> Result<T, QueueError> + Send + 'static,
        T: Send + 'static,
    {
        let queue = self.clone();
        self.db.run_blocking(move |_| f(&queue)).await
    }

    fn reap_now(&self) -> Result<Vec<ExpiredLease>, QueueError> {
        let now = self.clock.now();
        let now_s = format_timestamp(now);
        let mut reaped = Vec::new();
        for row in task_repo::expired_leases(&self.db, &self.settings.name, &now_s)? {
            let Some(token) = row.lease_token.as_deref() else {
                continue;
            };
            let outcome = if row.attempts_made >= row.max_attempts {
                if !task_repo::mark_failed(&self.db, &row.id, token, LEASE_EXPIRED, &now_s)? {
                    continue;
                }
                tracing::warn!(task_id = %row.id, job_id = %row.job_id, attempts = row.attempts_made, "Lease expired on final attempt; task is dead");
                self.prune("failed", self.settings.keep_failed)?;
                FailOutcome::Dead
            } else {
                let available_at = now + to_chrono(self.settings.backoff_after(row.attempts_made));
                if !task_repo::reschedule(
                    &self.db,
                    &row.id,
                    token,
                    &format_timestamp(available_at),
                    LEASE_EXPIRED,
                )? {
                    continue;
                }
                tracing::warn!(task_id = %row.id, job_id = %row.job_id, worker = ?row.worker_id, "Lease expired; task rescheduled");
                FailOutcome::Retrying { available_at }
            };
            reaped.push(ExpiredLease {
                task_id: row.id,
                job_id: row.job_id,
                attempt: row.attempts_made,
                outcome,
            });
        }
        Ok(reaped)
    }

    fn claim_now(&self, worker_id: &str) -> Result<Option<Delivery>, QueueError> {
        let now = self.clock.now();
        let now_s = format_timestamp(now);
        let expires_s = format_timestamp(now + to_chrono(self.settings.lease_timeout));
        loop {
            let lease_token = uuid::Uuid::new_v4().to_string();
            let Some(row) = task_repo::claim_next(
                &self.db,
                &self.settings.name,
                worker_id,
                &lease_token,
                &now_s,
                &expires_s,
            )?
            else {
                return Ok(None);
            };

            let task_id = row.id.clone();
            match self.to_delivery(row)? {
                Ok(delivery) => return Ok(Some(delivery)),
                Err(reason) => {
                    tracing::error!(task_id = %task_id, %reason, "Dropping malformed task");
                    task_repo::mark_failed(&self.db, &task_id, &lease_token, &reason, &now_s)?;
                }
            }
        }
    }

    fn complete_now(&self, delivery: &Delivery) -> Result<bool, QueueError> {
        let acked = task_repo::mark_completed(
            &self.db,
            &delivery.task_id,
            &delivery.lease_token,
            &format_timestamp(self.clock.now()),
        )?;
        if acked {
            self.prune("completed", self.settings.keep_completed)?;
        } else {
            tracing::warn!(task_id = %delivery.task_id, worker = %delivery.worker_id, "Ignoring completion from a stale lease");
        }
        Ok(acked)
    }

    fn fail_now(
        &self,
        delivery: &Delivery,
        error: &str,
        retryable: bool,
    ) -> Result<FailOutcome, QueueError> {
        let now = self.clock.now();

        if retryable && !delivery.is_last_attempt() {
            let available_at = now + to_chrono(self.settings.backoff_after(delivery.attempt));
            let rescheduled = task_repo::reschedule(
                &self.db,
                &delivery.task_id,
                &delivery.lease_token,
                &format_timestamp(available_at),
                error,
            )?;
            if !rescheduled {
                tracing::warn!(task_id = %delivery.task_id, worker = %delivery.worker_id, "Ignoring failure from a stale lease");
                return Ok(FailOutcome::Stale);
            }
            return Ok(FailOutcome::Retrying { available_at });
        }

        let failed = task_repo::mark_failed(
            &self.db,
            &delivery.task_id,
            &delivery.lease_token,
            error,
            &format_timestamp(now),
        )?;
        if !failed {
            tracing::warn!(task_id = %delivery.task_id, worker = %delivery.worker_id, "Ignoring failure from a stale lease");
            return Ok(FailOutcome::Stale);
        }
        self.prune("failed", self.settings.keep_failed)?;
        Ok(FailOutcome::Dead)
    }

    fn extend_now(&self, delivery: &Delivery) -> Result<bool, QueueError> {
        let expires = self.clock.now() + to_chrono(self.settings.lease_timeout);
        let extended = task_repo::extend_lease(
            &self.db,
            &delivery.task_id,
            &delivery.lease_token,
            &format_timestamp(expires),
        )?;
        if extended {
            tracing::trace!(task_id = %delivery.task_id, %expires, "Lease extended");
        }
        Ok(extended)
    }

    fn prune(&self, state: &str, keep: u32) -> Result<(), QueueError> {
        let removed = task_repo::prune_finished(&self.db, &self.settings.name, state, keep)?;
        if removed > 0 {
            log::debug!("Pruned {} {} task(s) from queue {}", removed, state, self.settings.name);
        }
        Ok(())
    }

    fn to_delivery(&self, row: TaskRow) -> Result<Result<Delivery, String>, DatabaseError> {
        let task: Task = match serde_json::from_str(&row.payload) {
            Ok(task) => task,
            Err(e) => return Ok(Err(format!("undecodable task payload: {}", e))),
        };
        let (Some(lease_token), Some(expires)) = (row.lease_token, row.lease_expires_at) else {
            return Ok(Err("claimed task has no lease".to_string()));
        };
        Ok(Ok(Delivery {
            task_id: row.id,
            task,
            attempt: row.attempts_made,
            max_attempts: row.max_attempts,
            worker_id: row.worker_id.unwrap_or_default(),
            lease_token,
            lease_expires_at: parse_timestamp(&expires)?,
        }))
    }
}

#[async_trait]
impl TaskQueue for SqliteQueue {
    async fn enqueue(&self, task: &Task) -> Result<String, QueueError> {
        let payload = serde_json::to_string(task).map_err(|e| QueueError::Encode {
            job_id: task.job_id.clone(),
            source: e,
        })?;
        let now = format_timestamp(self.clock.now());
        let row = TaskRow {
            id: uuid::Uuid::new_v4().to_string(),
            queue: self.settings.name.clone(),
            job_id: task.job_id.clone(),
            payload,
            state: "waiting".to_string(),
            attempts_made: 0,
            max_attempts: self.settings.max_attempts,
            available_at: now.clone(),
            lease_token: None,
            lease_expires_at: None,
            worker_id: None,
            last_error: None,
            created_at: now,
            finished_at: None,
        };
        let task_id = row.id.clone();
        self.db
            .run_blocking(move |db| task_repo::insert(db, &row))
            .await?;
        self.notify.notify_one();

        tracing::debug!(task_id = %task_id, job_id = %task.job_id, "Task enqueued");
        Ok(task_id)
    }

    async fn claim(&self, worker_id: &str) -> Result<Option<Delivery>, QueueError> {
        let worker_id = worker_id.to_string();
        self.blocking(move |queue| queue.claim_now(&worker_id)).await
    }

    async fn reap_expired(&self) -> Result<Vec<ExpiredLease>, QueueError> {
        self.blocking(|queue| queue.reap_now()).await
    }

    async fn extend_lease(&self, delivery: &Delivery) -> Result<bool, QueueError> {
        let delivery = delivery.clone();
        self.blocking(move |queue| queue.extend_now(&delivery)).await
    }

    async fn complete(&self, delivery: &Delivery) -> Result<bool, QueueError> {
        let delivery = delivery.clone();
        self.blocking(move |queue| queue.complete_now(&delivery)).await
    }

    async fn fail(
        &self,
        delivery: &Delivery,
        error: &str,
        retryable: bool,
    ) -> Result<FailOutcome, QueueError> {
        let delivery = delivery.clone();
        let error = error.to_string();
        self.blocking(move |queue| queue.fail_now(&delivery, &error, retryable))
            .await
    }

    async fn counts(&self) -> Result<QueueCounts, QueueError> {
        let name = self.settings.name.clone();
        let counts = self
            .db
            .run_blocking(move |db| task_repo::count_by_state(db, &name))
            .await?;
        Ok(QueueCounts {
            waiting: counts.waiting,
            active: counts.active,
            completed: counts.completed,
            failed: counts.failed,
        })
    }

    async fn wait_for_work(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.notify.notified())
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::job::EvaluationRequest;
    use chrono::TimeZone;

    fn setup() -> (SqliteQueue, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let queue = SqliteQueue::with_clock(
            Database::open_in_memory().unwrap(),
            QueueSettings::default(),
            Arc::new(clock.clone()),
        );
        (queue, clock)
    }

    fn task(job_id: &str) -> Task {
        Task::for_job(job_id, &EvaluationRequest::new("Backend Engineer", "cv", "pr"))
    }

    #[tokio::test]
    async fn test_enqueue_claim_complete() {
        let (queue, _clock) = setup();
        let id = queue.enqueue(&task("job-1")).await.unwrap();

        let delivery = queue.claim("w1").await.unwrap().unwrap();
        assert_eq!(delivery.task_id, id);
        assert_eq!(delivery.task.job_id, "job-1");
        assert_eq!(delivery.attempt, 1);
        assert!(queue.claim("w2").await.unwrap().is_none());

        assert!(queue.complete(&delivery).await.unwrap());
        let counts = queue.counts().await.unwrap();
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.active, 0);
    }

    #[tokio::test]
    async fn test_retry_backoff_then_dead() {
        let (queue, clock) = setup();
        queue.enqueue(&task("job-1")).await.unwrap();

        let first = queue.claim("w1").await.unwrap().unwrap();
        let outcome = queue.fail(&first, "upstream", true).await.unwrap();
        let t0 = clock.now();
        assert_eq!(
            outcome,
            FailOutcome::Retrying {
                available_at: t0 + chrono::Duration::seconds(2)
            }
        );

        clock.advance(chrono::Duration::milliseconds(1999));
        assert!(queue.claim("w1").await.unwrap().is_none());
        clock.advance(chrono::Duration::milliseconds(1));
        let second = queue.claim("w1").await.unwrap().unwrap();
        assert_eq!(second.attempt, 2);

        let outcome = queue.fail(&second, "upstream", true).await.unwrap();
        assert_eq!(
            outcome,
            FailOutcome::Retrying {
                available_at: clock.now() + chrono::Duration::seconds(4)
            }
        );

        clock.advance(chrono::Duration::seconds(4));
        let third = queue.claim("w1").await.unwrap().unwrap();
        assert_eq!(third.attempt, 3);
        assert!(third.is_last_attempt());
        assert_eq!(queue.fail(&third, "upstream", true).await.unwrap(), FailOutcome::Dead);

        clock.advance(chrono::Duration::hours(1));
        assert!(queue.claim("w1").await.unwrap().is_none());
        assert_eq!(queue.counts().await.unwrap().failed, 1);
    }

    #[tokio::test]
    async fn test_non_retryable_failure_is_dead_immediately() {
        let (queue, _clock) = setup();
        queue.enqueue(&task("job-1")).await.unwrap();
        let delivery = queue.claim("w1").await.unwrap().unwrap();

        assert_eq!(
            queue.fail(&delivery, "File not found", false).await.unwrap(),
            FailOutcome::Dead
        );
        let counts = queue.counts().await.unwrap();
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.waiting, 0);
    }

    #[tokio::test]
    async fn test_lease_expiry_redelivers_and_rejects_stale_ack() {
        let (queue, clock) = setup();
        queue.enqueue(&task("job-1")).await.unwrap();
        let stale = queue.claim("w1").await.unwrap().unwrap();

        clock.advance(chrono::Duration::seconds(301));
        let reaped = queue.reap_expired().await.unwrap();
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].job_id, "job-1");
        assert_eq!(reaped[0].attempt, 1);
        assert_eq!(
            reaped[0].outcome,
            FailOutcome::Retrying {
                available_at: clock.now() + chrono::Duration::seconds(2)
            }
        );

        // Expiry counts as the first failed attempt, so backoff applies.
        assert!(queue.claim("w2").await.unwrap().is_none());
        clock.advance(chrono::Duration::seconds(2));
        let fresh = queue.claim("w2").await.unwrap().unwrap();
        assert_eq!(fresh.task_id, stale.task_id);
        assert_eq!(fresh.attempt, 2);
        assert_ne!(fresh.lease_token, stale.lease_token);

        assert!(!queue.complete(&stale).await.unwrap());
        assert_eq!(queue.fail(&stale, "late", true).await.unwrap(), FailOutcome::Stale);
        assert!(queue.complete(&fresh).await.unwrap());
    }

    #[tokio::test]
    async fn test_lease_expiry_on_last_attempt_is_dead() {
        let (queue, clock) = setup();
        let settings = QueueSettings {
            max_attempts: 1,
            ..QueueSettings::default()
        };
        let queue = SqliteQueue::with_clock(queue.db.clone(), settings, Arc::new(clock.clone()));
        let id = queue.enqueue(&task("job-1")).await.unwrap();
        queue.claim("w1").await.unwrap().unwrap();

        clock.advance(chrono::Duration::minutes(10));
        let reaped = queue.reap_expired().await.unwrap();
        assert_eq!(
            reaped,
            vec![ExpiredLease {
                task_id: id,
                job_id: "job-1".to_string(),
                attempt: 1,
                outcome: FailOutcome::Dead,
            }]
        );
        assert!(queue.reap_expired().await.unwrap().is_empty());
        assert!(queue.claim("w2").await.unwrap().is_none());
        assert_eq!(queue.counts().await.unwrap().failed, 1);
    }

    #[tokio::test]
    async fn test_claim_leaves_expired_leases_to_the_reaper() {
        let (queue, clock) = setup();
        queue.enqueue(&task("job-1")).await.unwrap();
        queue.claim("w1").await.unwrap().unwrap();

        clock.advance(chrono::Duration::minutes(10));
        assert!(queue.claim("w2").await.unwrap().is_none());
        assert_eq!(queue.counts().await.unwrap().active, 1);
    }

    #[tokio::test]
    async fn test_extended_lease_is_not_reaped() {
        let (queue, clock) = setup();
        queue.enqueue(&task("job-1")).await.unwrap();
        let delivery = queue.claim("w1").await.unwrap().unwrap();

        clock.advance(chrono::Duration::seconds(200));
        assert!(queue.extend_lease(&delivery).await.unwrap());
        clock.advance(chrono::Duration::seconds(200));
        assert!(queue.reap_expired().await.unwrap().is_empty());
        assert!(queue.complete(&delivery).await.unwrap());
    }

    #[tokio::test]
    async fn test_extend_lease_rejects_stale_token() {
        let (queue, clock) = setup();
        queue.enqueue(&task("job-1")).await.unwrap();
        let stale = queue.claim("w1").await.unwrap().unwrap();

        clock.advance(chrono::Duration::seconds(301));
        queue.reap_expired().await.unwrap();
        assert!(!queue.extend_lease(&stale).await.unwrap());

        clock.advance(chrono::Duration::seconds(2));
        let fresh = queue.claim("w2").await.unwrap().unwrap();
        assert!(!queue.extend_lease(&stale).await.unwrap());
        assert!(queue.extend_lease(&fresh).await.unwrap());
    }

    #[tokio::test]
    async fn test_pruning_keeps_recent_records() {
        let (queue, clock) = setup();
        let settings = QueueSettings {
            keep_completed: 2,
            keep_failed: 1,
            ..QueueSettings::default()
        };
        let queue = SqliteQueue::with_clock(queue.db.clone(), settings, Arc::new(clock.clone()));

        for i in 0..4 {
            queue.enqueue(&task(&format!("ok-{}", i))).await.unwrap();
            let d = queue.claim("w").await.unwrap().unwrap();
            queue.complete(&d).await.unwrap();
            clock.advance(chrono::Duration::seconds(1));
        }
        for i in 0..3 {
            queue.enqueue(&task(&format!("bad-{}", i))).await.unwrap();
            let d = queue.claim("w").await.unwrap().unwrap();
            queue.fail(&d, "broken", false).await.unwrap();
            clock.advance(chrono::Duration::seconds(1));
        }

        let counts = queue.counts().await.unwrap();
        assert_eq!(counts.completed, 2);
        assert_eq!(counts.failed, 1);
    }

    #[tokio::test]
    async fn test_claims_oldest_first() {
        let (queue, clock) = setup();
        queue.enqueue(&task("first")).await.unwrap();
        clock.advance(chrono::Duration::milliseconds(10));
        queue.enqueue(&task("second")).await.unwrap();

        assert_eq!(queue.claim("w").await.unwrap().unwrap().task.job_id, "first");
        assert_eq!(queue.claim("w").await.unwrap().unwrap().task.job_id, "second");
    }

    #[tokio::test]
    async fn test_malformed_payload_is_dropped() {
        let (queue, clock) = setup();
        let now = format_timestamp(clock.now());
        task_repo::insert(
            &queue.db,
            &TaskRow {
                id: "broken".to_string(),
                queue: queue.settings.name.clone(),
                job_id: "job-x".to_string(),
                payload: "not json".to_string(),
                state: "waiting".to_string(),
                attempts_made: 0,
                max_attempts: 3,
                available_at: now.clone(),
                lease_token: None,
                lease_expires_at: None,
                worker_id: None,
                last_error: None,
                created_at: now,
                finished_at: None,
            },
        )
        .unwrap();
        queue.enqueue(&task("good")).await.unwrap();

        let delivery = queue.claim("w").await.unwrap().unwrap();
        assert_eq!(delivery.task.job_id, "good");
        assert_eq!(queue.counts().await.unwrap().failed, 1);
    }

    #[tokio::test]
    async fn test_wait_for_work_wakes_on_enqueue() {
        let (queue, _clock) = setup();
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.wait_for_work(Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        queue.enqueue(&task("job-1")).await.unwrap();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_work_times_out() {
        let (queue, _clock) = setup();
        assert!(!queue.wait_for_work(Duration::from_millis(50)).await);
    }
}
