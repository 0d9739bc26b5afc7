//! Job executor.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use clipgen_queue::{JobQueue, QueueJob};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::handlers::JobHandlers;
use crate::retry::FailureTracker;

/// Consume-loop failures logged before suppression kicks in.
const MAX_LOGGED_CONSUME_FAILURES: u32 = 5;

/// Stream message ids this worker is currently running.
#[derive(Debug, Default)]
struct InFlight {
    ids: Mutex<HashSet<String>>,
}

impl InFlight {
    /// Record a message as running. False if it already is.
    async fn begin(&self, message_id: &str) -> bool {
        self.ids.lock().await.insert(message_id.to_string())
    }

    async fn finish(&self, message_id: &str) {
        self.ids.lock().await.remove(message_id);
    }

    async fn snapshot(&self) -> Vec<String> {
        self.ids.lock().await.iter().cloned().collect()
    }
}

/// Job executor that processes jobs from the queue.
pub struct JobExecutor {
    config: WorkerConfig,
    queue: Arc<JobQueue>,
    handlers: Arc<JobHandlers>,
    job_semaphore: Arc<Semaphore>,
    in_flight: Arc<InFlight>,
    shutdown: watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    /// Create a new job executor.
    pub fn new(config: WorkerConfig, queue: JobQueue, handlers: JobHandlers) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (shutdown, _) = watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            config,
            queue: Arc::new(queue),
            handlers: Arc::new(handlers),
            job_semaphore,
            in_flight: Arc::new(InFlight::default()),
            shutdown,
            consumer_name,
        }
    }

    /// Handle for requesting shutdown from another task.
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown.clone()
    }

    /// Start the executor and run until shutdown is signalled.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            consumer = %self.consumer_name,
            max_jobs = self.config.max_concurrent_jobs,
            "Starting job executor"
        );

        self.queue.init().await?;

        let mut shutdown_rx = self.shutdown.subscribe();
        let claim_task = self.spawn_claim_task();
        let heartbeat_task = self.spawn_heartbeat_task();
        let mut failures = FailureTracker::new(MAX_LOGGED_CONSUME_FAILURES);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_jobs() => {
                    match result {
                        Ok(()) => failures.record_success(),
                        Err(e) => {
                            if failures.record_failure() {
                                error!(error = %e, "Error consuming jobs");
                            }
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
            }
        }

        claim_task.abort();
        heartbeat_task.abort();

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!(
                timeout_secs = self.config.shutdown_timeout.as_secs(),
                "In-flight jobs still running at shutdown timeout"
            );
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Periodically claim messages left pending by crashed workers.
    fn spawn_claim_task(&self) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let handlers = Arc::clone(&self.handlers);
        let semaphore = Arc::clone(&self.job_semaphore);
        let in_flight = Arc::clone(&self.in_flight);
        let consumer_name = self.consumer_name.clone();
        let mut shutdown_rx = self.shutdown.subscribe();
        let interval_period = self.config.claim_interval;
        let min_idle_ms = self.config.claim_min_idle.as_millis() as u64;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval_period);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        let claimed = match queue.claim_pending(&consumer_name, min_idle_ms, 5).await {
                            Ok(jobs) => jobs,
                            Err(e) => {
                                warn!(error = %e, "Failed to claim pending jobs");
                                continue;
                            }
                        };
                        if !claimed.is_empty() {
                            info!(count = claimed.len(), "Claimed pending jobs");
                        }
                        for (message_id, job) in claimed {
                            if !in_flight.begin(&message_id).await {
                                debug!(message_id = %message_id, "Claimed job is already running here");
                                continue;
                            }
                            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                                in_flight.finish(&message_id).await;
                                break;
                            };
                            let queue = Arc::clone(&queue);
                            let handlers = Arc::clone(&handlers);
                            let in_flight = Arc::clone(&in_flight);
                            tokio::spawn(async move {
                                let _permit = permit;
                                Self::execute_job(handlers, queue, &message_id, job).await;
                                in_flight.finish(&message_id).await;
                            });
                        }
                    }
                }
            }
        })
    }

    /// Keep in-flight messages from looking abandoned to other workers.
    fn spawn_heartbeat_task(&self) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let in_flight = Arc::clone(&self.in_flight);
        let consumer_name = self.consumer_name.clone();
        let period = self.config.heartbeat_interval();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let ids = in_flight.snapshot().await;
                if let Err(e) = queue.refresh_claims(&consumer_name, &ids).await {
                    warn!(error = %e, count = ids.len(), "Failed to refresh in-flight job claims");
                }
            }
        })
    }

    /// Consume and dispatch jobs from the queue.
    async fn consume_jobs(&self) -> WorkerResult<()> {
        let available = self.job_semaphore.available_permits();
        if available == 0 {
            // All slots busy, wait a bit
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let jobs = self
            .queue
            .consume(&self.consumer_name, 1000, available.min(5))
            .await?;

        if jobs.is_empty() {
            return Ok(());
        }

        debug!(count = jobs.len(), "Consumed jobs from queue");

        for (message_id, job) in jobs {
            if !self.in_flight.begin(&message_id).await {
                continue;
            }
            let handlers = Arc::clone(&self.handlers);
            let queue = Arc::clone(&self.queue);
            let in_flight = Arc::clone(&self.in_flight);
            let permit = match Arc::clone(&self.job_semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    in_flight.finish(&message_id).await;
                    return Err(WorkerError::config_error("Job semaphore closed"));
                }
            };

            tokio::spawn(async move {
                let _permit = permit;
                Self::execute_job(handlers, queue, &message_id, job).await;
                in_flight.finish(&message_id).await;
            });
        }

        Ok(())
    }

    /// Run one job and settle its stream message.
    ///
    /// Retries are owned by the orchestrator, so the message is acked once
    /// the handler returns. Handler errors mean the job could not even be
    /// tracked; those messages go to the DLQ.
    async fn execute_job(
        handlers: Arc<JobHandlers>,
        queue: Arc<JobQueue>,
        message_id: &str,
        job: QueueJob,
    ) {
        let job_id = job.job_id().clone();
        info!(job_id = %job_id, kind = %job.kind(), "Executing job");

        match handlers.handle(&job).await {
            Ok(status) => {
                info!(job_id = %job_id, status = %status, "Job finished");
                if let Err(e) = queue.ack(message_id).await {
                    error!(job_id = %job_id, error = %e, "Failed to ack job");
                }
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Job could not be processed");
                if let Err(dlq_err) = queue.dlq(message_id, &job, &e.to_string()).await {
                    error!(job_id = %job_id, error = %dlq_err, "Failed to move job to DLQ");
                }
            }
        }

        // Clear dedup key so the same job can be resubmitted later
        if let Err(e) = queue.clear_dedup(&job).await {
            warn!(job_id = %job_id, error = %e, "Failed to clear dedup key");
        }
    }

    /// Wait for all in-flight jobs to complete.
    async fn wait_for_jobs(&self) {
        while self.job_semaphore.available_permits() < self.config.max_concurrent_jobs {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_flight_message_is_not_dispatched_twice() {
        let in_flight = InFlight::default();
        assert!(in_flight.begin("1700000000000-0").await);
        assert!(!in_flight.begin("1700000000000-0").await);
        assert!(in_flight.begin("1700000000001-0").await);

        let mut ids = in_flight.snapshot().await;
        ids.sort();
        assert_eq!(ids, vec!["1700000000000-0", "1700000000001-0"]);

        in_flight.finish("1700000000000-0").await;
        assert!(in_flight.begin("1700000000000-0").await);
    }
}
