//! # Dispatcher
//!
//! Worker loops that drain the queue: claim a batch, resolve credentials,
//! call the provider, classify the outcome, and hand the result back to
//! the store. The provider call is the only blocking operation and runs
//! under a request timeout strictly shorter than the claim timeout, so a
//! hung call can never hold a claim past reaping.
//!
//! Workers poll on a jittered interval and can be woken early when a
//! producer enqueues a high-priority job. A claim batch is processed
//! sequentially within one worker; per-account ordering is already
//! enforced by the store's one-in-flight-per-account rule.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rand::Rng;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::DispatcherConfig;
use crate::dispatch::credentials::{CredentialError, CredentialResolver};
use crate::dispatch::error_classifier::{classify, ErrorCategory};
use crate::dispatch::provider::ProviderClient;
use crate::dispatch::queue_store::{FailureDetails, QueueStore};
use crate::error::Result;
use crate::models::Job;

pub struct Dispatcher {
    store: QueueStore,
    provider: Arc<dyn ProviderClient>,
    credentials: Arc<dyn CredentialResolver>,
    config: DispatcherConfig,
    shutdown_when_queue_empty: bool,
}

/// Handle to the running worker pool.
pub struct DispatcherHandle {
    handles: Vec<JoinHandle<()>>,
    wake: Arc<Notify>,
    stop_flag: Arc<AtomicBool>,
    stop_signal: Arc<Notify>,
}

impl DispatcherHandle {
    /// Nudge sleeping workers; producers call this after enqueueing a
    /// high-priority job. Polling remains the floor guarantee.
    pub fn wake(&self) {
        self.wake.notify_waiters();
    }

    /// Stop all workers and wait for them to finish their current job.
    pub async fn shutdown(self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        self.stop_signal.notify_waiters();
        join_all(self.handles).await.into_iter().for_each(|result| {
            if let Err(join_error) = result {
                warn!(%join_error, "dispatcher worker panicked");
            }
        });
    }

    /// Wait for workers that shut down on their own (drain mode).
    pub async fn wait(self) {
        join_all(self.handles).await.into_iter().for_each(|result| {
            if let Err(join_error) = result {
                warn!(%join_error, "dispatcher worker panicked");
            }
        });
    }
}

impl Dispatcher {
    pub fn new(
        store: QueueStore,
        provider: Arc<dyn ProviderClient>,
        credentials: Arc<dyn CredentialResolver>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            provider,
            credentials,
            config,
            shutdown_when_queue_empty: false,
        }
    }

    /// Workers exit once no pending, failed, or in-flight jobs remain.
    /// Intended for drain-style batch runs and tests.
    pub fn shutdown_when_queue_empty(mut self) -> Self {
        self.shutdown_when_queue_empty = true;
        self
    }

    /// Spawn the worker pool.
    pub fn start(self) -> DispatcherHandle {
        let wake = Arc::new(Notify::new());
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_signal = Arc::new(Notify::new());
        let dispatcher = Arc::new(self);

        let mut handles = Vec::with_capacity(dispatcher.config.workers);
        for index in 1..=dispatcher.config.workers {
            let worker = Worker {
                dispatcher: dispatcher.clone(),
                worker_id: format!("dispatcher-{}-{}", std::process::id(), index),
                wake: wake.clone(),
                stop_flag: stop_flag.clone(),
                stop_signal: stop_signal.clone(),
            };
            info!(worker_id = %worker.worker_id, "starting dispatcher worker");
            handles.push(tokio::spawn(async move { worker.run().await }));
        }

        DispatcherHandle {
            handles,
            wake,
            stop_flag,
            stop_signal,
        }
    }
}

struct Worker {
    dispatcher: Arc<Dispatcher>,
    worker_id: String,
    wake: Arc<Notify>,
    stop_flag: Arc<AtomicBool>,
    stop_signal: Arc<Notify>,
}

impl Worker {
    async fn run(&self) {
        loop {
            if self.stop_flag.load(Ordering::SeqCst) {
                debug!(worker_id = %self.worker_id, "worker stopping");
                break;
            }

            match self.run_once().await {
                Ok(claimed) if claimed > 0 => {}
                Ok(_) => {
                    if self.dispatcher.shutdown_when_queue_empty
                        && self.queue_drained().await
                    {
                        debug!(worker_id = %self.worker_id, "queue drained, worker exiting");
                        break;
                    }
                    self.idle().await;
                }
                Err(run_error) => {
                    error!(worker_id = %self.worker_id, %run_error, "dispatch cycle failed");
                    self.idle().await;
                }
            }
        }
    }

    /// One poll cycle: reap, claim, process. Returns the number of jobs
    /// claimed.
    async fn run_once(&self) -> Result<usize> {
        let dispatcher = &self.dispatcher;

        dispatcher
            .store
            .reap_stale_claims(dispatcher.config.claim_timeout())
            .await?;

        let jobs = dispatcher
            .store
            .claim_next(&self.worker_id, dispatcher.config.batch_size)
            .await?;

        let claimed = jobs.len();
        for job in jobs {
            if let Err(job_error) = self.process(job).await {
                // Store-level failure; the claim will be reaped if the job
                // was left in processing.
                error!(worker_id = %self.worker_id, %job_error, "job processing failed");
            }
        }

        Ok(claimed)
    }

    #[instrument(skip(self, job), fields(worker_id = %self.worker_id, job_id = %job.id, action = %job.action_type))]
    async fn process(&self, job: Job) -> Result<()> {
        let dispatcher = &self.dispatcher;

        let credential = match dispatcher.credentials.resolve(job.account_id).await {
            Ok(credential) => credential,
            Err(resolve_error) => {
                let category = match &resolve_error {
                    CredentialError::Unavailable(_) => ErrorCategory::Transient,
                    _ => ErrorCategory::AuthFailure,
                };
                dispatcher
                    .store
                    .fail(
                        job.id,
                        FailureDetails {
                            raw_error: resolve_error.to_string(),
                            category,
                            provider_code: None,
                            retry_after: None,
                        },
                        &self.worker_id,
                    )
                    .await?;
                return Ok(());
            }
        };

        let request_timeout = dispatcher.config.request_timeout();
        let outcome = timeout(
            request_timeout,
            dispatcher.provider.execute(&credential, &job),
        )
        .await;

        match outcome {
            Err(_elapsed) => {
                dispatcher
                    .store
                    .fail(
                        job.id,
                        FailureDetails {
                            raw_error: format!(
                                "provider request timed out after {request_timeout:?}"
                            ),
                            category: ErrorCategory::Transient,
                            provider_code: None,
                            retry_after: None,
                        },
                        &self.worker_id,
                    )
                    .await?;
            }
            Ok(Err(transport_error)) => {
                dispatcher
                    .store
                    .fail(
                        job.id,
                        FailureDetails {
                            raw_error: format!("transport error: {transport_error:#}"),
                            category: ErrorCategory::Transient,
                            provider_code: None,
                            retry_after: None,
                        },
                        &self.worker_id,
                    )
                    .await?;
            }
            Ok(Ok(response)) if response.is_success() => {
                dispatcher
                    .store
                    .complete(job.id, response.resource_id().as_deref(), &self.worker_id)
                    .await?;
            }
            Ok(Ok(response)) => {
                let category =
                    classify(response.http_status, response.error_code.as_deref());
                dispatcher
                    .store
                    .fail(
                        job.id,
                        FailureDetails {
                            raw_error: format!(
                                "HTTP {}: {}",
                                response.http_status, response.body
                            ),
                            category,
                            provider_code: response.error_code.clone(),
                            retry_after: response.retry_after,
                        },
                        &self.worker_id,
                    )
                    .await?;
            }
        }

        Ok(())
    }

    async fn queue_drained(&self) -> bool {
        match self.dispatcher.store.active_backlog().await {
            Ok(backlog) => backlog == 0,
            Err(backlog_error) => {
                warn!(worker_id = %self.worker_id, %backlog_error, "backlog check failed");
                false
            }
        }
    }

    async fn idle(&self) {
        let interval = self.sleep_duration_with_jitter();
        trace!(worker_id = %self.worker_id, ?interval, "no due jobs, sleeping");
        tokio::select! {
            _ = sleep(interval) => {}
            _ = self.wake.notified() => {
                trace!(worker_id = %self.worker_id, "woken by producer");
            }
            _ = self.stop_signal.notified() => {}
        }
    }

    fn sleep_duration_with_jitter(&self) -> Duration {
        let base = self.dispatcher.config.poll_interval();
        let jitter_ms = self.dispatcher.config.poll_jitter_ms;
        if jitter_ms == 0 {
            return base;
        }
        let jitter = rand::thread_rng().gen_range(0..=jitter_ms);
        base + Duration::from_millis(jitter)
    }
}
