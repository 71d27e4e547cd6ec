//! Worker pool: a fixed set of executors that reserve jobs, route them to
//! handlers by name, and retire them according to the outcome.

use crate::config::PipelineSettings;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::handlers::{HandlerRegistry, archive};
use crate::model::job::QueuedJob;
use crate::queue::RetryPolicy;
use crate::telemetry::job::{record_state_transition, start_job_span};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, warn};

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Queue namespace the pool serves. Used for logs and metrics.
    pub namespace: String,
    /// Number of concurrent executors.
    pub concurrency: usize,
    /// How long an idle executor waits before polling again.
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            namespace: "chunklog".to_string(),
            concurrency: 4,
            poll_interval: Duration::from_millis(500),
            retry: RetryPolicy::default(),
        }
    }
}

impl PoolConfig {
    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self {
            namespace: settings.namespace.clone(),
            concurrency: settings.concurrency,
            retry: RetryPolicy {
                max_attempts: settings.max_attempts,
                ..RetryPolicy::default()
            },
            ..Self::default()
        }
    }
}

/// The worker pool. Cloning yields another handle to the same pool.
#[derive(Clone)]
pub struct WorkerPool {
    ctx: Arc<Context>,
    registry: Arc<HandlerRegistry>,
    config: PoolConfig,
    shutdown: CancellationToken,
    active_jobs: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub fn new(ctx: Arc<Context>, registry: Arc<HandlerRegistry>, config: PoolConfig) -> Self {
        Self {
            ctx,
            registry,
            config,
            shutdown: CancellationToken::new(),
            active_jobs: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Stop taking new jobs. In-flight handlers run to completion and
    /// [`WorkerPool::run`] returns once they have.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Handlers running right now.
    pub fn active_jobs(&self) -> usize {
        self.active_jobs.load(Ordering::Relaxed)
    }

    /// Run all executors until shutdown, then drain.
    pub async fn run(&self) -> Result<()> {
        if self.config.concurrency == 0 {
            return Err(Error::Config("worker pool needs at least one executor".to_string()));
        }

        info!(
            namespace = %self.config.namespace,
            concurrency = self.config.concurrency,
            "worker pool started"
        );

        let mut executors = JoinSet::new();
        for worker in 0..self.config.concurrency {
            let pool = self.clone();
            executors.spawn(async move { pool.work(worker).await });
        }

        while let Some(joined) = executors.join_next().await {
            if let Err(e) = joined {
                error!("executor task failed: {e}");
            }
        }

        info!(namespace = %self.config.namespace, "worker pool drained");
        Ok(())
    }

    /// One executor: reserve, dispatch, repeat. Shutdown is only observed
    /// between jobs.
    async fn work(&self, worker: usize) {
        loop {
            if self.shutdown.is_cancelled() {
                return;
            }

            match self.ctx.queue.reserve().await {
                Ok(Some(job)) => {
                    self.dispatch(worker, job).await;
                    continue;
                }
                Ok(None) => {}
                Err(e) => error!(worker, "reserve failed: {e}"),
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    /// Run one job and retire it.
    async fn dispatch(&self, worker: usize, job: QueuedJob) {
        let name = job.job.name();
        let job_span = start_job_span(name, &job.id.0, job.attempts);

        async {
            let Some(handler) = self.registry.get(name) else {
                warn!(job = name, "no handler registered, dead-lettering");
                metrics::jobs_unroutable().add(1, &[KeyValue::new("job", name)]);
                record_state_transition(&job_span, "running", "dead");
                if let Err(e) = self.ctx.queue.kill(&job, "no handler registered").await {
                    error!(id = %job.id, "kill failed: {e}");
                }
                return;
            };

            self.active_jobs.fetch_add(1, Ordering::Relaxed);
            let start = Instant::now();

            // Run on its own task so a panicking handler costs one job, not
            // the executor.
            let ctx = Arc::clone(&self.ctx);
            let reserved = job.clone();
            let result = tokio::spawn(
                async move { handler.handle(&ctx, &reserved).await }.in_current_span(),
            )
            .await
            .unwrap_or_else(|e| Err(Error::Other(format!("handler panicked: {e}"))));

            self.active_jobs.fetch_sub(1, Ordering::Relaxed);
            let duration_ms = start.elapsed().as_millis() as u64;
            metrics::operation_duration_ms().record(
                duration_ms as f64,
                &[KeyValue::new("operation", "job.execute")],
            );

            let outcome = self.retire(worker, &job, result, duration_ms, &job_span).await;
            metrics::job_outcomes().add(
                1,
                &[KeyValue::new("job", name), KeyValue::new("outcome", outcome)],
            );
        }
        .instrument(job_span.clone())
        .await
    }

    /// Hand the job back to the queue according to how it went. Returns the
    /// outcome label.
    async fn retire(
        &self,
        worker: usize,
        job: &QueuedJob,
        result: Result<()>,
        duration_ms: u64,
        span: &tracing::Span,
    ) -> &'static str {
        let queue = &self.ctx.queue;
        let (outcome, retired) = match result.map_err(|e| self.classify(job, e)) {
            Ok(()) => {
                record_state_transition(span, "running", "completed");
                info!(worker, id = %job.id, duration_ms, "job completed");
                ("completed", queue.complete(job).await)
            }
            Err((e, Some(delay))) => {
                record_state_transition(span, "running", "failed");
                record_state_transition(span, "failed", "queued");
                warn!(
                    worker,
                    id = %job.id,
                    attempt = job.attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %e,
                    "job failed, will retry"
                );
                ("retried", queue.retry(job, delay, &e.to_string()).await)
            }
            Err((e, None)) => {
                record_state_transition(span, "running", "dead");
                error!(
                    worker,
                    id = %job.id,
                    attempt = job.attempts,
                    retryable = e.is_retryable(),
                    validation = e.is_validation(),
                    error = %e,
                    "job dead-lettered"
                );
                ("dead", queue.kill(job, &e.to_string()).await)
            }
        };

        if let Err(e) = retired {
            // The reservation lapses and the queue redelivers it.
            error!(id = %job.id, outcome, "failed to retire job: {e}");
        }
        outcome
    }

    /// Decide a failure's fate: `Some(delay)` to retry, `None` to
    /// dead-letter. A chunk missing from an archival is waited for until the
    /// chunk TTL has run out since the task completed, however many attempts
    /// that takes; everything else follows the retry policy.
    fn classify(&self, job: &QueuedJob, err: Error) -> (Error, Option<Duration>) {
        let delay = self.config.retry.backoff(job.attempts);
        let ttl = self.ctx.settings.chunk_ttl;
        if let Error::MissingChunk { task_id, position } = &err
            && !ttl.is_zero()
            && let Some(completed_at) = archive::completion_time(job)
        {
            return match archive::expiry(ttl, task_id, *position, completed_at) {
                Some(expired) => (expired, None),
                None => (err, Some(delay)),
            };
        }
        if err.is_retryable() && !self.config.retry.exhausted(job.attempts) {
            (err, Some(delay))
        } else {
            (err, None)
        }
    }
}
