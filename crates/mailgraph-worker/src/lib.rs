/// Mailgraph Worker - drains the job queue through the extraction pipeline
///
/// A pool of pollers claims jobs lane-by-lane, runs them under soft/hard
/// time limits, renews the job lease while work is active, and feeds
/// failures back into the queue's retry policy.
use chrono::{Duration as ChronoDuration, Utc};
use mailgraph_core::credentials::{CredentialStore, HttpTokenRefresher, TokenCipher};
use mailgraph_core::error::MailgraphError;
use mailgraph_core::extract::{ExtractorRouter, HttpLlmClient, LlmGovernor, TemplateCache};
use mailgraph_core::models::{
    Job, JobKind, MailgraphConfig, ProcessAttachmentPayload, ProcessUploadPayload,
};
use mailgraph_core::pipeline::{ExtractionPipeline, PipelineOutcome};
use mailgraph_core::providers::{RateLimiterRegistry, StaticProviderRegistry};
use mailgraph_core::queue::JobQueue;
use mailgraph_core::storage::FsStorageService;
use mailgraph_core::store::GraphStore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Everything a poller needs, built once at startup
pub struct WorkerContext {
    pub store: GraphStore,
    pub queue: JobQueue,
    pub pipeline: Arc<ExtractionPipeline>,
    pub templates: Arc<TemplateCache>,
    pub config: MailgraphConfig,
}

impl WorkerContext {
    pub async fn new(config: MailgraphConfig) -> Result<Arc<Self>, MailgraphError> {
        config.validate()?;

        let store = GraphStore::connect(&config.database_url).await?;
        let storage = Arc::new(FsStorageService::new(config.storage_root.clone()));
        let limiter = Arc::new(RateLimiterRegistry::new(config.rate_limit_burst));

        let cipher = TokenCipher::from_hex_key(&config.credential_key)?;
        let refresher = Arc::new(HttpTokenRefresher::new(
            reqwest::Client::new(),
            config.oauth.clone(),
        ));
        let credentials = Arc::new(CredentialStore::new(store.clone(), cipher, refresher));

        let llm_client = Arc::new(HttpLlmClient::new(&config.llm));
        let governor = Arc::new(LlmGovernor::new(llm_client, config.llm.clone()));
        let router = Arc::new(ExtractorRouter::new(governor, config.cost_policy));

        let templates = Arc::new(TemplateCache::new(store.clone(), config.template_ttl_days));
        let providers = Arc::new(StaticProviderRegistry::new(
            limiter,
            store.clone(),
            None,
        ));

        let pipeline = Arc::new(ExtractionPipeline::new(
            store.clone(),
            storage,
            router,
            templates.clone(),
            providers,
            credentials,
            ChronoDuration::seconds(config.worker.hard_time_limit_s as i64),
        ));

        let mut queue = JobQueue::new(store.clone());
        for (lane, cap) in &config.worker.lane_caps {
            queue = queue.with_lane_cap(lane, *cap);
        }

        Ok(Arc::new(Self {
            queue,
            store,
            pipeline,
            templates,
            config,
        }))
    }
}

/// Runs the worker pool until the shutdown signal fires. Pollers finish
/// their in-flight job before exiting.
pub async fn run_worker_pool(ctx: Arc<WorkerContext>, mut shutdown: watch::Receiver<bool>) {
    let concurrency = ctx.config.worker.worker_concurrency;
    info!(concurrency = concurrency, "Starting worker pool");

    let mut handles = Vec::with_capacity(concurrency);
    for worker_index in 0..concurrency {
        let ctx = ctx.clone();
        let mut shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            poll_loop(ctx, worker_index, &mut shutdown).await;
        }));
    }

    let _ = shutdown.changed().await;
    for handle in handles {
        let _ = handle.await;
    }
    info!("Worker pool drained");
}

async fn poll_loop(ctx: Arc<WorkerContext>, worker_index: usize, shutdown: &mut watch::Receiver<bool>) {
    let lease = ChronoDuration::seconds(ctx.config.worker.hard_time_limit_s as i64);

    loop {
        if *shutdown.borrow() {
            info!(worker = worker_index, "Poller stopping");
            return;
        }

        let job = match ctx.queue.claim_next(lease).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            }
            Err(e) => {
                error!(worker = worker_index, error = %e, "Claim failed");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        run_job(&ctx, job, worker_index).await;
    }
}

async fn run_job(ctx: &Arc<WorkerContext>, job: Job, worker_index: usize) {
    let soft_limit = Duration::from_secs(ctx.config.worker.soft_time_limit_s);
    let hard_limit = Duration::from_secs(ctx.config.worker.hard_time_limit_s);
    let soft_deadline = Instant::now() + soft_limit;

    info!(
        worker = worker_index,
        job_id = %job.id,
        kind = job.kind.as_str(),
        attempt = job.attempt,
        "Running job"
    );

    // Renew the lease at half-life while the job runs
    let renewer = {
        let queue = ctx.queue.clone();
        let job_id = job.id.clone();
        let epoch = job.lease_epoch;
        let hard = ctx.config.worker.hard_time_limit_s;
        tokio::spawn(async move {
            let interval = Duration::from_secs((hard / 2).max(1));
            loop {
                tokio::time::sleep(interval).await;
                if queue
                    .renew_lease(&job_id, epoch, Utc::now() + ChronoDuration::seconds(hard as i64))
                    .await
                    .is_err()
                {
                    return;
                }
            }
        })
    };

    let result = tokio::time::timeout(hard_limit, execute(ctx, &job, soft_deadline)).await;
    renewer.abort();

    match result {
        Ok(Ok(outcome)) => {
            if let Err(e) = ctx.queue.complete(&job.id, job.lease_epoch).await {
                warn!(job_id = %job.id, error = %e, "Completion fenced out");
                return;
            }
            info!(job_id = %job.id, outcome = ?outcome, "Job finished");
        }
        Ok(Err(e)) => {
            match ctx.queue.handle_failure(&job, &e).await {
                Ok(disposition) => {
                    info!(job_id = %job.id, error = %e, disposition = ?disposition, "Job failed");
                }
                Err(queue_err) => {
                    error!(job_id = %job.id, error = %queue_err, "Failure handling failed");
                }
            }
        }
        Err(_elapsed) => {
            // Hard limit: abandon; the lease expires and the job redelivers
            let e = MailgraphError::Queue("hard time limit exceeded".to_string());
            warn!(job_id = %job.id, "Job hit hard time limit");
            let _ = ctx.queue.handle_failure(&job, &e).await;
        }
    }
}

async fn execute(
    ctx: &Arc<WorkerContext>,
    job: &Job,
    soft_deadline: Instant,
) -> Result<PipelineOutcome, MailgraphError> {
    match job.kind {
        JobKind::ProcessAttachment => {
            let payload: ProcessAttachmentPayload = serde_json::from_value(job.payload.clone())?;
            ctx.pipeline
                .process_attachment(&payload, Some(soft_deadline))
                .await
        }
        JobKind::ProcessUpload => {
            let payload: ProcessUploadPayload = serde_json::from_value(job.payload.clone())?;
            ctx.pipeline
                .process_upload(&payload, Some(soft_deadline))
                .await
        }
        JobKind::TemplateSweep => {
            let swept = ctx.templates.sweep_expired().await?;
            info!(swept = swept, "Template sweep finished");
            Ok(PipelineOutcome::Completed)
        }
    }
}
