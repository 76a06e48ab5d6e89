//! Public entry points: start, observe, cancel, retry and recover jobs.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::{broadcast, Semaphore};

use crate::config::Config;
use crate::error::{LongformError, Result};
use crate::events::{JobProgressBroadcaster, JobProgressEvent};
use crate::job::{Job, JobParams, JobStage, JobStatusView};
use crate::llm::{RetryingCompletion, TextCompletion};
use crate::pipeline::{BroadcastProgress, CancelFlag, Pipeline};
use crate::sources::{ContextProvider, CorpusProvider};
use crate::store::JobStore;
use crate::style::StyleProfileCache;

/// Owns the job pipeline and the set of jobs running in this process.
pub struct ContentService {
    pipeline: Arc<Pipeline>,
    store: Arc<dyn JobStore>,
    events: JobProgressBroadcaster,
    styles: StyleProfileCache,
    permits: Arc<Semaphore>,
    running: Arc<RwLock<HashMap<String, CancelFlag>>>,
}

pub struct ContentServiceBuilder {
    config: Config,
    llm: Arc<dyn TextCompletion>,
    store: Arc<dyn JobStore>,
    corpus: Option<Arc<dyn CorpusProvider>>,
    context: Option<Arc<dyn ContextProvider>>,
}

impl ContentServiceBuilder {
    pub fn corpus(mut self, corpus: Arc<dyn CorpusProvider>) -> Self {
        self.corpus = Some(corpus);
        self
    }

    pub fn context(mut self, context: Arc<dyn ContextProvider>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn build(self) -> ContentService {
        let llm: Arc<dyn TextCompletion> = Arc::new(RetryingCompletion::new(
            self.llm,
            self.config.retry.policy(),
            self.config.llm.timeout(),
        ));
        let events = JobProgressBroadcaster::default();
        let styles = StyleProfileCache::new(Duration::from_secs(self.config.style.cache_ttl_secs));

        let mut pipeline = Pipeline::from_config(&self.config, llm, Arc::clone(&self.store))
            .with_style_cache(styles.clone())
            .with_progress(Arc::new(BroadcastProgress::new(events.clone())));
        if let Some(corpus) = self.corpus {
            pipeline = pipeline.with_corpus(corpus);
        }
        if let Some(context) = self.context {
            pipeline = pipeline.with_context(context);
        }

        ContentService {
            pipeline: Arc::new(pipeline),
            store: self.store,
            events,
            styles,
            permits: Arc::new(Semaphore::new(self.config.max_concurrent_jobs.max(1))),
            running: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl ContentService {
    /// Every completion call made by the service goes through the retry
    /// policy and timeout from `config`.
    pub fn builder(
        config: Config,
        llm: Arc<dyn TextCompletion>,
        store: Arc<dyn JobStore>,
    ) -> ContentServiceBuilder {
        ContentServiceBuilder {
            config,
            llm,
            store,
            corpus: None,
            context: None,
        }
    }

    /// Persists a new job and schedules it. Returns the job id.
    pub fn start_job(&self, params: JobParams) -> Result<String> {
        validate_params(&params)?;
        let job = Job::new(params);
        let id = job.id.clone();
        self.pipeline.checkpoint(&job, "queued")?;
        tracing::info!(job_id = %id, theme = %job.params.theme, "Job queued");
        if let Some(cancel) = self.reserve(&id) {
            self.spawn(job, cancel);
        }
        Ok(id)
    }

    pub fn get_job_status(&self, id: &str) -> Result<JobStatusView> {
        Ok(self.load(id)?.status())
    }

    pub fn get_job(&self, id: &str) -> Result<Job> {
        self.load(id)
    }

    /// Jobs in any of `stages` (all when empty), oldest first.
    pub fn list_jobs(&self, stages: &[JobStage]) -> Result<Vec<JobStatusView>> {
        Ok(self
            .store
            .list_jobs(stages)?
            .iter()
            .map(Job::status)
            .collect())
    }

    pub fn job_events(&self, id: &str) -> Result<Vec<JobProgressEvent>> {
        Ok(self.store.events(id)?)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.events.subscribe()
    }

    /// Requests cancellation. A job running here stops at its next
    /// checkpoint; any other non-terminal job is marked cancelled directly.
    pub fn cancel_job(&self, id: &str) -> Result<()> {
        let flag = read_running(&self.running).get(id).cloned();
        if let Some(flag) = flag {
            tracing::info!(job_id = %id, "Cancellation requested");
            flag.cancel();
            return Ok(());
        }

        let mut job = self.load(id)?;
        if job.stage == JobStage::Cancelled {
            return Ok(());
        }
        job.cancel()?;
        self.pipeline.checkpoint(&job, "cancelled")?;
        tracing::info!(job_id = %id, "Job cancelled");
        Ok(())
    }

    /// Re-runs a failed or cancelled job from its first unfinished stage.
    pub fn retry_job(&self, id: &str) -> Result<()> {
        let job = self.load(id)?;
        let not_retryable = || LongformError::NotRetryable {
            id: id.to_string(),
            stage: job.stage.to_string(),
        };
        if !matches!(job.stage, JobStage::Failed | JobStage::Cancelled) {
            return Err(not_retryable());
        }
        let cancel = self.reserve(id).ok_or_else(not_retryable)?;
        tracing::info!(job_id = %id, resume = %job.resume_stage(), "Retrying job");
        self.spawn(job, cancel);
        Ok(())
    }

    /// Reschedules jobs left pending or mid-stage by a previous process.
    pub fn recover_interrupted(&self) -> Result<Vec<String>> {
        let stages = [
            JobStage::Pending,
            JobStage::Planning,
            JobStage::Writing,
            JobStage::Verifying,
            JobStage::Rewriting,
        ];
        let mut recovered = Vec::new();
        for job in self.store.list_jobs(&stages)? {
            let Some(cancel) = self.reserve(&job.id) else {
                continue;
            };
            tracing::info!(job_id = %job.id, stage = %job.stage, "Recovering interrupted job");
            recovered.push(job.id.clone());
            self.spawn(job, cancel);
        }
        Ok(recovered)
    }

    /// Drops a user's cached style profile, e.g. after their corpus changed.
    pub fn invalidate_style(&self, user_id: &str) {
        self.styles.invalidate(user_id);
    }

    /// Waits until a job running in this process reaches a terminal stage.
    ///
    /// Fails with [`LongformError::NotRunning`] for a job that is neither
    /// terminal nor running here, since nothing would ever wake the waiter.
    pub async fn wait_for(&self, id: &str) -> Result<JobStatusView> {
        // Subscribe before reading so no terminal event can slip between.
        let mut rx = self.events.subscribe();
        loop {
            // The task leaves `running` only after its final checkpoint, so
            // a status read after seeing it gone is the last one.
            let running = self.is_running(id);
            let status = self.get_job_status(id)?;
            if !running {
                if status.stage.is_terminal() {
                    return Ok(status);
                }
                return Err(LongformError::NotRunning {
                    id: id.to_string(),
                    stage: status.stage.to_string(),
                });
            }
            match rx.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return self.get_job_status(id),
            }
        }
    }

    pub fn is_running(&self, id: &str) -> bool {
        read_running(&self.running).contains_key(id)
    }

    fn load(&self, id: &str) -> Result<Job> {
        self.store
            .load_job(id)?
            .ok_or_else(|| LongformError::JobNotFound(id.to_string()))
    }

    /// Claims `id` for one run. `None` when a run already holds it.
    fn reserve(&self, id: &str) -> Option<CancelFlag> {
        match write_running(&self.running).entry(id.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => Some(slot.insert(CancelFlag::new()).clone()),
        }
    }

    fn spawn(&self, job: Job, cancel: CancelFlag) {
        let id = job.id.clone();

        let pipeline = Arc::clone(&self.pipeline);
        let permits = Arc::clone(&self.permits);
        let running = Arc::clone(&self.running);
        let events = self.events.clone();

        tokio::spawn(async move {
            let result = match permits.acquire_owned().await {
                Ok(_permit) => pipeline.run(job, cancel).await.map(|job| job.stage),
                Err(_) => {
                    tracing::error!(job_id = %id, "Scheduler closed before job could start");
                    Ok(job.stage)
                }
            };
            write_running(&running).remove(&id);

            match result {
                Ok(stage) => tracing::debug!(job_id = %id, stage = %stage, "Job task finished"),
                Err(e) => tracing::error!(job_id = %id, error = %e, "Job task aborted"),
            }
            // Wake waiters that check `is_running` after the task exits.
            if let Ok(Some(job)) = pipeline.store().load_job(&id) {
                events.send(JobProgressEvent::for_job(&job, "task finished"));
            }
        });
    }
}

fn validate_params(params: &JobParams) -> Result<()> {
    let message = if params.theme.trim().is_empty() {
        "theme must not be empty"
    } else if params.target_word_count == 0 {
        "targetWordCount must be positive"
    } else {
        return Ok(());
    };
    Err(LongformError::InvalidParams(message.to_string()))
}

fn read_running(
    lock: &RwLock<HashMap<String, CancelFlag>>,
) -> std::sync::RwLockReadGuard<'_, HashMap<String, CancelFlag>> {
    lock.read().unwrap_or_else(|poisoned| {
        log::warn!("Running-jobs lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

fn write_running(
    lock: &RwLock<HashMap<String, CancelFlag>>,
) -> std::sync::RwLockWriteGuard<'_, HashMap<String, CancelFlag>> {
    lock.write().unwrap_or_else(|poisoned| {
        log::warn!("Running-jobs lock was poisoned, recovering");
        poisoned.into_inner()
    })
}
