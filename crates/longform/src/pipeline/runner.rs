use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::{Config, PipelineConfig};
use crate::enhance::enhance;
use crate::events::JobProgressEvent;
use crate::job::{progress, Job, JobStage};
use crate::keywords::{resolve_targets, KeywordTarget};
use crate::llm::{RetryPolicy, TextCompletion};
use crate::planner::{PlanRequest, PlanTargets, PlanningError, StructurePlanner};
use crate::sources::{gather_context, ContextProvider, CorpusProvider, EmptyCorpus, NoContext};
use crate::store::JobStore;
use crate::style::{StyleProfileBuilder, StyleProfileCache};
use crate::verify::{enforce_ceiling, tidy_document, RewriteBrief, Rewriter, Verifier};
use crate::writer::{assemble_document, SectionWriter, WritingBrief};

use super::context::RunContext;
use super::error::PipelineError;
use super::progress::{NoopProgress, ProgressReporter};
use super::CancelFlag;

pub struct Pipeline {
    llm: Arc<dyn TextCompletion>,
    store: Arc<dyn JobStore>,
    corpus: Arc<dyn CorpusProvider>,
    context: Arc<dyn ContextProvider>,
    styles: StyleProfileCache,
    progress: Arc<dyn ProgressReporter>,
    settings: PipelineConfig,
    require_profile: bool,
    context_policy: RetryPolicy,
    context_timeout: Duration,
    planner: StructurePlanner,
    writer: SectionWriter,
    verifier: Verifier,
    rewriter: Rewriter,
    style_builder: StyleProfileBuilder,
}

impl Pipeline {
    /// Builds all stage components from config. Corpus, context and
    /// progress default to no-ops.
    pub fn from_config(
        config: &Config,
        llm: Arc<dyn TextCompletion>,
        store: Arc<dyn JobStore>,
    ) -> Self {
        let settings = config.pipeline.clone();
        Self {
            llm,
            store,
            corpus: Arc::new(EmptyCorpus),
            context: Arc::new(NoContext),
            styles: StyleProfileCache::new(Duration::from_secs(config.style.cache_ttl_secs)),
            progress: Arc::new(NoopProgress),
            require_profile: config.style.require_profile,
            context_policy: config.retry.policy(),
            context_timeout: config.llm.context_timeout(),
            planner: StructurePlanner::new(settings.section_tolerance),
            writer: SectionWriter::new(settings.writer_settings()),
            verifier: Verifier::new(settings.tolerance()),
            rewriter: Rewriter::default(),
            style_builder: StyleProfileBuilder::new(config.style.corpus_cap_chars),
            settings,
        }
    }

    pub fn with_corpus(mut self, corpus: Arc<dyn CorpusProvider>) -> Self {
        self.corpus = corpus;
        self
    }

    pub fn with_context(mut self, context: Arc<dyn ContextProvider>) -> Self {
        self.context = context;
        self
    }

    pub fn with_style_cache(mut self, styles: StyleProfileCache) -> Self {
        self.styles = styles;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Persists `job` and reports the checkpoint.
    pub fn checkpoint(&self, job: &Job, message: impl Into<String>) -> Result<(), PipelineError> {
        self.store.save_job(job)?;
        let event = JobProgressEvent::for_job(job, message);
        self.store.record_event(&event)?;
        self.progress.report(&event);
        Ok(())
    }

    /// Drives `job` from its first unfinished stage to a terminal stage.
    ///
    /// Stage failures are recorded on the returned job; only a store
    /// failure, which leaves nothing to record them in, is returned as `Err`.
    pub async fn run(&self, job: Job, cancel: CancelFlag) -> Result<Job, PipelineError> {
        let span = info_span!("job", job_id = %job.id);
        self.run_inner(job, cancel).instrument(span).await
    }

    async fn run_inner(&self, job: Job, cancel: CancelFlag) -> Result<Job, PipelineError> {
        let targets = resolve_targets(&job.params.keywords, self.settings.default_keyword_target);
        let mut ctx = RunContext::new(job, targets, cancel);

        match self.execute(&mut ctx).await {
            Ok(()) => Ok(ctx.job),
            Err(PipelineError::Cancelled) => {
                if !ctx.job.stage.is_terminal() {
                    ctx.job.cancel()?;
                    self.checkpoint(&ctx.job, "cancelled")?;
                }
                info!(stage = %ctx.job.stage, "Job cancelled");
                Ok(ctx.job)
            }
            Err(PipelineError::Store(e)) => {
                tracing::error!(error = %e, "Checkpoint failed, abandoning run");
                Err(PipelineError::Store(e))
            }
            Err(e) => {
                let message = e.to_string();
                warn!(stage = %ctx.job.stage, error = %message, "Job failed");
                ctx.job.fail(message.clone());
                self.checkpoint(&ctx.job, format!("failed: {}", message))?;
                Ok(ctx.job)
            }
        }
    }

    async fn execute(&self, ctx: &mut RunContext) -> Result<(), PipelineError> {
        if ctx.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let resume = ctx.job.resume_stage();
        let entry_progress = match resume {
            JobStage::Planning => progress::PLANNING,
            JobStage::Writing => {
                let total = ctx.job.outline.as_ref().map_or(0, |o| o.sections.len());
                progress::writing(ctx.job.sections.len(), total)
            }
            _ => progress::verifying(ctx.job.rewrite_attempts, self.settings.max_rewrite_attempts),
        };
        let resuming = ctx.job.stage != JobStage::Pending;
        ctx.job.error = None;
        ctx.job.failed_stage = None;
        ctx.job.advance(resume, entry_progress)?;
        if resuming {
            info!(stage = %resume, sections = ctx.job.sections.len(), "Resuming job");
            self.checkpoint(&ctx.job, format!("resumed at {}", resume))?;
        } else {
            self.checkpoint(&ctx.job, "planning")?;
        }

        self.load_style(ctx)
            .instrument(info_span!("style_profile"))
            .await?;

        if ctx.job.stage == JobStage::Planning {
            self.step_plan(ctx).instrument(info_span!("plan")).await?;
        }
        if ctx.job.stage == JobStage::Writing {
            self.step_write(ctx).instrument(info_span!("write")).await?;
        }
        self.step_verify(ctx).instrument(info_span!("verify")).await?;
        self.step_finalize(ctx)
            .instrument(info_span!("finalize"))
            .await
    }

    /// Honors both the in-process flag and a cancellation persisted by
    /// another process.
    fn ensure_not_cancelled(&self, ctx: &RunContext) -> Result<(), PipelineError> {
        if ctx.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        if let Some(stored) = self.store.load_job(&ctx.job.id)? {
            if stored.stage == JobStage::Cancelled {
                ctx.cancel.cancel();
                return Err(PipelineError::Cancelled);
            }
        }
        Ok(())
    }

    async fn load_style(&self, ctx: &mut RunContext) -> Result<(), PipelineError> {
        let Some(user_id) = ctx.job.params.user_id.clone() else {
            return Ok(());
        };
        if let Some(profile) = self.styles.get(&user_id) {
            debug!(user_id = %user_id, "Style profile cache hit");
            ctx.style = Some(profile);
            return Ok(());
        }

        match self
            .style_builder
            .build_for_user(self.llm.as_ref(), self.corpus.as_ref(), &user_id)
            .await
        {
            Ok(profile) => ctx.style = Some(self.styles.insert(&user_id, profile)),
            Err(e) if self.require_profile => return Err(e.into()),
            Err(e) => warn!(user_id = %user_id, error = %e, "Continuing without style profile"),
        }
        Ok(())
    }

    async fn step_plan(&self, ctx: &mut RunContext) -> Result<(), PipelineError> {
        let params = ctx.job.params.clone();
        let context_keywords: Vec<String> = ctx
            .targets
            .iter()
            .take(self.settings.context_keywords)
            .map(|(k, _)| k.clone())
            .collect();
        let external = if context_keywords.is_empty() {
            None
        } else {
            gather_context(
                self.context.as_ref(),
                &context_keywords,
                &self.context_policy,
                self.context_timeout,
            )
            .await
        };
        self.ensure_not_cancelled(ctx)?;

        let targets =
            PlanTargets::for_word_count(params.target_word_count, &self.settings.heading_density);
        let attempts = self.settings.planning_attempts.max(1);
        let mut correction: Option<String> = None;
        let mut fallback = None;
        let mut attempt = 1;

        let plan = loop {
            let request = PlanRequest {
                theme: &params.theme,
                target_word_count: params.target_word_count,
                targets: Some(targets),
                keywords: &ctx.targets,
                remarks: params.remarks.as_deref(),
                offer: params.offer.as_deref(),
                context: external.as_deref(),
                persona: params.persona.as_deref(),
                style: ctx.style.as_deref(),
                correction: correction.as_deref(),
            };
            let result = self.planner.plan(self.llm.as_ref(), &request).await;
            self.ensure_not_cancelled(ctx)?;

            let error = match result {
                Ok(plan) => match self.planner.validate(&plan, &targets) {
                    Ok(()) => break plan,
                    Err(e) => {
                        fallback = Some(plan);
                        e
                    }
                },
                Err(e) => e,
            };

            if attempt >= attempts {
                match fallback.take() {
                    Some(plan) => {
                        warn!(attempts, error = %error, "Accepting outline outside target band");
                        break plan;
                    }
                    None => return Err(error.into()),
                }
            }
            warn!(attempt, error = %error, "Planning attempt rejected");
            let note = error.correction_note();
            correction = (!note.is_empty()).then_some(note);
            attempt += 1;
        };

        if plan.outline.sections.is_empty() {
            return Err(PlanningError::NoSections.into());
        }
        let total = plan.outline.sections.len();
        ctx.job.outline = Some(plan.outline);
        ctx.job.estimates = Some(plan.estimates);
        ctx.job.sections.clear();
        ctx.job.document = None;
        ctx.job.advance(JobStage::Writing, progress::writing(0, total))?;
        self.checkpoint(&ctx.job, format!("outline planned with {} sections", total))
    }

    async fn step_write(&self, ctx: &mut RunContext) -> Result<(), PipelineError> {
        let Some(outline) = ctx.job.outline.clone() else {
            return Err(PlanningError::NoSections.into());
        };
        let params = ctx.job.params.clone();
        let total = outline.sections.len();

        for index in ctx.job.sections.len()..total {
            let text = self
                .write_one(ctx, &outline, &params, index)
                .instrument(info_span!("section", index))
                .await?;
            // A cancellation that arrived mid-call discards the section.
            self.ensure_not_cancelled(ctx)?;

            ctx.job.sections.push(text);
            let document = assemble_document(outline.title.as_deref(), &ctx.job.sections);
            ctx.job.keyword_counts = keyword_counts(&document, &ctx.targets);
            ctx.job.document = Some(document);
            ctx.job
                .advance(JobStage::Writing, progress::writing(index + 1, total))?;
            self.checkpoint(&ctx.job, format!("section {}/{} written", index + 1, total))?;
        }

        ctx.job.advance(JobStage::Verifying, progress::WRITING_END)?;
        self.checkpoint(&ctx.job, "all sections written")
    }

    async fn write_one(
        &self,
        ctx: &RunContext,
        outline: &crate::planner::Outline,
        params: &crate::job::JobParams,
        index: usize,
    ) -> Result<String, PipelineError> {
        let attempts = self.settings.section_attempts.max(1);
        let brief = WritingBrief {
            theme: &params.theme,
            outline: Some(outline),
            style: ctx.style.as_deref(),
            persona: params.persona.as_deref(),
            keywords: &ctx.targets,
            target_word_count: params.target_word_count,
            remarks: params.remarks.as_deref(),
            offer: params.offer.as_deref(),
        };

        let mut attempt = 1;
        loop {
            self.ensure_not_cancelled(ctx)?;
            match self
                .writer
                .write_section(self.llm.as_ref(), &brief, index, &ctx.job.sections)
                .await
            {
                Ok(text) => return Ok(text),
                Err(e) if attempt < attempts => {
                    warn!(attempt, error = %e, "Section attempt failed");
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn step_verify(&self, ctx: &mut RunContext) -> Result<(), PipelineError> {
        let params = ctx.job.params.clone();
        let keyword = ctx.primary_keyword().map(str::to_string);
        let cap = self.settings.max_rewrite_attempts;

        let raw = match ctx.job.document {
            Some(ref document) => document.clone(),
            None => {
                let title = ctx.job.outline.as_ref().and_then(|o| o.title.as_deref());
                assemble_document(title, &ctx.job.sections)
            }
        };
        let mut document = self.tidy(&raw, keyword.as_deref());

        loop {
            let check = self
                .verifier
                .check(&document, &ctx.targets, params.target_word_count);
            ctx.job.keyword_counts = counts_of(&check.keywords);
            ctx.job.document = Some(document.clone());
            info!(
                passed = check.passed,
                words = check.word_count,
                issues = check.issues.len(),
                rewrites = ctx.job.rewrite_attempts,
                "Document verified"
            );
            let passed = check.passed;
            ctx.job.quality_check = Some(check.clone());

            if passed || ctx.job.rewrite_attempts >= cap {
                return Ok(());
            }
            self.ensure_not_cancelled(ctx)?;

            ctx.job.advance(
                JobStage::Rewriting,
                progress::verifying(ctx.job.rewrite_attempts, cap),
            )?;
            ctx.job.rewrite_attempts += 1;
            let attempt = ctx.job.rewrite_attempts;
            self.checkpoint(&ctx.job, format!("rewrite {}/{}", attempt, cap))?;

            let brief = RewriteBrief {
                theme: &params.theme,
                target_word_count: params.target_word_count,
                style: ctx.style.as_deref(),
                persona: params.persona.as_deref(),
                max_output_tokens: Some(self.rewrite_token_budget(params.target_word_count)),
            };
            let result = self
                .rewriter
                .rewrite(self.llm.as_ref(), &document, &check, &brief)
                .instrument(info_span!("rewrite", attempt))
                .await;
            self.ensure_not_cancelled(ctx)?;

            let message = match result {
                Ok(text) => {
                    document = self.tidy(&text, keyword.as_deref());
                    format!("rewrite {}/{} applied", attempt, cap)
                }
                Err(e) => {
                    // The attempt is spent either way; the previous text stands.
                    warn!(attempt, error = %e, "Rewrite discarded");
                    format!("rewrite {}/{} discarded: {}", attempt, cap, e)
                }
            };
            ctx.job.document = Some(document.clone());
            ctx.job
                .advance(JobStage::Verifying, progress::verifying(attempt, cap))?;
            self.checkpoint(&ctx.job, message)?;
        }
    }

    async fn step_finalize(&self, ctx: &mut RunContext) -> Result<(), PipelineError> {
        self.ensure_not_cancelled(ctx)?;
        let params = ctx.job.params.clone();
        let document = ctx.job.document.clone().unwrap_or_default();

        if params.auto_enhance {
            match enhance(self.llm.as_ref(), &params.theme, &document)
                .instrument(info_span!("enhance"))
                .await
            {
                Ok(mut enhancements) => {
                    if enhancements.fit_within(self.settings.field_ceiling_chars) {
                        warn!(
                            ceiling = self.settings.field_ceiling_chars,
                            faq = enhancements.faq.len(),
                            "Enhancements trimmed to storage ceiling"
                        );
                    }
                    ctx.job.enhancements = Some(enhancements);
                }
                Err(e) => warn!(error = %e, "Skipping enhancements"),
            }
            self.ensure_not_cancelled(ctx)?;
        }

        let bounded = enforce_ceiling(
            self.llm.as_ref(),
            &document,
            self.settings.field_ceiling_chars,
        )
        .await;
        // A cancellation that arrived during compression discards its result.
        self.ensure_not_cancelled(ctx)?;
        if bounded.compressed || bounded.truncated {
            info!(
                compressed = bounded.compressed,
                truncated = bounded.truncated,
                chars = bounded.text.chars().count(),
                "Document reduced to storage ceiling"
            );
            let check =
                self.verifier
                    .check(&bounded.text, &ctx.targets, params.target_word_count);
            ctx.job.keyword_counts = counts_of(&check.keywords);
            ctx.job.quality_check = Some(check);
        }
        ctx.job.document = Some(bounded.text);
        // Sections only serve resumption; the document supersedes them.
        ctx.job.sections.clear();

        ctx.job.advance(JobStage::Completed, progress::COMPLETED)?;
        info!(outcome = ?ctx.job.outcome(), "Job completed");
        self.checkpoint(&ctx.job, "completed")
    }

    fn tidy(&self, text: &str, keyword: Option<&str>) -> String {
        let placeholder = self
            .settings
            .conclusion_placeholder
            .as_deref()
            .zip(keyword);
        tidy_document(text, placeholder)
    }

    fn rewrite_token_budget(&self, target_word_count: u32) -> u32 {
        let words = (target_word_count as f32 * self.settings.section_ceiling_ratio).round();
        ((words * self.settings.tokens_per_word).ceil() as u32).max(256)
    }
}

fn counts_of(keywords: &[KeywordTarget]) -> BTreeMap<String, u32> {
    keywords
        .iter()
        .map(|k| (k.keyword.clone(), k.current))
        .collect()
}

fn keyword_counts(document: &str, targets: &[(String, u32)]) -> BTreeMap<String, u32> {
    counts_of(&crate::keywords::compute_shortfalls(document, targets))
}
