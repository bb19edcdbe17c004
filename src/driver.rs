use std::time::Instant;

use serde::Serialize;

use crate::archive::Archive;
use crate::completion::{CompletionCheck, CompletionChecker};
use crate::config::Context;
use crate::domain::{EXTRA_INCOMPLETE, SubjectInfo};
use crate::error::PipelineError;
use crate::pipeline::PipelineDescriptor;
use crate::prereq::{ArchivePrereqs, PrereqChecker};
use crate::progress::{NoopSink, ProgressEvent, ProgressSink};
use crate::run_status::{MarkerRunStatus, RunStatus, RunStatusCheck, RunStatusChecker};
use crate::scheduler::SchedulerClient;
use crate::shadow::ShadowDispatcher;
use crate::submitter::{SubmitOptions, SubmitRequest, Submitter};

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    pub force: bool,
    pub dry_run: bool,
    pub submit: SubmitOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchAction {
    Submitted,
    WouldSubmit,
    PrereqsNotMet,
    AlreadyRunning,
    AlreadyComplete,
    Failed,
}

impl BatchAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchAction::Submitted => "submitted",
            BatchAction::WouldSubmit => "would submit",
            BatchAction::PrereqsNotMet => "prerequisites not met",
            BatchAction::AlreadyRunning => "already queued or running",
            BatchAction::AlreadyComplete => "already complete",
            BatchAction::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchItemResult {
    pub subject: String,
    pub scan: Option<String>,
    pub action: BatchAction,
    pub server: Option<String>,
    pub working_dir: Option<String>,
    pub job_ids: Vec<String>,
    pub error: Option<String>,
}

impl BatchItemResult {
    fn skipped(subject: &SubjectInfo, action: BatchAction) -> Self {
        Self {
            subject: subject.to_string(),
            scan: subject.scan().map(str::to_string),
            action,
            server: None,
            working_dir: None,
            job_ids: Vec::new(),
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub pipeline: String,
    pub items: Vec<BatchItemResult>,
}

impl BatchResult {
    pub fn failures(&self) -> usize {
        self.items
            .iter()
            .filter(|item| item.action == BatchAction::Failed)
            .count()
    }

    pub fn count(&self, action: BatchAction) -> usize {
        self.items.iter().filter(|item| item.action == action).count()
    }
}

/// Expands `all`/`incomplete`/absent scans of a per-scan subject into concrete scans.
pub fn expand_subject(
    archive: &Archive,
    descriptor: &'static PipelineDescriptor,
    completion: &CompletionChecker<'_>,
    subject: &SubjectInfo,
) -> Result<Vec<SubjectInfo>, PipelineError> {
    if !descriptor.is_per_scan() || subject.scan().is_some() {
        return Ok(vec![subject.clone()]);
    }
    let only_incomplete = subject.extra() == Some(EXTRA_INCOMPLETE);
    let mut expanded = Vec::new();
    for scan in archive.available_input_scans(descriptor, subject)? {
        let candidate = subject.with_extra(scan);
        if only_incomplete && completion.is_processing_complete(&candidate, &NoopSink)? {
            continue;
        }
        expanded.push(candidate);
    }
    if expanded.is_empty() {
        tracing::info!(
            pipeline = descriptor.name,
            subject = %subject,
            "no scans to process"
        );
    }
    Ok(expanded)
}

/// Run status of every concrete subject, expanding per-scan entries first.
pub fn run_statuses(
    archive: &Archive,
    descriptor: &'static PipelineDescriptor,
    run_status: &dyn RunStatusCheck,
    subjects: &[SubjectInfo],
) -> Result<Vec<(SubjectInfo, RunStatus)>, PipelineError> {
    let completion = CompletionChecker::new(archive, descriptor);
    let mut statuses = Vec::new();
    for subject in subjects {
        for candidate in expand_subject(archive, descriptor, &completion, subject)? {
            let status = run_status.run_status(&candidate)?;
            statuses.push((candidate, status));
        }
    }
    Ok(statuses)
}

/// Walks a subject list through prerequisite, run-status and completion checks,
/// submitting what remains.
pub struct BatchDriver<'a, S: SchedulerClient> {
    ctx: &'a Context,
    archive: Archive,
    scheduler: &'a S,
    dispatcher: ShadowDispatcher,
    descriptor: &'static PipelineDescriptor,
}

impl<'a, S: SchedulerClient> BatchDriver<'a, S> {
    pub fn new(
        ctx: &'a Context,
        scheduler: &'a S,
        descriptor: &'static PipelineDescriptor,
        dispatcher: ShadowDispatcher,
    ) -> Self {
        Self {
            ctx,
            archive: Archive::from_context(ctx),
            scheduler,
            dispatcher,
            descriptor,
        }
    }

    pub fn run(
        &mut self,
        subjects: &[SubjectInfo],
        options: &BatchOptions,
        sink: &dyn ProgressSink,
    ) -> Result<BatchResult, PipelineError> {
        let started = Instant::now();
        let archive = self.archive.clone();
        let prereqs = ArchivePrereqs::new(&archive, self.descriptor);
        let completion = CompletionChecker::new(&archive, self.descriptor)
            .with_registration(options.submit.registration)?;
        let run_status = RunStatusChecker::for_pipeline(self.ctx, self.descriptor, self.scheduler)?;

        let mut items = Vec::new();
        for subject in subjects {
            let expanded = match expand_subject(&archive, self.descriptor, &completion, subject) {
                Ok(expanded) => expanded,
                Err(err) => {
                    items.push(self.failed(subject, err));
                    continue;
                }
            };
            for candidate in expanded {
                let item = match self.process(
                    &candidate,
                    options,
                    &prereqs,
                    &run_status,
                    &completion,
                    sink,
                ) {
                    Ok(item) => item,
                    Err(err) => self.failed(&candidate, err),
                };
                sink.event(ProgressEvent {
                    message: format!("phase=Done; {} {}", item.subject, item.action.as_str()),
                    elapsed: Some(started.elapsed()),
                });
                items.push(item);
            }
        }

        let result = BatchResult {
            pipeline: self.descriptor.name.to_string(),
            items,
        };
        tracing::info!(
            pipeline = self.descriptor.name,
            submitted = result.count(BatchAction::Submitted),
            failed = result.failures(),
            "batch finished"
        );
        Ok(result)
    }

    fn process(
        &mut self,
        subject: &SubjectInfo,
        options: &BatchOptions,
        prereqs: &dyn PrereqChecker,
        run_status: &dyn RunStatusCheck,
        completion: &dyn CompletionCheck,
        sink: &dyn ProgressSink,
    ) -> Result<BatchItemResult, PipelineError> {
        sink.event(ProgressEvent::message(format!("phase=Check; {subject}")));

        if !prereqs.are_prereqs_met(subject, sink)? {
            tracing::info!(subject = %subject, "prerequisites not met, skipping");
            return Ok(BatchItemResult::skipped(subject, BatchAction::PrereqsNotMet));
        }

        let running = run_status.is_queued_or_running(subject)?;
        if running && !options.force {
            tracing::info!(subject = %subject, "already queued or running, skipping");
            return Ok(BatchItemResult::skipped(subject, BatchAction::AlreadyRunning));
        }

        if !options.force && completion.is_processing_complete(subject, sink)? {
            tracing::info!(subject = %subject, "already complete, skipping");
            return Ok(BatchItemResult::skipped(subject, BatchAction::AlreadyComplete));
        }

        if options.dry_run {
            return Ok(BatchItemResult::skipped(subject, BatchAction::WouldSubmit));
        }

        let mut replaced = None;
        if running {
            let status_root = self.ctx.running_status_dir()?.clone();
            let marker = MarkerRunStatus::new(status_root, self.descriptor).marker(subject);
            if marker.exists()? {
                tracing::warn!(
                    marker = %marker.path(),
                    "forced resubmission replaces running marker"
                );
                marker.remove()?;
                replaced = Some(marker);
            }
        }

        let server = self.dispatcher.next_url();
        let request = SubmitRequest {
            subject: subject.clone(),
            session: None,
            server: server.clone(),
            options: options.submit.clone(),
        };
        sink.event(ProgressEvent::message(format!("phase=Submit; {subject} via {server}")));
        let submitter = Submitter::new(self.ctx, self.scheduler);
        let submitted = match submitter.submit_jobs(self.descriptor, &request) {
            Ok(submitted) => submitted,
            Err(err) => {
                // The replaced submission may still be running.
                if let Some(marker) = &replaced {
                    if let Err(restore_err) = marker.create() {
                        tracing::error!(
                            marker = %marker.path(),
                            %restore_err,
                            "could not restore running marker"
                        );
                    }
                }
                return Err(err);
            }
        };

        Ok(BatchItemResult {
            subject: subject.to_string(),
            scan: subject.scan().map(str::to_string),
            action: BatchAction::Submitted,
            server: Some(server),
            working_dir: Some(submitted.working_dir.to_string()),
            job_ids: submitted
                .job_ids()
                .iter()
                .map(|id| id.as_str().to_string())
                .collect(),
            error: None,
        })
    }

    fn failed(&self, subject: &SubjectInfo, err: PipelineError) -> BatchItemResult {
        tracing::error!(
            pipeline = self.descriptor.name,
            subject = %subject,
            error = %err,
            "subject failed"
        );
        BatchItemResult {
            error: Some(err.to_string()),
            ..BatchItemResult::skipped(subject, BatchAction::Failed)
        }
    }
}
