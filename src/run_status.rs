use std::fs::{self, OpenOptions};
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::config::Context;
use crate::domain::{EXTRA_ALL, SubjectInfo};
use crate::error::PipelineError;
use crate::pipeline::{PipelineDescriptor, RunStatusStrategy};
use crate::scheduler::{QSTAT_NAME_WIDTH, QueueState, SchedulerClient};

pub const MARKER_SUFFIX: &str = "RUNNING";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// A running marker exists; the scheduler state is not known.
    Marked,
    Running,
    Queued,
    Idle,
}

impl RunStatus {
    pub fn is_active(&self) -> bool {
        !matches!(self, RunStatus::Idle)
    }
}

pub trait RunStatusCheck {
    fn run_status(&self, subject: &SubjectInfo) -> Result<RunStatus, PipelineError>;

    fn is_queued_or_running(&self, subject: &SubjectInfo) -> Result<bool, PipelineError> {
        Ok(self.run_status(subject)?.is_active())
    }
}

/// Marker file for one `(pipeline, project, subject, classifier, extra)` key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningMarker {
    path: Utf8PathBuf,
}

impl RunningMarker {
    pub fn new(
        status_root: &Utf8Path,
        descriptor: &PipelineDescriptor,
        subject: &SubjectInfo,
    ) -> Self {
        let name = format!(
            "{}.{}_{}_{}_{}.{MARKER_SUFFIX}",
            descriptor.name,
            subject.project(),
            subject.subject_id(),
            subject.classifier_or(descriptor.default_classifier),
            subject.extra().unwrap_or(EXTRA_ALL),
        );
        Self {
            path: status_root.join(subject.project()).join(name),
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn exists(&self) -> Result<bool, PipelineError> {
        match fs::metadata(self.path.as_std_path()) {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(PipelineError::Filesystem(format!("{}: {err}", self.path))),
        }
    }

    /// Creates the marker; fails if another submission already holds it.
    pub fn create(&self) -> Result<(), PipelineError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| PipelineError::Filesystem(format!("{parent}: {err}")))?;
        }
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.path.as_std_path())
        {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                Err(PipelineError::AlreadyRunning(self.path.clone()))
            }
            Err(err) => Err(PipelineError::Filesystem(format!("{}: {err}", self.path))),
        }
    }

    pub fn remove(&self) -> Result<(), PipelineError> {
        match fs::remove_file(self.path.as_std_path()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(PipelineError::Filesystem(format!("{}: {err}", self.path))),
        }
    }
}

pub struct MarkerRunStatus {
    status_root: Utf8PathBuf,
    descriptor: &'static PipelineDescriptor,
}

impl MarkerRunStatus {
    pub fn new(status_root: Utf8PathBuf, descriptor: &'static PipelineDescriptor) -> Self {
        Self {
            status_root,
            descriptor,
        }
    }

    pub fn marker(&self, subject: &SubjectInfo) -> RunningMarker {
        RunningMarker::new(&self.status_root, self.descriptor, subject)
    }
}

impl RunStatusCheck for MarkerRunStatus {
    fn run_status(&self, subject: &SubjectInfo) -> Result<RunStatus, PipelineError> {
        if self.marker(subject).exists()? {
            Ok(RunStatus::Marked)
        } else {
            Ok(RunStatus::Idle)
        }
    }
}

/// Scheduler job name for a subject's submission.
pub fn job_name(descriptor: &PipelineDescriptor, subject: &SubjectInfo) -> String {
    format!("{}.{}", subject.subject_id(), descriptor.name)
}

/// Job-name token as the scheduler listing shows it after truncation.
pub fn scheduler_token(descriptor: &PipelineDescriptor, subject: &SubjectInfo) -> String {
    job_name(descriptor, subject)
        .chars()
        .take(QSTAT_NAME_WIDTH)
        .collect()
}

pub struct SchedulerRunStatus<'a, S: SchedulerClient> {
    scheduler: &'a S,
    user: String,
    descriptor: &'static PipelineDescriptor,
}

impl<'a, S: SchedulerClient> SchedulerRunStatus<'a, S> {
    pub fn new(scheduler: &'a S, user: String, descriptor: &'static PipelineDescriptor) -> Self {
        Self {
            scheduler,
            user,
            descriptor,
        }
    }
}

impl<S: SchedulerClient> RunStatusCheck for SchedulerRunStatus<'_, S> {
    fn run_status(&self, subject: &SubjectInfo) -> Result<RunStatus, PipelineError> {
        let token = scheduler_token(self.descriptor, subject);
        let rows = self.scheduler.list_jobs(&self.user)?;
        let first = rows
            .iter()
            .find(|row| row.user == self.user && row.job_name.starts_with(&token));
        Ok(match first.map(|row| row.state) {
            Some(QueueState::Running) => RunStatus::Running,
            Some(QueueState::Queued) => RunStatus::Queued,
            _ => RunStatus::Idle,
        })
    }
}

/// Marker files first; the scheduler listing only for legacy pipelines.
pub struct RunStatusChecker<'a, S: SchedulerClient> {
    markers: Option<MarkerRunStatus>,
    scheduler: Option<SchedulerRunStatus<'a, S>>,
}

impl<'a, S: SchedulerClient> RunStatusChecker<'a, S> {
    pub fn for_pipeline(
        ctx: &Context,
        descriptor: &'static PipelineDescriptor,
        scheduler: &'a S,
    ) -> Result<Self, PipelineError> {
        match descriptor.run_status {
            RunStatusStrategy::Marker => Ok(Self {
                markers: Some(MarkerRunStatus::new(
                    ctx.running_status_dir()?.clone(),
                    descriptor,
                )),
                scheduler: None,
            }),
            RunStatusStrategy::SchedulerQuery => {
                let markers = ctx
                    .running_status_dir
                    .clone()
                    .map(|root| MarkerRunStatus::new(root, descriptor));
                // Job names carry no scan, so per-scan markers are authoritative when present.
                let scheduler = if descriptor.is_per_scan() && markers.is_some() {
                    None
                } else {
                    Some(SchedulerRunStatus::new(
                        scheduler,
                        ctx.user.clone(),
                        descriptor,
                    ))
                };
                Ok(Self { markers, scheduler })
            }
        }
    }
}

impl<S: SchedulerClient> RunStatusCheck for RunStatusChecker<'_, S> {
    fn run_status(&self, subject: &SubjectInfo) -> Result<RunStatus, PipelineError> {
        if let Some(markers) = &self.markers {
            let status = markers.run_status(subject)?;
            if status.is_active() {
                return Ok(status);
            }
        }
        match &self.scheduler {
            Some(scheduler) => scheduler.run_status(subject),
            None => Ok(RunStatus::Idle),
        }
    }
}
