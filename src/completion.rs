use camino::Utf8PathBuf;
use serde::Serialize;

use crate::archive::{Archive, scan_for};
use crate::checklist::{Checklist, ChecklistContext, StandardChecklist};
use crate::domain::{Registration, SubjectInfo};
use crate::error::PipelineError;
use crate::pipeline::PipelineDescriptor;
use crate::progress::{ProgressEvent, ProgressSink};

pub trait CompletionCheck {
    fn is_processing_complete(
        &self,
        subject: &SubjectInfo,
        sink: &dyn ProgressSink,
    ) -> Result<bool, PipelineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckMode {
    /// Stop at the first missing file.
    #[default]
    FirstMissing,
    /// Look at every expected file before answering.
    Exhaustive,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionReport {
    pub resource_dir: Utf8PathBuf,
    pub resource_exists: bool,
    pub missing_files: Vec<Utf8PathBuf>,
    pub files_checked: usize,
}

impl CompletionReport {
    pub fn is_complete(&self) -> bool {
        self.resource_exists && self.missing_files.is_empty()
    }
}

pub struct CompletionChecker<'a> {
    archive: &'a Archive,
    descriptor: &'static PipelineDescriptor,
    registration: Registration,
    mode: CheckMode,
    checklist: Box<dyn Checklist + 'a>,
}

impl<'a> CompletionChecker<'a> {
    pub fn new(archive: &'a Archive, descriptor: &'static PipelineDescriptor) -> Self {
        Self {
            archive,
            descriptor,
            registration: Registration::Default,
            mode: CheckMode::default(),
            checklist: Box::new(StandardChecklist(descriptor.pipeline)),
        }
    }

    pub fn with_registration(mut self, registration: Registration) -> Result<Self, PipelineError> {
        self.descriptor.check_registration(registration)?;
        self.registration = registration;
        Ok(self)
    }

    pub fn with_mode(mut self, mode: CheckMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_checklist(mut self, checklist: Box<dyn Checklist + 'a>) -> Self {
        self.checklist = checklist;
        self
    }

    pub fn registration(&self) -> Registration {
        self.registration
    }

    pub fn check(
        &self,
        subject: &SubjectInfo,
        sink: &dyn ProgressSink,
    ) -> Result<CompletionReport, PipelineError> {
        let scan = scan_for(self.descriptor, subject)?;
        let resource_dir = self.archive.output_dir(self.descriptor, subject, self.registration)?;

        let resource_exists = match scan {
            Some(scan) => self
                .archive
                .available_output_names(self.descriptor, subject, self.registration)?
                .contains(scan),
            None => self.archive.does_dir_exist(&resource_dir)?,
        };

        let mut report = CompletionReport {
            resource_dir: resource_dir.clone(),
            resource_exists,
            missing_files: Vec::new(),
            files_checked: 0,
        };
        if !resource_exists {
            sink.event(ProgressEvent::message(format!(
                "resource missing: {resource_dir}"
            )));
            return Ok(report);
        }
        sink.event(ProgressEvent::message(format!("resource exists: {resource_dir}")));

        let ctx = ChecklistContext {
            archive: self.archive,
            subject,
            resource_dir: &resource_dir,
            scan,
            registration: self.registration,
        };
        for path in self.checklist.expected_files(&ctx)? {
            report.files_checked += 1;
            if self.archive.does_file_exist(&path)? {
                continue;
            }
            sink.event(ProgressEvent::message(format!("file does not exist: {path}")));
            report.missing_files.push(path);
            if self.mode == CheckMode::FirstMissing {
                break;
            }
        }
        Ok(report)
    }
}

impl CompletionCheck for CompletionChecker<'_> {
    fn is_processing_complete(
        &self,
        subject: &SubjectInfo,
        sink: &dyn ProgressSink,
    ) -> Result<bool, PipelineError> {
        let report = self.check(subject, sink)?;
        tracing::debug!(
            pipeline = self.descriptor.name,
            subject = %subject,
            complete = report.is_complete(),
            missing = report.missing_files.len(),
            "completion check"
        );
        Ok(report.is_complete())
    }
}
