use std::fs;
use std::io::Write;

use camino::Utf8Path;
use chrono::{Local, TimeZone};
use serde::Serialize;

use crate::archive::Archive;
use crate::completion::CompletionChecker;
use crate::domain::SubjectInfo;
use crate::driver::expand_subject;
use crate::error::PipelineError;
use crate::pipeline::PipelineDescriptor;
use crate::prereq::{ArchivePrereqs, PrereqChecker};
use crate::progress::NoopSink;

/// Field value that does not matter, e.g. because prerequisites are not met.
pub const DOES_NOT_MATTER: &str = "---";
pub const NOT_AVAILABLE: &str = "N/A";

pub const STATUS_HEADER: &str =
    "Project\tSubject ID\tScan\tResource Exists\tResource Date\tFiles Exist";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusRow {
    pub project: String,
    pub subject_id: String,
    pub scan: String,
    pub resource_exists: String,
    pub resource_date: String,
    pub files_exist: String,
}

impl StatusRow {
    pub fn to_line(&self) -> String {
        [
            self.project.as_str(),
            self.subject_id.as_str(),
            self.scan.as_str(),
            self.resource_exists.as_str(),
            self.resource_date.as_str(),
            self.files_exist.as_str(),
        ]
        .join("\t")
    }
}

pub struct StatusReporter<'a> {
    archive: &'a Archive,
    descriptor: &'static PipelineDescriptor,
    completion: CompletionChecker<'a>,
}

impl<'a> StatusReporter<'a> {
    pub fn new(
        archive: &'a Archive,
        descriptor: &'static PipelineDescriptor,
        completion: CompletionChecker<'a>,
    ) -> Self {
        Self {
            archive,
            descriptor,
            completion,
        }
    }

    pub fn rows(&self, subjects: &[SubjectInfo]) -> Result<Vec<StatusRow>, PipelineError> {
        let mut rows = Vec::new();
        for subject in subjects {
            let candidates =
                expand_subject(self.archive, self.descriptor, &self.completion, subject)?;
            for candidate in candidates {
                rows.push(self.row(&candidate)?);
            }
        }
        Ok(rows)
    }

    pub fn row(&self, subject: &SubjectInfo) -> Result<StatusRow, PipelineError> {
        let mut row = StatusRow {
            project: subject.project().to_string(),
            subject_id: subject.subject_id().to_string(),
            scan: subject.scan().unwrap_or(DOES_NOT_MATTER).to_string(),
            resource_exists: DOES_NOT_MATTER.to_string(),
            resource_date: DOES_NOT_MATTER.to_string(),
            files_exist: DOES_NOT_MATTER.to_string(),
        };

        let prereqs = ArchivePrereqs::new(self.archive, self.descriptor);
        if !prereqs.are_prereqs_met(subject, &NoopSink)? {
            return Ok(row);
        }

        let report = self.completion.check(subject, &NoopSink)?;
        if !report.resource_exists {
            row.resource_exists = "FALSE".to_string();
            row.resource_date = NOT_AVAILABLE.to_string();
            row.files_exist = "FALSE".to_string();
            return Ok(row);
        }

        row.resource_exists = "TRUE".to_string();
        row.resource_date = match self.archive.modification_time(&report.resource_dir)? {
            Some(seconds) => format_timestamp(seconds),
            None => NOT_AVAILABLE.to_string(),
        };
        row.files_exist = if report.is_complete() { "TRUE" } else { "FALSE" }.to_string();
        Ok(row)
    }
}

/// Local time as `YYYY-MM-DD HH:MM:SS`.
pub fn format_timestamp(seconds: i64) -> String {
    match Local.timestamp_opt(seconds, 0).single() {
        Some(time) => time.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => NOT_AVAILABLE.to_string(),
    }
}

pub fn write_status_file(path: &Utf8Path, rows: &[StatusRow]) -> Result<(), PipelineError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix(".status")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
    writeln!(temp, "{STATUS_HEADER}").map_err(|err| PipelineError::Filesystem(err.to_string()))?;
    for row in rows {
        writeln!(temp, "{}", row.to_line())
            .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
    }
    temp.persist(path.as_std_path())
        .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_format_is_iso_like() {
        let formatted = format_timestamp(1_500_000_000);
        assert_eq!(formatted.len(), "2017-07-14 02:40:00".len());
        assert_eq!(&formatted[4..5], "-");
        assert_eq!(&formatted[10..11], " ");
        assert_eq!(&formatted[13..14], ":");
    }

    #[test]
    fn row_is_tab_separated() {
        let row = StatusRow {
            project: "HCP_900".to_string(),
            subject_id: "100206".to_string(),
            scan: DOES_NOT_MATTER.to_string(),
            resource_exists: "TRUE".to_string(),
            resource_date: "2017-07-14 02:40:00".to_string(),
            files_exist: "FALSE".to_string(),
        };
        assert_eq!(
            row.to_line(),
            "HCP_900\t100206\t---\tTRUE\t2017-07-14 02:40:00\tFALSE"
        );
    }
}
