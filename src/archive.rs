use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::time::UNIX_EPOCH;

use camino::{Utf8Path, Utf8PathBuf};

use crate::config::Context;
use crate::domain::{Registration, SubjectInfo};
use crate::error::PipelineError;
use crate::pipeline::{
    DIFFUSION_UNPROC, FUNCTIONAL_PREPROC, FUNCTIONAL_UNPROC, PipelineDescriptor,
    RETINOTOPY_PREPROC, RETINOTOPY_UNPROC, ResourcePattern, STRUCTURAL_PREPROC_RESOURCE,
    T1W_UNPROC, T2W_UNPROC, render_template,
};

/// Read-only view of the directory-tree archive.
///
/// Layout: `{root}/{project}/arc001/{subject}_{classifier}/RESOURCES/{resource}`.
#[derive(Debug, Clone)]
pub struct Archive {
    root: Utf8PathBuf,
}

impl Archive {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn from_context(ctx: &Context) -> Self {
        Self::new(ctx.archive_root.clone())
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn project_archive_root(&self, project: &str) -> Utf8PathBuf {
        self.root.join(project).join("arc001")
    }

    pub fn project_resources_root(&self, project: &str) -> Utf8PathBuf {
        self.root.join(project).join("resources")
    }

    pub fn session_dir(&self, subject: &SubjectInfo, default_classifier: &str) -> Utf8PathBuf {
        self.project_archive_root(subject.project())
            .join(subject.session(default_classifier))
    }

    pub fn resources_dir(&self, subject: &SubjectInfo, default_classifier: &str) -> Utf8PathBuf {
        self.session_dir(subject, default_classifier).join("RESOURCES")
    }

    pub fn resource_dir(
        &self,
        subject: &SubjectInfo,
        default_classifier: &str,
        name: &str,
    ) -> Utf8PathBuf {
        self.resources_dir(subject, default_classifier).join(name)
    }

    /// Names of every resource directory of the session, sorted.
    pub fn resource_names(&self, resources_dir: &Utf8Path) -> Result<Vec<String>, PipelineError> {
        let entries = match fs::read_dir(resources_dir.as_std_path()) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(fs_error(resources_dir, err)),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| fs_error(resources_dir, err))?;
            let file_type = entry.file_type().map_err(|err| fs_error(resources_dir, err))?;
            if !file_type.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn available_names(
        &self,
        resources_dir: &Utf8Path,
        pattern: &ResourcePattern,
    ) -> Result<BTreeSet<String>, PipelineError> {
        Ok(self
            .resource_names(resources_dir)?
            .iter()
            .filter_map(|name| pattern.scan_name(name))
            .map(str::to_string)
            .collect())
    }

    pub fn available_dir_full_paths(
        &self,
        resources_dir: &Utf8Path,
        pattern: &ResourcePattern,
    ) -> Result<Vec<Utf8PathBuf>, PipelineError> {
        Ok(self
            .resource_names(resources_dir)?
            .into_iter()
            .filter(|name| pattern.scan_name(name).is_some())
            .map(|name| resources_dir.join(name))
            .collect())
    }

    pub fn does_dir_exist(&self, path: &Utf8Path) -> Result<bool, PipelineError> {
        match fs::metadata(path.as_std_path()) {
            Ok(meta) => Ok(meta.is_dir()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(fs_error(path, err)),
        }
    }

    pub fn does_file_exist(&self, path: &Utf8Path) -> Result<bool, PipelineError> {
        match fs::metadata(path.as_std_path()) {
            Ok(meta) => Ok(meta.is_file()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(fs_error(path, err)),
        }
    }

    /// Modification time in epoch seconds, `None` when the path does not exist.
    pub fn modification_time(&self, path: &Utf8Path) -> Result<Option<i64>, PipelineError> {
        let meta = match fs::metadata(path.as_std_path()) {
            Ok(meta) => meta,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(fs_error(path, err)),
        };
        let modified = meta.modified().map_err(|err| fs_error(path, err))?;
        let seconds = match modified.duration_since(UNIX_EPOCH) {
            Ok(since) => since.as_secs() as i64,
            Err(before) => -(before.duration().as_secs() as i64),
        };
        Ok(Some(seconds))
    }

    /// Canonical output directory of a pipeline for a subject.
    pub fn output_dir(
        &self,
        descriptor: &PipelineDescriptor,
        subject: &SubjectInfo,
        registration: Registration,
    ) -> Result<Utf8PathBuf, PipelineError> {
        let scan = scan_for(descriptor, subject)?;
        Ok(self.resource_dir(
            subject,
            descriptor.default_classifier,
            &descriptor.output_resource_name(scan, registration),
        ))
    }

    pub fn does_output_dir_exist(
        &self,
        descriptor: &PipelineDescriptor,
        subject: &SubjectInfo,
        registration: Registration,
    ) -> Result<bool, PipelineError> {
        let dir = self.output_dir(descriptor, subject, registration)?;
        self.does_dir_exist(&dir)
    }

    /// Scans with an output resource, for per-scan pipelines.
    pub fn available_output_names(
        &self,
        descriptor: &PipelineDescriptor,
        subject: &SubjectInfo,
        registration: Registration,
    ) -> Result<BTreeSet<String>, PipelineError> {
        let resources = self.resources_dir(subject, descriptor.default_classifier);
        self.available_names(&resources, &descriptor.output_pattern(registration))
    }

    pub fn available_output_dir_full_paths(
        &self,
        descriptor: &PipelineDescriptor,
        subject: &SubjectInfo,
        registration: Registration,
    ) -> Result<Vec<Utf8PathBuf>, PipelineError> {
        let resources = self.resources_dir(subject, descriptor.default_classifier);
        self.available_dir_full_paths(&resources, &descriptor.output_pattern(registration))
    }

    /// Scans a per-scan pipeline could run on; empty for per-subject pipelines.
    pub fn available_input_scans(
        &self,
        descriptor: &PipelineDescriptor,
        subject: &SubjectInfo,
    ) -> Result<BTreeSet<String>, PipelineError> {
        match &descriptor.scan_source {
            Some(pattern) => {
                let resources = self.resources_dir(subject, descriptor.default_classifier);
                self.available_names(&resources, pattern)
            }
            None => Ok(BTreeSet::new()),
        }
    }

    /// Resolves a requirement template such as `{scan}_unproc` to a resource path.
    pub fn required_resource_dir(
        &self,
        descriptor: &PipelineDescriptor,
        subject: &SubjectInfo,
        template: &str,
    ) -> Result<Utf8PathBuf, PipelineError> {
        let scan = if template.contains("{scan}") {
            scan_for(descriptor, subject)?.unwrap_or("")
        } else {
            ""
        };
        Ok(self.resource_dir(
            subject,
            descriptor.default_classifier,
            &render_template(template, scan, Registration::Default),
        ))
    }

    pub fn structural_preproc_dir(&self, subject: &SubjectInfo) -> Utf8PathBuf {
        self.resource_dir(subject, "3T", STRUCTURAL_PREPROC_RESOURCE)
    }

    pub fn diffusion_bedpostx_dir(&self, subject: &SubjectInfo) -> Utf8PathBuf {
        self.resource_dir(subject, "3T", "Diffusion_bedpostx")
    }

    pub fn reapplyfix_dir(
        &self,
        subject: &SubjectInfo,
        scan: &str,
        registration: Registration,
    ) -> Utf8PathBuf {
        self.resource_dir(
            subject,
            "3T",
            &render_template("{scan}_ReApplyFix{reg}", scan, registration),
        )
    }

    pub fn available_structural_unproc_names(
        &self,
        subject: &SubjectInfo,
    ) -> Result<BTreeSet<String>, PipelineError> {
        let resources = self.resources_dir(subject, "3T");
        let mut names = self.available_names(&resources, &T1W_UNPROC)?;
        names.extend(self.available_names(&resources, &T2W_UNPROC)?);
        Ok(names)
    }

    pub fn available_functional_unproc_names(
        &self,
        subject: &SubjectInfo,
    ) -> Result<BTreeSet<String>, PipelineError> {
        self.available_names(&self.resources_dir(subject, "3T"), &FUNCTIONAL_UNPROC)
    }

    pub fn available_functional_preproc_names(
        &self,
        subject: &SubjectInfo,
    ) -> Result<BTreeSet<String>, PipelineError> {
        self.available_names(&self.resources_dir(subject, "3T"), &FUNCTIONAL_PREPROC)
    }

    pub fn available_diffusion_unproc_names(
        &self,
        subject: &SubjectInfo,
    ) -> Result<BTreeSet<String>, PipelineError> {
        self.available_names(&self.resources_dir(subject, "3T"), &DIFFUSION_UNPROC)
    }

    pub fn available_retinotopy_unproc_names(
        &self,
        subject: &SubjectInfo,
    ) -> Result<BTreeSet<String>, PipelineError> {
        self.available_names(&self.resources_dir(subject, "7T"), &RETINOTOPY_UNPROC)
    }

    pub fn available_retinotopy_preproc_names(
        &self,
        subject: &SubjectInfo,
    ) -> Result<BTreeSet<String>, PipelineError> {
        self.available_names(&self.resources_dir(subject, "7T"), &RETINOTOPY_PREPROC)
    }
}

pub(crate) fn scan_for<'a>(
    descriptor: &PipelineDescriptor,
    subject: &'a SubjectInfo,
) -> Result<Option<&'a str>, PipelineError> {
    if !descriptor.is_per_scan() {
        return Ok(None);
    }
    subject
        .scan()
        .map(Some)
        .ok_or_else(|| PipelineError::MissingScan {
            pipeline: descriptor.name.to_string(),
            subject: subject.to_string(),
        })
}

fn fs_error(path: &Utf8Path, err: io::Error) -> PipelineError {
    PipelineError::Filesystem(format!("{path}: {err}"))
}
