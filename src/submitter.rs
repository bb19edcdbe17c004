//! Job submission engine.
//!
//! One function drives every pipeline: it materializes a working directory,
//! copies the per-phase wrapper scripts, writes a PBS job script for each
//! phase at or after the requested stage, then submits them as a dependency
//! chain while holding the pipeline's running marker.

use std::fmt::Write as _;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::archive::scan_for;
use crate::config::Context;
use crate::domain::{ProcessingStage, Registration, SubjectInfo};
use crate::error::PipelineError;
use crate::pipeline::{JobResources, Phase, PipelineDescriptor, SUPPORT_RESOURCES};
use crate::run_status::{RunningMarker, job_name};
use crate::scheduler::{JobId, SchedulerClient};

pub const WRAPPER_EXTENSION: &str = "XNAT_PROCESS";
pub const JOB_SCRIPT_EXTENSION: &str = "XNAT_PBS_job";

#[derive(Debug, Clone)]
pub struct SubmitOptions {
    pub setup_script: Option<Utf8PathBuf>,
    pub walltime_limit_hours: Option<u32>,
    pub vmem_limit_gbs: Option<u32>,
    pub output_resource_suffix: Option<String>,
    pub registration: Registration,
    pub clean_output_first: bool,
    pub starting_stage: ProcessingStage,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            setup_script: None,
            walltime_limit_hours: None,
            vmem_limit_gbs: None,
            output_resource_suffix: None,
            registration: Registration::Default,
            clean_output_first: false,
            starting_stage: ProcessingStage::PrepareScripts,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub subject: SubjectInfo,
    /// Overrides the `{subject}_{classifier}` session label.
    pub session: Option<String>,
    /// Shadow server URL the jobs upload through.
    pub server: String,
    pub options: SubmitOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmittedJob {
    pub phase: String,
    pub stage: ProcessingStage,
    pub job_id: JobId,
    pub script: Utf8PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitResult {
    pub working_dir: Utf8PathBuf,
    pub marker: Utf8PathBuf,
    pub jobs: Vec<SubmittedJob>,
}

impl SubmitResult {
    pub fn job_ids(&self) -> Vec<JobId> {
        self.jobs.iter().map(|job| job.job_id.clone()).collect()
    }
}

struct EmittedPhase {
    phase: &'static Phase,
    job_script: Utf8PathBuf,
}

pub struct Submitter<'a, S: SchedulerClient> {
    ctx: &'a Context,
    scheduler: &'a S,
}

impl<'a, S: SchedulerClient> Submitter<'a, S> {
    pub fn new(ctx: &'a Context, scheduler: &'a S) -> Self {
        Self { ctx, scheduler }
    }

    pub fn submit_jobs(
        &self,
        descriptor: &'static PipelineDescriptor,
        request: &SubmitRequest,
    ) -> Result<SubmitResult, PipelineError> {
        let options = &request.options;
        descriptor.check_registration(options.registration)?;
        let scan = scan_for(descriptor, &request.subject)?;
        let status_root = self.ctx.running_status_dir()?;
        let marker = RunningMarker::new(status_root, descriptor, &request.subject);
        if marker.exists()? {
            return Err(PipelineError::AlreadyRunning(marker.path().to_path_buf()));
        }

        let phases = descriptor.phases_from(options.starting_stage);
        if phases.is_empty() {
            return Err(PipelineError::Internal(format!(
                "{} has no phases from {}",
                descriptor.name, options.starting_stage
            )));
        }

        let working_dir = self.create_working_dir(descriptor, &request.subject, scan)?;
        let emitted = match self.emit_scripts(descriptor, request, scan, &working_dir, &phases) {
            Ok(emitted) => emitted,
            Err(err) => {
                discard_working_dir(&working_dir);
                return Err(err);
            }
        };

        if let Err(err) = marker.create() {
            discard_working_dir(&working_dir);
            return Err(err);
        }

        let mut jobs: Vec<SubmittedJob> = Vec::with_capacity(emitted.len());
        for item in &emitted {
            let depends_on = jobs.last().map(|job| &job.job_id);
            match self.scheduler.submit(&item.job_script, depends_on) {
                Ok(job_id) => {
                    tracing::info!(
                        pipeline = descriptor.name,
                        subject = %request.subject,
                        phase = item.phase.name,
                        job_id = %job_id,
                        "submitted"
                    );
                    jobs.push(SubmittedJob {
                        phase: item.phase.name.to_string(),
                        stage: item.phase.stage,
                        job_id,
                        script: item.job_script.clone(),
                    });
                }
                Err(err) => {
                    if !jobs.is_empty() {
                        let queued = jobs
                            .iter()
                            .map(|job| job.job_id.as_str())
                            .collect::<Vec<_>>();
                        tracing::warn!(
                            pipeline = descriptor.name,
                            subject = %request.subject,
                            submitted = ?queued,
                            "earlier phases stay queued and will fail their dependency"
                        );
                    }
                    if let Err(remove_err) = marker.remove() {
                        tracing::error!(
                            marker = %marker.path(),
                            %remove_err,
                            "could not roll back marker"
                        );
                    }
                    discard_working_dir(&working_dir);
                    return Err(err);
                }
            }
        }

        Ok(SubmitResult {
            working_dir,
            marker: marker.path().to_path_buf(),
            jobs,
        })
    }

    fn create_working_dir(
        &self,
        descriptor: &PipelineDescriptor,
        subject: &SubjectInfo,
        scan: Option<&str>,
    ) -> Result<Utf8PathBuf, PipelineError> {
        let mut leaf = format!(
            "{}_{}",
            subject.subject_id(),
            subject.classifier_or(descriptor.default_classifier)
        );
        if let Some(scan) = scan {
            leaf.push('_');
            leaf.push_str(scan);
        }
        leaf.push('_');
        leaf.push_str(&chrono::Utc::now().timestamp().to_string());

        let parent = self.ctx.build_root.join(descriptor.name);
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| PipelineError::Filesystem(format!("{parent}: {err}")))?;
        let mut working_dir = parent.join(&leaf);
        let mut attempt = 1;
        loop {
            match fs::create_dir(working_dir.as_std_path()) {
                Ok(()) => break,
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    attempt += 1;
                    working_dir = parent.join(format!("{leaf}.{attempt}"));
                }
                Err(err) => {
                    return Err(PipelineError::Filesystem(format!("{working_dir}: {err}")));
                }
            }
        }
        tracing::debug!(%working_dir, "created working directory");
        Ok(working_dir)
    }

    fn emit_scripts(
        &self,
        descriptor: &PipelineDescriptor,
        request: &SubmitRequest,
        scan: Option<&str>,
        working_dir: &Utf8Path,
        phases: &[&'static Phase],
    ) -> Result<Vec<EmittedPhase>, PipelineError> {
        let template_dir = self.ctx.scripts_home.join(descriptor.script_home);
        let mut emitted = Vec::with_capacity(phases.len());
        for &phase in phases {
            let stem = format!("{}_{}", descriptor.name, phase.name);
            let wrapper_name = format!("{stem}.{WRAPPER_EXTENSION}");
            let template = template_dir.join(&wrapper_name);
            if !template.as_std_path().is_file() {
                return Err(PipelineError::MissingTemplate(template));
            }
            let wrapper = working_dir.join(&wrapper_name);
            fs::copy(template.as_std_path(), wrapper.as_std_path())
                .map_err(|err| PipelineError::Filesystem(format!("{template}: {err}")))?;
            make_executable(&wrapper)?;

            let resources = self.phase_resources(descriptor, phase, &request.options);
            let content = job_script(
                descriptor,
                request,
                scan,
                phase,
                &resources,
                working_dir,
                &wrapper,
                &self.ctx.user,
                self.ctx.password.as_deref(),
            );
            let job_script = working_dir.join(format!("{stem}.{JOB_SCRIPT_EXTENSION}"));
            fs::write(job_script.as_std_path(), content)
                .map_err(|err| PipelineError::Filesystem(format!("{job_script}: {err}")))?;
            make_executable(&job_script)?;
            emitted.push(EmittedPhase { phase, job_script });
        }
        Ok(emitted)
    }

    fn phase_resources(
        &self,
        descriptor: &PipelineDescriptor,
        phase: &Phase,
        options: &SubmitOptions,
    ) -> JobResources {
        if !phase.work {
            return SUPPORT_RESOURCES;
        }
        let mut resources = self.ctx.work_resources(descriptor);
        if !phase.gpu {
            resources.gpus = None;
        }
        if let Some(hours) = options.walltime_limit_hours {
            resources.walltime_hours = hours;
        }
        if let Some(gbs) = options.vmem_limit_gbs {
            resources.vmem_gbs = gbs;
        }
        resources
    }
}

/// PBS resource directive, e.g. `nodes=1:ppn=3:gpus=1,walltime=24:00:00,vmem=16gb`.
pub fn resource_directive(resources: &JobResources) -> String {
    let mut directive = format!("nodes={}:ppn={}", resources.nodes, resources.ppn);
    if let Some(gpus) = resources.gpus {
        let _ = write!(directive, ":gpus={gpus}");
    }
    let _ = write!(
        directive,
        ",walltime={}:00:00,vmem={}gb",
        resources.walltime_hours, resources.vmem_gbs
    );
    directive
}

#[allow(clippy::too_many_arguments)]
fn job_script(
    descriptor: &PipelineDescriptor,
    request: &SubmitRequest,
    scan: Option<&str>,
    phase: &Phase,
    resources: &JobResources,
    working_dir: &Utf8Path,
    wrapper: &Utf8Path,
    user: &str,
    password: Option<&str>,
) -> String {
    let subject = &request.subject;
    let options = &request.options;
    let stem = format!("{}_{}", descriptor.name, phase.name);
    let session = request
        .session
        .clone()
        .unwrap_or_else(|| subject.session(descriptor.default_classifier));

    let mut args: Vec<(&str, String)> = vec![("user", user.to_string())];
    if let Some(password) = password {
        args.push(("password", password.to_string()));
    }
    args.push(("server", request.server.clone()));
    args.push(("project", subject.project().to_string()));
    args.push(("subject", subject.subject_id().to_string()));
    args.push((
        "classifier",
        subject
            .classifier_or(descriptor.default_classifier)
            .to_string(),
    ));
    args.push(("session", session));
    if let Some(scan) = scan {
        args.push(("scan", scan.to_string()));
    }
    args.push(("working-dir", working_dir.to_string()));
    if let Some(setup) = &options.setup_script {
        args.push(("setup-script", setup.to_string()));
    }
    if let Some(reg) = options.registration.cli_value() {
        args.push(("reg-name", reg.to_string()));
    }
    if let Some(suffix) = &options.output_resource_suffix {
        args.push(("output-resource-suffix", suffix.clone()));
    }

    let mut script = String::new();
    let _ = writeln!(script, "#PBS -l {}", resource_directive(resources));
    let _ = writeln!(script, "#PBS -N {}", job_name(descriptor, subject));
    let _ = writeln!(script, "#PBS -o {working_dir}/{stem}.stdout");
    let _ = writeln!(script, "#PBS -e {working_dir}/{stem}.stderr");
    let _ = writeln!(script);
    let _ = write!(script, "{wrapper}");
    for (flag, value) in &args {
        let _ = write!(script, " \\\n  --{flag}={}", shell_word(value));
    }
    if options.clean_output_first && phase.stage == ProcessingStage::PutData {
        let _ = write!(script, " \\\n  --clean-output-resource-first");
    }
    script.push('\n');
    script
}

fn shell_word(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || "-_./:@+=,".contains(ch));
    if plain {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

#[cfg(unix)]
fn make_executable(path: &Utf8Path) -> Result<(), PipelineError> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path.as_std_path(), fs::Permissions::from_mode(0o755))
        .map_err(|err| PipelineError::Filesystem(format!("{path}: {err}")))
}

#[cfg(not(unix))]
fn make_executable(_path: &Utf8Path) -> Result<(), PipelineError> {
    Ok(())
}

fn discard_working_dir(working_dir: &Utf8Path) {
    if let Err(err) = fs::remove_dir_all(working_dir.as_std_path()) {
        tracing::warn!(%working_dir, %err, "could not remove working directory");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_includes_gpus_only_when_requested() {
        let cpu = JobResources {
            nodes: 1,
            ppn: 1,
            gpus: None,
            walltime_hours: 24,
            vmem_gbs: 32,
        };
        assert_eq!(
            resource_directive(&cpu),
            "nodes=1:ppn=1,walltime=24:00:00,vmem=32gb"
        );
        let gpu = JobResources {
            ppn: 3,
            gpus: Some(1),
            vmem_gbs: 16,
            ..cpu
        };
        assert_eq!(
            resource_directive(&gpu),
            "nodes=1:ppn=3:gpus=1,walltime=24:00:00,vmem=16gb"
        );
    }

    #[test]
    fn submit_result_serializes_paths_as_strings() {
        let result = SubmitResult {
            working_dir: Utf8PathBuf::from("/build/StructuralPreprocessingHCP/100206_3T_1"),
            marker: Utf8PathBuf::from("/running/100206.RUNNING"),
            jobs: vec![SubmittedJob {
                phase: "get_data".to_string(),
                stage: ProcessingStage::GetData,
                job_id: JobId::new("8114382.login01"),
                script: Utf8PathBuf::from("/build/get_data.XNAT_PBS_job"),
            }],
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(
            json["working_dir"],
            "/build/StructuralPreprocessingHCP/100206_3T_1"
        );
        assert_eq!(json["jobs"][0]["script"], "/build/get_data.XNAT_PBS_job");
    }

    #[test]
    fn shell_word_quotes_unsafe_values() {
        assert_eq!(
            shell_word("http://db-shadow3.nrg.mir:8080"),
            "http://db-shadow3.nrg.mir:8080"
        );
        assert_eq!(shell_word("p@ss word"), "'p@ss word'");
        assert_eq!(shell_word("it's"), r"'it'\''s'");
    }
}
