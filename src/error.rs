use std::path::PathBuf;

use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum PipelineError {
    #[error("missing required environment variable {0}")]
    #[diagnostic(help("export {0} before running hcp-jobs"))]
    MissingEnv(&'static str),

    #[error("invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("unrecognized compute platform: {0}")]
    #[diagnostic(help("use CHPC or NRG, or set XNAT_PBS_JOBS_ARCHIVE_ROOT"))]
    UnknownPlatform(String),

    #[error("invalid shadow server range: {0}")]
    InvalidShadowRange(String),

    #[error("unsupported primary XNAT server: {0}")]
    UnknownXnatServer(String),

    #[error("running status directory is not configured")]
    #[diagnostic(help("set XNAT_PBS_JOBS_RUNNING_STATUS_DIR"))]
    RunningStatusDirUnset,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("{path}:{line}: malformed subject record {content:?}: {reason}")]
    MalformedSubject {
        path: Utf8PathBuf,
        line: usize,
        content: String,
        reason: String,
    },

    #[error("unrecognized registration name: {0}")]
    UnknownRegistration(String),

    #[error("pipeline {0} does not take a registration name")]
    RegistrationNotSupported(String),

    #[error("invalid processing stage: {0}")]
    InvalidStage(String),

    #[error("pipeline {pipeline} needs a scan name for subject {subject}")]
    MissingScan { pipeline: String, subject: String },

    #[error("script template not found: {0}")]
    MissingTemplate(Utf8PathBuf),

    #[error("job already marked as queued or running: {0}")]
    AlreadyRunning(Utf8PathBuf),

    #[error("scheduler command failed: {0}")]
    Scheduler(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Errors an operator must fix before any batch can run.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            PipelineError::MissingEnv(_)
                | PipelineError::InvalidEnv { .. }
                | PipelineError::UnknownPlatform(_)
                | PipelineError::InvalidShadowRange(_)
                | PipelineError::UnknownXnatServer(_)
                | PipelineError::RunningStatusDirUnset
                | PipelineError::ConfigRead(_)
                | PipelineError::ConfigParse(_)
        )
    }

    pub fn is_malformed_input(&self) -> bool {
        matches!(
            self,
            PipelineError::MalformedSubject { .. }
                | PipelineError::UnknownRegistration(_)
                | PipelineError::RegistrationNotSupported(_)
                | PipelineError::InvalidStage(_)
                | PipelineError::MissingScan { .. }
        )
    }
}
