use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use camino::Utf8Path;
use regex::Regex;
use serde::Serialize;

use crate::error::PipelineError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QueueState {
    Running,
    Queued,
    Other(char),
}

impl QueueState {
    pub fn from_code(code: char) -> Self {
        match code {
            'R' => QueueState::Running,
            'Q' => QueueState::Queued,
            other => QueueState::Other(other),
        }
    }
}

/// One row of the scheduler's job listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueRow {
    pub job_id: JobId,
    pub user: String,
    pub job_name: String,
    pub state: QueueState,
}

pub trait SchedulerClient {
    /// Submits `script`, held until `depends_on` finishes successfully.
    fn submit(&self, script: &Utf8Path, depends_on: Option<&JobId>)
    -> Result<JobId, PipelineError>;

    fn list_jobs(&self, user: &str) -> Result<Vec<QueueRow>, PipelineError>;
}

/// Width of the job-name column in `qstat -u` output; longer names are truncated.
pub const QSTAT_NAME_WIDTH: usize = 16;

/// Torque/PBS client driving `qsub` and `qstat`, optionally through `ssh` on a controller host.
#[derive(Debug, Clone)]
pub struct PbsClient {
    remote_host: Option<String>,
    qsub: PathBuf,
    qstat: PathBuf,
}

impl PbsClient {
    pub fn new(remote_host: Option<String>) -> Result<Self, PipelineError> {
        let (qsub, qstat) = match remote_host {
            Some(_) => (PathBuf::from("qsub"), PathBuf::from("qstat")),
            None => (
                find_in_path("qsub").ok_or_else(|| PipelineError::MissingTool("qsub".to_string()))?,
                find_in_path("qstat")
                    .ok_or_else(|| PipelineError::MissingTool("qstat".to_string()))?,
            ),
        };
        Ok(Self {
            remote_host,
            qsub,
            qstat,
        })
    }

    fn run_cmd(&self, program: &Path, args: &[String]) -> Result<String, PipelineError> {
        let mut cmd = match &self.remote_host {
            Some(host) => {
                let mut cmd = Command::new("ssh");
                cmd.arg(host).arg(program);
                cmd
            }
            None => Command::new(program),
        };
        cmd.args(args);
        tracing::debug!(?cmd, "running scheduler command");
        let output = cmd
            .output()
            .map_err(|err| PipelineError::Scheduler(format!("{}: {err}", program.display())))?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("command failed: {} ({})", program.display(), output.status)
        } else {
            stderr
        };
        Err(PipelineError::Scheduler(message))
    }
}

impl SchedulerClient for PbsClient {
    fn submit(
        &self,
        script: &Utf8Path,
        depends_on: Option<&JobId>,
    ) -> Result<JobId, PipelineError> {
        let mut args = Vec::new();
        if let Some(parent) = depends_on {
            args.push("-W".to_string());
            args.push(format!("depend=afterok:{parent}"));
        }
        args.push(script.to_string());
        let stdout = self.run_cmd(&self.qsub, &args)?;
        parse_job_id(&stdout)
    }

    fn list_jobs(&self, user: &str) -> Result<Vec<QueueRow>, PipelineError> {
        let stdout = self.run_cmd(&self.qstat, &["-u".to_string(), user.to_string()])?;
        Ok(parse_qstat(&stdout))
    }
}

pub fn parse_job_id(stdout: &str) -> Result<JobId, PipelineError> {
    let re = Regex::new(r"^\d+(\.[\w.-]+)?$")
        .map_err(|err| PipelineError::Internal(err.to_string()))?;
    let line = stdout.lines().last().unwrap_or_default().trim();
    if re.is_match(line) {
        Ok(JobId::new(line))
    } else {
        Err(PipelineError::Scheduler(format!(
            "unexpected qsub output: {stdout:?}"
        )))
    }
}

/// Parses `qstat -u USER` output; header and separator lines are skipped.
pub fn parse_qstat(stdout: &str) -> Vec<QueueRow> {
    let mut rows = Vec::new();
    let mut in_body = false;
    for line in stdout.lines() {
        if line.starts_with("---") {
            in_body = true;
            continue;
        }
        if !in_body {
            continue;
        }
        let columns = line.split_whitespace().collect::<Vec<_>>();
        if columns.len() < 10 {
            continue;
        }
        let Some(state) = columns[9].chars().next() else {
            continue;
        };
        rows.push(QueueRow {
            job_id: JobId::new(columns[0]),
            user: columns[1].to_string(),
            job_name: columns[3].to_string(),
            state: QueueState::from_code(state),
        });
    }
    rows
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.exists())
}
