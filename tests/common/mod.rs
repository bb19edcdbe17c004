#![allow(dead_code)]

use std::fs;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};

use hcp_pipeline_jobs::archive::Archive;
use hcp_pipeline_jobs::config::{ConfigLoader, Context, EnvSnapshot, PipelineOverrides};
use hcp_pipeline_jobs::error::PipelineError;
use hcp_pipeline_jobs::pipeline::PipelineDescriptor;
use hcp_pipeline_jobs::scheduler::{JobId, QueueRow, SchedulerClient};
use hcp_pipeline_jobs::submitter::WRAPPER_EXTENSION;

pub struct Fixture {
    _dir: tempfile::TempDir,
    pub root: Utf8PathBuf,
    pub ctx: Context,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_status_dir(true)
    }

    pub fn with_status_dir(status_dir: bool) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let path = |leaf: &str| Some(root.join(leaf).to_string());
        let env = EnvSnapshot {
            compute: Some("CHPC".to_string()),
            archive_root: path("archive"),
            subject_files_dir: path("subjects"),
            xnat_pbs_jobs: path("scripts"),
            build_dir: path("build"),
            running_status_dir: if status_dir { path("status") } else { None },
            min_shadow: Some("1".to_string()),
            max_shadow: Some("4".to_string()),
            xnat_server: Some("db.humanconnectome.org".to_string()),
            user: Some("hcpuser".to_string()),
            home: Some(root.to_string()),
            ..EnvSnapshot::default()
        };
        let ctx = ConfigLoader::resolve_env(env, PipelineOverrides::default()).unwrap();
        Self {
            _dir: dir,
            root,
            ctx,
        }
    }

    pub fn archive(&self) -> Archive {
        Archive::from_context(&self.ctx)
    }

    /// Writes a wrapper template for every phase of the pipeline.
    pub fn install_templates(&self, descriptor: &PipelineDescriptor) {
        let dir = self.ctx.scripts_home.join(descriptor.script_home);
        fs::create_dir_all(&dir).unwrap();
        for phase in descriptor.phases {
            let name = format!("{}_{}.{WRAPPER_EXTENSION}", descriptor.name, phase.name);
            fs::write(dir.join(name), "#!/bin/bash\nexit 0\n").unwrap();
        }
    }

    pub fn mkdirs(&self, dirs: &[Utf8PathBuf]) {
        for dir in dirs {
            fs::create_dir_all(dir).unwrap();
        }
    }

    pub fn build_dirs(&self, descriptor: &PipelineDescriptor) -> Vec<Utf8PathBuf> {
        let parent = self.ctx.build_root.join(descriptor.name);
        match fs::read_dir(&parent) {
            Ok(entries) => entries
                .map(|entry| {
                    Utf8PathBuf::from_path_buf(entry.unwrap().path()).unwrap()
                })
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

pub fn touch(path: &Utf8Path) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, b"").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitCall {
    pub script: Utf8PathBuf,
    pub depends_on: Option<String>,
}

/// Records submissions and hands out sequential job ids; `fail_on_call` counts attempts from zero.
#[derive(Default)]
pub struct MockScheduler {
    pub calls: Mutex<Vec<SubmitCall>>,
    pub attempts: Mutex<usize>,
    pub listings: Mutex<usize>,
    pub fail_on_call: Option<usize>,
    pub rows: Vec<QueueRow>,
}

impl MockScheduler {
    pub fn failing_on(call: usize) -> Self {
        Self {
            fail_on_call: Some(call),
            ..Self::default()
        }
    }

    pub fn with_rows(rows: Vec<QueueRow>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<SubmitCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn listing_count(&self) -> usize {
        *self.listings.lock().unwrap()
    }
}

impl SchedulerClient for MockScheduler {
    fn submit(
        &self,
        script: &Utf8Path,
        depends_on: Option<&JobId>,
    ) -> Result<JobId, PipelineError> {
        let mut attempts = self.attempts.lock().unwrap();
        let attempt = *attempts;
        *attempts += 1;
        if self.fail_on_call == Some(attempt) {
            return Err(PipelineError::Scheduler("qsub: cannot connect to server".to_string()));
        }
        let mut calls = self.calls.lock().unwrap();
        calls.push(SubmitCall {
            script: script.to_path_buf(),
            depends_on: depends_on.map(|id| id.as_str().to_string()),
        });
        Ok(JobId::new(format!("{}.login01", 1000 + calls.len())))
    }

    fn list_jobs(&self, user: &str) -> Result<Vec<QueueRow>, PipelineError> {
        *self.listings.lock().unwrap() += 1;
        Ok(self
            .rows
            .iter()
            .filter(|row| row.user == user)
            .cloned()
            .collect())
    }
}
