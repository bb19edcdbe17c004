use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::pipeline::{JobResources, PipelineDescriptor};
use crate::shadow;

pub const ENV_COMPUTE: &str = "COMPUTE";
pub const ENV_SUBJECT_FILES_DIR: &str = "SUBJECT_FILES_DIR";
pub const ENV_XNAT_PBS_JOBS: &str = "XNAT_PBS_JOBS";
pub const ENV_MIN_SHADOW: &str = "XNAT_PBS_JOBS_MIN_SHADOW";
pub const ENV_MAX_SHADOW: &str = "XNAT_PBS_JOBS_MAX_SHADOW";
pub const ENV_BAD_SHADOW_LIST: &str = "XNAT_PBS_JOBS_BAD_SHADOW_LIST";
pub const ENV_XNAT_SERVER: &str = "XNAT_PBS_JOBS_XNAT_SERVER";
pub const ENV_RUNNING_STATUS_DIR: &str = "XNAT_PBS_JOBS_RUNNING_STATUS_DIR";
pub const ENV_ARCHIVE_ROOT: &str = "XNAT_PBS_JOBS_ARCHIVE_ROOT";
pub const ENV_BUILD_DIR: &str = "XNAT_PBS_JOBS_BUILD_DIR";
pub const ENV_CONTROL: &str = "XNAT_PBS_JOBS_CONTROL";
pub const ENV_PASSWORD: &str = "XNAT_PBS_JOBS_PASSWORD";
pub const ENV_USER: &str = "USER";
pub const ENV_HOME: &str = "HOME";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComputePlatform {
    Chpc,
    Nrg,
    Other(String),
}

impl ComputePlatform {
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim() {
            "CHPC" => ComputePlatform::Chpc,
            "NRG" => ComputePlatform::Nrg,
            other => ComputePlatform::Other(other.to_string()),
        }
    }

    pub fn default_archive_root(&self) -> Option<Utf8PathBuf> {
        match self {
            ComputePlatform::Chpc => Some(Utf8PathBuf::from("/HCP/hcpdb/archive")),
            ComputePlatform::Nrg => Some(Utf8PathBuf::from("/data/hcpdb/archive")),
            ComputePlatform::Other(_) => None,
        }
    }
}

/// Family of shadow servers fronting a primary XNAT server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XnatServer {
    Db,
    IntraDb,
}

impl XnatServer {
    pub fn from_identity(identity: &str) -> Result<Self, PipelineError> {
        let identity = identity.trim();
        if identity.starts_with("db.") {
            Ok(XnatServer::Db)
        } else if identity.starts_with("intradb.") {
            Ok(XnatServer::IntraDb)
        } else {
            Err(PipelineError::UnknownXnatServer(identity.to_string()))
        }
    }

    pub fn shadow_prefix(&self) -> &'static str {
        match self {
            XnatServer::Db => "http://db-shadow",
            XnatServer::IntraDb => "http://intradb-shadow",
        }
    }

    pub fn shadow_suffix(&self) -> &'static str {
        ".nrg.mir"
    }

    pub fn shadow_port(&self) -> u16 {
        8080
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowConfig {
    pub min: u32,
    pub max: u32,
    pub bad: BTreeSet<u32>,
    pub server: XnatServer,
}

/// Everything read from the environment, assembled once at startup.
#[derive(Debug, Clone)]
pub struct Context {
    pub platform: ComputePlatform,
    pub archive_root: Utf8PathBuf,
    pub subject_files_dir: Utf8PathBuf,
    pub scripts_home: Utf8PathBuf,
    pub build_root: Utf8PathBuf,
    pub running_status_dir: Option<Utf8PathBuf>,
    pub shadow: ShadowConfig,
    pub xnat_server: String,
    pub user: String,
    pub password: Option<String>,
    pub home: Utf8PathBuf,
    pub control_host: Option<String>,
    pub overrides: PipelineOverrides,
}

impl Context {
    pub fn running_status_dir(&self) -> Result<&Utf8PathBuf, PipelineError> {
        self.running_status_dir
            .as_ref()
            .ok_or(PipelineError::RunningStatusDirUnset)
    }

    /// Descriptor defaults with any config-file override applied.
    pub fn work_resources(&self, descriptor: &PipelineDescriptor) -> JobResources {
        let mut resources = descriptor.resources;
        if let Some(entry) = self.overrides.pipelines.get(descriptor.name) {
            if let Some(hours) = entry.walltime_hours {
                resources.walltime_hours = hours;
            }
            if let Some(gbs) = entry.vmem_gbs {
                resources.vmem_gbs = gbs;
            }
            if let Some(ppn) = entry.ppn {
                resources.ppn = ppn;
            }
        }
        resources
    }

    /// Resolves a subject file name, falling back to `SUBJECT_FILES_DIR`.
    pub fn resolve_subject_file(&self, name: &str) -> Utf8PathBuf {
        let direct = Utf8PathBuf::from(name);
        if direct.is_absolute() || direct.as_std_path().exists() {
            return direct;
        }
        self.subject_files_dir.join(name)
    }
}

/// Per-pipeline overrides loaded from an optional JSON file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PipelineOverrides {
    #[serde(default)]
    pub pipelines: BTreeMap<String, ResourceOverride>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ResourceOverride {
    #[serde(default)]
    pub walltime_hours: Option<u32>,
    #[serde(default)]
    pub vmem_gbs: Option<u32>,
    #[serde(default)]
    pub ppn: Option<u32>,
}

/// Raw environment values; `None` means the variable is unset or empty.
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    pub compute: Option<String>,
    pub subject_files_dir: Option<String>,
    pub xnat_pbs_jobs: Option<String>,
    pub min_shadow: Option<String>,
    pub max_shadow: Option<String>,
    pub bad_shadow_list: Option<String>,
    pub xnat_server: Option<String>,
    pub running_status_dir: Option<String>,
    pub archive_root: Option<String>,
    pub build_dir: Option<String>,
    pub control_host: Option<String>,
    pub password: Option<String>,
    pub user: Option<String>,
    pub home: Option<String>,
}

impl EnvSnapshot {
    pub fn capture() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        Self {
            compute: get(ENV_COMPUTE),
            subject_files_dir: get(ENV_SUBJECT_FILES_DIR),
            xnat_pbs_jobs: get(ENV_XNAT_PBS_JOBS),
            min_shadow: get(ENV_MIN_SHADOW),
            max_shadow: get(ENV_MAX_SHADOW),
            bad_shadow_list: get(ENV_BAD_SHADOW_LIST),
            xnat_server: get(ENV_XNAT_SERVER),
            running_status_dir: get(ENV_RUNNING_STATUS_DIR),
            archive_root: get(ENV_ARCHIVE_ROOT),
            build_dir: get(ENV_BUILD_DIR),
            control_host: get(ENV_CONTROL),
            password: get(ENV_PASSWORD),
            user: get(ENV_USER),
            home: get(ENV_HOME),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn from_env(config_path: Option<&str>) -> Result<Context, PipelineError> {
        let overrides = match config_path {
            Some(path) => Self::load_overrides(path)?,
            None => PipelineOverrides::default(),
        };
        Self::resolve_env(EnvSnapshot::capture(), overrides)
    }

    pub fn load_overrides(path: &str) -> Result<PipelineOverrides, PipelineError> {
        let path = PathBuf::from(path);
        let content =
            fs::read_to_string(&path).map_err(|_| PipelineError::ConfigRead(path.clone()))?;
        serde_json::from_str(&content).map_err(|err| PipelineError::ConfigParse(err.to_string()))
    }

    pub fn resolve_env(
        env: EnvSnapshot,
        overrides: PipelineOverrides,
    ) -> Result<Context, PipelineError> {
        let compute = required(env.compute, ENV_COMPUTE)?;
        let platform = ComputePlatform::from_tag(&compute);
        let archive_root = match env.archive_root {
            Some(root) => Utf8PathBuf::from(root),
            None => platform
                .default_archive_root()
                .ok_or_else(|| PipelineError::UnknownPlatform(compute.clone()))?,
        };

        let xnat_server = required(env.xnat_server, ENV_XNAT_SERVER)?;
        let server = XnatServer::from_identity(&xnat_server)?;
        let min = parse_u32(required(env.min_shadow, ENV_MIN_SHADOW)?, ENV_MIN_SHADOW)?;
        let max = parse_u32(required(env.max_shadow, ENV_MAX_SHADOW)?, ENV_MAX_SHADOW)?;
        let bad = match env.bad_shadow_list {
            Some(list) => parse_shadow_list(&list)?,
            None => BTreeSet::new(),
        };

        let shadow_config = ShadowConfig {
            min,
            max,
            bad,
            server,
        };
        shadow::validate(&shadow_config)?;

        let home = Utf8PathBuf::from(required(env.home, ENV_HOME)?);
        let build_root = env
            .build_dir
            .map(Utf8PathBuf::from)
            .unwrap_or_else(|| home.join("BUILD"));

        Ok(Context {
            platform,
            archive_root,
            subject_files_dir: Utf8PathBuf::from(required(
                env.subject_files_dir,
                ENV_SUBJECT_FILES_DIR,
            )?),
            scripts_home: Utf8PathBuf::from(required(env.xnat_pbs_jobs, ENV_XNAT_PBS_JOBS)?),
            build_root,
            running_status_dir: env.running_status_dir.map(Utf8PathBuf::from),
            shadow: shadow_config,
            xnat_server,
            user: required(env.user, ENV_USER)?,
            password: env.password,
            home,
            control_host: env.control_host,
            overrides,
        })
    }
}

fn required(value: Option<String>, name: &'static str) -> Result<String, PipelineError> {
    value.ok_or(PipelineError::MissingEnv(name))
}

fn parse_u32(value: String, name: &'static str) -> Result<u32, PipelineError> {
    value
        .trim()
        .parse()
        .map_err(|_| PipelineError::InvalidEnv { name, value })
}

fn parse_shadow_list(list: &str) -> Result<BTreeSet<u32>, PipelineError> {
    list.split(|ch: char| ch == ',' || ch.is_whitespace())
        .filter(|item| !item.is_empty())
        .map(|item| parse_u32(item.to_string(), ENV_BAD_SHADOW_LIST))
        .collect()
}
