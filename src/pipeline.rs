//! Pipeline descriptors.
//!
//! Every pipeline the orchestrator knows about is a [`PipelineDescriptor`]
//! value: its name, archive resources, prerequisites, phases and scheduler
//! resource shape. The checkers and the submitter are generic over these
//! records, so adding a pipeline means adding a descriptor.

use std::borrow::Cow;
use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::domain::{ProcessingStage, Registration};
use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Pipeline {
    StructuralPreprocessing,
    FunctionalPreprocessing,
    DiffusionPreprocessing,
    MultiRunIcaFix,
    ReApplyFix,
    DeDriftAndResample,
    ApplyHandReclassification,
    Bedpostx,
}

impl Pipeline {
    pub const ALL: [Pipeline; 8] = [
        Pipeline::StructuralPreprocessing,
        Pipeline::FunctionalPreprocessing,
        Pipeline::DiffusionPreprocessing,
        Pipeline::MultiRunIcaFix,
        Pipeline::ReApplyFix,
        Pipeline::DeDriftAndResample,
        Pipeline::ApplyHandReclassification,
        Pipeline::Bedpostx,
    ];

    pub fn descriptor(&self) -> &'static PipelineDescriptor {
        match self {
            Pipeline::StructuralPreprocessing => &STRUCTURAL_PREPROCESSING,
            Pipeline::FunctionalPreprocessing => &FUNCTIONAL_PREPROCESSING,
            Pipeline::DiffusionPreprocessing => &DIFFUSION_PREPROCESSING,
            Pipeline::MultiRunIcaFix => &MULTI_RUN_ICA_FIX,
            Pipeline::ReApplyFix => &REAPPLY_FIX,
            Pipeline::DeDriftAndResample => &DEDRIFT_AND_RESAMPLE,
            Pipeline::ApplyHandReclassification => &APPLY_HAND_RECLASSIFICATION,
            Pipeline::Bedpostx => &BEDPOSTX,
        }
    }

    pub fn from_name(name: &str) -> Option<Pipeline> {
        Self::ALL
            .into_iter()
            .find(|pipeline| pipeline.descriptor().name == name)
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.descriptor().name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    PerSubject,
    PerScan,
}

/// How "queued or running" is decided for a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatusStrategy {
    /// Running marker files are authoritative.
    Marker,
    /// Legacy pipelines that never wrote markers; the scheduler queue is consulted too.
    SchedulerQuery,
}

/// Archive resource directories named `{scan}{suffix}` whose scan starts with one of `prefixes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePattern {
    pub prefixes: &'static [&'static str],
    pub suffix: Cow<'static, str>,
}

impl ResourcePattern {
    pub const fn new(prefixes: &'static [&'static str], suffix: &'static str) -> Self {
        Self {
            prefixes,
            suffix: Cow::Borrowed(suffix),
        }
    }

    pub fn with_suffix(suffix: String) -> Self {
        Self {
            prefixes: &[],
            suffix: Cow::Owned(suffix),
        }
    }

    /// Scan name encoded in a resource directory name, if it matches.
    pub fn scan_name<'a>(&self, dir_name: &'a str) -> Option<&'a str> {
        let scan = dir_name.strip_suffix(self.suffix.as_ref())?;
        if scan.is_empty() {
            return None;
        }
        let prefixed = self.prefixes.is_empty()
            || self.prefixes.iter().any(|prefix| scan.starts_with(prefix));
        prefixed.then_some(scan)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// A named resource, `{scan}` substituted for per-scan pipelines.
    Resource(&'static str),
    /// At least one resource matching the pattern.
    AnyOf(ResourcePattern),
    /// The processed scan set equals the unprocessed scan set and is not empty.
    SameScans {
        processed: ResourcePattern,
        unprocessed: ResourcePattern,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phase {
    pub stage: ProcessingStage,
    pub name: &'static str,
    /// Runs on the pipeline's work resource shape rather than the support shape.
    pub work: bool,
    pub gpu: bool,
}

impl Phase {
    const fn support(stage: ProcessingStage, name: &'static str) -> Self {
        Self {
            stage,
            name,
            work: false,
            gpu: false,
        }
    }

    const fn work(name: &'static str, gpu: bool) -> Self {
        Self {
            stage: ProcessingStage::ProcessData,
            name,
            work: true,
            gpu,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobResources {
    pub nodes: u32,
    pub ppn: u32,
    pub gpus: Option<u32>,
    pub walltime_hours: u32,
    pub vmem_gbs: u32,
}

/// Resource shape of get/clean/put/check jobs.
pub const SUPPORT_RESOURCES: JobResources = JobResources {
    nodes: 1,
    ppn: 1,
    gpus: None,
    walltime_hours: 4,
    vmem_gbs: 4,
};

#[derive(Debug)]
pub struct PipelineDescriptor {
    pub pipeline: Pipeline,
    pub name: &'static str,
    /// Directory under `XNAT_PBS_JOBS` holding the wrapper script templates.
    pub script_home: &'static str,
    /// Output resource template; `{scan}` and `{reg}` are substituted.
    pub output_resource: &'static str,
    pub granularity: Granularity,
    /// Input resources enumerated when a per-scan subject asks for `all` scans.
    pub scan_source: Option<ResourcePattern>,
    pub prerequisites: &'static [Requirement],
    pub phases: &'static [Phase],
    pub resources: JobResources,
    pub run_status: RunStatusStrategy,
    pub default_classifier: &'static str,
    pub accepts_registration: bool,
}

impl PipelineDescriptor {
    pub fn is_per_scan(&self) -> bool {
        self.granularity == Granularity::PerScan
    }

    pub fn check_registration(&self, registration: Registration) -> Result<(), PipelineError> {
        if registration != Registration::Default && !self.accepts_registration {
            return Err(PipelineError::RegistrationNotSupported(self.name.to_string()));
        }
        Ok(())
    }

    /// Name of the output resource for `scan` under `registration`.
    pub fn output_resource_name(&self, scan: Option<&str>, registration: Registration) -> String {
        render_template(self.output_resource, scan.unwrap_or(""), registration)
    }

    /// Pattern matching every per-scan output resource of this pipeline.
    pub fn output_pattern(&self, registration: Registration) -> ResourcePattern {
        ResourcePattern::with_suffix(self.output_resource_name(None, registration))
    }

    /// Phases whose stage is at or after `starting_stage`, in execution order.
    pub fn phases_from(&self, starting_stage: ProcessingStage) -> Vec<&'static Phase> {
        let mut phases = self
            .phases
            .iter()
            .filter(|phase| phase.stage >= starting_stage)
            .collect::<Vec<_>>();
        phases.sort_by_key(|phase| phase.stage);
        phases
    }
}

pub fn render_template(template: &str, scan: &str, registration: Registration) -> String {
    template
        .replace("{scan}", scan)
        .replace("{reg}", registration.file_infix())
}

const STANDARD_PHASES: &[Phase] = &[
    Phase::support(ProcessingStage::GetData, "get_data"),
    Phase::work("process_data", false),
    Phase::support(ProcessingStage::CleanData, "clean_data"),
    Phase::support(ProcessingStage::PutData, "put_data"),
    Phase::support(ProcessingStage::CheckData, "check_data"),
];

const DIFFUSION_PHASES: &[Phase] = &[
    Phase::support(ProcessingStage::GetData, "get_data"),
    Phase::work("PreEddy", false),
    Phase::work("Eddy", true),
    Phase::work("PostEddy", false),
    Phase::support(ProcessingStage::CleanData, "clean_data"),
    Phase::support(ProcessingStage::PutData, "put_data"),
    Phase::support(ProcessingStage::CheckData, "check_data"),
];

pub const T1W_UNPROC: ResourcePattern = ResourcePattern::new(&["T1w"], "_unproc");
pub const T2W_UNPROC: ResourcePattern = ResourcePattern::new(&["T2w"], "_unproc");
pub const FUNCTIONAL_UNPROC: ResourcePattern =
    ResourcePattern::new(&["rfMRI", "tfMRI"], "_unproc");
pub const FUNCTIONAL_PREPROC: ResourcePattern =
    ResourcePattern::new(&["rfMRI", "tfMRI"], "_preproc");
pub const DIFFUSION_UNPROC: ResourcePattern = ResourcePattern::new(&["Diffusion"], "_unproc");
pub const STRUCTURAL_PREPROC: ResourcePattern = ResourcePattern::new(&["Structural"], "_preproc");
pub const RETINOTOPY_UNPROC: ResourcePattern = ResourcePattern::new(&["tfMRI_RET"], "_unproc");
pub const RETINOTOPY_PREPROC: ResourcePattern = ResourcePattern::new(&["tfMRI_RET"], "_preproc");
pub const FIX_PROC: ResourcePattern = ResourcePattern::new(&[], "_FIX");

pub const STRUCTURAL_PREPROC_RESOURCE: &str = "Structural_preproc";
pub const DIFFUSION_PREPROC_RESOURCE: &str = "Diffusion_preproc";
pub const MSMALL_REG_RESOURCE: &str = "MSMAllReg";

static STRUCTURAL_PREPROCESSING: PipelineDescriptor = PipelineDescriptor {
    pipeline: Pipeline::StructuralPreprocessing,
    name: "StructuralPreprocessingHCP",
    script_home: "StructuralPreprocessing",
    output_resource: STRUCTURAL_PREPROC_RESOURCE,
    granularity: Granularity::PerSubject,
    scan_source: None,
    prerequisites: &[
        Requirement::AnyOf(T1W_UNPROC),
        Requirement::AnyOf(T2W_UNPROC),
    ],
    phases: STANDARD_PHASES,
    resources: JobResources {
        nodes: 1,
        ppn: 1,
        gpus: None,
        walltime_hours: 24,
        vmem_gbs: 32,
    },
    run_status: RunStatusStrategy::Marker,
    default_classifier: "3T",
    accepts_registration: false,
};

static FUNCTIONAL_PREPROCESSING: PipelineDescriptor = PipelineDescriptor {
    pipeline: Pipeline::FunctionalPreprocessing,
    name: "FunctionalPreprocessingHCP",
    script_home: "FunctionalPreprocessing",
    output_resource: "{scan}_preproc",
    granularity: Granularity::PerScan,
    scan_source: Some(FUNCTIONAL_UNPROC),
    prerequisites: &[
        Requirement::Resource(STRUCTURAL_PREPROC_RESOURCE),
        Requirement::Resource("{scan}_unproc"),
    ],
    phases: STANDARD_PHASES,
    resources: JobResources {
        nodes: 1,
        ppn: 2,
        gpus: None,
        walltime_hours: 12,
        vmem_gbs: 24,
    },
    run_status: RunStatusStrategy::SchedulerQuery,
    default_classifier: "3T",
    accepts_registration: false,
};

static DIFFUSION_PREPROCESSING: PipelineDescriptor = PipelineDescriptor {
    pipeline: Pipeline::DiffusionPreprocessing,
    name: "DiffusionPreprocessingHCP",
    script_home: "DiffusionPreprocessing",
    output_resource: DIFFUSION_PREPROC_RESOURCE,
    granularity: Granularity::PerSubject,
    scan_source: None,
    prerequisites: &[
        Requirement::AnyOf(STRUCTURAL_PREPROC),
        Requirement::AnyOf(DIFFUSION_UNPROC),
    ],
    phases: DIFFUSION_PHASES,
    resources: JobResources {
        nodes: 1,
        ppn: 3,
        gpus: Some(1),
        walltime_hours: 24,
        vmem_gbs: 24,
    },
    run_status: RunStatusStrategy::Marker,
    default_classifier: "3T",
    accepts_registration: false,
};

static MULTI_RUN_ICA_FIX: PipelineDescriptor = PipelineDescriptor {
    pipeline: Pipeline::MultiRunIcaFix,
    name: "MultiRunIcaFixHCP7T",
    script_home: "MultiRunIcaFixHCP7T",
    output_resource: "MultiRunIcaFix_proc",
    granularity: Granularity::PerSubject,
    scan_source: None,
    prerequisites: &[Requirement::SameScans {
        processed: RETINOTOPY_PREPROC,
        unprocessed: RETINOTOPY_UNPROC,
    }],
    phases: STANDARD_PHASES,
    resources: JobResources {
        nodes: 1,
        ppn: 1,
        gpus: None,
        walltime_hours: 36,
        vmem_gbs: 64,
    },
    run_status: RunStatusStrategy::Marker,
    default_classifier: "7T",
    accepts_registration: false,
};

static REAPPLY_FIX: PipelineDescriptor = PipelineDescriptor {
    pipeline: Pipeline::ReApplyFix,
    name: "ReApplyFixHCP",
    script_home: "ReApplyFix",
    output_resource: "{scan}_ReApplyFix{reg}",
    granularity: Granularity::PerScan,
    scan_source: Some(FIX_PROC),
    prerequisites: &[
        Requirement::Resource(STRUCTURAL_PREPROC_RESOURCE),
        Requirement::Resource("{scan}_FIX"),
    ],
    phases: STANDARD_PHASES,
    resources: JobResources {
        nodes: 1,
        ppn: 1,
        gpus: None,
        walltime_hours: 12,
        vmem_gbs: 16,
    },
    run_status: RunStatusStrategy::Marker,
    default_classifier: "3T",
    accepts_registration: true,
};

static DEDRIFT_AND_RESAMPLE: PipelineDescriptor = PipelineDescriptor {
    pipeline: Pipeline::DeDriftAndResample,
    name: "DeDriftAndResampleHCP",
    script_home: "DeDriftAndResample",
    output_resource: "MSMAllDeDrift",
    granularity: Granularity::PerSubject,
    scan_source: None,
    prerequisites: &[
        Requirement::Resource(STRUCTURAL_PREPROC_RESOURCE),
        Requirement::Resource(MSMALL_REG_RESOURCE),
    ],
    phases: STANDARD_PHASES,
    resources: JobResources {
        nodes: 1,
        ppn: 1,
        gpus: None,
        walltime_hours: 24,
        vmem_gbs: 32,
    },
    run_status: RunStatusStrategy::SchedulerQuery,
    default_classifier: "3T",
    accepts_registration: false,
};

static APPLY_HAND_RECLASSIFICATION: PipelineDescriptor = PipelineDescriptor {
    pipeline: Pipeline::ApplyHandReclassification,
    name: "ApplyHandReclassificationHCP",
    script_home: "ApplyHandReclassification",
    output_resource: "{scan}_HandReclassification",
    granularity: Granularity::PerScan,
    scan_source: Some(FIX_PROC),
    prerequisites: &[Requirement::Resource("{scan}_FIX")],
    phases: STANDARD_PHASES,
    resources: JobResources {
        nodes: 1,
        ppn: 1,
        gpus: None,
        walltime_hours: 4,
        vmem_gbs: 8,
    },
    run_status: RunStatusStrategy::SchedulerQuery,
    default_classifier: "3T",
    accepts_registration: false,
};

static BEDPOSTX: PipelineDescriptor = PipelineDescriptor {
    pipeline: Pipeline::Bedpostx,
    name: "BedpostxHCP",
    script_home: "Bedpostx",
    output_resource: "Diffusion_bedpostx",
    granularity: Granularity::PerSubject,
    scan_source: None,
    prerequisites: &[Requirement::Resource(DIFFUSION_PREPROC_RESOURCE)],
    phases: STANDARD_PHASES,
    resources: JobResources {
        nodes: 1,
        ppn: 3,
        gpus: Some(1),
        walltime_hours: 24,
        vmem_gbs: 16,
    },
    run_status: RunStatusStrategy::Marker,
    default_classifier: "3T",
    accepts_registration: false,
};
