//! Expected-file checklists, one per pipeline.
//!
//! These are minimum checklists; callers that know more outputs can supply
//! their own [`Checklist`] to the completion checker.

use camino::{Utf8Path, Utf8PathBuf};

use crate::archive::Archive;
use crate::domain::{Registration, SubjectInfo};
use crate::error::PipelineError;
use crate::pipeline::Pipeline;

pub struct ChecklistContext<'a> {
    pub archive: &'a Archive,
    pub subject: &'a SubjectInfo,
    pub resource_dir: &'a Utf8Path,
    pub scan: Option<&'a str>,
    pub registration: Registration,
}

pub trait Checklist {
    fn expected_files(&self, ctx: &ChecklistContext<'_>)
    -> Result<Vec<Utf8PathBuf>, PipelineError>;
}

/// Built-in checklist for a known pipeline.
#[derive(Debug, Clone, Copy)]
pub struct StandardChecklist(pub Pipeline);

impl Checklist for StandardChecklist {
    fn expected_files(
        &self,
        ctx: &ChecklistContext<'_>,
    ) -> Result<Vec<Utf8PathBuf>, PipelineError> {
        let subject = ctx.subject.subject_id();
        let base = ctx.resource_dir.join(subject);
        let scan = ctx.scan.unwrap_or_default();
        let results = base.join("MNINonLinear").join("Results").join(scan);
        let reg = ctx.registration.file_infix();

        let files = match self.0 {
            Pipeline::StructuralPreprocessing => vec![
                base.join("T1w").join("T1w_acpc_dc_restore.nii.gz"),
                base.join("T1w").join("T2w_acpc_dc_restore.nii.gz"),
                base.join("T1w").join(subject).join("mri").join("aparc+aseg.mgz"),
                base.join("MNINonLinear").join("T1w_restore.nii.gz"),
                base.join("MNINonLinear")
                    .join(format!("{subject}.164k_fs_LR.wb.spec")),
                base.join("MNINonLinear")
                    .join("fsaverage_LR32k")
                    .join(format!("{subject}.32k_fs_LR.wb.spec")),
            ],
            Pipeline::FunctionalPreprocessing => vec![
                results.join(format!("{scan}.nii.gz")),
                results.join(format!("{scan}_Atlas.dtseries.nii")),
                results.join("Movement_Regressors.txt"),
                results.join("brainmask_fs.2.nii.gz"),
            ],
            Pipeline::DiffusionPreprocessing => {
                let diffusion = base.join("T1w").join("Diffusion");
                vec![
                    diffusion.join("data.nii.gz"),
                    diffusion.join("bvals"),
                    diffusion.join("bvecs"),
                    diffusion.join("nodif_brain_mask.nii.gz"),
                    diffusion
                        .join("eddylogs")
                        .join("eddy_unwarped_images.eddy_parameters"),
                ]
            }
            Pipeline::MultiRunIcaFix => {
                let mut files = Vec::new();
                let scans = ctx.archive.available_retinotopy_preproc_names(ctx.subject)?;
                for scan in scans {
                    let results = base.join("MNINonLinear").join("Results").join(&scan);
                    files.push(results.join(format!("{scan}_hp2000_clean.nii.gz")));
                    files.push(results.join(format!("{scan}_Atlas_hp2000_clean.dtseries.nii")));
                }
                files
            }
            Pipeline::ReApplyFix => vec![
                results.join(format!("{scan}_hp2000_clean.nii.gz")),
                results.join(format!("{scan}_Atlas{reg}_hp2000_clean.dtseries.nii")),
                results.join(format!("{scan}_Atlas{reg}_hp2000_clean_vn.dscalar.nii")),
            ],
            Pipeline::DeDriftAndResample => {
                let mni = base.join("MNINonLinear");
                vec![
                    mni.join(format!("{subject}.MSMAll.164k_fs_LR.wb.spec")),
                    mni.join("fsaverage_LR32k")
                        .join(format!("{subject}.MSMAll.32k_fs_LR.wb.spec")),
                    mni.join("fsaverage_LR32k")
                        .join(format!("{subject}.L.sphere.DeDrift.MSMAll.32k_fs_LR.surf.gii")),
                    mni.join("fsaverage_LR32k")
                        .join(format!("{subject}.R.sphere.DeDrift.MSMAll.32k_fs_LR.surf.gii")),
                ]
            }
            Pipeline::ApplyHandReclassification => {
                let ica = results.join(format!("{scan}_hp2000.ica"));
                vec![
                    ica.join("HandNoise.txt"),
                    ica.join("HandSignal.txt"),
                    ica.join("ReclassifyAsNoise.txt"),
                    ica.join("ReclassifyAsSignal.txt"),
                ]
            }
            Pipeline::Bedpostx => {
                let bedpostx = base.join("T1w").join("Diffusion.bedpostX");
                vec![
                    bedpostx.join("merged_f1samples.nii.gz"),
                    bedpostx.join("mean_dsumsamples.nii.gz"),
                    bedpostx.join("nodif_brain_mask.nii.gz"),
                ]
            }
        };
        Ok(files)
    }
}
