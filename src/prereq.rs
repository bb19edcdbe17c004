use crate::archive::Archive;
use crate::domain::SubjectInfo;
use crate::error::PipelineError;
use crate::pipeline::{PipelineDescriptor, Requirement};
use crate::progress::{ProgressEvent, ProgressSink};

pub trait PrereqChecker {
    fn are_prereqs_met(
        &self,
        subject: &SubjectInfo,
        sink: &dyn ProgressSink,
    ) -> Result<bool, PipelineError>;
}

/// Evaluates the requirement list of a pipeline descriptor against the archive.
pub struct ArchivePrereqs<'a> {
    archive: &'a Archive,
    descriptor: &'static PipelineDescriptor,
}

impl<'a> ArchivePrereqs<'a> {
    pub fn new(archive: &'a Archive, descriptor: &'static PipelineDescriptor) -> Self {
        Self {
            archive,
            descriptor,
        }
    }

    fn requirement_met(
        &self,
        requirement: &Requirement,
        subject: &SubjectInfo,
        sink: &dyn ProgressSink,
    ) -> Result<bool, PipelineError> {
        let resources = self
            .archive
            .resources_dir(subject, self.descriptor.default_classifier);
        match requirement {
            Requirement::Resource(template) => {
                let dir = self
                    .archive
                    .required_resource_dir(self.descriptor, subject, template)?;
                let exists = self.archive.does_dir_exist(&dir)?;
                trace(sink, exists, format!("resource {dir}"));
                Ok(exists)
            }
            Requirement::AnyOf(pattern) => {
                let names = self.archive.available_names(&resources, pattern)?;
                let met = !names.is_empty();
                trace(
                    sink,
                    met,
                    format!(
                        "at least one {}*{} resource (found {})",
                        pattern.prefixes.join("|"),
                        pattern.suffix,
                        names.len()
                    ),
                );
                Ok(met)
            }
            Requirement::SameScans {
                processed,
                unprocessed,
            } => {
                let processed_names = self.archive.available_names(&resources, processed)?;
                let unprocessed_names = self.archive.available_names(&resources, unprocessed)?;
                let met = !unprocessed_names.is_empty() && processed_names == unprocessed_names;
                trace(
                    sink,
                    met,
                    format!(
                        "processed scans {:?} match unprocessed scans {:?}",
                        processed_names, unprocessed_names
                    ),
                );
                Ok(met)
            }
        }
    }
}

impl PrereqChecker for ArchivePrereqs<'_> {
    fn are_prereqs_met(
        &self,
        subject: &SubjectInfo,
        sink: &dyn ProgressSink,
    ) -> Result<bool, PipelineError> {
        let mut all_met = true;
        for requirement in self.descriptor.prerequisites {
            all_met &= self.requirement_met(requirement, subject, sink)?;
        }
        tracing::debug!(
            pipeline = self.descriptor.name,
            subject = %subject,
            met = all_met,
            "prerequisite check"
        );
        Ok(all_met)
    }
}

fn trace(sink: &dyn ProgressSink, met: bool, what: String) {
    let verdict = if met { "ok" } else { "MISSING" };
    sink.event(ProgressEvent::message(format!("prereq {verdict}: {what}")));
}

#[cfg(test)]
mod tests {
    use std::fs;

    use camino::Utf8PathBuf;

    use super::*;
    use crate::pipeline::Pipeline;
    use crate::progress::{CollectingSink, NoopSink};

    fn archive() -> (tempfile::TempDir, Archive) {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        (temp, Archive::new(root))
    }

    fn add_resource(archive: &Archive, subject: &SubjectInfo, classifier: &str, name: &str) {
        fs::create_dir_all(archive.resource_dir(subject, classifier, name)).unwrap();
    }

    #[test]
    fn structural_needs_t1w_and_t2w() {
        let (_temp, archive) = archive();
        let subject = SubjectInfo::new("HCP_900", "100206", None, None);
        let checker = ArchivePrereqs::new(&archive, Pipeline::StructuralPreprocessing.descriptor());

        add_resource(&archive, &subject, "3T", "T1w_MPR1_unproc");
        let sink = CollectingSink::new();
        assert!(!checker.are_prereqs_met(&subject, &sink).unwrap());
        assert!(sink.contains("prereq MISSING: at least one T2w*_unproc"));

        add_resource(&archive, &subject, "3T", "T2w_SPC1_unproc");
        assert!(checker.are_prereqs_met(&subject, &NoopSink).unwrap());

        // more archive content never revokes a met prerequisite
        add_resource(&archive, &subject, "3T", "T1w_MPR2_unproc");
        add_resource(&archive, &subject, "3T", "rfMRI_REST1_LR_unproc");
        assert!(checker.are_prereqs_met(&subject, &NoopSink).unwrap());
    }

    #[test]
    fn diffusion_needs_structural_and_diffusion_unproc() {
        let (_temp, archive) = archive();
        let subject = SubjectInfo::new("HCP_900", "100307", None, None);
        let checker = ArchivePrereqs::new(&archive, Pipeline::DiffusionPreprocessing.descriptor());

        add_resource(&archive, &subject, "3T", "Diffusion_unproc");
        assert!(!checker.are_prereqs_met(&subject, &NoopSink).unwrap());
        add_resource(&archive, &subject, "3T", "Structural_preproc");
        assert!(checker.are_prereqs_met(&subject, &NoopSink).unwrap());
    }

    #[test]
    fn multirun_icafix_needs_all_retinotopy_preprocessed() {
        let (_temp, archive) = archive();
        let subject = SubjectInfo::new("HCP_1200", "100307", Some("7T".to_string()), None);
        let checker = ArchivePrereqs::new(&archive, Pipeline::MultiRunIcaFix.descriptor());

        assert!(!checker.are_prereqs_met(&subject, &NoopSink).unwrap());
        add_resource(&archive, &subject, "7T", "tfMRI_RETCCW_AP_unproc");
        add_resource(&archive, &subject, "7T", "tfMRI_RETCW_PA_unproc");
        add_resource(&archive, &subject, "7T", "tfMRI_RETCCW_AP_preproc");
        assert!(!checker.are_prereqs_met(&subject, &NoopSink).unwrap());
        add_resource(&archive, &subject, "7T", "tfMRI_RETCW_PA_preproc");
        assert!(checker.are_prereqs_met(&subject, &NoopSink).unwrap());
    }

    #[test]
    fn functional_checks_the_named_scan() {
        let (_temp, archive) = archive();
        let subject = SubjectInfo::new(
            "HCP_900",
            "100206",
            None,
            Some("rfMRI_REST1_LR".to_string()),
        );
        let checker = ArchivePrereqs::new(&archive, Pipeline::FunctionalPreprocessing.descriptor());

        add_resource(&archive, &subject, "3T", "Structural_preproc");
        add_resource(&archive, &subject, "3T", "rfMRI_REST1_RL_unproc");
        assert!(!checker.are_prereqs_met(&subject, &NoopSink).unwrap());
        add_resource(&archive, &subject, "3T", "rfMRI_REST1_LR_unproc");
        assert!(checker.are_prereqs_met(&subject, &NoopSink).unwrap());
    }
}
