use hcp_pipeline_jobs::domain::{ProcessingStage, Registration, SubjectInfo};
use hcp_pipeline_jobs::pipeline::Pipeline;

#[test]
fn catalog_is_consistent() {
    for pipeline in Pipeline::ALL {
        let descriptor = pipeline.descriptor();
        assert_eq!(descriptor.pipeline, pipeline);
        assert_eq!(Pipeline::from_name(descriptor.name), Some(pipeline));
        assert_eq!(
            descriptor.is_per_scan(),
            descriptor.output_resource.contains("{scan}"),
            "{}",
            descriptor.name
        );
        assert_eq!(descriptor.is_per_scan(), descriptor.scan_source.is_some());
        assert!(descriptor.phases.iter().any(|phase| phase.work));
        assert!(
            descriptor
                .phases
                .windows(2)
                .all(|pair| pair[0].stage <= pair[1].stage)
        );
        let all_phases = descriptor.phases_from(ProcessingStage::PrepareScripts);
        assert_eq!(all_phases.len(), descriptor.phases.len());
    }
}

#[test]
fn seven_tesla_pipelines_default_their_classifier() {
    let subject = SubjectInfo::new("HCP_1200", "100307", None, None);
    let multirun = Pipeline::MultiRunIcaFix.descriptor();
    assert_eq!(subject.session(multirun.default_classifier), "100307_7T");
    let structural = Pipeline::StructuralPreprocessing.descriptor();
    assert_eq!(subject.session(structural.default_classifier), "100307_3T");
}

#[test]
fn only_reapplyfix_takes_a_registration() {
    for pipeline in Pipeline::ALL {
        let accepted = pipeline
            .descriptor()
            .check_registration(Registration::MsmSulc)
            .is_ok();
        assert_eq!(accepted, pipeline == Pipeline::ReApplyFix, "{pipeline}");
    }
    assert_eq!(
        Pipeline::ReApplyFix
            .descriptor()
            .output_resource_name(Some("tfMRI_WM_RL"), Registration::MsmSulc),
        "tfMRI_WM_RL_ReApplyFix_MSMSulc"
    );
}

#[test]
fn pipeline_serializes_kebab_case() {
    let json = serde_json::to_string(&Pipeline::ApplyHandReclassification).unwrap();
    assert_eq!(json, "\"apply-hand-reclassification\"");
    let parsed: Pipeline = serde_json::from_str("\"re-apply-fix\"").unwrap();
    assert_eq!(parsed, Pipeline::ReApplyFix);
}
