mod common;

use std::fs;

use assert_matches::assert_matches;

use common::{Fixture, MockScheduler};
use hcp_pipeline_jobs::domain::{ProcessingStage, Registration, SubjectInfo};
use hcp_pipeline_jobs::error::PipelineError;
use hcp_pipeline_jobs::pipeline::Pipeline;
use hcp_pipeline_jobs::run_status::RunningMarker;
use hcp_pipeline_jobs::submitter::{SubmitOptions, SubmitRequest, Submitter};

const SERVER: &str = "http://db-shadow1.nrg.mir:8080";

fn request(subject: SubjectInfo, options: SubmitOptions) -> SubmitRequest {
    SubmitRequest {
        subject,
        session: None,
        server: SERVER.to_string(),
        options,
    }
}

fn structural_subject() -> SubjectInfo {
    SubjectInfo::new("HCP_900", "100206", None, None)
}

fn read_job_script(result_dir: &camino::Utf8Path, stem: &str) -> String {
    fs::read_to_string(result_dir.join(format!("{stem}.XNAT_PBS_job"))).unwrap()
}

#[test]
fn submits_every_phase_as_a_dependency_chain() {
    let fixture = Fixture::new();
    let descriptor = Pipeline::StructuralPreprocessing.descriptor();
    fixture.install_templates(descriptor);
    let scheduler = MockScheduler::default();

    let result = Submitter::new(&fixture.ctx, &scheduler)
        .submit_jobs(descriptor, &request(structural_subject(), SubmitOptions::default()))
        .unwrap();

    let phases = result.jobs.iter().map(|job| job.phase.as_str()).collect::<Vec<_>>();
    assert_eq!(
        phases,
        vec!["get_data", "process_data", "clean_data", "put_data", "check_data"]
    );
    let calls = scheduler.calls();
    assert_eq!(calls.len(), 5);
    assert_eq!(calls[0].depends_on, None);
    for (index, call) in calls.iter().enumerate().skip(1) {
        assert_eq!(
            call.depends_on.as_deref(),
            Some(result.jobs[index - 1].job_id.as_str())
        );
    }

    let marker = RunningMarker::new(
        fixture.ctx.running_status_dir().unwrap(),
        descriptor,
        &structural_subject(),
    );
    assert!(marker.exists().unwrap());
    assert_eq!(result.marker.as_path(), marker.path());

    let leaf = result.working_dir.file_name().unwrap();
    assert!(leaf.starts_with("100206_3T_"));
    assert!(
        result
            .working_dir
            .starts_with(fixture.ctx.build_root.join("StructuralPreprocessingHCP"))
    );
    assert!(
        result
            .working_dir
            .join("StructuralPreprocessingHCP_process_data.XNAT_PROCESS")
            .is_file()
    );

    let process = read_job_script(&result.working_dir, "StructuralPreprocessingHCP_process_data");
    assert!(process.contains("#PBS -l nodes=1:ppn=1,walltime=24:00:00,vmem=32gb"));
    assert!(process.contains("#PBS -N 100206.StructuralPreprocessingHCP"));
    assert!(process.contains(&format!("--server={SERVER}")));
    assert!(process.contains("--session=100206_3T"));
    assert!(process.contains("--classifier=3T"));
    assert!(!process.contains("--scan="));

    let get_data = read_job_script(&result.working_dir, "StructuralPreprocessingHCP_get_data");
    assert!(get_data.contains("#PBS -l nodes=1:ppn=1,walltime=4:00:00,vmem=4gb"));
}

#[test]
fn starting_stage_skips_earlier_phases() {
    let fixture = Fixture::new();
    let descriptor = Pipeline::StructuralPreprocessing.descriptor();
    fixture.install_templates(descriptor);
    let scheduler = MockScheduler::default();
    let options = SubmitOptions {
        starting_stage: ProcessingStage::PutData,
        ..SubmitOptions::default()
    };

    let result = Submitter::new(&fixture.ctx, &scheduler)
        .submit_jobs(descriptor, &request(structural_subject(), options))
        .unwrap();

    let stages = result.jobs.iter().map(|job| job.stage).collect::<Vec<_>>();
    assert_eq!(stages, vec![ProcessingStage::PutData, ProcessingStage::CheckData]);
    let calls = scheduler.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].depends_on, None);
    assert!(
        !result
            .working_dir
            .join("StructuralPreprocessingHCP_get_data.XNAT_PBS_job")
            .exists()
    );
}

#[test]
fn diffusion_requests_gpu_only_for_eddy() {
    let fixture = Fixture::new();
    let descriptor = Pipeline::DiffusionPreprocessing.descriptor();
    fixture.install_templates(descriptor);
    let scheduler = MockScheduler::default();
    let options = SubmitOptions {
        walltime_limit_hours: Some(30),
        clean_output_first: true,
        ..SubmitOptions::default()
    };

    let result = Submitter::new(&fixture.ctx, &scheduler)
        .submit_jobs(descriptor, &request(structural_subject(), options))
        .unwrap();
    assert_eq!(result.jobs.len(), 7);

    let eddy = read_job_script(&result.working_dir, "DiffusionPreprocessingHCP_Eddy");
    assert!(eddy.contains("#PBS -l nodes=1:ppn=3:gpus=1,walltime=30:00:00,vmem=24gb"));
    let pre_eddy = read_job_script(&result.working_dir, "DiffusionPreprocessingHCP_PreEddy");
    assert!(pre_eddy.contains("#PBS -l nodes=1:ppn=3,walltime=30:00:00,vmem=24gb"));

    let put_data = read_job_script(&result.working_dir, "DiffusionPreprocessingHCP_put_data");
    assert!(put_data.contains("--clean-output-resource-first"));
    assert!(!eddy.contains("--clean-output-resource-first"));
}

#[test]
fn per_scan_submission_names_scan_and_registration() {
    let fixture = Fixture::new();
    let descriptor = Pipeline::ReApplyFix.descriptor();
    fixture.install_templates(descriptor);
    let scheduler = MockScheduler::default();
    let subject = SubjectInfo::new("HCP_900", "100206", None, Some("rfMRI_REST1_LR".to_string()));
    let options = SubmitOptions {
        registration: Registration::MsmAll,
        ..SubmitOptions::default()
    };

    let result = Submitter::new(&fixture.ctx, &scheduler)
        .submit_jobs(descriptor, &request(subject, options))
        .unwrap();
    let leaf = result.working_dir.file_name().unwrap();
    assert!(leaf.starts_with("100206_3T_rfMRI_REST1_LR_"));

    let process = read_job_script(&result.working_dir, "ReApplyFixHCP_process_data");
    assert!(process.contains("--scan=rfMRI_REST1_LR"));
    assert!(process.contains("--reg-name=MSMAll"));
}

#[test]
fn per_scan_pipeline_without_scan_is_rejected() {
    let fixture = Fixture::new();
    let descriptor = Pipeline::FunctionalPreprocessing.descriptor();
    fixture.install_templates(descriptor);
    let scheduler = MockScheduler::default();

    let err = Submitter::new(&fixture.ctx, &scheduler)
        .submit_jobs(descriptor, &request(structural_subject(), SubmitOptions::default()))
        .unwrap_err();
    assert_matches!(err, PipelineError::MissingScan { .. });
    assert!(scheduler.calls().is_empty());
}

#[test]
fn scheduler_failure_rolls_back_marker_and_working_dir() {
    let fixture = Fixture::new();
    let descriptor = Pipeline::StructuralPreprocessing.descriptor();
    fixture.install_templates(descriptor);
    let scheduler = MockScheduler::failing_on(2);

    let err = Submitter::new(&fixture.ctx, &scheduler)
        .submit_jobs(descriptor, &request(structural_subject(), SubmitOptions::default()))
        .unwrap_err();
    assert_matches!(err, PipelineError::Scheduler(_));
    assert_eq!(scheduler.calls().len(), 2);

    let marker = RunningMarker::new(
        fixture.ctx.running_status_dir().unwrap(),
        descriptor,
        &structural_subject(),
    );
    assert!(!marker.exists().unwrap());
    assert!(fixture.build_dirs(descriptor).is_empty());
}

#[test]
fn rejected_first_phase_leaves_nothing_behind() {
    let fixture = Fixture::new();
    let descriptor = Pipeline::StructuralPreprocessing.descriptor();
    fixture.install_templates(descriptor);
    let scheduler = MockScheduler::failing_on(0);

    let err = Submitter::new(&fixture.ctx, &scheduler)
        .submit_jobs(descriptor, &request(structural_subject(), SubmitOptions::default()))
        .unwrap_err();
    assert_matches!(err, PipelineError::Scheduler(_));
    assert!(scheduler.calls().is_empty());
    assert!(fixture.build_dirs(descriptor).is_empty());

    let marker = RunningMarker::new(
        fixture.ctx.running_status_dir().unwrap(),
        descriptor,
        &structural_subject(),
    );
    assert!(!marker.exists().unwrap());
}

#[test]
fn missing_template_leaves_nothing_behind() {
    let fixture = Fixture::new();
    let descriptor = Pipeline::Bedpostx.descriptor();
    let scheduler = MockScheduler::default();

    let err = Submitter::new(&fixture.ctx, &scheduler)
        .submit_jobs(descriptor, &request(structural_subject(), SubmitOptions::default()))
        .unwrap_err();
    assert_matches!(err, PipelineError::MissingTemplate(_));
    assert!(scheduler.calls().is_empty());
    assert!(fixture.build_dirs(descriptor).is_empty());

    let marker = RunningMarker::new(
        fixture.ctx.running_status_dir().unwrap(),
        descriptor,
        &structural_subject(),
    );
    assert!(!marker.exists().unwrap());
}

#[test]
fn existing_marker_blocks_submission() {
    let fixture = Fixture::new();
    let descriptor = Pipeline::StructuralPreprocessing.descriptor();
    fixture.install_templates(descriptor);
    let marker = RunningMarker::new(
        fixture.ctx.running_status_dir().unwrap(),
        descriptor,
        &structural_subject(),
    );
    marker.create().unwrap();
    let scheduler = MockScheduler::default();

    let err = Submitter::new(&fixture.ctx, &scheduler)
        .submit_jobs(descriptor, &request(structural_subject(), SubmitOptions::default()))
        .unwrap_err();
    assert_matches!(err, PipelineError::AlreadyRunning(_));
    assert!(scheduler.calls().is_empty());
}
