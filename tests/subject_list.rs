use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use hcp_pipeline_jobs::domain::SubjectInfo;
use hcp_pipeline_jobs::error::PipelineError;
use hcp_pipeline_jobs::subject_list::{DEFAULT_SEPARATOR, TAB_SEPARATOR, parse_list, write_list};

fn scratch() -> (tempfile::TempDir, Utf8PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    (dir, root)
}

#[test]
fn parses_comments_blanks_and_none() {
    let (_dir, root) = scratch();
    let path = root.join("subjects.txt");
    std::fs::write(
        &path,
        "HCP_900:100206:rfMRI_REST1_LR\n# comment\n\nHCP_900:100307:None\n",
    )
    .unwrap();

    let subjects = parse_list(&path, DEFAULT_SEPARATOR).unwrap();
    assert_eq!(
        subjects,
        vec![
            SubjectInfo::new("HCP_900", "100206", None, Some("rfMRI_REST1_LR".to_string())),
            SubjectInfo::new("HCP_900", "100307", None, None),
        ]
    );

    let out = root.join("out").join("subjects.txt");
    write_list(&out, &subjects).unwrap();
    let written = std::fs::read_to_string(&out).unwrap();
    assert_eq!(
        written,
        "HCP_900:100206:rfMRI_REST1_LR\nHCP_900:100307:None\n"
    );
}

#[test]
fn four_field_records_keep_classifier() {
    let (_dir, root) = scratch();
    let path = root.join("7t.txt");
    std::fs::write(&path, "HCP_1200\t100307\t7T\tREST\n").unwrap();

    let subjects = parse_list(&path, TAB_SEPARATOR).unwrap();
    assert_eq!(subjects.len(), 1);
    assert_eq!(subjects[0].classifier(), Some("7T"));
    assert_eq!(subjects[0].extra(), Some("REST"));
    assert_eq!(subjects[0].session("3T"), "100307_7T");
}

#[test]
fn malformed_line_rejects_the_whole_file() {
    let (_dir, root) = scratch();
    let path = root.join("bad.txt");
    std::fs::write(&path, "HCP_900:100206:all\nHCP_900\n").unwrap();

    let err = parse_list(&path, DEFAULT_SEPARATOR).unwrap_err();
    assert_matches!(
        err,
        PipelineError::MalformedSubject { line: 2, ref content, .. } if content == "HCP_900"
    );
}

#[test]
fn missing_file_is_a_filesystem_error() {
    let (_dir, root) = scratch();
    let err = parse_list(&root.join("absent.txt"), DEFAULT_SEPARATOR).unwrap_err();
    assert_matches!(err, PipelineError::Filesystem(_));
}

#[test]
fn mixed_records_survive_write_and_reparse() {
    let (_dir, root) = scratch();
    let tabbed = root.join("tabbed.txt");
    std::fs::write(&tabbed, "HCP_1200\t102311\t7T\ttfMRI_MOVIE1_AP\n").unwrap();
    let mut subjects = parse_list(&tabbed, TAB_SEPARATOR).unwrap();
    subjects.extend([
        SubjectInfo::new("HCP_900", "100206", None, Some("rfMRI_REST1_LR".to_string())),
        SubjectInfo::new("HCP_900", "100307", None, None),
        SubjectInfo::new("HCP_1200", "100610", Some("7T".to_string()), None),
        SubjectInfo::new(
            "HCP_1200",
            "104416",
            Some("7T".to_string()),
            Some("incomplete".to_string()),
        ),
    ]);

    let path = root.join("mixed.txt");
    write_list(&path, &subjects).unwrap();
    assert_eq!(parse_list(&path, DEFAULT_SEPARATOR).unwrap(), subjects);

    let written = std::fs::read_to_string(&path).unwrap();
    assert_eq!(
        written.lines().next(),
        Some("HCP_1200:102311:7T:tfMRI_MOVIE1_AP")
    );
    assert!(written.contains("HCP_1200:100610:7T:None\n"));
}
