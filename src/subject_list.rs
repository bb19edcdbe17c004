use std::fs;
use std::io::Write;

use camino::Utf8Path;

use crate::domain::{NONE_LITERAL, SubjectInfo};
use crate::error::PipelineError;

pub const DEFAULT_SEPARATOR: char = ':';
pub const TAB_SEPARATOR: char = '\t';

/// Reads a subject list. The whole file is rejected on the first malformed line.
pub fn parse_list(path: &Utf8Path, separator: char) -> Result<Vec<SubjectInfo>, PipelineError> {
    let content = fs::read_to_string(path.as_std_path())
        .map_err(|err| PipelineError::Filesystem(format!("read {path}: {err}")))?;
    parse_str(&content, separator, path)
}

pub fn parse_str(
    content: &str,
    separator: char,
    origin: &Utf8Path,
) -> Result<Vec<SubjectInfo>, PipelineError> {
    let mut subjects = Vec::new();
    for (index, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let malformed = |reason: &str| PipelineError::MalformedSubject {
            path: origin.to_path_buf(),
            line: index + 1,
            content: raw.to_string(),
            reason: reason.to_string(),
        };

        let fields = line.split(separator).map(str::trim).collect::<Vec<_>>();
        let (project, subject_id, classifier, extra) = match fields.as_slice() {
            [project, subject_id, extra] => (*project, *subject_id, None, *extra),
            [project, subject_id, classifier, extra] => {
                (*project, *subject_id, Some(*classifier), *extra)
            }
            _ => {
                return Err(malformed(&format!(
                    "expected 3 or 4 fields separated by {separator:?}, found {}",
                    fields.len()
                )));
            }
        };

        if project.is_empty() || project == NONE_LITERAL {
            return Err(malformed("missing project"));
        }
        if subject_id.is_empty() || subject_id == NONE_LITERAL {
            return Err(malformed("missing subject id"));
        }

        subjects.push(SubjectInfo::new(
            project,
            subject_id,
            classifier.and_then(optional_field),
            optional_field(extra),
        ));
    }
    Ok(subjects)
}

/// Overwrites `path` with one record per line using the default separator.
pub fn write_list(path: &Utf8Path, subjects: &[SubjectInfo]) -> Result<(), PipelineError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix(".subjects")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
    for subject in subjects {
        writeln!(temp, "{}", subject.to_record(DEFAULT_SEPARATOR))
            .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
    }
    temp.persist(path.as_std_path())
        .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
    Ok(())
}

fn optional_field(value: &str) -> Option<String> {
    if value.is_empty() || value == NONE_LITERAL {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_skips_comments_and_blanks() {
        let content = "HCP_900:100206:rfMRI_REST1_LR\n# comment\n\nHCP_900:100307:None\n";
        let subjects = parse_str(content, DEFAULT_SEPARATOR, Utf8Path::new("list.txt")).unwrap();
        assert_eq!(subjects.len(), 2);
        assert_eq!(subjects[0].project(), "HCP_900");
        assert_eq!(subjects[0].subject_id(), "100206");
        assert_eq!(subjects[0].classifier(), None);
        assert_eq!(subjects[0].extra(), Some("rfMRI_REST1_LR"));
        assert_eq!(subjects[1].extra(), None);
    }

    #[test]
    fn parse_tab_separated_with_classifier() {
        let content = "HCP_1200\t100307\t7T\tREST\n";
        let subjects = parse_str(content, TAB_SEPARATOR, Utf8Path::new("list.txt")).unwrap();
        assert_eq!(subjects[0].classifier(), Some("7T"));
        assert_eq!(subjects[0].extra(), Some("REST"));
    }

    #[test]
    fn malformed_line_reports_line_number() {
        let content = "HCP_900:100206:all\nHCP_900\n";
        let err = parse_str(content, DEFAULT_SEPARATOR, Utf8Path::new("list.txt")).unwrap_err();
        assert_matches!(
            err,
            PipelineError::MalformedSubject { line: 2, ref content, .. } if content == "HCP_900"
        );
    }
}
