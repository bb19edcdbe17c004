use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Literal used in subject records for an absent field.
pub const NONE_LITERAL: &str = "None";

/// `extra` sentinel selecting every available scan.
pub const EXTRA_ALL: &str = "all";

/// `extra` sentinel selecting only scans whose processing is incomplete.
pub const EXTRA_INCOMPLETE: &str = "incomplete";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectInfo {
    project: String,
    subject_id: String,
    classifier: Option<String>,
    extra: Option<String>,
}

impl SubjectInfo {
    pub fn new(
        project: impl Into<String>,
        subject_id: impl Into<String>,
        classifier: Option<String>,
        extra: Option<String>,
    ) -> Self {
        Self {
            project: project.into(),
            subject_id: subject_id.into(),
            classifier,
            extra,
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn classifier(&self) -> Option<&str> {
        self.classifier.as_deref()
    }

    pub fn extra(&self) -> Option<&str> {
        self.extra.as_deref()
    }

    pub fn classifier_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.classifier.as_deref().unwrap_or(default)
    }

    /// Archive session label, `{subject}_{classifier}`.
    pub fn session(&self, default_classifier: &str) -> String {
        format!("{}_{}", self.subject_id, self.classifier_or(default_classifier))
    }

    /// Concrete scan named by `extra`, ignoring the `all`/`incomplete` sentinels.
    pub fn scan(&self) -> Option<&str> {
        match self.extra.as_deref() {
            Some(EXTRA_ALL) | Some(EXTRA_INCOMPLETE) | None => None,
            Some(scan) => Some(scan),
        }
    }

    pub fn with_extra(&self, extra: impl Into<String>) -> Self {
        Self {
            project: self.project.clone(),
            subject_id: self.subject_id.clone(),
            classifier: self.classifier.clone(),
            extra: Some(extra.into()),
        }
    }

    /// Serializes to a single subject-list line without a trailing newline.
    pub fn to_record(&self, separator: char) -> String {
        let extra = self.extra.as_deref().unwrap_or(NONE_LITERAL);
        match &self.classifier {
            Some(classifier) => format!(
                "{}{separator}{}{separator}{}{separator}{}",
                self.project, self.subject_id, classifier, extra
            ),
            None => format!(
                "{}{separator}{}{separator}{}",
                self.project, self.subject_id, extra
            ),
        }
    }
}

impl fmt::Display for SubjectInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_record(':'))
    }
}

/// Surface registration variant for pipelines whose outputs depend on it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Registration {
    #[default]
    Default,
    #[serde(rename = "MSMAll")]
    MsmAll,
    #[serde(rename = "MSMSulc")]
    MsmSulc,
}

impl Registration {
    /// Infix used in CIFTI output names, e.g. `_MSMAll` in `_Atlas_MSMAll_hp2000_clean`.
    pub fn file_infix(&self) -> &'static str {
        match self {
            Registration::Default => "",
            Registration::MsmAll => "_MSMAll",
            Registration::MsmSulc => "_MSMSulc",
        }
    }

    pub fn cli_value(&self) -> Option<&'static str> {
        match self {
            Registration::Default => None,
            Registration::MsmAll => Some("MSMAll"),
            Registration::MsmSulc => Some("MSMSulc"),
        }
    }
}

impl fmt::Display for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cli_value().unwrap_or(NONE_LITERAL))
    }
}

impl FromStr for Registration {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "" | NONE_LITERAL => Ok(Registration::Default),
            "MSMAll" => Ok(Registration::MsmAll),
            "MSMSulc" => Ok(Registration::MsmSulc),
            _ => Err(PipelineError::UnknownRegistration(value.to_string())),
        }
    }
}

/// Phases of a pipeline run, in execution order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStage {
    PrepareScripts,
    GetData,
    ProcessData,
    CleanData,
    PutData,
    CheckData,
}

impl ProcessingStage {
    pub const ALL: [ProcessingStage; 6] = [
        ProcessingStage::PrepareScripts,
        ProcessingStage::GetData,
        ProcessingStage::ProcessData,
        ProcessingStage::CleanData,
        ProcessingStage::PutData,
        ProcessingStage::CheckData,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStage::PrepareScripts => "PREPARE_SCRIPTS",
            ProcessingStage::GetData => "GET_DATA",
            ProcessingStage::ProcessData => "PROCESS_DATA",
            ProcessingStage::CleanData => "CLEAN_DATA",
            ProcessingStage::PutData => "PUT_DATA",
            ProcessingStage::CheckData => "CHECK_DATA",
        }
    }
}

impl fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStage {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == value)
            .ok_or_else(|| PipelineError::InvalidStage(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn stage_ordering_follows_execution() {
        assert!(ProcessingStage::PrepareScripts < ProcessingStage::GetData);
        assert!(ProcessingStage::PutData <= ProcessingStage::PutData);
        assert!(ProcessingStage::CheckData > ProcessingStage::CleanData);
        let mut shuffled = vec![
            ProcessingStage::PutData,
            ProcessingStage::GetData,
            ProcessingStage::CheckData,
            ProcessingStage::PrepareScripts,
        ];
        shuffled.sort();
        assert_eq!(shuffled[0], ProcessingStage::PrepareScripts);
        assert_eq!(shuffled[3], ProcessingStage::CheckData);
    }

    #[test]
    fn stage_parse_is_case_sensitive() {
        let stage: ProcessingStage = "CLEAN_DATA".parse().unwrap();
        assert_eq!(stage, ProcessingStage::CleanData);
        let err = "clean_data".parse::<ProcessingStage>().unwrap_err();
        assert_matches!(err, PipelineError::InvalidStage(_));
    }

    #[test]
    fn registration_rejects_unknown_names() {
        assert_eq!(
            "MSMAll".parse::<Registration>().unwrap(),
            Registration::MsmAll
        );
        assert_eq!(
            "None".parse::<Registration>().unwrap(),
            Registration::Default
        );
        let err = "FOO".parse::<Registration>().unwrap_err();
        assert_matches!(err, PipelineError::UnknownRegistration(name) if name == "FOO");
    }

    #[test]
    fn scan_ignores_sentinels() {
        let subject = SubjectInfo::new("HCP_900", "100206", None, Some("all".to_string()));
        assert_eq!(subject.scan(), None);
        let scan = subject.with_extra("rfMRI_REST1_LR");
        assert_eq!(scan.scan(), Some("rfMRI_REST1_LR"));
        assert_eq!(scan.session("3T"), "100206_3T");
    }
}
