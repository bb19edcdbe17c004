pub mod archive;
pub mod checklist;
pub mod completion;
pub mod config;
pub mod domain;
pub mod driver;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod prereq;
pub mod progress;
pub mod run_status;
pub mod scheduler;
pub mod shadow;
pub mod status;
pub mod subject_list;
pub mod submitter;
