use std::io::{self, Write};

use serde::Serialize;

use crate::completion::CompletionReport;
use crate::driver::BatchResult;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::run_status::RunStatus;
use crate::status::StatusRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckItem {
    pub subject: String,
    pub scan: Option<String>,
    pub prereqs_met: bool,
    pub complete: bool,
    pub report: Option<CompletionReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub pipeline: String,
    pub items: Vec<CheckItem>,
}

impl CheckResult {
    pub fn all_complete(&self) -> bool {
        self.items.iter().all(|item| item.complete)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunningItem {
    pub subject: String,
    pub status: RunStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunningResult {
    pub pipeline: String,
    pub items: Vec<RunningItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResult {
    pub pipeline: String,
    pub rows: Vec<StatusRow>,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_batch(result: &BatchResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_check(result: &CheckResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_status(result: &StatusResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_running(result: &RunningResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

// stdout carries the JSON document only.
impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}
