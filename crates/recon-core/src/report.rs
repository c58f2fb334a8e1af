use crate::compare::ComparisonOutcome;
use crate::config::TestCaseConfig;
use crate::domain::{HarnessError, HarnessResult};
use crate::environment::ProcessEnvironment;
use crate::pipeline::PipelineReport;
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub test_case: String,
    pub generated_at_unix_seconds: u64,
    pub environment: ProcessEnvironment,
    pub config: TestCaseConfig,
    pub pipeline: PipelineReport,
    /// Absent when a failed stage prevented the comparison or a dataset
    /// could not be loaded.
    pub comparison: Option<ComparisonOutcome>,
    pub comparison_error: Option<String>,
    pub passed: bool,
}

impl RunReport {
    pub fn new(
        test_case: &Path,
        environment: &ProcessEnvironment,
        config: &TestCaseConfig,
        pipeline: PipelineReport,
        comparison: Result<Option<ComparisonOutcome>, String>,
    ) -> Self {
        let (comparison, comparison_error) = match comparison {
            Ok(outcome) => (outcome, None),
            Err(reason) => (None, Some(reason)),
        };
        let passed = pipeline.passed()
            && comparison
                .as_ref()
                .is_some_and(|outcome| outcome.passed);
        Self {
            test_case: normalize_path(test_case),
            generated_at_unix_seconds: current_unix_timestamp_seconds(),
            environment: environment.clone(),
            config: config.clone(),
            pipeline,
            comparison,
            comparison_error,
            passed,
        }
    }
}

pub fn write_report_file(report_path: &Path, report: &RunReport) -> HarnessResult<()> {
    if let Some(parent_dir) = report_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
    {
        fs::create_dir_all(parent_dir).map_err(|source| {
            HarnessError::io_system(
                "IO.REPORT_DIRECTORY",
                format!(
                    "failed to create report directory '{}': {}",
                    parent_dir.display(),
                    source
                ),
            )
        })?;
    }

    let report_json = serde_json::to_string_pretty(report).map_err(|source| {
        HarnessError::internal(
            "INTERNAL.REPORT_SERIALIZE",
            format!(
                "failed to serialize report '{}': {}",
                report_path.display(),
                source
            ),
        )
    })?;
    fs::write(report_path, report_json).map_err(|source| {
        HarnessError::io_system(
            "IO.REPORT_WRITE",
            format!(
                "failed to write report '{}': {}",
                report_path.display(),
                source
            ),
        )
    })
}

pub fn render_human_summary(report: &RunReport) -> String {
    let mut lines = Vec::new();
    let status = if report.passed { "PASS" } else { "FAIL" };
    lines.push(format!("Test case {}: {}", report.test_case, status));

    let failed_stages = report
        .pipeline
        .failed_stages()
        .map(|stage| stage.stage.as_str())
        .collect::<Vec<_>>();
    if !failed_stages.is_empty() {
        lines.push(format!("Failed stages: {}", failed_stages.join(", ")));
    }

    for stage in &report.pipeline.stages {
        let stage_status = if stage.succeeded() { "PASS" } else { "FAIL" };
        lines.push(format!(
            "Stage {}: {} (exit_code={}, elapsed_ms={})",
            stage.stage, stage_status, stage.exit_code, stage.elapsed_ms
        ));
    }

    match (&report.comparison, &report.comparison_error) {
        (Some(outcome), _) => {
            for check in outcome.checks().into_iter().filter(|check| check.enabled) {
                let check_status = if check.passed { "PASS" } else { "FAIL" };
                let measured = check
                    .measured
                    .map_or_else(|| "undefined".to_string(), |value| format!("{value:.6}"));
                lines.push(format!(
                    "Check {}: {} (measured={})",
                    check.kind.as_str(),
                    check_status,
                    measured
                ));
            }
        }
        (None, Some(reason)) => lines.push(format!("Comparison: failed ({reason})")),
        (None, None) => lines.push("Comparison: skipped".to_string()),
    }

    lines.join("\n")
}

fn current_unix_timestamp_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
