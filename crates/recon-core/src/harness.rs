//! One complete test-case run: environment, configuration, pipeline,
//! comparison and verdict.

use crate::compare::compare;
use crate::config::TestCaseConfig;
use crate::domain::{HarnessResult, TEST_FAILURE_EXIT_CODE};
use crate::environment::{HostEnvironment, Platform, ProcessEnvironment};
use crate::pipeline::{PipelineOptions, run_pipeline};
use crate::progress::ProgressSink;
use crate::report::{RunReport, write_report_file};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct HarnessOptions {
    pub install_root: PathBuf,
    pub test_case: PathBuf,
    pub working_dir: PathBuf,
    pub platform: Platform,
    pub host: HostEnvironment,
    pub pipeline: PipelineOptions,
    pub report_path: Option<PathBuf>,
}

impl HarnessOptions {
    pub fn new(
        install_root: impl Into<PathBuf>,
        test_case: impl Into<PathBuf>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            install_root: install_root.into(),
            test_case: test_case.into(),
            working_dir: working_dir.into(),
            platform: Platform::current(),
            host: HostEnvironment::capture(),
            pipeline: PipelineOptions::default(),
            report_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HarnessOutcome {
    pub report: RunReport,
}

impl HarnessOutcome {
    pub fn passed(&self) -> bool {
        self.report.passed
    }

    pub fn exit_code(&self) -> i32 {
        if self.passed() {
            0
        } else {
            TEST_FAILURE_EXIT_CODE
        }
    }
}

/// Runs one test case end to end and prints the `TEST: <case>` verdict.
///
/// Configuration and input problems are returned as errors before any
/// process is spawned. Once the pipeline has run, every problem, including
/// an unreadable result or reference, ends in a verdict.
pub fn run_test_case(
    options: &HarnessOptions,
    progress: &mut dyn ProgressSink,
) -> HarnessResult<HarnessOutcome> {
    let install_root = canonical_or_given(&options.install_root);
    let environment = ProcessEnvironment::build(&install_root, options.platform, &options.host);
    let test_case = options.test_case.display().to_string();

    progress.line("Running Gadgetron test with: ");
    progress.line(&format!("  -- GADGETRON_HOME  : {}", environment.home()));
    progress.line(&format!("  -- PATH            : {}", environment.executable_path()));
    progress.line(&format!(
        "  -- {} : {}",
        environment.library_path_variable(),
        environment.library_path()
    ));
    progress.line(&format!("  -- TEST CASE       : {test_case}"));
    progress.line(&format!("Running test case: {test_case}"));

    let config = TestCaseConfig::load(&options.test_case, &install_root, &options.working_dir)?;
    config.validate_inputs()?;
    config.prepare_output_dir()?;

    let pipeline = run_pipeline(&config, &environment, &options.pipeline, progress)?;

    let comparison = if pipeline.passed() {
        progress.line("Comparing results");
        match compare(
            &config.result_file,
            &config.result_dataset,
            &config.reference_file,
            &config.reference_dataset,
            &config.checks,
        ) {
            Ok(outcome) => {
                for line in outcome.progress_lines() {
                    progress.line(&line);
                }
                Ok(Some(outcome))
            }
            Err(error) => {
                warn!(error = %error, "comparison could not load its datasets");
                progress.line(&format!("Failed to compare results! ({error})"));
                Err(error.to_string())
            }
        }
    } else {
        Ok(None)
    };

    let report = RunReport::new(
        &options.test_case,
        &environment,
        &config,
        pipeline,
        comparison,
    );
    info!(test_case = %test_case, passed = report.passed, "test case finished");

    if let Some(report_path) = &options.report_path {
        write_report_file(report_path, &report)?;
    }

    let verdict = if report.passed { "SUCCESS" } else { "FAILED" };
    progress.line(&format!("TEST: {test_case} {verdict}"));

    Ok(HarnessOutcome { report })
}

fn canonical_or_given(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
