use super::CliError;
use anyhow::Context;
use recon_core::domain::DEFAULT_SERVER_PORT;
use recon_core::harness::{HarnessOptions, run_test_case};
use recon_core::pipeline::PipelineOptions;
use recon_core::process::ServerReadiness;
use recon_core::progress::StdoutProgress;
use recon_core::report::render_human_summary;
use std::path::PathBuf;
use std::time::Duration;

const PROBE_INTERVAL: Duration = Duration::from_millis(100);

#[derive(clap::Args)]
pub(super) struct RunArgs {
    /// Reconstruction install root (GADGETRON_HOME)
    #[arg(value_name = "gadgetron home")]
    install_root: PathBuf,

    /// Test case descriptor
    #[arg(value_name = "test case config")]
    test_case: PathBuf,

    /// Port the server listens on
    #[arg(long, default_value_t = DEFAULT_SERVER_PORT)]
    port: u16,

    /// Fixed wait after starting the server
    #[arg(long, default_value_t = 2000, conflicts_with = "wait_for_server")]
    settle_ms: u64,

    /// Poll the server port instead of waiting a fixed delay
    #[arg(long)]
    wait_for_server: bool,

    /// Deadline for the server port to accept connections
    #[arg(long, default_value_t = 10_000, requires = "wait_for_server")]
    server_timeout_ms: u64,

    /// Kill a client stage that runs longer than this
    #[arg(long, value_name = "secs")]
    stage_timeout_secs: Option<u64>,

    /// Write a JSON run report to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Directory test case paths are resolved against (default: current directory)
    #[arg(long)]
    working_dir: Option<PathBuf>,
}

impl RunArgs {
    fn pipeline_options(&self) -> PipelineOptions {
        let readiness = if self.wait_for_server {
            ServerReadiness::Probe {
                timeout: Duration::from_millis(self.server_timeout_ms),
                interval: PROBE_INTERVAL,
            }
        } else {
            ServerReadiness::SettleDelay(Duration::from_millis(self.settle_ms))
        };
        PipelineOptions {
            port: self.port,
            readiness,
            stage_timeout: self.stage_timeout_secs.map(Duration::from_secs),
        }
    }
}

pub(super) fn run_test_command(args: RunArgs) -> Result<i32, CliError> {
    let working_dir = match &args.working_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("failed to resolve the current directory")?,
    };

    let mut options = HarnessOptions::new(&args.install_root, &args.test_case, working_dir);
    options.pipeline = args.pipeline_options();
    options.report_path = args.report.clone();

    let outcome = run_test_case(&options, &mut StdoutProgress).map_err(CliError::Harness)?;
    if let Some(report_path) = &options.report_path {
        eprintln!("{}", render_human_summary(&outcome.report));
        eprintln!("JSON report: {}", report_path.display());
    }
    Ok(outcome.exit_code())
}
