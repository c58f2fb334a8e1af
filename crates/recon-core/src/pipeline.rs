use crate::config::TestCaseConfig;
use crate::domain::{DEFAULT_SERVER_PORT, HarnessError, HarnessResult, Stage};
use crate::environment::ProcessEnvironment;
use crate::process::{
    LogFile, ReadinessOutcome, ServerGuard, ServerLaunch, ServerReadiness, ServerTermination,
    StageCommand, StageResult, await_server, run_stage,
};
use crate::progress::ProgressSink;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub port: u16,
    pub readiness: ServerReadiness,
    pub stage_timeout: Option<Duration>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_SERVER_PORT,
            readiness: ServerReadiness::default(),
            stage_timeout: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerReport {
    pub command_line: String,
    pub log_path: PathBuf,
    pub launch: ServerLaunch,
    pub readiness: Option<ReadinessOutcome>,
    pub termination: ServerTermination,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    pub server: ServerReport,
    pub stages: Vec<StageResult>,
    pub passed: bool,
}

impl PipelineReport {
    pub fn passed(&self) -> bool {
        self.passed
    }

    pub fn failed_stages(&self) -> impl Iterator<Item = &StageResult> {
        self.stages.iter().filter(|stage| !stage.succeeded())
    }
}

pub fn server_command(port: u16) -> StageCommand {
    StageCommand::new(Stage::Server)
        .arg("-p")
        .arg(port.to_string())
}

/// Client stages in execution order, wired to the test case's files.
pub fn client_commands(config: &TestCaseConfig, port: u16) -> [StageCommand; 3] {
    [
        StageCommand::new(Stage::FormatConversion)
            .arg(&config.raw_input)
            .arg(&config.intermediate_file),
        StageCommand::new(Stage::ProtocolConversion)
            .arg("-f")
            .arg(&config.intermediate_file)
            .arg("-m")
            .arg(&config.parameter_schema)
            .arg("-x")
            .arg(&config.parameter_stylesheet)
            .arg("-o")
            .arg(&config.exchange_file)
            .arg("-w"),
        StageCommand::new(Stage::Reconstruction)
            .arg("-p")
            .arg(port.to_string())
            .arg("-d")
            .arg(&config.exchange_file)
            .arg("-c")
            .arg(&config.reconstruction_configuration)
            .arg("-G")
            .arg(&config.reconstruction_configuration)
            .arg("-o")
            .arg(&config.result_file),
    ]
}

/// Starts the server, runs every client stage in order and tears the server
/// down again. A failed stage does not stop the stages after it.
///
/// Only log-file creation errors are returned as `Err`; everything a
/// subprocess does is captured in the report.
pub fn run_pipeline(
    config: &TestCaseConfig,
    environment: &ProcessEnvironment,
    options: &PipelineOptions,
    progress: &mut dyn ProgressSink,
) -> HarnessResult<PipelineReport> {
    let server_log = open_log(&config.server_log)?;
    let server_command = server_command(options.port);
    let (server, launch) = ServerGuard::spawn(&server_command, environment, &server_log);

    let readiness = match &launch {
        ServerLaunch::Running { pid } => {
            info!(pid, port = options.port, "server started");
            let outcome = await_server(options.readiness, options.port);
            if let ReadinessOutcome::NotAccepting { after_ms } = outcome {
                warn!(after_ms, port = options.port, "server is not accepting connections");
                progress.line(&format!(
                    "Server is not accepting connections on port {} after {} ms",
                    options.port, after_ms
                ));
            }
            Some(outcome)
        }
        ServerLaunch::SpawnFailed { reason } => {
            progress.line(&format!(
                "Failed to start {}! ({})",
                Stage::Server.program(),
                reason
            ));
            None
        }
    };

    // The guard terminates the server if opening the client log fails.
    let client_log = open_log(&config.client_log)?;
    let mut stages = Vec::with_capacity(Stage::CLIENT_STAGES.len());
    for command in client_commands(config, options.port) {
        progress.line(command.stage().progress_message());
        let result = run_stage(&command, environment, &client_log, options.stage_timeout);
        if !result.succeeded() {
            progress.line(&format!("Failed to run {}!", command.program()));
        }
        stages.push(result);
    }

    let termination = server.terminate();
    let passed = stages.iter().all(StageResult::succeeded);
    info!(passed, "pipeline finished");

    Ok(PipelineReport {
        server: ServerReport {
            command_line: server_command.command_line(),
            log_path: config.server_log.clone(),
            launch,
            readiness,
            termination,
        },
        stages,
        passed,
    })
}

fn open_log(path: &Path) -> HarnessResult<LogFile> {
    LogFile::create(path).map_err(|source| {
        HarnessError::io_system(
            "IO.LOG_FILE",
            format!("failed to create log file '{}': {}", path.display(), source),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::{client_commands, server_command};
    use crate::compare::ComparisonChecks;
    use crate::config::TestCaseConfig;
    use crate::domain::Stage;
    use std::path::PathBuf;

    fn config() -> TestCaseConfig {
        TestCaseConfig {
            descriptor_path: PathBuf::from("/work/case.cfg"),
            working_dir: PathBuf::from("/work"),
            output_dir: PathBuf::from("/work/out"),
            raw_input: PathBuf::from("/work/meas.dat"),
            intermediate_file: PathBuf::from("/work/out/meas.h5"),
            exchange_file: PathBuf::from("/work/out/ismrmrd.h5"),
            result_file: PathBuf::from("/work/out/result.h5"),
            reference_file: PathBuf::from("/work/reference.h5"),
            parameter_schema: PathBuf::from("/opt/g/schema/map.xml"),
            parameter_stylesheet: PathBuf::from("/opt/g/schema/map.xsl"),
            server_log: PathBuf::from("/work/out/gadgetron.log"),
            client_log: PathBuf::from("/work/out/client.log"),
            reconstruction_configuration: "default.xml".to_string(),
            result_dataset: "image/data".to_string(),
            reference_dataset: "image/data".to_string(),
            checks: ComparisonChecks::default(),
        }
    }

    #[test]
    fn server_listens_on_requested_port() {
        assert_eq!(server_command(9003).command_line(), "gadgetron -p 9003");
        assert_eq!(server_command(9100).command_line(), "gadgetron -p 9100");
    }

    #[test]
    fn client_commands_wire_outputs_into_next_stage() {
        let [conversion, protocol, recon] = client_commands(&config(), 9003);

        assert_eq!(conversion.stage(), Stage::FormatConversion);
        assert_eq!(
            conversion.command_line(),
            "siemens_to_HDF5 /work/meas.dat /work/out/meas.h5"
        );
        assert_eq!(
            protocol.command_line(),
            "siemens_mriclient -f /work/out/meas.h5 -m /opt/g/schema/map.xml \
             -x /opt/g/schema/map.xsl -o /work/out/ismrmrd.h5 -w"
        );
        assert_eq!(
            recon.command_line(),
            "mriclient -p 9003 -d /work/out/ismrmrd.h5 -c default.xml -G default.xml \
             -o /work/out/result.h5"
        );
    }
}
