use crate::domain::Stage;
use crate::environment::ProcessEnvironment;
use serde::Serialize;
use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Surrogate exit code for a stage whose program could not be started.
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 127;
/// Surrogate exit code for a stage killed after exceeding its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;
/// Surrogate exit code when no numeric status is available.
pub const UNKNOWN_EXIT_CODE: i32 = -1;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How long the server gets to exit after SIGTERM before it is killed.
pub const SERVER_STOP_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCommand {
    stage: Stage,
    args: Vec<OsString>,
}

impl StageCommand {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub const fn stage(&self) -> Stage {
        self.stage
    }

    pub fn program(&self) -> &'static str {
        self.stage.program()
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program().to_string())
            .chain(self.args.iter().map(|arg| arg.to_string_lossy().into_owned()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn to_command(
        &self,
        environment: &ProcessEnvironment,
        log: &LogFile,
    ) -> std::io::Result<Command> {
        let (stdout, stderr) = log.stdio_pair()?;
        let mut command = Command::new(environment.resolve_program(self.program()));
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);
        environment.apply_to(&mut command);
        Ok(command)
    }
}

/// A log file opened once and shared by every process writing to it.
#[derive(Debug)]
pub struct LogFile {
    path: PathBuf,
    file: File,
}

impl LogFile {
    pub fn create(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let file = File::create(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn stdio_pair(&self) -> std::io::Result<(Stdio, Stdio)> {
        let stdout = self.file.try_clone()?;
        let stderr = self.file.try_clone()?;
        Ok((Stdio::from(stdout), Stdio::from(stderr)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageStatus {
    Exited { code: i32 },
    Signalled { signal: Option<i32> },
    SpawnFailed { reason: String },
    TimedOut { after_ms: u64 },
    WaitFailed { reason: String },
}

impl StageStatus {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Exited { code } => *code,
            Self::Signalled { signal: Some(signal) } => -signal,
            Self::Signalled { signal: None } | Self::WaitFailed { .. } => UNKNOWN_EXIT_CODE,
            Self::SpawnFailed { .. } => SPAWN_FAILURE_EXIT_CODE,
            Self::TimedOut { .. } => TIMEOUT_EXIT_CODE,
        }
    }

    fn from_exit_status(status: ExitStatus) -> Self {
        match status.code() {
            Some(code) => Self::Exited { code },
            None => Self::Signalled {
                signal: termination_signal(status),
            },
        }
    }
}

#[cfg(unix)]
fn termination_signal(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn termination_signal(_status: ExitStatus) -> Option<i32> {
    None
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageResult {
    pub stage: Stage,
    pub command_line: String,
    pub status: StageStatus,
    pub exit_code: i32,
    pub log_path: PathBuf,
    pub elapsed_ms: u64,
}

impl StageResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs one blocking stage with stdout and stderr appended to `log`.
///
/// Never fails: spawn and wait problems become a status with a surrogate
/// exit code.
pub fn run_stage(
    command: &StageCommand,
    environment: &ProcessEnvironment,
    log: &LogFile,
    timeout: Option<Duration>,
) -> StageResult {
    let started_at = Instant::now();
    debug!(stage = %command.stage(), command = %command.command_line(), "starting stage");

    let status = match command
        .to_command(environment, log)
        .and_then(|mut process| process.spawn())
    {
        Ok(mut child) => match timeout {
            Some(limit) => wait_with_timeout(&mut child, limit),
            None => match child.wait() {
                Ok(status) => StageStatus::from_exit_status(status),
                Err(error) => StageStatus::WaitFailed {
                    reason: error.to_string(),
                },
            },
        },
        Err(error) => StageStatus::SpawnFailed {
            reason: error.to_string(),
        },
    };

    let result = StageResult {
        stage: command.stage(),
        command_line: command.command_line(),
        exit_code: status.exit_code(),
        status,
        log_path: log.path().to_path_buf(),
        elapsed_ms: elapsed_ms(started_at),
    };
    debug!(
        stage = %result.stage,
        exit_code = result.exit_code,
        elapsed_ms = result.elapsed_ms,
        "stage finished"
    );
    result
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> StageStatus {
    let started_at = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return StageStatus::from_exit_status(status),
            Ok(None) => {
                if started_at.elapsed() >= timeout {
                    terminate_and_reap(child);
                    return StageStatus::TimedOut {
                        after_ms: elapsed_ms(started_at),
                    };
                }
                thread::sleep(WAIT_POLL_INTERVAL);
            }
            Err(error) => {
                terminate_and_reap(child);
                return StageStatus::WaitFailed {
                    reason: error.to_string(),
                };
            }
        }
    }
}

fn terminate_and_reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn elapsed_ms(started_at: Instant) -> u64 {
    u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerLaunch {
    Running { pid: u32 },
    SpawnFailed { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerTermination {
    NotStarted,
    /// Exited on request within the grace period.
    Terminated,
    /// Still running after the grace period and killed.
    Killed,
    AlreadyExited { exit_code: i32 },
}

/// Owns the background server; the process is stopped and reaped when the
/// guard is terminated or dropped, whichever comes first.
///
/// On Unix the server first receives SIGTERM and is killed only if it is
/// still running after [`SERVER_STOP_GRACE`].
#[derive(Debug)]
pub struct ServerGuard {
    child: Option<Child>,
}

impl ServerGuard {
    pub fn spawn(
        command: &StageCommand,
        environment: &ProcessEnvironment,
        log: &LogFile,
    ) -> (Self, ServerLaunch) {
        debug!(command = %command.command_line(), "starting server");
        match command
            .to_command(environment, log)
            .and_then(|mut process| process.spawn())
        {
            Ok(child) => {
                let pid = child.id();
                (Self { child: Some(child) }, ServerLaunch::Running { pid })
            }
            Err(error) => {
                warn!(error = %error, "server failed to start");
                (
                    Self { child: None },
                    ServerLaunch::SpawnFailed {
                        reason: error.to_string(),
                    },
                )
            }
        }
    }

    pub fn terminate(mut self) -> ServerTermination {
        self.terminate_inner()
    }

    fn terminate_inner(&mut self) -> ServerTermination {
        let Some(mut child) = self.child.take() else {
            return ServerTermination::NotStarted;
        };

        match child.try_wait() {
            Ok(Some(status)) => ServerTermination::AlreadyExited {
                exit_code: StageStatus::from_exit_status(status).exit_code(),
            },
            Ok(None) | Err(_) => {
                let termination = stop_server(&mut child, SERVER_STOP_GRACE);
                debug!(pid = child.id(), termination = ?termination, "server stopped");
                termination
            }
        }
    }
}

#[cfg(unix)]
fn stop_server(child: &mut Child, grace: Duration) -> ServerTermination {
    let requested = Command::new("kill")
        .arg("-TERM")
        .arg(child.id().to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|status| status.success());

    if requested {
        let started_at = Instant::now();
        while started_at.elapsed() < grace {
            match child.try_wait() {
                Ok(Some(_)) => return ServerTermination::Terminated,
                Ok(None) => thread::sleep(WAIT_POLL_INTERVAL),
                Err(_) => break,
            }
        }
        warn!(pid = child.id(), "server ignored SIGTERM; killing it");
    }

    terminate_and_reap(child);
    ServerTermination::Killed
}

#[cfg(not(unix))]
fn stop_server(child: &mut Child, _grace: Duration) -> ServerTermination {
    terminate_and_reap(child);
    ServerTermination::Terminated
}

impl Drop for ServerGuard {
    fn drop(&mut self) {
        let _ = self.terminate_inner();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerReadiness {
    /// Fixed wait after spawning; no probe.
    SettleDelay(Duration),
    /// Poll a TCP connection to the server port until it accepts or the
    /// deadline passes.
    Probe { timeout: Duration, interval: Duration },
}

impl Default for ServerReadiness {
    fn default() -> Self {
        Self::SettleDelay(Duration::from_secs(2))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReadinessOutcome {
    Settled { waited_ms: u64 },
    Accepting { after_ms: u64 },
    NotAccepting { after_ms: u64 },
}

pub fn await_server(readiness: ServerReadiness, port: u16) -> ReadinessOutcome {
    match readiness {
        ServerReadiness::SettleDelay(delay) => {
            thread::sleep(delay);
            ReadinessOutcome::Settled {
                waited_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            }
        }
        ServerReadiness::Probe { timeout, interval } => {
            let address = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
            let interval = interval.max(Duration::from_millis(1));
            let started_at = Instant::now();
            loop {
                if TcpStream::connect_timeout(&address, interval).is_ok() {
                    return ReadinessOutcome::Accepting {
                        after_ms: elapsed_ms(started_at),
                    };
                }
                if started_at.elapsed() >= timeout {
                    return ReadinessOutcome::NotAccepting {
                        after_ms: elapsed_ms(started_at),
                    };
                }
                thread::sleep(interval);
            }
        }
    }
}
