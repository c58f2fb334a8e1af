mod commands;

use clap::Parser;
use recon_core::domain::HarnessError;

pub(crate) const PROGRAM_NAME: &str = "recon-e2e";

pub fn run_from_env() -> i32 {
    let args = std::env::args().skip(1).collect::<Vec<_>>();

    match run(args) {
        Ok(code) => code,
        Err(error) => {
            let harness_error = error.as_harness_error();
            eprintln!("{}", harness_error.diagnostic_line());
            harness_error.exit_code()
        }
    }
}

pub fn run<I, S>(args: I) -> Result<i32, CliError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let full_args = std::iter::once(PROGRAM_NAME.to_string())
        .chain(args.into_iter().map(Into::into))
        .collect::<Vec<_>>();
    parse_and_dispatch(full_args)
}

fn parse_and_dispatch(args: Vec<String>) -> Result<i32, CliError> {
    match Cli::try_parse_from(&args) {
        Ok(cli) => commands::run_test_command(cli.run),
        Err(err) => match err.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                print!("{}", err);
                Ok(0)
            }
            clap::error::ErrorKind::MissingRequiredArgument => {
                Err(CliError::Usage(format!("Missing arguments\n{}", usage_text())))
            }
            _ => Err(CliError::Usage(err.to_string())),
        },
    }
}

fn usage_text() -> String {
    format!("Usage: {PROGRAM_NAME} <gadgetron home> <test case config>")
}

#[derive(Parser)]
#[command(
    name = PROGRAM_NAME,
    about = "Run one end-to-end reconstruction test case",
    version
)]
struct Cli {
    #[command(flatten)]
    run: commands::RunArgs,
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    Harness(HarnessError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CliError {
    fn as_harness_error(&self) -> HarnessError {
        match self {
            Self::Usage(message) => HarnessError::usage("USAGE.CLI", message.clone()),
            Self::Harness(error) => error.clone(),
            Self::Internal(error) => HarnessError::internal("INTERNAL.CLI", format!("{error:#}")),
        }
    }
}
