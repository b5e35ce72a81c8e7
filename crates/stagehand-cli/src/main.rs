//! Stagehand CLI binary entrypoint.

use std::io;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use stagehand_cli::cli::{Cli, Commands};
use stagehand_cli::commands::{FixtureCommand, SuiteCommand};
use stagehand_cli::output::OutputFormat;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let status = match runtime.block_on(run(cli)) {
        Ok(status) => status,
        Err(e) => {
            eprintln!("Error: {e}");
            e.exit_code()
        }
    };
    exit_code(status)
}

/// Map a child exit status onto the process exit code.
fn exit_code(status: i32) -> ExitCode {
    u8::try_from(status).map_or(ExitCode::FAILURE, ExitCode::from)
}

async fn run(cli: Cli) -> Result<i32, stagehand_cli::CliError> {
    let format = OutputFormat::new(cli.format);
    let mut stdout = io::stdout();

    match cli.command {
        Commands::Suite(args) => {
            let cmd = SuiteCommand::new(&args.manifest, args.looping);
            cmd.execute(&mut stdout, &format).await
        }
        Commands::Fixture(args) => {
            let cmd = FixtureCommand::new(&args.plan);
            cmd.execute(&mut stdout, &format).await
        }
    }
}
