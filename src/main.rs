//! annoreport main executable

pub mod common;
pub mod err;
pub mod report;

use std::process::{ExitCode, Termination};

use clap::{Args, Parser, Subcommand};
use console::{Emoji, Term};

/// CLI parser based on clap.
#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Annotation result reports",
    long_about = "This tool writes reports from annotation result databases"
)]
struct Cli {
    /// Commonly used arguments
    #[command(flatten)]
    common: common::Args,

    /// The sub command to run
    #[command(subcommand)]
    command: Commands,
}

/// Enum supporting the parsing of top-level commands.
#[derive(Debug, Subcommand)]
enum Commands {
    /// Report-related commands.
    Report(Report),
}

/// Parsing of "report *" sub commands.
#[derive(Debug, Args)]
#[command(args_conflicts_with_subcommands = true)]
struct Report {
    /// The sub command to run
    #[command(subcommand)]
    command: ReportCommands,
}

/// Enum supporting the parsing of "report *" sub commands.
#[allow(clippy::large_enum_variant)]
#[derive(Debug, Subcommand)]
enum ReportCommands {
    Run(report::Args),
    Columns(report::columns::Args),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Build a tracing subscriber according to the configuration in `cli.common`.
    let collector = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(match cli.common.verbose.log_level() {
            Some(level) => match level {
                log::Level::Error => tracing::Level::ERROR,
                log::Level::Warn => tracing::Level::WARN,
                log::Level::Info => tracing::Level::INFO,
                log::Level::Debug => tracing::Level::DEBUG,
                log::Level::Trace => tracing::Level::TRACE,
            },
            None => tracing::Level::INFO,
        })
        .compact()
        .finish();

    // Install collector and go into sub commands.
    let term = Term::stderr();
    let result = tracing::subscriber::with_default(collector, || {
        match &cli.command {
            Commands::Report(report) => match &report.command {
                ReportCommands::Run(args) => report::run(&cli.common, args)?,
                ReportCommands::Columns(args) => report::columns::run(&cli.common, args)?,
            },
        }

        Ok::<(), anyhow::Error>(())
    });

    match result {
        Ok(()) => {
            // Nothing to do about a failing stderr at this point.
            let _ = term.write_line(&format!("All done. Have a nice day!{}", Emoji(" 😃", "")));
            ExitCode::SUCCESS
        }
        Err(e) => {
            let _ = term.write_line(&format!("Error: {:?}", e));
            match e.downcast::<err::ReportError>() {
                Ok(report_error) => report_error.report(),
                Err(_) => ExitCode::FAILURE,
            }
        }
    }
}
