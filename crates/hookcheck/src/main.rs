use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod case;
mod compare;
mod config;
mod driver;
mod fixup;
mod repo;
mod runner;
mod tool;
mod util;

#[derive(Parser, Debug)]
#[command(name = "hookcheck")]
#[command(about = "Regression harness for the Flatpak build validator.", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build, commit, fix up, validate, and compare every test case.
    #[command(
        after_help = "Exit status: 0 when every case passed, 1 on a report mismatch or an aborted run, 2 on usage, config, or report-writing errors."
    )]
    Run(driver::RunArgs),
    /// List discovered test cases and what the harness will do to each.
    List(case::ListArgs),
    /// Structurally compare two JSON reports.
    Compare(compare::CompareArgs),
}

fn main() -> ExitCode {
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(2)
        }
    }
}

fn try_main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let Some(command) = cli.command else {
        anyhow::bail!("missing subcommand (try --help)");
    };

    match command {
        Command::Run(args) => driver::cmd_run(args),
        Command::List(args) => case::cmd_list(args),
        Command::Compare(args) => compare::cmd_compare(args),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
