//! livecell CLI entry point

use std::process::ExitCode;

use clap::Parser;

use livecell::commands::{init_tracing, run_eval, run_serve};
use livecell::{Cli, Commands};

fn main() -> ExitCode {
    match run() {
        Ok(output) => {
            print!("{}", output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

fn run() -> livecell::Result<String> {
    let cli = Cli::parse();
    init_tracing(cli.log.as_deref())?;

    match &cli.command {
        Commands::Serve(args) => run_serve(args),
        Commands::Eval(args) => run_eval(args),
    }
}
