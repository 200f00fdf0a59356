mod cli;

use clap::{Parser, Subcommand};
use tracing::Level;

#[derive(Parser)]
#[command(
    name = "gpulower",
    version,
    about = "Lower GPU dialect IR to explicit GPU runtime calls"
)]
struct Cli {
    /// Log every rule application to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Lower an IR file and print or write the result
    Lower(cli::lower::LowerArgs),
    /// Print the runtime-call sequence of each lowered function
    Calls(cli::calls::CallsArgs),
    /// Parse an IR file and list the operations that need lowering
    Check(cli::check::CheckArgs),
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match cli.command {
        Command::Lower(args) => cli::lower::cmd_lower(args),
        Command::Calls(args) => cli::calls::cmd_calls(args),
        Command::Check(args) => cli::check::cmd_check(args),
    }
}
