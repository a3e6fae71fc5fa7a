//! Lander CLI: the `lander` command.

mod cli;
mod commands;
mod support;

use clap::Parser;
use cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();
    support::init_logging(cli.verbose);
    let root = cli.root;

    match cli.command {
        Commands::Init { json } => commands::init::run(root, json),
        Commands::Op { command } => commands::op::run(root, command),
        Commands::Queue { command } => commands::queue::run(root, command),
        Commands::Daemon { command } => commands::daemon::run(root, command),
        Commands::Issue { command } => commands::issue::run(root, command),
    }
}
