// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `wings-cli`: operator-facing commands for inspecting and controlling
//! servers this node manages. Talks directly to the same registry and
//! container runtime the daemon uses rather than through an IPC channel
//! (see DESIGN.md).

mod color;
mod commands;
mod exit_error;
mod output;

use clap::{CommandFactory, FromArgMatches, Parser, Subcommand};
use exit_error::ExitError;

#[derive(Debug, Parser)]
#[command(name = "wings-cli", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List every server configured on this node.
    List(commands::list::ListArgs),
    /// Show a single server's runtime status.
    Status(commands::status::StatusArgs),
    /// Issue a power action (start, stop, restart, kill) to a server.
    Power(commands::power::PowerArgs),
    /// Print the last N lines of a server's console output.
    Logs(commands::logs::LogsArgs),
}

#[tokio::main]
async fn main() {
    let matches = Cli::command().styles(color::styles()).get_matches();
    let cli = match Cli::from_arg_matches(&matches) {
        Ok(cli) => cli,
        Err(err) => err.exit(),
    };
    let result = match cli.command {
        Command::List(args) => commands::list::run(args).await,
        Command::Status(args) => commands::status::run(args).await,
        Command::Power(args) => commands::power::run(args).await,
        Command::Logs(args) => commands::logs::run(args).await,
    };

    if let Err(err) = result {
        exit_with(err);
    }
}

fn exit_with(err: ExitError) -> ! {
    eprintln!("error: {err}");
    std::process::exit(err.code);
}
