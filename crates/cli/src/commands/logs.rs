// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Args;

use crate::exit_error::ExitError;
use crate::output::print_log_line;

#[derive(Debug, Args)]
pub struct LogsArgs {
    id: String,
    #[arg(long, default_value_t = 100)]
    lines: usize,
}

pub async fn run(args: LogsArgs) -> Result<(), ExitError> {
    let (_config, server) = super::load_server(&args.id)?;
    let lines = server.environment().read_logs(args.lines).await.map_err(|e| ExitError::new(1, format!("failed to read logs: {e}")))?;
    for line in lines {
        print_log_line(&line);
    }
    Ok(())
}
