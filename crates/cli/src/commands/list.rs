// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Args;
use wings_core::ProcState;
use wings_runtime::{ContainerRuntime, DockerRuntime};

use crate::exit_error::ExitError;
use crate::output::{print_server_table, state_label, OutputFormat, ServerRow};

#[derive(Debug, Args)]
pub struct ListArgs {
    #[arg(long, value_enum, default_value_t)]
    format: OutputFormat,
}

/// Lists every server in the registry, querying the runtime directly for
/// its current running state (this CLI has no persistent connection to a
/// running daemon to ask instead — see DESIGN.md).
pub async fn run(args: ListArgs) -> Result<(), ExitError> {
    let (_config, registry) = super::load_registry()?;
    let runtime = DockerRuntime::connect_local().map_err(|e| ExitError::new(1, format!("failed to connect to the container runtime: {e}")))?;

    let mut rows = Vec::new();
    for (id, record) in registry.list() {
        let state = match runtime.inspect(id.as_str()).await {
            Ok(inspect) if inspect.running => state_label(ProcState::Running),
            Ok(_) => state_label(ProcState::Offline),
            Err(_) => "unknown",
        };
        rows.push(ServerRow { id: id.as_str().to_string(), image: record.config.image, state: state.to_string() });
    }

    print_server_table(&rows, args.format);
    Ok(())
}
