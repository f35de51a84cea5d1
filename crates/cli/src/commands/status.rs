// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Args;
use serde::Serialize;
use wings_core::ServerId;
use wings_runtime::{ContainerRuntime, DockerRuntime};

use crate::exit_error::ExitError;
use crate::output::OutputFormat;

#[derive(Debug, Args)]
pub struct StatusArgs {
    id: String,
    #[arg(long, value_enum, default_value_t)]
    format: OutputFormat,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    id: String,
    image: String,
    running: bool,
    exit_code: i64,
    oom_killed: bool,
}

pub async fn run(args: StatusArgs) -> Result<(), ExitError> {
    let (_config, registry) = super::load_registry()?;
    let server_id = ServerId::from_string(&args.id);
    let record = registry.get(&server_id).ok_or_else(|| ExitError::new(2, format!("no server configured with id {}", args.id)))?;

    let runtime = DockerRuntime::connect_local().map_err(|e| ExitError::new(1, format!("failed to connect to the container runtime: {e}")))?;
    let inspect = runtime.inspect(server_id.as_str()).await;

    let report = match inspect {
        Ok(inspect) => StatusReport { id: args.id.clone(), image: record.config.image, running: inspect.running, exit_code: inspect.exit_code, oom_killed: inspect.oom_killed },
        Err(_) => StatusReport { id: args.id.clone(), image: record.config.image, running: false, exit_code: 0, oom_killed: false },
    };

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default()),
        OutputFormat::Text => {
            println!("{} {}", crate::color::header("server"), crate::color::literal(&report.id));
            println!("  image:   {}", crate::color::context(&report.image));
            println!("  running: {}", report.running);
            if !report.running && report.exit_code != 0 {
                println!("  exit code: {}", report.exit_code);
            }
            if report.oom_killed {
                println!("  {}", crate::color::muted("OOM killed"));
            }
        }
    }
    Ok(())
}
