// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::{Args, ValueEnum};
use wings_server::PowerAction;

use crate::exit_error::ExitError;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PowerActionArg {
    Start,
    Stop,
    Restart,
    Kill,
}

impl From<PowerActionArg> for PowerAction {
    fn from(arg: PowerActionArg) -> Self {
        match arg {
            PowerActionArg::Start => PowerAction::Start,
            PowerActionArg::Stop => PowerAction::Stop,
            PowerActionArg::Restart => PowerAction::Restart,
            PowerActionArg::Kill => PowerAction::Kill,
        }
    }
}

#[derive(Debug, Args)]
pub struct PowerArgs {
    id: String,
    action: PowerActionArg,
}

pub async fn run(args: PowerArgs) -> Result<(), ExitError> {
    let (_config, server) = super::load_server(&args.id)?;
    server.power_action(args.action.into()).await.map_err(|e| ExitError::new(1, format!("power action failed: {e}")))?;
    println!("{}", crate::color::header(&format!("ok: {} {:?}", args.id, args.action)));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_arg_variant_maps_to_the_matching_power_action() {
        assert!(matches!(PowerAction::from(PowerActionArg::Start), PowerAction::Start));
        assert!(matches!(PowerAction::from(PowerActionArg::Stop), PowerAction::Stop));
        assert!(matches!(PowerAction::from(PowerActionArg::Restart), PowerAction::Restart));
        assert!(matches!(PowerAction::from(PowerActionArg::Kill), PowerAction::Kill));
    }
}
