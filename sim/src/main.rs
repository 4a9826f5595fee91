// Copyright (c) 2022-2023 The MobileCoin Foundation

use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use log::{debug, info, LevelFilter};

use otee_core::{service, Guard};
use otee_sim::*;

/// Simulated TEE broker daemon
///
/// Runs a broker over a simulated engine with the sample
/// applications, serving clients on a unix socket.
#[derive(Clone, Debug, PartialEq, Parser)]
pub struct Args {
    /// Socket path to serve on
    #[clap(long, env = "OTEE_SOCKET", default_value = "/tmp/otee.sock")]
    socket: PathBuf,

    #[clap(flatten)]
    sim_opts: SimOptions,

    /// Log level
    #[clap(long, default_value = "info")]
    log_level: LevelFilter,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Setup logging
    let mut c = simplelog::ConfigBuilder::new();
    c.add_filter_allow_str("otee");

    let _ = simplelog::SimpleLogger::init(args.log_level, c.build());

    info!("Launching simulator ({})", args.sim_opts.tee_name);

    let engine = default_engine(&args.sim_opts.tee_name);
    let guard = Arc::new(Guard::with_config(engine, args.sim_opts.guard_config()));

    // Await service exit or exit signal
    tokio::select!(
        r = service::serve(guard.clone(), &args.socket) => {
            r?;
            debug!("Complete!");
        }
        // Exit on ctrl + c
        _ = tokio::signal::ctrl_c() => {
            debug!("Exit!");
        },
    );

    let _ = std::fs::remove_file(&args.socket);

    Ok(())
}
