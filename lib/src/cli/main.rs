// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Command line utility for interacting with trusted applications via a broker

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::{debug, error, info, LevelFilter};

use otee::{
    ConnectionMethod, Context, Direction, MemoryFlags, MemoryReference, Operation, Parameter,
    SharedBuffer, TaUuid, Value,
};

mod helpers;
use helpers::*;

/// TEE client command line utility
#[derive(Clone, PartialEq, Debug, Parser)]
struct Options {
    /// Broker socket path
    #[clap(long, env = "OTEE_SOCKET", default_value = "/tmp/otee.sock")]
    socket: PathBuf,

    /// Engine name (broker default if unset)
    #[clap(long)]
    tee_name: Option<String>,

    /// Subcommand to execute
    #[clap(subcommand)]
    cmd: Actions,

    /// Enable verbose logging
    #[clap(long, default_value = "info")]
    log_level: LevelFilter,
}

#[derive(Clone, PartialEq, Debug, Subcommand)]
#[non_exhaustive]
enum Actions {
    /// Initialise and finalise a context
    Ping,

    /// Open (and close) a session with a trusted application
    Open {
        /// Trusted application UUID
        #[clap(long)]
        uuid: TaUuid,

        /// Connection (login) method
        #[clap(long, default_value = "public", value_parser = parse_method)]
        method: ConnectionMethod,
    },

    /// Invoke a command on a trusted application
    ///
    /// Parameters are passed in order: values, then the input
    /// memory reference, then the output memory reference.
    Invoke {
        /// Trusted application UUID
        #[clap(long)]
        uuid: TaUuid,

        /// Connection (login) method
        #[clap(long, default_value = "public", value_parser = parse_method)]
        method: ConnectionMethod,

        /// Command identifier
        #[clap(long)]
        command: u32,

        /// In/out value parameters (`a:b`)
        #[clap(long = "value")]
        values: Vec<ValuePair>,

        /// Hex-encoded input memory
        #[clap(long)]
        input: Option<HexData>,

        /// Output memory length in bytes
        #[clap(long)]
        output: Option<usize>,
    },
}

fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = Options::parse();

    // Setup logging
    let mut c = simplelog::ConfigBuilder::new();
    c.add_filter_allow_str("otee");

    let _ = simplelog::SimpleLogger::init(args.log_level, c.build());

    // Connect to broker
    let ctx = match Context::connect(&args.socket) {
        Ok(v) => v,
        Err(e) => {
            error!("Failed to connect to broker: {}", args.socket.display());
            return Err(e.into());
        }
    };

    ctx.initialize_context(args.tee_name.as_deref())?;

    // Execute command
    let r = execute(&ctx, args.cmd);

    ctx.finalize_context();

    r
}

/// Execute a command with the provided context
fn execute(ctx: &Context, cmd: Actions) -> anyhow::Result<()> {
    debug!("Executing command: {:?}", cmd);

    match cmd {
        Actions::Ping => {
            info!("Context initialised");
        }
        Actions::Open { uuid, method } => {
            let s = ctx.open_session(&uuid, method, 0, None)?;

            info!("Opened session {} with {}", s.id(), uuid);

            s.close_session();
        }
        Actions::Invoke {
            uuid,
            method,
            command,
            values,
            input,
            output,
        } => {
            let input = input
                .map(|d| ctx.register_shared_memory(d.0, MemoryFlags::INPUT))
                .transpose()?;
            let output = output
                .map(|n| ctx.register_shared_memory(SharedBuffer::zeroed(n), MemoryFlags::OUTPUT))
                .transpose()?;

            let mut params: Vec<Parameter> = values
                .iter()
                .map(|v| Value::new(v.0, v.1, Direction::InOut).into())
                .collect();
            if let Some(m) = &input {
                params.push(MemoryReference::new(m, 0, Direction::Input)?.into());
            }
            if let Some(m) = &output {
                params.push(MemoryReference::new(m, 0, Direction::Output)?.into());
            }

            let op = Operation::new(params)?;

            let s = ctx.open_session(&uuid, method, 0, None)?;
            let r = s.invoke_command(command, Some(&op));
            s.close_session();
            r?;

            for i in 0..values.len() {
                if let Some(v) = op.value(i) {
                    info!("value {i}: a: {}, b: {}", v.a, v.b);
                }
            }

            if let Some(m) = &output {
                let n = m.return_size();
                info!(
                    "output ({n} bytes): {}",
                    m.buffer().read(|b| hex::encode(&b[..n]))
                );
            }

            for m in input.iter().chain(output.iter()) {
                ctx.release_shared_memory(m);
            }
        }
    }

    Ok(())
}
