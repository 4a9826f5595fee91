// Copyright (c) 2022-2023 The MobileCoin Foundation

//! TEE Client API Library (and CLI)
//!
//! Client applications create a [Context] over a [Transport] to a broker,
//! register [SharedMemory] and open [Session]s with trusted applications,
//! then invoke commands using [Operation]s carrying [Value]s and
//! [MemoryReference]s.
//!
//! ```no_run
//! use otee::{Context, ConnectionMethod, Direction, Operation, Value, TaUuid};
//!
//! let ctx = Context::connect("/tmp/otee.sock")?;
//! ctx.initialize_context(None)?;
//!
//! let uuid: TaUuid = "79b77788-9789-4a7a-a2be-b60155eef5f4".parse()?;
//! let session = ctx.open_session(&uuid, ConnectionMethod::Public, 0, None)?;
//!
//! let op = Operation::new(vec![Value::new(1, 2, Direction::InOut).into()])?;
//! session.invoke_command(0x02, Some(&op))?;
//!
//! session.close_session();
//! ctx.finalize_context();
//! # Ok::<(), anyhow::Error>(())
//! ```

/// Re-export `otee-proto` for consumers
pub use otee_proto::{
    self as proto, ConnectionMethod, Direction, MemoryFlags, ReturnCode, ReturnOrigin, TaUuid,
};

mod bridge;

pub mod transport;
pub use transport::Transport;

mod context;
pub use context::{Context, ContextConfig, ContextState};

mod error;
pub use error::Error;

mod memory;
pub use memory::{SharedBuffer, SharedMemory};

mod operation;
pub use operation::{MemoryReference, Operation, Parameter, Value};

mod session;
pub use session::Session;
