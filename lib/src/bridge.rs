// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Blocking calls over callback-completed [Transport]s
//!
//! Each call spawns a worker thread to submit the request and parks the
//! calling thread on a fresh oneshot channel until the completion fires.
//! These functions block and must not be called from an async context.

use std::{sync::Arc, thread};

use log::{debug, warn};
use tokio::sync::oneshot;

use otee_proto::{Request, Response};

use crate::{transport::Transport, Error};

/// Submit a request on a worker and block until it completes
pub(crate) fn call(transport: &Arc<dyn Transport>, request: Request) -> Result<Response, Error> {
    let (tx, rx) = oneshot::channel();

    let command = request.command();
    let t = transport.clone();

    thread::Builder::new()
        .name("otee-call".to_string())
        .spawn(move || {
            t.submit(
                request,
                Box::new(move |r| {
                    let _ = tx.send(r);
                }),
            )
        })?;

    match rx.blocking_recv() {
        Ok(r) => r,
        Err(_) => {
            warn!("Completion for {command} dropped");
            Err(Error::Transport("completion dropped".to_string()))
        }
    }
}

/// Submit a request on a worker without waiting for completion
pub(crate) fn notify(transport: &Arc<dyn Transport>, request: Request) -> Result<(), Error> {
    let command = request.command();
    let t = transport.clone();

    thread::Builder::new()
        .name("otee-notify".to_string())
        .spawn(move || {
            t.submit(
                request,
                Box::new(move |r| match r {
                    Ok(_) => debug!("Sent {command}"),
                    Err(e) => warn!("Failed to send {command}: {e}"),
                }),
            )
        })?;

    Ok(())
}
