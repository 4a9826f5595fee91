// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Unix-domain socket service exposing a [Guard] to client processes
//!
//! Each accepted connection is a distinct caller. Frames are handled
//! concurrently (a blocked invocation does not prevent cancellation
//! requests on the same connection), responses are tagged to match
//! their requests. Callers are forcibly finalised on disconnect.

use std::{io::Error as IoError, path::Path, sync::Arc};

use log::{debug, error, info, warn};
use tokio::{
    net::{unix::OwnedWriteHalf, UnixListener, UnixStream},
    sync::Mutex,
};

use otee_proto::{
    frame::{read_frame, write_frame, Frame},
    CallerId, Command, Request, Response,
};

use crate::{Connector, Guard};

/// Bind to the provided socket path (removing any stale socket) and serve
/// the [Guard] until an accept error occurs
pub async fn serve<C: Connector + 'static>(
    guard: Arc<Guard<C>>,
    path: impl AsRef<Path>,
) -> Result<(), IoError> {
    let path = path.as_ref();

    if path.exists() {
        debug!("Removing stale socket: {}", path.display());
        std::fs::remove_file(path)?;
    }

    let listener = UnixListener::bind(path)?;
    info!("Listening on {}", path.display());

    serve_listener(guard, listener).await
}

/// Serve the [Guard] on an existing listener
pub async fn serve_listener<C: Connector + 'static>(
    guard: Arc<Guard<C>>,
    listener: UnixListener,
) -> Result<(), IoError> {
    loop {
        let (stream, _addr) = listener.accept().await?;

        let caller_id = guard.attach();
        debug!("Accepted connection for caller {caller_id}");

        tokio::spawn(handle_connection(guard.clone(), stream, caller_id));
    }
}

/// Handle frames for a single connection until disconnect
async fn handle_connection<C: Connector + 'static>(
    guard: Arc<Guard<C>>,
    stream: UnixStream,
    caller_id: CallerId,
) {
    let (mut r, w) = stream.into_split();
    let w = Arc::new(Mutex::new(w));

    loop {
        let frame = match read_frame(&mut r).await {
            Ok(Some(f)) => f,
            Ok(None) => {
                debug!("Caller {caller_id} closed connection");
                break;
            }
            Err(e) => {
                error!("Caller {caller_id} read failed: {e}");
                break;
            }
        };

        tokio::spawn(handle_frame(guard.clone(), w.clone(), caller_id, frame));
    }

    // Teardown blocks on the engine
    let g = guard.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || g.disconnect(caller_id)).await {
        error!("Caller {caller_id} teardown failed: {e}");
    }
}

/// Handle a single frame, writing the response (where expected)
async fn handle_frame<C: Connector + 'static>(
    guard: Arc<Guard<C>>,
    w: Arc<Mutex<OwnedWriteHalf>>,
    caller_id: CallerId,
    frame: Frame,
) {
    let tag = frame.header.tag;

    let resp = match Request::decode(&frame.body) {
        Ok(req) => {
            if frame.header.command != req.command() as u8 {
                warn!(
                    "Caller {caller_id} frame command {:#04x} does not match request {}",
                    frame.header.command,
                    req.command()
                );
            }

            let expects_response = req.expects_response();

            let r = tokio::task::spawn_blocking(move || guard.dispatch(caller_id, req)).await;

            match (r, expects_response) {
                (Ok(_), false) => return,
                (Ok(r), true) => r,
                (Err(e), _) => {
                    error!("Caller {caller_id} dispatch failed: {e}");
                    Response::code(otee_proto::ReturnCode::Generic)
                }
            }
        }
        Err(e) => {
            warn!("Caller {caller_id} sent malformed request: {e}");
            Response::code(e.code())
        }
    };

    let body = match resp.encode() {
        Ok(b) => b,
        Err(e) => {
            error!("Response encoding failed: {e}");
            return;
        }
    };

    let mut w = w.lock().await;
    if let Err(e) = write_frame(&mut *w, tag, Command::Response, &body).await {
        warn!("Caller {caller_id} response write failed: {e}");
    }
}
