// Copyright (c) 2022-2023 The MobileCoin Foundation

use std::{
    collections::HashMap,
    io::{Error as IoError, ErrorKind},
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use log::{debug, error, warn};
use tokio::{
    io::AsyncWriteExt,
    net::{
        unix::{OwnedReadHalf, OwnedWriteHalf},
        UnixStream,
    },
    runtime::Runtime,
    task::JoinHandle,
};

use otee_proto::{
    frame::{read_frame, write_frame},
    Command, Request, Response,
};

use super::{Completion, Transport};
use crate::Error;

type Pending = Arc<Mutex<HashMap<u32, Completion>>>;

/// Unix-domain socket transport to an `otee-sim` (or compatible) broker.
///
/// Owns a small tokio runtime driving the connection, responses are
/// matched to requests by frame tag and delivered from a background
/// reader task.
pub struct SocketTransport {
    rt: Runtime,
    writer: Arc<tokio::sync::Mutex<Option<OwnedWriteHalf>>>,
    pending: Pending,
    closed: Arc<AtomicBool>,
    next_tag: AtomicU32,
    reader: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl SocketTransport {
    /// Connect to a broker at the provided socket path.
    ///
    /// This blocks the calling thread and must not be called from
    /// within an async context.
    pub fn connect(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();

        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("otee-transport")
            .enable_all()
            .build()?;

        debug!("Connecting to broker: {}", path.display());

        let stream = rt.block_on(UnixStream::connect(path))?;
        let (r, w) = stream.into_split();

        let pending = Pending::default();
        let closed = Arc::new(AtomicBool::new(false));

        let reader = rt.spawn(read_responses(r, pending.clone(), closed.clone()));

        Ok(Self {
            rt,
            writer: Arc::new(tokio::sync::Mutex::new(Some(w))),
            pending,
            closed,
            next_tag: AtomicU32::new(1),
            reader: Mutex::new(Some(reader)),
        })
    }

    fn fail_pending(&self) {
        let pending: Vec<_> = lock(&self.pending).drain().collect();
        for (_tag, c) in pending {
            c(Err(Error::Transport("transport closed".to_string())));
        }
    }
}

impl Transport for SocketTransport {
    fn submit(&self, request: Request, completion: Completion) {
        let body = match request.encode() {
            Ok(b) => b,
            Err(e) => return completion(Err(e.into())),
        };

        let tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
        let command = request.command();

        // Register for responses prior to sending, re-checking for a closed
        // connection once registered so late submissions can not be stranded
        let completion = match request.expects_response() {
            true => {
                lock(&self.pending).insert(tag, completion);

                if self.closed.load(Ordering::SeqCst) {
                    let c = lock(&self.pending).remove(&tag);
                    if let Some(c) = c {
                        c(Err(Error::Transport("transport closed".to_string())));
                    }
                    return;
                }

                None
            }
            false => Some(completion),
        };

        debug!("Sending {command} (tag: {tag})");

        let writer = self.writer.clone();
        let r = self.rt.block_on(async move {
            match writer.lock().await.as_mut() {
                Some(w) => write_frame(w, tag, command, &body).await,
                None => Err(IoError::new(ErrorKind::NotConnected, "transport closed")),
            }
        });

        match (r, completion) {
            (Ok(()), Some(c)) => c(Ok(Response::success())),
            (Ok(()), None) => (),
            (Err(e), c) => {
                error!("Failed to send {command}: {e}");

                if let Some(c) = c.or_else(|| lock(&self.pending).remove(&tag)) {
                    c(Err(e.into()));
                }
            }
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!("Closing socket transport");

        let writer = self.writer.clone();
        self.rt.block_on(async move {
            if let Some(mut w) = writer.lock().await.take() {
                let _ = w.shutdown().await;
            }
        });

        if let Some(h) = lock(&self.reader).take() {
            h.abort();
        }

        self.fail_pending();
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Deliver responses to pending completions until the connection closes
async fn read_responses(mut r: OwnedReadHalf, pending: Pending, closed: Arc<AtomicBool>) {
    loop {
        let f = match read_frame(&mut r).await {
            Ok(Some(f)) => f,
            Ok(None) => {
                debug!("Broker closed connection");
                break;
            }
            Err(e) => {
                error!("Failed to read frame: {e}");
                break;
            }
        };

        if !matches!(f.header.command(), Ok(Command::Response)) {
            warn!("Unexpected frame (tag: {})", f.header.tag);
            continue;
        }

        let c = match lock(&pending).remove(&f.header.tag) {
            Some(c) => c,
            None => {
                warn!("Response for unknown tag: {}", f.header.tag);
                continue;
            }
        };

        c(Response::decode(&f.body).map_err(|e| Error::Transport(e.to_string())));
    }

    closed.store(true, Ordering::SeqCst);

    let outstanding: Vec<_> = lock(&pending).drain().collect();
    for (_tag, c) in outstanding {
        c(Err(Error::Transport("connection closed".to_string())));
    }
}
