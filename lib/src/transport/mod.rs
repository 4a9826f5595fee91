// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Transports carrying broker requests, abstract over in-process and
//! socket connections.
//!
//! Transports are callback-completed, a request is submitted with a
//! [Completion] that is called exactly once with the response (or a
//! transport failure). Caller identity is implied by the transport
//! instance, each instance is a distinct caller to the broker.

use otee_proto::{Request, Response};

use crate::Error;

#[cfg(feature = "transport_local")]
mod local;
#[cfg(feature = "transport_local")]
pub use local::LocalTransport;

#[cfg(feature = "transport_socket")]
mod socket;
#[cfg(feature = "transport_socket")]
pub use socket::SocketTransport;

/// Completion callback for a submitted request
pub type Completion = Box<dyn FnOnce(Result<Response, Error>) + Send>;

/// Broker transport
pub trait Transport: Send + Sync {
    /// Submit a request, calling `completion` with the result.
    ///
    /// Requests without a broker response (see [Request::expects_response])
    /// complete with success once sent.
    fn submit(&self, request: Request, completion: Completion);

    /// Close the transport, subsequent submissions fail
    fn close(&self);
}
