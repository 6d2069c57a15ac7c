//! Incoming request type.
//!
//! strand does not parse HTTP. The transport hands over a fully-read
//! [`http::Request`] and the chain shares it by reference count, so a
//! decorator that swaps in a different request is observable afterwards.

use std::sync::Arc;

use bytes::Bytes;

/// An incoming request with its body already collected.
pub type Request = http::Request<Bytes>;

/// The request as the chain sees it: one allocation, shared by every handler.
pub type SharedRequest = Arc<Request>;

/// Wraps a request for use in a [`Context`](crate::Context).
pub fn share(request: Request) -> SharedRequest {
    Arc::new(request)
}
