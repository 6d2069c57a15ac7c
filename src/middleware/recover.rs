//! Panic recovery for the rest of the chain.

use std::panic::{AssertUnwindSafe, catch_unwind};

use http::StatusCode;
use tracing::error;

use crate::context::Context;
use crate::handler::Handler;

/// Recovers from panics downstream. See [`catch_panic`].
#[derive(Clone, Copy, Debug, Default)]
pub struct CatchPanic;

/// Runs the rest of the chain and, if any handler in it panics, logs the
/// panic, sets `500 Internal Server Error` and aborts the chain.
///
/// The driver itself never recovers faults; put this wherever a chain should
/// fail soft instead of unwinding into the transport.
pub fn catch_panic() -> CatchPanic {
    CatchPanic
}

impl Handler for CatchPanic {
    fn handle(&self, cx: &mut Context) {
        let Err(payload) = catch_unwind(AssertUnwindSafe(|| cx.next())) else {
            return;
        };

        let message = payload
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("non-string panic payload");
        error!(panic = message, "handler panicked");

        cx.set_status(StatusCode::INTERNAL_SERVER_ERROR);
        cx.abort();
    }
}
