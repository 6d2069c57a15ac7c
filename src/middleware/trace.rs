//! Request tracing middleware.

use std::time::Instant;

use tracing::{Level, info, span};

use crate::context::Context;
use crate::handler::Handler;

/// Wraps the rest of the chain in a `request` span. See [`trace`].
#[derive(Clone, Copy, Debug, Default)]
pub struct Trace;

/// Opens a `request` span carrying method and path, runs the rest of the
/// chain inside it, and emits one event on the way out with the final
/// status, latency and whether the chain was aborted.
pub fn trace() -> Trace {
    Trace
}

impl Handler for Trace {
    fn handle(&self, cx: &mut Context) {
        let span = span!(
            Level::INFO,
            "request",
            method = %cx.request().method(),
            path = cx.request().uri().path()
        );
        let _entered = span.enter();
        let start = Instant::now();

        cx.next();

        let status = cx.response().lock().status();
        info!(
            status = status.as_u16(),
            latency = ?start.elapsed(),
            aborted = cx.is_aborted(),
            "request completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::handler::handler_fn;
    use crate::pipeline::Pipeline;
    use crate::testing::serve;

    #[test]
    fn trace_is_transparent_to_the_chain() {
        let ran = Arc::new(AtomicBool::new(false));
        let seen = Arc::clone(&ran);
        let pipeline = Pipeline::new().with(trace()).with(handler_fn(move |_cx| {
            seen.store(true, Ordering::SeqCst);
        }));

        let cx = serve(&pipeline);
        assert!(ran.load(Ordering::SeqCst));
        assert!(!cx.is_aborted());
    }

    #[test]
    fn completion_event_records_under_a_subscriber() {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(Level::TRACE)
            .with_test_writer()
            .finish();
        let pipeline = Pipeline::new().with(trace()).with(handler_fn(|cx| cx.abort()));

        let cx = tracing::subscriber::with_default(subscriber, || serve(&pipeline));
        assert!(cx.is_aborted());
    }
}
