//! Handler trait and type erasure.
//!
//! # How handlers are stored
//!
//! A pipeline holds handlers of *different* concrete types in one ordered
//! list, so every handler is erased behind `Arc<dyn Handler>`. The resolved
//! chain a request runs against is an `Arc<[BoxedHandler]>`: one allocation,
//! shared by every context built from the same pipeline state, never mutated.
//!
//! ```text
//! fn auth(cx: &mut Context) { … }            ← user writes this
//!        ↓ pipeline.append_fn(auth)
//! HandlerFn(auth).into_boxed()               ← Arc<dyn Handler>
//!        ↓ pipeline.resolve()
//! Arc<[BoxedHandler]>                         ← snapshot captured by Context
//!        ↓ cx.next()
//! chain[cursor].handle(&mut cx)               ← one vtable dispatch
//! ```

use std::fmt;
use std::sync::Arc;

use crate::context::Context;

/// A unit of request processing over one shared [`Context`].
///
/// A handler does its work and returns. It does not need to call
/// [`Context::next`] for its successors to run: the driver advances
/// automatically. Call `next` only to run code *after* the rest of the chain
/// has finished, and call [`Context::abort`] to stop the chain.
///
/// ```rust
/// use http::HeaderValue;
/// use strand::{Context, Handler};
///
/// struct Stamp;
///
/// impl Handler for Stamp {
///     fn handle(&self, cx: &mut Context) {
///         cx.insert_header("x-stamp", HeaderValue::from_static("1"));
///     }
/// }
/// ```
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, cx: &mut Context);

    /// Erases the handler for storage in a chain.
    fn into_boxed(self) -> BoxedHandler
    where
        Self: Sized,
    {
        Arc::new(self)
    }
}

/// A type-erased handler shared across concurrent requests.
pub type BoxedHandler = Arc<dyn Handler>;

/// A flattened, immutable handler sequence.
///
/// Contexts capture one of these at creation; mutating the pipeline it came
/// from afterwards cannot reach an in-flight request.
pub type Chain = Arc<[BoxedHandler]>;

/// Already erased: boxing again would only add an indirection.
impl Handler for BoxedHandler {
    fn handle(&self, cx: &mut Context) {
        (**self).handle(cx);
    }

    fn into_boxed(self) -> BoxedHandler {
        self
    }
}

// ── Function handlers ─────────────────────────────────────────────────────────

/// A native handler written as a plain function or closure.
///
/// Pure identity wrap: `HandlerFn(f).handle(cx)` is `f(cx)`.
#[derive(Clone, Copy)]
pub struct HandlerFn<F>(pub F);

impl<F> Handler for HandlerFn<F>
where
    F: Fn(&mut Context) + Send + Sync + 'static,
{
    fn handle(&self, cx: &mut Context) {
        (self.0)(cx);
    }
}

impl<F> fmt::Debug for HandlerFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HandlerFn")
    }
}

/// Wraps a function taking the context directly.
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: Fn(&mut Context) + Send + Sync + 'static,
{
    HandlerFn(f)
}
