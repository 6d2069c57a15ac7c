//! Adapters for handlers written in foreign conventions.
//!
//! Plenty of useful middleware is written against a plain
//! `(response, request)` shape and knows nothing about [`Context`]. Two such
//! shapes are supported:
//!
//! | Convention | Shape | Adapter |
//! |---|---|---|
//! | Plain sink | `Fn(SharedResponse, SharedRequest)` | [`plain`] |
//! | Decorator | `for<'a> Fn(BoxSink<'a>) -> BoxSink<'a>` | [`decorator`] |
//!
//! Native functions over the context go through [`handler_fn`](crate::handler_fn).
//!
//! A plain sink never sees the chain, so its adapter always continues after
//! it. A decorator receives "the rest of the chain" as a sink and stops the
//! chain simply by never calling it; the adapter notices and aborts.

use std::cell::{Cell, RefCell};
use std::fmt;

use tracing::debug;

use crate::context::Context;
use crate::handler::Handler;
use crate::request::SharedRequest;
use crate::response::SharedResponse;

// ── Sink ──────────────────────────────────────────────────────────────────────

/// Something that processes a response/request pair, with no chain access.
pub trait Sink {
    fn serve(&self, response: SharedResponse, request: SharedRequest);
}

impl<F> Sink for F
where
    F: Fn(SharedResponse, SharedRequest),
{
    fn serve(&self, response: SharedResponse, request: SharedRequest) {
        self(response, request);
    }
}

/// A boxed sink. The lifetime lets a decorator wrap a sink that borrows the
/// live context without anything being `'static`.
pub type BoxSink<'a> = Box<dyn Sink + 'a>;

/// Boxes a closure as a [`BoxSink`], fixing its argument types for inference.
///
/// ```rust
/// use strand::adapter::{BoxSink, decorator, sink};
///
/// let passthrough = decorator(|next: BoxSink<'_>| {
///     sink(move |res, req| next.serve(res, req))
/// });
/// # let _ = passthrough;
/// ```
pub fn sink<'a, F>(f: F) -> BoxSink<'a>
where
    F: Fn(SharedResponse, SharedRequest) + 'a,
{
    Box::new(f)
}

// ── Plain adapter ─────────────────────────────────────────────────────────────

/// A plain sink adapted into a [`Handler`]. See [`plain`].
pub struct Plain<S>(S);

/// Adapts a plain sink.
///
/// The sink runs against the context's current response and request, then
/// the chain continues. Used mid-chain it behaves like middleware that always
/// calls next; used last it is an ordinary terminal handler, because
/// continuing an exhausted chain does nothing.
pub fn plain<S>(sink: S) -> Plain<S>
where
    S: Sink + Send + Sync + 'static,
{
    Plain(sink)
}

impl<S> Handler for Plain<S>
where
    S: Sink + Send + Sync + 'static,
{
    fn handle(&self, cx: &mut Context) {
        self.0.serve(cx.response().clone(), cx.request().clone());
        cx.next();
    }
}

impl<S> fmt::Debug for Plain<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Plain")
    }
}

// ── Decorator adapter ─────────────────────────────────────────────────────────

/// Whether a decorator handed control to the rest of the chain.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Invocation {
    Called,
    NotCalled,
}

/// The inner sink given to a decorator: "everything after you".
///
/// Invoking it adopts whatever response and request it was called with,
/// then drives the rest of the chain. Calling it more than once is
/// undefined by contract and not guarded against.
struct Remainder<'a> {
    cx: RefCell<&'a mut Context>,
    invocation: Cell<Invocation>,
}

impl<'a> Remainder<'a> {
    fn new(cx: &'a mut Context) -> Self {
        Self { cx: RefCell::new(cx), invocation: Cell::new(Invocation::NotCalled) }
    }

    fn run(&self, response: SharedResponse, request: SharedRequest) {
        self.invocation.set(Invocation::Called);
        let mut cx = self.cx.borrow_mut();
        cx.replace_response(response);
        cx.replace_request(request);
        cx.next();
    }

    fn finish(self) -> (&'a mut Context, Invocation) {
        (self.cx.into_inner(), self.invocation.get())
    }
}

/// A decorator adapted into a [`Handler`]. See [`decorator`].
pub struct Decorator<M>(M);

/// Adapts a wrap-the-rest-of-the-chain decorator.
///
/// The decorator is called with the remainder of the chain as a sink and
/// returns the sink to run instead. That outer sink is invoked once with the
/// context's current response and request. If it returns without ever
/// invoking the remainder, the chain is aborted: not calling next is how this
/// convention says "stop".
pub fn decorator<M>(middleware: M) -> Decorator<M>
where
    M: for<'a> Fn(BoxSink<'a>) -> BoxSink<'a> + Send + Sync + 'static,
{
    Decorator(middleware)
}

impl<M> Handler for Decorator<M>
where
    M: for<'a> Fn(BoxSink<'a>) -> BoxSink<'a> + Send + Sync + 'static,
{
    fn handle(&self, cx: &mut Context) {
        let response = cx.response().clone();
        let request = cx.request().clone();

        let remainder = Remainder::new(cx);
        {
            let inner = sink(|res, req| remainder.run(res, req));
            let outer = (self.0)(inner);
            outer.serve(response, request);
        }

        let (cx, invocation) = remainder.finish();
        if invocation == Invocation::NotCalled {
            debug!("decorator did not call its inner sink, aborting chain");
            cx.abort();
        }
    }
}

impl<M> fmt::Debug for Decorator<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Decorator")
    }
}
