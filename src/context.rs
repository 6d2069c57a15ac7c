//! Per-request execution context and the chain driver.
//!
//! # Cursor states
//!
//! ```text
//!   BeforeStart ──next()──▶ Running(i) ──handler returns──▶ Running(i+1) … ──▶ Exhausted
//!        │                      │
//!        └────────abort()───────┴──────────────────────────────────────────▶ Aborted
//! ```
//!
//! The cursor starts at `-1`. [`Context::next`] bumps it and then keeps
//! invoking whatever sits under it, bumping again after every handler
//! returns, until it runs off the end of the chain. [`Context::abort`] parks
//! the cursor on a sentinel no chain can reach, so every later bounds check
//! fails. Calling `next` after exhaustion or abort is a no-op.
//!
//! The driver never catches a panicking handler. The panic unwinds through
//! the remaining frames to whoever called [`Pipeline::serve`](crate::Pipeline::serve).

use std::io::{self, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::header::{HeaderValue, IntoHeaderName};
use http::StatusCode;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::ScopeError;
use crate::handler::{BoxedHandler, Chain};
use crate::params::Params;
use crate::request::SharedRequest;
use crate::response::SharedResponse;
use crate::scope::{CancelHandle, Scope};

const BEFORE_START: isize = -1;

/// Cursor value after [`Context::abort`]. No chain is this long.
const ABORTED: isize = isize::MAX;

/// Where the driver is in the chain.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Position {
    BeforeStart,
    Running(usize),
    Exhausted,
    Aborted,
}

/// Per-request state shared by every handler in a chain.
///
/// Carries the transport objects, the resolved chain with its cursor, the
/// path parameters and a [`Scope`] of values, cancellation and deadline.
/// One context serves one request on one thread at a time; it is not meant
/// to be shared between requests.
pub struct Context {
    response: SharedResponse,
    request: SharedRequest,
    chain: Chain,
    cursor: isize,
    params: Option<Params>,
    scope: Mutex<Scope>,
}

impl Context {
    /// A standalone context: empty chain, no parameters, background scope.
    ///
    /// Useful for driving a single handler by hand.
    pub fn new(response: SharedResponse, request: SharedRequest) -> Self {
        Self::bound(response, request, Chain::from(Vec::new()), None, Scope::background())
    }

    pub(crate) fn bound(
        response: SharedResponse,
        request: SharedRequest,
        chain: Chain,
        params: Option<Params>,
        scope: Scope,
    ) -> Self {
        Self { response, request, chain, cursor: BEFORE_START, params, scope: Mutex::new(scope) }
    }

    // ── Chain driver ─────────────────────────────────────────────────────────

    /// Runs the rest of the chain.
    ///
    /// Returns once the chain is exhausted or aborted. Handlers call this when
    /// they have work to do *after* everything downstream has finished:
    ///
    /// ```rust
    /// use std::time::Instant;
    /// use strand::Context;
    ///
    /// fn timing(cx: &mut Context) {
    ///     let start = Instant::now();
    ///     cx.next();
    ///     tracing::info!(elapsed = ?start.elapsed(), "downstream finished");
    /// }
    /// ```
    ///
    /// Calling it more than once from the same handler is undefined by
    /// contract.
    pub fn next(&mut self) {
        self.cursor = self.cursor.saturating_add(1);
        while let Some(handler) = self.current() {
            trace!(cursor = self.cursor, len = self.chain.len(), "invoking handler");
            handler.handle(self);
            self.cursor = self.cursor.saturating_add(1);
        }
    }

    /// Stops the chain. No further handler runs for this context.
    pub fn abort(&mut self) {
        if !self.is_aborted() {
            debug!(cursor = self.cursor, len = self.chain.len(), "chain aborted");
        }
        self.cursor = ABORTED;
    }

    pub fn is_aborted(&self) -> bool {
        self.cursor >= ABORTED
    }

    pub fn position(&self) -> Position {
        match usize::try_from(self.cursor) {
            Err(_) => Position::BeforeStart,
            Ok(_) if self.is_aborted() => Position::Aborted,
            Ok(i) if i < self.chain.len() => Position::Running(i),
            Ok(_) => Position::Exhausted,
        }
    }

    fn current(&self) -> Option<BoxedHandler> {
        let index = usize::try_from(self.cursor).ok()?;
        self.chain.get(index).cloned()
    }

    /// Runs `chain` against this context as a nested pipeline.
    ///
    /// Transport objects, parameters and scope carry over untouched; only the
    /// chain and cursor are swapped. When the nested chain finishes the outer
    /// chain resumes where it was, unless the nested chain aborted.
    pub(crate) fn run_nested(&mut self, chain: Chain) {
        let outer_chain = std::mem::replace(&mut self.chain, chain);
        let outer_cursor = std::mem::replace(&mut self.cursor, BEFORE_START);

        self.next();

        self.chain = outer_chain;
        if !self.is_aborted() {
            self.cursor = outer_cursor;
        }
    }

    // ── Transport ────────────────────────────────────────────────────────────

    pub fn response(&self) -> &SharedResponse {
        &self.response
    }

    pub fn request(&self) -> &SharedRequest {
        &self.request
    }

    /// Replaces the response sink every later handler writes to.
    pub fn replace_response(&mut self, response: SharedResponse) {
        self.response = response;
    }

    /// Replaces the request every later handler reads.
    pub fn replace_request(&mut self, request: SharedRequest) {
        self.request = request;
    }

    pub fn set_status(&self, status: StatusCode) {
        self.response.lock().set_status(status);
    }

    pub fn insert_header<K: IntoHeaderName>(&self, name: K, value: HeaderValue) {
        self.response.lock().headers_mut().insert(name, value);
    }

    /// Appends bytes to the response body.
    pub fn write(&self, bytes: &[u8]) -> io::Result<()> {
        self.response.lock().write_all(bytes)
    }

    // ── Parameters ───────────────────────────────────────────────────────────

    /// Returns a named path parameter, if the request carried one.
    ///
    /// Parameters come from the [`ParamSource`](crate::ParamSource) of the
    /// pipeline that created this context. Without one, there are none.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.as_ref()?.get(name).map(String::as_str)
    }

    pub fn params(&self) -> Option<&Params> {
        self.params.as_ref()
    }

    // ── Scope ────────────────────────────────────────────────────────────────

    /// A snapshot of the current scope, for handing to other threads or tasks.
    pub fn scope(&self) -> Scope {
        self.scope.lock().clone()
    }

    /// Puts back a scope saved with [`scope`](Context::scope), dropping every
    /// layer added since.
    pub(crate) fn restore_scope(&self, scope: Scope) {
        *self.scope.lock() = scope;
    }

    fn layer<T>(&self, f: impl FnOnce(&Scope) -> (Scope, T)) -> T {
        let mut scope = self.scope.lock();
        let (layered, out) = f(&*scope);
        *scope = layered;
        out
    }

    /// Adds a value visible to every later handler via [`Context::value`].
    ///
    /// Keyed by type: wrap it in a newtype to keep it apart from other values
    /// of the same type.
    pub fn with_value<T: Send + Sync + 'static>(&self, value: T) {
        self.layer(|scope| (scope.with_value(value), ()));
    }

    /// Layers a cancellable scope. Dropping the handle cancels it.
    pub fn with_cancel(&self) -> CancelHandle {
        self.layer(Scope::with_cancel)
    }

    /// Layers a scope that is done at `deadline` at the latest.
    pub fn with_deadline(&self, deadline: Instant) -> CancelHandle {
        self.layer(|scope| scope.with_deadline(deadline))
    }

    /// Same as [`with_deadline`](Context::with_deadline) at `now + timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> CancelHandle {
        self.layer(|scope| scope.with_timeout(timeout))
    }

    pub fn value<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.scope.lock().value::<T>()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.scope.lock().deadline()
    }

    pub fn err(&self) -> Option<ScopeError> {
        self.scope.lock().err()
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("method", self.request.method())
            .field("uri", self.request.uri())
            .field("position", &self.position())
            .field("chain_len", &self.chain.len())
            .finish_non_exhaustive()
    }
}
