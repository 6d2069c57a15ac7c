//! Handler pipelines: composition, forking and resolution.
//!
//! A [`Pipeline`] is an ordered list of handlers. Forking one yields a child
//! whose chain is the parent's chain followed by the child's own handlers:
//!
//! ```text
//!   base    = [log, metrics]
//!   authed  = base.fork([auth])          → [log, metrics, auth]
//!   admin   = authed.fork([require_admin]) → [log, metrics, auth, require_admin]
//! ```
//!
//! A fork snapshots its parent's chain at fork time. Appending to the parent
//! afterwards does not reach children that already exist, so a pipeline's
//! chain only ever changes through its own `append` calls.

use std::fmt;
use std::sync::Arc;

use crate::adapter::{BoxSink, Sink, decorator, plain};
use crate::context::Context;
use crate::handler::{BoxedHandler, Chain, Handler, handler_fn};
use crate::params::ParamSource;
use crate::request::SharedRequest;
use crate::response::SharedResponse;
use crate::scope::Scope;

/// An ordered, forkable handler chain.
///
/// Build it once at startup. Each builder call returns `self` (or
/// `&mut Self` for [`append`](Pipeline::append)) so registrations chain:
///
/// ```rust
/// use strand::{Context, Pipeline, handler_fn};
///
/// fn log(cx: &mut Context) { tracing::info!(path = cx.request().uri().path(), "hit"); }
/// fn hello(cx: &mut Context) { let _ = cx.write(b"hello"); }
///
/// let app = Pipeline::new()
///     .with(handler_fn(log))
///     .with(handler_fn(hello));
/// assert_eq!(app.len(), 2);
/// ```
#[derive(Clone)]
pub struct Pipeline {
    inherited: Chain,
    handlers: Vec<BoxedHandler>,
    params: ParamSource,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::from_handlers(Vec::new())
    }

    pub fn from_handlers(handlers: impl IntoIterator<Item = BoxedHandler>) -> Self {
        Self {
            inherited: Chain::from(Vec::new()),
            handlers: handlers.into_iter().collect(),
            params: ParamSource::none(),
        }
    }

    /// Uses `params` to fill in path parameters for every request.
    pub fn with_params(mut self, params: ParamSource) -> Self {
        self.params = params;
        self
    }

    pub fn params(&self) -> &ParamSource {
        &self.params
    }

    // ── Composition ──────────────────────────────────────────────────────────

    /// Appends a handler. Returns `self` for chaining.
    pub fn with(mut self, handler: impl Handler) -> Self {
        self.append(handler);
        self
    }

    /// Appends a handler to this pipeline's own list.
    pub fn append(&mut self, handler: impl Handler) -> &mut Self {
        self.handlers.push(handler.into_boxed());
        self
    }

    pub fn extend(&mut self, handlers: impl IntoIterator<Item = BoxedHandler>) -> &mut Self {
        self.handlers.extend(handlers);
        self
    }

    /// Appends a function over the context.
    pub fn append_fn<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.append(handler_fn(f))
    }

    /// Appends a plain `(response, request)` sink. The chain continues after it.
    pub fn append_plain<S>(&mut self, sink: S) -> &mut Self
    where
        S: Sink + Send + Sync + 'static,
    {
        self.append(plain(sink))
    }

    /// Appends a wrap-the-rest-of-the-chain decorator.
    pub fn append_decorator<M>(&mut self, middleware: M) -> &mut Self
    where
        M: for<'a> Fn(BoxSink<'a>) -> BoxSink<'a> + Send + Sync + 'static,
    {
        self.append(decorator(middleware))
    }

    /// A child pipeline: this pipeline's chain, then `handlers`.
    ///
    /// `self` is left untouched. The child shares this pipeline's
    /// [`ParamSource`].
    pub fn fork(&self, handlers: impl IntoIterator<Item = BoxedHandler>) -> Pipeline {
        Pipeline {
            inherited: self.resolve(),
            handlers: handlers.into_iter().collect(),
            params: self.params.clone(),
        }
    }

    /// Flattens the inherited chain and this pipeline's own handlers into one
    /// sequence, ancestors first.
    pub fn resolve(&self) -> Chain {
        self.inherited.iter().chain(&self.handlers).cloned().collect()
    }

    /// Length of the resolved chain.
    pub fn len(&self) -> usize {
        self.inherited.len() + self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ── Entry points ─────────────────────────────────────────────────────────

    /// Runs the full chain for one request in a fresh context.
    ///
    /// Returns the finished context: the transport can read the final
    /// response object and the abort state from it.
    pub fn serve(&self, response: SharedResponse, request: SharedRequest) -> Context {
        self.serve_in(response, request, Scope::background())
    }

    /// Like [`serve`](Pipeline::serve), starting from `scope` instead of the
    /// background scope.
    pub fn serve_in(&self, response: SharedResponse, request: SharedRequest, scope: Scope) -> Context {
        drive(self.resolve(), &self.params, response, request, scope)
    }

    /// Precompiles this pipeline with `terminal` appended.
    ///
    /// The chain is flattened once, here, instead of on every request. Later
    /// changes to this pipeline do not reach the endpoint.
    pub fn endpoint(&self, terminal: impl Handler) -> Endpoint {
        let chain = self.inherited.iter()
            .chain(&self.handlers)
            .cloned()
            .chain(std::iter::once(terminal.into_boxed()))
            .collect();
        Endpoint { chain, params: self.params.clone() }
    }

    /// [`endpoint`](Pipeline::endpoint) with a function as the terminal handler.
    pub fn endpoint_fn<F>(&self, f: F) -> Endpoint
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.endpoint(handler_fn(f))
    }
}

impl Default for Pipeline {
    fn default() -> Self { Self::new() }
}

/// A pipeline used as one handler inside another chain.
///
/// Runs against the caller's context instead of a new one, so the response,
/// request, parameters and scope accumulated so far carry over. Only the
/// chain and cursor are rebound.
impl Handler for Pipeline {
    fn handle(&self, cx: &mut Context) {
        cx.run_nested(self.resolve());
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("inherited", &self.inherited.len())
            .field("own", &self.handlers.len())
            .finish_non_exhaustive()
    }
}

// ── Endpoint ──────────────────────────────────────────────────────────────────

/// A pipeline flattened once, ready to serve.
///
/// Behaves exactly like the pipeline it came from, minus the per-request
/// flattening. Cheap to clone: the chain is shared.
#[derive(Clone)]
pub struct Endpoint {
    chain: Chain,
    params: ParamSource,
}

impl Endpoint {
    pub fn serve(&self, response: SharedResponse, request: SharedRequest) -> Context {
        self.serve_in(response, request, Scope::background())
    }

    pub fn serve_in(&self, response: SharedResponse, request: SharedRequest, scope: Scope) -> Context {
        drive(Arc::clone(&self.chain), &self.params, response, request, scope)
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }
}

impl From<Pipeline> for Endpoint {
    fn from(pipeline: Pipeline) -> Self {
        Endpoint { chain: pipeline.resolve(), params: pipeline.params }
    }
}

impl Handler for Endpoint {
    fn handle(&self, cx: &mut Context) {
        cx.run_nested(Arc::clone(&self.chain));
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint").field("len", &self.chain.len()).finish_non_exhaustive()
    }
}

fn drive(
    chain: Chain,
    params: &ParamSource,
    response: SharedResponse,
    request: SharedRequest,
    scope: Scope,
) -> Context {
    let params = params.extract(&request);
    let mut cx = Context::bound(response, request, chain, params, scope);
    cx.next();
    cx
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;
    use crate::context::Position;
    use crate::testing::{serve, tag};

    type Log = Arc<Mutex<Vec<&'static str>>>;

    #[test]
    fn empty_pipeline_serves_without_work() {
        let pipeline = Pipeline::new();
        assert!(pipeline.is_empty());
        let cx = serve(&pipeline);
        assert_eq!(cx.position(), Position::Exhausted);
    }

    #[test]
    fn construct_and_append_keep_order() {
        let log = Log::default();
        let mut pipeline = Pipeline::from_handlers([tag(&log, "a"), tag(&log, "b")]);
        pipeline.append(tag(&log, "c")).append(tag(&log, "d"));
        assert_eq!(pipeline.len(), 4);

        serve(&pipeline);
        assert_eq!(*log.lock(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn fork_extends_parent_chain() {
        let log = Log::default();
        let parent = Pipeline::from_handlers([tag(&log, "a"), tag(&log, "b")]);
        let child = parent.fork([tag(&log, "c"), tag(&log, "d")]);

        assert_eq!(parent.len(), 2);
        assert_eq!(child.len(), 4);

        serve(&child);
        assert_eq!(*log.lock(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn fork_of_fork_keeps_ancestor_order() {
        let log = Log::default();
        let root = Pipeline::from_handlers([tag(&log, "root")]);
        let mid = root.fork([tag(&log, "mid")]);
        let leaf = mid.fork([tag(&log, "leaf")]);

        serve(&leaf);
        assert_eq!(*log.lock(), vec!["root", "mid", "leaf"]);
    }

    #[test]
    fn resolve_is_idempotent() {
        let log = Log::default();
        let pipeline = Pipeline::from_handlers([tag(&log, "a")]).fork([tag(&log, "b")]);

        let first = pipeline.resolve();
        let second = pipeline.resolve();
        assert_eq!(first.len(), second.len());
        assert!(first.iter().zip(second.iter()).all(|(x, y)| Arc::ptr_eq(x, y)));
    }

    #[test]
    fn appending_to_parent_after_fork_does_not_reach_child() {
        let log = Log::default();
        let mut parent = Pipeline::from_handlers([tag(&log, "a")]);
        let child = parent.fork([tag(&log, "c")]);
        let before = child.resolve();

        parent.append(tag(&log, "late"));

        let after = child.resolve();
        assert_eq!(after.len(), 2);
        assert!(before.iter().zip(after.iter()).all(|(x, y)| Arc::ptr_eq(x, y)));
        serve(&child);
        assert_eq!(*log.lock(), vec!["a", "c"]);
    }

    #[test]
    fn in_flight_context_keeps_its_snapshot() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);

        let mut pipeline = Pipeline::new();
        pipeline.append_fn(|_cx| {});
        let chain = pipeline.resolve();
        pipeline.append_fn(move |_cx| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let mut cx = crate::testing::with_chain(chain.to_vec());
        cx.next();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn endpoint_matches_resolving_every_call() {
        let log = Log::default();
        let pipeline = Pipeline::from_handlers([tag(&log, "mw")]);
        let endpoint = pipeline.endpoint(tag(&log, "terminal"));

        serve(&pipeline.clone().with(tag(&log, "terminal")));
        let resolved: Vec<_> = log.lock().drain(..).collect();

        crate::testing::serve_endpoint(&endpoint);
        assert_eq!(*log.lock(), resolved);
        assert_eq!(endpoint.chain().len(), 2);
    }

    #[test]
    fn nested_pipeline_reuses_context_and_resumes_outer() {
        #[derive(Debug)]
        struct Marker;

        let log = Log::default();
        let inner_log = Arc::clone(&log);
        let inner = Pipeline::new()
            .with(tag(&log, "inner:1"))
            .with(handler_fn(move |cx| {
                assert!(cx.value::<Marker>().is_some());
                assert_eq!(cx.position(), Position::Running(1));
                inner_log.lock().push("inner:2");
            }));

        let outer = Pipeline::new()
            .with(handler_fn(|cx| cx.with_value(Marker)))
            .with(inner)
            .with(tag(&log, "outer:tail"));

        let cx = serve(&outer);
        assert_eq!(*log.lock(), vec!["inner:1", "inner:2", "outer:tail"]);
        assert_eq!(cx.position(), Position::Exhausted);
    }

    #[test]
    fn abort_inside_nested_pipeline_stops_outer_chain() {
        let log = Log::default();
        let inner = Pipeline::new().with(handler_fn(|cx| cx.abort()));
        let outer = Pipeline::new().with(inner).with(tag(&log, "never"));

        let cx = serve(&outer);
        assert!(cx.is_aborted());
        assert!(log.lock().is_empty());
    }

    #[test]
    fn params_come_from_the_pipeline_source() {
        let source = ParamSource::new(|req| {
            let id = req.uri().path().trim_start_matches("/users/").to_owned();
            Some(Arc::new([("id".to_owned(), id)].into_iter().collect()))
        });
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let pipeline = Pipeline::new()
            .with_params(source)
            .with(handler_fn(move |cx| *sink.lock() = cx.param("id").map(str::to_owned)));

        crate::testing::serve_path(&pipeline, "/users/42");
        assert_eq!(seen.lock().as_deref(), Some("42"));
    }

    #[test]
    fn replacing_the_extractor_skips_in_flight_contexts() {
        let source = ParamSource::new(|_req| Some(Arc::new([("v".to_owned(), "old".to_owned())].into_iter().collect())));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let (replacer, sink) = (source.clone(), Arc::clone(&seen));
        let pipeline = Pipeline::new().with_params(source).with(handler_fn(move |cx| {
            replacer.replace(|_req| Some(Arc::new([("v".to_owned(), "new".to_owned())].into_iter().collect())));
            sink.lock().push(cx.param("v").unwrap_or_default().to_owned());
        }));

        serve(&pipeline);
        serve(&pipeline);
        assert_eq!(*seen.lock(), vec!["old".to_owned(), "new".to_owned()]);
    }

    #[test]
    fn fork_shares_the_param_source() {
        let parent = Pipeline::new().with_params(ParamSource::none());
        let child = parent.fork(Vec::<BoxedHandler>::new());
        parent.params().replace(|_req| Some(Arc::default()));
        assert!(child.params().extract(&crate::testing::request(http::Method::GET, "/")).is_some());
    }
}
