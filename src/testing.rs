//! Shared fixtures for unit tests.

use std::sync::Arc;

use bytes::Bytes;
use http::Method;
use parking_lot::Mutex;

use crate::context::Context;
use crate::handler::{BoxedHandler, Handler, handler_fn};
use crate::pipeline::{Endpoint, Pipeline};
use crate::request::{self, Request};
use crate::response::{self, Recorder};
use crate::scope::Scope;

pub(crate) fn request(method: Method, path: &str) -> Request {
    http::Request::builder()
        .method(method)
        .uri(path)
        .body(Bytes::new())
        .expect("valid test request")
}

pub(crate) fn context() -> Context {
    Context::new(response::share(Recorder::new()), request::share(request(Method::GET, "/")))
}

pub(crate) fn with_chain(chain: Vec<BoxedHandler>) -> Context {
    Context::bound(
        response::share(Recorder::new()),
        request::share(request(Method::GET, "/")),
        chain.into(),
        None,
        Scope::background(),
    )
}

pub(crate) fn serve(pipeline: &Pipeline) -> Context {
    serve_path(pipeline, "/")
}

pub(crate) fn serve_path(pipeline: &Pipeline, path: &str) -> Context {
    pipeline.serve(response::share(Recorder::new()), request::share(request(Method::GET, path)))
}

pub(crate) fn serve_endpoint(endpoint: &Endpoint) -> Context {
    endpoint.serve(response::share(Recorder::new()), request::share(request(Method::GET, "/")))
}

/// A handler that records `name` when it runs.
pub(crate) fn tag(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> BoxedHandler {
    let log = Arc::clone(log);
    handler_fn(move |_cx| log.lock().push(name)).into_boxed()
}
