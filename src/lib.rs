//! # strand
//!
//! Composable middleware chains over a shared, per-request execution context.
//!
//! ## The model
//!
//! A request travels through an ordered chain of handlers. Every handler gets
//! the same [`Context`]: the response sink, the request, path parameters and
//! a [`Scope`] of values, cancellation and deadlines. The chain advances on
//! its own; a handler that wants to run code after everything downstream
//! calls [`Context::next`], and one that wants to stop the chain calls
//! [`Context::abort`].
//!
//! - **Pipelines** are built once, at startup, and forked into specialised
//!   chains that share a common prefix
//! - **Adapters** let middleware written in foreign shapes sit in the same
//!   chain as native handlers: see [`adapter`]
//! - **Parameters** come from an injected [`ParamSource`], swappable at
//!   runtime without touching the chains
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use http::{HeaderValue, StatusCode};
//! use strand::{Context, Handler, Patterns, Pipeline, Server, handler_fn, middleware};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), strand::Error> {
//!     let base = Pipeline::new()
//!         .with(middleware::trace())
//!         .with(middleware::catch_panic())
//!         .with_params(Patterns::new().pattern("/users/{id}")?.into());
//!
//!     let api = base.fork([handler_fn(require_token).into_boxed()]);
//!     let app = api.endpoint_fn(get_user);
//!
//!     Server::bind("0.0.0.0:3000").serve(app).await
//! }
//!
//! fn require_token(cx: &mut Context) {
//!     if !cx.request().headers().contains_key("authorization") {
//!         cx.set_status(StatusCode::UNAUTHORIZED);
//!         cx.abort();
//!     }
//! }
//!
//! fn get_user(cx: &mut Context) {
//!     let id = cx.param("id").unwrap_or("unknown").to_owned();
//!     cx.insert_header("content-type", HeaderValue::from_static("application/json"));
//!     let _ = cx.write(format!(r#"{{"id":"{id}"}}"#).as_bytes());
//! }
//! ```

mod context;
mod error;
mod handler;
mod params;
mod pipeline;
mod scope;
mod server;

pub mod adapter;
pub mod middleware;
pub mod request;
pub mod response;

#[cfg(test)]
mod testing;

pub use adapter::{BoxSink, Invocation, Sink, decorator, plain, sink};
pub use context::{Context, Position};
pub use error::{Error, ScopeError};
pub use handler::{BoxedHandler, Chain, Handler, HandlerFn, handler_fn};
pub use params::{ParamSource, Params, Patterns};
pub use pipeline::{Endpoint, Pipeline};
pub use request::{Request, SharedRequest};
pub use response::{ContentType, Recorder, ResponseWriter, SharedResponse};
pub use scope::{CancelHandle, Scope};
pub use server::Server;
