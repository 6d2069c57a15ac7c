//! Minimal strand example: a shared base chain forked into a public and an
//! authenticated branch, with a decorator-style middleware in the mix.
//!
//! Run with:
//!   cargo run --example basic
//!
//! Try:
//!   curl -i http://localhost:3000/healthz
//!   curl -i http://localhost:3000/users/42
//!   curl -i -H 'authorization: Bearer x' http://localhost:3000/users/42
//!   curl -i -H 'x-maintenance: 1' http://localhost:3000/healthz

use std::io::Write;
use std::time::Duration;

use http::{HeaderValue, StatusCode};
use strand::adapter::{BoxSink, Sink, sink};
use strand::{
    Context, ContentType, Handler, Patterns, Pipeline, ResponseWriter, Server, decorator,
    handler_fn, middleware,
};

#[tokio::main]
async fn main() -> Result<(), strand::Error> {
    tracing_subscriber::fmt::init();

    let base = Pipeline::new()
        .with(middleware::trace())
        .with(middleware::catch_panic())
        .with(decorator(maintenance));

    let public = base.endpoint_fn(healthz);

    let authed = base.fork([handler_fn(require_token).into_boxed()]);
    let users = authed.endpoint_fn(get_user);

    // Endpoints nest: each runs against the outer context, so parameters
    // extracted here are visible inside both branches.
    let app = Pipeline::new()
        .with_params(Patterns::new().pattern("/users/{id}")?.into())
        .with(handler_fn(move |cx: &mut Context| {
            if cx.request().uri().path() == "/healthz" {
                public.handle(cx);
            } else {
                users.handle(cx);
            }
        }));

    Server::bind("0.0.0.0:3000")
        .request_timeout(Duration::from_secs(10))
        .serve(app)
        .await
}

// A decorator: returns a sink that either calls the rest of the chain or
// answers on its own. Not calling `next` stops the chain.
fn maintenance(next: BoxSink<'_>) -> BoxSink<'_> {
    sink(move |res, req| {
        if req.headers().contains_key("x-maintenance") {
            let mut res = res.lock();
            res.set_status(StatusCode::SERVICE_UNAVAILABLE);
            let _ = res.write_all(b"down for maintenance\n");
            return;
        }
        next.serve(res, req);
    })
}

fn require_token(cx: &mut Context) {
    if !cx.request().headers().contains_key("authorization") {
        cx.set_status(StatusCode::UNAUTHORIZED);
        cx.abort();
    }
}

fn healthz(cx: &mut Context) {
    let _ = cx.write(b"ok\n");
}

fn get_user(cx: &mut Context) {
    let id = cx.param("id").unwrap_or("unknown").to_owned();
    cx.response().lock().content_type(ContentType::Json);
    cx.insert_header("cache-control", HeaderValue::from_static("no-store"));
    let _ = cx.write(format!(r#"{{"id":"{id}","name":"alice"}}"#).as_bytes());
}
