//! The response sink contract and a buffered implementation.
//!
//! Handlers never build a response value and return it. They write into a
//! sink that outlives the whole chain: set a status, set headers, push bytes.
//! Anything implementing [`ResponseWriter`] can sit behind a [`Context`](crate::Context);
//! [`Recorder`] is the one the bundled server uses.

use std::io;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use http::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use http::StatusCode;
use http_body_util::Full;
use parking_lot::Mutex;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values for use with [`ResponseWriter::content_type`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContentType {
    Csv,          // text/csv
    EventStream,  // text/event-stream  (SSE)
    Html,         // text/html; charset=utf-8
    Json,         // application/json
    OctetStream,  // application/octet-stream
    Text,         // text/plain; charset=utf-8
    Xml,          // application/xml
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Csv         => "text/csv",
            Self::EventStream => "text/event-stream",
            Self::Html        => "text/html; charset=utf-8",
            Self::Json        => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Text        => "text/plain; charset=utf-8",
            Self::Xml         => "application/xml",
        }
    }
}

// ── ResponseWriter ────────────────────────────────────────────────────────────

/// A byte-writing, status-setting, header-setting response sink.
///
/// Bytes go through [`io::Write`]; everything else through the methods below.
/// Implementations decide what "sent" means. [`Recorder`] buffers until the
/// chain is done.
pub trait ResponseWriter: io::Write + Send {
    fn status(&self) -> StatusCode;
    fn set_status(&mut self, status: StatusCode);
    fn headers(&self) -> &HeaderMap;
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Sets the `content-type` header, replacing any previous value.
    fn content_type(&mut self, content_type: ContentType) {
        self.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type.as_str()));
    }

    /// Hands over everything buffered so far, leaving the sink empty.
    ///
    /// The bundled server sends the recording of whichever sink the context
    /// holds when the chain returns. A sink that does not buffer keeps the
    /// default `None` and must forward to the sink it wraps: the server then
    /// falls back to its own recorder.
    fn take_recording(&mut self) -> Option<Recorder> {
        None
    }
}

/// The response sink as the chain sees it.
///
/// Shared rather than owned so that a decorator can hand the rest of the
/// chain a different sink and the swap stays visible to whoever holds the
/// context afterwards.
pub type SharedResponse = Arc<Mutex<dyn ResponseWriter>>;

/// Wraps a sink for use in a [`Context`](crate::Context).
pub fn share<W: ResponseWriter + 'static>(writer: W) -> SharedResponse {
    Arc::new(Mutex::new(writer))
}

// ── Recorder ──────────────────────────────────────────────────────────────────

/// A [`ResponseWriter`] that buffers everything in memory.
///
/// Status defaults to `200 OK`. Turn it into a wire response with
/// [`Recorder::into_http`] once the chain has returned.
#[derive(Debug)]
pub struct Recorder {
    status: StatusCode,
    headers: HeaderMap,
    body: BytesMut,
}

impl Recorder {
    pub fn new() -> Self {
        Self { status: StatusCode::OK, headers: HeaderMap::new(), body: BytesMut::new() }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_http(self) -> http::Response<Full<Bytes>> {
        let mut response = http::Response::new(Full::new(self.body.freeze()));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

impl Default for Recorder {
    fn default() -> Self { Self::new() }
}

impl io::Write for Recorder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.body.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ResponseWriter for Recorder {
    fn status(&self) -> StatusCode { self.status }
    fn set_status(&mut self, status: StatusCode) { self.status = status; }
    fn headers(&self) -> &HeaderMap { &self.headers }
    fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }

    fn take_recording(&mut self) -> Option<Recorder> {
        Some(std::mem::take(self))
    }
}
