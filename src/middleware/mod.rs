//! Built-in middleware.
//!
//! Middleware here is ordinary native handlers that do some work, call
//! [`Context::next`](crate::Context::next) to run everything downstream, then do some more. They
//! are the right place for cross-cutting concerns:
//!
//! - [`trace`]: a per-request span with method, path, status and latency
//! - [`timeout`]: a deadline for everything downstream
//! - [`catch_panic`]: turns a downstream panic into a `500`
//!
//! ```rust
//! use std::time::Duration;
//! use strand::{Pipeline, middleware};
//!
//! let app = Pipeline::new()
//!     .with(middleware::trace())
//!     .with(middleware::catch_panic())
//!     .with(middleware::timeout(Duration::from_secs(5)));
//! # let _ = app;
//! ```

mod recover;
mod timeout;
mod trace;

pub use recover::{CatchPanic, catch_panic};
pub use timeout::{Timeout, timeout};
pub use trace::{Trace, trace};
