//! Unified error types.

/// The error type returned by strand's fallible setup operations.
///
/// Short-circuiting a chain is not an error, and neither is anything a
/// handler decides to tell the client: that goes to the response sink. This
/// type surfaces infrastructure and configuration failures only.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Binding or accepting on the listener failed.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// The address handed to [`Server::bind`](crate::Server::bind) does not parse.
    #[error("invalid socket address `{0}`")]
    Addr(String),

    /// A path template handed to [`Patterns`](crate::Patterns) was rejected.
    #[error("invalid path template: {0}")]
    Pattern(#[from] matchit::InsertError),
}

/// Why a [`Scope`](crate::Scope) is done.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ScopeError {
    /// A [`CancelHandle`](crate::CancelHandle) was cancelled or dropped.
    #[error("scope canceled")]
    Canceled,

    /// The scope's deadline has passed.
    #[error("scope deadline exceeded")]
    DeadlineExceeded,
}
