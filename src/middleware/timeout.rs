//! Deadline middleware.

use std::time::Duration;

use crate::context::Context;
use crate::handler::Handler;

/// Puts a deadline on the rest of the chain. See [`timeout`].
#[derive(Clone, Copy, Debug)]
pub struct Timeout {
    after: Duration,
}

/// Layers a `with_timeout` scope, runs the rest of the chain, then puts the
/// previous scope back and releases the timeout.
///
/// Only handlers downstream see the deadline. Handlers after an enclosing
/// nested pipeline see the scope as it was before.
///
/// Handlers are not interrupted: they see the deadline through
/// [`Context::deadline`] and [`Context::is_done`] and decide for themselves.
pub fn timeout(after: Duration) -> Timeout {
    Timeout { after }
}

impl Handler for Timeout {
    fn handle(&self, cx: &mut Context) {
        let outer = cx.scope();
        let release = cx.with_timeout(self.after);
        cx.next();
        cx.restore_scope(outer);
        drop(release);
    }
}
