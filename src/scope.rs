//! Request-scoped values, cancellation and deadlines.
//!
//! A [`Scope`] is a stack of immutable layers. Adding a value, a cancel
//! point or a deadline never touches the existing layers: it produces a new
//! scope on top of them. That makes a scope cheap to clone and safe to hand
//! to another thread, while the [`Context`](crate::Context) simply swaps in
//! the newest one.
//!
//! Cancellation flows outward to inward. Cancelling a layer cancels every
//! layer created on top of it, and a layer created on top of an already
//! cancelled one starts out cancelled. Deadlines only ever tighten.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::ScopeError;

/// An immutable stack of request-scoped layers.
#[derive(Clone, Default)]
pub struct Scope {
    values: Option<Arc<ValueLayer>>,
    signal: Option<Arc<Signal>>,
}

struct ValueLayer {
    key: TypeId,
    value: Arc<dyn Any + Send + Sync>,
    parent: Option<Arc<ValueLayer>>,
}

impl Scope {
    /// The empty root scope: no values, no deadline, never done.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_value<T: Send + Sync + 'static>(&self, value: T) -> Self {
        let layer = ValueLayer {
            key: TypeId::of::<T>(),
            value: Arc::new(value),
            parent: self.values.clone(),
        };
        Self { values: Some(Arc::new(layer)), signal: self.signal.clone() }
    }

    /// Returns the nearest value of type `T`.
    pub fn value<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let key = TypeId::of::<T>();
        let mut layer = self.values.as_ref();
        while let Some(current) = layer {
            if current.key == key {
                return Arc::clone(&current.value).downcast::<T>().ok();
            }
            layer = current.parent.as_ref();
        }
        None
    }

    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        self.with_signal(None)
    }

    /// Layers a deadline. A deadline later than one already in effect
    /// changes nothing but still yields an independent cancel point.
    pub fn with_deadline(&self, deadline: Instant) -> (Self, CancelHandle) {
        self.with_signal(Some(deadline))
    }

    pub fn with_timeout(&self, timeout: Duration) -> (Self, CancelHandle) {
        self.with_deadline(Instant::now() + timeout)
    }

    fn with_signal(&self, deadline: Option<Instant>) -> (Self, CancelHandle) {
        let signal = Signal::new(self.signal.as_ref(), deadline);
        let scope = Self { values: self.values.clone(), signal: Some(Arc::clone(&signal)) };
        (scope, CancelHandle { signal })
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.signal.as_ref()?.deadline
    }

    /// Why the scope is done, or `None` while it is still live.
    pub fn err(&self) -> Option<ScopeError> {
        self.signal.as_ref()?.err()
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolves once the scope is cancelled or its deadline passes.
    ///
    /// Never resolves for a scope without a cancel point.
    pub async fn done(&self) {
        match &self.signal {
            Some(signal) => signal.wait().await,
            None => std::future::pending().await,
        }
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("deadline", &self.deadline())
            .field("err", &self.err())
            .finish_non_exhaustive()
    }
}

// ── Signal ────────────────────────────────────────────────────────────────────

/// One cancel point, linked to the cancel points layered on top of it.
struct Signal {
    deadline: Option<Instant>,
    reason: OnceLock<ScopeError>,
    notify: Notify,
    children: Mutex<Vec<Weak<Signal>>>,
}

impl Signal {
    fn new(parent: Option<&Arc<Signal>>, deadline: Option<Instant>) -> Arc<Self> {
        let inherited = parent.and_then(|p| p.deadline);
        let deadline = match (inherited, deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let signal = Arc::new(Self {
            deadline,
            reason: OnceLock::new(),
            notify: Notify::new(),
            children: Mutex::new(Vec::new()),
        });

        if let Some(parent) = parent {
            // Checked under the parent's child lock, so a concurrent cancel
            // either sees this child or has already set its reason.
            let mut children = parent.children.lock();
            match parent.reason.get() {
                Some(&reason) => signal.cancel(reason),
                None => {
                    children.retain(|child| child.strong_count() > 0);
                    children.push(Arc::downgrade(&signal));
                }
            }
        }
        signal
    }

    fn expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    fn err(&self) -> Option<ScopeError> {
        if let Some(&reason) = self.reason.get() {
            return Some(reason);
        }
        self.expired().then_some(ScopeError::DeadlineExceeded)
    }

    fn cancel(&self, reason: ScopeError) {
        let reason = if self.expired() { ScopeError::DeadlineExceeded } else { reason };
        if self.reason.set(reason).is_err() {
            return;
        }
        self.notify.notify_waiters();

        let children = std::mem::take(&mut *self.children.lock());
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel(reason);
        }
    }

    async fn wait(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.reason.get().is_some() {
            return;
        }
        match self.deadline {
            Some(deadline) => {
                let sleep = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline));
                tokio::select! {
                    () = notified => {}
                    () = sleep => {}
                }
            }
            None => notified.await,
        }
    }
}

// ── CancelHandle ──────────────────────────────────────────────────────────────

/// Releases a cancel point created by `with_cancel`, `with_deadline` or
/// `with_timeout`.
///
/// Cancels on [`cancel`](CancelHandle::cancel) and on drop. Keep it alive for
/// as long as the scope should stay live, and drop it promptly after.
#[must_use = "dropping a CancelHandle cancels its scope immediately"]
pub struct CancelHandle {
    signal: Arc<Signal>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.signal.cancel(ScopeError::Canceled);
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle").field("err", &self.signal.err()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Tenant(&'static str);

    #[test]
    fn background_is_never_done() {
        let scope = Scope::background();
        assert!(!scope.is_done());
        assert_eq!(scope.deadline(), None);
        assert!(scope.value::<Tenant>().is_none());
    }

    #[test]
    fn nearest_value_wins_and_parents_are_untouched() {
        let root = Scope::background().with_value(Tenant("acme"));
        let child = root.with_value(Tenant("globex")).with_value(7_u32);

        assert_eq!(child.value::<Tenant>().as_deref(), Some(&Tenant("globex")));
        assert_eq!(child.value::<u32>().as_deref(), Some(&7));
        assert_eq!(root.value::<Tenant>().as_deref(), Some(&Tenant("acme")));
        assert!(root.value::<u32>().is_none());
    }

    #[test]
    fn cancel_propagates_to_children_not_parents() {
        let (parent, parent_handle) = Scope::background().with_cancel();
        let (child, _child_handle) = parent.with_cancel();
        let (grandchild, _grandchild_handle) = child.with_value(1_u8).with_cancel();

        parent_handle.cancel();
        assert_eq!(parent.err(), Some(ScopeError::Canceled));
        assert_eq!(child.err(), Some(ScopeError::Canceled));
        assert_eq!(grandchild.err(), Some(ScopeError::Canceled));

        let (outer, _outer_handle) = Scope::background().with_cancel();
        let (inner, inner_handle) = outer.with_cancel();
        inner_handle.cancel();
        assert!(inner.is_done());
        assert!(!outer.is_done());
    }

    #[test]
    fn child_of_cancelled_scope_starts_cancelled() {
        let (parent, handle) = Scope::background().with_cancel();
        handle.cancel();
        let (child, _child_handle) = parent.with_cancel();
        assert_eq!(child.err(), Some(ScopeError::Canceled));
    }

    #[test]
    fn dropping_the_handle_cancels() {
        let (scope, handle) = Scope::background().with_cancel();
        drop(handle);
        assert!(scope.is_done());
    }

    #[test]
    fn deadlines_only_tighten() {
        let now = Instant::now();
        let near = now + Duration::from_secs(5);
        let far = now + Duration::from_secs(50);

        let (tight, _a) = Scope::background().with_deadline(near);
        let (loose, _b) = tight.with_deadline(far);
        assert_eq!(loose.deadline(), Some(near));

        let (tighter, _c) = loose.with_timeout(Duration::from_millis(1));
        assert!(tighter.deadline().unwrap() < near);
    }

    #[test]
    fn expired_deadline_reports_deadline_exceeded_even_after_cancel() {
        let (scope, handle) = Scope::background().with_deadline(Instant::now());
        assert_eq!(scope.err(), Some(ScopeError::DeadlineExceeded));
        handle.cancel();
        assert_eq!(scope.err(), Some(ScopeError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn done_resolves_on_cancel() {
        let (scope, handle) = Scope::background().with_cancel();
        let waiter = tokio::spawn(async move { scope.done().await });
        tokio::task::yield_now().await;
        handle.cancel();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn done_resolves_on_deadline() {
        let (scope, _handle) = Scope::background().with_timeout(Duration::from_millis(10));
        tokio::time::timeout(Duration::from_secs(5), scope.done())
            .await
            .expect("deadline should have fired");
        assert_eq!(scope.err(), Some(ScopeError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn done_pends_without_a_cancel_point() {
        let scope = Scope::background().with_value(Tenant("acme"));
        let waited = tokio::time::timeout(Duration::from_millis(20), scope.done()).await;
        assert!(waited.is_err());
    }
}
