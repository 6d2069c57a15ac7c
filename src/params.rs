//! Path parameters, supplied by whoever does the routing.
//!
//! strand does not route. It only asks one question of each incoming
//! request: "what are its path parameters?" The answer comes from a
//! [`ParamSource`] handed to the pipeline. Without one the answer is always
//! "none".
//!
//! ```rust
//! use strand::{ParamSource, Patterns, Pipeline};
//!
//! # fn main() -> Result<(), strand::Error> {
//! let patterns = Patterns::new()
//!     .pattern("/users/{id}")?
//!     .pattern("/teams/{team}/members/{member}")?;
//!
//! let app = Pipeline::new().with_params(ParamSource::from(patterns));
//! # let _ = app;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use matchit::Router as MatchitRouter;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::Error;
use crate::request::Request;

/// Parameter name → value. Read-only for the lifetime of a context.
pub type Params = Arc<HashMap<String, String>>;

type Extractor = Arc<dyn Fn(&Request) -> Option<Params> + Send + Sync>;

/// A replaceable parameter extractor.
///
/// Clones share the same slot: [`replace`](ParamSource::replace) on any
/// clone is seen by all of them, including pipelines forked after the
/// source was attached. A context calls the extractor once, when it is
/// created, so replacing it never reaches a request already in flight.
#[derive(Clone)]
pub struct ParamSource {
    extractor: Arc<RwLock<Extractor>>,
}

impl ParamSource {
    /// A source that never yields parameters.
    pub fn none() -> Self {
        Self::new(|_req| None)
    }

    pub fn new<F>(extractor: F) -> Self
    where
        F: Fn(&Request) -> Option<Params> + Send + Sync + 'static,
    {
        Self { extractor: Arc::new(RwLock::new(Arc::new(extractor))) }
    }

    /// Swaps the extractor. Contexts created from now on use the new one.
    pub fn replace<F>(&self, extractor: F)
    where
        F: Fn(&Request) -> Option<Params> + Send + Sync + 'static,
    {
        *self.extractor.write() = Arc::new(extractor);
        debug!("parameter extractor replaced");
    }

    pub fn extract(&self, request: &Request) -> Option<Params> {
        // Run the extractor outside the lock so a slow one never blocks `replace`.
        let extractor = Arc::clone(&*self.extractor.read());
        extractor(request)
    }
}

impl Default for ParamSource {
    fn default() -> Self { Self::none() }
}

impl fmt::Debug for ParamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ParamSource")
    }
}

// ── Patterns ──────────────────────────────────────────────────────────────────

/// Path-template parameter extraction backed by a radix tree.
///
/// Templates use `{name}` segments and `{*rest}` catch-alls. Lookup is
/// O(path-length). A request whose path matches no template has no
/// parameters.
pub struct Patterns {
    tree: MatchitRouter<()>,
}

impl Patterns {
    pub fn new() -> Self {
        Self { tree: MatchitRouter::new() }
    }

    /// Registers a template. Returns `self` for chaining.
    pub fn pattern(mut self, template: &str) -> Result<Self, Error> {
        self.tree.insert(template, ())?;
        Ok(self)
    }

    pub fn extract(&self, request: &Request) -> Option<Params> {
        let matched = self.tree.at(request.uri().path()).ok()?;
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some(Arc::new(params))
    }
}

impl Default for Patterns {
    fn default() -> Self { Self::new() }
}

impl From<Patterns> for ParamSource {
    fn from(patterns: Patterns) -> Self {
        Self::new(move |req| patterns.extract(req))
    }
}

#[cfg(test)]
mod tests {
    use http::Method;

    use super::*;
    use crate::testing::request;

    fn fixed(pairs: &[(&str, &str)]) -> Option<Params> {
        Some(Arc::new(pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect()))
    }

    #[test]
    fn none_yields_nothing() {
        let source = ParamSource::none();
        assert!(source.extract(&request(Method::GET, "/users/1")).is_none());
    }

    #[test]
    fn replace_is_seen_by_every_clone() {
        let source = ParamSource::none();
        let clone = source.clone();
        source.replace(|_req| fixed(&[("param", "value")]));

        let params = clone.extract(&request(Method::GET, "/")).unwrap();
        assert_eq!(params.get("param").map(String::as_str), Some("value"));
    }

    #[test]
    fn patterns_extract_named_segments() {
        let patterns = Patterns::new()
            .pattern("/users/{id}")
            .unwrap()
            .pattern("/teams/{team}/members/{member}")
            .unwrap();

        let params = patterns.extract(&request(Method::GET, "/teams/core/members/7")).unwrap();
        assert_eq!(params.get("team").map(String::as_str), Some("core"));
        assert_eq!(params.get("member").map(String::as_str), Some("7"));

        let params = patterns.extract(&request(Method::DELETE, "/users/42")).unwrap();
        assert_eq!(params.len(), 1);
        assert_eq!(params["id"], "42");
    }

    #[test]
    fn unmatched_path_has_no_params() {
        let patterns = Patterns::new().pattern("/users/{id}").unwrap();
        assert!(patterns.extract(&request(Method::GET, "/orders/1")).is_none());
    }

    #[test]
    fn conflicting_templates_are_rejected() {
        let result = Patterns::new().pattern("/users/{id}").unwrap().pattern("/users/{name}");
        assert!(matches!(result, Err(Error::Pattern(_))));
    }
}
