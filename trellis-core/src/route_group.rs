//! Route groups
//!
//! A group pairs a URL prefix with middleware that every route registered
//! inside it receives. Groups are pushed onto the router's group stack and
//! nest: a route registered under several open groups gets all of their
//! prefixes, outer first, and all of their middleware, outer first.
//!
//! ```
//! use std::sync::Arc;
//! use trellis_core::{OutputBuffer, RouteGroup};
//!
//! let mut admin = RouteGroup::new("/admin");
//! admin.add(Arc::new(OutputBuffer));
//!
//! assert_eq!(admin.prefix(), "/admin");
//! assert_eq!(admin.middleware().len(), 1);
//! ```

use crate::Middleware;
use std::fmt;
use std::sync::Arc;

/// A URL prefix plus the middleware applied to routes under it.
#[derive(Clone, Default)]
pub struct RouteGroup {
    prefix: String,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl RouteGroup {
    /// Create a group. The prefix is used verbatim.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            middleware: Vec::new(),
        }
    }

    /// Add multiple middleware to this group (builder style).
    pub fn with_middleware(mut self, middleware: Vec<Arc<dyn Middleware>>) -> Self {
        self.middleware.extend(middleware);
        self
    }

    /// Append one middleware.
    pub fn add(&mut self, middleware: Arc<dyn Middleware>) {
        self.middleware.push(middleware);
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn middleware(&self) -> &[Arc<dyn Middleware>] {
        &self.middleware
    }
}

impl fmt::Debug for RouteGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteGroup")
            .field("prefix", &self.prefix)
            .field("middleware", &self.middleware.len())
            .finish()
    }
}

/// Resolve a stack of open groups into one prefix and one middleware list.
pub(crate) fn flatten(groups: &[RouteGroup]) -> (String, Vec<Arc<dyn Middleware>>) {
    let mut prefix = String::new();
    let mut middleware = Vec::new();

    for group in groups {
        prefix.push_str(&group.prefix);
        middleware.extend(group.middleware.iter().cloned());
    }

    (prefix, middleware)
}
