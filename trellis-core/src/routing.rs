// Routing system for HTTP requests

use crate::content_negotiation::Accept;
use crate::logging::{debug, trace};
use crate::route::{HandlerFn, Route, RouteFactory, decode_param};
use crate::route_group::{self, RouteGroup};
use crate::{Error, HttpMethod, HttpRequest, HttpResponse, Middleware, PathParams, Reply};
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Result of matching a request against the route table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Found,
    MethodNotAllowed,
    NotAcceptable,
    Unknown,
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchOutcome::Found => "FOUND",
            DispatchOutcome::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            DispatchOutcome::NotAcceptable => "NOT_ACCEPTABLE",
            DispatchOutcome::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`Router::dispatch`].
#[derive(Debug, Clone)]
pub struct Dispatch<'r> {
    pub outcome: DispatchOutcome,
    /// Set only when `outcome` is `Found`.
    pub route: Option<&'r Route>,
    /// Named segments of the matched pattern. Also filled on a near match.
    pub params: PathParams,
    /// Union of methods the near-matched routes allow.
    pub allowed_methods: Vec<String>,
}

impl<'r> Dispatch<'r> {
    fn unknown() -> Self {
        Self {
            outcome: DispatchOutcome::Unknown,
            route: None,
            params: PathParams::new(),
            allowed_methods: Vec::new(),
        }
    }

    pub fn is_found(&self) -> bool {
        self.outcome == DispatchOutcome::Found
    }

    fn logged(self, path: &str, method: &str) -> Self {
        debug!(
            path = path,
            method = method,
            pattern = ?self.route.map(Route::pattern),
            outcome = %self.outcome,
            "Dispatched"
        );
        self
    }
}

/// Route table, group stack and URL generator.
///
/// Registration takes `&mut self`; dispatch and URL generation take
/// `&self`. Once setup is done the router can be shared read-only (for
/// example behind an `Arc`) across concurrent requests.
pub struct Router {
    routes: Vec<Route>,
    // Pattern -> slot; a slot lists every route registered with that exact
    // pattern. Patterns the matcher refuses (overlapping placeholders) get
    // no slot.
    matcher: matchit::Router<usize>,
    slots: Vec<Vec<usize>>,
    slot_by_pattern: HashMap<String, usize>,
    names: HashMap<String, usize>,
    groups: Vec<RouteGroup>,
    factory: RouteFactory,
}

impl Router {
    pub fn new() -> Self {
        Self::with_factory(RouteFactory::new())
    }

    pub fn with_factory(factory: RouteFactory) -> Self {
        Self {
            routes: Vec::new(),
            matcher: matchit::Router::new(),
            slots: Vec::new(),
            slot_by_pattern: HashMap::new(),
            names: HashMap::new(),
            groups: Vec::new(),
            factory,
        }
    }

    /// Register an anonymous route.
    ///
    /// Open groups contribute their prefixes to the pattern and their
    /// middleware to the front of the route's stack, as they are right now.
    pub fn map<H>(&mut self, methods: &[&str], pattern: &str, handler: H) -> Result<&mut Route, Error>
    where
        H: for<'a> Fn(HttpRequest, &'a mut HttpResponse, PathParams) -> BoxFuture<'a, Result<Reply, Error>>
            + Send
            + Sync
            + 'static,
    {
        self.map_route(None, methods, pattern, Arc::new(handler))
    }

    /// Register a named route, usable with [`url_for`](Self::url_for).
    pub fn map_named<H>(
        &mut self,
        name: &str,
        methods: &[&str],
        pattern: &str,
        handler: H,
    ) -> Result<&mut Route, Error>
    where
        H: for<'a> Fn(HttpRequest, &'a mut HttpResponse, PathParams) -> BoxFuture<'a, Result<Reply, Error>>
            + Send
            + Sync
            + 'static,
    {
        self.map_route(Some(name), methods, pattern, Arc::new(handler))
    }

    /// Register a route from an already type-erased handler.
    pub fn map_route(
        &mut self,
        name: Option<&str>,
        methods: &[&str],
        pattern: &str,
        handler: HandlerFn,
    ) -> Result<&mut Route, Error> {
        if let Some(name) = name {
            if self.names.contains_key(name) {
                return Err(Error::DuplicateRouteName(name.to_string()));
            }
        }

        let (group_prefix, group_middleware) = route_group::flatten(&self.groups);
        let full_pattern = format!("{}{}", group_prefix, pattern);

        let mut route = self
            .factory
            .create(name.map(str::to_string), &full_pattern, handler)?;
        for method in methods {
            route.add_method(method);
        }
        for middleware in group_middleware {
            route.add_middleware(middleware);
        }

        let index = self.routes.len();
        match self.slot_by_pattern.get(&full_pattern) {
            Some(&slot) => self.slots[slot].push(index),
            None => {
                let slot = self.slots.len();
                match self.matcher.insert(full_pattern.clone(), slot) {
                    Ok(()) => {
                        self.slots.push(vec![index]);
                        self.slot_by_pattern.insert(full_pattern.clone(), slot);
                    }
                    // Still reachable through the fallback walk in `dispatch`.
                    Err(err) => trace!(pattern = %full_pattern, error = %err, "Route not indexed"),
                }
            }
        }

        if let Some(name) = name {
            self.names.insert(name.to_string(), index);
        }

        debug!(
            pattern = %full_pattern,
            methods = ?route.methods(),
            name = ?name,
            groups = self.groups.len(),
            "Route registered"
        );
        self.routes.push(route);

        Ok(&mut self.routes[index])
    }

    pub fn get<H>(&mut self, pattern: &str, handler: H) -> Result<&mut Route, Error>
    where
        H: for<'a> Fn(HttpRequest, &'a mut HttpResponse, PathParams) -> BoxFuture<'a, Result<Reply, Error>>
            + Send
            + Sync
            + 'static,
    {
        self.map(&[HttpMethod::GET.as_str()], pattern, handler)
    }

    pub fn post<H>(&mut self, pattern: &str, handler: H) -> Result<&mut Route, Error>
    where
        H: for<'a> Fn(HttpRequest, &'a mut HttpResponse, PathParams) -> BoxFuture<'a, Result<Reply, Error>>
            + Send
            + Sync
            + 'static,
    {
        self.map(&[HttpMethod::POST.as_str()], pattern, handler)
    }

    pub fn put<H>(&mut self, pattern: &str, handler: H) -> Result<&mut Route, Error>
    where
        H: for<'a> Fn(HttpRequest, &'a mut HttpResponse, PathParams) -> BoxFuture<'a, Result<Reply, Error>>
            + Send
            + Sync
            + 'static,
    {
        self.map(&[HttpMethod::PUT.as_str()], pattern, handler)
    }

    pub fn delete<H>(&mut self, pattern: &str, handler: H) -> Result<&mut Route, Error>
    where
        H: for<'a> Fn(HttpRequest, &'a mut HttpResponse, PathParams) -> BoxFuture<'a, Result<Reply, Error>>
            + Send
            + Sync
            + 'static,
    {
        self.map(&[HttpMethod::DELETE.as_str()], pattern, handler)
    }

    pub fn patch<H>(&mut self, pattern: &str, handler: H) -> Result<&mut Route, Error>
    where
        H: for<'a> Fn(HttpRequest, &'a mut HttpResponse, PathParams) -> BoxFuture<'a, Result<Reply, Error>>
            + Send
            + Sync
            + 'static,
    {
        self.map(&[HttpMethod::PATCH.as_str()], pattern, handler)
    }

    pub fn options<H>(&mut self, pattern: &str, handler: H) -> Result<&mut Route, Error>
    where
        H: for<'a> Fn(HttpRequest, &'a mut HttpResponse, PathParams) -> BoxFuture<'a, Result<Reply, Error>>
            + Send
            + Sync
            + 'static,
    {
        self.map(&[HttpMethod::OPTIONS.as_str()], pattern, handler)
    }

    /// Register a route that answers every method.
    pub fn any<H>(&mut self, pattern: &str, handler: H) -> Result<&mut Route, Error>
    where
        H: for<'a> Fn(HttpRequest, &'a mut HttpResponse, PathParams) -> BoxFuture<'a, Result<Reply, Error>>
            + Send
            + Sync
            + 'static,
    {
        self.map(&[], pattern, handler)
    }

    // ========== Groups ==========

    /// Open a group; returns the new depth of the group stack.
    pub fn push_group(&mut self, prefix: &str, middleware: Vec<Arc<dyn Middleware>>) -> usize {
        self.groups
            .push(RouteGroup::new(prefix).with_middleware(middleware));
        trace!(prefix = prefix, depth = self.groups.len(), "Route group pushed");
        self.groups.len()
    }

    /// Close the innermost group. Returns `false` if none was open.
    pub fn pop_group(&mut self) -> bool {
        let popped = self.groups.pop();
        trace!(popped = popped.is_some(), depth = self.groups.len(), "Route group popped");
        popped.is_some()
    }

    /// Register routes inside a group for the duration of `f`.
    ///
    /// The group is closed again even when `f` fails.
    pub fn group<F>(
        &mut self,
        prefix: &str,
        middleware: Vec<Arc<dyn Middleware>>,
        f: F,
    ) -> Result<(), Error>
    where
        F: FnOnce(&mut Router) -> Result<(), Error>,
    {
        self.push_group(prefix, middleware);
        let result = f(self);
        self.pop_group();
        result
    }

    pub fn group_depth(&self) -> usize {
        self.groups.len()
    }

    // ========== Dispatch ==========

    /// Match `path` and `method` against the route table.
    ///
    /// The indexed slot for `path` is tried first, so a static pattern wins
    /// over a placeholder that also matches. Every other route whose pattern
    /// matches is then tried in registration order.
    ///
    /// A path that matches some pattern never yields `Unknown`: it is
    /// `MethodNotAllowed` when no matching route takes the method, or
    /// `NotAcceptable` when the ones that do all fail the `Accept` check.
    pub fn dispatch(&self, path: &str, method: &str, accept: Option<&str>) -> Dispatch<'_> {
        let accept = accept.map(Accept::parse);
        let mut near = NearMatch::default();

        let indexed: &[usize] = match self.matcher.at(path) {
            Ok(matched) => {
                let params: PathParams = matched
                    .params
                    .iter()
                    .map(|(key, value)| (key.to_string(), decode_param(value)))
                    .collect();
                let slot = &self.slots[*matched.value];
                for &index in slot {
                    let route = &self.routes[index];
                    if let Some(found) = near.try_route(route, method, accept.as_ref(), &params) {
                        return found.logged(path, method);
                    }
                }
                slot.as_slice()
            }
            Err(_) => &[],
        };

        for (index, route) in self.routes.iter().enumerate() {
            if indexed.contains(&index) {
                continue;
            }
            let Some(params) = route.match_path(path) else {
                continue;
            };
            if let Some(found) = near.try_route(route, method, accept.as_ref(), &params) {
                return found.logged(path, method);
            }
        }

        near.into_dispatch().logged(path, method)
    }

    /// [`dispatch`](Self::dispatch) using the request's path, method and
    /// `Accept` header.
    pub fn dispatch_request(&self, request: &HttpRequest) -> Dispatch<'_> {
        self.dispatch(request.path_only(), &request.method, request.header("accept"))
    }

    // ========== URL generation ==========

    /// Build the path of a named route.
    ///
    /// ```
    /// use trellis_core::{Reply, Router};
    ///
    /// let mut router = Router::new();
    /// router
    ///     .map_named("profile", &["GET"], "/users/{id}", |_req, _res, _params| {
    ///         Box::pin(async { Ok(Reply::Empty) })
    ///     })
    ///     .unwrap();
    ///
    /// assert_eq!(router.url_for("profile", [("id", 42)]).unwrap(), "/users/42");
    /// ```
    pub fn url_for<I, K, V>(&self, name: &str, data: I) -> Result<String, Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: ToString,
    {
        let route = self
            .route_by_name(name)
            .ok_or_else(|| Error::RouteNotFound(name.to_string()))?;

        let data: HashMap<String, String> = data
            .into_iter()
            .map(|(key, value)| (key.into(), value.to_string()))
            .collect();

        route.generate(&data)
    }

    /// [`url_for`](Self::url_for) plus a form-encoded query string.
    ///
    /// `query` is anything `serde_urlencoded` can serialize: a slice of
    /// pairs, a map, or a flat struct. An empty query adds nothing.
    pub fn url_for_with_query<I, K, V, Q>(&self, name: &str, data: I, query: &Q) -> Result<String, Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: ToString,
        Q: Serialize + ?Sized,
    {
        let mut url = self.url_for(name, data)?;

        let query = serde_urlencoded::to_string(query)
            .map_err(|err| Error::Serialization(err.to_string()))?;
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query);
        }

        Ok(url)
    }

    // ========== Accessors ==========

    pub fn route_by_name(&self, name: &str) -> Option<&Route> {
        self.names.get(name).map(|&index| &self.routes[index])
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

/// Near-miss bookkeeping across the routes whose pattern matched.
#[derive(Default)]
struct NearMatch {
    params: Option<PathParams>,
    allowed_methods: Vec<String>,
    failed_accept: bool,
}

impl NearMatch {
    fn try_route<'r>(
        &mut self,
        route: &'r Route,
        method: &str,
        accept: Option<&Accept>,
        params: &PathParams,
    ) -> Option<Dispatch<'r>> {
        if self.params.is_none() {
            self.params = Some(params.clone());
        }

        if !route.allows_method(method) {
            for allowed in route.methods() {
                if !self.allowed_methods.contains(allowed) {
                    self.allowed_methods.push(allowed.clone());
                }
            }
            return None;
        }

        if !route.is_acceptable(accept) {
            self.failed_accept = true;
            return None;
        }

        Some(Dispatch {
            outcome: DispatchOutcome::Found,
            route: Some(route),
            params: params.clone(),
            allowed_methods: route.methods().to_vec(),
        })
    }

    fn into_dispatch<'r>(self) -> Dispatch<'r> {
        let Some(params) = self.params else {
            return Dispatch::unknown();
        };

        let outcome = if self.failed_accept {
            DispatchOutcome::NotAcceptable
        } else {
            DispatchOutcome::MethodNotAllowed
        };

        Dispatch {
            outcome,
            route: None,
            params,
            allowed_methods: self.allowed_methods,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(
        _req: HttpRequest,
        _res: &mut HttpResponse,
        _params: PathParams,
    ) -> BoxFuture<'_, Result<Reply, Error>> {
        Box::pin(async { Ok(Reply::Empty) })
    }

    #[test]
    fn test_outcome_names() {
        assert_eq!(DispatchOutcome::Found.to_string(), "FOUND");
        assert_eq!(DispatchOutcome::MethodNotAllowed.as_str(), "METHOD_NOT_ALLOWED");
        assert_eq!(DispatchOutcome::NotAcceptable.as_str(), "NOT_ACCEPTABLE");
        assert_eq!(DispatchOutcome::Unknown.as_str(), "UNKNOWN");
    }

    #[test]
    fn test_same_pattern_shares_slot() {
        let mut router = Router::new();
        router.get("/items", noop).unwrap();
        router.post("/items", noop).unwrap();

        assert_eq!(router.len(), 2);
        assert_eq!(router.slots.len(), 1);
        assert_eq!(router.slots[0], vec![0, 1]);
    }

    #[test]
    fn test_failed_registration_leaves_table_untouched() {
        let mut router = Router::new();
        router.get("/users/{id}", noop).unwrap();

        let err = router.get("/users/{id", noop).unwrap_err();
        assert!(matches!(err, Error::InvalidPattern(_)));
        assert_eq!(router.len(), 1);
        assert_eq!(router.slots.len(), 1);
    }

    #[test]
    fn test_overlapping_placeholders_still_register() {
        let mut router = Router::new();
        router.get("/users/{id}", noop).unwrap();
        router.map_named("rename", &["PATCH"], "/users/{name}", noop).unwrap();

        assert_eq!(router.len(), 2);

        let dispatch = router.dispatch("/users/ada", "PATCH", None);
        assert_eq!(dispatch.route.and_then(Route::name), Some("rename"));
        assert_eq!(dispatch.params["name"], "ada");
    }

    #[test]
    fn test_duplicate_name() {
        let mut router = Router::new();
        router.map_named("home", &["GET"], "/", noop).unwrap();
        let err = router.map_named("home", &["GET"], "/other", noop).unwrap_err();
        assert!(matches!(err, Error::DuplicateRouteName(name) if name == "home"));
        assert!(router.route_by_name("home").is_some());
    }

    #[test]
    fn test_first_registered_route_wins() {
        let mut router = Router::new();
        router.map_named("first", &["GET"], "/dup", noop).unwrap();
        router.map_named("second", &["GET"], "/dup", noop).unwrap();

        let dispatch = router.dispatch("/dup", "GET", None);
        assert_eq!(dispatch.route.and_then(Route::name), Some("first"));
    }

    #[test]
    fn test_any_matches_every_method() {
        let mut router = Router::new();
        router.any("/ping", noop).unwrap();
        assert!(router.dispatch("/ping", "PURGE", None).is_found());
    }
}
