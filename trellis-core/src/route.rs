//! Routes and the route factory
//!
//! A [`Route`] binds a URL pattern and a set of methods to a handler and an
//! ordered middleware stack. Running a route walks the stack with the
//! handler as the innermost call.

use crate::content_negotiation::{Accept, MediaType};
use crate::logging::trace;
use crate::middleware::{Endpoint, Middleware, MiddlewareChain};
use crate::output::{OutputCapture, reconcile};
use crate::{Error, HttpRequest, HttpResponse, PathParams, Reply};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A type-erased route handler.
///
/// Receives the request, the working response and the resolved path
/// parameters.
pub type HandlerFn = Arc<
    dyn for<'a> Fn(HttpRequest, &'a mut HttpResponse, PathParams) -> BoxFuture<'a, Result<Reply, Error>>
        + Send
        + Sync,
>;

/// Erase a handler closure into a [`HandlerFn`].
pub fn handler_fn<H>(handler: H) -> HandlerFn
where
    H: for<'a> Fn(HttpRequest, &'a mut HttpResponse, PathParams) -> BoxFuture<'a, Result<Reply, Error>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(handler)
}

/// One piece of a parsed route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    /// `{name}`
    Param(String),
    /// `{*name}`, only valid at the end of a pattern
    CatchAll(String),
}

/// Parse a route pattern into segments.
///
/// `{{` and `}}` are literal braces.
pub fn parse_pattern(pattern: &str) -> Result<Vec<Segment>, Error> {
    let invalid = |reason: &str| Error::InvalidPattern(format!("{}: {}", pattern, reason));

    if !pattern.starts_with('/') {
        return Err(invalid("must start with '/'"));
    }

    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '}' => return Err(invalid("unmatched '}'")),
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some('{') | None => return Err(invalid("unclosed placeholder")),
                        Some('/') => return Err(invalid("placeholder spans a '/'")),
                        Some(ch) => name.push(ch),
                    }
                }

                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }

                match name.strip_prefix('*') {
                    Some("") => return Err(invalid("empty catch-all name")),
                    Some(rest) => {
                        if chars.peek().is_some() {
                            return Err(invalid("catch-all must end the pattern"));
                        }
                        segments.push(Segment::CatchAll(rest.to_string()));
                    }
                    None if name.is_empty() => return Err(invalid("empty placeholder name")),
                    None => segments.push(Segment::Param(name)),
                }
            }
            other => literal.push(other),
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }

    Ok(segments)
}

// `{name}` takes at least one character and never a '/'. Longer captures
// are tried first so `{name}.{ext}` splits on the last dot.
fn match_segments(segments: &[Segment], path: &str, params: &mut PathParams) -> bool {
    let Some((first, rest)) = segments.split_first() else {
        return path.is_empty();
    };

    match first {
        Segment::Literal(text) => path
            .strip_prefix(text.as_str())
            .is_some_and(|tail| match_segments(rest, tail, params)),
        Segment::CatchAll(name) => {
            if path.is_empty() {
                return false;
            }
            params.insert(name.clone(), decode_param(path));
            true
        }
        Segment::Param(name) => {
            let limit = path.find('/').unwrap_or(path.len());
            for end in (1..=limit).rev() {
                if path.is_char_boundary(end) && match_segments(rest, &path[end..], params) {
                    params.insert(name.clone(), decode_param(&path[..end]));
                    return true;
                }
            }
            false
        }
    }
}

/// Percent-decode a captured path value. Values that do not decode to
/// UTF-8 are kept as sent.
pub(crate) fn decode_param(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

/// A registered route.
pub struct Route {
    name: Option<String>,
    pattern: String,
    segments: Vec<Segment>,
    methods: Vec<String>,
    accepts: Vec<MediaType>,
    handler: HandlerFn,
    middleware: MiddlewareChain,
}

impl Route {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The effective pattern, group prefixes included.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Allowed methods, upper-cased. Empty means any method.
    pub fn methods(&self) -> &[String] {
        &self.methods
    }

    pub fn middleware(&self) -> &MiddlewareChain {
        &self.middleware
    }

    /// Media types this route can produce. Empty means any.
    pub fn accepted_types(&self) -> &[MediaType] {
        &self.accepts
    }

    /// Append a middleware layer.
    ///
    /// Layers added later sit closer to the handler than earlier ones; group
    /// middleware seeded at registration is always outermost.
    pub fn add<M: Middleware + 'static>(&mut self, middleware: M) -> &mut Self {
        self.middleware.use_middleware(middleware);
        self
    }

    /// Append a shared middleware layer.
    pub fn add_middleware(&mut self, middleware: Arc<dyn Middleware>) -> &mut Self {
        self.middleware.push(middleware);
        self
    }

    /// Add an allowed method.
    pub fn add_method(&mut self, method: &str) -> &mut Self {
        let method = method.to_uppercase();
        if !self.methods.contains(&method) {
            self.methods.push(method);
        }
        self
    }

    /// Restrict the route to requests accepting one of `types`.
    /// Unparseable entries are ignored.
    pub fn accepts<I, S>(&mut self, types: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.accepts
            .extend(types.into_iter().filter_map(|t| MediaType::parse(t.as_ref())));
        self
    }

    pub fn allows_method(&self, method: &str) -> bool {
        self.methods.is_empty() || self.methods.iter().any(|m| m.eq_ignore_ascii_case(method))
    }

    /// Whether a request with the given `Accept` header can be served.
    /// No header, or no restriction on the route, always passes.
    pub fn is_acceptable(&self, accept: Option<&Accept>) -> bool {
        match accept {
            Some(accept) if !self.accepts.is_empty() => accept.accepts_any(&self.accepts),
            _ => true,
        }
    }

    /// Names of the placeholders in the pattern, in order.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Param(name) | Segment::CatchAll(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Match a request path (without query string) against the pattern.
    ///
    /// On success returns the placeholder values, percent-decoded.
    pub fn match_path(&self, path: &str) -> Option<PathParams> {
        let mut params = PathParams::new();
        match_segments(&self.segments, path, &mut params).then_some(params)
    }

    /// Run the middleware stack with this route's handler innermost.
    pub async fn run(&self, req: HttpRequest, res: HttpResponse) -> Result<HttpResponse, Error> {
        self.middleware.apply(req, res, self).await
    }

    /// Build a path from this route's pattern.
    ///
    /// Values are percent-encoded; catch-all values keep their `/`
    /// separators. Extra entries in `data` are ignored.
    pub fn generate(&self, data: &HashMap<String, String>) -> Result<String, Error> {
        let mut path = String::with_capacity(self.pattern.len());

        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => path.push_str(text),
                Segment::Param(name) => {
                    let value = self.lookup(data, name)?;
                    path.push_str(&urlencoding::encode(value));
                }
                Segment::CatchAll(name) => {
                    let value = self.lookup(data, name)?;
                    let encoded: Vec<_> = value
                        .split('/')
                        .map(|part| urlencoding::encode(part))
                        .collect();
                    path.push_str(&encoded.join("/"));
                }
            }
        }

        Ok(path)
    }

    fn lookup<'d>(&self, data: &'d HashMap<String, String>, name: &str) -> Result<&'d str, Error> {
        data.get(name).map(String::as_str).ok_or_else(|| {
            Error::MissingPathData(format!(
                "route {} needs a value for {{{}}}",
                self.name.as_deref().unwrap_or(&self.pattern),
                name
            ))
        })
    }
}

#[async_trait]
impl Endpoint for Route {
    async fn call(&self, mut req: HttpRequest, res: &mut HttpResponse) -> Result<Reply, Error> {
        let capture = OutputCapture::begin(&mut req);
        let params = req.path_params.clone();

        trace!(pattern = %self.pattern, "Invoking route handler");
        match (self.handler)(req, res, params).await {
            Ok(reply) => {
                let captured = capture.finish();
                reconcile(res, reply, &captured);
                Ok(Reply::Empty)
            }
            Err(err) => {
                capture.discard();
                Err(err)
            }
        }
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("name", &self.name)
            .field("pattern", &self.pattern)
            .field("methods", &self.methods)
            .field("accepts", &self.accepts)
            .field("middleware", &self.middleware.len())
            .finish()
    }
}

/// Builds [`Route`] values.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteFactory;

impl RouteFactory {
    pub fn new() -> Self {
        Self
    }

    /// Create a route with no methods and an empty middleware stack.
    pub fn create(
        &self,
        name: Option<String>,
        pattern: &str,
        handler: HandlerFn,
    ) -> Result<Route, Error> {
        let segments = parse_pattern(pattern)?;

        Ok(Route {
            name,
            pattern: pattern.to_string(),
            segments,
            methods: Vec::new(),
            accepts: Vec::new(),
            handler,
            middleware: MiddlewareChain::new(),
        })
    }
}
