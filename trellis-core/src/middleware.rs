// Middleware system for request/response processing

use crate::logging::{debug, trace};
use crate::output::{OutputCapture, reconcile};
use crate::{Error, HttpRequest, HttpResponse, Reply};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::sync::Arc;

/// The innermost call of a middleware chain.
#[async_trait]
pub trait Endpoint: Send + Sync {
    async fn call(&self, req: HttpRequest, res: &mut HttpResponse) -> Result<Reply, Error>;
}

/// A layer wrapped around the next layer of the chain.
///
/// A middleware may act before and after `next.run(..)`, or skip the call
/// entirely to short-circuit everything inside it.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(
        &self,
        req: HttpRequest,
        res: &mut HttpResponse,
        next: Next<'_>,
    ) -> Result<Reply, Error>;
}

/// The rest of the chain, handed to each middleware.
///
/// Consumed by [`run`](Next::run), so a layer can continue the chain at most
/// once.
pub struct Next<'a> {
    stack: &'a [Arc<dyn Middleware>],
    endpoint: &'a dyn Endpoint,
}

impl<'a> Next<'a> {
    pub(crate) fn new(stack: &'a [Arc<dyn Middleware>], endpoint: &'a dyn Endpoint) -> Self {
        Self { stack, endpoint }
    }

    /// Number of middleware layers still ahead of the endpoint.
    pub fn remaining(&self) -> usize {
        self.stack.len()
    }

    /// Invoke the next layer.
    pub async fn run(self, req: HttpRequest, res: &mut HttpResponse) -> Result<Reply, Error> {
        match self.stack.split_first() {
            Some((middleware, rest)) => {
                trace!(remaining = rest.len(), "Executing middleware");
                let next = Next::new(rest, self.endpoint);
                middleware.handle(req, res, next).await
            }
            None => {
                trace!("Middleware chain complete, calling handler");
                self.endpoint.call(req, res).await
            }
        }
    }
}

/// Ordered middleware stack; the first entry is the outermost layer.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a middleware to the chain
    pub fn use_middleware<M: Middleware + 'static>(&mut self, middleware: M) {
        self.middlewares.push(Arc::new(middleware));
    }

    /// Add a shared middleware to the chain
    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    /// Put a middleware outside every layer added so far.
    pub fn push_outermost(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.insert(0, middleware);
    }

    pub fn extend<I: IntoIterator<Item = Arc<dyn Middleware>>>(&mut self, middlewares: I) {
        self.middlewares.extend(middlewares);
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    pub fn as_slice(&self) -> &[Arc<dyn Middleware>] {
        &self.middlewares
    }

    /// Execute the chain around `endpoint` and return the final response.
    ///
    /// The outermost layer's reply is folded into `res` the same way every
    /// other reply is: a response replaces it, text is appended.
    pub async fn apply(
        &self,
        req: HttpRequest,
        mut res: HttpResponse,
        endpoint: &dyn Endpoint,
    ) -> Result<HttpResponse, Error> {
        debug!(
            middleware_count = self.middlewares.len(),
            path = %req.path,
            method = %req.method,
            "Executing middleware chain"
        );
        let reply = Next::new(&self.middlewares, endpoint)
            .run(req, &mut res)
            .await?;
        Ok(reply.apply_to(res))
    }
}

// ========== Closure Middleware ==========

/// Middleware built from a closure, see [`middleware_fn`].
pub struct FnMiddleware<F> {
    f: F,
}

/// Build a middleware from a closure.
///
/// ```
/// use trellis_core::middleware_fn;
///
/// let stamp = middleware_fn(|req, res, next| {
///     Box::pin(async move {
///         let reply = next.run(req, res).await?;
///         res.headers.insert("X-Stamp".into(), "1".into());
///         Ok(reply)
///     })
/// });
/// # let _ = stamp;
/// ```
pub fn middleware_fn<F>(f: F) -> FnMiddleware<F>
where
    F: for<'a> Fn(HttpRequest, &'a mut HttpResponse, Next<'a>) -> BoxFuture<'a, Result<Reply, Error>>
        + Send
        + Sync
        + 'static,
{
    FnMiddleware { f }
}

#[async_trait]
impl<F> Middleware for FnMiddleware<F>
where
    F: for<'a> Fn(HttpRequest, &'a mut HttpResponse, Next<'a>) -> BoxFuture<'a, Result<Reply, Error>>
        + Send
        + Sync
        + 'static,
{
    async fn handle(
        &self,
        req: HttpRequest,
        res: &mut HttpResponse,
        next: Next<'_>,
    ) -> Result<Reply, Error> {
        (self.f)(req, res, next).await
    }
}

// ========== Built-in Middleware ==========

/// Output buffering middleware
///
/// Captures implicit output produced by the inner layers and merges it, and
/// the inner reply, into the working response. See [`reconcile`] for the
/// merge order. On failure the captured output is discarded and the error
/// is passed through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputBuffer;

#[async_trait]
impl Middleware for OutputBuffer {
    async fn handle(
        &self,
        mut req: HttpRequest,
        res: &mut HttpResponse,
        next: Next<'_>,
    ) -> Result<Reply, Error> {
        let capture = OutputCapture::begin(&mut req);

        match next.run(req, res).await {
            Ok(reply) => {
                let captured = capture.finish();
                reconcile(res, reply, &captured);
                Ok(Reply::Empty)
            }
            Err(err) => {
                capture.discard();
                debug!(error = %err, "Inner layer failed, output buffer discarded");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Echo(&'static str);

    #[async_trait]
    impl Endpoint for Echo {
        async fn call(&self, req: HttpRequest, _res: &mut HttpResponse) -> Result<Reply, Error> {
            req.echo(self.0);
            Ok(Reply::Empty)
        }
    }

    struct Record {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Middleware for Record {
        async fn handle(
            &self,
            req: HttpRequest,
            res: &mut HttpResponse,
            next: Next<'_>,
        ) -> Result<Reply, Error> {
            self.log.lock().push(format!("{}-before", self.name));
            let reply = next.run(req, res).await;
            self.log.lock().push(format!("{}-after", self.name));
            reply
        }
    }

    fn request() -> HttpRequest {
        HttpRequest::new("GET".to_string(), "/".to_string())
    }

    #[tokio::test]
    async fn test_output_buffer_collects_endpoint_output() {
        let mut chain = MiddlewareChain::new();
        chain.use_middleware(OutputBuffer);
        let res = chain
            .apply(request(), HttpResponse::ok(), &Echo("hi"))
            .await
            .unwrap();
        assert_eq!(res.body_text(), "hi");
    }

    #[tokio::test]
    async fn test_chain_nesting_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = MiddlewareChain::new();
        chain.use_middleware(Record { name: "a", log: log.clone() });
        chain.use_middleware(Record { name: "b", log: log.clone() });

        chain
            .apply(request(), HttpResponse::ok(), &Echo(""))
            .await
            .unwrap();

        assert_eq!(
            *log.lock(),
            vec!["a-before", "b-before", "b-after", "a-after"]
        );
    }

    #[tokio::test]
    async fn test_push_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = MiddlewareChain::new();
        chain.use_middleware(Record { name: "inner", log: log.clone() });
        chain.push_outermost(Arc::new(Record { name: "outer", log: log.clone() }));

        assert_eq!(chain.len(), 2);
        chain
            .apply(request(), HttpResponse::ok(), &Echo(""))
            .await
            .unwrap();
        assert_eq!(log.lock()[0], "outer-before");
    }

    #[tokio::test]
    async fn test_output_buffer_discards_on_failure() {
        struct Fails;

        #[async_trait]
        impl Endpoint for Fails {
            async fn call(&self, req: HttpRequest, _res: &mut HttpResponse) -> Result<Reply, Error> {
                req.echo("partial");
                Err(Error::handler("boom"))
            }
        }

        let mut chain = MiddlewareChain::new();
        chain.use_middleware(OutputBuffer);
        let err = chain
            .apply(request(), HttpResponse::ok(), &Fails)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HandlerFailure(msg) if msg == "boom"));
    }
}
