//! Application entry point
//!
//! [`App`] owns the service container, the router and the app-level
//! middleware stack. [`App::handle`] runs one request through all three.
//!
//! ```
//! use trellis_core::{App, HttpRequest, Reply};
//!
//! # tokio_test::block_on(async {
//! let mut app = App::new().unwrap();
//! app.router_mut()
//!     .get("/hello/{name}", |_req, _res, params| {
//!         Box::pin(async move { Ok(Reply::text(format!("Hello, {}", params["name"]))) })
//!     })
//!     .unwrap();
//!
//! let res = app
//!     .handle(HttpRequest::new("GET".into(), "/hello/world".into()))
//!     .await
//!     .unwrap();
//! assert_eq!(res.body_text(), "Hello, world");
//! # });
//! ```

use crate::config::{OutputBuffering, Settings};
use crate::container::{CompositeContainer, Container, ServiceLocator};
use crate::logging::{debug, info, warn};
use crate::middleware::{Endpoint, Middleware, MiddlewareChain, OutputBuffer};
use crate::routing::{Dispatch, DispatchOutcome, Router};
use crate::{Error, HttpRequest, HttpResponse, Reply};
use async_trait::async_trait;
use std::sync::Arc;

/// A routed application.
///
/// Set up with `&mut self` methods, then serve with [`handle`](Self::handle),
/// which only needs `&self`.
pub struct App<L: ServiceLocator = Container> {
    container: CompositeContainer<L>,
    router: Router,
    middleware: MiddlewareChain,
}

impl App<Container> {
    /// An app backed by an empty [`Container`] and default settings.
    pub fn new() -> Result<Self, Error> {
        Self::with_container(Container::new())
    }
}

impl<L: ServiceLocator> App<L> {
    /// Build an app around a user locator.
    ///
    /// Fails if the locator's settings do not merge cleanly.
    pub fn with_container(inner: L) -> Result<Self, Error> {
        let container = CompositeContainer::new(inner);
        let settings = container.settings()?;

        let mut middleware = MiddlewareChain::new();
        if settings.output_buffering == OutputBuffering::Append {
            middleware.use_middleware(OutputBuffer);
        }

        info!(
            http_version = %settings.http_version,
            output_buffering = ?settings.output_buffering,
            determine_route_before_app_middleware = settings.determine_route_before_app_middleware,
            "Application created"
        );

        Ok(Self {
            container,
            router: Router::new(),
            middleware,
        })
    }

    /// Add app-level middleware. Layers added later run inside earlier ones.
    pub fn add<M: Middleware + 'static>(&mut self, middleware: M) -> &mut Self {
        self.middleware.use_middleware(middleware);
        self
    }

    pub fn add_middleware(&mut self, middleware: Arc<dyn Middleware>) -> &mut Self {
        self.middleware.push(middleware);
        self
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn router_mut(&mut self) -> &mut Router {
        &mut self.router
    }

    pub fn container(&self) -> &CompositeContainer<L> {
        &self.container
    }

    pub fn settings(&self) -> Result<Arc<Settings>, Error> {
        self.container.settings()
    }

    /// Run a request through the app middleware, the router and the
    /// matched route.
    ///
    /// Unmatched requests are answered here (404, 405 with `Allow`, 406)
    /// rather than reported as errors. Handler and middleware failures are
    /// returned as `Err`.
    pub async fn handle(&self, mut req: HttpRequest) -> Result<HttpResponse, Error> {
        let settings = self.container.settings()?;
        let res = (*self.container.default_response()?).clone();

        if let Some(query) = req.query_string() {
            match serde_urlencoded::from_str::<Vec<(String, String)>>(query) {
                Ok(pairs) => req.query_params.extend(pairs),
                Err(err) => warn!(error = %err, "Ignoring malformed query string"),
            }
        }

        let resolved = if settings.determine_route_before_app_middleware {
            let dispatch = self.router.dispatch_request(&req);
            req.path_params = dispatch.params.clone();
            Some(dispatch)
        } else {
            None
        };

        let endpoint = DispatchEndpoint {
            router: &self.router,
            resolved,
        };
        self.middleware.apply(req, res, &endpoint).await
    }
}

/// Innermost app layer: dispatch, then run the route or answer the miss.
struct DispatchEndpoint<'r> {
    router: &'r Router,
    resolved: Option<Dispatch<'r>>,
}

#[async_trait]
impl<'r> Endpoint for DispatchEndpoint<'r> {
    async fn call(&self, mut req: HttpRequest, res: &mut HttpResponse) -> Result<Reply, Error> {
        let dispatch = match &self.resolved {
            Some(dispatch) => dispatch.clone(),
            None => self.router.dispatch_request(&req),
        };

        match (dispatch.outcome, dispatch.route) {
            (DispatchOutcome::Found, Some(route)) => {
                req.path_params = dispatch.params;
                let working = std::mem::take(res);
                *res = route.run(req, working).await?;
                Ok(Reply::Empty)
            }
            (DispatchOutcome::MethodNotAllowed, _) => {
                let allowed = dispatch.allowed_methods.join(", ");
                debug!(path = %req.path, method = %req.method, allowed = %allowed, "Method not allowed");
                res.status = 405;
                res.headers.insert("Allow".to_string(), allowed.clone());
                res.write(format!("Method not allowed. Must be one of: {}", allowed));
                Ok(Reply::Empty)
            }
            (DispatchOutcome::NotAcceptable, _) => {
                res.status = 406;
                res.write("Not Acceptable");
                Ok(Reply::Empty)
            }
            _ => {
                res.status = 404;
                res.write("Not Found");
                Ok(Reply::Empty)
            }
        }
    }
}
