// Core library for the Trellis routing framework
// Routing, middleware dispatch, output buffering and the application shell

pub mod application;
pub mod config;
pub mod container;
pub mod content_negotiation;
pub mod error;
pub mod http;
pub mod logging;
pub mod middleware;
pub mod output;
pub mod route;
pub mod route_group;
pub mod routing;

// Re-export commonly used types
pub use application::App;
pub use config::{OutputBuffering, Settings};
pub use container::{
    CompositeContainer, Container, RESPONSE, SETTINGS, Service, ServiceLocator, resolve_service,
};
pub use content_negotiation::{Accept, MediaType};
pub use error::*;
pub use http::*;
pub use middleware::*;
pub use output::{OutputCapture, OutputSink, reconcile};
pub use route::{HandlerFn, Route, RouteFactory, Segment, handler_fn, parse_pattern};
pub use route_group::RouteGroup;
pub use routing::{Dispatch, DispatchOutcome, Router};
