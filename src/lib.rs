// Trellis - routing and middleware dispatch for small HTTP applications
//
// This library provides route groups, named routes with URL generation,
// per-route middleware stacks and request-scoped output capture.

// Re-export core functionality
pub use trellis_core::*;

pub use async_trait::async_trait;

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        App,
        Container,
        Error,
        HttpMethod,
        HttpRequest,
        HttpResponse,
        Middleware,
        MiddlewareChain,
        Next,
        OutputBuffer,
        PathParams,
        Reply,
        Route,
        RouteGroup,
        Router,
        ServiceLocator,
        Settings,
        async_trait,
        middleware_fn,
    };
}
