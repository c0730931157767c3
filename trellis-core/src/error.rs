// Error types for the Trellis framework

use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid route pattern: {0}")]
    InvalidPattern(String),

    #[error("Duplicate route name: {0}")]
    DuplicateRouteName(String),

    #[error("Route not found: {0}")]
    RouteNotFound(String),

    #[error("Missing path data: {0}")]
    MissingPathData(String),

    #[error("Handler failure: {0}")]
    HandlerFailure(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Wrap an arbitrary failure raised by a handler or middleware layer.
    pub fn handler(err: impl fmt::Display) -> Self {
        Error::HandlerFailure(err.to_string())
    }

    /// True for failures raised while registering routes.
    pub fn is_registration_error(&self) -> bool {
        matches!(self, Error::InvalidPattern(_) | Error::DuplicateRouteName(_))
    }
}
