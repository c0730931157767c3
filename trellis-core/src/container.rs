// Service locator and the framework's default services

use crate::config::Settings;
use crate::logging::{debug, trace};
use crate::{Error, HttpResponse};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Id of the merged [`Settings`] service.
pub const SETTINGS: &str = "settings";
/// Id of the prototype [`HttpResponse`] each request starts from.
pub const RESPONSE: &str = "response";

/// A type-erased shared service.
pub type Service = Arc<dyn Any + Send + Sync>;

/// Looks up services by id.
pub trait ServiceLocator: Send + Sync {
    /// Fetch a service. Unknown ids fail with [`Error::ServiceNotFound`].
    fn get(&self, id: &str) -> Result<Service, Error>;

    fn has(&self, id: &str) -> bool;
}

/// Fetch a service and downcast it.
pub fn resolve_service<T, L>(locator: &L, id: &str) -> Result<Arc<T>, Error>
where
    T: Any + Send + Sync,
    L: ServiceLocator + ?Sized,
{
    locator.get(id)?.downcast::<T>().map_err(|_| {
        Error::ServiceNotFound(format!(
            "{} is not a {}",
            id,
            std::any::type_name::<T>()
        ))
    })
}

/// String-keyed service registry.
///
/// Cloning is cheap; clones share the same registry.
#[derive(Clone, Default)]
pub struct Container {
    services: Arc<RwLock<HashMap<String, Service>>>,
}

impl Container {
    pub fn new() -> Self {
        debug!("Creating new service container");
        Self::default()
    }

    /// Register a service instance, replacing any previous one with the same id.
    pub fn register<T: Any + Send + Sync>(&self, id: impl Into<String>, instance: T) {
        self.register_arc(id, Arc::new(instance));
    }

    /// Register an already shared service.
    pub fn register_arc(&self, id: impl Into<String>, instance: Service) {
        let id = id.into();
        trace!(service = %id, "Acquiring write lock for registration");
        let replaced = self.services.write().insert(id.clone(), instance).is_some();
        debug!(service = %id, replaced = replaced, "Service registered");
    }

    /// Resolve a service by id and type.
    pub fn resolve<T: Any + Send + Sync>(&self, id: &str) -> Result<Arc<T>, Error> {
        resolve_service(self, id)
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }

    /// Remove every service.
    pub fn clear(&self) {
        let mut services = self.services.write();
        let count = services.len();
        services.clear();
        debug!(service_count = count, "Cleared all services from container");
    }
}

impl ServiceLocator for Container {
    fn get(&self, id: &str) -> Result<Service, Error> {
        let found = self.services.read().get(id).cloned();
        trace!(service = id, found = found.is_some(), "Service lookup");
        found.ok_or_else(|| Error::ServiceNotFound(id.to_string()))
    }

    fn has(&self, id: &str) -> bool {
        self.services.read().contains_key(id)
    }
}

/// Wraps a locator and fills in the services the framework requires.
///
/// [`SETTINGS`] is the defaults merged with whatever the wrapped locator
/// stores under that id (a `serde_json::Value` object, or a ready
/// [`Settings`]). It is re-merged on every lookup, so later changes to the
/// wrapped entry are seen. [`RESPONSE`] comes from the wrapped locator when
/// present and otherwise defaults to `200`, `Content-Type: text/html` and
/// the configured protocol version; it is created on first use and shared
/// afterwards.
pub struct CompositeContainer<L = Container> {
    inner: L,
    response: OnceCell<Arc<HttpResponse>>,
}

impl<L: ServiceLocator> CompositeContainer<L> {
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            response: OnceCell::new(),
        }
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }

    pub fn settings(&self) -> Result<Arc<Settings>, Error> {
        self.build_settings().map(Arc::new)
    }

    /// The prototype response; clone it to start a request.
    pub fn default_response(&self) -> Result<Arc<HttpResponse>, Error> {
        self.response
            .get_or_try_init(|| self.build_response())
            .cloned()
    }

    fn build_settings(&self) -> Result<Settings, Error> {
        if !self.inner.has(SETTINGS) {
            debug!("No user settings, using defaults");
            return Ok(Settings::default());
        }

        let user = self.inner.get(SETTINGS)?;
        if let Some(value) = user.downcast_ref::<serde_json::Value>() {
            return Settings::merged(value);
        }
        if let Some(settings) = user.downcast_ref::<Settings>() {
            return Ok(settings.clone());
        }

        Err(Error::Config(
            "settings service must be a serde_json::Value or Settings".to_string(),
        ))
    }

    fn build_response(&self) -> Result<Arc<HttpResponse>, Error> {
        if self.inner.has(RESPONSE) {
            trace!("Using response prototype from wrapped locator");
            return resolve_service::<HttpResponse, _>(&self.inner, RESPONSE);
        }

        let settings = self.settings()?;
        Ok(Arc::new(
            HttpResponse::ok()
                .with_header("Content-Type", "text/html")
                .with_protocol_version(settings.http_version.clone()),
        ))
    }
}

impl Default for CompositeContainer<Container> {
    fn default() -> Self {
        Self::new(Container::new())
    }
}

impl<L: ServiceLocator> ServiceLocator for CompositeContainer<L> {
    fn get(&self, id: &str) -> Result<Service, Error> {
        let service: Service = match id {
            SETTINGS => self.settings()? as Service,
            RESPONSE => self.default_response()? as Service,
            _ => return self.inner.get(id),
        };
        Ok(service)
    }

    fn has(&self, id: &str) -> bool {
        matches!(id, SETTINGS | RESPONSE) || self.inner.has(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputBuffering;
    use serde_json::json;

    #[derive(Debug, PartialEq)]
    struct Mailer {
        host: String,
    }

    #[test]
    fn test_register_and_resolve() {
        let container = Container::new();
        container.register("mailer", Mailer { host: "smtp".into() });

        let mailer = container.resolve::<Mailer>("mailer").unwrap();
        assert_eq!(mailer.host, "smtp");
        assert!(container.has("mailer"));
        assert_eq!(container.len(), 1);
    }

    #[test]
    fn test_unknown_id() {
        let container = Container::new();
        let err = container.get("nope").unwrap_err();
        assert!(matches!(err, Error::ServiceNotFound(id) if id == "nope"));
    }

    #[test]
    fn test_resolve_wrong_type() {
        let container = Container::new();
        container.register("mailer", 42u32);
        assert!(matches!(
            container.resolve::<Mailer>("mailer"),
            Err(Error::ServiceNotFound(_))
        ));
    }

    #[test]
    fn test_clones_share_registry() {
        let container = Container::new();
        let clone = container.clone();
        clone.register("n", 1u8);
        assert!(container.has("n"));
        container.clear();
        assert!(clone.is_empty());
    }

    #[test]
    fn test_composite_defaults() {
        let composite = CompositeContainer::default();
        assert!(composite.has(SETTINGS));
        assert!(composite.has(RESPONSE));

        let settings = composite.settings().unwrap();
        assert_eq!(*settings, Settings::default());

        let response = composite.default_response().unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.header("content-type"), Some("text/html"));
        assert_eq!(response.protocol_version, "1.1");
    }

    #[test]
    fn test_composite_merges_user_settings() {
        let inner = Container::new();
        inner.register(SETTINGS, json!({ "httpVersion": "2", "outputBuffering": "off" }));
        let composite = CompositeContainer::new(inner);

        let settings = resolve_service::<Settings, _>(&composite, SETTINGS).unwrap();
        assert_eq!(settings.http_version, "2");
        assert_eq!(settings.output_buffering, OutputBuffering::Off);
        assert_eq!(composite.default_response().unwrap().protocol_version, "2");
    }

    #[test]
    fn test_composite_shares_created_services() {
        let composite = CompositeContainer::default();
        let first = composite.default_response().unwrap();
        let second = composite.default_response().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_composite_prefers_wrapped_response() {
        let inner = Container::new();
        inner.register(RESPONSE, HttpResponse::new(204));
        let composite = CompositeContainer::new(inner);
        assert_eq!(composite.default_response().unwrap().status, 204);
    }

    #[test]
    fn test_composite_delegates_other_ids() {
        let inner = Container::new();
        inner.register("mailer", Mailer { host: "smtp".into() });
        let composite = CompositeContainer::new(inner);

        assert!(composite.has("mailer"));
        assert!(!composite.has("db"));
        assert!(matches!(composite.get("db"), Err(Error::ServiceNotFound(_))));
    }

    #[test]
    fn test_composite_rejects_bad_settings() {
        let inner = Container::new();
        inner.register(SETTINGS, "not an object".to_string());
        let composite = CompositeContainer::new(inner);
        assert!(matches!(composite.settings(), Err(Error::Config(_))));
    }
}
