//! Integration tests for the service locator

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use trellis_core::*;

/// A locator backed by a plain map, standing in for a third-party container.
#[derive(Default)]
struct MapLocator {
    services: HashMap<String, Service>,
}

impl MapLocator {
    fn with(mut self, id: &str, service: Service) -> Self {
        self.services.insert(id.to_string(), service);
        self
    }
}

impl ServiceLocator for MapLocator {
    fn get(&self, id: &str) -> Result<Service, Error> {
        self.services
            .get(id)
            .cloned()
            .ok_or_else(|| Error::ServiceNotFound(id.to_string()))
    }

    fn has(&self, id: &str) -> bool {
        self.services.contains_key(id)
    }
}

#[test]
fn test_container_register_replaces() {
    let container = Container::new();
    container.register("greeting", "hello".to_string());
    container.register("greeting", "bonjour".to_string());

    assert_eq!(container.len(), 1);
    assert_eq!(*container.resolve::<String>("greeting").unwrap(), "bonjour");
}

#[test]
fn test_composite_over_custom_locator() {
    let locator = MapLocator::default()
        .with(SETTINGS, Arc::new(json!({ "httpVersion": "1.0" })))
        .with("db", Arc::new(5u16));
    let composite = CompositeContainer::new(locator);

    assert_eq!(composite.settings().unwrap().http_version, "1.0");
    assert_eq!(*resolve_service::<u16, _>(&composite, "db").unwrap(), 5);
    assert!(composite.inner().has("db"));
}

#[test]
fn test_composite_accepts_ready_settings() {
    let settings = Settings {
        determine_route_before_app_middleware: true,
        ..Settings::default()
    };
    let locator = MapLocator::default().with(SETTINGS, Arc::new(settings));
    let composite = CompositeContainer::new(locator);

    assert!(composite.settings().unwrap().determine_route_before_app_middleware);
}

#[test]
fn test_composite_settings_follow_wrapped_updates() {
    let inner = Container::new();
    inner.register(SETTINGS, json!({ "httpVersion": "1.0" }));
    let composite = CompositeContainer::new(inner.clone());
    assert_eq!(composite.settings().unwrap().http_version, "1.0");

    inner.register(SETTINGS, json!({ "httpVersion": "2", "outputBuffering": "off" }));
    let settings = resolve_service::<Settings, _>(&composite, SETTINGS).unwrap();
    assert_eq!(settings.http_version, "2");
    assert_eq!(settings.output_buffering, OutputBuffering::Off);
}

#[test]
fn test_composite_unknown_service() {
    let composite = CompositeContainer::new(MapLocator::default());
    assert!(!composite.has("mailer"));
    assert!(matches!(
        composite.get("mailer"),
        Err(Error::ServiceNotFound(id)) if id == "mailer"
    ));
}

#[test]
fn test_response_prototype_uses_settings_version() {
    let locator = MapLocator::default().with(SETTINGS, Arc::new(json!({ "httpVersion": "2" })));
    let composite = CompositeContainer::new(locator);

    let response = resolve_service::<HttpResponse, _>(&composite, RESPONSE).unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.protocol_version, "2");
    assert_eq!(response.header("Content-Type"), Some("text/html"));
}
