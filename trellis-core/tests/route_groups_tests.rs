//! Integration tests for Route Groups

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::Arc;
use trellis_core::*;

type Log = Arc<Mutex<Vec<&'static str>>>;

struct Tag {
    name: &'static str,
    log: Log,
}

#[async_trait]
impl Middleware for Tag {
    async fn handle(
        &self,
        req: HttpRequest,
        res: &mut HttpResponse,
        next: Next<'_>,
    ) -> Result<Reply, Error> {
        self.log.lock().push(self.name);
        next.run(req, res).await
    }
}

fn tag(name: &'static str, log: &Log) -> Arc<dyn Middleware> {
    Arc::new(Tag {
        name,
        log: log.clone(),
    })
}

fn noop(
    _req: HttpRequest,
    _res: &mut HttpResponse,
    _params: PathParams,
) -> BoxFuture<'_, Result<Reply, Error>> {
    Box::pin(async { Ok(Reply::Empty) })
}

fn request(path: &str) -> HttpRequest {
    HttpRequest::new("GET".to_string(), path.to_string())
}

#[test]
fn test_group_prefix_concatenation() {
    let mut router = Router::new();
    router.push_group("/api", vec![]);
    router.push_group("/v1", vec![]);
    router.get("/users", noop).unwrap();
    router.pop_group();
    router.get("/status", noop).unwrap();
    router.pop_group();
    router.get("/", noop).unwrap();

    let patterns: Vec<_> = router.routes().iter().map(Route::pattern).collect();
    assert_eq!(patterns, vec!["/api/v1/users", "/api/status", "/"]);
}

#[test]
fn test_prefix_used_verbatim() {
    let mut router = Router::new();
    router.push_group("/api/", vec![]);
    router.get("items", noop).unwrap();
    assert_eq!(router.routes()[0].pattern(), "/api/items");
}

#[test]
fn test_push_and_pop_depth() {
    let mut router = Router::new();
    assert_eq!(router.push_group("/a", vec![]), 1);
    assert_eq!(router.push_group("/b", vec![]), 2);
    assert!(router.pop_group());
    assert!(router.pop_group());
    assert!(!router.pop_group());
    assert_eq!(router.group_depth(), 0);
}

#[test]
fn test_group_closure_pops_on_error() {
    let mut router = Router::new();
    let result = router.group("/broken", vec![], |r| {
        r.get("{unclosed", noop)?;
        Ok(())
    });

    assert!(matches!(result, Err(Error::InvalidPattern(_))));
    assert_eq!(router.group_depth(), 0);
}

#[tokio::test]
async fn test_group_middleware_order() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));

    let mut router = Router::new();
    router.push_group("/outer", vec![tag("g1", &log)]);
    router.push_group("/inner", vec![tag("g2", &log)]);
    router
        .get("/x", noop)
        .unwrap()
        .add_middleware(tag("route", &log));
    router.pop_group();
    router.pop_group();

    let route = router.dispatch("/outer/inner/x", "GET", None).route.unwrap();
    assert_eq!(route.middleware().len(), 3);

    route
        .run(request("/outer/inner/x"), HttpResponse::ok())
        .await
        .unwrap();
    assert_eq!(*log.lock(), vec!["g1", "g2", "route"]);
}

#[tokio::test]
async fn test_group_captured_at_registration() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));

    let mut router = Router::new();
    router.get("/before", noop).unwrap();
    router.push_group("", vec![tag("late", &log)]);
    router.get("/during", noop).unwrap();
    router.pop_group();
    router.get("/after", noop).unwrap();

    let lens: Vec<_> = router
        .routes()
        .iter()
        .map(|route| route.middleware().len())
        .collect();
    assert_eq!(lens, vec![0, 1, 0]);

    for path in ["/before", "/during", "/after"] {
        let route = router.dispatch(path, "GET", None).route.unwrap();
        route.run(request(path), HttpResponse::ok()).await.unwrap();
    }
    assert_eq!(*log.lock(), vec!["late"]);
}

#[test]
fn test_nested_group_helper() {
    let mut router = Router::new();
    router
        .group("/admin", vec![], |admin| {
            admin.get("/dashboard", noop)?;
            admin.group("/users", vec![], |users| {
                users.map_named("admin.user", &["GET"], "/{id}", noop)?;
                Ok(())
            })
        })
        .unwrap();

    assert!(router.dispatch("/admin/dashboard", "GET", None).is_found());
    assert_eq!(
        router.url_for("admin.user", [("id", 7)]).unwrap(),
        "/admin/users/7"
    );
}
