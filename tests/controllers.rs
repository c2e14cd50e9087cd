use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use http::header::ALLOW;
use http::{Method, StatusCode};
use scopewire::middleware::{Compose, boxed, compose};
use scopewire::{
    Container, Context, ControllerSource, Error, Factory, FactoryKind, Inject, Invoke, Lifetime,
    MethodTable, Next, Request, ResolverOptions, RouteOptions, Verb, as_class, as_function, controller,
    create_controller, create_controller_with, inject, load_controllers, make_function_invoker,
    scope_per_request, submit_controller,
};

static NEXT_ID: AtomicUsize = AtomicUsize::new(1);

fn next_id() -> usize {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Scoped: one per request.
struct Session {
    id: usize,
}

impl Inject for Session {
    fn construct(_: &Container) -> Result<Self, Error> {
        Ok(Session { id: next_id() })
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Seen {
    instance: usize,
    session: usize,
    shared_session: bool,
}

/// Transient: one per invocation.
struct ItemsApi {
    id: usize,
    session: Arc<Session>,
}

impl Inject for ItemsApi {
    fn construct(cx: &Container) -> Result<Self, Error> {
        Ok(ItemsApi { id: next_id(), session: cx.resolve()? })
    }
}

impl Invoke for ItemsApi {
    fn methods() -> MethodTable<Self> {
        MethodTable::new().method("list", Self::list).method("find", Self::find)
    }
}

impl ItemsApi {
    async fn list(self: Arc<Self>, ctx: Context, _next: Next) -> Result<(), Error> {
        let again = ctx.scope().ok_or(Error::MissingScope("list".into()))?.resolve::<Session>()?;
        ctx.insert_state(Seen {
            instance: self.id,
            session: self.session.id,
            shared_session: Arc::ptr_eq(&again, &self.session),
        });
        ctx.respond(r#"[{"id":1}]"#);
        Ok(())
    }

    async fn find(self: Arc<Self>, ctx: Context, next: Next) -> Result<(), Error> {
        let id = ctx.param("id").unwrap_or_default();
        ctx.respond(format!(r#"{{"id":{id}}}"#));
        next.run().await
    }
}

fn root() -> Container {
    Container::builder().register(as_class::<Session>().lifetime(Lifetime::Scoped)).build()
}

async fn auth(ctx: Context, next: Next) -> Result<(), Error> {
    if ctx.header("authorization").is_none() {
        ctx.respond(StatusCode::UNAUTHORIZED);
        return Ok(());
    }
    next.run().await
}

fn app(routes: Compose) -> Compose {
    compose([boxed(scope_per_request(root())), boxed(routes)])
}

async fn send(app: &Compose, method: Method, path: &str, authorized: bool) -> Context {
    let mut headers = http::HeaderMap::new();
    if authorized {
        headers.insert("authorization", "Bearer t".parse().unwrap());
    }
    let ctx = Context::new(Request::new(method, path).with_headers(headers));
    app.run(ctx.clone()).await.unwrap();
    ctx
}

fn items() -> Compose {
    let api = create_controller::<ItemsApi>()
        .prefix("/items")
        .before(auth)
        .get("/", "list")
        .get("/:id", "find");
    controller([api]).unwrap()
}

#[tokio::test]
async fn get_items_runs_before_middleware_then_the_method() {
    let app = app(items());

    let ctx = send(&app, Method::GET, "/items", true).await;
    let res = ctx.take_response().unwrap();
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(res.body().as_ref(), br#"[{"id":1}]"#);

    let ctx = send(&app, Method::GET, "/items", false).await;
    assert_eq!(ctx.status(), Some(StatusCode::UNAUTHORIZED));
    assert_eq!(ctx.state::<Seen>(), None);
}

#[tokio::test]
async fn post_items_is_not_matched() {
    let ctx = send(&app(items()), Method::POST, "/items", true).await;
    let res = ctx.take_response().unwrap();

    assert_eq!(res.status_code(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(res.headers()[ALLOW], "HEAD, GET");
    assert!(res.body().is_empty());
}

#[tokio::test]
async fn path_params_reach_the_method() {
    let ctx = send(&app(items()), Method::GET, "/items/42", true).await;
    assert_eq!(ctx.take_response().unwrap().body().as_ref(), br#"{"id":42}"#);
}

#[tokio::test]
async fn each_invocation_gets_a_distinct_instance_and_each_request_a_distinct_scope() {
    let app = app(items());

    let first = send(&app, Method::GET, "/items", true).await.state::<Seen>().unwrap();
    let second = send(&app, Method::GET, "/items", true).await.state::<Seen>().unwrap();

    assert_ne!(first.instance, second.instance);
    assert_ne!(first.session, second.session);
    assert!(first.shared_session && second.shared_session);
}

#[tokio::test]
async fn methods_fail_without_scope_per_request() {
    let mut headers = http::HeaderMap::new();
    headers.insert("authorization", "Bearer t".parse().unwrap());
    let ctx = Context::new(Request::new(Method::GET, "/items/1").with_headers(headers));
    let err = items().run(ctx).await.unwrap_err();

    assert!(matches!(err, Error::MissingScope(ref target) if target.ends_with("ItemsApi::find")));
}

#[tokio::test]
async fn route_middleware_wraps_inside_controller_middleware() {
    #[derive(Clone, Default)]
    struct Trail(Arc<std::sync::Mutex<Vec<&'static str>>>);

    fn mark(label: &'static str) -> impl scopewire::Middleware {
        move |ctx: Context, next: Next| async move {
            if let Some(trail) = ctx.state::<Trail>() {
                trail.0.lock().unwrap().push(label);
            }
            next.run().await
        }
    }

    let api = create_controller::<ItemsApi>()
        .before(mark("class before"))
        .after(mark("class after"))
        .route(
            [Verb::Get],
            "/items/:id",
            "find",
            RouteOptions::new().before(mark("route before")).after(mark("route after")),
        );
    let app = app(controller([api]).unwrap());

    let trail = Trail::default();
    let ctx = Context::new(Request::new(Method::GET, "/items/3"));
    ctx.insert_state(trail.clone());
    app.run(ctx).await.unwrap();

    assert_eq!(
        *trail.0.lock().unwrap(),
        ["class before", "route before", "route after", "class after"]
    );
}

#[tokio::test]
async fn every_verb_is_bound_to_every_path() {
    let api = create_controller::<ItemsApi>()
        .route([Verb::Get, Verb::Put], "/a/:id", "find", RouteOptions::new())
        .route([Verb::Get], "/b/:id", "find", RouteOptions::new());
    let app = app(controller([api]).unwrap());

    for (method, path) in [
        (Method::GET, "/a/1"),
        (Method::PUT, "/a/1"),
        (Method::GET, "/b/1"),
        (Method::PUT, "/b/1"),
    ] {
        let ctx = send(&app, method.clone(), path, true).await;
        assert_eq!(ctx.status(), Some(StatusCode::OK), "{method} {path}");
    }
}

#[tokio::test]
async fn injected_middleware_is_resolved_per_request() {
    struct Stamp {
        session: Arc<Session>,
    }

    impl Inject for Stamp {
        fn construct(cx: &Container) -> Result<Self, Error> {
            Ok(Stamp { session: cx.resolve()? })
        }
    }

    impl scopewire::Middleware for Stamp {
        fn call(&self, ctx: Context, next: Next) -> scopewire::middleware::BoxFuture<'static, Result<(), Error>> {
            ctx.respond(format!("session {}", self.session.id));
            next.run()
        }
    }

    let app = compose([boxed(scope_per_request(root())), boxed(inject(as_class::<Stamp>()))]);

    let a = send(&app, Method::GET, "/", false).await.take_response().unwrap();
    let b = send(&app, Method::GET, "/", false).await.take_response().unwrap();
    assert_ne!(a.body(), b.body());

    let from_fn = Factory::function(|cx: &Container| Ok(Stamp { session: cx.resolve()? }));
    let app = compose([boxed(scope_per_request(root())), boxed(inject(from_fn))]);

    let res = send(&app, Method::GET, "/", false).await.take_response().unwrap();
    assert!(res.body().starts_with(b"session "));
}

/// Records which instance handled each step of a request.
#[derive(Clone, Default)]
struct Notes(Arc<std::sync::Mutex<Vec<usize>>>);

struct Tally {
    id: usize,
}

impl Invoke for Tally {
    fn methods() -> MethodTable<Self> {
        MethodTable::new().method("note", Self::note).method("done", Self::done)
    }
}

impl Tally {
    async fn note(self: Arc<Self>, ctx: Context, next: Next) -> Result<(), Error> {
        if let Some(notes) = ctx.state::<Notes>() {
            notes.0.lock().unwrap().push(self.id);
        }
        next.run().await
    }

    async fn done(self: Arc<Self>, ctx: Context, _next: Next) -> Result<(), Error> {
        if let Some(notes) = ctx.state::<Notes>() {
            notes.0.lock().unwrap().push(self.id);
        }
        ctx.respond("done");
        Ok(())
    }
}

async fn notes(app: &Compose) -> Vec<usize> {
    let notes = Notes::default();
    let ctx = Context::new(Request::new(Method::GET, "/tally"));
    ctx.insert_state(notes.clone());
    app.run(ctx).await.unwrap();
    let seen = notes.0.lock().unwrap().clone();
    seen
}

#[tokio::test]
async fn scoped_invokers_share_one_instance_per_request() {
    let invoker = make_function_invoker(|_| Ok(Tally { id: next_id() }))
        .with_options(ResolverOptions::new().lifetime(Lifetime::Scoped));
    let app = compose([
        boxed(scope_per_request(root())),
        boxed(invoker.method("note").unwrap()),
        boxed(invoker.method("done").unwrap()),
    ]);

    let first = notes(&app).await;
    let second = notes(&app).await;

    assert_eq!(first.len(), 2);
    assert_eq!(first[0], first[1]);
    assert_eq!(second[0], second[1]);
    assert_ne!(first[0], second[0]);
}

#[tokio::test]
async fn transient_invokers_build_per_invocation() {
    let invoker = make_function_invoker(|_| Ok(Tally { id: next_id() }));
    let app = compose([
        boxed(scope_per_request(root())),
        boxed(invoker.method("note").unwrap()),
        boxed(invoker.method("done").unwrap()),
    ]);

    let seen = notes(&app).await;
    assert_eq!(seen.len(), 2);
    assert_ne!(seen[0], seen[1]);
}

#[tokio::test]
async fn controllers_accept_scoped_function_resolvers() {
    let builds = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&builds);
    let resolver = as_function(move |_| {
        counted.fetch_add(1, Ordering::SeqCst);
        Ok(Tally { id: next_id() })
    })
    .lifetime(Lifetime::Scoped);
    assert_eq!(resolver.kind(), FactoryKind::Function);

    // Both methods answer the same route; `note` passes on to `done`.
    let api = create_controller_with(resolver).get("/tally", "note").get("/tally", "done");
    let app = app(controller([api]).unwrap());

    let first = notes(&app).await;
    let second = notes(&app).await;

    assert_eq!(first.len(), 2);
    assert_eq!(first[0], first[1]);
    assert_ne!(first[0], second[0]);
    assert_eq!(builds.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn controllers_sharing_a_route_run_in_order() {
    let items = create_controller::<ItemsApi>().get("/shared/:id", "find");
    let tally = create_controller_with(as_function(|_| Ok(Tally { id: next_id() }))).get("/shared/:id", "done");
    let sources: [Box<dyn ControllerSource>; 2] = [Box::new(items), Box::new(tally)];
    let app = app(controller(sources).unwrap());

    let ctx = send(&app, Method::GET, "/shared/1", false).await;
    assert_eq!(ctx.take_response().unwrap().body().as_ref(), b"done");
}

mod discovered {
    use super::*;

    fn items() -> Box<dyn ControllerSource> {
        Box::new(create_controller::<ItemsApi>().prefix("/found").get("/:id", "find"))
    }

    submit_controller!(items);
}

#[tokio::test]
async fn submitted_controllers_are_loaded_by_module_pattern() {
    let found = app(load_controllers("controllers::disc*").unwrap());
    let ctx = send(&found, Method::GET, "/found/5", true).await;
    assert_eq!(ctx.take_response().unwrap().body().as_ref(), br#"{"id":5}"#);

    let other = app(load_controllers("elsewhere::*").unwrap());
    let ctx = send(&other, Method::GET, "/found/5", true).await;
    assert_eq!(ctx.status(), None);
}
