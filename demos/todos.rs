//! Todo list API with per-request scopes.
//!
//! Run with:
//!   RUST_LOG=scopewire=debug,info cargo run --example todos
//!
//! Try:
//!   curl -H 'authorization: Bearer demo' http://localhost:3000/todos
//!   curl -H 'authorization: Bearer demo' http://localhost:3000/todos/1
//!   curl -X POST -H 'authorization: Bearer demo' http://localhost:3000/todos -d 'buy milk'
//!   curl -X DELETE http://localhost:3000/todos/1        ← 405, only GET/POST
//!   curl -X OPTIONS http://localhost:3000/todos

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use http::StatusCode;
use scopewire::middleware::{boxed, compose};
use scopewire::{
    Container, Context, Error, Inject, Invoke, Lifetime, MethodTable, Next, Response, Server,
    ServerConfig, as_class, controller, create_controller, scope_per_request,
};
use tracing_subscriber::EnvFilter;

/// Shared for the whole process.
#[derive(Default)]
struct Store {
    todos: Mutex<Vec<String>>,
}

impl Inject for Store {
    fn construct(_: &Container) -> Result<Self, Error> {
        Ok(Store::default())
    }
}

/// Built once per request.
struct RequestId(u64);

static NEXT_REQUEST: AtomicU64 = AtomicU64::new(1);

impl Inject for RequestId {
    fn construct(_: &Container) -> Result<Self, Error> {
        Ok(RequestId(NEXT_REQUEST.fetch_add(1, Ordering::Relaxed)))
    }
}

struct TodosApi {
    store: Arc<Store>,
    request: Arc<RequestId>,
}

impl Inject for TodosApi {
    fn construct(cx: &Container) -> Result<Self, Error> {
        Ok(TodosApi { store: cx.resolve()?, request: cx.resolve()? })
    }
}

impl Invoke for TodosApi {
    fn methods() -> MethodTable<Self> {
        MethodTable::new()
            .method("list", Self::list)
            .method("find", Self::find)
            .method("create", Self::create)
    }
}

impl TodosApi {
    // GET /todos
    async fn list(self: Arc<Self>, ctx: Context, _next: Next) -> Result<(), Error> {
        let todos = self.store.todos.lock().map_err(|e| Error::middleware(e.to_string()))?;
        let items: Vec<String> = todos.iter().map(|t| format!("{t:?}")).collect();
        ctx.respond(Response::json(format!("[{}]", items.join(","))));
        Ok(())
    }

    // GET /todos/:id
    async fn find(self: Arc<Self>, ctx: Context, _next: Next) -> Result<(), Error> {
        let index = ctx.param("id").and_then(|id| id.parse::<usize>().ok());
        let todos = self.store.todos.lock().map_err(|e| Error::middleware(e.to_string()))?;
        match index.and_then(|i| todos.get(i.checked_sub(1)?)) {
            Some(todo) => ctx.respond(Response::json(format!(r#"{{"todo":{todo:?}}}"#))),
            None => ctx.respond(StatusCode::NOT_FOUND),
        }
        Ok(())
    }

    // POST /todos
    async fn create(self: Arc<Self>, ctx: Context, _next: Next) -> Result<(), Error> {
        let body = ctx.body();
        if body.is_empty() {
            ctx.respond(StatusCode::BAD_REQUEST);
            return Ok(());
        }
        let todo = String::from_utf8_lossy(&body).into_owned();
        let id = {
            let mut todos = self.store.todos.lock().map_err(|e| Error::middleware(e.to_string()))?;
            todos.push(todo);
            todos.len()
        };
        tracing::info!(id, request = self.request.0, "todo created");

        ctx.respond(
            Response::builder()
                .status(StatusCode::CREATED)
                .header("location", &format!("/todos/{id}"))
                .json(format!(r#"{{"id":{id}}}"#)),
        );
        Ok(())
    }
}

async fn require_token(ctx: Context, next: Next) -> Result<(), Error> {
    match ctx.header("authorization") {
        Some(value) if value.starts_with("Bearer ") => next.run().await,
        _ => {
            ctx.respond(StatusCode::UNAUTHORIZED);
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::load()?;

    let root = Container::builder()
        .register(as_class::<Store>().lifetime(Lifetime::Singleton))
        .register(as_class::<RequestId>().lifetime(Lifetime::Scoped))
        .build();

    let todos = create_controller::<TodosApi>()
        .prefix("/todos")
        .before(require_token)
        .get("/", "list")
        .get("/:id", "find")
        .post("/", "create");

    let app = compose([boxed(scope_per_request(root)), boxed(controller([todos])?)]);

    Server::from_config(&config).serve(app).await
}
