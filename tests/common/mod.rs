//! In-memory blog backend shared by the integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use endpoint_cache::{
    Api, ApiBuilder, BaseQuery, BaseQueryApi, BaseQueryFailure, Data, EndpointDefinition,
    QueryOutcome, Tag, base_query_fn,
};
use endpoint_cache::cache::{ResultDescription, TagContext, TagDescription};
use serde_json::{Value, json};

pub const LATENCY: Duration = Duration::from_millis(50);

#[derive(Default)]
pub struct Backend {
    posts: Mutex<BTreeMap<i64, Value>>,
    calls: Mutex<Vec<(String, Value)>>,
    version: AtomicUsize,
}

impl Backend {
    pub fn seeded() -> Arc<Self> {
        let backend = Arc::new(Self::default());
        for id in 1..=3 {
            backend.put(id, json!({"id": id, "title": format!("Post {id}")}));
        }
        backend
    }

    pub fn put(&self, id: i64, post: Value) {
        self.posts.lock().expect("posts lock").insert(id, post);
        self.version.fetch_add(1, Ordering::SeqCst);
    }

    /// Calls made for `endpoint`, in order.
    pub fn calls(&self, endpoint: &str) -> Vec<Value> {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .filter(|(name, _)| name == endpoint)
            .map(|(_, args)| args.clone())
            .collect()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }

    fn respond(&self, endpoint: &str, args: &Data) -> Result<QueryOutcome, BaseQueryFailure> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((endpoint.to_string(), Value::from(args)));
        let mut posts = self.posts.lock().expect("posts lock");
        match endpoint {
            "getPost" => {
                let id = args.as_i64().unwrap_or_default();
                Ok(match posts.get(&id) {
                    Some(post) => QueryOutcome::data(Data::from(post.clone())),
                    None => QueryOutcome::error(Data::from(json!({"status": 404}))),
                })
            }
            "getPosts" => Ok(QueryOutcome::data(Data::from(Value::Array(
                posts.values().cloned().collect(),
            )))),
            "deletePost" => {
                let id = args.as_i64().unwrap_or_default();
                posts.remove(&id);
                self.version.fetch_add(1, Ordering::SeqCst);
                Ok(QueryOutcome::data(Data::from(json!({"deleted": id}))))
            }
            "renamePost" => {
                let id = args.get("id").and_then(Data::as_i64).unwrap_or_default();
                let title = args.get("title").and_then(Data::as_str).unwrap_or_default();
                match posts.get_mut(&id) {
                    Some(post) => {
                        post["title"] = json!(title);
                        Ok(QueryOutcome::data(Data::from(post.clone())))
                    }
                    None => Ok(QueryOutcome::error(Data::from(json!({"status": 404})))),
                }
            }
            "listPage" => {
                let page = args.get("pageParam").and_then(Data::as_i64).unwrap_or_default();
                Ok(QueryOutcome::data(Data::from(json!({
                    "page": page,
                    "items": [page * 10, page * 10 + 1],
                }))))
            }
            "version" => Ok(QueryOutcome::data(Data::from(json!(
                self.version.load(Ordering::SeqCst)
            )))),
            "flaky" => Err(BaseQueryFailure::new("connection reset")),
            other => Err(BaseQueryFailure::named("NotFound", format!("no route for {other}"))),
        }
    }
}

/// Base query answering from `backend` after [`LATENCY`].
pub fn base_query(backend: Arc<Backend>) -> impl BaseQuery {
    base_query_fn(move |args: Data, api: BaseQueryApi, _extra: Data| {
        let backend = Arc::clone(&backend);
        async move {
            tokio::select! {
                _ = api.signal.aborted() => return Err(BaseQueryFailure::aborted()),
                _ = tokio::time::sleep(LATENCY) => {}
            }
            backend.respond(&api.endpoint, &args)
        }
    })
}

fn post_tag(context: &TagContext<'_>) -> Vec<TagDescription> {
    match context.arg.as_i64() {
        Some(id) => vec![Tag::with_id("Post", id).into()],
        None => Vec::new(),
    }
}

pub fn blog_endpoints() -> Vec<EndpointDefinition> {
    vec![
        EndpointDefinition::query("getPost").provides_tags(ResultDescription::from_fn(post_tag)),
        EndpointDefinition::query("getPosts").provides_tags(vec![Tag::with_id("Post", "LIST")]),
        EndpointDefinition::query("version"),
        EndpointDefinition::query("flaky"),
        EndpointDefinition::mutation("deletePost")
            .invalidates_tags(ResultDescription::from_fn(post_tag)),
        EndpointDefinition::mutation("renamePost").invalidates_tags(ResultDescription::from_fn(
            |context| match context.arg.get("id").and_then(Data::as_i64) {
                Some(id) => vec![Tag::with_id("Post", id).into(), Tag::with_id("Post", "LIST").into()],
                None => Vec::new(),
            },
        )),
    ]
}

pub fn blog_builder(backend: &Arc<Backend>) -> ApiBuilder {
    Api::builder(base_query(Arc::clone(backend))).endpoints(blog_endpoints())
}

pub fn blog_api(backend: &Arc<Backend>) -> Api {
    blog_builder(backend).build().expect("api builds")
}

/// Let spawned request tasks and timers run.
pub async fn settle() {
    tokio::time::sleep(LATENCY * 4).await;
}
