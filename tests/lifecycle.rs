mod common;

use std::sync::{Arc, Mutex};

use endpoint_cache::{
    Api, CacheLifecycleApi, Data, EndpointDefinition, LifecycleError, MutationOptions,
    QueryLifecycleApi, QueryOptions, QueryOutcome,
};
use serde_json::json;

use common::{Backend, LATENCY, base_query, blog_endpoints, settle};

type Events = Arc<Mutex<Vec<String>>>;

fn record(events: &Events, event: impl Into<String>) {
    events.lock().expect("events lock").push(event.into());
}

fn recorded(events: &Events) -> Vec<String> {
    events.lock().expect("events lock").clone()
}

fn title(api: &Api, id: i64) -> Option<String> {
    api.select("getPost", id)
        .expect("select")
        .data
        .and_then(|post| post.get("title").and_then(Data::as_str).map(str::to_string))
}

/// Optimistically retitle the cached post, rolling back if the mutation fails.
async fn optimistic_rename(arg: Data, lifecycle: QueryLifecycleApi) {
    let id = arg.get("id").and_then(Data::as_i64).unwrap_or_default();
    let title = arg.get("title").cloned().unwrap_or(Data::Null);
    let Ok(patches) = lifecycle.api().update_query_data("getPost", id, |draft| {
        draft.insert("title", title);
    }) else {
        return;
    };
    if lifecycle.query_fulfilled().await.is_err() {
        patches.undo();
    }
}

fn optimistic_api(backend: &Arc<Backend>) -> Api {
    let mut endpoints = blog_endpoints();
    endpoints.push(
        EndpointDefinition::mutation("renameLocked")
            .query_fn(|_arg, _api, _base| async {
                Ok(QueryOutcome::error(Data::from(json!({"status": 423}))))
            })
            .on_query_started(optimistic_rename),
    );
    let api = Api::builder(base_query(Arc::clone(backend)))
        .endpoints(endpoints)
        .build()
        .expect("api builds");
    api.inject_endpoints(
        [EndpointDefinition::mutation("renamePost").on_query_started(optimistic_rename)],
        endpoint_cache::endpoints::OverrideExisting::Yes,
    )
    .expect("override");
    api
}

#[tokio::test(start_paused = true)]
async fn optimistic_updates_show_before_the_mutation_settles() {
    let backend = Backend::seeded();
    let api = optimistic_api(&backend);

    let post = api.initiate("getPost", 1, QueryOptions::default()).expect("initiate");
    post.unwrap().await.expect("loads");

    let rename = api
        .initiate_mutation(
            "renamePost",
            Data::from(json!({"id": 1, "title": "Fresh"})),
            MutationOptions::default(),
        )
        .expect("mutation");
    tokio::time::sleep(LATENCY / 2).await;
    assert_eq!(title(&api, 1).as_deref(), Some("Fresh"));

    rename.unwrap().await.expect("rename succeeds");
    settle().await;
    assert_eq!(title(&api, 1).as_deref(), Some("Fresh"));
}

#[tokio::test(start_paused = true)]
async fn failed_mutations_roll_back_optimistic_updates() {
    let backend = Backend::seeded();
    let api = optimistic_api(&backend);

    let post = api.initiate("getPost", 2, QueryOptions::default()).expect("initiate");
    post.unwrap().await.expect("loads");

    let rename = api
        .initiate_mutation(
            "renameLocked",
            Data::from(json!({"id": 2, "title": "Nope"})),
            MutationOptions::default(),
        )
        .expect("mutation");
    tokio::task::yield_now().await;
    assert!(rename.unwrap().await.is_err());
    settle().await;

    assert_eq!(title(&api, 2).as_deref(), Some("Post 2"));
}

fn watched_api(backend: &Arc<Backend>, events: &Events) -> Api {
    let added = Arc::clone(events);
    let started = Arc::clone(events);
    Api::builder(base_query(Arc::clone(backend)))
        .endpoint(
            EndpointDefinition::query("getPost")
                .on_cache_entry_added(move |arg: Data, lifecycle: CacheLifecycleApi| {
                    let events = Arc::clone(&added);
                    async move {
                        record(&events, format!("added:{}", arg.as_i64().unwrap_or_default()));
                        match lifecycle.cache_data_loaded().await {
                            Ok(value) => {
                                let title = value.data.get("title").and_then(Data::as_str);
                                record(&events, format!("loaded:{}", title.unwrap_or_default()));
                            }
                            Err(LifecycleError::EntryRemoved) => record(&events, "never loaded"),
                            Err(other) => record(&events, format!("failed:{other}")),
                        }
                        lifecycle.cache_entry_removed().await;
                        record(&events, "removed");
                    }
                })
                .on_query_started(move |_arg: Data, lifecycle: QueryLifecycleApi| {
                    let events = Arc::clone(&started);
                    async move {
                        record(&events, "started");
                        if lifecycle.query_fulfilled().await.is_ok() {
                            let entry = lifecycle.get_cache_entry().expect("query entry");
                            record(&events, format!("fulfilled:{}", entry.is_success));
                        }
                    }
                }),
        )
        .build()
        .expect("api builds")
}

#[tokio::test(start_paused = true)]
async fn cache_entry_hooks_follow_the_entry_until_removal() {
    let backend = Backend::seeded();
    let events = Events::default();
    let api = watched_api(&backend, &events);

    let handle = api.initiate("getPost", 1, QueryOptions::default()).expect("initiate");
    handle.unwrap().await.expect("loads");
    settle().await;
    let mut seen = recorded(&events);
    seen.sort();
    assert_eq!(seen, ["added:1", "fulfilled:true", "loaded:Post 1", "started"]);

    handle.refetch().unwrap().await.expect("refetched");
    settle().await;
    assert_eq!(recorded(&events).len(), 6);

    handle.unsubscribe();
    tokio::time::sleep(std::time::Duration::from_secs(61)).await;
    assert_eq!(recorded(&events).last().map(String::as_str), Some("removed"));
}

#[tokio::test(start_paused = true)]
async fn entries_removed_before_loading_report_it() {
    let backend = Backend::seeded();
    let events = Events::default();
    let api = watched_api(&backend, &events);

    let handle = api.initiate("getPost", 1, QueryOptions::default()).expect("initiate");
    tokio::task::yield_now().await;
    api.reset_api_state();
    settle().await;

    let events = recorded(&events);
    assert!(events.contains(&"never loaded".to_string()), "{events:?}");
    assert_eq!(events.last().map(String::as_str), Some("removed"));
    drop(handle);
}
