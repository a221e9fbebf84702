mod common;

use endpoint_cache::{
    Api, Data, EndpointDefinition, InfiniteData, InfiniteQueryConfig, QueryOptions,
};

use common::{Backend, blog_builder};

const LAST_PAGE: i64 = 2;

fn pages_config() -> InfiniteQueryConfig {
    InfiniteQueryConfig::new(0, |context| {
        let page = context.page_param.as_i64()?;
        (page < LAST_PAGE).then(|| Data::from(page + 1))
    })
    .get_previous_page_param(|context| {
        let page = context.page_param.as_i64()?;
        (page > 0).then(|| Data::from(page - 1))
    })
}

fn feed_api(backend: &std::sync::Arc<Backend>, config: InfiniteQueryConfig) -> Api {
    blog_builder(backend)
        .endpoint(EndpointDefinition::infinite_query("listPage", config))
        .build()
        .expect("api builds")
}

fn page_numbers(data: &Data) -> Vec<i64> {
    InfiniteData::from_data(data)
        .expect("infinite data")
        .pages
        .iter()
        .filter_map(|page| page.get("page").and_then(Data::as_i64))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn pages_accumulate_in_both_directions() {
    let backend = Backend::seeded();
    let api = feed_api(&backend, pages_config());

    let handle = api
        .initiate_infinite("listPage", "feed", QueryOptions::default().initial_page_param(1))
        .expect("initiate");
    let first = handle.unwrap().await.expect("first page");
    assert_eq!(page_numbers(&first), [1]);

    let result = handle.result().await;
    assert!(result.has_next_page);
    assert!(result.has_previous_page);

    let next = handle.fetch_next_page().unwrap().await.expect("next page");
    assert_eq!(page_numbers(&next), [1, 2]);

    let previous = handle.fetch_previous_page().unwrap().await.expect("previous page");
    assert_eq!(page_numbers(&previous), [0, 1, 2]);

    let result = handle.result().await;
    assert!(!result.has_next_page);
    assert!(!result.has_previous_page);
    let params = InfiniteData::from_data(result.data.as_ref().expect("data"))
        .expect("infinite data")
        .page_params;
    assert_eq!(params, [Data::from(0), Data::from(1), Data::from(2)]);
}

#[tokio::test(start_paused = true)]
async fn fetching_past_the_last_page_is_a_no_op() {
    let backend = Backend::seeded();
    let api = feed_api(&backend, pages_config());

    let handle = api
        .initiate_infinite("listPage", "feed", QueryOptions::default())
        .expect("initiate");
    handle.unwrap().await.expect("first page");
    handle.fetch_next_page().unwrap().await.expect("page 1");
    handle.fetch_next_page().unwrap().await.expect("page 2");
    assert_eq!(backend.calls("listPage").len(), 3);

    let unchanged = handle.fetch_next_page().unwrap().await.expect("no more pages");
    assert_eq!(page_numbers(&unchanged), [0, 1, 2]);
    assert_eq!(backend.calls("listPage").len(), 3);
}

#[tokio::test(start_paused = true)]
async fn refetch_reloads_every_cached_page() {
    let backend = Backend::seeded();
    let api = feed_api(&backend, pages_config());

    let handle = api
        .initiate_infinite("listPage", "feed", QueryOptions::default())
        .expect("initiate");
    handle.unwrap().await.expect("first page");
    handle.fetch_next_page().unwrap().await.expect("page 1");

    let refetched = handle.refetch().unwrap().await.expect("refetched");
    assert_eq!(page_numbers(&refetched), [0, 1]);

    let params: Vec<_> = backend
        .calls("listPage")
        .iter()
        .map(|args| args["pageParam"].clone())
        .collect();
    assert_eq!(params, [0i64, 1, 0, 1].map(serde_json::Value::from));
    assert!(
        backend
            .calls("listPage")
            .iter()
            .all(|args| args["queryArg"] == "feed")
    );
}

#[tokio::test(start_paused = true)]
async fn max_pages_drops_pages_from_the_far_end() {
    let backend = Backend::seeded();
    let api = feed_api(&backend, pages_config().max_pages(2));

    let handle = api
        .initiate_infinite("listPage", "feed", QueryOptions::default())
        .expect("initiate");
    handle.unwrap().await.expect("first page");
    handle.fetch_next_page().unwrap().await.expect("page 1");
    let capped = handle.fetch_next_page().unwrap().await.expect("page 2");
    assert_eq!(page_numbers(&capped), [1, 2]);

    let back = handle.fetch_previous_page().unwrap().await.expect("page 0");
    assert_eq!(page_numbers(&back), [0, 1]);
}

#[tokio::test(start_paused = true)]
async fn infinite_endpoints_need_their_own_initiator() {
    let backend = Backend::seeded();
    let api = feed_api(&backend, pages_config());

    assert!(api.initiate("listPage", "feed", QueryOptions::default()).is_err());
    assert!(api.initiate_infinite("getPost", 1, QueryOptions::default()).is_err());
}
