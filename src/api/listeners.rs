use futures::{Stream, StreamExt};
use tokio::task::JoinHandle;
use tracing::debug;

use super::Api;

/// Focus and connectivity changes reported by the host environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentEvent {
    Focus,
    Blur,
    Online,
    Offline,
}

/// Forward `events` into the cache until the stream ends.
///
/// Abort the returned task to stop listening.
pub fn setup_listeners<S>(api: &Api, events: S) -> JoinHandle<()>
where
    S: Stream<Item = EnvironmentEvent> + Send + 'static,
{
    let api = api.clone();
    api.engine.clone().spawn(async move {
        let mut events = std::pin::pin!(events);
        while let Some(event) = events.next().await {
            debug!(event = ?event, "Environment event");
            match event {
                EnvironmentEvent::Focus => api.set_focused(true),
                EnvironmentEvent::Blur => api.set_focused(false),
                EnvironmentEvent::Online => api.set_online(true),
                EnvironmentEvent::Offline => api.set_online(false),
            }
        }
    })
}
