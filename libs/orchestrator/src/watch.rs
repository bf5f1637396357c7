//! The generic informer adapter (spec.md §9 "Watcher callbacks"): the orchestrator
//! surfaces add/update/delete, and callers must always recompute the derived state from
//! the latest observed object rather than apply deltas.

use futures::{Stream, StreamExt, TryStreamExt};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("watch stream error: {0}")]
    Stream(#[from] watcher::Error),
}

/// An add-or-update (the two are collapsed, per spec.md §9, because the informer hands
/// us the full current object either way) or a removal, keyed by the object itself so
/// the caller can read whatever fields it needs (name, namespace, labels) to compute its
/// own derived key.
pub enum RoutingEvent<K> {
    Upsert(K),
    Remove(K),
}

/// Watches `api` filtered by `label_selector`, calling `on_event` for every observed
/// add/update/delete. Runs until the stream ends (only on an unrecoverable error, since
/// `watcher` retries transient failures with backoff) or `cancel` fires.
pub async fn watch_label_selector<K>(
    api: Api<K>,
    label_selector: String,
    cancel: tokio_util::sync::CancellationToken,
    mut on_event: impl FnMut(RoutingEvent<K>) + Send,
) -> Result<(), WatchError>
where
    K: Resource + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
    K::DynamicType: Default,
{
    let config = watcher::Config::default().labels(&label_selector);
    let mut stream = watcher(api, config).default_backoff().boxed();
    loop {
        tokio::select! {
            next = stream.try_next() => {
                match next? {
                    Some(watcher::Event::Apply(obj) | watcher::Event::InitApply(obj)) => {
                        on_event(RoutingEvent::Upsert(obj));
                    }
                    Some(watcher::Event::Delete(obj)) => {
                        on_event(RoutingEvent::Remove(obj));
                    }
                    Some(watcher::Event::Init | watcher::Event::InitDone) => {}
                    None => break,
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
    Ok(())
}

/// Adapter used in tests: turns a fixed sequence of events into the same callback shape
/// `watch_label_selector` produces, so routing-table logic can be tested without a live
/// orchestrator.
pub fn replay<K>(events: impl IntoIterator<Item = RoutingEvent<K>>, mut on_event: impl FnMut(RoutingEvent<K>)) {
    for event in events {
        on_event(event);
    }
}

pub type BoxEventStream<K> = std::pin::Pin<Box<dyn Stream<Item = Result<RoutingEvent<K>, WatchError>> + Send>>;
