use std::{fmt::Debug, hash::Hash, sync::Arc};

use futures::{Future, StreamExt};
use kube::{
    runtime::{
        reflector::{self, Store},
        watcher::{watcher, Config, Event},
    },
    Api, Resource,
};
use log::{info, warn};
use neutron_fip_core::helpers::pretty_type_name;
use serde::de::DeserializeOwned;
use tokio::sync::watch::{self, Receiver};

use crate::dispatch::queue::WorkQueue;

/// A locally cached snapshot of one resource kind. Becomes ready once the
/// initial listing has been applied.
#[derive(Clone)]
pub struct ResourceCache<K: Resource<DynamicType = ()> + Clone + 'static> {
    pub store: Store<K>,
    ready: Receiver<bool>,
}

impl<K: Resource<DynamicType = ()> + Clone + 'static> ResourceCache<K> {
    pub fn new(store: Store<K>, ready: Receiver<bool>) -> Self {
        Self { store, ready }
    }

    /// Returns false if the cache was dropped before it synced.
    pub async fn wait_ready(&self) -> bool {
        let mut ready = self.ready.clone();

        loop {
            if *ready.borrow_and_update() {
                return true;
            }

            if ready.changed().await.is_err() {
                return false;
            }
        }
    }
}

/// Starts a cache without event routing.
pub fn start_cache<K>(api: Api<K>, config: Config) -> (impl Future<Output = ()>, ResourceCache<K>)
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    start_routed_cache::<K, (), _>(api, config, None, |_, _| Vec::new())
}

/// Starts a cache whose events are translated into work items. The router
/// sees every event before it is applied, so the store still holds the
/// previous state of the object.
pub fn start_routed_cache<K, T, R>(
    api: Api<K>,
    config: Config,
    queue: Option<Arc<WorkQueue<T>>>,
    mut route: R,
) -> (impl Future<Output = ()>, ResourceCache<K>)
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    T: Clone + Eq + Hash + Send + Sync + 'static,
    R: FnMut(&Event<K>, &Store<K>) -> Vec<T> + Send + 'static,
{
    let (store, mut writer) = reflector::store();
    let (ready_tx, ready_rx) = watch::channel(false);
    let reader = store.clone();
    let kind = pretty_type_name::<K>();

    let cache = watcher(api, config).for_each(move |event| {
        let items = match event {
            Ok(event) => {
                let items = route(&event, &reader);
                writer.apply_watcher_event(&event);

                if let Event::Restarted(ref objects) = event {
                    if !ready_tx.send_replace(true) {
                        info!("{kind} cache synced with {} objects", objects.len());
                    }
                }

                items
            }
            Err(err) => {
                warn!("{kind} watch failed! {err}");
                Vec::new()
            }
        };

        let queue = queue.clone();

        async move {
            if let Some(queue) = queue {
                for item in items {
                    queue.add(item).await;
                }
            }
        }
    });

    (cache, ResourceCache::new(store, ready_rx))
}
