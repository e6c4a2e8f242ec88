use std::fmt::Debug;
use std::sync::Arc;

use futures::{StreamExt, TryStreamExt};
use k8s_openapi::serde::de::DeserializeOwned;
use kube::api::{ListParams, WatchEvent as KubeWatchEvent, WatchParams};
use kube::{Api, Resource, ResourceExt};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::manager::watch::{ClusterSource, EventStream, WatchEvent};
use crate::{Error, Result};

/// Server side watch timeout; the stream ends after it and is reopened.
const WATCH_TIMEOUT_SECS: u32 = 290;
const HTTP_GONE: u16 = 410;

/// List and watch over the kube API, resuming from the last seen resource
/// version.
pub struct KubeSource<K> {
    api: Api<K>,
    field_selector: Option<String>,
    resource_version: Arc<Mutex<String>>,
}

impl<K: Clone> Clone for KubeSource<K> {
    fn clone(&self) -> Self {
        Self {
            api: self.api.clone(),
            field_selector: self.field_selector.clone(),
            resource_version: self.resource_version.clone(),
        }
    }
}

impl<K> KubeSource<K> {
    pub fn new(api: Api<K>) -> Self {
        Self {
            api,
            field_selector: None,
            resource_version: Arc::new(Mutex::new("0".into())),
        }
    }

    /// Restricts list and watch to objects matching `selector`, for
    /// example `spec.nodeName=node-1`.
    pub fn with_field_selector(mut self, selector: impl Into<String>) -> Self {
        self.field_selector = Some(selector.into());
        self
    }

    fn list_params(&self) -> ListParams {
        let lp = ListParams::default();
        match &self.field_selector {
            Some(selector) => lp.fields(selector),
            None => lp,
        }
    }

    fn watch_params(&self) -> WatchParams {
        let wp = WatchParams::default().timeout(WATCH_TIMEOUT_SECS);
        match &self.field_selector {
            Some(selector) => wp.fields(selector),
            None => wp,
        }
    }
}

impl<K, T> ClusterSource<T> for KubeSource<K>
where
    K: Resource + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
    T: for<'a> From<&'a K> + Send + 'static,
{
    async fn list(&self) -> Result<Vec<T>> {
        let list = self.api.list(&self.list_params()).await?;
        if let Some(version) = list.metadata.resource_version {
            *self.resource_version.lock() = version;
        }
        Ok(list.items.iter().map(T::from).collect())
    }

    async fn watch(&self) -> Result<EventStream<T>> {
        let version = self.resource_version.lock().clone();
        debug!(%version, "opening watch");
        let stream = self.api.watch(&self.watch_params(), &version).await?;

        let resource_version = self.resource_version.clone();
        let events = stream
            .map_err(Error::from)
            .try_filter_map(move |event| {
                let resource_version = resource_version.clone();
                async move { translate(event, &resource_version) }
            })
            .boxed();
        Ok(events)
    }
}

fn translate<K, T>(
    event: KubeWatchEvent<K>,
    resource_version: &Mutex<String>,
) -> Result<Option<WatchEvent<T>>>
where
    K: Resource,
    T: for<'a> From<&'a K>,
{
    let remember = |obj: &K| {
        if let Some(version) = obj.resource_version() {
            *resource_version.lock() = version;
        }
    };
    match event {
        KubeWatchEvent::Added(obj) => {
            remember(&obj);
            Ok(Some(WatchEvent::Added(T::from(&obj))))
        }
        KubeWatchEvent::Modified(obj) => {
            remember(&obj);
            Ok(Some(WatchEvent::Modified(T::from(&obj))))
        }
        KubeWatchEvent::Deleted(obj) => {
            remember(&obj);
            Ok(Some(WatchEvent::Deleted(T::from(&obj))))
        }
        KubeWatchEvent::Bookmark(bookmark) => {
            *resource_version.lock() = bookmark.metadata.resource_version;
            Ok(None)
        }
        KubeWatchEvent::Error(e) => {
            if e.code == HTTP_GONE {
                warn!("resource version expired, restarting watch from scratch");
                *resource_version.lock() = "0".into();
            }
            Err(Error::Watch(format!("{} ({})", e.message, e.code)))
        }
    }
}
