//! List/watch capability for cluster resources
//!
//! Components that need cluster objects (policies, endpoints) depend on
//! [`ResourceLister`] and [`ResourceWatcher`] rather than a concrete client.
//! Any backend that can list objects and deliver later changes satisfies the
//! contract: polling, long-poll or a native watch. [`MemoryResources`] is the
//! in-process implementation.

use crate::policy::PolicyHit;
use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

/// Events buffered for slow watchers before they start missing changes
const EVENT_BUFFER: usize = 256;

/// A namespaced, named cluster object
pub trait Resource: Clone + Send + Sync + 'static {
    fn namespace(&self) -> &str;
    fn name(&self) -> &str;
}

impl Resource for PolicyHit {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Restricts which objects a list or watch returns
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Only objects in this namespace; `None` for all namespaces
    pub namespace: Option<String>,
}

impl ListOptions {
    pub fn in_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
        }
    }

    pub fn matches<T: Resource>(&self, object: &T) -> bool {
        self.namespace
            .as_deref()
            .map_or(true, |ns| ns == object.namespace())
    }
}

/// A change to a watched object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent<T> {
    Added(T),
    Modified(T),
    Deleted(T),
}

impl<T> WatchEvent<T> {
    pub fn object(&self) -> &T {
        match self {
            WatchEvent::Added(object) | WatchEvent::Modified(object) | WatchEvent::Deleted(object) => {
                object
            }
        }
    }
}

/// Lists the current objects of one resource type
#[async_trait]
pub trait ResourceLister<T: Resource>: Send + Sync {
    async fn list(&self, options: &ListOptions) -> Result<Vec<T>>;
}

/// Delivers changes to objects of one resource type
#[async_trait]
pub trait ResourceWatcher<T: Resource>: Send + Sync {
    /// Changes made after the call. The receiver closes when the source goes away.
    async fn watch(&self, options: &ListOptions) -> Result<mpsc::Receiver<WatchEvent<T>>>;
}

/// In-memory object set that publishes its changes to watchers.
///
/// A watch replays nothing: callers that need the current state list first
/// and then apply the events that follow.
#[derive(Debug)]
pub struct MemoryResources<T: Resource> {
    objects: DashMap<(String, String), T>,
    events: broadcast::Sender<WatchEvent<T>>,
}

impl<T: Resource> Default for MemoryResources<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Resource> MemoryResources<T> {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            objects: DashMap::new(),
            events,
        }
    }

    /// Create or replace an object
    pub fn apply(&self, object: T) {
        let id = (object.namespace().to_string(), object.name().to_string());
        let event = match self.objects.insert(id, object.clone()) {
            Some(_) => WatchEvent::Modified(object),
            None => WatchEvent::Added(object),
        };
        // No receivers is fine
        let _ = self.events.send(event);
    }

    /// Remove an object, returning it if it existed
    pub fn delete(&self, namespace: &str, name: &str) -> Option<T> {
        let (_, object) = self
            .objects
            .remove(&(namespace.to_string(), name.to_string()))?;
        let _ = self.events.send(WatchEvent::Deleted(object.clone()));
        Some(object)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl<T: Resource> ResourceLister<T> for MemoryResources<T> {
    async fn list(&self, options: &ListOptions) -> Result<Vec<T>> {
        let mut objects: Vec<T> = self
            .objects
            .iter()
            .filter(|entry| options.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        objects.sort_by(|a, b| {
            (a.namespace(), a.name()).cmp(&(b.namespace(), b.name()))
        });
        Ok(objects)
    }
}

#[async_trait]
impl<T: Resource> ResourceWatcher<T> for MemoryResources<T> {
    async fn watch(&self, options: &ListOptions) -> Result<mpsc::Receiver<WatchEvent<T>>> {
        let mut events = self.events.subscribe();
        let options = options.clone();
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if !options.matches(event.object()) {
                            continue;
                        }
                        if tx.send(event).await.is_err() {
                            debug!("Watcher dropped, stopping event forwarding");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed = missed, "Watcher fell behind, events were skipped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Action;
    use crate::policy::PolicyKind;

    fn policy(namespace: &str, name: &str, action: Action) -> PolicyHit {
        PolicyHit {
            kind: PolicyKind::CalicoNetworkPolicy,
            namespace: namespace.to_string(),
            name: name.to_string(),
            tier: "default".to_string(),
            action,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_list_filters_by_namespace() {
        let policies = MemoryResources::new();
        policies.apply(policy("shop", "allow-web", Action::Allow));
        policies.apply(policy("shop", "deny-all", Action::Deny));
        policies.apply(policy("billing", "allow-api", Action::Allow));

        let all = policies.list(&ListOptions::default()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].namespace, "billing");

        let shop = policies
            .list(&ListOptions::in_namespace("shop"))
            .await
            .unwrap();
        let names: Vec<&str> = shop.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["allow-web", "deny-all"]);
    }

    #[tokio::test]
    async fn test_watch_delivers_only_later_changes() {
        let policies = MemoryResources::new();
        policies.apply(policy("shop", "existing", Action::Allow));

        let mut events = policies
            .watch(&ListOptions::in_namespace("shop"))
            .await
            .unwrap();

        policies.apply(policy("billing", "elsewhere", Action::Allow));
        policies.apply(policy("shop", "existing", Action::Deny));
        policies.apply(policy("shop", "new", Action::Allow));
        policies.delete("shop", "new");

        assert_eq!(
            events.recv().await,
            Some(WatchEvent::Modified(policy("shop", "existing", Action::Deny)))
        );
        assert_eq!(
            events.recv().await,
            Some(WatchEvent::Added(policy("shop", "new", Action::Allow)))
        );
        assert_eq!(
            events.recv().await,
            Some(WatchEvent::Deleted(policy("shop", "new", Action::Allow)))
        );
    }

    #[tokio::test]
    async fn test_watch_closes_with_source() {
        let policies: MemoryResources<PolicyHit> = MemoryResources::new();
        let mut events = policies.watch(&ListOptions::default()).await.unwrap();
        drop(policies);
        assert_eq!(events.recv().await, None);
    }

    #[test]
    fn test_delete_missing_object() {
        let policies: MemoryResources<PolicyHit> = MemoryResources::new();
        assert!(policies.delete("shop", "missing").is_none());
        assert!(policies.is_empty());
    }
}
