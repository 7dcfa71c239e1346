//! Messenger module: broadcasts filter changes to subscribed widgets.
//!
//! Publishing is synchronous. Every subscriber runs before `publish` returns,
//! and subscribers must not call back into the filter service from inside
//! their callback.

use crate::datasource::DataSourceList;
use crate::design::FilterDesign;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Event name published after every effective filter change.
pub const FILTERS_CHANGED: &str = "FILTERS_CHANGED";

/// The complete new filter list of every data source an operation touched.
pub type FilterChange = IndexMap<DataSourceList, Vec<FilterDesign>>;

#[derive(Debug, Clone)]
pub struct FiltersChanged {
    pub change: FilterChange,
    pub caller: String,
}

pub trait Messenger {
    fn publish(&self, event: &str, payload: &FiltersChanged);
}

pub trait Subscriber: Send + Sync {
    fn notify(&self, payload: &FiltersChanged);
}

impl<F> Subscriber for F
where
    F: Fn(&FiltersChanged) + Send + Sync,
{
    fn notify(&self, payload: &FiltersChanged) {
        self(payload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(usize);

#[derive(Default)]
struct Registry {
    next_id: usize,
    subscribers: HashMap<String, Vec<(SubscriptionId, Arc<dyn Subscriber>)>>,
}

/// In-process publish/subscribe registry.
///
/// Clones share the same registry, so a widget can hold a handle while the
/// service owns another.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<RwLock<Registry>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<S>(&self, event: impl Into<String>, subscriber: S) -> SubscriptionId
    where
        S: Subscriber + 'static,
    {
        let mut registry = self.registry.write();
        let id = SubscriptionId(registry.next_id);
        registry.next_id += 1;
        let subscriber: Arc<dyn Subscriber> = Arc::new(subscriber);
        registry.subscribers.entry(event.into()).or_default().push((id, subscriber));
        id
    }

    /// Returns false if the subscription was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.registry.write();
        let mut removed = false;
        for subscribers in registry.subscribers.values_mut() {
            let before = subscribers.len();
            subscribers.retain(|(sid, _)| *sid != id);
            removed |= subscribers.len() != before;
        }
        removed
    }

    pub fn subscriber_count(&self, event: &str) -> usize {
        self.registry.read().subscribers.get(event).map_or(0, Vec::len)
    }
}

impl Messenger for EventBus {
    fn publish(&self, event: &str, payload: &FiltersChanged) {
        // Snapshot so callbacks run without holding the lock.
        let subscribers: Vec<Arc<dyn Subscriber>> = {
            let registry = self.registry.read();
            registry
                .subscribers
                .get(event)
                .map(|list| list.iter().map(|(_, s)| Arc::clone(s)).collect())
                .unwrap_or_default()
        };
        for subscriber in subscribers {
            subscriber.notify(payload);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry.read();
        f.debug_struct("EventBus")
            .field("events", &registry.subscribers.keys().collect::<Vec<_>>())
            .finish()
    }
}
