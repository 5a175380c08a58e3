use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::sync::remote::{Collection, RemoteDocument, RemoteError, RemoteStore, SnapshotListener, Subscription};

/// In-process document store with live snapshot fan-out.
///
/// Listeners are invoked synchronously from the mutating call, outside the
/// store lock. Write and subscription failures can be injected to exercise
/// the fallback paths of a consumer.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<StoreState>>,
}

#[derive(Default)]
struct StoreState {
    documents: HashMap<Collection, BTreeMap<String, Map<String, Value>>>,
    listeners: BTreeMap<u64, ListenerEntry>,
    next_listener: u64,
    write_failure: Option<String>,
    subscribe_failure: Option<String>,
}

struct ListenerEntry {
    collection: Collection,
    owner_id: String,
    listener: SnapshotListener,
}

type Delivery = (SnapshotListener, Vec<RemoteDocument>);

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every subsequent insert/replace/delete fails with `message` until cleared.
    pub fn fail_writes(&self, message: Option<&str>) {
        self.state().write_failure = message.map(str::to_string);
    }

    /// Every subsequent `subscribe` call fails with `message` until cleared.
    pub fn fail_subscribe(&self, message: Option<&str>) {
        self.state().subscribe_failure = message.map(str::to_string);
    }

    /// Ends every live subscription on `collection` with an error.
    pub fn break_subscriptions(&self, collection: Collection, message: &str) {
        let broken: Vec<SnapshotListener> = {
            let mut state = self.state();
            let ids: Vec<u64> = state
                .listeners
                .iter()
                .filter(|(_, entry)| entry.collection == collection)
                .map(|(id, _)| *id)
                .collect();
            ids.iter()
                .filter_map(|id| state.listeners.remove(id))
                .map(|entry| entry.listener)
                .collect()
        };
        tracing::warn!("Breaking {} {} subscriptions: {}", broken.len(), collection, message);
        for listener in broken {
            listener(Err(RemoteError::Unavailable(message.to_string())));
        }
    }

    /// Writes a document directly, bypassing failure injection. Useful for
    /// simulating a change made by another client.
    pub fn put(&self, collection: Collection, id: &str, fields: Map<String, Value>) {
        let deliveries = {
            let mut state = self.state();
            state
                .documents
                .entry(collection)
                .or_default()
                .insert(id.to_string(), fields);
            state.deliveries(collection)
        };
        deliver(deliveries);
    }

    pub fn documents(&self, collection: Collection) -> Vec<RemoteDocument> {
        self.state()
            .documents
            .get(&collection)
            .map(|documents| {
                documents
                    .iter()
                    .map(|(id, fields)| RemoteDocument::new(id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn listener_count(&self) -> usize {
        self.state().listeners.len()
    }

    fn check_writable(&self) -> Result<(), RemoteError> {
        match &self.state().write_failure {
            Some(message) => Err(RemoteError::Unavailable(message.clone())),
            None => Ok(()),
        }
    }
}

impl StoreState {
    fn snapshot(&self, collection: Collection, owner_id: &str) -> Vec<RemoteDocument> {
        self.documents
            .get(&collection)
            .map(|documents| {
                documents
                    .iter()
                    .filter(|(_, fields)| fields.get("ownerId").and_then(Value::as_str) == Some(owner_id))
                    .map(|(id, fields)| RemoteDocument::new(id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn deliveries(&self, collection: Collection) -> Vec<Delivery> {
        self.listeners
            .values()
            .filter(|entry| entry.collection == collection)
            .map(|entry| (Arc::clone(&entry.listener), self.snapshot(collection, &entry.owner_id)))
            .collect()
    }
}

fn deliver(deliveries: Vec<Delivery>) {
    for (listener, snapshot) in deliveries {
        listener(Ok(snapshot));
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    fn subscribe(
        &self,
        collection: Collection,
        owner_id: &str,
        listener: SnapshotListener,
    ) -> Result<Subscription, RemoteError> {
        let (id, initial) = {
            let mut state = self.state();
            if let Some(message) = &state.subscribe_failure {
                return Err(RemoteError::Unavailable(message.clone()));
            }
            let id = state.next_listener;
            state.next_listener += 1;
            state.listeners.insert(
                id,
                ListenerEntry {
                    collection,
                    owner_id: owner_id.to_string(),
                    listener: Arc::clone(&listener),
                },
            );
            (id, state.snapshot(collection, owner_id))
        };
        tracing::debug!("Listener {} attached to {} for {}", id, collection, owner_id);
        listener(Ok(initial));

        let inner = Arc::downgrade(&self.inner);
        Ok(Subscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .listeners
                    .remove(&id);
            }
        }))
    }

    async fn insert(&self, collection: Collection, fields: Map<String, Value>) -> Result<String, RemoteError> {
        self.check_writable()?;
        let id = Uuid::new_v4().to_string();
        self.put(collection, &id, fields);
        Ok(id)
    }

    async fn replace(&self, collection: Collection, id: &str, fields: Map<String, Value>) -> Result<(), RemoteError> {
        self.check_writable()?;
        let exists = self
            .state()
            .documents
            .get(&collection)
            .is_some_and(|documents| documents.contains_key(id));
        if !exists {
            return Err(RemoteError::NotFound(id.to_string()));
        }
        self.put(collection, id, fields);
        Ok(())
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), RemoteError> {
        self.check_writable()?;
        let deliveries = {
            let mut state = self.state();
            if let Some(documents) = state.documents.get_mut(&collection) {
                documents.remove(id);
            }
            state.deliveries(collection)
        };
        deliver(deliveries);
        Ok(())
    }
}
