use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("Request error: {0}")]
    RequestError(String),
    #[error("Document not found: {0}")]
    NotFound(String),
    #[error("Rate limit exceeded")]
    RateLimited,
    #[error("Authentication failed")]
    AuthenticationFailed,
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),
    #[error("Parse error: {0}")]
    ParseError(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    People,
    Events,
}

impl Collection {
    pub fn name(&self) -> &'static str {
        match self {
            Collection::People => "people",
            Collection::Events => "events",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Serialized projection of a record as the document store holds it.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteDocument {
    pub id: String,
    pub fields: Map<String, Value>,
}

impl RemoteDocument {
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self { id: id.into(), fields }
    }
}

/// A full snapshot of every matching document, or the error that ended the stream.
pub type SnapshotResult = Result<Vec<RemoteDocument>, RemoteError>;

pub type SnapshotListener = Arc<dyn Fn(SnapshotResult) + Send + Sync>;

/// Handle to a live subscription. Stopping is idempotent and also happens on drop.
pub struct Subscription {
    stop: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(stop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            stop: Some(Box::new(stop)),
        }
    }

    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }

    pub fn is_active(&self) -> bool {
        self.stop.is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// An owner-scoped, subscribable document collection.
///
/// Subscriptions deliver the complete matching set on every change, never
/// deltas. After an error has been delivered the subscription is finished and
/// delivers nothing further.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    fn subscribe(
        &self,
        collection: Collection,
        owner_id: &str,
        listener: SnapshotListener,
    ) -> Result<Subscription, RemoteError>;

    /// Stores a new document and returns its store-assigned id.
    async fn insert(&self, collection: Collection, fields: Map<String, Value>) -> Result<String, RemoteError>;

    async fn replace(&self, collection: Collection, id: &str, fields: Map<String, Value>) -> Result<(), RemoteError>;

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn subscription_stops_only_once() {
        let stops = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&stops);
        let mut subscription = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        subscription.stop();
        subscription.stop();
        drop(subscription);

        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_subscription_stops_it() {
        let stops = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&stops);
        let subscription = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(subscription.is_active());

        drop(subscription);

        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn collection_names_match_store_layout() {
        assert_eq!(Collection::People.name(), "people");
        assert_eq!(Collection::Events.to_string(), "events");
    }
}
