use std::sync::Arc;

use tokio::sync::watch;

/// The signed-in identity, shared between the identity provider and its consumers.
///
/// Cloning yields another handle onto the same session.
#[derive(Debug, Clone)]
pub struct Session {
    owner: Arc<watch::Sender<Option<String>>>,
}

impl Session {
    pub fn new(owner_id: Option<String>) -> Self {
        let (owner, _) = watch::channel(owner_id);
        Self { owner: Arc::new(owner) }
    }

    pub fn signed_out() -> Self {
        Self::new(None)
    }

    pub fn signed_in(owner_id: impl Into<String>) -> Self {
        Self::new(Some(owner_id.into()))
    }

    /// Notifies subscribers even when the same owner signs in again.
    pub fn sign_in(&self, owner_id: impl Into<String>) {
        let owner_id = owner_id.into();
        tracing::info!("User authenticated: {}", owner_id);
        self.owner.send_replace(Some(owner_id));
    }

    pub fn sign_out(&self) {
        tracing::info!("User signed out");
        self.owner.send_replace(None);
    }

    pub fn current_owner(&self) -> Option<String> {
        self.owner.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.owner.borrow().is_some()
    }

    /// A receiver that has already seen the current value.
    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.owner.subscribe()
    }
}
