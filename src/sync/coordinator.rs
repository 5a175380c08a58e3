//! The synchronization state machine.
//!
//! [`SyncCoordinator`] owns the in-memory people and events. Identity changes,
//! subscription snapshots and remote write completions are all funnelled onto
//! one coordinator and handled one at a time, so the working set is never
//! mutated concurrently.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono_tz::Tz;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::household::{Event, Person};
use crate::query::QueryLayer;
use crate::reminder::ReminderScheduler;
use crate::storage::cache::LocalCache;
use crate::sync::codec::{DocumentCodec, decode_snapshot};
use crate::sync::remote::{Collection, RemoteError, RemoteStore, SnapshotListener, SnapshotResult, Subscription};
use crate::sync::session::Session;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Not authenticated")]
    AuthRequired,
    #[error("Remote store unavailable: {0}")]
    RemoteUnavailable(#[from] RemoteError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMode {
    /// No identity: reads and writes use the local copy only.
    Unauthenticated,
    SyncingFromRemote { owner_id: String },
    /// A subscription failed; serving the local snapshot while still signed in.
    RemoteDegraded { owner_id: String },
}

impl SyncMode {
    pub fn owner_id(&self) -> Option<&str> {
        match self {
            SyncMode::Unauthenticated => None,
            SyncMode::SyncingFromRemote { owner_id } | SyncMode::RemoteDegraded { owner_id } => Some(owner_id.as_str()),
        }
    }

    pub fn is_remote(&self) -> bool {
        !matches!(self, SyncMode::Unauthenticated)
    }
}

#[derive(Debug, Clone)]
enum Write {
    AddPerson(Person),
    UpdatePerson(Person),
    RemovePerson(String),
    AddEvent(Event),
    UpdateEvent(Event),
    RemoveEvent(String),
}

impl Write {
    fn collection(&self) -> Collection {
        match self {
            Write::AddPerson(_) | Write::UpdatePerson(_) | Write::RemovePerson(_) => Collection::People,
            Write::AddEvent(_) | Write::UpdateEvent(_) | Write::RemoveEvent(_) => Collection::Events,
        }
    }

    /// Adopts the id the store assigned to an inserted record.
    fn with_assigned_id(self, assigned: Option<String>) -> Self {
        match (self, assigned) {
            (Write::AddPerson(person), Some(id)) => Write::AddPerson(person.with_id(id)),
            (Write::AddEvent(event), Some(id)) => Write::AddEvent(event.with_id(id)),
            (write, _) => write,
        }
    }

    async fn send(&self, remote: &dyn RemoteStore) -> Result<Option<String>, RemoteError> {
        match self {
            Write::AddPerson(person) => remote.insert(Collection::People, person.encode()).await.map(Some),
            Write::UpdatePerson(person) => remote
                .replace(Collection::People, &person.id, person.encode())
                .await
                .map(|_| None),
            Write::RemovePerson(id) => remote.delete(Collection::People, id).await.map(|_| None),
            Write::AddEvent(event) => remote.insert(Collection::Events, event.encode()).await.map(Some),
            Write::UpdateEvent(event) => remote
                .replace(Collection::Events, &event.id, event.encode())
                .await
                .map(|_| None),
            Write::RemoveEvent(id) => remote.delete(Collection::Events, id).await.map(|_| None),
        }
    }
}

impl fmt::Display for Write {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action = match self {
            Write::AddPerson(_) => "add person",
            Write::UpdatePerson(_) => "update person",
            Write::RemovePerson(_) => "remove person",
            Write::AddEvent(_) => "add event",
            Write::UpdateEvent(_) => "update event",
            Write::RemoveEvent(_) => "remove event",
        };
        f.write_str(action)
    }
}

enum Message {
    Snapshot {
        collection: Collection,
        generation: u64,
        result: SnapshotResult,
    },
    WriteCompleted {
        write: Write,
        generation: u64,
        result: Result<Option<String>, RemoteError>,
    },
}

pub struct SyncCoordinator {
    remote: Arc<dyn RemoteStore>,
    cache: LocalCache,
    reminders: ReminderScheduler,
    session: Session,
    auth: watch::Receiver<Option<String>>,
    initial_auth_pending: bool,
    zone: Tz,
    mode: SyncMode,
    people: Vec<Person>,
    events: Vec<Event>,
    last_error: Option<String>,
    subscriptions: HashMap<Collection, Subscription>,
    generation: u64,
    pending_writes: usize,
    inbox_tx: mpsc::UnboundedSender<Message>,
    inbox_rx: mpsc::UnboundedReceiver<Message>,
}

impl SyncCoordinator {
    /// The session's current identity is handled by the first call to
    /// [`pump`](Self::pump), [`drain`](Self::drain) or [`settle`](Self::settle).
    pub fn new(
        session: Session,
        remote: Arc<dyn RemoteStore>,
        cache: LocalCache,
        reminders: ReminderScheduler,
        zone: Tz,
    ) -> Self {
        let auth = session.subscribe();
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            remote,
            cache,
            reminders,
            session,
            auth,
            initial_auth_pending: true,
            zone,
            mode: SyncMode::Unauthenticated,
            people: Vec::new(),
            events: Vec::new(),
            last_error: None,
            subscriptions: HashMap::new(),
            generation: 0,
            pending_writes: 0,
            inbox_tx,
            inbox_rx,
        }
    }

    pub fn mode(&self) -> &SyncMode {
        &self.mode
    }

    pub fn zone(&self) -> Tz {
        self.zone
    }

    pub fn people(&self) -> &[Person] {
        &self.people
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// Remote writes dispatched but not yet completed.
    pub fn pending_writes(&self) -> usize {
        self.pending_writes
    }

    pub fn is_live(&self, collection: Collection) -> bool {
        self.subscriptions.contains_key(&collection)
    }

    pub fn query(&self) -> QueryLayer<'_> {
        QueryLayer::new(&self.people, &self.events)
    }

    pub fn get_person(&self, id: &str) -> Option<&Person> {
        self.people.iter().find(|person| person.id == id)
    }

    /// Waits for the next identity change, snapshot or write completion and
    /// handles it fully.
    pub async fn pump(&mut self) {
        if let Some(owner) = self.pending_auth_change() {
            self.handle_auth_change(owner);
            return;
        }

        tokio::select! {
            changed = self.auth.changed() => {
                if changed.is_ok() {
                    let owner = self.auth.borrow_and_update().clone();
                    self.handle_auth_change(owner);
                }
            }
            Some(message) = self.inbox_rx.recv() => self.handle_message(message),
        }
    }

    /// Handles everything already queued without waiting. Returns the number
    /// of items handled.
    pub fn drain(&mut self) -> usize {
        let mut handled = 0;
        if let Some(owner) = self.pending_auth_change() {
            self.handle_auth_change(owner);
            handled += 1;
        }
        while let Ok(message) = self.inbox_rx.try_recv() {
            self.handle_message(message);
            handled += 1;
        }
        handled
    }

    /// Drains, then waits until every dispatched remote write has completed.
    pub async fn settle(&mut self) {
        self.drain();
        while self.pending_writes > 0 {
            match self.inbox_rx.recv().await {
                Some(message) => self.handle_message(message),
                None => break,
            }
        }
        self.drain();
    }

    pub fn add_person(&mut self, mut person: Person) -> Result<(), SyncError> {
        if let Some(owner_id) = self.remote_owner()? {
            person.owner_id = owner_id;
        }
        self.submit(Write::AddPerson(person))
    }

    pub fn update_person(&mut self, person: Person) -> Result<(), SyncError> {
        self.submit(Write::UpdatePerson(person))
    }

    /// Removes the person, then each of their events through [`remove_event`](Self::remove_event).
    pub fn remove_person(&mut self, person_id: &str) -> Result<(), SyncError> {
        self.submit(Write::RemovePerson(person_id.to_string()))?;

        let owned: Vec<String> = self
            .events
            .iter()
            .filter(|event| event.person_id == person_id)
            .map(|event| event.id.clone())
            .collect();
        tracing::info!("Removing {} events owned by person {}", owned.len(), person_id);
        for event_id in owned {
            self.remove_event(&event_id)?;
        }
        Ok(())
    }

    pub fn add_event(&mut self, mut event: Event) -> Result<(), SyncError> {
        if let Some(owner_id) = self.remote_owner()? {
            event.owner_id = owner_id;
        }
        self.submit(Write::AddEvent(event))
    }

    pub fn update_event(&mut self, event: Event) -> Result<(), SyncError> {
        self.submit(Write::UpdateEvent(event))
    }

    pub fn remove_event(&mut self, event_id: &str) -> Result<(), SyncError> {
        if self.remote_owner()?.is_some() {
            self.reminders.cancel(event_id);
        }
        self.submit(Write::RemoveEvent(event_id.to_string()))
    }

    fn remote_owner(&mut self) -> Result<Option<String>, SyncError> {
        if !self.mode.is_remote() {
            return Ok(None);
        }
        match self.session.current_owner() {
            Some(owner_id) => Ok(Some(owner_id)),
            None => {
                self.last_error = Some(SyncError::AuthRequired.to_string());
                Err(SyncError::AuthRequired)
            }
        }
    }

    fn submit(&mut self, write: Write) -> Result<(), SyncError> {
        if self.remote_owner()?.is_some() {
            self.dispatch(write);
        } else {
            self.apply_locally(write);
        }
        Ok(())
    }

    fn dispatch(&mut self, write: Write) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.fail_write(write, RemoteError::Unavailable("no async runtime".to_string()));
            return;
        };

        tracing::debug!("Dispatching remote {}", write);
        let remote = Arc::clone(&self.remote);
        let inbox = self.inbox_tx.clone();
        let generation = self.generation;
        self.pending_writes += 1;
        runtime.spawn(async move {
            let result = write.send(remote.as_ref()).await;
            let _ = inbox.send(Message::WriteCompleted {
                write,
                generation,
                result,
            });
        });
    }

    fn pending_auth_change(&mut self) -> Option<Option<String>> {
        if self.initial_auth_pending {
            self.initial_auth_pending = false;
            return Some(self.auth.borrow_and_update().clone());
        }
        match self.auth.has_changed() {
            Ok(true) => Some(self.auth.borrow_and_update().clone()),
            _ => None,
        }
    }

    fn handle_auth_change(&mut self, owner: Option<String>) {
        self.detach();
        match owner {
            Some(owner_id) => {
                tracing::info!("Syncing from remote for {}", owner_id);
                self.mode = SyncMode::SyncingFromRemote {
                    owner_id: owner_id.clone(),
                };
                for collection in [Collection::People, Collection::Events] {
                    match self.attach(collection, &owner_id) {
                        Ok(subscription) => {
                            self.subscriptions.insert(collection, subscription);
                        }
                        Err(e) => self.subscription_failed(collection, e),
                    }
                }
            }
            None => {
                tracing::info!("No user authenticated, using local storage");
                self.mode = SyncMode::Unauthenticated;
                self.load_local();
            }
        }
    }

    fn attach(&self, collection: Collection, owner_id: &str) -> Result<Subscription, SyncError> {
        let inbox = self.inbox_tx.clone();
        let generation = self.generation;
        let listener: SnapshotListener = Arc::new(move |result| {
            let _ = inbox.send(Message::Snapshot {
                collection,
                generation,
                result,
            });
        });
        Ok(self.remote.subscribe(collection, owner_id, listener)?)
    }

    fn detach(&mut self) {
        // Snapshots already queued by the old listeners carry the old generation.
        self.generation += 1;
        for (collection, mut subscription) in self.subscriptions.drain() {
            tracing::debug!("Detaching {} listener", collection);
            subscription.stop();
        }
    }

    fn handle_message(&mut self, message: Message) {
        match message {
            Message::Snapshot {
                collection,
                generation,
                result,
            } => self.apply_snapshot(collection, generation, result),
            Message::WriteCompleted {
                write,
                generation,
                result,
            } => self.complete_write(write, generation, result),
        }
    }

    fn apply_snapshot(&mut self, collection: Collection, generation: u64, result: SnapshotResult) {
        if generation != self.generation || !self.is_live(collection) {
            tracing::debug!("Ignoring stale {} snapshot", collection);
            return;
        }

        match result {
            Ok(documents) => {
                match collection {
                    Collection::People => {
                        self.people = decode_snapshot(&documents, self.zone);
                        tracing::info!("Loaded {} people from remote", self.people.len());
                    }
                    Collection::Events => {
                        self.events = decode_snapshot(&documents, self.zone);
                        tracing::info!("Loaded {} events from remote", self.events.len());
                    }
                }
                self.persist();
            }
            Err(e) => self.subscription_failed(collection, e.into()),
        }
    }

    fn subscription_failed(&mut self, collection: Collection, error: SyncError) {
        if let Some(mut subscription) = self.subscriptions.remove(&collection) {
            subscription.stop();
        }
        let message = format!("Failed to load {}: {}", collection, error);
        tracing::error!("{}", message);
        self.last_error = Some(message);

        let degraded_owner = match &self.mode {
            SyncMode::SyncingFromRemote { owner_id } => Some(owner_id.clone()),
            _ => None,
        };
        if let Some(owner_id) = degraded_owner {
            tracing::warn!("Remote sync degraded for {}, serving local snapshot", owner_id);
            self.mode = SyncMode::RemoteDegraded { owner_id };
            self.load_local();
        }
    }

    fn complete_write(&mut self, write: Write, generation: u64, result: Result<Option<String>, RemoteError>) {
        self.pending_writes = self.pending_writes.saturating_sub(1);
        if generation != self.generation {
            // Dispatched for an identity that is no longer current.
            match result {
                Ok(_) => tracing::info!("Remote {} completed after identity change, not applied", write),
                Err(e) => tracing::warn!("Remote {} failed after identity change, discarded: {}", write, e),
            }
            return;
        }
        match result {
            Ok(assigned) => {
                let write = write.with_assigned_id(assigned);
                tracing::info!("Remote {} succeeded", write);
                if self.is_live(write.collection()) {
                    self.confirm(write);
                } else {
                    // Nothing will echo this write back into memory.
                    self.apply_locally(write);
                }
            }
            Err(e) => self.fail_write(write, e),
        }
    }

    fn fail_write(&mut self, write: Write, error: RemoteError) {
        let message = format!("Failed to {}: {}", write, error);
        tracing::error!("{}", message);
        self.last_error = Some(message);
        self.apply_locally(write);
    }

    /// Reminder side effects of a write the live subscription will echo back.
    fn confirm(&mut self, write: Write) {
        match write {
            Write::AddEvent(event) => {
                self.reminders.schedule(&event, &self.people);
            }
            Write::UpdateEvent(event) => {
                self.reminders.reschedule(&event, &self.people);
            }
            _ => {}
        }
    }

    fn apply_locally(&mut self, write: Write) {
        match write {
            Write::AddPerson(person) => match self.people.iter_mut().find(|existing| existing.id == person.id) {
                Some(slot) => *slot = person,
                None => self.people.push(person),
            },
            Write::UpdatePerson(person) => {
                if let Some(slot) = self.people.iter_mut().find(|existing| existing.id == person.id) {
                    *slot = person;
                }
            }
            Write::RemovePerson(id) => self.people.retain(|person| person.id != id),
            Write::AddEvent(event) => {
                self.reminders.reschedule(&event, &self.people);
                match self.events.iter_mut().find(|existing| existing.id == event.id) {
                    Some(slot) => *slot = event,
                    None => self.events.push(event),
                }
            }
            Write::UpdateEvent(event) => {
                if let Some(slot) = self.events.iter_mut().find(|existing| existing.id == event.id) {
                    self.reminders.reschedule(&event, &self.people);
                    *slot = event;
                }
            }
            Write::RemoveEvent(id) => {
                self.events.retain(|event| event.id != id);
                self.reminders.cancel(&id);
            }
        }
        self.persist();
    }

    fn load_local(&mut self) {
        if let Some(people) = self.cache.load(Collection::People) {
            self.people = people;
        }
        if let Some(mut events) = self.cache.load::<Event>(Collection::Events) {
            for event in &mut events {
                event.rezone(self.zone);
            }
            self.events = events;
        }
        tracing::info!(
            "Serving local snapshot: {} people, {} events",
            self.people.len(),
            self.events.len()
        );
    }

    fn persist(&self) {
        self.cache.save(Collection::People, &self.people);
        self.cache.save(Collection::Events, &self.events);
    }
}
