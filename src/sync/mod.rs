pub mod codec;
pub mod coordinator;
pub mod firestore;
pub mod memory_store;
pub mod remote;
pub mod session;

pub use coordinator::{SyncCoordinator, SyncError, SyncMode};
pub use firestore::FirestoreStore;
pub use memory_store::MemoryStore;
pub use remote::{Collection, RemoteDocument, RemoteError, RemoteStore, Subscription};
pub use session::Session;
