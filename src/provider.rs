//! # Storage and Identity Contracts
//!
//! The core never touches a concrete database, blob store, event bus, or
//! key-management system directly — it is written entirely against the
//! traits in this module. A deployment wires up one [`Provider`]
//! implementation that covers all of them; the `test-node` workspace crate
//! provides an in-memory one for tests.

use async_trait::async_trait;
pub use vercre_infosec::{Algorithm, Cipher, Signer};

use crate::event::{Event, SubscribeFilter, Subscriber};
pub use crate::store::{Entry, Query};
pub use crate::tasks::ResumableTask;
use crate::{Cursor, Result};

/// Everything a deployment must supply to run the core: message/data/event
/// storage, resumable task bookkeeping, signing keys, and DID resolution.
pub trait Provider:
    MessageStore
    + BlockStore
    + DataStore
    + TaskStore
    + EventLog
    + EventStream
    + KeyStore
    + DidResolver
    + Clone
{
}

/// A tenant's signing and encryption keys.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Returns the keyring used to sign and decrypt on `identifier`'s
    /// behalf.
    ///
    /// # Errors
    /// Returns an error if no keyring is registered for `identifier`.
    fn keyring(&self, identifier: &str) -> Result<impl Keyring>;
}

/// Combines message signing with payload encryption, the two cryptographic
/// operations the core ever needs from a tenant's keys.
#[async_trait]
pub trait Keyring: Signer + Cipher + Send + Sync {}

/// Indexed, queryable storage for message envelopes.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persists `entry`, indexing every field in [`Entry::indexes`].
    async fn put(&self, owner: &str, entry: &Entry) -> Result<()>;

    /// Runs `query` and returns a sorted, paginated page of matches plus a
    /// cursor for the next page. An empty/default cursor means no further
    /// pages remain.
    async fn query(&self, owner: &str, query: &Query) -> Result<(Vec<Entry>, Cursor)>;

    /// Fetches a single entry by its message CID.
    async fn get(&self, owner: &str, message_cid: &str) -> Result<Option<Entry>>;

    /// Removes an entry and its index entries.
    async fn delete(&self, owner: &str, message_cid: &str) -> Result<()>;

    /// Removes every entry for every tenant. Used only by test fixtures.
    async fn purge(&self) -> Result<()>;
}

/// Content-addressed block storage: the substrate [`MessageStore`],
/// [`DataStore`], and the index store are all built on.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Stores `block` under the content identifier `cid`.
    async fn put(&self, owner: &str, cid: &str, block: &[u8]) -> Result<()>;

    /// Fetches a block by CID.
    async fn get(&self, owner: &str, cid: &str) -> Result<Option<Vec<u8>>>;

    /// Removes a block.
    async fn delete(&self, owner: &str, cid: &str) -> Result<()>;

    /// Removes every block for every tenant. Used only by test fixtures.
    async fn purge(&self) -> Result<()>;
}

/// Record payload storage: chunked, content-addressed data blobs keyed by
/// `dataCid`, distinct from [`BlockStore`] only in that it is addressed by
/// `(owner, record_id, data_cid)` so a deployment may garbage-collect data
/// independently of the message log.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Stores the bytes read from `stream`, returning the computed CID and
    /// byte length.
    async fn put(
        &self, owner: &str, record_id: &str, data_cid: &str, stream: crate::data::DataStream,
    ) -> Result<(String, usize)>;

    /// Fetches previously stored data.
    async fn get(
        &self, owner: &str, record_id: &str, data_cid: &str,
    ) -> Result<Option<crate::data::DataStream>>;

    /// Removes stored data.
    async fn delete(&self, owner: &str, record_id: &str, data_cid: &str) -> Result<()>;
}

/// Append-only, queryable tail of every message ever processed for a
/// tenant, used by `MessagesQuery`/`MessagesSubscribe` and by the record
/// state machine to answer "what changed since".
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Appends `event` to the tenant's event log.
    async fn append(&self, owner: &str, event: &Event) -> Result<()>;

    /// Retrieves a filtered page of events.
    async fn query(&self, owner: &str, query: &Query) -> Result<(Vec<Event>, Cursor)>;

    /// Deletes the event for `message_cid` (used when a write is pruned).
    async fn delete(&self, owner: &str, message_cid: &str) -> Result<()>;

    /// Removes every event for every tenant. Used only by test fixtures.
    async fn purge(&self) -> Result<()>;
}

/// Live fan-out of newly appended events to active subscriptions.
#[async_trait]
pub trait EventStream: Send + Sync {
    /// Publishes `event` to any subscriber whose filter matches it.
    async fn emit(&self, owner: &str, event: &Event) -> Result<()>;

    /// Registers a new subscription and returns a handle yielding matching
    /// events as they are emitted.
    async fn subscribe(&self, owner: &str, filter: SubscribeFilter) -> Result<Subscriber>;
}

/// Durable bookkeeping for tasks that must survive a crash mid-execution
/// (currently: cascading record deletes).
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Registers a new resumable task. It becomes visible to
    /// [`TaskStore::grab`] only after `timeout_secs` elapses without being
    /// completed.
    async fn register(&self, owner: &str, task: &ResumableTask, timeout_secs: u64) -> Result<()>;

    /// Atomically claims up to `count` overdue tasks for execution,
    /// extending their timeout so a concurrent worker cannot grab them too.
    async fn grab(&self, owner: &str, count: u64) -> Result<Vec<ResumableTask>>;

    /// Reads a task by id without claiming it.
    async fn read(&self, owner: &str, task_id: &str) -> Result<Option<ResumableTask>>;

    /// Extends a claimed task's visibility timeout, for long-running work.
    /// A no-op if the task no longer exists.
    async fn extend(&self, owner: &str, task_id: &str, timeout_secs: u64) -> Result<()>;

    /// Marks a task complete and removes it.
    async fn delete(&self, owner: &str, task_id: &str) -> Result<()>;

    /// Removes every task for `owner`. Used only by test fixtures.
    async fn purge(&self, owner: &str) -> Result<()>;
}

/// Minimal DID document shape the core needs: the verification methods
/// available for signature verification. Resolution itself is external
/// (see [`DidResolver`]); this crate only reads `public_key_jwk` entries
/// back out of whatever a resolver returns.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// The resolved DID, matching the request URL absent a fragment.
    pub id: String,
    /// Verification methods available on the document.
    #[serde(default)]
    pub verification_method: Vec<VerificationMethod>,
}

/// A single verification method entry from a DID document.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationMethod {
    /// The verification method's identifier, e.g. `did:example:abc#key-1`.
    pub id: String,
    /// The public key, as a JSON Web Key.
    pub public_key_jwk: serde_json::Value,
}

impl Document {
    /// Finds a verification method by its full id or bare `#fragment`.
    #[must_use]
    pub fn find(&self, key_id: &str) -> Option<&VerificationMethod> {
        self.verification_method
            .iter()
            .find(|vm| vm.id == key_id || vm.id.rsplit('#').next() == key_id.rsplit('#').next())
    }
}

/// Resolves a DID (or DID URL, including a `#fragment` verification method
/// reference) to a [`Document`]. Treated as a pure external collaborator:
/// the core neither caches nor validates resolution beyond what
/// [`crate::auth`] needs to verify a signature.
#[async_trait]
pub trait DidResolver: Send + Sync {
    /// Resolves `url` to a DID document.
    async fn resolve(&self, url: &str) -> Result<Document>;
}
