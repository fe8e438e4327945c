//! An in-memory [`Provider`] implementation for exercising the core crate's
//! message handlers without a real deployment's storage stack.
//!
//! [`ProviderImpl::new`] pre-registers three identities — [`ALICE_DID`],
//! [`BOB_DID`], and [`CAROL_DID`] — each with its own generated signing key,
//! so scenario tests can fetch a keyring for any of them immediately.
//! Additional identities can be registered with [`ProviderImpl::register`].

mod block_store;
mod event_log;
mod event_stream;
pub mod keystore;
mod task_store;

use std::sync::{Arc, Mutex};

use dwn_node::data::DataStream;
use dwn_node::event::SubscribeFilter;
use dwn_node::provider::{
    BlockStore, DataStore, DidResolver, Document, EventLog, EventStream, KeyStore, MessageStore,
    Provider, ResumableTask, TaskStore,
};
use dwn_node::store::{Entry, Query};
use dwn_node::store::message::BlockMessageStore;
use dwn_node::{data, Cursor, Result};

use crate::block_store::MemoryBlockStore;
use crate::event_log::MemoryEventLog;
use crate::event_stream::MemoryEventStream;
use crate::keystore::{Identity, IdentityStore};
use crate::task_store::MemoryTaskStore;

/// A pre-registered test identity.
pub const ALICE_DID: &str = "did:example:alice";
/// A pre-registered test identity.
pub const BOB_DID: &str = "did:example:bob";
/// A pre-registered test identity.
pub const CAROL_DID: &str = "did:example:carol";

struct Inner {
    blocks: MemoryBlockStore,
    events: MemoryEventLog,
    stream: MemoryEventStream,
    tasks: MemoryTaskStore,
    identities: Mutex<IdentityStore>,
}

/// The in-memory [`Provider`] used by integration tests.
#[derive(Clone)]
pub struct ProviderImpl {
    inner: Arc<Inner>,
}

impl Default for ProviderImpl {
    fn default() -> Self {
        let mut identities = IdentityStore::default();
        identities.register(Identity::generate(ALICE_DID));
        identities.register(Identity::generate(BOB_DID));
        identities.register(Identity::generate(CAROL_DID));

        Self {
            inner: Arc::new(Inner {
                blocks: MemoryBlockStore::default(),
                events: MemoryEventLog::default(),
                stream: MemoryEventStream::default(),
                tasks: MemoryTaskStore::default(),
                identities: Mutex::new(identities),
            }),
        }
    }
}

impl ProviderImpl {
    /// Returns a fresh provider with [`ALICE_DID`], [`BOB_DID`], and
    /// [`CAROL_DID`] already registered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an additional identity, generating a fresh signing key for
    /// it.
    pub fn register(&self, did: impl Into<String>) {
        self.inner.identities.lock().unwrap().register(Identity::generate(did));
    }
}

impl Provider for ProviderImpl {}

impl BlockStore for ProviderImpl {
    async fn put(&self, owner: &str, cid: &str, block: &[u8]) -> Result<()> {
        self.inner.blocks.put(owner, cid, block).await
    }

    async fn get(&self, owner: &str, cid: &str) -> Result<Option<Vec<u8>>> {
        self.inner.blocks.get(owner, cid).await
    }

    async fn delete(&self, owner: &str, cid: &str) -> Result<()> {
        self.inner.blocks.delete(owner, cid).await
    }

    async fn purge(&self) -> Result<()> {
        self.inner.blocks.purge().await
    }
}

impl MessageStore for ProviderImpl {
    async fn put(&self, owner: &str, entry: &Entry) -> Result<()> {
        BlockMessageStore::new(self).put(owner, entry).await
    }

    async fn query(&self, owner: &str, query: &Query) -> Result<(Vec<Entry>, Cursor)> {
        BlockMessageStore::new(self).query(owner, query).await
    }

    async fn get(&self, owner: &str, message_cid: &str) -> Result<Option<Entry>> {
        BlockMessageStore::new(self).get(owner, message_cid).await
    }

    async fn delete(&self, owner: &str, message_cid: &str) -> Result<()> {
        BlockMessageStore::new(self).delete(owner, message_cid).await
    }

    async fn purge(&self) -> Result<()> {
        BlockMessageStore::new(self).purge().await
    }
}

impl DataStore for ProviderImpl {
    async fn put(
        &self, owner: &str, _record_id: &str, data_cid: &str, stream: DataStream,
    ) -> Result<(String, usize)> {
        data::put(owner, data_cid, stream.reader(), self).await
    }

    async fn get(&self, owner: &str, _record_id: &str, data_cid: &str) -> Result<Option<DataStream>> {
        data::get(owner, data_cid, self).await
    }

    async fn delete(&self, owner: &str, _record_id: &str, data_cid: &str) -> Result<()> {
        data::delete(owner, data_cid, self).await
    }
}

impl EventLog for ProviderImpl {
    async fn append(&self, owner: &str, event: &dwn_node::event::Event) -> Result<()> {
        self.inner.events.append(owner, event).await
    }

    async fn query(&self, owner: &str, query: &Query) -> Result<(Vec<dwn_node::event::Event>, Cursor)> {
        self.inner.events.query(owner, query).await
    }

    async fn delete(&self, owner: &str, message_cid: &str) -> Result<()> {
        self.inner.events.delete(owner, message_cid).await
    }

    async fn purge(&self) -> Result<()> {
        self.inner.events.purge().await
    }
}

impl EventStream for ProviderImpl {
    async fn emit(&self, owner: &str, event: &dwn_node::event::Event) -> Result<()> {
        self.inner.stream.emit(owner, event).await
    }

    async fn subscribe(&self, owner: &str, filter: SubscribeFilter) -> Result<dwn_node::event::Subscriber> {
        self.inner.stream.subscribe(owner, filter).await
    }
}

impl TaskStore for ProviderImpl {
    async fn register(&self, owner: &str, task: &ResumableTask, timeout_secs: u64) -> Result<()> {
        self.inner.tasks.register(owner, task, timeout_secs).await
    }

    async fn grab(&self, owner: &str, count: u64) -> Result<Vec<ResumableTask>> {
        self.inner.tasks.grab(owner, count).await
    }

    async fn read(&self, owner: &str, task_id: &str) -> Result<Option<ResumableTask>> {
        self.inner.tasks.read(owner, task_id).await
    }

    async fn extend(&self, owner: &str, task_id: &str, timeout_secs: u64) -> Result<()> {
        self.inner.tasks.extend(owner, task_id, timeout_secs).await
    }

    async fn delete(&self, owner: &str, task_id: &str) -> Result<()> {
        self.inner.tasks.delete(owner, task_id).await
    }

    async fn purge(&self, owner: &str) -> Result<()> {
        self.inner.tasks.purge(owner).await
    }
}

impl KeyStore for ProviderImpl {
    fn keyring(&self, identifier: &str) -> Result<impl dwn_node::provider::Keyring> {
        self.inner.identities.lock().unwrap().keyring(identifier)
    }
}

impl DidResolver for ProviderImpl {
    async fn resolve(&self, url: &str) -> Result<Document> {
        self.inner.identities.lock().unwrap().document_for(url)
    }
}
