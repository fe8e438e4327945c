//! An in-memory [`BlockStore`], keyed by `(owner, cid)`.

use std::collections::HashMap;
use std::sync::Mutex;

use dwn_node::provider::BlockStore;
use dwn_node::Result;

/// A content-addressed block store backed by a plain map. Blocks are never
/// evicted except by explicit `delete`/`purge`.
#[derive(Default)]
pub struct MemoryBlockStore {
    blocks: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl BlockStore for MemoryBlockStore {
    async fn put(&self, owner: &str, cid: &str, block: &[u8]) -> Result<()> {
        self.blocks.lock().unwrap().insert((owner.to_string(), cid.to_string()), block.to_vec());
        Ok(())
    }

    async fn get(&self, owner: &str, cid: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blocks.lock().unwrap().get(&(owner.to_string(), cid.to_string())).cloned())
    }

    async fn delete(&self, owner: &str, cid: &str) -> Result<()> {
        self.blocks.lock().unwrap().remove(&(owner.to_string(), cid.to_string()));
        Ok(())
    }

    async fn purge(&self) -> Result<()> {
        self.blocks.lock().unwrap().clear();
        Ok(())
    }
}
