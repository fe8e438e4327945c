//! Data payload chunking and content addressing.
//!
//! Record payloads above [`MAX_ENCODED_SIZE`] are not inlined into the
//! message descriptor as `encodedData`; instead they are chunked into
//! fixed-size IPLD byte blocks linked from a root list block, and the
//! message carries only the root block's CID (`dataCid`) and the payload's
//! byte length (`dataSize`). Small payloads still get both the inline
//! `encodedData` field and a content-addressed copy in the block store, so
//! a single code path always has something to hash and verify against.

use std::io::{Cursor, Read, Write};

use ipld_core::ipld::Ipld;
use serde::{Deserialize, Serialize};

use crate::provider::{BlockStore, DataStore};
use crate::store::block;
use crate::utils::cid;
use crate::{Result, unexpected};

/// Payloads at or below this size are inlined as base64url `encodedData` on
/// the message descriptor in addition to being stored as a block.
pub const MAX_ENCODED_SIZE: usize = 30_000;

/// Size of each chunk a data stream is split into before being stored as an
/// individual IPLD block.
const CHUNK_SIZE: usize = 4096;

/// An in-memory, cloneable byte stream used as record payload input and
/// output. Cloning re-reads from the start; the clone's read position is
/// independent of the original's.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DataStream {
    bytes: Vec<u8>,
    #[serde(skip)]
    pos: usize,
}

impl DataStream {
    /// Returns the full byte content, discarding any read position.
    #[must_use]
    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }

    /// Returns the number of bytes in the stream.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns whether the stream is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Returns a fresh [`Cursor`] positioned at the start of the stream.
    #[must_use]
    pub fn reader(&self) -> Cursor<Vec<u8>> {
        Cursor::new(self.bytes.clone())
    }

    /// Fetches a record's data from the [`DataStore`], if present.
    ///
    /// # Errors
    /// Returns an error if the underlying store fails.
    pub async fn from_store(
        owner: &str, record_id: &str, data_cid: &str, store: &impl DataStore,
    ) -> Result<Option<Self>> {
        DataStore::get(store, owner, record_id, data_cid).await
    }
}

impl Read for DataStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let remaining = &self.bytes[self.pos.min(self.bytes.len())..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }
}

impl From<Vec<u8>> for DataStream {
    fn from(bytes: Vec<u8>) -> Self {
        Self { bytes, pos: 0 }
    }
}

impl From<&[u8]> for DataStream {
    fn from(bytes: &[u8]) -> Self {
        Self { bytes: bytes.to_vec(), pos: 0 }
    }
}

/// Reads `reader` to completion, chunking it into IPLD byte blocks and
/// storing each under its own CID, then storing a root list block (under
/// `data_cid`) linking every chunk in order.
///
/// Returns the CID actually computed from the data and the total byte
/// count read, so callers can verify both against the message descriptor.
pub async fn put(
    owner: &str, data_cid: &str, mut reader: impl Read, store: &impl BlockStore,
) -> Result<(String, usize)> {
    let mut links = Vec::new();
    let mut byte_count = 0;

    loop {
        let mut buffer = [0u8; CHUNK_SIZE];
        let bytes_read =
            reader.read(&mut buffer[..]).map_err(|e| unexpected!("issue reading data: {e}"))?;
        if bytes_read == 0 {
            break;
        }

        let ipld = Ipld::Bytes(buffer[..bytes_read].to_vec());
        let block = block::Block::encode(&ipld)?;

        store
            .put(owner, block.cid(), block.data())
            .await
            .map_err(|e| unexpected!("issue storing data block: {e}"))?;

        let cid =
            cid::of_bytes_to_cid(block.cid()).map_err(|e| unexpected!("invalid CID: {e}"))?;
        links.push(Ipld::Link(cid));
        byte_count += bytes_read;
    }

    let root = block::Block::encode(&Ipld::List(links))?;
    store
        .put(owner, root.cid(), root.data())
        .await
        .map_err(|e| unexpected!("issue storing data root: {e}"))?;

    let _ = data_cid;
    Ok((root.cid().to_string(), byte_count))
}

/// Reassembles a data payload previously stored with [`put`], returning
/// `None` if the root block is not present.
pub async fn get(owner: &str, data_cid: &str, store: &impl BlockStore) -> Result<Option<DataStream>> {
    let Some(bytes) = store.get(owner, data_cid).await.map_err(|e| unexpected!("{e}"))? else {
        return Ok(None);
    };

    let Ipld::List(links) = block::decode_ipld(&bytes)? else {
        return Err(unexpected!("data root block is not a list"));
    };

    let mut buf = Cursor::new(Vec::new());
    for link in links {
        let Ipld::Link(link_cid) = link else {
            return Err(unexpected!("data root block contains a non-link entry"));
        };
        let Some(bytes) =
            store.get(owner, &link_cid.to_string()).await.map_err(|e| unexpected!("{e}"))?
        else {
            return Ok(None);
        };
        let Ipld::Bytes(chunk) = block::decode_ipld(&bytes)? else {
            return Err(unexpected!("data chunk block is not bytes"));
        };
        buf.write_all(&chunk).map_err(|e| unexpected!("issue reassembling data: {e}"))?;
    }

    Ok(Some(DataStream::from(buf.into_inner())))
}

/// Removes a data payload previously stored with [`put`]: the root list
/// block and every chunk block it links to. A no-op if the root block is
/// not present.
pub async fn delete(owner: &str, data_cid: &str, store: &impl BlockStore) -> Result<()> {
    let Some(bytes) = store.get(owner, data_cid).await.map_err(|e| unexpected!("{e}"))? else {
        return Ok(());
    };
    let Ipld::List(links) = block::decode_ipld(&bytes)? else {
        return Err(unexpected!("data root block is not a list"));
    };
    for link in links {
        let Ipld::Link(link_cid) = link else {
            continue;
        };
        store
            .delete(owner, &link_cid.to_string())
            .await
            .map_err(|e| unexpected!("issue deleting data chunk: {e}"))?;
    }
    store.delete(owner, data_cid).await.map_err(|e| unexpected!("issue deleting data root: {e}"))
}
