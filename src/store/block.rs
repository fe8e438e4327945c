//! CBOR block encoding shared by the message store, index store, and data
//! store. Every persisted block is canonical CBOR; its CID is the content
//! address under which [`crate::provider::BlockStore`] keys it.

use ipld_core::ipld::Ipld;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::utils::cid;
use crate::{Result, unexpected};

/// A CBOR-encoded value paired with the CID computed from its bytes.
pub struct Block {
    cid: String,
    data: Vec<u8>,
}

impl Block {
    /// Encodes `value` to canonical CBOR and computes its CID.
    pub fn encode<T: Serialize>(value: &T) -> Result<Self> {
        let data = cid::to_cbor(value)?;
        let cid = cid::of_bytes(&data);
        Ok(Self { cid, data })
    }

    /// The block's content identifier.
    #[must_use]
    pub fn cid(&self) -> &str {
        &self.cid
    }

    /// The block's encoded bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Encodes `value` to canonical CBOR bytes, for storage under its own CID.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    cid::to_cbor(value)
}

/// Decodes a typed value from canonical CBOR bytes.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::from_reader(bytes).map_err(|e| unexpected!("issue decoding block: {e}"))
}

/// Decodes an untyped IPLD value from canonical CBOR bytes, used for the
/// data store's chunk and root-list blocks, which carry no message schema.
pub fn decode_ipld(bytes: &[u8]) -> Result<Ipld> {
    ciborium::from_reader(bytes).map_err(|e| unexpected!("issue decoding IPLD block: {e}"))
}
