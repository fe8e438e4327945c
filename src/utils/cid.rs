//! Canonical CBOR encoding and content identifier (CID) computation.
//!
//! Every structured value in the store — descriptors, entries, index
//! records, protocol definitions — is addressed by the CID of its canonical
//! CBOR encoding. Canonical here means: serde's field order (struct
//! definition order), CBOR's own deterministic encoding rules for the
//! primitives we use, and a single fixed hash function and multicodec.

use std::str::FromStr;

use multihash_codetable::{Code, MultihashDigest};
use serde::Serialize;

use crate::{Result, unexpected};

/// Multicodec for raw binary content, used for every CID this crate mints.
const RAW: u64 = 0x55;

/// Computes the CID of a serializable value's canonical CBOR encoding.
pub fn from_value<T: Serialize>(payload: &T) -> Result<String> {
    let buf = to_cbor(payload)?;
    Ok(of_bytes(&buf))
}

/// Serializes a value to canonical CBOR bytes.
pub fn to_cbor<T: Serialize>(payload: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(payload, &mut buf)
        .map_err(|e| unexpected!("issue serializing to CBOR: {e}"))?;
    Ok(buf)
}

/// Computes the CID of raw bytes directly (used for data payload chunks,
/// which are stored as opaque blocks rather than CBOR-encoded structures).
#[must_use]
pub fn of_bytes(bytes: &[u8]) -> String {
    let hash = Code::Sha2_256.digest(bytes);
    cid::Cid::new_v1(RAW, hash).to_string()
}

/// Parses a CID string into a [`cid::Cid`], for callers that need the typed
/// form (e.g. to embed as an IPLD link) rather than its string rendering.
pub fn of_bytes_to_cid(cid_str: &str) -> Result<cid::Cid> {
    cid::Cid::from_str(cid_str).map_err(|e| unexpected!("invalid CID `{cid_str}`: {e}"))
}
