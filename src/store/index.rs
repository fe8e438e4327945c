//! Secondary indexes over the message store.
//!
//! Each indexed field is stored as its own content-addressed block: a
//! `BTreeMap<value, Set<message_cid>>` keyed by the CID of
//! `"{owner}-{field}"`. A query picks the single most selective indexed
//! field present on its filter (see [`crate::records::RecordsFilter::to_concise`]),
//! scans that field's index for candidate CIDs, fetches each candidate from
//! the block store, and re-checks it against the full filter predicate —
//! the index narrows the scan, the predicate guarantees correctness.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::provider::BlockStore;
use crate::store::{Entry, EntryType, Query, block};
use crate::{Result, unexpected};

/// Indexes every field [`crate::records::Write::indexes`] (or the
/// equivalent for deletes/configures) derived for `entry`.
pub async fn insert(owner: &str, entry: &Entry, store: &impl BlockStore) -> Result<()> {
    let message_cid = entry.cid()?;
    let indexes = IndexesBuilder::new().owner(owner).store(store).build();

    for (field, value) in &entry.indexes {
        let mut index = indexes.get(field).await?;
        index.insert(value.clone(), message_cid.clone());
        indexes.update(index).await?;
    }

    // every entry is also recorded in the catch-all index so queries with
    // no selective field can still be served by a full scan.
    let mut all = indexes.get("__all__").await?;
    all.insert(owner.to_string(), message_cid.clone());
    indexes.update(all).await?;

    Ok(())
}

/// Removes `message_cid`'s entries from every index field it was inserted
/// under, given the same derived fields used at insert time.
pub async fn remove(
    owner: &str, message_cid: &str, fields: &std::collections::HashMap<String, String>,
    store: &impl BlockStore,
) -> Result<()> {
    let indexes = IndexesBuilder::new().owner(owner).store(store).build();

    for (field, value) in fields {
        let mut index = indexes.get(field).await?;
        index.remove(value, message_cid);
        indexes.update(index).await?;
    }

    let mut all = indexes.get("__all__").await?;
    all.remove(owner, message_cid);
    indexes.update(all).await?;

    Ok(())
}

/// Resolves a [`Query`] against the index + block store, returning every
/// matching entry (unsorted and unpaginated — callers apply sort and
/// pagination afterward).
pub async fn query(owner: &str, query: &Query, store: &impl BlockStore) -> Result<Vec<Entry>> {
    match query {
        Query::Records(rq) => records_query(owner, rq, store).await,
        Query::Protocols(pq) => protocols_query(owner, pq, store).await,
        Query::Messages(_) => Err(super::unsupported_query()),
    }
}

async fn records_query(
    owner: &str, rq: &crate::store::RecordsQuery, store: &impl BlockStore,
) -> Result<Vec<Entry>> {
    let indexes = IndexesBuilder::new().owner(owner).store(store).build();
    let mut seen = BTreeSet::new();
    let mut matches = Vec::new();

    for filter in &rq.filters {
        let field = filter.to_concise();
        let candidates: BTreeSet<String> = match field {
            Some((name, value)) => {
                let index = indexes.get(&name).await?;
                index.values.get(&value).cloned().unwrap_or_default()
            }
            None => {
                let index = indexes.get("__all__").await?;
                index.values.get(owner).cloned().unwrap_or_default()
            }
        };

        for message_cid in candidates {
            if !seen.insert(message_cid.clone()) {
                continue;
            }
            let Some(bytes) = store.get(owner, &message_cid).await.map_err(|e| unexpected!("{e}"))?
            else {
                continue;
            };
            let entry: Entry = block::decode(&bytes)?;

            if let Some(method) = &rq.method {
                let matches_method = match (&entry.message, method) {
                    (EntryType::Write(_), crate::Method::Write) => true,
                    (EntryType::Delete(_), crate::Method::Delete) => true,
                    _ => false,
                };
                if !matches_method {
                    continue;
                }
            }

            if filter.is_match(&entry) {
                matches.push(entry);
            }
        }
    }

    Ok(matches)
}

// Protocol configurations are rare per tenant, so a full scan of the
// catch-all index is cheap enough to skip a dedicated `protocol` index.
async fn protocols_query(
    owner: &str, pq: &crate::store::ProtocolsQuery, store: &impl BlockStore,
) -> Result<Vec<Entry>> {
    let indexes = IndexesBuilder::new().owner(owner).store(store).build();
    let all = indexes.get("__all__").await?;
    let candidates = all.values.get(owner).cloned().unwrap_or_default();

    let mut matches = Vec::new();
    for message_cid in candidates {
        let Some(bytes) = store.get(owner, &message_cid).await.map_err(|e| unexpected!("{e}"))?
        else {
            continue;
        };
        let entry: Entry = block::decode(&bytes)?;
        let Some(configure) = entry.as_configure() else {
            continue;
        };
        if let Some(protocol) = &pq.protocol {
            if &configure.descriptor.definition.protocol != protocol {
                continue;
            }
        }
        matches.push(entry);
    }

    Ok(matches)
}

/// One indexed field: a value-sorted map from the field's string encoding
/// to the set of message CIDs that carry that value.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Index {
    field: String,
    values: BTreeMap<String, BTreeSet<String>>,
}

impl Index {
    /// Returns an empty index for `field`.
    #[must_use]
    pub fn new(field: impl Into<String>) -> Self {
        Self { field: field.into(), values: BTreeMap::new() }
    }

    /// Records `message_cid` under `value`.
    pub fn insert(&mut self, value: impl Into<String>, message_cid: impl Into<String>) {
        self.values.entry(value.into()).or_default().insert(message_cid.into());
    }

    /// Removes `message_cid` from `value`'s set, if present.
    pub fn remove(&mut self, value: &str, message_cid: &str) {
        if let Some(set) = self.values.get_mut(value) {
            set.remove(message_cid);
        }
    }
}

/// A handle to an owner's indexes over a block store.
pub struct Indexes<'a, S: BlockStore> {
    owner: &'a str,
    store: &'a S,
}

impl<S: BlockStore> Indexes<'_, S> {
    /// Fetches `field`'s index, or an empty one if it has never been
    /// written.
    pub async fn get(&self, field: &str) -> Result<Index> {
        let index_cid = crate::utils::cid::of_bytes(format!("{}-{field}", self.owner).as_bytes());

        let Some(data) =
            self.store.get(self.owner, &index_cid).await.map_err(|e| unexpected!("{e}"))?
        else {
            return Ok(Index::new(field));
        };
        block::decode(&data)
    }

    /// Persists `index`, replacing whatever was previously stored under
    /// its field name.
    pub async fn update(&self, index: Index) -> Result<()> {
        let index_cid = crate::utils::cid::of_bytes(format!("{}-{}", self.owner, index.field).as_bytes());
        let bytes = block::encode(&index)?;
        self.store
            .put(self.owner, &index_cid, &bytes)
            .await
            .map_err(|e| unexpected!("issue updating index: {e}"))
    }
}

/// Owner not yet set on [`IndexesBuilder`].
#[doc(hidden)]
pub struct NoOwner;
/// Owner set on [`IndexesBuilder`].
#[doc(hidden)]
pub struct Owner<'a>(&'a str);
/// Store not yet set on [`IndexesBuilder`].
#[doc(hidden)]
pub struct NoStore;
/// Store set on [`IndexesBuilder`].
#[doc(hidden)]
pub struct Store<'a, S: BlockStore>(&'a S);

/// Typestate builder for [`Indexes`], requiring both an owner and a store
/// before `build` is callable.
pub struct IndexesBuilder<O, S> {
    owner: O,
    store: S,
}

impl IndexesBuilder<NoOwner, NoStore> {
    /// Returns a new, empty builder.
    #[must_use]
    pub const fn new() -> Self {
        Self { owner: NoOwner, store: NoStore }
    }
}

impl Default for IndexesBuilder<NoOwner, NoStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> IndexesBuilder<NoOwner, S> {
    /// Sets the tenant these indexes belong to.
    #[must_use]
    pub fn owner(self, owner: &str) -> IndexesBuilder<Owner<'_>, S> {
        IndexesBuilder { owner: Owner(owner), store: self.store }
    }
}

impl<O> IndexesBuilder<O, NoStore> {
    /// Sets the block store backing these indexes.
    #[must_use]
    pub fn store<S: BlockStore>(self, store: &S) -> IndexesBuilder<O, Store<'_, S>> {
        IndexesBuilder { owner: self.owner, store: Store(store) }
    }
}

impl<'a, S: BlockStore> IndexesBuilder<Owner<'a>, Store<'a, S>> {
    /// Builds the [`Indexes`] handle.
    #[must_use]
    pub fn build(self) -> Indexes<'a, S> {
        Indexes { owner: self.owner.0, store: self.store.0 }
    }
}
