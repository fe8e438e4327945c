//! Default [`MessageStore`] implementation composed from a [`BlockStore`].
//!
//! Any type that implements the narrow content-addressed [`BlockStore`]
//! contract gets a full indexed, sortable, paginated message store for
//! free by wrapping it in [`BlockMessageStore`].

use crate::provider::{BlockStore, MessageStore};
use crate::records::Sort;
use crate::store::{Entry, Query, block, index};
use crate::{Cursor, Result, unexpected};

/// Wraps a [`BlockStore`] to provide [`MessageStore`].
pub struct BlockMessageStore<'a, T: BlockStore> {
    block_store: &'a T,
}

impl<'a, T: BlockStore> BlockMessageStore<'a, T> {
    /// Wraps `block_store`.
    #[must_use]
    pub const fn new(block_store: &'a T) -> Self {
        Self { block_store }
    }
}

impl<T: BlockStore> MessageStore for BlockMessageStore<'_, T> {
    async fn put(&self, owner: &str, entry: &Entry) -> Result<()> {
        index::insert(owner, entry, self.block_store).await?;

        let message_cid = entry.cid()?;
        let bytes = block::encode(entry)?;
        self.block_store
            .put(owner, &message_cid, &bytes)
            .await
            .map_err(|e| unexpected!("issue storing message: {e}"))
    }

    async fn query(&self, owner: &str, query: &Query) -> Result<(Vec<Entry>, Cursor)> {
        let mut entries = index::query(owner, query, self.block_store).await?;

        let Query::Records(rq) = query else {
            // protocol definition lookups are rare and small enough that
            // sort/pagination are not worth supporting here.
            return Ok((entries, Cursor::default()));
        };

        sort_entries(&mut entries, rq.sort);

        let limit = rq.pagination.limit;
        let start = match &rq.pagination.cursor {
            Some(cursor) => entries
                .iter()
                .position(|e| e.cid().is_ok_and(|cid| cid == cursor.message_cid))
                .map_or(0, |i| i + 1),
            None => 0,
        };

        let page: Vec<Entry> = match limit {
            Some(limit) => entries.iter().skip(start).take(limit).cloned().collect(),
            None => entries.iter().skip(start).cloned().collect(),
        };

        let next_cursor = match limit {
            Some(limit) if start + limit < entries.len() => page
                .last()
                .and_then(|e| e.cid().ok())
                .map(|message_cid| Cursor { message_cid, value: None })
                .unwrap_or_default(),
            _ => Cursor::default(),
        };

        Ok((page, next_cursor))
    }

    async fn get(&self, owner: &str, message_cid: &str) -> Result<Option<Entry>> {
        let Some(bytes) =
            self.block_store.get(owner, message_cid).await.map_err(|e| unexpected!("{e}"))?
        else {
            return Ok(None);
        };
        Ok(Some(block::decode(&bytes)?))
    }

    async fn delete(&self, owner: &str, message_cid: &str) -> Result<()> {
        if let Some(entry) = MessageStore::get(self, owner, message_cid).await? {
            index::remove(owner, message_cid, &entry.indexes, self.block_store).await?;
        }
        self.block_store
            .delete(owner, message_cid)
            .await
            .map_err(|e| unexpected!("issue deleting message: {e}"))
    }

    async fn purge(&self) -> Result<()> {
        self.block_store.purge().await.map_err(|e| unexpected!("issue purging store: {e}"))
    }
}

/// Orders `entries` in place according to `sort`, comparing on the index
/// field carrying the sort key plus a descriptor fallback for entries that
/// never populated it (e.g. timestamp sort falling back to
/// `messageTimestamp`).
pub fn sort_entries(entries: &mut [Entry], sort: Sort) {
    let (field, ascending) = sort.field();
    entries.sort_by(|a, b| {
        let a_key = a.indexes.get(field).cloned().unwrap_or_default();
        let b_key = b.indexes.get(field).cloned().unwrap_or_default();
        if ascending { a_key.cmp(&b_key) } else { b_key.cmp(&a_key) }
    });
}
