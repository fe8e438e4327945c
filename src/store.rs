//! Persisted message envelope, query types, and the default index-backed
//! [`crate::provider::MessageStore`] implementation.

pub mod block;
pub mod index;
pub mod message;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::messages::MessagesFilter;
use crate::protocols::Configure;
pub use crate::records::Sort;
use crate::records::{Delete, RecordsFilter, Write};
pub use crate::{Cursor, Pagination};
use crate::{Method, Result, unexpected};

/// The concrete message payload carried by a stored [`Entry`]. Tagged so a
/// single message table can hold every interface/method combination.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "entryType")]
pub enum EntryType {
    /// A `Records.Write` message (initial write or update).
    Write(Write),
    /// A `Records.Delete` tombstone message.
    Delete(Delete),
    /// A `Protocols.Configure` message.
    Configure(Configure),
}

/// A message together with the secondary-index field values derived from it
/// at write time. This is the unit the message store persists and the
/// index store indexes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Entry {
    /// The underlying message.
    #[serde(flatten)]
    pub message: EntryType,
    /// Flattened `field -> value` pairs used for index lookups. Every value
    /// is stored as its string encoding so a single `BTreeMap<String,
    /// String>` index can hold dates, booleans, and sizes alike.
    pub indexes: HashMap<String, String>,
}

impl Entry {
    /// The CID of the underlying message (not including derived indexes).
    pub fn cid(&self) -> Result<String> {
        match &self.message {
            EntryType::Write(write) => write.cid(),
            EntryType::Delete(delete) => delete.cid(),
            EntryType::Configure(configure) => configure.cid(),
        }
    }

    /// Borrows the underlying write, if this entry is one.
    #[must_use]
    pub const fn as_write(&self) -> Option<&Write> {
        match &self.message {
            EntryType::Write(write) => Some(write),
            _ => None,
        }
    }

    /// Borrows the underlying delete, if this entry is one.
    #[must_use]
    pub const fn as_delete(&self) -> Option<&Delete> {
        match &self.message {
            EntryType::Delete(delete) => Some(delete),
            _ => None,
        }
    }

    /// Borrows the underlying protocol configuration, if this entry is one.
    #[must_use]
    pub const fn as_configure(&self) -> Option<&Configure> {
        match &self.message {
            EntryType::Configure(configure) => Some(configure),
            _ => None,
        }
    }

    /// The record or message's interface/method/timestamp descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &crate::Descriptor {
        match &self.message {
            EntryType::Write(write) => &write.descriptor.base,
            EntryType::Delete(delete) => &delete.descriptor.base,
            EntryType::Configure(configure) => &configure.descriptor.base,
        }
    }

    /// Adds a single derived index field, overwriting any previous value.
    pub fn add_index(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.indexes.insert(field.into(), value.into());
    }
}

impl From<Write> for Entry {
    fn from(write: Write) -> Self {
        let indexes = write.build_indexes();
        Self { message: EntryType::Write(write), indexes }
    }
}

impl From<&Write> for Entry {
    fn from(write: &Write) -> Self {
        Self::from(write.clone())
    }
}

impl From<Delete> for Entry {
    fn from(delete: Delete) -> Self {
        let indexes = delete.build_indexes();
        Self { message: EntryType::Delete(delete), indexes }
    }
}

impl From<&Delete> for Entry {
    fn from(delete: &Delete) -> Self {
        Self::from(delete.clone())
    }
}

impl From<Configure> for Entry {
    fn from(configure: Configure) -> Self {
        let indexes = configure.build_indexes();
        Self { message: EntryType::Configure(configure), indexes }
    }
}

impl From<&Configure> for Entry {
    fn from(configure: &Configure) -> Self {
        Self::from(configure.clone())
    }
}

/// A disjunctive (OR'd) set of conditions to run against one of the three
/// logical tables a [`crate::provider::MessageStore`] holds.
#[derive(Clone, Debug)]
pub enum Query {
    /// One or more [`RecordsFilter`]s, OR'd together.
    Records(RecordsQuery),
    /// One or more [`MessagesFilter`]s, OR'd together.
    Messages(MessagesQuery),
    /// A protocol definition lookup.
    Protocols(ProtocolsQuery),
}

/// A records-interface query: which records, in what order, from where.
#[derive(Clone, Debug, Default)]
pub struct RecordsQuery {
    /// Filters to match against, combined with OR.
    pub filters: Vec<RecordsFilter>,
    /// Restricts matches to a single records method (`Write` or `Delete`);
    /// `None` returns whichever entries the filters select regardless of
    /// method, used internally for dominance checks across write/delete.
    pub method: Option<Method>,
    /// When true, include writes that have been superseded by a later
    /// write or archived by a tombstone. Used internally by the record
    /// state machine; external callers never set this.
    pub include_archived: bool,
    /// Result ordering.
    pub sort: Sort,
    /// Result paging.
    pub pagination: Pagination,
}

impl RecordsQuery {
    /// Returns a new query with no filters set, restricted to `Write`
    /// messages. Callers add one or more OR'd filters with
    /// [`RecordsQuery::add_filter`] before running it.
    #[must_use]
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
            method: Some(Method::Write),
            include_archived: false,
            sort: Sort::default(),
            pagination: Pagination::default(),
        }
    }

    /// Adds an OR'd filter.
    #[must_use]
    pub fn add_filter(mut self, filter: RecordsFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Restricts matches to a single records method, or `None` for either.
    #[must_use]
    pub const fn method(mut self, method: Option<Method>) -> Self {
        self.method = method;
        self
    }

    /// Whether to include archived/superseded entries.
    #[must_use]
    pub const fn include_archived(mut self, include: bool) -> Self {
        self.include_archived = include;
        self
    }

    /// Replaces the filter set with a single `recordId` filter.
    #[must_use]
    pub fn record_id(mut self, record_id: impl Into<String>) -> Self {
        self.filters = vec![RecordsFilter::new().record_id(record_id)];
        self
    }

    /// Wraps the query as a [`Query::Records`].
    #[must_use]
    pub fn build(self) -> Query {
        Query::Records(self)
    }
}

impl From<RecordsQuery> for Query {
    fn from(query: RecordsQuery) -> Self {
        Self::Records(query)
    }
}

impl From<ProtocolsQuery> for Query {
    fn from(query: ProtocolsQuery) -> Self {
        Self::Protocols(query)
    }
}

/// A messages-interface query: the raw event/message log filtered by
/// interface, method, protocol, and timestamp.
#[derive(Clone, Debug, Default)]
pub struct MessagesQuery {
    /// Filters to match against, combined with OR.
    pub filters: Vec<MessagesFilter>,
    /// Result paging.
    pub pagination: Pagination,
}

/// A protocols-interface query: fetch the active configuration for a
/// protocol URI (or every configured protocol, when `protocol` is `None`).
#[derive(Clone, Debug, Default)]
pub struct ProtocolsQuery {
    /// The protocol URI to fetch, or `None` to list every protocol the
    /// tenant has configured.
    pub protocol: Option<String>,
}

/// Builds a [`Query::Records`] with sensible defaults: a single empty
/// filter, sorted newest-first, restricted to `Write` messages, excluding
/// archived/superseded entries.
#[derive(Clone, Debug, Default)]
pub struct RecordsQueryBuilder {
    filters: Vec<RecordsFilter>,
    method: Option<Method>,
    include_archived: bool,
    sort: Sort,
    pagination: Pagination,
}

impl RecordsQueryBuilder {
    /// Returns a new builder with one default (match-all) filter and
    /// `method` restricted to `Write`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            filters: vec![RecordsFilter::default()],
            method: Some(Method::Write),
            include_archived: false,
            sort: Sort::default(),
            pagination: Pagination::default(),
        }
    }

    /// Replaces the filter set with a single filter.
    #[must_use]
    pub fn filter(mut self, filter: RecordsFilter) -> Self {
        self.filters = vec![filter];
        self
    }

    /// Adds an additional OR'd filter.
    #[must_use]
    pub fn add_filter(mut self, filter: RecordsFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Restricts matches to a single records method, or `None` for either.
    #[must_use]
    pub const fn method(mut self, method: Option<Method>) -> Self {
        self.method = method;
        self
    }

    /// Whether to include archived/superseded entries.
    #[must_use]
    pub const fn include_archived(mut self, include: bool) -> Self {
        self.include_archived = include;
        self
    }

    /// Sets the result ordering.
    #[must_use]
    pub const fn sort(mut self, sort: Sort) -> Self {
        self.sort = sort;
        self
    }

    /// Sets the result paging.
    #[must_use]
    pub fn pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = pagination;
        self
    }

    /// Builds the query.
    #[must_use]
    pub fn build(self) -> Query {
        Query::Records(RecordsQuery {
            filters: self.filters,
            method: self.method,
            include_archived: self.include_archived,
            sort: self.sort,
            pagination: self.pagination,
        })
    }
}

pub(crate) fn unsupported_query() -> crate::Error {
    unexpected!("unsupported query type")
}
