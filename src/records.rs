//! # Records Interface
//!
//! Per-record CRUD over a tenant's namespace: [`write`] creates and updates
//! records, [`delete`] tombstones them, [`read`] fetches a single record,
//! [`query`] and [`subscribe`] search and watch the namespace. [`protocol`]
//! implements the protocol-rule authorization path shared by every handler
//! here; [`encryption`] describes how a record's data payload may be
//! encrypted to one or more recipients.

pub mod delete;
pub mod encryption;
pub mod protocol;
pub mod query;
pub mod read;
pub mod subscribe;
pub mod write;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use self::delete::{Delete, DeleteBuilder, DeleteDescriptor};
pub use self::protocol::Authorizer as ProtocolAuthorizer;
pub use self::query::{Query, QueryBuilder, QueryDescriptor, QueryReply};
pub use self::read::{Read, ReadBuilder, ReadDescriptor, ReadReply};
pub use self::subscribe::{Subscribe, SubscribeBuilder, SubscribeDescriptor, SubscribeReply};
pub use self::write::{
    Attestation, Data, DelegatedGrant, SignaturePayload, Write, WriteBuilder, WriteDescriptor,
    WriteProtocol, entry_id,
};
use crate::OneOrMany;

/// A disjunctive condition over one or more record properties. Every
/// `Option`/collection field set on a filter must match for the filter to
/// match an entry; an unset field imposes no constraint.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordsFilter {
    /// Exact match on the record's deterministic identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    /// Exact match on the parent record's identifier (direct children
    /// only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Exact match on the protocol-thread context identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    /// Match if the record's recipient is any of these DIDs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<OneOrMany<String>>,
    /// Match if the record's author is any of these DIDs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<OneOrMany<String>>,
    /// Exact match on the DID that attested to the record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attester: Option<String>,
    /// Exact match on the protocol URI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    /// Exact match on the protocol path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_path: Option<String>,
    /// Exact match on published state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<bool>,
    /// Exact match on the schema URI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    /// Exact match on the payload's declared media type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_format: Option<String>,
    /// Range match over payload byte size.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_size: Option<crate::Range<u64>>,
    /// Exact match on the payload's content identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_cid: Option<String>,
    /// Range match over the initial write's creation timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_created: Option<crate::Range<DateTime<Utc>>>,
    /// Range match over the publication timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_published: Option<crate::Range<DateTime<Utc>>>,
    /// Range match over the most recent update's timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_updated: Option<crate::Range<DateTime<Utc>>>,
    /// Tag equality, prefix, and range constraints, keyed by tag name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, TagFilter>>,
}

impl RecordsFilter {
    /// Returns an empty filter matching every record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to an exact record.
    #[must_use]
    pub fn record_id(mut self, record_id: impl Into<String>) -> Self {
        self.record_id = Some(record_id.into());
        self
    }

    /// Restricts to direct children of `parent_id`.
    #[must_use]
    pub fn parent_id(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Restricts to a protocol thread.
    #[must_use]
    pub fn context_id(mut self, context_id: impl Into<String>) -> Self {
        self.context_id = Some(context_id.into());
        self
    }

    /// Adds a recipient to match against.
    #[must_use]
    pub fn add_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(add_one(self.recipient, recipient.into()));
        self
    }

    /// Adds an author to match against.
    #[must_use]
    pub fn add_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(add_one(self.author, author.into()));
        self
    }

    /// Restricts to records attested to by `attester`.
    #[must_use]
    pub fn attester(mut self, attester: impl Into<String>) -> Self {
        self.attester = Some(attester.into());
        self
    }

    /// Restricts to a protocol.
    #[must_use]
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    /// Restricts to a protocol path.
    #[must_use]
    pub fn protocol_path(mut self, protocol_path: impl Into<String>) -> Self {
        self.protocol_path = Some(protocol_path.into());
        self
    }

    /// Restricts to published or unpublished records.
    #[must_use]
    pub const fn published(mut self, published: bool) -> Self {
        self.published = Some(published);
        self
    }

    /// Restricts to a schema.
    #[must_use]
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Restricts to a data format.
    #[must_use]
    pub fn data_format(mut self, data_format: impl Into<String>) -> Self {
        self.data_format = Some(data_format.into());
        self
    }

    /// Restricts to a data size range.
    #[must_use]
    pub fn data_size(mut self, range: crate::Range<u64>) -> Self {
        self.data_size = Some(range);
        self
    }

    /// Restricts to a data CID.
    #[must_use]
    pub fn data_cid(mut self, data_cid: impl Into<String>) -> Self {
        self.data_cid = Some(data_cid.into());
        self
    }

    /// Restricts to a creation-date range.
    #[must_use]
    pub fn date_created(mut self, range: crate::Range<DateTime<Utc>>) -> Self {
        self.date_created = Some(range);
        self
    }

    /// Restricts to a publication-date range.
    #[must_use]
    pub fn date_published(mut self, range: crate::Range<DateTime<Utc>>) -> Self {
        self.date_published = Some(range);
        self
    }

    /// Restricts to an update-date range.
    #[must_use]
    pub fn date_updated(mut self, range: crate::Range<DateTime<Utc>>) -> Self {
        self.date_updated = Some(range);
        self
    }

    /// Adds a tag constraint.
    #[must_use]
    pub fn add_tag(mut self, tag: impl Into<String>, filter: TagFilter) -> Self {
        self.tags.get_or_insert_with(BTreeMap::new).insert(tag.into(), filter);
        self
    }

    /// Normalizes URI-bearing fields (protocol, schema) to their canonical
    /// form so filters and stored values compare equal regardless of
    /// trailing-slash or casing differences at the call site.
    pub fn normalize(&mut self) -> crate::Result<()> {
        if let Some(protocol) = &self.protocol {
            self.protocol = Some(crate::utils::clean_url(protocol)?);
        }
        if let Some(schema) = &self.schema {
            self.schema = Some(crate::utils::clean_url(schema)?);
        }
        Ok(())
    }

    /// Picks the single most selective indexed field set on this filter,
    /// returning its index field name and encoded value, or `None` if the
    /// filter only constrains range/tag fields and must fall back to a
    /// full scan. Order reflects expected selectivity: a record ID
    /// narrows to exactly one record; a protocol narrows to a whole
    /// namespace.
    #[must_use]
    pub fn to_concise(&self) -> Option<(String, String)> {
        if let Some(v) = &self.record_id {
            return Some(("recordId".to_string(), v.clone()));
        }
        if let Some(v) = &self.attester {
            return Some(("attester".to_string(), v.clone()));
        }
        if let Some(v) = &self.parent_id {
            return Some(("parentId".to_string(), v.clone()));
        }
        if let Some(v) = &self.recipient {
            return Some(("recipient".to_string(), v.to_vec().into_iter().next()?));
        }
        if let Some(v) = &self.context_id {
            return Some(("contextId".to_string(), v.clone()));
        }
        if let Some(v) = &self.protocol_path {
            return Some(("protocolPath".to_string(), v.clone()));
        }
        if let Some(v) = &self.schema {
            return Some(("schema".to_string(), v.clone()));
        }
        if let Some(v) = &self.protocol {
            return Some(("protocol".to_string(), v.clone()));
        }
        if let Some(v) = &self.data_cid {
            return Some(("dataCid".to_string(), v.clone()));
        }
        if let Some(v) = &self.data_format {
            return Some(("dataFormat".to_string(), v.clone()));
        }
        if let Some(v) = &self.published {
            return Some(("published".to_string(), v.to_string()));
        }
        if let Some(v) = &self.author {
            return Some(("author".to_string(), v.to_vec().into_iter().next()?));
        }
        None
    }
}

fn add_one(existing: Option<OneOrMany<String>>, value: String) -> OneOrMany<String> {
    match existing {
        None => OneOrMany::One(value),
        Some(OneOrMany::One(first)) => OneOrMany::Many(vec![first, value]),
        Some(OneOrMany::Many(mut values)) => {
            values.push(value);
            OneOrMany::Many(values)
        }
    }
}

/// A constraint on a single tag value.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagFilter {
    /// The tag's string value starts with this prefix.
    StartsWith(String),
    /// The tag's numeric value falls within this range.
    Range(crate::Range<f64>),
    /// The tag's value equals this JSON value exactly.
    Equal(serde_json::Value),
}

/// Result ordering for `RecordsQuery`.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub enum Sort {
    /// Oldest created first.
    #[serde(rename = "createdAscending")]
    CreatedAsc,
    /// Newest created first.
    #[serde(rename = "createdDescending")]
    CreatedDesc,
    /// Oldest published first.
    #[serde(rename = "publishedAscending")]
    PublishedAsc,
    /// Newest published first.
    #[serde(rename = "publishedDescending")]
    PublishedDesc,
    /// Oldest message timestamp first.
    #[serde(rename = "timestampAscending")]
    TimestampAsc,
    /// Newest message timestamp first (the default).
    #[serde(rename = "timestampDescending")]
    #[default]
    TimestampDesc,
}

impl Sort {
    /// The index field this sort order ranks by, and whether it is
    /// ascending.
    #[must_use]
    pub const fn field(self) -> (&'static str, bool) {
        match self {
            Self::CreatedAsc => ("dateCreated", true),
            Self::CreatedDesc => ("dateCreated", false),
            Self::PublishedAsc => ("datePublished", true),
            Self::PublishedDesc => ("datePublished", false),
            Self::TimestampAsc => ("messageTimestamp", true),
            Self::TimestampDesc => ("messageTimestamp", false),
        }
    }

    /// Whether this sort order requires the record to be published
    /// (ranking by a field that is only set on published records).
    #[must_use]
    pub const fn requires_published(self) -> bool {
        matches!(self, Self::PublishedAsc | Self::PublishedDesc)
    }
}
