//! # Read
//!
//! `Read` fetches a single record's latest state by filter, returning its
//! write, data, and (when the write is not itself the record's first) the
//! initial write for provenance.

use async_trait::async_trait;
use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Utc};
use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::authorization::{Authorization, AuthorizationBuilder};
use crate::endpoint::{Message, Reply, Status};
use crate::permissions::{self, Protocol};
use crate::provider::{MessageStore, Provider, Signer};
use crate::records::{DataStream, DelegatedGrant, Delete, RecordsFilter, Write};
use crate::store::{Query, RecordsQuery};
use crate::utils::cid;
use crate::{Descriptor, Error, Interface, Method, Result, forbidden, unexpected};

/// Process `Read` message.
///
/// # Errors
/// TODO: Add errors
pub async fn handle(owner: &str, read: Read, provider: &impl Provider) -> Result<Reply<ReadReply>> {
    let query: Query = RecordsQuery::from(read.clone()).into();
    let (entries, _) = MessageStore::query(provider, owner, &query).await?;
    let entry = match entries.len() {
        0 => return Err(Error::NotFound("no matching records found".to_string())),
        1 => &entries[0],
        _ => return Err(unexpected!("multiple messages exist")),
    };

    if entry.descriptor().method == Method::Delete {
        return tombstone_reply(owner, entry, &read, provider).await;
    }

    let mut write = Write::try_from(entry)?;
    read.authorize(owner, &write, provider).await?;

    let data = match write.encoded_data.take() {
        Some(encoded) => {
            let buffer = Base64UrlUnpadded::decode_vec(&encoded)?;
            Some(DataStream::from(buffer))
        }
        None => DataStream::from_store(owner, &write.record_id, &write.descriptor.data_cid, provider).await?,
    };

    let initial_write = if write.is_initial()? { None } else { Some(fetch_initial_write(owner, &write.record_id, provider).await?) };

    Ok(Reply {
        status: Status { code: StatusCode::OK.as_u16(), detail: None },
        body: Some(ReadReply {
            entry: ReadReplyEntry {
                records_write: Some(write),
                records_delete: None,
                initial_write,
                data,
            },
        }),
    })
}

/// Handles the case where the matched message is a tombstone: authorizes
/// against the deleted record's initial write, then reports not-found with
/// the tombstone and initial write attached for audit.
async fn tombstone_reply(
    owner: &str, entry: &crate::store::Entry, read: &Read, provider: &impl Provider,
) -> Result<Reply<ReadReply>> {
    let delete =
        entry.as_delete().cloned().ok_or_else(|| unexpected!("expected `RecordsDelete` message"))?;
    let mut initial_write = fetch_initial_write(owner, &delete.descriptor.record_id, provider).await?;

    read.authorize(owner, &initial_write, provider).await?;
    initial_write.encoded_data = None;

    Ok(Reply {
        status: Status {
            code: StatusCode::NOT_FOUND.as_u16(),
            detail: Some("record has been deleted".to_string()),
        },
        body: Some(ReadReply {
            entry: ReadReplyEntry {
                records_write: None,
                records_delete: Some(delete),
                initial_write: Some(initial_write),
                data: None,
            },
        }),
    })
}

/// Fetches the initial (first) write of the record identified by
/// `record_id`, including archived (superseded or deleted) entries.
async fn fetch_initial_write(owner: &str, record_id: &str, store: &impl MessageStore) -> Result<Write> {
    let query = RecordsQuery::new().record_id(record_id).include_archived(true).build();
    let (records, _) = MessageStore::query(store, owner, &query).await?;
    let mut initial = records
        .iter()
        .find_map(|entry| entry.as_write().cloned())
        .ok_or_else(|| unexpected!("initial write for record not found"))?;
    initial.encoded_data = None;
    Ok(initial)
}

/// Records read message payload
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Read {
    /// Read descriptor.
    pub descriptor: ReadDescriptor,

    /// Message authorization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization: Option<Authorization>,
}

#[async_trait]
impl Message for Read {
    type Reply = ReadReply;

    fn cid(&self) -> Result<String> {
        cid::from_value(self)
    }

    fn descriptor(&self) -> &Descriptor {
        &self.descriptor.base
    }

    fn descriptor_cid(&self) -> Result<String> {
        cid::from_value(&self.descriptor)
    }

    fn authorization(&self) -> Option<&Authorization> {
        self.authorization.as_ref()
    }

    async fn handle(self, owner: &str, provider: &impl Provider) -> Result<Reply<Self::Reply>> {
        handle(owner, self, provider).await
    }
}

/// Read reply.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReply {
    /// The read reply entry.
    pub entry: ReadReplyEntry,
}

/// Read reply.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReplyEntry {
    /// The latest `RecordsWrite` message of the record if record exists
    /// (not deleted).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records_write: Option<Write>,

    /// The `RecordsDelete` if the record is deleted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records_delete: Option<Delete>,

    /// The initial write of the record if the returned `RecordsWrite` message
    /// itself is not the initial write or if a `RecordsDelete` is returned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_write: Option<Write>,

    /// The data for the record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<DataStream>,
}

impl Read {
    /// Checks that `self`'s author may read `write`: it's published, the
    /// requestor is the owner or recipient or original author, a
    /// permission grant covers the read, or a protocol role does.
    async fn authorize(&self, owner: &str, write: &Write, store: &impl MessageStore) -> Result<()> {
        let Some(authzn) = &self.authorization else {
            return Ok(());
        };
        if write.descriptor.published.unwrap_or_default() {
            return Ok(());
        }

        let author = authzn.author()?;

        if let Some(delegated_grant) = &authzn.author_delegated_grant {
            delegated_grant.to_grant()?.verify_scope(write)?;
        }

        if author == owner || author == write.authorization.author()? {
            return Ok(());
        }
        if write.descriptor.recipient.as_deref() == Some(author.as_str()) {
            return Ok(());
        }

        if let Some(grant_id) = &authzn.payload()?.permission_grant_id {
            let grant = permissions::fetch_grant(owner, grant_id, store).await?;
            return grant.permit_read(owner, &author, self, write, store).await;
        }
        if let Some(protocol) = &write.descriptor.protocol {
            return Protocol::new(protocol).permit_read(owner, self, store).await;
        }

        Err(forbidden!("read cannot be authorized"))
    }
}

impl From<Read> for RecordsQuery {
    fn from(read: Read) -> Self {
        Self::new().method(None).add_filter(read.descriptor.filter)
    }
}

/// The `Read` message descriptor.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadDescriptor {
    /// The base descriptor
    #[serde(flatten)]
    pub base: Descriptor,

    /// Defines the filter for the read.
    pub filter: RecordsFilter,
}

/// Builds a [`Read`] message.
#[derive(Clone, Debug, Default)]
pub struct ReadBuilder {
    message_timestamp: DateTime<Utc>,
    filter: RecordsFilter,
    permission_grant_id: Option<String>,
    protocol_role: Option<String>,
    delegated_grant: Option<DelegatedGrant>,
    authorize: Option<bool>,
}

impl ReadBuilder {
    /// Returns a new [`ReadBuilder`]
    #[must_use]
    pub fn new() -> Self {
        Self { message_timestamp: Utc::now(), ..Self::default() }
    }

    /// Specifies the filter identifying the record to read.
    #[must_use]
    pub fn filter(mut self, filter: RecordsFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Specifies the permission grant ID.
    #[must_use]
    pub fn permission_grant_id(mut self, permission_grant_id: impl Into<String>) -> Self {
        self.permission_grant_id = Some(permission_grant_id.into());
        self
    }

    /// Whether to sign the read with an authorization at all. Defaults to
    /// `true`; set `false` to build an anonymous read of published data.
    #[must_use]
    pub const fn authorize(mut self, authorize: bool) -> Self {
        self.authorize = Some(authorize);
        self
    }

    /// Specify a protocol role for the record.
    #[must_use]
    pub fn protocol_role(mut self, protocol_role: impl Into<String>) -> Self {
        self.protocol_role = Some(protocol_role.into());
        self
    }

    /// The delegated grant used with this record.
    #[must_use]
    pub fn delegated_grant(mut self, delegated_grant: DelegatedGrant) -> Self {
        self.delegated_grant = Some(delegated_grant);
        self
    }

    /// Build the write message.
    ///
    /// # Errors
    /// TODO: Add errors
    pub async fn build(mut self, signer: &impl Signer) -> Result<Read> {
        self.filter.normalize()?;

        let descriptor = ReadDescriptor {
            base: Descriptor {
                interface: Interface::Records,
                method: Method::Read,
                message_timestamp: self.message_timestamp,
            },
            filter: self.filter,
        };

        let authorization = if self.authorize.unwrap_or(true) {
            let mut auth_builder = AuthorizationBuilder::new().descriptor_cid(cid::from_value(&descriptor)?);
            if let Some(id) = self.permission_grant_id {
                auth_builder = auth_builder.permission_grant_id(id);
            }
            if let Some(role) = self.protocol_role {
                auth_builder = auth_builder.protocol_role(role);
            }
            if let Some(delegated_grant) = self.delegated_grant {
                auth_builder = auth_builder.delegated_grant(delegated_grant);
            }
            Some(auth_builder.build(signer).await?)
        } else {
            None
        };

        Ok(Read { descriptor, authorization })
    }
}
