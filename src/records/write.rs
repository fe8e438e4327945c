//! # Write
//!
//! `Write` creates a new record or updates an existing one. The record's
//! `record_id` is fixed at creation (derived from the initial write's
//! descriptor and author) and every subsequent `Write` for that id is
//! measured against the initial write's immutable fields — recipient,
//! protocol, schema — and against whichever write currently dominates by
//! `message_timestamp`.

use std::collections::HashMap;

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::SecondsFormat::Micros;
use chrono::{DateTime, Utc};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::authorization::{Authorization, AuthorizationBuilder, Jws};
pub use crate::authorization::SignaturePayload;
use crate::data::{self, DataStream};
use crate::endpoint::{Message, Reply, Status};
use crate::permissions::Grant;
use crate::provider::{DataStore, EventLog, EventStream, MessageStore, Provider, Signer};
use crate::records::encryption::EncryptionProperty;
use crate::records::{RecordsFilter, protocol};
use crate::store::{Entry, EntryType, RecordsQueryBuilder};
use crate::utils::cid;
use crate::{Descriptor, Error, Interface, Method, Result, forbidden, unexpected, utils};

/// Process a [`Write`] message: authorize it, persist it if it dominates
/// whatever is currently stored for its `record_id`, and retire superseded
/// versions.
///
/// # Errors
/// Returns an error if authorization fails, the write is stale relative to
/// an existing version, or the underlying stores fail.
pub async fn handle(
    owner: &str, write: Write, provider: &impl Provider,
) -> Result<Reply<WriteReply>> {
    write.validate()?;

    let query = RecordsQueryBuilder::new()
        .method(None)
        .include_archived(true)
        .add_filter(RecordsFilter::new().record_id(write.record_id.as_str()))
        .build();
    let (existing, _) = MessageStore::query(provider, owner, &query).await?;

    let is_initial = write.is_initial()?;
    if is_initial && !existing.is_empty() {
        return Err(Error::Conflict("record already exists".to_string()));
    }
    if !is_initial && existing.is_empty() {
        return Err(Error::NotFound("no initial write found for record".to_string()));
    }

    let initial = if is_initial {
        None
    } else {
        let mut writes: Vec<_> = existing.iter().filter(|e| e.as_write().is_some()).collect();
        writes.sort_by_key(|e| e.descriptor().message_timestamp);
        let Some(latest) = writes.last() else {
            return Err(Error::NotFound("no prior write found for record".to_string()));
        };
        if write.descriptor.base.message_timestamp <= latest.descriptor().message_timestamp {
            return Err(Error::Conflict("a newer version of this record already exists".to_string()));
        }
        let Some(first) = writes.first() else {
            return Err(unexpected!("no initial write found for record"));
        };
        Some((*first).clone())
    };

    write.authorize(owner, initial.as_ref().map(Write::try_from).transpose()?.as_ref(), provider).await?;

    if let Some(protocol) = &write.descriptor.protocol {
        protocol::Authorizer::new(protocol)
            .context_id(write.context_id.as_ref())
            .permit_write(owner, &write, provider)
            .await?;
    }

    persist_data(owner, &write, provider).await?;

    let entry = Entry::from(&write);
    MessageStore::put(provider, owner, &entry).await?;
    EventLog::append(provider, owner, &entry).await?;
    EventStream::emit(provider, owner, &entry).await?;

    // retire every prior version except the initial write, which is kept
    // (archived) so `record_chain`/`initial_write` lookups keep working.
    if let Some(initial) = &initial {
        for entry in &existing {
            let Some(existing_write) = entry.as_write() else {
                continue;
            };
            if existing_write.record_id != write.record_id || existing_write.cid()? == initial.cid()? {
                continue;
            }
            if existing_write.descriptor.data_cid != write.descriptor.data_cid {
                DataStore::delete(provider, owner, &existing_write.record_id, &existing_write.descriptor.data_cid)
                    .await?;
            }
            let cid = entry.cid()?;
            MessageStore::delete(provider, owner, &cid).await?;
            EventLog::delete(provider, owner, &cid).await?;
        }
    }

    Ok(Reply {
        status: Status { code: StatusCode::ACCEPTED.as_u16(), detail: None },
        body: Some(WriteReply),
    })
}

async fn persist_data(owner: &str, write: &Write, provider: &impl Provider) -> Result<()> {
    let Some(data) = &write.data else {
        return Ok(());
    };
    let bytes = match data {
        Data::Bytes(bytes) => bytes.clone(),
        Data::Stream(stream) => stream.clone().into_vec(),
    };
    if bytes.len() <= data::MAX_ENCODED_SIZE {
        return Ok(());
    }
    DataStore::put(provider, owner, &write.record_id, &write.descriptor.data_cid, DataStream::from(bytes))
        .await?;
    Ok(())
}

/// Records write message payload: either a brand-new record or an update to
/// one, distinguished by whether `record_id` matches [`entry_id`] of its own
/// descriptor and author.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Write {
    /// The record's deterministic identifier, fixed at creation.
    pub record_id: String,

    /// The protocol-thread context identifier, present only for records
    /// written under a protocol.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,

    /// Write descriptor.
    pub descriptor: WriteDescriptor,

    /// Message authorization.
    pub authorization: Authorization,

    /// Attestation binding a third party's signature to this record,
    /// independent of whoever authorized the message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attestation: Option<Jws>,

    /// Encryption metadata, present only when the payload is encrypted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption: Option<EncryptionProperty>,

    /// The payload, inlined as base64url when at or below
    /// [`data::MAX_ENCODED_SIZE`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoded_data: Option<String>,

    /// The payload supplied to [`WriteBuilder::data`], retained only until
    /// the handler persists it; never serialized onto the wire.
    #[serde(skip)]
    data: Option<Data>,
}

impl Default for Write {
    fn default() -> Self {
        Self {
            record_id: String::new(),
            context_id: None,
            descriptor: WriteDescriptor::default(),
            authorization: Authorization {
                signature: Jws { payload: String::new(), signatures: vec![] },
                author_delegated_grant: None,
                owner_signature: None,
            },
            attestation: None,
            encryption: None,
            encoded_data: None,
            data: None,
        }
    }
}

impl Message for Write {
    type Reply = WriteReply;

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
        Some(&self.authorization)
    }

    async fn handle(self, owner: &str, provider: &impl Provider) -> Result<Reply<Self::Reply>> {
        handle(owner, self, provider).await
    }
}

/// [`WriteReply`] is returned by the handler in the [`Reply`] `body` field.
#[derive(Debug)]
pub struct WriteReply;

impl TryFrom<Entry> for Write {
    type Error = crate::Error;

    fn try_from(record: Entry) -> Result<Self> {
        match record.message {
            EntryType::Write(write) => Ok(write),
            _ => Err(unexpected!("expected `RecordsWrite` message")),
        }
    }
}

impl TryFrom<&Entry> for Write {
    type Error = crate::Error;

    fn try_from(record: &Entry) -> Result<Self> {
        match &record.message {
            EntryType::Write(write) => Ok(write.clone()),
            _ => Err(unexpected!("expected `RecordsWrite` message")),
        }
    }
}

impl Write {
    /// Whether this write is the initial write for its `record_id`: the
    /// record id a brand-new write carries is `entry_id` of its own
    /// descriptor and author, computed before `record_id` itself exists.
    pub fn is_initial(&self) -> Result<bool> {
        let author = self.authorization.author()?;
        Ok(entry_id(&self.descriptor, &author)? == self.record_id)
    }

    /// Build flattened indexes for the write message.
    #[must_use]
    pub(crate) fn build_indexes(&self) -> HashMap<String, String> {
        let desc = &self.descriptor;
        let mut indexes = HashMap::new();
        indexes.insert("interface".to_string(), Interface::Records.to_string());
        indexes.insert("method".to_string(), Method::Write.to_string());
        indexes.insert("recordId".to_string(), self.record_id.clone());
        indexes.insert(
            "messageTimestamp".to_string(),
            desc.base.message_timestamp.to_rfc3339_opts(Micros, true),
        );
        indexes.insert(
            "dateUpdated".to_string(),
            desc.base.message_timestamp.to_rfc3339_opts(Micros, true),
        );
        indexes.insert(
            "dateCreated".to_string(),
            desc.date_created.to_rfc3339_opts(Micros, true),
        );
        indexes.insert("author".to_string(), self.authorization.author().unwrap_or_default());
        indexes.insert("dataCid".to_string(), desc.data_cid.clone());
        indexes.insert("dataFormat".to_string(), desc.data_format.clone());
        indexes.insert("initial".to_string(), self.is_initial().unwrap_or_default().to_string());

        if let Some(context_id) = &self.context_id {
            indexes.insert("contextId".to_string(), context_id.clone());
        }
        if let Some(protocol) = &desc.protocol {
            indexes.insert("protocol".to_string(), protocol.clone());
        }
        if let Some(protocol_path) = &desc.protocol_path {
            indexes.insert("protocolPath".to_string(), protocol_path.clone());
        }
        if let Some(parent_id) = &desc.parent_id {
            indexes.insert("parentId".to_string(), parent_id.clone());
        }
        if let Some(recipient) = &desc.recipient {
            indexes.insert("recipient".to_string(), recipient.clone());
        }
        if let Some(schema) = &desc.schema {
            indexes.insert("schema".to_string(), schema.clone());
        }
        if let Some(published) = desc.published {
            indexes.insert("published".to_string(), published.to_string());
        }
        if let Some(date_published) = desc.date_published {
            indexes.insert("datePublished".to_string(), date_published.to_rfc3339_opts(Micros, true));
        }
        if let Some(attestation) = &self.attestation {
            if let Ok(attester) = attestation.signer() {
                indexes.insert("attester".to_string(), attester);
            }
        }

        indexes
    }

    fn validate(&self) -> Result<()> {
        if let Some(protocol) = &self.descriptor.protocol {
            utils::uri::validate(protocol)?;
        }
        if let Some(schema) = &self.descriptor.schema {
            utils::uri::validate(schema)?;
        }
        if self.descriptor.parent_id.is_some() && self.context_id.is_none() {
            return Err(unexpected!("missing `context_id` for child record"));
        }
        Ok(())
    }

    async fn authorize(
        &self, owner: &str, initial_write: Option<&Self>, store: &impl MessageStore,
    ) -> Result<()> {
        let authzn = &self.authorization;
        let author = authzn.author()?;

        if let Some(delegated_grant) = &authzn.author_delegated_grant {
            let grant = delegated_grant.to_grant()?;
            grant.verify_scope(self)?;
            grant.permit_write(owner, self, store).await?;
        }

        if author == owner {
            return Ok(());
        }

        // an update must be authored by the same party as the initial write,
        // unless protocol rules (checked separately) permit a co-author.
        if let Some(initial) = initial_write {
            if initial.authorization.author()? == author {
                return Ok(());
            }
        } else {
            return Ok(());
        }

        if self.descriptor.protocol.is_some() {
            return Ok(());
        }

        Err(forbidden!("write request failed authorization"))
    }
}

/// The [`Write`] message descriptor.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteDescriptor {
    /// The base descriptor
    #[serde(flatten)]
    pub base: Descriptor,

    /// The protocol the record is written under, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,

    /// The record's path within its protocol's declared structure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_path: Option<String>,

    /// The DID the record is addressed to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,

    /// The schema URI records of this type must conform to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Arbitrary tag values used for filtering, validated against the
    /// governing protocol's `$tags` rules.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Map<String, Value>>,

    /// The id of the record this one nests under, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// Content identifier of the payload.
    pub data_cid: String,

    /// Size of the payload in bytes.
    pub data_size: u64,

    /// When the record was first created. Immutable across updates.
    pub date_created: DateTime<Utc>,

    /// Whether the record is publicly readable without authorization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<bool>,

    /// When the record was published, if it has been.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_published: Option<DateTime<Utc>>,

    /// The payload's declared media type.
    pub data_format: String,
}

/// A record's payload, supplied to [`WriteBuilder::data`] either as bytes
/// already in memory or as a stream to be read and chunked by the handler.
#[derive(Clone, Debug)]
pub enum Data {
    /// Payload bytes already fully read into memory.
    Bytes(Vec<u8>),
    /// Payload to be read from a stream.
    Stream(DataStream),
}

/// Declares the protocol and protocol path a record is written under.
#[derive(Clone, Debug, Default)]
pub struct WriteProtocol {
    /// The protocol's URI.
    pub protocol: String,
    /// The record's path within the protocol's declared structure.
    pub protocol_path: String,
}

/// Payload of an attestation [`Jws`]: binds a third party's signature to
/// the record independent of the authorizing signature.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Attestation {
    /// CID of the write's descriptor.
    pub descriptor_cid: String,
}

/// A previously-issued permission grant, embedded in a message's
/// [`Authorization`] so the receiving tenant does not need to look it up
/// separately to validate the delegate's signature.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DelegatedGrant {
    /// The grant's descriptor.
    pub descriptor: WriteDescriptor,
    /// The grantor's authorization over the grant record.
    pub authorization: Authorization,
    /// The grant's base64url-encoded payload.
    pub encoded_data: String,
}

impl DelegatedGrant {
    /// The grant record's id.
    pub fn id(&self) -> Result<String> {
        let author = self.authorization.author()?;
        entry_id(&self.descriptor, &author)
    }

    /// The DID that issued the grant.
    pub fn grantor(&self) -> Result<String> {
        self.authorization.author()
    }

    /// Reconstitutes the full [`Write`] this grant was issued as, so it can
    /// be decoded by [`Grant::from_write`].
    pub fn to_grant(&self) -> Result<Grant> {
        Grant::from_write(&self.clone().try_into()?)
    }

    /// Verifies the grantor's signature over the embedded grant record.
    pub async fn verify(&self, resolver: &impl crate::provider::DidResolver) -> Result<()> {
        self.authorization.verify(resolver).await
    }
}

impl TryFrom<DelegatedGrant> for Write {
    type Error = crate::Error;

    fn try_from(grant: DelegatedGrant) -> Result<Self> {
        let record_id = grant.id()?;
        Ok(Self {
            record_id,
            context_id: None,
            descriptor: grant.descriptor,
            authorization: grant.authorization,
            attestation: None,
            encryption: None,
            encoded_data: Some(grant.encoded_data),
            data: None,
        })
    }
}

impl TryFrom<&DelegatedGrant> for Grant {
    type Error = crate::Error;

    fn try_from(grant: &DelegatedGrant) -> Result<Self> {
        grant.to_grant()
    }
}

/// Computes a record's deterministic entry id: the CID of its descriptor
/// together with its author, used both as the initial write's `record_id`
/// and to detect whether a later write is the initial one.
///
/// # Errors
/// Returns an error if `descriptor` fails to serialize.
pub fn entry_id(descriptor: &WriteDescriptor, author: &str) -> Result<String> {
    #[derive(Serialize)]
    struct EntryIdInput<'a> {
        descriptor: &'a WriteDescriptor,
        author: &'a str,
    }
    cid::from_value(&EntryIdInput { descriptor, author })
}

/// Fetches the initial (archived) write for `record_id`, if one exists.
///
/// # Errors
/// Returns an error if the store fails or more than one initial write is
/// found for the same record id.
pub async fn initial_write(
    owner: &str, record_id: &str, store: &impl MessageStore,
) -> Result<Option<Write>> {
    let query = RecordsQueryBuilder::new()
        .method(None)
        .include_archived(true)
        .add_filter(RecordsFilter::new().record_id(record_id))
        .build();
    let (entries, _) = store.query(owner, &query).await?;

    let mut writes: Vec<Write> =
        entries.iter().filter_map(|e| e.as_write().cloned()).collect();
    writes.retain(|w| w.is_initial().unwrap_or_default());
    match writes.len() {
        0 => Ok(None),
        1 => Ok(writes.pop()),
        _ => Err(unexpected!("multiple initial writes found for record {record_id}")),
    }
}

/// Builds a [`Write`] message.
#[derive(Clone, Debug, Default)]
pub struct WriteBuilder {
    record_id: Option<String>,
    context_id: Option<String>,
    recipient: Option<String>,
    protocol: Option<WriteProtocol>,
    schema: Option<String>,
    tags: Option<Map<String, Value>>,
    parent_id: Option<String>,
    date_created: Option<DateTime<Utc>>,
    message_timestamp: Option<DateTime<Utc>>,
    published: Option<bool>,
    date_published: Option<DateTime<Utc>>,
    data_format: Option<String>,
    data: Option<Data>,
    permission_grant_id: Option<String>,
    protocol_role: Option<String>,
    delegated_grant: Option<DelegatedGrant>,
    encryption: Option<EncryptionProperty>,
}

impl WriteBuilder {
    /// Returns a new, empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an existing record's id, for an update. Left unset, the build
    /// step computes a fresh [`entry_id`] for a new record.
    #[must_use]
    pub fn record_id(mut self, record_id: impl Into<String>) -> Self {
        self.record_id = Some(record_id.into());
        self
    }

    /// Sets the protocol-thread context id. Required for any record with a
    /// `parent_id`.
    #[must_use]
    pub fn context_id(mut self, context_id: impl Into<String>) -> Self {
        self.context_id = Some(context_id.into());
        self
    }

    /// Sets the DID the record is addressed to.
    #[must_use]
    pub fn recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    /// Declares the protocol and protocol path this record is written
    /// under.
    #[must_use]
    pub fn protocol(mut self, protocol: WriteProtocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    /// Sets the schema URI this record must conform to.
    #[must_use]
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Sets tag values for filtering.
    #[must_use]
    pub fn tags(mut self, tags: Map<String, Value>) -> Self {
        self.tags = Some(tags);
        self
    }

    /// Sets the id of the record this one nests under.
    #[must_use]
    pub fn parent_id(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// The datetime the record was first created. Defaults to now; ignored
    /// for updates, which inherit the initial write's `date_created`.
    #[must_use]
    pub const fn date_created(mut self, date_created: DateTime<Utc>) -> Self {
        self.date_created = Some(date_created);
        self
    }

    /// Marks the record as published (publicly readable without
    /// authorization).
    #[must_use]
    pub const fn published(mut self, published: bool) -> Self {
        self.published = Some(published);
        if published && self.date_published.is_none() {
            self.date_published = self.message_timestamp;
        }
        self
    }

    /// Sets the payload's declared media type.
    #[must_use]
    pub fn data_format(mut self, data_format: impl Into<String>) -> Self {
        self.data_format = Some(data_format.into());
        self
    }

    /// Sets the record's payload.
    #[must_use]
    pub fn data(mut self, data: Data) -> Self {
        self.data = Some(data);
        self
    }

    /// Specifies the permission grant id authorizing this write.
    #[must_use]
    pub fn permission_grant_id(mut self, id: impl Into<String>) -> Self {
        self.permission_grant_id = Some(id.into());
        self
    }

    /// Specifies the protocol role invoked for this write.
    #[must_use]
    pub fn protocol_role(mut self, role: impl Into<String>) -> Self {
        self.protocol_role = Some(role.into());
        self
    }

    /// Attaches a delegated grant the signer invokes on the tenant's
    /// behalf.
    #[must_use]
    pub fn delegated_grant(mut self, grant: DelegatedGrant) -> Self {
        self.delegated_grant = Some(grant);
        self
    }

    /// Sets payload encryption metadata.
    #[must_use]
    pub fn encryption(mut self, encryption: EncryptionProperty) -> Self {
        self.encryption = Some(encryption);
        self
    }

    /// Builds and signs the write message.
    ///
    /// # Errors
    /// Returns an error if no payload was set or signing fails.
    pub async fn build(self, signer: &impl Signer) -> Result<Write> {
        let Some(data) = self.data else {
            return Err(unexpected!("record data not set"));
        };
        let bytes = match &data {
            Data::Bytes(bytes) => bytes.clone(),
            Data::Stream(stream) => stream.clone().into_vec(),
        };
        let data_cid = cid::of_bytes(&bytes);
        let data_size = u64::try_from(bytes.len()).unwrap_or(u64::MAX);

        let message_timestamp = self.message_timestamp.unwrap_or_else(Utc::now);
        let date_created = self.date_created.unwrap_or(message_timestamp);

        let descriptor = WriteDescriptor {
            base: Descriptor {
                interface: Interface::Records,
                method: Method::Write,
                message_timestamp,
            },
            protocol: self.protocol.as_ref().map(|p| p.protocol.clone()),
            protocol_path: self.protocol.as_ref().map(|p| p.protocol_path.clone()),
            recipient: self.recipient,
            schema: self.schema,
            tags: self.tags,
            parent_id: self.parent_id,
            data_cid,
            data_size,
            date_created,
            published: self.published,
            date_published: self.date_published,
            data_format: self.data_format.unwrap_or_else(|| "application/json".to_string()),
        };

        let record_id = match self.record_id {
            Some(id) => id,
            None => {
                let vm = signer
                    .verification_method()
                    .await
                    .map_err(|e| unexpected!("issue fetching verification method: {e}"))?;
                let author = vm.split('#').next().unwrap_or(&vm).to_string();
                entry_id(&descriptor, &author)?
            }
        };

        let mut auth_builder = AuthorizationBuilder::new()
            .descriptor_cid(cid::from_value(&descriptor)?)
            .record_id(record_id.as_str());
        if let Some(context_id) = &self.context_id {
            auth_builder = auth_builder.context_id(context_id.clone());
        }
        if let Some(id) = self.permission_grant_id {
            auth_builder = auth_builder.permission_grant_id(id);
        }
        if let Some(role) = self.protocol_role {
            auth_builder = auth_builder.protocol_role(role);
        }
        if let Some(delegated_grant) = self.delegated_grant {
            auth_builder = auth_builder.delegated_grant(delegated_grant);
        }
        let authorization = auth_builder.build(signer).await?;

        let encoded_data = if bytes.len() <= data::MAX_ENCODED_SIZE {
            Some(Base64UrlUnpadded::encode_string(&bytes))
        } else {
            None
        };

        Ok(Write {
            record_id,
            context_id: self.context_id,
            descriptor,
            authorization,
            attestation: None,
            encryption: self.encryption,
            encoded_data,
            data: Some(data),
        })
    }
}
