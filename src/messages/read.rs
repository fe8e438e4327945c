//! # Messages Read
//!
//! Fetches a single logged message by its CID, attaching the record's data
//! when the message is a `RecordsWrite`.

use std::io::Cursor;
use std::str::FromStr;

use ::cid::Cid;
use base64ct::{Base64UrlUnpadded, Encoding};
use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::authorization::Authorization;
use crate::endpoint::{Message, Reply, Status};
use crate::permissions::{self, Scope};
use crate::protocols::PROTOCOL_URI;
use crate::provider::{DataStore, MessageStore, Provider};
use crate::records::write;
use crate::store::{Entry, EntryType};
use crate::utils::cid;
use crate::{Descriptor, Error, Interface, Result, forbidden, unexpected};

/// Handle a read message.
///
/// # Errors
/// LATER: Add errors
pub async fn handle(owner: &str, read: Read, provider: &impl Provider) -> Result<Reply<ReadReply>> {
    let cid =
        Cid::from_str(&read.descriptor.message_cid).map_err(|e| unexpected!("invalid CID: {e}"))?;
    let entry = MessageStore::get(provider, owner, &cid.to_string())
        .await?
        .ok_or_else(|| Error::NotFound("message not found".to_string()))?;

    read.authorize(owner, &entry, provider).await?;

    let message_cid = read.descriptor.message_cid;
    let mut message = entry.message;
    let data = attached_data(owner, &mut message, provider).await?;

    Ok(Reply {
        status: Status { code: StatusCode::OK.as_u16(), detail: None },
        body: Some(ReadReply { entry: Some(ReadReplyEntry { message_cid, message, data }) }),
    })
}

/// Loads the record data for a `RecordsWrite` message, stripping its
/// `encoded_data` in the process so the reply carries the data once, via
/// the stream returned here rather than inline on the message.
async fn attached_data(
    owner: &str, message: &mut EntryType, provider: &impl Provider,
) -> Result<Option<Cursor<Vec<u8>>>> {
    let EntryType::Write(write) = message else {
        return Ok(None);
    };
    if let Some(encoded) = write.encoded_data.take() {
        let bytes = Base64UrlUnpadded::decode_vec(&encoded)?;
        return Ok(Some(Cursor::new(bytes)));
    }

    use std::io::Read as _;
    let Some(mut stream) = DataStore::get(provider, owner, &write.record_id, &write.descriptor.data_cid).await?
    else {
        return Ok(None);
    };
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf)?;
    Ok(Some(Cursor::new(buf)))
}

/// `Read` payload
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Read {
    /// The `Read` descriptor.
    pub descriptor: ReadDescriptor,

    /// The message authorization.
    pub authorization: Authorization,
}

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
        Some(&self.authorization)
    }

    async fn handle(self, owner: &str, provider: &impl Provider) -> Result<Reply<Self::Reply>> {
        handle(owner, self, provider).await
    }
}

impl Read {
    async fn authorize(&self, owner: &str, entry: &Entry, provider: &impl Provider) -> Result<()> {
        let author = self.authorization.author()?;
        if author == owner {
            return Ok(());
        }

        let grant_id = self
            .authorization
            .payload()?
            .permission_grant_id
            .clone()
            .ok_or_else(|| forbidden!("missing grant ID"))?;
        let grant = permissions::fetch_grant(owner, &grant_id, provider).await?;
        grant.verify(owner, &author, self.descriptor(), provider).await?;
        authorize_scope(owner, entry, &grant.data.scope, provider).await
    }
}

/// Resolves the protocol a logged entry belongs to, following through to
/// the initial write when `entry` is a tombstone, and following through a
/// grant record to the protocol it names when `entry` is itself a
/// permissions-protocol write.
async fn entry_protocol(owner: &str, entry: &Entry, store: &impl MessageStore) -> Result<Option<String>> {
    match &entry.message {
        EntryType::Configure(configure) => Ok(Some(configure.descriptor.definition.protocol.clone())),
        EntryType::Write(w) if w.descriptor.protocol.as_deref() == Some(PROTOCOL_URI) => {
            let scope = permissions::fetch_scope(owner, w, store).await?;
            Ok(scope.protocol().map(ToOwned::to_owned))
        }
        EntryType::Write(w) => Ok(w.descriptor.protocol.clone()),
        EntryType::Delete(delete) => {
            let initial = write::initial_write(owner, &delete.descriptor.record_id, store).await?;
            Ok(initial.and_then(|w| w.descriptor.protocol))
        }
    }
}

/// Confirms `entry` falls within `scope`'s protocol restriction, if it has
/// one.
async fn authorize_scope(owner: &str, entry: &Entry, scope: &Scope, store: &impl MessageStore) -> Result<()> {
    let Some(scoped_protocol) = scope.protocol() else {
        return Ok(());
    };
    if entry.descriptor().interface != Interface::Protocols && entry.descriptor().interface != Interface::Records {
        return Err(forbidden!("message failed scope authorization"));
    }
    match entry_protocol(owner, entry, store).await? {
        Some(protocol) if protocol == scoped_protocol => Ok(()),
        _ => Err(forbidden!("message failed scope authorization")),
    }
}

/// `Read` reply
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[allow(clippy::module_name_repetitions)]
pub struct ReadReply {
    /// The `Read` descriptor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<ReadReplyEntry>,
}

/// `Read` reply entry
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[allow(clippy::module_name_repetitions)]
pub struct ReadReplyEntry {
    /// The CID of the message.
    pub message_cid: String,

    /// The message.
    pub message: EntryType,

    /// The data associated with the message.
    #[serde(skip)]
    pub data: Option<Cursor<Vec<u8>>>,
}

/// Read descriptor.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadDescriptor {
    /// The base descriptor
    #[serde(flatten)]
    pub base: Descriptor,

    /// The CID of the message to read.
    pub message_cid: String,
}
