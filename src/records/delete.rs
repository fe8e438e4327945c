//! # Records Delete
//!
//! The records delete endpoint handles `RecordsDelete` messages — requests
//! to delete a [`Write`] record.
//!
//! Technically, the [`Write`] record is not deleted, but rather a new
//! [`Delete`] record is created to mark the record as deleted. The [`Delete`]
//! record is used to prune the record and its descendants from the system,
//! leaving only the [`Delete`] and initial [`Write`] records.

use std::collections::HashMap;

use async_recursion::async_recursion;
use chrono::SecondsFormat::Micros;
use chrono::{DateTime, Utc};
use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::authorization::{Authorization, AuthorizationBuilder};
use crate::endpoint::{Message, Reply, Status};
use crate::provider::{DataStore, EventLog, EventStream, MessageStore, Provider, Signer};
use crate::records::{RecordsFilter, Write, protocol};
use crate::store::{Entry, EntryType, RecordsQueryBuilder};
use crate::tasks::{self, Task, TaskType};
use crate::utils::cid;
use crate::{Descriptor, Error, Interface, Method, Result, forbidden, unexpected};

/// Handle — or process — a [`Delete`] message.
///
/// # Errors
///
/// The endpoint will return an error when message authorization fails or when
/// an issue occurs attempting to delete the specified record from the
/// [`MessageStore`].
pub async fn handle(owner: &str, delete: Delete, provider: &impl Provider) -> Result<Reply<DeleteReply>> {
    let latest = latest_record(owner, &delete.descriptor.record_id, false, provider).await?;
    let Some(latest) = latest else {
        return Err(Error::NotFound("no matching record found".to_string()));
    };

    if latest.descriptor().method == Method::Delete {
        reject_repeat_delete(&delete, &latest)?;
    }

    delete.authorize(owner, &Write::try_from(&latest)?, provider).await?;

    if delete.descriptor().message_timestamp < latest.descriptor().message_timestamp {
        return Err(Error::Conflict("newer record version exists".to_string()));
    }

    tasks::run(owner, TaskType::RecordsDelete(delete.clone()), provider).await?;

    Ok(Reply { status: Status { code: StatusCode::ACCEPTED.as_u16(), detail: None }, body: None })
}

/// Rejects a delete targeting a record that is already a tombstone, unless
/// it's a prune of a tombstone that has not itself been pruned.
fn reject_repeat_delete(delete: &Delete, latest: &Entry) -> Result<()> {
    if !delete.descriptor.prune {
        return Err(Error::NotFound("cannot delete a `RecordsDelete` record".to_string()));
    }
    if Delete::try_from(latest)?.descriptor.prune {
        return Err(Error::NotFound("attempting to prune an already pruned record".to_string()));
    }
    Ok(())
}

/// Fetches the most recent message (write or delete) for `record_id`,
/// optionally including archived (superseded) entries.
async fn latest_record(
    owner: &str, record_id: &str, include_archived: bool, store: &impl MessageStore,
) -> Result<Option<Entry>> {
    let query = RecordsQueryBuilder::new()
        .method(None)
        .include_archived(include_archived)
        .add_filter(RecordsFilter::new().record_id(record_id))
        .build();
    let (entries, _) = MessageStore::query(store, owner, &query).await?;
    Ok(entries.into_iter().next())
}

/// The [`Delete`] message expected by the handler.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Delete {
    /// Delete descriptor.
    pub descriptor: DeleteDescriptor,

    /// Message authorization.
    pub authorization: Authorization,
}

impl Message for Delete {
    type Reply = DeleteReply;

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

/// [`DeleteReply`] is returned by the handler in the [`Reply`] `body` field.
#[derive(Debug)]
pub struct DeleteReply;

impl TryFrom<Entry> for Delete {
    type Error = crate::Error;

    fn try_from(record: Entry) -> Result<Self> {
        match record.message {
            EntryType::Delete(delete) => Ok(delete),
            _ => Err(unexpected!("expected `RecordsDelete` message")),
        }
    }
}

impl TryFrom<&Entry> for Delete {
    type Error = crate::Error;

    fn try_from(record: &Entry) -> Result<Self> {
        match &record.message {
            EntryType::Delete(delete) => Ok(delete.clone()),
            _ => Err(unexpected!("expected `RecordsDelete` message")),
        }
    }
}

impl Task for Delete {
    async fn run(&self, owner: &str, provider: &impl Provider) -> Result<()> {
        apply(owner, self, provider).await
    }
}

impl Delete {
    /// Build flattened indexes for the write message.
    #[must_use]
    pub(crate) fn build_indexes(&self) -> HashMap<String, String> {
        HashMap::from([
            ("interface".to_string(), Interface::Records.to_string()),
            ("method".to_string(), Method::Delete.to_string()),
            ("recordId".to_string(), self.descriptor.record_id.clone()),
            (
                "messageTimestamp".to_string(),
                self.descriptor.base.message_timestamp.to_rfc3339_opts(Micros, true),
            ),
            ("author".to_string(), self.authorization.author().unwrap_or_default()),
            ("initial".to_string(), "false".to_string()),
        ])
    }

    /// Authorizes the delete: the tenant may always delete, a delegate must
    /// carry a grant covering this record, and anyone else must hold a
    /// protocol role that permits deletion.
    async fn authorize(&self, owner: &str, write: &Write, store: &impl MessageStore) -> Result<()> {
        let authzn = &self.authorization;
        let author = authzn.author()?;

        if let Some(delegated_grant) = &authzn.author_delegated_grant {
            delegated_grant.to_grant()?.permit_delete(&author, &authzn.signer()?, self, write, store).await?;
        }

        if author == owner {
            return Ok(());
        }

        let protocol = write.descriptor.protocol.as_ref().ok_or_else(|| forbidden!("delete request failed authorization"))?;
        protocol::Authorizer::new(protocol)
            .context_id(write.context_id.as_ref())
            .initial_write(write)
            .permit_delete(owner, self, store)
            .await
    }
}

/// The [`Delete`] message descriptor.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteDescriptor {
    /// The base descriptor
    #[serde(flatten)]
    pub base: Descriptor,

    /// The ID of the record to delete.
    pub record_id: String,

    /// Specifies whether descendent records should be pruned or not.
    pub prune: bool,
}

/// Builds a [`Delete`] message.
#[derive(Clone, Debug, Default)]
pub struct DeleteBuilder {
    record_id: Option<String>,
    prune: bool,
    message_timestamp: Option<DateTime<Utc>>,
}

impl DeleteBuilder {
    /// Returns a new [`DeleteBuilder`].
    #[must_use]
    pub fn new() -> Self {
        Self { message_timestamp: Some(Utc::now()), ..Self::default() }
    }

    /// Sets the id of the record to delete.
    #[must_use]
    pub fn record_id(mut self, record_id: impl Into<String>) -> Self {
        self.record_id = Some(record_id.into());
        self
    }

    /// Whether to purge descendant records as well as tombstoning this
    /// one.
    #[must_use]
    pub const fn prune(mut self, prune: bool) -> Self {
        self.prune = prune;
        self
    }

    /// Builds and signs the delete message.
    ///
    /// # Errors
    /// Returns an error if no `record_id` was set or signing fails.
    pub async fn build(self, signer: &impl Signer) -> Result<Delete> {
        let record_id = self.record_id.ok_or_else(|| unexpected!("record_id not set"))?;

        let descriptor = DeleteDescriptor {
            base: Descriptor {
                interface: Interface::Records,
                method: Method::Delete,
                message_timestamp: self.message_timestamp.unwrap_or_else(Utc::now),
            },
            record_id,
            prune: self.prune,
        };

        let authorization =
            AuthorizationBuilder::new().descriptor_cid(cid::from_value(&descriptor)?).build(signer).await?;

        Ok(Delete { descriptor, authorization })
    }
}

/// Persists the tombstone, then prunes or trims superseded state as the
/// delete directs. Runs as a resumable [`Task`] rather than inline in
/// [`handle`] so a crash mid-prune resumes rather than leaving orphans.
async fn apply(owner: &str, delete: &Delete, provider: &impl Provider) -> Result<()> {
    let (entries, _) = {
        let query = RecordsQueryBuilder::new()
            .method(None)
            .include_archived(true)
            .add_filter(RecordsFilter::new().record_id(delete.descriptor.record_id.as_str()))
            .build();
        MessageStore::query(provider, owner, &query).await?
    };
    if entries.is_empty() {
        return Err(Error::NotFound("no matching records found".to_string()));
    }
    if entries.len() > 2 {
        return Err(unexpected!("multiple messages exist"));
    }

    let latest = entries.last().expect("checked non-empty above");
    if delete.descriptor().message_timestamp < latest.descriptor().message_timestamp {
        return Err(Error::Conflict("newer record already exists".to_string()));
    }

    let initial_write = Write::try_from(&entries[0])?;
    if !initial_write.is_initial()? {
        return Err(unexpected!("initial write is not earliest message"));
    }

    let mut delete_entry = Entry::from(delete);
    for (key, value) in initial_write.build_indexes() {
        delete_entry.add_index(key, value);
    }
    MessageStore::put(provider, owner, &delete_entry).await?;
    EventLog::append(provider, owner, &delete_entry).await?;
    EventStream::emit(provider, owner, &delete_entry).await?;

    if delete.descriptor.prune {
        prune_descendants(owner, &delete.descriptor.record_id, provider).await?;
    }
    retire_superseded(owner, &delete_entry, &entries, provider).await?;

    Ok(())
}

/// Hard-deletes a record's descendants (and their data), recursing into
/// each child's own descendants first.
#[async_recursion]
async fn prune_descendants(owner: &str, record_id: &str, provider: &impl Provider) -> Result<()> {
    let query = RecordsQueryBuilder::new().add_filter(RecordsFilter::new().parent_id(record_id)).build();
    let (children, _) = MessageStore::query(provider, owner, &query).await?;
    if children.is_empty() {
        return Ok(());
    }

    let mut by_record: HashMap<String, Vec<Entry>> = HashMap::new();
    for entry in children {
        let child_record_id = match &entry.message {
            EntryType::Write(write) => write.record_id.clone(),
            EntryType::Delete(delete) => delete.descriptor.record_id.clone(),
            EntryType::Configure(_) => return Err(unexpected!("unexpected message type")),
        };
        by_record.entry(child_record_id).or_default().push(entry);
    }

    for (record_id, entries) in by_record {
        prune_descendants(owner, &record_id, provider).await?;
        purge(owner, &entries, provider).await?;
    }

    Ok(())
}

/// Deletes a child record's data and message log entries outright.
async fn purge(owner: &str, records: &[Entry], provider: &impl Provider) -> Result<()> {
    let mut writes: Vec<&Entry> =
        records.iter().filter(|entry| entry.descriptor().method == Method::Write).collect();
    writes.sort_by_key(|entry| entry.descriptor().message_timestamp);

    if let Some(latest) = writes.pop() {
        let write = latest.as_write().ok_or_else(|| unexpected!("latest record is not a `RecordsWrite`"))?;
        DataStore::delete(provider, owner, &write.record_id, &write.descriptor.data_cid).await?;
    }

    for message in records {
        let message_cid = message.cid()?;
        EventLog::delete(provider, owner, &message_cid).await?;
        MessageStore::delete(provider, owner, &message_cid).await?;
    }

    Ok(())
}

/// Trims every message older than `latest` (typically, at most, one —
/// the previous write) to just its data, keeping the record history bounded
/// to the tombstone and the initial write. The initial write is archived in
/// place rather than removed, since it remains the provenance anchor for
/// reads of the now-deleted record.
async fn retire_superseded(owner: &str, latest: &Entry, existing: &[Entry], provider: &impl Provider) -> Result<()> {
    for entry in existing {
        if entry.descriptor().message_timestamp >= latest.descriptor().message_timestamp {
            continue;
        }
        release_data(owner, entry, latest, provider).await?;

        let write = Write::try_from(entry)?;
        if write.is_initial()? {
            let mut archived = Entry::from(&write);
            archived.add_index("initial", true.to_string());
            MessageStore::put(provider, owner, &archived).await?;
        } else {
            let message_cid = entry.cid()?;
            MessageStore::delete(provider, owner, &message_cid).await?;
            EventLog::delete(provider, owner, &message_cid).await?;
        }
    }

    Ok(())
}

/// Deletes `existing`'s data unless `latest` still references the same
/// `data_cid` (an update that left the payload unchanged).
async fn release_data(owner: &str, existing: &Entry, latest: &Entry, store: &impl DataStore) -> Result<()> {
    let existing_write = existing.as_write().ok_or_else(|| unexpected!("unexpected message type"))?;

    if let Some(latest_write) = latest.as_write() {
        if existing_write.descriptor.data_cid == latest_write.descriptor.data_cid {
            return Ok(());
        }
    }

    DataStore::delete(store, owner, &existing_write.record_id, &existing_write.descriptor.data_cid)
        .await
        .map_err(|e| unexpected!("failed to delete data: {e}"))
}
