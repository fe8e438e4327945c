//! # Messages Query
//!
//! The messages query endpoint handles `MessagesQuery` messages — requests
//! to query the [`EventLog`] for matching persisted messages (of any type).

use http::StatusCode;
use serde::{Deserialize, Serialize};

use super::MessagesFilter;
use crate::authorization::Authorization;
use crate::endpoint::{Message, Reply, Status};
use crate::permissions;
use crate::provider::{EventLog, Provider};
use crate::store::{self, Cursor};
use crate::utils::cid;
use crate::{Descriptor, Result, forbidden};

/// Handle — or process — a [`Query`] message.
///
/// # Errors
///
/// The endpoint will return an error when message authorization fails or when
/// an issue occurs querying the [`EventLog`].
pub async fn handle(owner: &str, query: Query, provider: &impl Provider) -> Result<Reply<QueryReply>> {
    query.authorize(owner, provider).await?;

    let store_query = store::Query::from(query);
    let (events, cursor) = EventLog::query(provider, owner, &store_query).await?;

    let cids: Vec<String> = events.iter().filter_map(|event| event.cid().ok()).collect();
    let entries = (!cids.is_empty()).then_some(cids);

    Ok(Reply { status: Status { code: StatusCode::OK.as_u16(), detail: None }, body: Some(QueryReply { entries, cursor }) })
}

/// The [`Query`] message expected by the handler.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Query {
    /// The `Query` descriptor.
    pub descriptor: QueryDescriptor,

    /// The message authorization.
    pub authorization: Authorization,
}

impl Message for Query {
    type Reply = QueryReply;

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

impl Query {
    /// Authorizes the query: the tenant may always query their own log;
    /// anyone else needs a grant, and if that grant is itself bound to a
    /// protocol, every filter in the query must share it.
    async fn authorize(&self, owner: &str, store: &impl Provider) -> Result<()> {
        let author = self.authorization.author()?;
        if author == owner {
            return Ok(());
        }

        let grant_id = self
            .authorization
            .payload()?
            .permission_grant_id
            .clone()
            .ok_or_else(|| forbidden!("author has no grant"))?;
        let grant = permissions::fetch_grant(owner, &grant_id, store).await?;
        grant.verify(owner, &self.authorization.signer()?, self.descriptor(), store).await?;

        let Some(granted_protocol) = grant.data.scope.protocol() else {
            return Ok(());
        };
        let all_match = self
            .descriptor
            .filters
            .iter()
            .all(|filter| filter.protocol.as_deref() == Some(granted_protocol));
        if !all_match {
            return Err(forbidden!("filter and grant protocols do not match"));
        }
        Ok(())
    }
}

/// [`QueryReply`] is returned by the handler in the [`Reply`] `body` field.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct QueryReply {
    /// Entries matching the message's query.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<String>>,

    /// The message authorization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
}

/// The [`Query`] message descriptor.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDescriptor {
    /// The base descriptor
    #[serde(flatten)]
    pub base: Descriptor,

    /// Filters to apply when querying for messages.
    pub filters: Vec<MessagesFilter>,

    /// The pagination cursor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
}
