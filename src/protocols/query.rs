//! # Protocols Query
//!
//! `Query` fetches configured protocol definitions, optionally restricted
//! to a single protocol URI. An unauthorized (or unauthenticated) query
//! only sees definitions whose author marked them `published`.

use chrono::{DateTime, Utc};
use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::authorization::{Authorization, AuthorizationBuilder};
use crate::endpoint::{Message, Reply, Status};
use crate::protocols::Configure;
use crate::provider::{MessageStore, Provider, Signer};
use crate::store::ProtocolsQuery as StoreProtocolsQuery;
use crate::utils::cid;
use crate::{Descriptor, Interface, Method, Result};

/// Process a [`Query`] message: fetch every configured protocol matching
/// the filter, dropping unpublished definitions from unauthorized queries.
///
/// # Errors
/// Returns an error if the underlying store fails.
pub async fn handle(
    owner: &str, query: Query, provider: &impl Provider,
) -> Result<Reply<QueryReply>> {
    let authorized = query.authorization.is_some();

    let protocol = query.descriptor.filter.as_ref().and_then(|f| f.protocol.clone());
    let store_query = StoreProtocolsQuery { protocol };
    let (entries, _) = MessageStore::query(provider, owner, &store_query.into()).await?;

    let mut configures = vec![];
    for entry in &entries {
        let configure: Configure = entry.try_into()?;
        if authorized || configure.descriptor.definition.published {
            configures.push(configure);
        }
    }

    Ok(Reply {
        status: Status { code: StatusCode::OK.as_u16(), detail: None },
        body: Some(QueryReply {
            entries: if configures.is_empty() { None } else { Some(configures) },
        }),
    })
}

/// The [`Query`] message expected by the handler.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    /// The Query descriptor.
    pub descriptor: QueryDescriptor,

    /// The message authorization. Unset for an anonymous query over
    /// published protocols.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization: Option<Authorization>,
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
        self.authorization.as_ref()
    }

    async fn handle(self, owner: &str, provider: &impl Provider) -> Result<Reply<Self::Reply>> {
        handle(owner, self, provider).await
    }
}

/// The [`Query`] message descriptor.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDescriptor {
    /// The base descriptor.
    #[serde(flatten)]
    pub base: Descriptor,

    /// Filter matching protocols to return.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<QueryFilter>,
}

/// Restricts a [`Query`] to a single protocol URI.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryFilter {
    /// The protocol URI to fetch.
    pub protocol: String,
}

/// [`QueryReply`] is returned by the handler in the [`Reply`] `body` field.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct QueryReply {
    /// The protocol configurations matching the query.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<Configure>>,
}

/// Builds a [`Query`] message.
#[derive(Clone, Debug, Default)]
pub struct QueryBuilder {
    message_timestamp: Option<DateTime<Utc>>,
    filter: Option<QueryFilter>,
    authorize: Option<bool>,
}

impl QueryBuilder {
    /// Returns a new [`QueryBuilder`].
    #[must_use]
    pub fn new() -> Self {
        Self { message_timestamp: Some(Utc::now()), ..Self::default() }
    }

    /// Restricts the query to a single protocol URI.
    #[must_use]
    pub fn filter(mut self, protocol: impl Into<String>) -> Self {
        self.filter = Some(QueryFilter { protocol: protocol.into() });
        self
    }

    /// Whether to sign the query. Defaults to `true`; set `false` to build
    /// an anonymous query over published protocols only.
    #[must_use]
    pub const fn authorize(mut self, authorize: bool) -> Self {
        self.authorize = Some(authorize);
        self
    }

    /// Builds the query message.
    ///
    /// # Errors
    /// Returns an error if signing fails.
    pub async fn build(self, signer: &impl Signer) -> Result<Query> {
        let descriptor = QueryDescriptor {
            base: Descriptor {
                interface: Interface::Protocols,
                method: Method::Query,
                message_timestamp: self.message_timestamp.unwrap_or_else(Utc::now),
            },
            filter: self.filter,
        };

        let authorization = if self.authorize.unwrap_or(true) {
            let builder =
                AuthorizationBuilder::new().descriptor_cid(cid::from_value(&descriptor)?);
            Some(builder.build(signer).await?)
        } else {
            None
        };

        Ok(Query { descriptor, authorization })
    }
}
