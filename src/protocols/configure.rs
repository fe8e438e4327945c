//! # Protocols Configure
//!
//! `Configure` registers a [`Definition`] — the record types and action
//! rules governing every record subsequently written under its protocol
//! URI. A later `Configure` for the same protocol only takes effect if its
//! `message_timestamp` dominates whatever is currently stored; anything it
//! supersedes is deleted.

use std::collections::HashMap;

use chrono::SecondsFormat::Micros;
use chrono::{DateTime, Utc};
use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::authorization::{Authorization, AuthorizationBuilder};
use crate::endpoint::{Message, Reply, Status};
use crate::protocols::Definition;
use crate::provider::{MessageStore, Provider, Signer};
use crate::store::{Entry, EntryType, ProtocolsQuery};
use crate::utils::cid;
use crate::{Descriptor, Interface, Method, Result, forbidden, protocols, unexpected};

/// Process a [`Configure`] message: authorize it, and, if it dominates
/// whatever is currently registered for its protocol, persist it and
/// retire what it supersedes.
///
/// # Errors
/// Returns an error if authorization fails or the underlying stores fail.
pub async fn handle(
    owner: &str, configure: Configure, provider: &impl Provider,
) -> Result<Reply<ConfigureReply>> {
    configure.authorize(owner, provider).await?;

    let query = ProtocolsQuery { protocol: Some(configure.descriptor.definition.protocol.clone()) };
    let (existing, _) = MessageStore::query(provider, owner, &query.into()).await?;

    let dominates = existing.iter().all(|entry| {
        entry.descriptor().message_timestamp < configure.descriptor.base.message_timestamp
    });
    if !dominates {
        return Err(crate::Error::Conflict(
            "a newer protocol configuration already exists".to_string(),
        ));
    }

    let entry = Entry::from(&configure);
    MessageStore::put(provider, owner, &entry).await?;

    for stale in &existing {
        let cid = stale.cid()?;
        MessageStore::delete(provider, owner, &cid).await?;
    }

    Ok(Reply {
        status: Status { code: StatusCode::ACCEPTED.as_u16(), detail: None },
        body: Some(ConfigureReply),
    })
}

/// The [`Configure`] message expected by the handler.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Configure {
    /// The Configure descriptor.
    pub descriptor: ConfigureDescriptor,

    /// The message authorization.
    pub authorization: Authorization,
}

impl Message for Configure {
    type Reply = ConfigureReply;

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

/// [`ConfigureReply`] is returned by the handler in the [`Reply`] `body`
/// field.
#[derive(Debug)]
pub struct ConfigureReply;

impl TryFrom<Entry> for Configure {
    type Error = crate::Error;

    fn try_from(entry: Entry) -> Result<Self> {
        match entry.message {
            EntryType::Configure(configure) => Ok(configure),
            _ => Err(unexpected!("expected `ProtocolsConfigure` message")),
        }
    }
}

impl TryFrom<&Entry> for Configure {
    type Error = crate::Error;

    fn try_from(entry: &Entry) -> Result<Self> {
        match &entry.message {
            EntryType::Configure(configure) => Ok(configure.clone()),
            _ => Err(unexpected!("expected `ProtocolsConfigure` message")),
        }
    }
}

impl Configure {
    /// Build flattened indexes for the configure message.
    #[must_use]
    pub(crate) fn build_indexes(&self) -> HashMap<String, String> {
        let mut indexes = HashMap::new();
        indexes.insert("interface".to_string(), Interface::Protocols.to_string());
        indexes.insert("method".to_string(), Method::Configure.to_string());
        indexes.insert("protocol".to_string(), self.descriptor.definition.protocol.clone());
        indexes.insert("published".to_string(), self.descriptor.definition.published.to_string());
        indexes.insert(
            "messageTimestamp".to_string(),
            self.descriptor.base.message_timestamp.to_rfc3339_opts(Micros, true),
        );
        indexes
    }

    async fn authorize(&self, owner: &str, store: &impl MessageStore) -> Result<()> {
        let authzn = &self.authorization;
        let author = authzn.author()?;

        if let Some(delegated_grant) = &authzn.author_delegated_grant {
            let grant = delegated_grant.to_grant()?;
            grant.verify(owner, &author, self.descriptor(), store).await?;
        }

        if author == owner {
            return Ok(());
        }

        let Some(grant_id) = &authzn.payload()?.permission_grant_id else {
            return Err(forbidden!("author has no grant"));
        };
        let grant = crate::permissions::fetch_grant(owner, grant_id, store).await?;
        grant.verify(owner, &authzn.signer()?, self.descriptor(), store).await?;

        // an unscoped-to-protocol grant authorizes configuring any protocol
        let Some(protocol) = grant.data.scope.protocol() else {
            return Ok(());
        };
        if protocol != self.descriptor.definition.protocol {
            return Err(forbidden!("message protocol does not match grant protocol"));
        }

        Ok(())
    }
}

/// Configure descriptor.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigureDescriptor {
    /// The base descriptor
    #[serde(flatten)]
    pub base: Descriptor,

    /// The protocol definition.
    pub definition: Definition,
}

/// Builds a [`Configure`] message.
#[derive(Clone, Debug, Default)]
pub struct ConfigureBuilder {
    message_timestamp: Option<DateTime<Utc>>,
    definition: Option<Definition>,
    permission_grant_id: Option<String>,
}

impl ConfigureBuilder {
    /// Returns a new [`ConfigureBuilder`].
    #[must_use]
    pub fn new() -> Self {
        Self { message_timestamp: Some(Utc::now()), ..Self::default() }
    }

    /// Specify the protocol's definition.
    #[must_use]
    pub fn definition(mut self, definition: Definition) -> Self {
        self.definition = Some(definition);
        self
    }

    /// Specify a permission grant id to use with the configuration.
    #[must_use]
    pub fn permission_grant_id(mut self, permission_grant_id: impl Into<String>) -> Self {
        self.permission_grant_id = Some(permission_grant_id.into());
        self
    }

    /// Generate the Configure message.
    ///
    /// # Errors
    /// Returns an error if no definition was set, its structure is invalid,
    /// or signing fails.
    pub async fn build(self, signer: &impl Signer) -> Result<Configure> {
        let mut definition = self.definition.ok_or_else(|| unexpected!("definition not set"))?;
        protocols::normalize_definition(&mut definition)?;
        protocols::validate_structure(&definition)?;

        let descriptor = ConfigureDescriptor {
            base: Descriptor {
                interface: Interface::Protocols,
                method: Method::Configure,
                message_timestamp: self.message_timestamp.unwrap_or_else(Utc::now),
            },
            definition,
        };

        let mut builder =
            AuthorizationBuilder::new().descriptor_cid(cid::from_value(&descriptor)?);
        if let Some(id) = self.permission_grant_id {
            builder = builder.permission_grant_id(id);
        }
        let authorization = builder.build(signer).await?;

        Ok(Configure { descriptor, authorization })
    }
}
