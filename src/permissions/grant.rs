//! Permission grants: signed records that authorize a grantee to act as an
//! author within a scope, optionally delegated from the tenant itself.

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::endpoint::Message;
use crate::permissions::{Conditions, Scope};
use crate::provider::MessageStore;
use crate::records::{Delete, Query, Read, RecordsFilter, Write};
use crate::store::RecordsQuery;
use crate::{Descriptor, Method, Result, forbidden, unexpected};

/// A permission grant resolved from its underlying `RecordsWrite`.
#[derive(Clone, Debug)]
pub struct Grant {
    /// The grant's record ID.
    pub id: String,
    /// The DID that issued the grant.
    pub grantor: String,
    /// The DID the grant was issued to.
    pub grantee: String,
    /// When the grant was created.
    pub date_granted: DateTime<Utc>,
    /// The grant's terms.
    pub data: GrantData,
}

/// The grant's terms, carried as the grant record's encoded payload.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantData {
    /// When the grant expires.
    pub date_expires: DateTime<Utc>,
    /// Whether the grantee may act fully as the grantor (create grants of
    /// their own derived from this one).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegated: Option<bool>,
    /// Human-readable description of the grant's purpose.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The record ID of the `PermissionsRequest` this grant satisfies, if
    /// any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// What the grant authorizes.
    pub scope: Scope,
    /// Conditions the grantee must satisfy when invoking the grant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Conditions>,
}

impl Grant {
    /// Resolves a `Grant` from the `RecordsWrite` that created it.
    ///
    /// # Errors
    /// Returns an error if the write carries no encoded grant payload or the
    /// payload does not decode as [`GrantData`].
    pub fn from_write(write: &Write) -> Result<Self> {
        let desc = &write.descriptor;
        let Some(grant_enc) = &write.encoded_data else {
            return Err(forbidden!("missing grant data"));
        };
        let grant_bytes = Base64UrlUnpadded::decode_vec(grant_enc)
            .map_err(|e| unexpected!("invalid grant payload: {e}"))?;
        let data: GrantData = serde_json::from_slice(&grant_bytes)?;

        Ok(Self {
            id: write.record_id.clone(),
            grantor: write.authorization.signer()?,
            grantee: desc.recipient.clone().unwrap_or_default(),
            date_granted: desc.date_created,
            data,
        })
    }

    /// Whether the grant's validity window has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.data.date_expires
    }

    /// Verifies `grantor`/`grantee` match this grant, that the grant is
    /// still valid for `descriptor`'s interface and method, and that it has
    /// not been revoked.
    ///
    /// # Errors
    /// Returns an error if the grant has expired, was issued by someone
    /// else, was issued to someone else, does not cover the requested
    /// interface/method, or has since been revoked.
    pub async fn verify(
        &self, grantor: &str, grantee: &str, descriptor: &Descriptor, store: &impl MessageStore,
    ) -> Result<()> {
        if self.is_expired() {
            return Err(forbidden!("grant has expired"));
        }
        if self.grantor != grantor {
            return Err(forbidden!("grant was not issued by the message signer"));
        }
        if self.grantee != grantee {
            return Err(forbidden!("grant was not issued to this author"));
        }
        if self.data.scope.interface() != descriptor.interface {
            return Err(forbidden!("grant does not cover this interface"));
        }
        if self.data.scope.method() != descriptor.method {
            return Err(forbidden!("grant does not cover this method"));
        }
        if self.is_revoked(store).await? {
            return Err(forbidden!("grant has been revoked"));
        }
        Ok(())
    }

    /// Whether a revocation record has been written as a child of this
    /// grant under the tenant's own store.
    async fn is_revoked(&self, store: &impl MessageStore) -> Result<bool> {
        let query = RecordsQuery::new().add_filter(RecordsFilter::new().parent_id(self.id.as_str()));
        let (entries, _) = store.query(&self.grantor, &query.into()).await?;
        Ok(!entries.is_empty())
    }

    /// Verifies a delegated grant's scope against the record it is being
    /// used to author: the grant's protocol (if scoped to one) must match
    /// the record's protocol.
    ///
    /// # Errors
    /// Returns an error if the record's protocol falls outside the grant's
    /// scope.
    pub fn verify_scope(&self, write: &Write) -> Result<()> {
        let Some(protocol) = self.data.scope.protocol() else {
            return Ok(());
        };
        if write.descriptor.protocol.as_deref() != Some(protocol) {
            return Err(forbidden!("record protocol is outside delegated grant scope"));
        }
        Ok(())
    }

    /// Authorizes a `RecordsRead` against this grant.
    ///
    /// # Errors
    /// Returns an error if the grant does not authorize the read.
    pub async fn permit_read(
        &self, owner: &str, author: &str, _read: &Read, write: &Write, store: &impl MessageStore,
    ) -> Result<()> {
        self.verify(owner, author, &write.descriptor.base, store).await?;
        if self.data.scope.method() != Method::Read {
            return Err(forbidden!("grant does not authorize read"));
        }
        self.verify_scope(write)
    }

    /// Authorizes a `RecordsQuery` against this grant.
    ///
    /// # Errors
    /// Returns an error if the grant does not authorize the query.
    pub async fn permit_query(
        &self, author: &str, signer: &str, query: &Query, store: &impl MessageStore,
    ) -> Result<()> {
        let _ = signer;
        self.verify(&self.grantor.clone(), author, query.descriptor(), store).await?;
        if !matches!(self.data.scope.method(), Method::Query) {
            return Err(forbidden!("grant does not authorize query"));
        }
        if let Some(protocol) = &query.descriptor.filter.protocol {
            if self.data.scope.protocol().is_some_and(|p| p != protocol) {
                return Err(forbidden!("query protocol is outside grant scope"));
            }
        }
        Ok(())
    }

    /// Authorizes a `RecordsWrite` against this grant.
    ///
    /// # Errors
    /// Returns an error if the grant does not authorize the write.
    pub async fn permit_write(
        &self, owner: &str, write: &Write, store: &impl MessageStore,
    ) -> Result<()> {
        let author = write.authorization.author()?;
        self.verify(owner, &author, &write.descriptor.base, store).await?;
        self.verify_scope(write)?;
        Ok(())
    }

    /// Authorizes a `RecordsDelete` against this grant.
    ///
    /// # Errors
    /// Returns an error if the grant does not authorize the delete, or the
    /// deleted record falls outside the grant's protocol scope.
    pub async fn permit_delete(
        &self, author: &str, signer: &str, delete: &Delete, write: &Write,
        store: &impl MessageStore,
    ) -> Result<()> {
        let _ = signer;
        self.verify(&self.grantor.clone(), author, delete.descriptor(), store).await?;
        self.verify_scope(write)
    }
}

/// Options to use when building a [`crate::records::Write`] that carries a
/// permission grant as its payload.
#[derive(Clone, Debug, Default)]
pub struct GrantBuilder {
    grantee: Option<String>,
    date_expires: Option<DateTime<Utc>>,
    request_id: Option<String>,
    description: Option<String>,
    delegated: Option<bool>,
    scope: Option<Scope>,
    conditions: Option<Conditions>,
}

impl GrantBuilder {
    /// Returns a new, empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the DID the grant is issued to.
    #[must_use]
    pub fn grantee(mut self, grantee: impl Into<String>) -> Self {
        self.grantee = Some(grantee.into());
        self
    }

    /// Sets the grant's expiry.
    #[must_use]
    pub const fn expires(mut self, date_expires: DateTime<Utc>) -> Self {
        self.date_expires = Some(date_expires);
        self
    }

    /// Associates the grant with the `PermissionsRequest` it satisfies.
    #[must_use]
    pub fn request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Sets a human-readable description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Marks the grant as delegable.
    #[must_use]
    pub const fn delegated(mut self, delegated: bool) -> Self {
        self.delegated = Some(delegated);
        self
    }

    /// Sets what the grant authorizes.
    #[must_use]
    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Sets conditions the grantee must satisfy.
    #[must_use]
    pub fn conditions(mut self, conditions: Conditions) -> Self {
        self.conditions = Some(conditions);
        self
    }

    /// Builds the grant payload. The caller wraps this as the encoded
    /// payload of a `RecordsWrite` addressed to `grantee`.
    ///
    /// # Errors
    /// Returns an error if a required field was never set.
    pub fn build(self) -> Result<GrantData> {
        let scope = self.scope.ok_or_else(|| unexpected!("grant scope not set"))?;
        Ok(GrantData {
            date_expires: self
                .date_expires
                .ok_or_else(|| unexpected!("grant expiry not set"))?,
            delegated: self.delegated,
            description: self.description,
            request_id: self.request_id,
            scope,
            conditions: self.conditions,
        })
    }
}

/// Payload of a `PermissionsRequest` record: a grantee's ask for a grant of
/// a given scope.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestData {
    /// What is being requested.
    pub scope: Scope,
    /// Conditions the requester proposes to operate under.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Conditions>,
}

/// Builder for [`RequestData`].
#[derive(Clone, Debug, Default)]
pub struct RequestBuilder {
    scope: Option<Scope>,
    conditions: Option<Conditions>,
}

impl RequestBuilder {
    /// Returns a new, empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets what is being requested.
    #[must_use]
    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Sets proposed conditions.
    #[must_use]
    pub fn conditions(mut self, conditions: Conditions) -> Self {
        self.conditions = Some(conditions);
        self
    }

    /// Builds the request payload.
    ///
    /// # Errors
    /// Returns an error if `scope` was never set.
    pub fn build(self) -> Result<RequestData> {
        Ok(RequestData {
            scope: self.scope.ok_or_else(|| unexpected!("request scope not set"))?,
            conditions: self.conditions,
        })
    }
}

/// Payload of a `PermissionsRevoke` record: withdraws a previously issued
/// grant.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevocationData {
    /// Human-readable reason for the revocation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Builder for [`RevocationData`].
#[derive(Clone, Debug, Default)]
pub struct RevocationBuilder {
    description: Option<String>,
}

impl RevocationBuilder {
    /// Returns a new, empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a human-readable reason.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Builds the revocation payload.
    #[must_use]
    pub fn build(self) -> RevocationData {
        RevocationData { description: self.description }
    }
}
