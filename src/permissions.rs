//! # Permissions
//!
//! A grant authorizes its grantee to act as an author within a bounded
//! scope: one interface, one method, and (for `records`) optionally one
//! protocol and one point in a record's lineage. [`Scope`] is the shape
//! that bound takes; [`fetch_grant`] resolves a grant record ID into the
//! terms a handler checks it against.

mod grant;
mod protocol;

use serde::{Deserialize, Serialize};

pub use self::grant::{
    Grant, GrantBuilder, GrantData, RequestBuilder, RequestData, RevocationBuilder, RevocationData,
};
pub(crate) use self::protocol::{Protocol, fetch_scope};
use crate::provider::MessageStore;
use crate::store::{RecordsFilter, RecordsQuery};
use crate::{Interface, Method, Result, forbidden};

/// Resolves `grant_id` to the [`Grant`] record it names, within `owner`'s
/// store.
///
/// # Errors
/// Returns an error if no record with that ID exists, or it exists but is
/// not a `RecordsWrite` carrying a grant payload.
pub(crate) async fn fetch_grant(owner: &str, grant_id: &str, store: &impl MessageStore) -> Result<Grant> {
    let query = RecordsQuery::new().add_filter(RecordsFilter::new().record_id(grant_id));
    let (entries, _) = store.query(owner, &query.into()).await?;
    let write = entries
        .first()
        .and_then(crate::store::Entry::as_write)
        .ok_or_else(|| forbidden!("no grant found for {grant_id}"))?;
    Grant::from_write(write)
}

/// The bound a grant or request places on what it authorizes: a single
/// interface/method pair, narrowed by protocol and record lineage when the
/// interface is `records`.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    /// Interface the bound applies to.
    pub interface: Interface,

    /// Method within `interface` the bound applies to.
    pub method: Method,

    /// Protocol the bound is restricted to. Every `records` scope carries
    /// one; `messages` and `protocols` scopes may go unrestricted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,

    /// For `records` scopes, a restriction to a single record lineage:
    /// either the context a thread of records shares, or a path within a
    /// protocol's record tree.
    #[serde(flatten)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lineage: Option<Lineage>,
}

impl Default for Scope {
    fn default() -> Self {
        Self { interface: Interface::Records, method: Method::Read, protocol: None, lineage: None }
    }
}

impl Scope {
    /// Interface this scope bounds.
    #[must_use]
    pub fn interface(&self) -> Interface {
        self.interface.clone()
    }

    /// Method this scope bounds.
    #[must_use]
    pub fn method(&self) -> Method {
        self.method.clone()
    }

    /// Protocol this scope is restricted to, if any.
    #[must_use]
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }
}

/// A restriction to one point in a record's lineage, carried by a
/// `records`-interface [`Scope`].
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Lineage {
    /// Restricted to records sharing this context ID.
    ContextId(String),

    /// Restricted to records at this path within their protocol.
    ProtocolPath(String),
}

impl Lineage {
    /// The context ID this restriction names, if it is a context
    /// restriction.
    #[must_use]
    pub fn context_id(&self) -> Option<&str> {
        match self {
            Self::ContextId(id) => Some(id),
            Self::ProtocolPath(_) => None,
        }
    }

    /// The protocol path this restriction names, if it is a path
    /// restriction.
    #[must_use]
    pub fn protocol_path(&self) -> Option<&str> {
        match self {
            Self::ProtocolPath(path) => Some(path),
            Self::ContextId(_) => None,
        }
    }
}

/// Conditions a grantee must satisfy when invoking a grant, beyond the
/// scope bound itself.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conditions {
    /// Whether a message authored under this grant must, or must not, be
    /// marked published. Unset leaves publication up to the author.
    pub publication: Option<PublicationRule>,
}

/// A constraint on a message's `published` flag.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum PublicationRule {
    /// The message must be published.
    #[default]
    Required,

    /// The message must not be published.
    Prohibited,
}
