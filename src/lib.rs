//! # Decentralized Web Node core
//!
//! A per-tenant, content-addressed message store that accepts signed
//! protocol messages from decentralized identifiers (DIDs), authorizes them,
//! and serves queries and subscriptions over the resulting log.
//!
//! The crate is organized around the pipeline described in the top-level
//! design: decode/validate, authorize, handle, and persist. Each interface
//! (`records`, `protocols`, `messages`) implements [`Message`] and is
//! dispatched through [`endpoint::handle`].

pub mod authorization;
pub mod data;
pub mod endpoint;
pub mod event;
pub mod messages;
pub mod permissions;
pub mod protocols;
pub mod provider;
pub mod records;
pub mod schema;
pub mod store;
pub mod tasks;
pub mod utils;

/// Alias retained so handler code that imports grant machinery through
/// either name resolves to the same types.
pub use crate::permissions as grants;

use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use crate::endpoint::{Message, Reply, Status};
pub use crate::provider::Provider;

/// Result type used throughout the crate.
pub type Result<T> = anyhow::Result<T, Error>;

/// Errors produced while decoding, validating, authorizing, or handling a
/// message. Each variant maps to an HTTP-like status code at the endpoint
/// boundary; see [`Error::status`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The message was well-formed but violates a structural, schema, or
    /// state-machine invariant.
    #[error("{0}")]
    BadRequest(String),

    /// The author is authenticated but not authorized to perform the
    /// requested action.
    #[error("{0}")]
    Forbidden(String),

    /// The referenced record, message, or definition does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The message conflicts with already-stored state (e.g. a stale write).
    #[error("{0}")]
    Conflict(String),

    /// An internal failure: storage, serialization, cryptography, or a
    /// broken invariant that should never happen given valid input.
    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// Maps an error variant to its wire status code.
    #[must_use]
    pub const fn status(&self) -> u16 {
        match self {
            Self::BadRequest(_) => 400,
            Self::Forbidden(_) => 401,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::Internal(_) => 500,
        }
    }
}

/// Builds an [`Error::BadRequest`] with a formatted message.
#[macro_export]
macro_rules! bad_request {
    ($($arg:tt)*) => {
        $crate::Error::BadRequest(format!($($arg)*))
    };
}

/// Builds an [`Error::Forbidden`] with a formatted message.
#[macro_export]
macro_rules! forbidden {
    ($($arg:tt)*) => {
        $crate::Error::Forbidden(format!($($arg)*))
    };
}

/// Builds an [`Error::Internal`] with a formatted message, used for failures
/// that indicate a broken invariant rather than bad input.
#[macro_export]
macro_rules! unexpected {
    ($($arg:tt)*) => {
        $crate::Error::Internal(format!($($arg)*))
    };
}

/// The four top-level interfaces a message may target.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Interface {
    /// The records interface: per-record CRUD and tombstones.
    Records,
    /// The protocols interface: protocol definition configuration and query.
    Protocols,
    /// The messages interface: low-level access to the raw message log.
    Messages,
}

impl Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Records => "Records",
            Self::Protocols => "Protocols",
            Self::Messages => "Messages",
        };
        write!(f, "{s}")
    }
}

/// The method an incoming message invokes, scoped within its [`Interface`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Method {
    /// Create or update a record.
    Write,
    /// Fetch a single record or message by identifier.
    Read,
    /// Query a filtered, paginated set of records or messages.
    Query,
    /// Subscribe to a live stream of matching records or messages.
    Subscribe,
    /// Tombstone a record.
    Delete,
    /// Configure a protocol definition.
    Configure,
}

impl Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Write => "Write",
            Self::Read => "Read",
            Self::Query => "Query",
            Self::Subscribe => "Subscribe",
            Self::Delete => "Delete",
            Self::Configure => "Configure",
        };
        write!(f, "{s}")
    }
}

/// Fields common to every message descriptor.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// The targeted interface.
    pub interface: Interface,
    /// The invoked method.
    pub method: Method,
    /// The time the message was created, used for dominance tie-breaking
    /// and event ordering.
    pub message_timestamp: DateTime<Utc>,
}

/// Either a single value or a list of values; several descriptor fields
/// accept either form on the wire.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    /// A single value.
    One(T),
    /// Multiple values.
    Many(Vec<T>),
}

impl<T: Clone> OneOrMany<T> {
    /// Returns the values as a `Vec`, cloning a single value into a
    /// one-element vector.
    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        match self {
            Self::One(t) => vec![t.clone()],
            Self::Many(ts) => ts.clone(),
        }
    }
}

impl<T: PartialEq> OneOrMany<T> {
    /// Returns whether `value` is contained in this set of values.
    #[must_use]
    pub fn contains(&self, value: &T) -> bool {
        match self {
            Self::One(t) => t == value,
            Self::Many(ts) => ts.contains(value),
        }
    }
}

/// An inclusive/exclusive range used by range filters over dates, sizes, and
/// other orderable index values.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Range<T> {
    /// Inclusive lower bound.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gte: Option<T>,
    /// Exclusive lower bound.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gt: Option<T>,
    /// Inclusive upper bound.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lte: Option<T>,
    /// Exclusive upper bound.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lt: Option<T>,
}

impl<T: PartialOrd> Range<T> {
    /// Returns whether `value` satisfies every bound set on this range.
    #[must_use]
    pub fn contains(&self, value: &T) -> bool {
        if let Some(gte) = &self.gte {
            if value < gte {
                return false;
            }
        }
        if let Some(gt) = &self.gt {
            if value <= gt {
                return false;
            }
        }
        if let Some(lte) = &self.lte {
            if value > lte {
                return false;
            }
        }
        if let Some(lt) = &self.lt {
            if value >= lt {
                return false;
            }
        }
        true
    }
}

/// Pagination state returned alongside a page of query results and accepted
/// back on the next request to continue from where it left off.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    /// CID of the last message returned in the previous page.
    pub message_cid: String,
    /// The value of the sorted-on field for the last message returned,
    /// used to resume a range scan without re-scanning skipped entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// A page of results together with an optional cursor for the next page.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    /// Maximum number of entries to return.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Resume cursor from a previous page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
}
