//! # Messages Interface
//!
//! Low-level access to a tenant's raw message log, independent of the
//! records/protocols record model: [`query`] filters the [`crate::event::EventLog`]
//! by interface/method/protocol/timestamp, [`read`] fetches a single message
//! by CID.

pub mod query;
pub mod read;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use self::query::{Query, QueryDescriptor, QueryReply};
pub use self::read::{Read, ReadDescriptor, ReadReply};
use crate::store::{self, MessagesQuery};
use crate::{Interface, Method};

/// A disjunctive condition over a logged message's interface, method,
/// protocol, and timestamp. An unset field imposes no constraint.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesFilter {
    /// Restricts to messages targeting this interface.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface: Option<Interface>,
    /// Restricts to messages invoking this method.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<Method>,
    /// Restricts to messages declaring this protocol.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    /// Restricts to messages timestamped within this range.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_timestamp: Option<crate::Range<DateTime<Utc>>>,
}

impl MessagesFilter {
    /// Returns an empty filter matching every message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to an interface.
    #[must_use]
    pub const fn interface(mut self, interface: Interface) -> Self {
        self.interface = Some(interface);
        self
    }

    /// Restricts to a method.
    #[must_use]
    pub const fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Restricts to a protocol.
    #[must_use]
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    /// Restricts to a timestamp range.
    #[must_use]
    pub fn message_timestamp(mut self, range: crate::Range<DateTime<Utc>>) -> Self {
        self.message_timestamp = Some(range);
        self
    }
}

impl From<query::Query> for store::Query {
    fn from(query: query::Query) -> Self {
        Self::Messages(MessagesQuery {
            filters: query.descriptor.filters,
            pagination: query.descriptor.cursor.map_or_else(Default::default, |cursor| {
                crate::Pagination { limit: None, cursor: Some(cursor) }
            }),
        })
    }
}
