//! Live event fan-out: the type subscribers receive, the filter they
//! subscribe with, and the predicates that decide whether a given entry
//! matches a given filter.

use std::fmt;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::messages::MessagesFilter;
use crate::records::{RecordsFilter, TagFilter};
use crate::store::{Entry, EntryType};
use crate::{OneOrMany, Range};

/// An entry broadcast to subscribers: the same unit the message store
/// persists.
pub type Event = Entry;

/// The kind of message an [`Event`] carries.
pub type EventType = EntryType;

/// A subscription's match criteria: either a set of raw message-log filters
/// or a single records filter.
#[derive(Debug, Deserialize, Serialize)]
#[allow(missing_docs)]
pub enum SubscribeFilter {
    Messages(Vec<MessagesFilter>),
    Records(RecordsFilter),
}

impl Default for SubscribeFilter {
    fn default() -> Self {
        Self::Messages(Vec::new())
    }
}

impl SubscribeFilter {
    /// Returns whether `event` satisfies this subscription's criteria.
    #[must_use]
    pub fn is_match(&self, event: &Event) -> bool {
        match self {
            Self::Messages(filters) => filters.iter().any(|filter| filter.is_match(event)),
            Self::Records(filter) => {
                !matches!(event.message, EventType::Configure(_)) && filter.is_match(event)
            }
        }
    }
}

/// A live stream of [`Event`]s handed back to the caller of a subscribe
/// operation. Wraps whatever stream type the `Provider`'s `EventStream`
/// implementation produces.
pub struct Subscriber(BoxStream<'static, Event>);

impl Subscriber {
    /// Wraps a provider's subscription stream.
    #[must_use]
    pub fn new(stream: BoxStream<'static, Event>) -> Self {
        Self(stream)
    }
}

impl Default for Subscriber {
    fn default() -> Self {
        Self(Box::pin(futures::stream::empty()))
    }
}

impl Clone for Subscriber {
    fn clone(&self) -> Self {
        Self::default()
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber").finish_non_exhaustive()
    }
}

impl Stream for Subscriber {
    type Item = Event;

    fn poll_next(mut self: std::pin::Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.0.as_mut().poll_next(cx)
    }
}

/// Returns true when `filter` is unset, or when it is set and equals
/// `actual`.
fn accepts<T: PartialEq>(filter: &Option<T>, actual: &T) -> bool {
    filter.as_ref().is_none_or(|want| want == actual)
}

/// Returns true when `filter` is unset, or when it is set and `actual`
/// (itself optional on the message side) equals it.
fn accepts_opt<T: PartialEq>(filter: &Option<T>, actual: Option<&T>) -> bool {
    filter.as_ref().is_none_or(|want| actual == Some(want))
}

/// Returns true when `filter` is unset, or when it is set and contains
/// `actual`.
fn accepts_any<T: PartialEq>(filter: &Option<OneOrMany<T>>, actual: &T) -> bool {
    filter.as_ref().is_none_or(|want| want.contains(actual))
}

/// Returns true when `filter` is unset, or when it is set, `actual` is
/// present, and `actual` is contained in it.
fn accepts_any_opt<T: PartialEq>(filter: &Option<OneOrMany<T>>, actual: Option<&T>) -> bool {
    match filter {
        None => true,
        Some(want) => actual.is_some_and(|value| want.contains(value)),
    }
}

/// Returns true when `filter` is unset, or when it is set and `actual`
/// falls within it.
fn accepts_range<T: PartialOrd>(filter: &Option<Range<T>>, actual: &T) -> bool {
    filter.as_ref().is_none_or(|want| want.contains(actual))
}

impl RecordsFilter {
    fn is_match(&self, event: &Entry) -> bool {
        let EventType::Write(write) = &event.message else {
            return false;
        };
        let descriptor = &write.descriptor;
        let author = write.authorization.author().unwrap_or_default();

        accepts_any(&self.author, &author)
            && accepts_opt(&self.attester, event.indexes.get("attester"))
            && accepts_any_opt(&self.recipient, descriptor.recipient.as_ref())
            && accepts_opt(&self.protocol, descriptor.protocol.as_ref())
            && accepts_opt(&self.protocol_path, descriptor.protocol_path.as_ref())
            && accepts_opt(&self.published, descriptor.published.as_ref())
            && accepts_opt(&self.context_id, write.context_id.as_ref())
            && accepts_opt(&self.schema, descriptor.schema.as_ref())
            && accepts(&self.record_id, &write.record_id)
            && accepts_opt(&self.parent_id, descriptor.parent_id.as_ref())
            && matches_tags(self.tags.as_ref(), descriptor.tags.as_ref())
            && accepts(&self.data_format, &descriptor.data_format)
            && accepts_range(&self.data_size, &descriptor.data_size)
            && accepts(&self.data_cid, &descriptor.data_cid)
            && accepts_range(&self.date_created, &descriptor.date_created)
            && accepts_range(&self.date_published, &descriptor.date_published.unwrap_or_default())
            && matches_date_updated(self.date_updated.as_ref(), &event.indexes)
    }
}

fn matches_tags(
    filter: Option<&std::collections::BTreeMap<String, TagFilter>>, tags: Option<&Map<String, Value>>,
) -> bool {
    let Some(filter) = filter else {
        return true;
    };
    filter.iter().all(|(property, rule)| {
        let value = tags.and_then(|tags| tags.get(property)).unwrap_or(&Value::Null);
        rule.is_match(value)
    })
}

fn matches_date_updated(
    filter: Option<&Range<DateTime<Utc>>>, indexes: &std::collections::HashMap<String, String>,
) -> bool {
    let Some(filter) = filter else {
        return true;
    };
    let Some(updated) = indexes.get("dateUpdated") else {
        return false;
    };
    let Ok(updated) = updated.parse::<DateTime<Utc>>() else {
        return false;
    };
    filter.contains(&updated)
}

impl TagFilter {
    fn is_match(&self, tag: &Value) -> bool {
        match self {
            Self::StartsWith(prefix) => tag.as_str().unwrap_or_default().starts_with(prefix.as_str()),
            Self::Range(range) => range.contains(&tag.as_f64().unwrap_or_default()),
            Self::Equal(expected) => tag == expected,
        }
    }
}

impl MessagesFilter {
    fn is_match(&self, event: &Entry) -> bool {
        let descriptor = event.descriptor();

        if !accepts(&self.interface, &descriptor.interface) || !accepts(&self.method, &descriptor.method) {
            return false;
        }

        let protocol_matches = match (&self.protocol, &event.message) {
            (None, _) => true,
            (Some(_), EventType::Delete(_)) => false,
            (Some(protocol), EventType::Write(write)) => Some(protocol) == write.descriptor.protocol.as_ref(),
            (Some(protocol), EventType::Configure(configure)) => {
                protocol == &configure.descriptor.definition.protocol
            }
        };

        protocol_matches && accepts_range(&self.message_timestamp, &descriptor.message_timestamp)
    }
}
