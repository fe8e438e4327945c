//! An in-memory [`EventLog`], independent of the block-backed message store
//! since `store::index` only resolves `Records`/`Protocols` queries.

use std::collections::HashMap;
use std::sync::Mutex;

use dwn_node::event::{Event, SubscribeFilter};
use dwn_node::store::Query;
use dwn_node::{unexpected, Cursor, Result};

/// The tenant's append-only event tail, queryable only by `Query::Messages`
/// — the only variant `MessagesQuery`/`MessagesSubscribe` ever construct.
#[derive(Default)]
pub struct MemoryEventLog {
    events: Mutex<HashMap<String, Vec<Event>>>,
}

impl dwn_node::provider::EventLog for MemoryEventLog {
    async fn append(&self, owner: &str, event: &Event) -> Result<()> {
        self.events.lock().unwrap().entry(owner.to_string()).or_default().push(event.clone());
        Ok(())
    }

    async fn query(&self, owner: &str, query: &Query) -> Result<(Vec<Event>, Cursor)> {
        let Query::Messages(mq) = query else {
            return Err(unexpected!("event log only supports `Query::Messages`"));
        };

        let events = self.events.lock().unwrap();
        let all = events.get(owner).cloned().unwrap_or_default();

        let filter = SubscribeFilter::Messages(mq.filters.clone());
        let matched: Vec<Event> = all.into_iter().filter(|event| filter.is_match(event)).collect();

        let start = match &mq.pagination.cursor {
            Some(cursor) => matched
                .iter()
                .position(|e| e.cid().is_ok_and(|cid| cid == cursor.message_cid))
                .map_or(0, |i| i + 1),
            None => 0,
        };

        let page: Vec<Event> = match mq.pagination.limit {
            Some(limit) => matched.iter().skip(start).take(limit).cloned().collect(),
            None => matched.iter().skip(start).cloned().collect(),
        };

        let cursor = match mq.pagination.limit {
            Some(limit) if start + limit < matched.len() => page
                .last()
                .and_then(|e| e.cid().ok())
                .map(|message_cid| Cursor { message_cid, value: None })
                .unwrap_or_default(),
            _ => Cursor::default(),
        };

        Ok((page, cursor))
    }

    async fn delete(&self, owner: &str, message_cid: &str) -> Result<()> {
        if let Some(events) = self.events.lock().unwrap().get_mut(owner) {
            events.retain(|e| e.cid().map(|cid| cid != message_cid).unwrap_or(true));
        }
        Ok(())
    }

    async fn purge(&self) -> Result<()> {
        self.events.lock().unwrap().clear();
        Ok(())
    }
}
