//! An in-memory [`EventStream`]: each subscription gets its own unbounded
//! channel; `emit` fans a published event out to every still-live
//! subscriber whose filter matches.

use std::collections::HashMap;
use std::sync::Mutex;

use dwn_node::event::{Event, SubscribeFilter, Subscriber};
use dwn_node::provider::EventStream;
use dwn_node::Result;
use tokio::sync::mpsc;

struct Subscription {
    filter: SubscribeFilter,
    sender: mpsc::UnboundedSender<Event>,
}

/// Live subscriptions, grouped by tenant.
#[derive(Default)]
pub struct MemoryEventStream {
    subscriptions: Mutex<HashMap<String, Vec<Subscription>>>,
}

impl EventStream for MemoryEventStream {
    async fn emit(&self, owner: &str, event: &Event) -> Result<()> {
        let mut subscriptions = self.subscriptions.lock().unwrap();
        if let Some(subs) = subscriptions.get_mut(owner) {
            subs.retain(|sub| {
                if sub.filter.is_match(event) {
                    sub.sender.send(event.clone()).is_ok()
                } else {
                    !sub.sender.is_closed()
                }
            });
        }
        Ok(())
    }

    async fn subscribe(&self, owner: &str, filter: SubscribeFilter) -> Result<Subscriber> {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        self.subscriptions
            .lock()
            .unwrap()
            .entry(owner.to_string())
            .or_default()
            .push(Subscription { filter, sender });

        let stream = futures::stream::poll_fn(move |cx| receiver.poll_recv(cx));
        Ok(Subscriber::new(Box::pin(stream)))
    }
}
