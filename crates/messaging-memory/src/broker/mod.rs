use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use courier_messaging::Message;
use courier_messaging::subject::subject_matches;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use crate::subscription::MemorySubscription;
use crate::transport::MemoryTransport;

#[derive(Debug)]
struct SubscriptionEntry {
    connection_id: u64,
    pattern: String,
    queue_group: Option<String>,
    sender: mpsc::UnboundedSender<Message>,
}

#[derive(Debug, Default)]
struct BrokerState {
    next_connection_id: u64,
    next_subscription_id: u64,
    subscriptions: BTreeMap<u64, SubscriptionEntry>,
}

/// An in-process message broker shared by any number of connections.
///
/// Routing mirrors a NATS server: plain subscribers all receive a message, queue group
/// members share it so exactly one member of each group receives it.
#[derive(Clone, Debug, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    /// Creates an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new connection to the broker.
    #[must_use]
    pub fn connect(&self) -> MemoryTransport {
        let connection_id = {
            let mut state = self.state.lock();
            state.next_connection_id += 1;
            state.next_connection_id
        };

        MemoryTransport::new(self.clone(), connection_id)
    }

    /// Lists `(subject, queue group)` for every live subscription.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<(String, Option<String>)> {
        let mut state = self.state.lock();
        state
            .subscriptions
            .retain(|_, entry| !entry.sender.is_closed());
        state
            .subscriptions
            .values()
            .map(|entry| (entry.pattern.clone(), entry.queue_group.clone()))
            .collect()
    }

    pub(crate) fn subscribe(
        &self,
        connection_id: u64,
        pattern: &str,
        queue_group: Option<&str>,
    ) -> MemorySubscription {
        let (sender, receiver) = mpsc::unbounded_channel();

        let id = {
            let mut state = self.state.lock();
            state.next_subscription_id += 1;
            let id = state.next_subscription_id;
            state.subscriptions.insert(
                id,
                SubscriptionEntry {
                    connection_id,
                    pattern: pattern.to_string(),
                    queue_group: queue_group.map(ToString::to_string),
                    sender,
                },
            );
            id
        };

        trace!(id, pattern, ?queue_group, "subscribed");

        MemorySubscription::new(id, pattern.to_string(), receiver, self.clone())
    }

    pub(crate) fn unsubscribe(&self, id: u64) {
        if self.state.lock().subscriptions.remove(&id).is_some() {
            trace!(id, "unsubscribed");
        }
    }

    pub(crate) fn disconnect(&self, connection_id: u64) {
        self.state
            .lock()
            .subscriptions
            .retain(|_, entry| entry.connection_id != connection_id);
    }

    /// Routes a message and returns how many subscriptions received it.
    pub(crate) fn route(&self, message: &Message) -> usize {
        let mut state = self.state.lock();
        state
            .subscriptions
            .retain(|_, entry| !entry.sender.is_closed());

        let mut delivered = 0;
        let mut groups: HashMap<&str, Vec<&SubscriptionEntry>> = HashMap::new();

        for entry in state.subscriptions.values() {
            if !subject_matches(&entry.pattern, &message.subject) {
                continue;
            }
            match &entry.queue_group {
                Some(group) => groups.entry(group.as_str()).or_default().push(entry),
                None => {
                    if entry.sender.send(message.clone()).is_ok() {
                        delivered += 1;
                    }
                }
            }
        }

        for members in groups.values() {
            let chosen = members[fastrand::usize(..members.len())];
            if chosen.sender.send(message.clone()).is_ok() {
                delivered += 1;
            }
        }

        trace!(subject = %message.subject, delivered, "routed");

        delivered
    }
}
