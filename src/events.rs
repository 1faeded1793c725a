//! In-process publish/subscribe of ref-update events with keep-alives.
//! Single writer (the Git HTTP receive-pack path), many long-poll/SSE
//! readers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
/// The sentinel value for a branch that doesn't exist yet.
pub const ZERO_REVISION: &str = "0000000000000000000000000000000000000000";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Head,
    Tag,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefChange {
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub before: String,
    pub after: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PushEvent {
    pub repo: String,
    pub changes: Vec<RefChange>,
}

/// Wire envelope for subscriber streams. `initial` is sent once on connect
/// with a branch-name -> revision snapshot; `push` carries a `PushEvent`;
/// `keepalive` is sent every 30s to keep the connection from idling out.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Initial { branches: HashMap<String, String> },
    Push(PushEvent),
    Keepalive,
}

struct Subscriber {
    producer_id: String,
    sender: UnboundedSender<StreamEvent>,
    _keepalive: JoinHandle<()>,
}

/// Process-local fan-out bus. Cheap to clone (`Arc` internally).
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<HashMap<u64, Subscriber>>>,
    next_id: Arc<Mutex<u64>>,
}

pub struct Subscription {
    bus: EventBus,
    id: u64,
    pub receiver: UnboundedReceiver<StreamEvent>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber for `producer_id`, immediately enqueuing an
    /// `initial` snapshot, and start its keep-alive timer. The snapshot's
    /// `master` entry defaults to the zero revision if absent.
    pub fn subscribe(
        &self,
        producer_id: impl Into<String>,
        initial_branches: HashMap<String, String>,
    ) -> Subscription {
        let producer_id = producer_id.into();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut branches = initial_branches;
        branches
            .entry("master".to_string())
            .or_insert_with(|| ZERO_REVISION.to_string());
        let _ = tx.send(StreamEvent::Initial { branches });

        let keepalive_tx = tx.clone();
        let keepalive = tokio::spawn(async move {
            let mut interval = tokio::time::interval(KEEPALIVE_INTERVAL);
            interval.tick().await; // first tick fires immediately; skip it
            loop {
                interval.tick().await;
                if keepalive_tx.send(StreamEvent::Keepalive).is_err() {
                    break;
                }
            }
        });

        let id = {
            let mut next_id = self.next_id.lock();
            let id = *next_id;
            *next_id += 1;
            id
        };

        self.subscribers.lock().insert(
            id,
            Subscriber {
                producer_id,
                sender: tx,
                _keepalive: keepalive,
            },
        );

        Subscription {
            bus: self.clone(),
            id,
            receiver: rx,
        }
    }

    fn unsubscribe(&self, id: u64) {
        if let Some(sub) = self.subscribers.lock().remove(&id) {
            sub._keepalive.abort();
        }
    }

    /// Publish an event to every subscriber whose `producer_id` matches
    /// `event.repo` (directory basename, without `.git`). Subscribers whose
    /// channel has been dropped are pruned silently on the next publish.
    pub fn publish(&self, event: PushEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|_, sub| {
            if sub.producer_id != event.repo {
                return true;
            }
            sub.sender.send(StreamEvent::Push(event.clone())).is_ok()
        });
    }

    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_sends_initial_snapshot_with_master_default() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe("r", HashMap::new());
        let first = sub.receiver.recv().await.unwrap();
        match first {
            StreamEvent::Initial { branches } => {
                assert_eq!(branches.get("master").unwrap(), ZERO_REVISION);
            }
            other => panic!("expected Initial, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn publish_reaches_matching_subscriber_only() {
        let bus = EventBus::new();
        let mut sub_r = bus.subscribe("r", HashMap::new());
        let mut sub_other = bus.subscribe("other", HashMap::new());
        sub_r.receiver.recv().await.unwrap(); // drain initial
        sub_other.receiver.recv().await.unwrap();

        bus.publish(PushEvent {
            repo: "r".to_string(),
            changes: vec![RefChange {
                change_type: ChangeType::Head,
                ref_name: "dev".to_string(),
                before: "a".repeat(40),
                after: "b".repeat(40),
            }],
        });

        let got = sub_r.receiver.recv().await.unwrap();
        assert!(matches!(got, StreamEvent::Push(_)));
        assert!(sub_other.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropping_subscription_deregisters_it() {
        let bus = EventBus::new();
        let sub = bus.subscribe("r", HashMap::new());
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
