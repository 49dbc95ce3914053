//! Reference-counted sharing of wire subscriptions.
//!
//! Logical subscribers asking for the same `(path, input)` pair share one
//! wire subscription.  The first subscriber opens it, the last one to
//! leave closes it, and every message fans out to all current listeners.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;

use crate::duplex::{DuplexClient, SubscriptionCallback, Unsubscribe};
use crate::error::CallError;

struct Group {
    listeners: BTreeMap<u64, SubscriptionCallback>,
    wire: Option<Unsubscribe>,
}

type Groups = Arc<Mutex<HashMap<String, Group>>>;

#[derive(Clone)]
pub struct SharedSubscriptions {
    client: DuplexClient,
    groups: Groups,
    next_listener: Arc<AtomicU64>,
}

impl SharedSubscriptions {
    pub fn new(client: DuplexClient) -> Self {
        Self {
            client,
            groups: Arc::default(),
            next_listener: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn client(&self) -> &DuplexClient {
        &self.client
    }

    /// Number of distinct wire subscriptions currently shared.
    pub fn len(&self) -> usize {
        self.groups.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add a listener for `(path, input)`, opening the wire subscription if
    /// this is the first one.
    pub fn subscribe(
        &self,
        path: &str,
        input: Option<Value>,
        listener: SubscriptionCallback,
    ) -> Unsubscribe {
        let key = group_key(path, input.as_ref());
        let listener_id = self.next_listener.fetch_add(1, Ordering::Relaxed);

        {
            let mut groups = self.groups.lock();
            let group = groups.entry(key.clone()).or_insert_with(|| Group {
                listeners: BTreeMap::new(),
                wire: None,
            });
            group.listeners.insert(listener_id, listener);

            if group.wire.is_none() {
                tracing::debug!(path, "opening shared subscription");
                let fan_out = fan_out(Arc::downgrade(&self.groups), key.clone());
                group.wire = Some(self.client.subscribe(path, input, fan_out));
            } else {
                tracing::debug!(path, listeners = group.listeners.len(), "joined shared subscription");
            }
        }

        let groups = self.groups.clone();
        Box::new(move || leave(&groups, &key, listener_id))
    }
}

fn group_key(path: &str, input: Option<&Value>) -> String {
    match input {
        Some(input) => format!("{path}\0{input}"),
        None => format!("{path}\0"),
    }
}

/// Remove one listener; the last one out closes the wire subscription.
fn leave(groups: &Groups, key: &str, listener_id: u64) {
    let wire = {
        let mut groups = groups.lock();
        let Some(group) = groups.get_mut(key) else {
            return;
        };
        if group.listeners.remove(&listener_id).is_none() || !group.listeners.is_empty() {
            return;
        }
        groups.remove(key).and_then(|g| g.wire)
    };
    if let Some(unsubscribe) = wire {
        unsubscribe();
    }
}

/// Wire callback delivering each message to a snapshot of the listeners.
/// An error ends the group: the engine already dropped its wire entry.
fn fan_out(groups: Weak<Mutex<HashMap<String, Group>>>, key: String) -> SubscriptionCallback {
    Arc::new(move |msg: Result<Value, CallError>| {
        let Some(groups) = groups.upgrade() else {
            return;
        };
        let listeners: Vec<SubscriptionCallback> = {
            let mut groups = groups.lock();
            if msg.is_err() {
                match groups.remove(&key) {
                    Some(group) => group.listeners.into_values().collect(),
                    None => return,
                }
            } else {
                match groups.get(&key) {
                    Some(group) => group.listeners.values().cloned().collect(),
                    None => return,
                }
            }
        };
        for listener in listeners {
            listener(msg.clone());
        }
    })
}
