//! Per-connection subscription table.
//!
//! A subscription is registered in two steps because its teardown only
//! exists once the resolver has started: [`SubscriptionTable::reserve`]
//! claims the id when the SUBSCRIBE frame is read, and
//! [`SubscriptionTable::activate`] stores the teardown when the start
//! completes.  An UNSUBSCRIBE or a connection close that lands between
//! the two cancels the reservation, and the teardown is run as soon as it
//! arrives.
//!
//! Every entry is removed under the table lock and its teardown is run
//! outside of it, so each teardown runs exactly once no matter which of
//! UNSUBSCRIBE, re-SUBSCRIBE or close gets there first.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::procedure::Teardown;

enum Slot {
    Starting {
        generation: u64,
        cancel: CancellationToken,
    },
    Live {
        cancel: CancellationToken,
        teardown: Teardown,
    },
}

impl Slot {
    /// Stop emissions now; hand back the teardown (if any) for the caller
    /// to run once the lock is released.
    fn retire(self) -> Option<Teardown> {
        match self {
            Slot::Starting { cancel, .. } => {
                cancel.cancel();
                None
            }
            Slot::Live { cancel, teardown } => {
                cancel.cancel();
                Some(teardown)
            }
        }
    }
}

#[derive(Default)]
struct Inner {
    slots: HashMap<u32, Slot>,
    next_generation: u64,
    closed: bool,
}

#[derive(Default)]
pub struct SubscriptionTable {
    inner: Mutex<Inner>,
}

/// Claim on a subscription id handed out by [`SubscriptionTable::reserve`].
pub struct Reservation {
    pub id: u32,
    pub generation: u64,
    /// Cancelled when the subscription is retired.
    pub cancel: CancellationToken,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `id` for a subscription that is about to start.  A live
    /// subscription already using the id is retired first.  Returns
    /// `None` once the table is closed.
    pub fn reserve(&self, id: u32) -> Option<Reservation> {
        let cancel = CancellationToken::new();
        let (previous, generation) = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return None;
            }
            inner.next_generation += 1;
            let generation = inner.next_generation;
            let previous = inner.slots.insert(
                id,
                Slot::Starting {
                    generation,
                    cancel: cancel.clone(),
                },
            );
            (previous, generation)
        };

        if let Some(teardown) = previous.and_then(Slot::retire) {
            tracing::debug!(id, "subscription id reused, retiring previous stream");
            teardown();
        }
        Some(Reservation {
            id,
            generation,
            cancel,
        })
    }

    /// Store the teardown of a started subscription.  If the reservation
    /// was cancelled in the meantime the teardown runs immediately and
    /// `false` is returned.
    pub fn activate(&self, reservation: Reservation, teardown: Teardown) -> bool {
        let mut inner = self.inner.lock();
        let current = matches!(
            inner.slots.get(&reservation.id),
            Some(Slot::Starting { generation, .. }) if *generation == reservation.generation
        );
        if current {
            inner.slots.insert(
                reservation.id,
                Slot::Live {
                    cancel: reservation.cancel,
                    teardown,
                },
            );
            return true;
        }
        drop(inner);

        reservation.cancel.cancel();
        teardown();
        false
    }

    /// Drop a reservation whose start failed.
    pub fn abandon(&self, reservation: &Reservation) {
        let mut inner = self.inner.lock();
        let current = matches!(
            inner.slots.get(&reservation.id),
            Some(Slot::Starting { generation, .. }) if *generation == reservation.generation
        );
        if current {
            inner.slots.remove(&reservation.id);
        }
        reservation.cancel.cancel();
    }

    /// Tear down the subscription under `id`.  Unknown ids are a no-op;
    /// returns whether anything was removed.
    pub fn unsubscribe(&self, id: u32) -> bool {
        let removed = self.inner.lock().slots.remove(&id);
        match removed {
            Some(slot) => {
                if let Some(teardown) = slot.retire() {
                    teardown();
                }
                true
            }
            None => false,
        }
    }

    /// Tear down everything and refuse new reservations.  Returns the
    /// number of subscriptions retired.
    pub fn close_all(&self) -> usize {
        let drained: Vec<Slot> = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.slots.drain().map(|(_, slot)| slot).collect()
        };
        let count = drained.len();
        for teardown in drained.into_iter().filter_map(Slot::retire) {
            teardown();
        }
        count
    }

    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
