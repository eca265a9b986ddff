//! Subscription ledger: pending and confirmed rooms.
//!
//! A room is in at most one of the two sets. It becomes pending when a
//! subscribe request goes out and confirmed only when the remote acknowledges
//! that exact room. Both sets are ordered so resubscription order is stable.

use std::collections::BTreeSet;

#[derive(Debug, Default)]
pub(crate) struct SubscriptionLedger {
    pending: BTreeSet<String>,
    confirmed: BTreeSet<String>,
}

/// Outcome of [`SubscriptionLedger::confirm`].
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Confirm {
    Confirmed,
    AlreadyConfirmed,
    NotPending,
}

impl SubscriptionLedger {
    pub(crate) fn contains(&self, room: &str) -> bool {
        self.pending.contains(room) || self.confirmed.contains(room)
    }

    /// Mark a room pending. Returns `false` if it is already known.
    pub(crate) fn begin(&mut self, room: &str) -> bool {
        if self.contains(room) {
            return false;
        }
        self.pending.insert(room.to_string());
        true
    }

    pub(crate) fn confirm(&mut self, room: &str) -> Confirm {
        if self.pending.remove(room) {
            self.confirmed.insert(room.to_string());
            Confirm::Confirmed
        } else if self.confirmed.contains(room) {
            Confirm::AlreadyConfirmed
        } else {
            Confirm::NotPending
        }
    }

    /// Forget a room. Returns `true` if either set held it.
    pub(crate) fn remove(&mut self, room: &str) -> bool {
        let pending = self.pending.remove(room);
        let confirmed = self.confirmed.remove(room);
        pending || confirmed
    }

    /// Empty both sets, returning every room that was known.
    pub(crate) fn drain(&mut self) -> Vec<String> {
        let pending = std::mem::take(&mut self.pending);
        let confirmed = std::mem::take(&mut self.confirmed);
        let all: BTreeSet<String> = pending.into_iter().chain(confirmed).collect();
        all.into_iter().collect()
    }

    pub(crate) fn clear(&mut self) {
        self.pending.clear();
        self.confirmed.clear();
    }

    pub(crate) fn pending(&self) -> Vec<String> {
        self.pending.iter().cloned().collect()
    }

    pub(crate) fn confirmed(&self) -> Vec<String> {
        self.confirmed.iter().cloned().collect()
    }
}
