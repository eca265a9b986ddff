//! Outbound queue for frames sent while no connection is open.

use std::collections::VecDeque;

use crate::transport::{Connection, ReadyState};

#[derive(Debug, Default)]
pub(crate) struct OutboundQueue {
    entries: VecDeque<String>,
}

impl OutboundQueue {
    pub(crate) fn push(&mut self, text: String) {
        self.entries.push_back(text);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    /// Transmit every entry in order through `conn`.
    ///
    /// The queue is emptied only if `conn` is open once all entries have been
    /// attempted; otherwise it is left intact for a later flush. Returns the
    /// number of entries handed to the connection.
    pub(crate) fn flush<C: Connection + ?Sized>(&mut self, conn: &C) -> usize {
        let mut sent = 0;
        for text in &self.entries {
            if conn.send(text.clone()).is_ok() {
                sent += 1;
            }
        }
        if conn.ready_state() == ReadyState::Open {
            self.entries.clear();
        }
        sent
    }
}
