//! Event dispatch table.

use std::collections::HashMap;

use crate::types::{Event, EventKind};

/// A registered event handler. Runs on the session task; keep it short.
pub type Handler = Box<dyn FnMut(&Event) + Send>;

/// Event kind to ordered handler list. Append-only.
#[derive(Default)]
pub(crate) struct Dispatcher {
    handlers: HashMap<EventKind, Vec<Handler>>,
}

impl Dispatcher {
    pub(crate) fn on(&mut self, kind: EventKind, handler: Handler) {
        self.handlers.entry(kind).or_default().push(handler);
    }

    /// Invoke every handler for `kind` in registration order. Returns how many ran.
    pub(crate) fn emit(&mut self, kind: &EventKind, event: &Event) -> usize {
        let Some(handlers) = self.handlers.get_mut(kind) else {
            return 0;
        };
        for handler in handlers.iter_mut() {
            handler(event);
        }
        handlers.len()
    }

    pub(crate) fn clear(&mut self) {
        self.handlers.clear();
    }
}
