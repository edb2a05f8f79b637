use std::sync::{Arc, Mutex, PoisonError};

use crate::models::{Announcement, ChatMessage, InboundEvent, PresenceUpdate};

pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Message,
    Presence,
    Announcement,
}

/// Returned by every listener registration; hand it back to remove exactly
/// that listener.
#[derive(Debug, PartialEq, Eq, Hash)]
#[must_use = "dropping the handle makes the listener impossible to remove"]
pub struct ListenerHandle {
    kind: EventKind,
    id: u64,
}

impl ListenerHandle {
    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

struct Registry<T> {
    slots: Vec<(u64, Callback<T>)>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self { slots: Vec::new() }
    }
}

impl<T> Registry<T> {
    fn add(&mut self, id: u64, callback: Callback<T>) {
        self.slots.push((id, callback));
    }

    fn remove(&mut self, id: u64) -> bool {
        let before = self.slots.len();
        self.slots.retain(|(slot, _)| *slot != id);
        self.slots.len() != before
    }

    fn snapshot(&self) -> Vec<Callback<T>> {
        self.slots.iter().map(|(_, cb)| Arc::clone(cb)).collect()
    }
}

/// Listeners per inbound event kind, invoked in registration order.
#[derive(Default)]
pub struct Listeners {
    next_id: u64,
    messages: Registry<ChatMessage>,
    presence: Registry<PresenceUpdate>,
    announcements: Registry<Announcement>,
}

impl Listeners {
    fn handle(&mut self, kind: EventKind) -> ListenerHandle {
        self.next_id += 1;
        ListenerHandle { kind, id: self.next_id }
    }

    pub fn on_message(&mut self, callback: Callback<ChatMessage>) -> ListenerHandle {
        let handle = self.handle(EventKind::Message);
        self.messages.add(handle.id, callback);
        handle
    }

    pub fn on_presence(&mut self, callback: Callback<PresenceUpdate>) -> ListenerHandle {
        let handle = self.handle(EventKind::Presence);
        self.presence.add(handle.id, callback);
        handle
    }

    pub fn on_announcement(&mut self, callback: Callback<Announcement>) -> ListenerHandle {
        let handle = self.handle(EventKind::Announcement);
        self.announcements.add(handle.id, callback);
        handle
    }

    pub fn remove(&mut self, handle: ListenerHandle) -> bool {
        match handle.kind {
            EventKind::Message => self.messages.remove(handle.id),
            EventKind::Presence => self.presence.remove(handle.id),
            EventKind::Announcement => self.announcements.remove(handle.id),
        }
    }

    pub fn len(&self, kind: EventKind) -> usize {
        match kind {
            EventKind::Message => self.messages.slots.len(),
            EventKind::Presence => self.presence.slots.len(),
            EventKind::Announcement => self.announcements.slots.len(),
        }
    }
}

/// Invoke every listener for `event` and return how many ran.
///
/// The lock is released before any callback runs, so callbacks may register
/// or remove listeners themselves.
pub fn dispatch(listeners: &Mutex<Listeners>, event: &InboundEvent) -> usize {
    fn run<T>(callbacks: Vec<Callback<T>>, payload: &T) -> usize {
        for cb in &callbacks {
            cb(payload);
        }
        callbacks.len()
    }

    let guard = listeners.lock().unwrap_or_else(PoisonError::into_inner);
    match event {
        InboundEvent::ChatMessage(m) => {
            let callbacks = guard.messages.snapshot();
            drop(guard);
            run(callbacks, m)
        }
        InboundEvent::PresenceUpdate(p) => {
            let callbacks = guard.presence.snapshot();
            drop(guard);
            run(callbacks, p)
        }
        InboundEvent::Announcement(a) => {
            let callbacks = guard.announcements.snapshot();
            drop(guard);
            run(callbacks, a)
        }
    }
}
