//! Typed event bus surfaced to the embedding application.

use crate::call::EndReason;
use crate::identity::EndpointId;
use serde::Serialize;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Serialize)]
pub struct Registered {
    pub identity: EndpointId,
}

#[derive(Debug, Clone, Serialize)]
pub struct IncomingCall {
    pub from: EndpointId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutgoingCall {
    pub to: EndpointId,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallConnected {
    pub remote: EndpointId,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoteMediaReady {
    pub remote: EndpointId,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallEnded {
    pub remote: EndpointId,
    pub reason: EndReason,
}

/// A pending invitation went away without being accepted locally: the
/// caller cancelled, it was superseded, or it timed out.
#[derive(Debug, Clone, Serialize)]
pub struct InvitationCancelled {
    pub from: EndpointId,
}

#[derive(Debug, Clone, Serialize)]
pub enum Event {
    Registered(Registered),
    IncomingCall(IncomingCall),
    OutgoingCall(OutgoingCall),
    CallConnected(CallConnected),
    RemoteMediaReady(RemoteMediaReady),
    CallEnded(CallEnded),
    InvitationCancelled(InvitationCancelled),
    RelayDisconnected,
}

pub trait EventHandler: Send + Sync {
    fn handle_event(&self, event: &Event);
}

#[derive(Default, Clone)]
pub struct EventBus {
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&self, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .expect("RwLock should not be poisoned")
            .push(handler);
    }

    /// Returns true if there are any event handlers registered.
    pub fn has_handlers(&self) -> bool {
        !self
            .handlers
            .read()
            .expect("RwLock should not be poisoned")
            .is_empty()
    }

    pub fn dispatch(&self, event: &Event) {
        for handler in self
            .handlers
            .read()
            .expect("RwLock should not be poisoned")
            .iter()
        {
            handler.handle_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl EventHandler for Recorder {
        fn handle_event(&self, event: &Event) {
            self.seen
                .lock()
                .unwrap()
                .push(format!("{event:?}").split('(').next().unwrap().to_string());
        }
    }

    #[test]
    fn test_all_handlers_fire() {
        let bus = EventBus::new();
        let a = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        let b = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        bus.add_handler(a.clone());
        bus.add_handler(b.clone());

        bus.dispatch(&Event::RelayDisconnected);

        assert_eq!(a.seen.lock().unwrap().len(), 1);
        assert_eq!(b.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_has_handlers() {
        let bus = EventBus::new();
        assert!(!bus.has_handlers());
        bus.add_handler(Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        }));
        assert!(bus.has_handlers());
    }
}
