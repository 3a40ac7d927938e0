//! Endpoint identity assigned by the rendezvous relay.

use log::info;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::RwLock;

/// Opaque addressing token for one endpoint, assigned by the relay when the
/// connection is established and valid only for that connection's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(String);

impl EndpointId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EndpointId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Holds the identity for the current relay connection.
///
/// The relay sends exactly one identity assignment per connection. The slot
/// is cleared when the connection drops and refilled on the next one.
#[derive(Default)]
pub struct IdentitySlot {
    id: RwLock<Option<EndpointId>>,
}

impl IdentitySlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&self, id: EndpointId) {
        info!("Registered with relay as {id}");
        *self.id.write().expect("RwLock should not be poisoned") = Some(id);
    }

    pub fn get(&self) -> Option<EndpointId> {
        self.id
            .read()
            .expect("RwLock should not be poisoned")
            .clone()
    }

    pub fn is_registered(&self) -> bool {
        self.id
            .read()
            .expect("RwLock should not be poisoned")
            .is_some()
    }

    pub fn clear(&self) {
        *self.id.write().expect("RwLock should not be poisoned") = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_lifecycle() {
        let slot = IdentitySlot::new();
        assert!(!slot.is_registered());
        assert_eq!(slot.get(), None);

        slot.assign(EndpointId::from("abc123"));
        assert!(slot.is_registered());
        assert_eq!(slot.get(), Some(EndpointId::from("abc123")));

        slot.clear();
        assert!(!slot.is_registered());
    }

    #[test]
    fn test_reassignment_replaces() {
        let slot = IdentitySlot::new();
        slot.assign(EndpointId::from("first"));
        slot.assign(EndpointId::from("second"));
        assert_eq!(slot.get().unwrap().as_str(), "second");
    }
}
