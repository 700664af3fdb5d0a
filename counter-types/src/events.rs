//! Events exchanged over the client transport.
//!
//! Each WebSocket text frame carries exactly one JSON-encoded event. Event
//! names follow the browser client (`increment`, `updateCounter`, ...), so the
//! JSON stays readable from the developer console.

use serde::{Deserialize, Serialize};

use crate::WireError;

/// Events a client sends to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Add one to the counter (and count one visit)
    Increment,
    /// Subtract one from the counter
    Decrement,
    /// Graceful leave
    Disconnect,
}

impl ClientEvent {
    /// Decode an event from a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self, WireError> {
        serde_json::from_str(text).map_err(WireError::Deserialization)
    }

    /// Encode the event as a JSON text frame.
    pub fn to_json(&self) -> Result<String, WireError> {
        serde_json::to_string(self).map_err(WireError::Serialization)
    }

    /// Whether this event mutates the counter.
    pub fn is_mutation(&self) -> bool {
        matches!(self, Self::Increment | Self::Decrement)
    }
}

/// Events the server pushes to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Current counter value
    UpdateCounter(i64),
    /// Current cumulative visitor total
    UpdateTotalVisitors(u64),
}

impl ServerEvent {
    /// Encode the event as a JSON text frame.
    pub fn to_json(&self) -> Result<String, WireError> {
        serde_json::to_string(self).map_err(WireError::Serialization)
    }

    /// Decode an event from a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self, WireError> {
        serde_json::from_str(text).map_err(WireError::Deserialization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_events_use_browser_names() {
        assert_eq!(
            ClientEvent::Increment.to_json().unwrap(),
            r#"{"event":"increment"}"#
        );
        assert_eq!(
            ClientEvent::from_json(r#"{"event":"decrement"}"#).unwrap(),
            ClientEvent::Decrement
        );
        assert_eq!(
            ClientEvent::from_json(r#"{"event":"disconnect"}"#).unwrap(),
            ClientEvent::Disconnect
        );
    }

    #[test]
    fn server_events_carry_data_field() {
        assert_eq!(
            ServerEvent::UpdateCounter(-3).to_json().unwrap(),
            r#"{"event":"updateCounter","data":-3}"#
        );
        assert_eq!(
            ServerEvent::UpdateTotalVisitors(12).to_json().unwrap(),
            r#"{"event":"updateTotalVisitors","data":12}"#
        );
    }

    #[test]
    fn unknown_event_is_rejected() {
        assert!(ClientEvent::from_json(r#"{"event":"reset"}"#).is_err());
        assert!(ClientEvent::from_json("increment").is_err());
    }

    #[test]
    fn only_increment_and_decrement_mutate() {
        assert!(ClientEvent::Increment.is_mutation());
        assert!(ClientEvent::Decrement.is_mutation());
        assert!(!ClientEvent::Disconnect.is_mutation());
    }

    #[test]
    fn negative_visitor_total_is_rejected() {
        assert!(ServerEvent::from_json(r#"{"event":"updateTotalVisitors","data":-1}"#).is_err());
    }
}
