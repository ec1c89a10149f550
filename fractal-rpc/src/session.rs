//! Client-facing session identity. The at-most-one-in-flight-operation
//! rule (section 4.6) is enforced against a session, not against the
//! object a session's operation happens to target: two sessions hitting
//! the same object must not block each other, and one session must not
//! run two operations concurrently no matter which objects they name.
//! The bookkeeping itself lives on [`crate::registry::ObjectRegistry`]
//! (`add_session`/`remove_session`/`get_subscription`); this module only
//! defines the identity the gRPC and WebSocket transports mint one of
//! per logical client.

use std::fmt;

use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Decodes the 16 raw bytes a wire message carries a session id as.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Uuid::from_slice(bytes).ok().map(Self)
    }

    pub fn to_bytes(self) -> [u8; 16] {
        *self.0.as_bytes()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let id = SessionId::new_random();
        assert_eq!(SessionId::from_bytes(&id.to_bytes()), Some(id));
    }

    #[test]
    fn rejects_malformed_bytes() {
        assert_eq!(SessionId::from_bytes(&[0u8; 4]), None);
    }
}
