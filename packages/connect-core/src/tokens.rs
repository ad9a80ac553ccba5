//! Connect tokens: the session bundle handed off by the controller over the
//! discovery endpoint (§6.3) and consumed by the WebSocket session.

use serde::{Deserialize, Serialize};

use crate::protocol_constants::WS_TOKEN_EXPIRY_BUFFER_SECS;
use crate::utils::now_millis;

/// A signed JWT plus its expiry, in Unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiringToken {
    pub jwt: String,
    pub exp: i64,
}

impl ExpiringToken {
    /// Returns true once this token is within the expiry buffer of `exp`.
    #[must_use]
    pub fn is_expired(&self, now_s: i64) -> bool {
        now_s + WS_TOKEN_EXPIRY_BUFFER_SECS as i64 >= self.exp
    }
}

/// The `ws_token` half of a handoff: a JWT, its expiry, and the WebSocket
/// endpoint to dial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WsToken {
    pub jwt: String,
    pub exp: i64,
    pub endpoint: String,
}

impl WsToken {
    #[must_use]
    pub fn is_expired(&self, now_s: i64) -> bool {
        now_s + WS_TOKEN_EXPIRY_BUFFER_SECS as i64 >= self.exp
    }
}

/// Everything delivered by one controller handoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectTokens {
    pub session_id: String,
    pub ws_token: WsToken,
    pub api_token: ExpiringToken,
}

impl ConnectTokens {
    /// A bundle is usable iff none of its required string fields are empty.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.session_id.is_empty()
            && !self.ws_token.jwt.is_empty()
            && !self.ws_token.endpoint.is_empty()
            && self.ws_token.exp > 0
    }
}

/// Thread-safe holder for the most recent token handoff. A later POST to the
/// discovery endpoint replaces the stored bundle wholesale (§4.9).
#[derive(Debug, Default)]
pub struct TokenStore {
    current: parking_lot::RwLock<Option<ConnectTokens>>,
}

impl TokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, tokens: ConnectTokens) {
        *self.current.write() = Some(tokens);
    }

    #[must_use]
    pub fn get(&self) -> Option<ConnectTokens> {
        self.current.read().clone()
    }

    pub fn clear(&self) {
        *self.current.write() = None;
    }
}

/// Returns the current Unix time in whole seconds.
#[must_use]
pub fn now_secs() -> i64 {
    (now_millis() / 1000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tokens() -> ConnectTokens {
        ConnectTokens {
            session_id: "11111111-2222-3333-4444-555555555555".into(),
            ws_token: WsToken {
                jwt: "J".into(),
                exp: 9_999_999_999,
                endpoint: "wss://host/ws".into(),
            },
            api_token: ExpiringToken {
                jwt: "A".into(),
                exp: 9_999_999_999,
            },
        }
    }

    #[test]
    fn valid_bundle_requires_all_fields_nonempty() {
        assert!(sample_tokens().is_valid());

        let mut missing_session = sample_tokens();
        missing_session.session_id.clear();
        assert!(!missing_session.is_valid());

        let mut missing_endpoint = sample_tokens();
        missing_endpoint.ws_token.endpoint.clear();
        assert!(!missing_endpoint.is_valid());
    }

    #[test]
    fn ws_token_expired_within_buffer() {
        let token = WsToken {
            jwt: "J".into(),
            exp: 1000,
            endpoint: "wss://host/ws".into(),
        };
        assert!(token.is_expired(941));
        assert!(!token.is_expired(939));
    }

    #[test]
    fn store_replaces_previous_bundle_wholesale() {
        let store = TokenStore::new();
        assert!(store.get().is_none());

        store.set(sample_tokens());
        assert_eq!(store.get().unwrap().session_id, sample_tokens().session_id);

        let mut replacement = sample_tokens();
        replacement.session_id = "99999999-2222-3333-4444-555555555555".into();
        store.set(replacement.clone());
        assert_eq!(store.get().unwrap(), replacement);
    }
}
