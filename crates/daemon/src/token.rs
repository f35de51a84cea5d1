// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Decoded JWT claims and the permission/expiration checks the websocket
//! handler runs against them (spec.md §4.G).
//!
//! Verifying the JWT signature itself (and fetching the signing key from
//! the panel) is out of scope here: [`TokenVerifier`] is the seam a caller
//! plugs a real verifier into, the same way [`wings_runtime::ContainerRuntime`]
//! separates orchestration from the Docker API.

use std::collections::HashSet;
use wings_core::ServerId;

/// Claims already decoded from a JWT's payload. Construction (signature
/// verification, base64url decode) happens on the other side of
/// [`TokenVerifier`].
#[derive(Debug, Clone)]
pub struct TokenPayload {
    pub server_id: ServerId,
    pub permissions: HashSet<String>,
    /// Unix seconds.
    pub expires_at: u64,
}

impl TokenPayload {
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains("*") || self.permissions.contains(permission)
    }

    /// `None` once the token has already expired.
    pub fn seconds_remaining(&self, now_epoch_secs: u64) -> Option<u64> {
        self.expires_at.checked_sub(now_epoch_secs)
    }

    pub fn is_expired(&self, now_epoch_secs: u64) -> bool {
        now_epoch_secs >= self.expires_at
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token signature invalid or malformed")]
    Invalid,
    #[error("token has expired")]
    Expired,
}

/// Verifies a raw bearer token and returns its claims. Out of scope here:
/// no production implementation ships in this crate (spec.md Non-goals).
pub trait TokenVerifier: Send + Sync + 'static {
    fn verify(&self, raw_token: &str) -> Result<TokenPayload, TokenError>;
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Test double keyed by the raw token string, standing in for the
    /// panel's real signature verification.
    #[derive(Default)]
    pub struct FakeTokenVerifier {
        tokens: Mutex<HashMap<String, TokenPayload>>,
    }

    impl FakeTokenVerifier {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, raw_token: impl Into<String>, payload: TokenPayload) {
            self.tokens.lock().insert(raw_token.into(), payload);
        }
    }

    impl TokenVerifier for FakeTokenVerifier {
        fn verify(&self, raw_token: &str) -> Result<TokenPayload, TokenError> {
            self.tokens.lock().get(raw_token).cloned().ok_or(TokenError::Invalid)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(exp: u64) -> TokenPayload {
        TokenPayload { server_id: ServerId::from_string("srv-1"), permissions: HashSet::from(["control.start".to_string()]), expires_at: exp }
    }

    #[test]
    fn wildcard_permission_grants_everything() {
        let mut p = payload(1000);
        p.permissions = HashSet::from(["*".to_string()]);
        assert!(p.has_permission("control.stop"));
    }

    #[test]
    fn missing_permission_is_denied() {
        let p = payload(1000);
        assert!(!p.has_permission("control.stop"));
        assert!(p.has_permission("control.start"));
    }

    #[test]
    fn expiry_boundary_is_exclusive_of_remaining_time() {
        let p = payload(100);
        assert_eq!(p.seconds_remaining(50), Some(50));
        assert!(!p.is_expired(99));
        assert!(p.is_expired(100));
        assert!(p.is_expired(150));
    }
}
