// =============================================================================
// AuthGate — identity + role resolution for the request and push-handshake
// paths (C10)
// =============================================================================
//
// Bearer credentials are JWTs signed with `ServerConfig.jwt_secret`
// (HS256). `BotKey` is a separate, simpler bearer scheme for the bot-order
// path (spec.md §6 `401 BadBotKey`) — a bot registers once and is handed an
// opaque key that the bot store holds, not a JWT.
// =============================================================================

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AuthError;
use crate::user_store::{Role, UserStore};

const TOKEN_TTL_HOURS: i64 = 24;

/// Compare two byte slices in constant time. Returns `true` if they are
/// identical. The comparison always examines every byte of both slices even
/// when a mismatch is found early, preventing timing side-channels.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    sub: Uuid,
    role: Role,
    exp: i64,
}

pub struct AuthGate {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    users: Arc<UserStore>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub role: Role,
}

impl Identity {
    pub fn require_role(&self, allowed: &[Role]) -> Result<(), AuthError> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(AuthError::RoleNotPermitted {
                role: format!("{:?}", self.role).to_lowercase(),
            })
        }
    }
}

impl AuthGate {
    pub fn new(jwt_secret: &str, users: Arc<UserStore>) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            validation: Validation::new(jsonwebtoken::Algorithm::HS256),
            users,
        }
    }

    /// Issue a bearer token for `user_id`/`role`, valid for
    /// `TOKEN_TTL_HOURS`.
    pub fn issue(&self, user_id: Uuid, role: Role) -> Result<String, AuthError> {
        let claims = Claims {
            sub: user_id,
            role,
            exp: (Utc::now() + Duration::hours(TOKEN_TTL_HOURS)).timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding_key).map_err(|_| AuthError::InvalidCredential)
    }

    /// Resolve a bearer token to an `Identity`, used by both the REST
    /// extractor and the push-channel handshake (spec.md §4.5, §4.10).
    pub fn resolve(&self, token: &str) -> Result<Identity, AuthError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|_| AuthError::InvalidCredential)?;
        Ok(Identity {
            user_id: data.claims.sub,
            role: data.claims.role,
        })
    }

    pub fn users(&self) -> &Arc<UserStore> {
        &self.users
    }
}

/// axum extractor: pulls `Authorization: Bearer <token>`, resolves it via
/// the shared `AuthGate` in application state, and rejects with the exact
/// `AuthError` (so `IntoResponse` produces the right status/tag).
pub struct Bearer(pub Identity);

impl<S> FromRequestParts<S> for Bearer
where
    S: Send + Sync,
    Arc<AuthGate>: axum::extract::FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(AuthError::MissingCredential)?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or(AuthError::MissingCredential)?;
        let gate = <Arc<AuthGate> as axum::extract::FromRef<S>>::from_ref(state);
        gate.resolve(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_rejects_mismatched_length() {
        assert!(!constant_time_eq(b"short", b"longer-string"));
    }

    #[test]
    fn constant_time_eq_accepts_identical_bytes() {
        assert!(constant_time_eq(b"same-secret", b"same-secret"));
    }

    #[test]
    fn constant_time_eq_rejects_single_byte_difference() {
        assert!(!constant_time_eq(b"secret-value", b"secret-valub"));
    }

    #[test]
    fn issue_then_resolve_round_trips() {
        let gate = AuthGate::new("a-secret-that-is-at-least-32-bytes", Arc::new(UserStore::new()));
        let user_id = Uuid::new_v4();
        let token = gate.issue(user_id, Role::Tester).unwrap();
        let identity = gate.resolve(&token).unwrap();
        assert_eq!(identity.user_id, user_id);
        assert_eq!(identity.role, Role::Tester);
    }

    #[test]
    fn tampered_token_is_rejected() {
        let gate = AuthGate::new("a-secret-that-is-at-least-32-bytes", Arc::new(UserStore::new()));
        let token = gate.issue(Uuid::new_v4(), Role::User).unwrap();
        let tampered = format!("{token}x");
        assert_eq!(gate.resolve(&tampered).unwrap_err(), AuthError::InvalidCredential);
    }

    #[test]
    fn role_not_permitted_is_flagged() {
        let identity = Identity {
            user_id: Uuid::new_v4(),
            role: Role::User,
        };
        let err = identity.require_role(&[Role::Tester, Role::Admin]).unwrap_err();
        assert_eq!(err, AuthError::RoleNotPermitted { role: "user".into() });
    }
}
