// =============================================================================
// UserStore — identity records backing AuthGate and Chat (C10 dependency)
// =============================================================================
//
// Password hashing is an external collaborator (spec.md §1 "Out of scope");
// `password_hash` is stored and compared as an opaque string. The reference
// implementation below is an in-process map guarded by one `RwLock`,
// matching SessionRegistry's reader-writer discipline (spec.md §5) since
// reads (login, profile) vastly outnumber writes (register).
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::constant_time_eq;
use crate::error::AuthError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Tester,
    Admin,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserStats {
    pub games_played: u32,
    pub best_return: f64,
    pub average_return: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub username: Option<String>,
    pub display_name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub stats: UserStats,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: Option<String>,
    pub username: Option<String>,
    pub display_name: String,
    pub password_hash: String,
    pub role: Role,
}

struct Inner {
    users_by_id: HashMap<Uuid, User>,
    id_by_email: HashMap<String, Uuid>,
    id_by_username: HashMap<String, Uuid>,
}

/// In-process reference UserStore. A remote-backed implementation would
/// hide behind the same public API (spec.md §1: "the core defines the
/// persistence interface").
pub struct UserStore {
    inner: RwLock<Inner>,
}

impl UserStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                users_by_id: HashMap::new(),
                id_by_email: HashMap::new(),
                id_by_username: HashMap::new(),
            }),
        }
    }

    /// Seed a fixed admin/tester account from environment configuration
    /// (spec.md §6 `ADMIN_IDENTIFIER`/`ADMIN_PASSWORD`,
    /// `TESTER_IDENTIFIER`/`TESTER_PASSWORD`). `password_hash` here is
    /// whatever the caller already hashed upstream.
    pub fn seed(&self, identifier: &str, password_hash: &str, role: Role) -> Uuid {
        self.register(NewUser {
            email: None,
            username: Some(identifier.to_string()),
            display_name: identifier.to_string(),
            password_hash: password_hash.to_string(),
            role,
        })
        .expect("seed identifiers must not collide")
    }

    /// Create a user. Returns `Conflict`-shaped `AuthError::BadCredentials`
    /// is wrong here — registration conflicts are surfaced by the caller as
    /// `409 Exists` (spec.md §6); this just reports via `Result<_, String>`
    /// reason text kept for the caller to classify.
    pub fn register(&self, new_user: NewUser) -> Result<Uuid, String> {
        let mut inner = self.inner.write();
        if let Some(email) = &new_user.email {
            if inner.id_by_email.contains_key(email) {
                return Err(format!("email '{email}' already registered"));
            }
        }
        if let Some(username) = &new_user.username {
            if inner.id_by_username.contains_key(username) {
                return Err(format!("username '{username}' already registered"));
            }
        }
        let id = Uuid::new_v4();
        let user = User {
            user_id: id,
            email: new_user.email.clone(),
            username: new_user.username.clone(),
            display_name: new_user.display_name,
            password_hash: new_user.password_hash,
            role: new_user.role,
            stats: UserStats::default(),
        };
        if let Some(email) = &new_user.email {
            inner.id_by_email.insert(email.clone(), id);
        }
        if let Some(username) = &new_user.username {
            inner.id_by_username.insert(username.clone(), id);
        }
        inner.users_by_id.insert(id, user);
        Ok(id)
    }

    pub fn get(&self, id: Uuid) -> Option<User> {
        self.inner.read().users_by_id.get(&id).cloned()
    }

    /// Resolve by email or username (spec.md §6 `/auth/login` accepts
    /// either an identifier).
    pub fn find_by_identifier(&self, identifier: &str) -> Option<User> {
        let inner = self.inner.read();
        let id = inner
            .id_by_email
            .get(identifier)
            .or_else(|| inner.id_by_username.get(identifier))?;
        inner.users_by_id.get(id).cloned()
    }

    /// Verify `password_hash` matches the stored hash for `identifier`.
    pub fn authenticate(&self, identifier: &str, password_hash: &str) -> Result<User, AuthError> {
        let user = self
            .find_by_identifier(identifier)
            .ok_or(AuthError::BadCredentials)?;
        if !constant_time_eq(user.password_hash.as_bytes(), password_hash.as_bytes()) {
            return Err(AuthError::BadCredentials);
        }
        Ok(user)
    }

    pub fn record_game_result(&self, id: Uuid, return_pct: f64) {
        let mut inner = self.inner.write();
        if let Some(user) = inner.users_by_id.get_mut(&id) {
            user.stats.games_played += 1;
            if return_pct > user.stats.best_return {
                user.stats.best_return = return_pct;
            }
            let n = user.stats.games_played as f64;
            user.stats.average_return += (return_pct - user.stats.average_return) / n;
        }
    }
}

impl Default for UserStore {
    fn default() -> Self {
        Self::new()
    }
}
