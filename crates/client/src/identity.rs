//! Cached identity lookups used to build the registration handshake.

use std::sync::Arc;

use pizarra_shared::{RegisterPayload, Role};
use serde::{Deserialize, Serialize};

use crate::storage::{self, KeyValueStore};

/// Storage key for the signed-in user object.
pub const USER_KEY: &str = "user";
/// Storage key for the role name.
pub const ROLE_KEY: &str = "rol";
/// Storage key for the course scope.
pub const COURSES_KEY: &str = "cursos";
/// Storage key for the bearer token.
pub const TOKEN_KEY: &str = "token";

/// The user object the host app caches after sign-in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedUser {
    #[serde(alias = "id_usuario")]
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nombre: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rol: Option<String>,
}

/// Read-only view over the session data in the local store.
///
/// Every call hits the store: role and scope may be written by the host
/// after the channel first opens, so nothing is cached here.
#[derive(Clone)]
pub struct IdentityCache {
    store: Arc<dyn KeyValueStore>,
}

impl IdentityCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn user(&self) -> Option<CachedUser> {
        storage::load(self.store.as_ref(), USER_KEY).await
    }

    /// Role from the dedicated key, falling back to the user object.
    pub async fn role(&self) -> Option<Role> {
        if let Some(raw) = self.store.get(ROLE_KEY).await {
            if let Some(role) = Role::parse(raw.trim().trim_matches('"')) {
                return Some(role);
            }
        }
        self.user()
            .await
            .and_then(|user| user.rol)
            .and_then(|rol| Role::parse(&rol))
    }

    /// Course ids the user is scoped to. Accepts a JSON array of numbers,
    /// numeric strings, or course objects carrying `id_curso` / `id`.
    pub async fn courses(&self) -> Vec<u64> {
        let Some(value) = storage::load::<serde_json::Value>(self.store.as_ref(), COURSES_KEY).await
        else {
            return Vec::new();
        };
        let Some(items) = value.as_array() else {
            return Vec::new();
        };

        let mut courses: Vec<u64> = items.iter().filter_map(course_id).collect();
        courses.sort_unstable();
        courses.dedup();
        courses
    }

    pub async fn token(&self) -> Option<String> {
        let raw = self.store.get(TOKEN_KEY).await?;
        let token = raw.trim().trim_matches('"');
        (!token.is_empty()).then(|| token.to_string())
    }

    /// Build the handshake payload for `user_id` from whatever is cached
    /// right now.
    ///
    /// Falls back to a bare registration when no role is cached, or when the
    /// cached user belongs to a different account.
    pub async fn registration(&self, user_id: u64) -> RegisterPayload {
        if let Some(user) = self.user().await {
            if user.id != user_id {
                crate::log_warn!(
                    "Cached user {} does not match session user {}, registering bare identity",
                    user.id,
                    user_id
                );
                return RegisterPayload::bare(user_id);
            }
        }

        match self.role().await {
            Some(role) => RegisterPayload::scoped(user_id, role, self.courses().await),
            None => {
                crate::log_debug!("No cached role for user {}, registering bare identity", user_id);
                RegisterPayload::bare(user_id)
            }
        }
    }
}

fn course_id(item: &serde_json::Value) -> Option<u64> {
    match item {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        serde_json::Value::Object(map) => map
            .get("id_curso")
            .or_else(|| map.get("id"))
            .and_then(course_id),
        _ => None,
    }
}
