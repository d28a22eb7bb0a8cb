//! Push-channel protocol definitions.
//!
//! Every frame on the channel, in either direction and on either transport,
//! is a JSON envelope `{ "event": <name>, "data": <payload> }`. The client
//! sends exactly one control event, [`REGISTER_EVENT`]; everything the server
//! sends is an open set of named domain events.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of the registration handshake event.
pub const REGISTER_EVENT: &str = "register";

/// Path of the WebSocket endpoint, relative to the socket base URL.
pub const WS_PATH: &str = "/realtime";

/// Path of the long-polling endpoint, relative to the socket base URL.
pub const POLL_PATH: &str = "/realtime/poll";

/// A named event with a JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireEvent {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl WireEvent {
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// User role as named by the school-management backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "estudiante")]
    Student,
    #[serde(rename = "docente")]
    Teacher,
    #[serde(
        rename = "administrativo",
        alias = "admin",
        alias = "administrador",
        alias = "superadmin"
    )]
    Admin,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Student, Role::Teacher, Role::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "estudiante",
            Role::Teacher => "docente",
            Role::Admin => "administrativo",
        }
    }

    /// Parse a role name as stored by the host app. Case and surrounding
    /// whitespace are ignored.
    pub fn parse(value: &str) -> Option<Role> {
        match value.trim().to_lowercase().as_str() {
            "estudiante" => Some(Role::Student),
            "docente" => Some(Role::Teacher),
            "administrativo" | "admin" | "administrador" | "superadmin" => Some(Role::Admin),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of the `register` handshake.
///
/// `userId` and `id_usuario` carry the same value: older server builds read
/// one, newer ones the other. A bare registration (identity cache not
/// populated yet) omits `rol` and `cursos`, which the server treats as
/// un-scoped delivery. A scoped registration always carries `cursos`, even
/// when the user has no courses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisterPayload {
    #[serde(rename = "userId")]
    pub user_id: u64,
    pub id_usuario: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rol: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursos: Option<Vec<u64>>,
}

impl RegisterPayload {
    pub fn bare(user_id: u64) -> Self {
        Self {
            user_id,
            id_usuario: user_id,
            rol: None,
            cursos: None,
        }
    }

    pub fn scoped(user_id: u64, role: Role, courses: Vec<u64>) -> Self {
        Self {
            user_id,
            id_usuario: user_id,
            rol: Some(role),
            cursos: Some(courses),
        }
    }

    pub fn is_scoped(&self) -> bool {
        self.rol.is_some()
    }

    pub fn to_wire(&self) -> WireEvent {
        WireEvent::new(
            REGISTER_EVENT,
            serde_json::to_value(self).unwrap_or(serde_json::Value::Null),
        )
    }
}

/// Response to opening a long-polling session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollSession {
    pub sid: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scoped_register_payload_shape() {
        let payload = RegisterPayload::scoped(42, Role::Student, vec![7]);
        let wire = payload.to_wire();
        assert_eq!(wire.event, REGISTER_EVENT);
        assert_eq!(
            wire.data,
            json!({ "userId": 42, "id_usuario": 42, "rol": "estudiante", "cursos": [7] })
        );
    }

    #[test]
    fn scoped_register_payload_without_courses_keeps_empty_list() {
        let wire = RegisterPayload::scoped(42, Role::Student, vec![]).to_wire();
        assert_eq!(
            wire.data,
            json!({ "userId": 42, "id_usuario": 42, "rol": "estudiante", "cursos": [] })
        );
    }

    #[test]
    fn bare_register_payload_omits_scope() {
        let wire = RegisterPayload::bare(9).to_wire();
        assert_eq!(wire.data, json!({ "userId": 9, "id_usuario": 9 }));
    }

    #[test]
    fn role_aliases() {
        assert_eq!(Role::parse(" Admin "), Some(Role::Admin));
        assert_eq!(Role::parse("docente"), Some(Role::Teacher));
        assert_eq!(Role::parse("padre"), None);
        let role: Role = serde_json::from_str("\"administrador\"").unwrap();
        assert_eq!(role, Role::Admin);
    }

    #[test]
    fn envelope_without_data_decodes_to_null() {
        let event = WireEvent::decode(r#"{"event":"anuncio"}"#).unwrap();
        assert_eq!(event.event, "anuncio");
        assert!(event.data.is_null());
    }
}
