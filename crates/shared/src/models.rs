//! Notification history records as served by the HTTP API.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Notification category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Module,
    Assignment,
    Payment,
    Grade,
    Enrollment,
    General,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Module => "module",
            NotificationKind::Assignment => "assignment",
            NotificationKind::Payment => "payment",
            NotificationKind::Grade => "grade",
            NotificationKind::Enrollment => "enrollment",
            NotificationKind::General => "general",
        }
    }

    /// Map the backend's `tipo` column. Unknown values become `General`.
    pub fn from_tipo(tipo: &str) -> Self {
        match tipo.trim().to_lowercase().as_str() {
            "modulo" | "módulo" | "module" => NotificationKind::Module,
            "tarea" | "entrega" | "assignment" => NotificationKind::Assignment,
            "pago" | "payment" => NotificationKind::Payment,
            "calificacion" | "calificación" | "nota" | "grade" => NotificationKind::Grade,
            "matricula" | "matrícula" | "enrollment" => NotificationKind::Enrollment,
            _ => NotificationKind::General,
        }
    }
}

/// One row of `GET /notifications/mine`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub tipo: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub titulo: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub mensaje: String,
    #[serde(default, deserialize_with = "bool_or_number")]
    pub leida: bool,
    #[serde(default, deserialize_with = "nullable_string")]
    pub fecha_creacion: String,
    #[serde(default)]
    pub fecha_lectura: Option<String>,
}

impl NotificationRecord {
    pub fn kind(&self) -> NotificationKind {
        NotificationKind::from_tipo(&self.tipo)
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.fecha_creacion)
    }

    /// Read timestamp. A row flagged `leida` without `fecha_lectura` is
    /// considered read at creation time.
    pub fn read_at(&self) -> Option<DateTime<Utc>> {
        let read = self.fecha_lectura.as_deref().and_then(parse_timestamp);
        match (read, self.leida) {
            (Some(ts), _) => Some(ts),
            (None, true) => self.created_at(),
            (None, false) => None,
        }
    }
}

/// Body of `GET /notifications/mine`.
///
/// Rows are kept raw so that one malformed row does not sink the batch; see
/// [`NotificationsResponse::into_records`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationsResponse {
    pub success: bool,
    #[serde(default, deserialize_with = "nullable_rows")]
    pub notifications: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl NotificationsResponse {
    /// Decode every row, returning the good ones and the errors of the rows
    /// that could not be read.
    pub fn into_records(self) -> (Vec<NotificationRecord>, Vec<serde_json::Error>) {
        let mut records = Vec::with_capacity(self.notifications.len());
        let mut rejected = Vec::new();
        for row in self.notifications {
            match serde_json::from_value(row) {
                Ok(record) => records.push(record),
                Err(e) => rejected.push(e),
            }
        }
        (records, rejected)
    }
}

/// Parse the timestamp formats the backend emits: RFC 3339, or a naive
/// `YYYY-MM-DD HH:MM:SS` taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

fn nullable_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn nullable_rows<'de, D>(deserializer: D) -> Result<Vec<serde_json::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<serde_json::Value>>::deserialize(deserializer)?.unwrap_or_default())
}

fn bool_or_number<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Bool(b) => Ok(b),
        serde_json::Value::Number(n) => Ok(n.as_i64().unwrap_or(0) != 0),
        serde_json::Value::Null => Ok(false),
        other => Err(serde::de::Error::custom(format!(
            "expected boolean flag, got {other}"
        ))),
    }
}
