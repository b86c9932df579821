//! product.raw_event.v1 schema definition
//!
//! One row of the analytics export, restricted to the columns the success
//! pipeline reads. Every column is nullable: exports routinely leave identifiers,
//! properties and even timestamps empty, and the normalizer decides what to keep.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Current schema version
pub const SCHEMA_VERSION: &str = "product.raw_event.v1";

/// A raw analytics event as exported (all columns optional)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Anonymous or device-level identifier
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub distinct_id: Option<String>,
    /// Merged person identifier (primary user id)
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub person_id: Option<String>,
    /// Session id set by the tracking library
    #[serde(
        rename = "prop_$session_id",
        alias = "session_id",
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub session_id: Option<String>,
    /// Session id set by application code
    #[serde(
        rename = "prop_session_id",
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub app_session_id: Option<String>,
    /// User id set by the tracking library
    #[serde(
        rename = "prop_$user_id",
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub tracked_user_id: Option<String>,
    /// User id set by application code
    #[serde(
        rename = "prop_user_id",
        alias = "user_id",
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub app_user_id: Option<String>,
    /// Event time (primary timestamp)
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Ingestion time
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Event name
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    /// Credits consumed by this event
    #[serde(
        rename = "prop_credits_used",
        alias = "credits_used",
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub credits_used: Option<f64>,
    /// Credit amount attached to this event
    #[serde(
        rename = "prop_credit_amount",
        alias = "credit_amount",
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub credit_amount: Option<f64>,
    /// Tool invoked by this event
    #[serde(
        rename = "prop_tool_name",
        alias = "tool_name",
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub tool_name: Option<String>,
    /// Page / canvas path
    #[serde(
        rename = "prop_$pathname",
        alias = "pathname",
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub pathname: Option<String>,
    /// Chat message identifier
    #[serde(
        rename = "prop_message_id",
        alias = "message_id",
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub message_id: Option<String>,
}

/// Column that may carry the canonical user identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserIdColumn {
    PersonId,
    DistinctId,
    TrackedUserId,
    AppUserId,
}

impl UserIdColumn {
    /// Export column name
    pub fn column_name(&self) -> &'static str {
        match self {
            UserIdColumn::PersonId => "person_id",
            UserIdColumn::DistinctId => "distinct_id",
            UserIdColumn::TrackedUserId => "prop_$user_id",
            UserIdColumn::AppUserId => "prop_user_id",
        }
    }
}

impl RawEvent {
    /// Value of the given identifier column, with blank strings treated as null
    pub fn user_id_from(&self, column: UserIdColumn) -> Option<&str> {
        let value = match column {
            UserIdColumn::PersonId => self.person_id.as_deref(),
            UserIdColumn::DistinctId => self.distinct_id.as_deref(),
            UserIdColumn::TrackedUserId => self.tracked_user_id.as_deref(),
            UserIdColumn::AppUserId => self.app_user_id.as_deref(),
        };
        value.map(str::trim).filter(|v| !v.is_empty())
    }
}

/// Accept a string, a number, or null. Blank strings become `None`.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

/// Accept a number, a numeric string, or null. Anything unparseable becomes `None`.
fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite()))
}
