//! Reading product.raw_event.v1 rows and checking column coverage

use crate::error::SignalError;
use crate::schema::raw_event::{RawEvent, UserIdColumn};
use serde::{Deserialize, Serialize};

/// Columns the pipeline reads, in export order
pub const ESSENTIAL_COLUMNS: [&str; 14] = [
    "distinct_id",
    "person_id",
    "prop_$session_id",
    "prop_session_id",
    "prop_$user_id",
    "prop_user_id",
    "timestamp",
    "created_at",
    "event",
    "prop_credits_used",
    "prop_credit_amount",
    "prop_tool_name",
    "prop_$pathname",
    "prop_message_id",
];

/// Columns without which no feature vector can be built
pub const REQUIRED_COLUMNS: [&str; 3] = ["person_id", "timestamp", "event"];

/// Adapter for reading raw events
pub struct RawEventAdapter;

impl RawEventAdapter {
    /// Parse a JSON string containing an array of RawEvents
    pub fn parse_array(json: &str) -> Result<Vec<RawEvent>, SignalError> {
        let events: Vec<RawEvent> = serde_json::from_str(json)?;
        Ok(events)
    }

    /// Parse NDJSON (newline-delimited JSON) containing RawEvents
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<RawEvent>, SignalError> {
        let mut events = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<RawEvent>(trimmed) {
                Ok(event) => events.push(event),
                Err(e) => {
                    return Err(SignalError::ParseError(format!(
                        "Failed to parse line {}: {}",
                        line_num + 1,
                        e
                    )));
                }
            }
        }
        Ok(events)
    }

    /// Parse either a JSON array or NDJSON, decided by the first non-blank character
    pub fn parse(input: &str) -> Result<Vec<RawEvent>, SignalError> {
        if input.trim_start().starts_with('[') {
            Self::parse_array(input)
        } else {
            Self::parse_ndjson(input)
        }
    }

    /// Best-effort column presence check over a batch
    pub fn column_presence(events: &[RawEvent]) -> ColumnPresence {
        let columns = ESSENTIAL_COLUMNS
            .iter()
            .map(|&name| {
                let non_null = events.iter().filter(|e| column_is_set(e, name)).count();
                ColumnCoverage {
                    name: name.to_string(),
                    non_null,
                    coverage: if events.is_empty() {
                        0.0
                    } else {
                        non_null as f64 / events.len() as f64
                    },
                }
            })
            .collect();

        ColumnPresence {
            total_rows: events.len(),
            columns,
        }
    }
}

/// Non-null coverage for one column
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnCoverage {
    pub name: String,
    pub non_null: usize,
    /// Fraction of rows where the column is set (0-1)
    pub coverage: f64,
}

/// Column coverage for a batch of raw events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnPresence {
    pub total_rows: usize,
    pub columns: Vec<ColumnCoverage>,
}

impl ColumnPresence {
    /// Whether at least one row sets the column
    pub fn is_present(&self, name: &str) -> bool {
        self.columns
            .iter()
            .any(|c| c.name == name && c.non_null > 0)
    }

    /// Required columns never set in any row
    pub fn missing_required(&self) -> Vec<&'static str> {
        REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|name| !self.is_present(name))
            .collect()
    }

    /// Optional columns never set in any row
    pub fn missing_optional(&self) -> Vec<&'static str> {
        ESSENTIAL_COLUMNS
            .iter()
            .copied()
            .filter(|name| !REQUIRED_COLUMNS.contains(name) && !self.is_present(name))
            .collect()
    }

    /// Fail when a required column is absent from the whole batch
    pub fn ensure_required(&self) -> Result<(), SignalError> {
        let missing = self.missing_required();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SignalError::MissingColumn(missing.join(", ")))
        }
    }

    /// Like `ensure_required`, but any of `id_columns` may supply the user id
    pub fn ensure_usable(&self, id_columns: &[UserIdColumn]) -> Result<(), SignalError> {
        let mut missing: Vec<String> = Vec::new();
        if !id_columns.iter().any(|c| self.is_present(c.column_name())) {
            let names: Vec<&str> = id_columns.iter().map(UserIdColumn::column_name).collect();
            missing.push(match names.as_slice() {
                [] => "user id".to_string(),
                [only] => only.to_string(),
                _ => format!("one of {}", names.join("/")),
            });
        }
        for name in ["timestamp", "event"] {
            if !self.is_present(name) {
                missing.push(name.to_string());
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(SignalError::MissingColumn(missing.join(", ")))
        }
    }
}

fn column_is_set(event: &RawEvent, name: &str) -> bool {
    match name {
        "distinct_id" => event.distinct_id.is_some(),
        "person_id" => event.person_id.is_some(),
        "prop_$session_id" => event.session_id.is_some(),
        "prop_session_id" => event.app_session_id.is_some(),
        "prop_$user_id" => event.tracked_user_id.is_some(),
        "prop_user_id" => event.app_user_id.is_some(),
        "timestamp" => event.timestamp.is_some(),
        "created_at" => event.created_at.is_some(),
        "event" => event.event.is_some(),
        "prop_credits_used" => event.credits_used.is_some(),
        "prop_credit_amount" => event.credit_amount.is_some(),
        "prop_tool_name" => event.tool_name.is_some(),
        "prop_$pathname" => event.pathname.is_some(),
        "prop_message_id" => event.message_id.is_some(),
        _ => false,
    }
}
