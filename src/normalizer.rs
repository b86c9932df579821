//! Event normalization
//!
//! Turns raw export rows into `Event`s:
//! - timestamps parsed (primary `timestamp`, secondary `created_at`)
//! - canonical user id resolved from the configured identifier columns
//! - session id resolved from the tracked column, falling back to the app column
//!
//! Rows without a user id, a parseable primary timestamp, or an event name are
//! dropped without error and counted in the `NormalizationReport`.

use crate::config::NormalizerConfig;
use crate::schema::{RawEvent, RawEventAdapter, UserIdColumn};
use crate::types::Event;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Offset-bearing timestamp layouts tried after RFC 3339
const OFFSET_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
];

/// Naive layouts, interpreted as UTC
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Counts of kept and dropped rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizationReport {
    pub total_rows: usize,
    pub kept_rows: usize,
    pub dropped_missing_user: usize,
    pub dropped_bad_timestamp: usize,
    pub dropped_missing_event: usize,
}

impl NormalizationReport {
    /// Total rows excluded for any reason
    pub fn dropped_rows(&self) -> usize {
        self.dropped_missing_user + self.dropped_bad_timestamp + self.dropped_missing_event
    }
}

/// Normalized events plus the drop accounting
#[derive(Debug, Clone)]
pub struct NormalizedEvents {
    pub events: Vec<Event>,
    pub report: NormalizationReport,
}

/// Normalizer for raw export rows
pub struct EventNormalizer {
    user_id_columns: Vec<UserIdColumn>,
}

impl Default for EventNormalizer {
    fn default() -> Self {
        Self::new(&NormalizerConfig::default())
    }
}

impl EventNormalizer {
    pub fn new(config: &NormalizerConfig) -> Self {
        Self {
            user_id_columns: config.user_id_columns.clone(),
        }
    }

    /// Normalize a batch of raw events
    pub fn normalize(&self, raw: &[RawEvent]) -> NormalizedEvents {
        let presence = RawEventAdapter::column_presence(raw);
        let missing_optional = presence.missing_optional();
        if !raw.is_empty() && !missing_optional.is_empty() {
            warn!(columns = ?missing_optional, "optional columns absent from every row");
        }

        let mut report = NormalizationReport {
            total_rows: raw.len(),
            ..Default::default()
        };
        let mut events = Vec::with_capacity(raw.len());

        for row in raw {
            let Some(user_id) = self.resolve_user_id(row) else {
                report.dropped_missing_user += 1;
                continue;
            };
            let Some(timestamp) = row.timestamp.as_deref().and_then(parse_timestamp) else {
                report.dropped_bad_timestamp += 1;
                continue;
            };
            let Some(name) = row.event.as_deref().map(str::trim).filter(|n| !n.is_empty()) else {
                report.dropped_missing_event += 1;
                continue;
            };

            events.push(Event {
                user_id: user_id.to_string(),
                session_id: resolve_session_id(row),
                name: name.to_string(),
                timestamp,
                created_at: row.created_at.as_deref().and_then(parse_timestamp),
                credits_used: row.credits_used,
                credit_amount: row.credit_amount,
                tool_name: row.tool_name.clone(),
                pathname: row.pathname.clone(),
                message_id: row.message_id.clone(),
            });
        }

        report.kept_rows = events.len();
        debug!(
            total = report.total_rows,
            kept = report.kept_rows,
            missing_user = report.dropped_missing_user,
            bad_timestamp = report.dropped_bad_timestamp,
            missing_event = report.dropped_missing_event,
            "normalized events"
        );

        NormalizedEvents { events, report }
    }

    fn resolve_user_id<'a>(&self, row: &'a RawEvent) -> Option<&'a str> {
        self.user_id_columns
            .iter()
            .find_map(|&column| row.user_id_from(column))
    }
}

/// Tracked session id, else the app-level one
fn resolve_session_id(row: &RawEvent) -> Option<String> {
    row.session_id
        .as_deref()
        .or(row.app_session_id.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Parse an export timestamp; `None` when no supported layout matches
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
