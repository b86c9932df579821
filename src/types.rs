//! Core types for Cohort Signals
//!
//! These types flow through the pipeline: normalized events, per-user feature
//! vectors, composite scores, tiers, and the scored-user snapshot the scoring
//! agent serves queries from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A normalized event with a resolved user id and a valid timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Canonical user identifier
    pub user_id: String,
    /// Session identifier, primary column preferred over the fallback
    pub session_id: Option<String>,
    /// Event name
    pub name: String,
    /// Event time
    pub timestamp: DateTime<Utc>,
    /// Ingestion time, when it parsed
    pub created_at: Option<DateTime<Utc>>,
    pub credits_used: Option<f64>,
    pub credit_amount: Option<f64>,
    pub tool_name: Option<String>,
    /// Canvas / page path
    pub pathname: Option<String>,
    pub message_id: Option<String>,
}

/// Time filter applied before feature extraction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Window {
    /// Entire observed lifetime
    Full,
    /// Events within `days` (inclusive) of the user's first event
    Early { days: f64 },
}

impl Window {
    /// The week-1 window
    pub fn week_one() -> Self {
        Window::Early { days: 7.0 }
    }

    /// Column prefix for exported features
    pub fn prefix(&self) -> &'static str {
        match self {
            Window::Full => "",
            Window::Early { .. } => "w1_",
        }
    }
}

/// Feature columns in fixed export order
pub const FEATURE_NAMES: [&str; 20] = [
    "days_active",
    "time_span_days",
    "weeks_active",
    "avg_events_per_day",
    "unique_event_types",
    "event_diversity_score",
    "total_events",
    "execution_event_count",
    "execution_event_rate",
    "max_canvas_revisits",
    "unique_canvases",
    "unique_sessions",
    "avg_events_per_session",
    "max_events_per_session",
    "sessions_with_diverse_events",
    "total_credits_used",
    "total_credit_amount",
    "tool_invocation_count",
    "unique_tools_used",
    "message_count",
];

/// Per-user behavioral features over one window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserFeatureVector {
    pub user_id: String,
    pub window: Window,

    // Sustained usage
    /// Distinct calendar dates with at least one event
    pub days_active: u32,
    /// Last minus first event, in fractional days
    pub time_span_days: f64,
    /// Distinct (ISO year, ISO week) pairs
    pub weeks_active: u32,
    pub avg_events_per_day: f64,

    // Workflow depth
    pub unique_event_types: u32,
    /// Shannon entropy (bits) of the event-name distribution
    pub event_diversity_score: f64,
    pub total_events: u32,

    // Reproducibility
    pub execution_event_count: u32,
    pub execution_event_rate: f64,
    pub max_canvas_revisits: u32,
    pub unique_canvases: u32,

    // Session completeness
    pub unique_sessions: u32,
    pub avg_events_per_session: f64,
    pub max_events_per_session: u32,
    pub sessions_with_diverse_events: u32,

    // Serious usage
    pub total_credits_used: f64,
    pub total_credit_amount: f64,
    pub tool_invocation_count: u32,
    pub unique_tools_used: u32,
    pub message_count: u32,
}

impl UserFeatureVector {
    /// Feature values in `FEATURE_NAMES` order
    pub fn values(&self) -> Vec<f64> {
        vec![
            self.days_active as f64,
            self.time_span_days,
            self.weeks_active as f64,
            self.avg_events_per_day,
            self.unique_event_types as f64,
            self.event_diversity_score,
            self.total_events as f64,
            self.execution_event_count as f64,
            self.execution_event_rate,
            self.max_canvas_revisits as f64,
            self.unique_canvases as f64,
            self.unique_sessions as f64,
            self.avg_events_per_session,
            self.max_events_per_session as f64,
            self.sessions_with_diverse_events as f64,
            self.total_credits_used,
            self.total_credit_amount,
            self.tool_invocation_count as f64,
            self.unique_tools_used as f64,
            self.message_count as f64,
        ]
    }

    /// Column names for this vector's window, e.g. `w1_days_active`
    pub fn column_names(window: Window) -> Vec<String> {
        FEATURE_NAMES
            .iter()
            .map(|name| format!("{}{}", window.prefix(), name))
            .collect()
    }

    /// Replace every non-finite real-valued field with zero
    pub fn sanitize(&mut self) {
        for field in [
            &mut self.time_span_days,
            &mut self.avg_events_per_day,
            &mut self.event_diversity_score,
            &mut self.execution_event_rate,
            &mut self.avg_events_per_session,
            &mut self.total_credits_used,
            &mut self.total_credit_amount,
        ] {
            if !field.is_finite() {
                *field = 0.0;
            }
        }
    }
}

/// Sub-scores and weighted composite for one user
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompositeScore {
    pub sustained_usage_score: f64,
    pub workflow_depth_score: f64,
    pub serious_usage_score: f64,
    pub composite_success_score: f64,
}

/// Ordered success tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Trial,
    Casual,
    Regular,
    Active,
    Power,
}

impl Tier {
    /// All tiers from highest to lowest
    pub const ALL: [Tier; 5] = [Tier::Power, Tier::Active, Tier::Regular, Tier::Casual, Tier::Trial];

    /// 0 for Trial up to 4 for Power
    pub fn rank(&self) -> u8 {
        *self as u8
    }

    /// Display label
    pub fn label(&self) -> &'static str {
        match self {
            Tier::Power => "Power Users",
            Tier::Active => "Active Users",
            Tier::Regular => "Regular Users",
            Tier::Casual => "Casual Users",
            Tier::Trial => "Trial Users",
        }
    }

    /// Tiers counted as churned
    pub fn is_churned(&self) -> bool {
        matches!(self, Tier::Trial | Tier::Casual)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Full-history features, scores and tier for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredUser {
    pub features: UserFeatureVector,
    pub scores: CompositeScore,
    pub tier: Tier,
}

impl ScoredUser {
    pub fn user_id(&self) -> &str {
        &self.features.user_id
    }
}
