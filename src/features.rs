//! Per-user feature extraction
//!
//! Events are grouped by user id, then each user's events are reduced into a
//! `UserFeatureVector` independently of every other user. The same reduction
//! serves the full-history and the early (week-1) windows; the window only
//! decides which of the user's events are visible.

use crate::config::FeatureConfig;
use crate::types::{Event, UserFeatureVector, Window};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

const MICROS_PER_DAY: f64 = 86_400_000_000.0;

/// Feature extractor for normalized events
pub struct FeatureExtractor {
    execution_keywords: Vec<String>,
    diverse_session_min_event_types: usize,
    entropy_epsilon: f64,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(&FeatureConfig::default())
    }
}

impl FeatureExtractor {
    pub fn new(config: &FeatureConfig) -> Self {
        Self {
            execution_keywords: config
                .execution_keywords
                .iter()
                .map(|k| k.to_lowercase())
                .collect(),
            diverse_session_min_event_types: config.diverse_session_min_event_types,
            entropy_epsilon: config.entropy_epsilon,
        }
    }

    /// Extract one vector per user, ordered by user id
    ///
    /// Users with no event inside the window produce no vector.
    pub fn extract_cohort(&self, events: &[Event], window: Window) -> Vec<UserFeatureVector> {
        let grouped = group_by_user(events);
        let vectors: Vec<UserFeatureVector> = grouped
            .into_iter()
            .filter_map(|(user_id, user_events)| {
                let visible = apply_window(&user_events, window);
                if visible.is_empty() {
                    None
                } else {
                    Some(self.extract(user_id, &visible, window))
                }
            })
            .collect();

        debug!(users = vectors.len(), window = ?window, "extracted feature vectors");
        vectors
    }

    /// Reduce one user's (already windowed) events into a feature vector
    pub fn extract(&self, user_id: &str, events: &[&Event], window: Window) -> UserFeatureVector {
        let total = events.len();
        let total_f = total.max(1) as f64;

        // Sustained usage
        let dates: HashSet<NaiveDate> = events.iter().map(|e| e.timestamp.date_naive()).collect();
        let days_active = dates.len() as u32;
        let weeks: HashSet<(i32, u32)> = dates
            .iter()
            .map(|d| {
                let iso = d.iso_week();
                (iso.year(), iso.week())
            })
            .collect();
        let time_span_days = match (
            events.iter().map(|e| e.timestamp).min(),
            events.iter().map(|e| e.timestamp).max(),
        ) {
            (Some(first), Some(last)) => elapsed_days(first, last),
            _ => 0.0,
        };
        let avg_events_per_day = total as f64 / days_active.max(1) as f64;

        // Workflow depth
        let name_counts = frequencies(events.iter().map(|e| Some(e.name.as_str())));
        let event_diversity_score = shannon_entropy(&name_counts, total, self.entropy_epsilon);

        // Reproducibility
        let execution_event_count = events
            .iter()
            .filter(|e| self.is_execution_event(&e.name))
            .count();
        let canvas_counts = frequencies(events.iter().map(|e| e.pathname.as_deref()));

        // Session completeness
        let sessions = session_stats(events, self.diverse_session_min_event_types);

        // Serious usage
        let total_credits_used: f64 = events.iter().filter_map(|e| e.credits_used).sum();
        let total_credit_amount: f64 = events.iter().filter_map(|e| e.credit_amount).sum();
        let tool_counts = frequencies(events.iter().map(|e| e.tool_name.as_deref()));
        let tool_invocation_count: usize = tool_counts.values().sum();
        let message_count = events.iter().filter(|e| e.message_id.is_some()).count();

        let mut vector = UserFeatureVector {
            user_id: user_id.to_string(),
            window,
            days_active,
            time_span_days,
            weeks_active: weeks.len() as u32,
            avg_events_per_day,
            unique_event_types: name_counts.len() as u32,
            event_diversity_score,
            total_events: total as u32,
            execution_event_count: execution_event_count as u32,
            execution_event_rate: execution_event_count as f64 / total_f,
            max_canvas_revisits: canvas_counts.values().copied().max().unwrap_or(0) as u32,
            unique_canvases: canvas_counts.len() as u32,
            unique_sessions: sessions.unique_sessions,
            avg_events_per_session: sessions.avg_events,
            max_events_per_session: sessions.max_events,
            sessions_with_diverse_events: sessions.diverse_sessions,
            total_credits_used,
            total_credit_amount,
            tool_invocation_count: tool_invocation_count as u32,
            unique_tools_used: tool_counts.len() as u32,
            message_count: message_count as u32,
        };
        vector.sanitize();
        vector
    }

    fn is_execution_event(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        self.execution_keywords.iter().any(|k| lower.contains(k.as_str()))
    }
}

/// Group events by user id (sorted by id for deterministic output)
pub fn group_by_user(events: &[Event]) -> BTreeMap<&str, Vec<&Event>> {
    let mut grouped: BTreeMap<&str, Vec<&Event>> = BTreeMap::new();
    for event in events {
        grouped.entry(event.user_id.as_str()).or_default().push(event);
    }
    grouped
}

/// Restrict a user's events to the window, anchored at their first event
pub fn apply_window<'a>(events: &[&'a Event], window: Window) -> Vec<&'a Event> {
    match window {
        Window::Full => events.to_vec(),
        Window::Early { days } => {
            let Some(first) = events.iter().map(|e| e.timestamp).min() else {
                return Vec::new();
            };
            let limit = Duration::microseconds((days * MICROS_PER_DAY) as i64);
            events
                .iter()
                .copied()
                .filter(|e| e.timestamp - first <= limit)
                .collect()
        }
    }
}

/// Fractional days between two instants, at microsecond resolution
fn elapsed_days(first: DateTime<Utc>, last: DateTime<Utc>) -> f64 {
    let span = last - first;
    match span.num_microseconds() {
        Some(us) => us as f64 / MICROS_PER_DAY,
        None => span.num_milliseconds() as f64 / (MICROS_PER_DAY / 1000.0),
    }
}

/// Count non-null values, keyed in name order
fn frequencies<'a>(values: impl Iterator<Item = Option<&'a str>>) -> BTreeMap<&'a str, usize> {
    let mut counts = BTreeMap::new();
    for value in values.flatten() {
        *counts.entry(value).or_insert(0) += 1;
    }
    counts
}

/// Base-2 Shannon entropy of a frequency table
///
/// `-Σ p·log2(p + ε)`, summed in key order and floored at zero so a single
/// category is exactly 0.
pub fn shannon_entropy(counts: &BTreeMap<&str, usize>, total: usize, epsilon: f64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let entropy: f64 = -counts
        .values()
        .map(|&c| {
            let p = c as f64 / total as f64;
            p * (p + epsilon).log2()
        })
        .sum::<f64>();
    if entropy.is_finite() {
        entropy.max(0.0)
    } else {
        0.0
    }
}

struct SessionStats {
    unique_sessions: u32,
    avg_events: f64,
    max_events: u32,
    diverse_sessions: u32,
}

/// Per-session statistics over events with a resolved session id
fn session_stats(events: &[&Event], min_event_types: usize) -> SessionStats {
    let mut by_session: HashMap<&str, (usize, HashSet<&str>)> = HashMap::new();
    for event in events {
        if let Some(session) = event.session_id.as_deref() {
            let entry = by_session.entry(session).or_default();
            entry.0 += 1;
            entry.1.insert(event.name.as_str());
        }
    }

    if by_session.is_empty() {
        return SessionStats {
            unique_sessions: 0,
            avg_events: 0.0,
            max_events: 0,
            diverse_sessions: 0,
        };
    }

    let total: usize = by_session.values().map(|(count, _)| count).sum();
    SessionStats {
        unique_sessions: by_session.len() as u32,
        avg_events: total as f64 / by_session.len() as f64,
        max_events: by_session.values().map(|(count, _)| *count).max().unwrap_or(0) as u32,
        diverse_sessions: by_session
            .values()
            .filter(|(_, names)| names.len() > min_event_types)
            .count() as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap()
    }

    fn event(user: &str, name: &str, timestamp: DateTime<Utc>) -> Event {
        Event {
            user_id: user.to_string(),
            session_id: None,
            name: name.to_string(),
            timestamp,
            created_at: None,
            credits_used: None,
            credit_amount: None,
            tool_name: None,
            pathname: None,
            message_id: None,
        }
    }

    fn extract_one(events: &[Event]) -> UserFeatureVector {
        let refs: Vec<&Event> = events.iter().collect();
        FeatureExtractor::default().extract("u", &refs, Window::Full)
    }

    #[test]
    fn test_single_event_user() {
        let v = extract_one(&[event("u", "page_view", at(10, 9))]);

        assert_eq!(v.days_active, 1);
        assert_eq!(v.time_span_days, 0.0);
        assert_eq!(v.weeks_active, 1);
        assert_eq!(v.avg_events_per_day, 1.0);
        assert_eq!(v.unique_event_types, 1);
        assert_eq!(v.event_diversity_score, 0.0);
        assert_eq!(v.unique_sessions, 0);
        assert_eq!(v.avg_events_per_session, 0.0);
        assert_eq!(v.max_events_per_session, 0);
        assert_eq!(v.sessions_with_diverse_events, 0);
        assert!(v.values().iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_execution_scenario() {
        let events = vec![
            event("u", "block_run", at(10, 9)),
            event("u", "Run_All", at(10, 10)),
            event("u", "code_run", at(10, 11)),
            event("u", "page_view", at(10, 12)),
            event("u", "canvas_open", at(10, 13)),
        ];
        let v = extract_one(&events);

        assert_eq!(v.execution_event_count, 3);
        assert!((v.execution_event_rate - 0.6).abs() < 1e-12);
        assert_eq!(v.days_active, 1);
        assert_eq!(v.avg_events_per_day, 5.0);
        assert_eq!(v.total_events, 5);
    }

    #[test]
    fn test_execution_keywords_case_insensitive() {
        let events = vec![
            event("u", "EXECUTE_CELL", at(10, 9)),
            event("u", "Agent_Message", at(10, 10)),
            event("u", "Block_Created", at(10, 11)),
            event("u", "login", at(10, 12)),
        ];
        assert_eq!(extract_one(&events).execution_event_count, 3);
    }

    #[test]
    fn test_entropy_uniform_distribution() {
        let names = ["a", "b", "c", "d"];
        let events: Vec<Event> = names
            .iter()
            .enumerate()
            .flat_map(|(i, n)| {
                (0..3).map(move |j| event("u", n, at(10, 0) + Duration::minutes((i * 3 + j) as i64)))
            })
            .collect();
        let v = extract_one(&events);
        assert!((v.event_diversity_score - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_entropy_zero_for_single_type() {
        let events = vec![
            event("u", "open", at(10, 9)),
            event("u", "open", at(11, 9)),
            event("u", "open", at(12, 9)),
        ];
        assert_eq!(extract_one(&events).event_diversity_score, 0.0);
    }

    #[test]
    fn test_sustained_usage_fields() {
        // 2024-01-07 is a Sunday (ISO week 1), 2024-01-08 a Monday (ISO week 2)
        let events = vec![
            event("u", "open", at(7, 12)),
            event("u", "open", at(7, 18)),
            event("u", "open", at(8, 0)),
        ];
        let v = extract_one(&events);
        assert_eq!(v.days_active, 2);
        assert_eq!(v.weeks_active, 2);
        assert!((v.time_span_days - 0.5).abs() < 1e-12);
        assert!((v.avg_events_per_day - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_iso_week_across_year_boundary() {
        // 2024-12-30 and 2025-01-01 share ISO week 2025-W01
        let events = vec![
            event("u", "open", Utc.with_ymd_and_hms(2024, 12, 30, 9, 0, 0).unwrap()),
            event("u", "open", Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap()),
        ];
        let v = extract_one(&events);
        assert_eq!(v.days_active, 2);
        assert_eq!(v.weeks_active, 1);
    }

    #[test]
    fn test_session_fields() {
        let mut events = Vec::new();
        // Session s1: 5 events, 4 distinct names -> diverse
        for (i, name) in ["a", "b", "c", "d", "a"].iter().enumerate() {
            let mut e = event("u", name, at(10, i as u32));
            e.session_id = Some("s1".to_string());
            events.push(e);
        }
        // Session s2: 3 events, 3 distinct names -> not diverse
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            let mut e = event("u", name, at(11, i as u32));
            e.session_id = Some("s2".to_string());
            events.push(e);
        }
        // No session: ignored for per-session stats
        events.push(event("u", "z", at(12, 0)));

        let v = extract_one(&events);
        assert_eq!(v.unique_sessions, 2);
        assert!((v.avg_events_per_session - 4.0).abs() < 1e-12);
        assert_eq!(v.max_events_per_session, 5);
        assert_eq!(v.sessions_with_diverse_events, 1);
    }

    #[test]
    fn test_canvas_and_serious_usage() {
        let mut events = Vec::new();
        for (i, path) in [Some("/c/1"), Some("/c/1"), Some("/c/2"), None].iter().enumerate() {
            let mut e = event("u", "open", at(10, i as u32));
            e.pathname = path.map(str::to_string);
            events.push(e);
        }
        events[0].credits_used = Some(1.5);
        events[1].credits_used = Some(0.5);
        events[2].credit_amount = Some(10.0);
        events[0].tool_name = Some("sql".to_string());
        events[1].tool_name = Some("sql".to_string());
        events[2].tool_name = Some("python".to_string());
        events[3].message_id = Some("m-1".to_string());

        let v = extract_one(&events);
        assert_eq!(v.max_canvas_revisits, 2);
        assert_eq!(v.unique_canvases, 2);
        assert!((v.total_credits_used - 2.0).abs() < 1e-12);
        assert!((v.total_credit_amount - 10.0).abs() < 1e-12);
        assert_eq!(v.tool_invocation_count, 3);
        assert_eq!(v.unique_tools_used, 2);
        assert_eq!(v.message_count, 1);
    }

    #[test]
    fn test_canvas_absent() {
        let v = extract_one(&[event("u", "open", at(10, 9))]);
        assert_eq!(v.max_canvas_revisits, 0);
        assert_eq!(v.unique_canvases, 0);
    }

    #[test]
    fn test_week_one_window_is_inclusive() {
        let start = at(1, 0);
        let events = vec![
            event("u", "open", start),
            event("u", "open", start + Duration::days(3)),
            event("u", "open", start + Duration::days(7)),
            event("u", "open", start + Duration::days(7) + Duration::seconds(1)),
            event("u", "open", start + Duration::days(20)),
        ];

        let extractor = FeatureExtractor::default();
        let full = extractor.extract_cohort(&events, Window::Full);
        let early = extractor.extract_cohort(&events, Window::week_one());

        assert_eq!(full[0].total_events, 5);
        assert_eq!(early[0].total_events, 3);
        assert!((early[0].time_span_days - 7.0).abs() < 1e-12);
        assert_eq!(early[0].window, Window::week_one());
    }

    #[test]
    fn test_window_anchors_on_each_users_first_event() {
        let events = vec![
            event("late", "open", at(20, 0)),
            event("early", "open", at(1, 0)),
            event("late", "open", at(25, 0)),
            event("early", "open", at(25, 0)),
        ];
        let early = FeatureExtractor::default().extract_cohort(&events, Window::week_one());

        assert_eq!(early.len(), 2);
        assert_eq!(early[0].user_id, "early");
        assert_eq!(early[0].total_events, 1);
        assert_eq!(early[1].user_id, "late");
        assert_eq!(early[1].total_events, 2);
    }

    #[test]
    fn test_cohort_sorted_by_user() {
        let events = vec![
            event("charlie", "open", at(1, 0)),
            event("alice", "open", at(1, 0)),
            event("bob", "open", at(1, 0)),
        ];
        let ids: Vec<String> = FeatureExtractor::default()
            .extract_cohort(&events, Window::Full)
            .into_iter()
            .map(|v| v.user_id)
            .collect();
        assert_eq!(ids, vec!["alice", "bob", "charlie"]);
    }

    #[test]
    fn test_shannon_entropy_empty() {
        assert_eq!(shannon_entropy(&BTreeMap::new(), 0, 1e-10), 0.0);
    }

    #[test]
    fn test_week_one_excludes_sub_millisecond_overrun() {
        let start = at(1, 0);
        let events = vec![
            event("u", "open", start),
            event("u", "open", start + Duration::days(7) + Duration::microseconds(1)),
            event("u", "open", start + Duration::days(7) + Duration::microseconds(900)),
        ];
        let early = FeatureExtractor::default().extract_cohort(&events, Window::week_one());

        assert_eq!(early[0].total_events, 1);
        assert_eq!(early[0].time_span_days, 0.0);
    }

    #[test]
    fn test_time_span_keeps_microseconds() {
        let start = at(1, 0);
        let events = vec![
            event("u", "open", start),
            event("u", "open", start + Duration::days(2) + Duration::microseconds(900)),
        ];
        let v = extract_one(&events);
        assert!(v.time_span_days > 2.0);
    }

    /// 40 names with uneven counts; index i appears i % 7 + 1 times
    fn many_named_events(user: &str) -> Vec<Event> {
        let start = at(1, 0);
        let mut events = Vec::new();
        for i in 0..40 {
            for repeat in 0..(i % 7 + 1) {
                let offset = Duration::minutes((i * 10 + repeat) as i64);
                events.push(event(user, &format!("event_{:02}", i), start + offset));
            }
        }
        events
    }

    #[test]
    fn test_entropy_is_bit_identical_across_calls() {
        let events = many_named_events("u");
        let extractor = FeatureExtractor::default();
        let first = extractor.extract_cohort(&events, Window::Full)[0].event_diversity_score;
        for _ in 0..200 {
            let again = extractor.extract_cohort(&events, Window::Full)[0].event_diversity_score;
            assert_eq!(again.to_bits(), first.to_bits());
        }
    }

    #[test]
    fn test_identical_users_get_identical_vectors() {
        let mut events = Vec::new();
        for k in 0..20 {
            events.extend(many_named_events(&format!("user-{:02}", k)));
        }
        let vectors = FeatureExtractor::default().extract_cohort(&events, Window::Full);

        assert_eq!(vectors.len(), 20);
        let bits = vectors[0].event_diversity_score.to_bits();
        assert!(vectors.iter().all(|v| v.event_diversity_score.to_bits() == bits));
    }
}
