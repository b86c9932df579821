//! Cohort insights
//!
//! Secondary analyses over a scored cohort: credit-usage bands, workflow
//! categories and event transitions, and early-behavior correlations.

use crate::features::group_by_user;
use crate::tiers::quantile_sorted;
use crate::types::{Event, ScoredUser, Tier};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Total-credits band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditBand {
    Zero,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl CreditBand {
    pub const ALL: [CreditBand; 5] = [
        CreditBand::Zero,
        CreditBand::Low,
        CreditBand::Medium,
        CreditBand::High,
        CreditBand::VeryHigh,
    ];

    pub fn from_credits(credits: f64) -> Self {
        if credits <= 0.0 {
            CreditBand::Zero
        } else if credits < 1.0 {
            CreditBand::Low
        } else if credits < 10.0 {
            CreditBand::Medium
        } else if credits < 50.0 {
            CreditBand::High
        } else {
            CreditBand::VeryHigh
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CreditBand::Zero => "Zero Credits",
            CreditBand::Low => "Low (<1)",
            CreditBand::Medium => "Medium (1-10)",
            CreditBand::High => "High (10-50)",
            CreditBand::VeryHigh => "Very High (50+)",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditBandSummary {
    pub band: CreditBand,
    pub user_count: usize,
    pub composite_mean: f64,
    pub composite_median: f64,
    pub days_active_mean: f64,
    pub tool_invocation_mean: f64,
    /// Share of the band's users in each tier (0-1)
    pub tier_shares: BTreeMap<Tier, f64>,
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Per-band statistics for every band that has users, lowest band first
pub fn credit_bands(users: &[ScoredUser]) -> Vec<CreditBandSummary> {
    let mut grouped: BTreeMap<CreditBand, Vec<&ScoredUser>> = BTreeMap::new();
    for user in users {
        grouped
            .entry(CreditBand::from_credits(user.features.total_credits_used))
            .or_default()
            .push(user);
    }

    grouped
        .into_iter()
        .map(|(band, members)| {
            let n = members.len() as f64;
            let mut composites: Vec<f64> = members
                .iter()
                .map(|u| u.scores.composite_success_score)
                .collect();
            composites.sort_by(|a, b| a.total_cmp(b));

            let mut tier_shares = BTreeMap::new();
            for user in &members {
                *tier_shares.entry(user.tier).or_insert(0.0) += 1.0 / n;
            }

            CreditBandSummary {
                band,
                user_count: members.len(),
                composite_mean: mean(&composites),
                composite_median: quantile_sorted(&composites, 0.5),
                days_active_mean: mean(
                    &members
                        .iter()
                        .map(|u| u.features.days_active as f64)
                        .collect::<Vec<_>>(),
                ),
                tool_invocation_mean: mean(
                    &members
                        .iter()
                        .map(|u| u.features.tool_invocation_count as f64)
                        .collect::<Vec<_>>(),
                ),
                tier_shares,
            }
        })
        .collect()
}

/// Keyword family of an event name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowCategory {
    DataLoading,
    Transformation,
    Analysis,
    Visualization,
    Model,
    Execution,
    Export,
    Other,
}

/// Checked in order; the first family with a matching keyword wins
const CATEGORY_KEYWORDS: [(WorkflowCategory, &[&str]); 7] = [
    (WorkflowCategory::DataLoading, &["load", "import", "read", "fetch", "query"]),
    (WorkflowCategory::Transformation, &["transform", "clean", "process", "filter", "merge"]),
    (WorkflowCategory::Analysis, &["analyze", "compute", "calculate", "aggregate"]),
    (WorkflowCategory::Visualization, &["plot", "chart", "visualize", "graph"]),
    (WorkflowCategory::Model, &["train", "predict", "model", "fit"]),
    (WorkflowCategory::Execution, &["run", "execute", "block_run", "agent_"]),
    (WorkflowCategory::Export, &["export", "save", "write", "output"]),
];

impl WorkflowCategory {
    pub fn categorize(event_name: &str) -> Self {
        let lower = event_name.to_lowercase();
        CATEGORY_KEYWORDS
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
            .map_or(WorkflowCategory::Other, |(category, _)| *category)
    }
}

/// Workflow categories one user touched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowProfile {
    pub user_id: String,
    pub categories: BTreeSet<WorkflowCategory>,
}

impl WorkflowProfile {
    /// Categories other than `Other`
    pub fn category_count(&self) -> usize {
        self.categories
            .iter()
            .filter(|c| **c != WorkflowCategory::Other)
            .count()
    }

    /// Executed something and touched at least two named categories
    pub fn is_end_to_end(&self) -> bool {
        self.categories.contains(&WorkflowCategory::Execution) && self.category_count() >= 2
    }
}

/// One profile per user present in `events`, ordered by user id
pub fn workflow_profiles(events: &[Event]) -> Vec<WorkflowProfile> {
    group_by_user(events)
        .into_iter()
        .map(|(user_id, user_events)| WorkflowProfile {
            user_id: user_id.to_string(),
            categories: user_events
                .iter()
                .map(|e| WorkflowCategory::categorize(&e.name))
                .collect(),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: String,
    pub to: String,
    pub count: usize,
}

/// Most frequent consecutive event-name pairs
///
/// Only users in `user_ids` (all users when `None`) with at least three events
/// contribute. Ties are ordered by the pair itself.
pub fn top_transitions(
    events: &[Event],
    user_ids: Option<&HashSet<String>>,
    limit: usize,
) -> Vec<Transition> {
    let mut counts: HashMap<(&str, &str), usize> = HashMap::new();

    for (user_id, mut user_events) in group_by_user(events) {
        if user_ids.is_some_and(|ids| !ids.contains(user_id)) || user_events.len() < 3 {
            continue;
        }
        user_events.sort_by_key(|e| e.timestamp);
        for pair in user_events.windows(2) {
            *counts.entry((pair[0].name.as_str(), pair[1].name.as_str())).or_insert(0) += 1;
        }
    }

    let mut ranked: Vec<((&str, &str), usize)> = counts.into_iter().collect();
    ranked.sort_by(|(pa, ca), (pb, cb)| cb.cmp(ca).then_with(|| pa.cmp(pb)));
    ranked
        .into_iter()
        .take(limit)
        .map(|((from, to), count)| Transition {
            from: from.to_string(),
            to: to.to_string(),
            count,
        })
        .collect()
}

/// Pearson correlation; `None` for fewer than two points or zero variance
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return None;
    }
    let (xs, ys) = (&xs[..n], &ys[..n]);
    let (mx, my) = (mean(xs), mean(ys));

    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        cov += (x - mx) * (y - my);
        vx += (x - mx).powi(2);
        vy += (y - my).powi(2);
    }
    if vx == 0.0 || vy == 0.0 {
        return None;
    }
    let r = cov / (vx.sqrt() * vy.sqrt());
    r.is_finite().then(|| r.clamp(-1.0, 1.0))
}

/// Average ranks (1-based), ties sharing their mean rank
fn ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut out = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        let rank = (start + end + 1) as f64 / 2.0;
        for &i in &order[start..end] {
            out[i] = rank;
        }
        start = end;
    }
    out
}

/// Spearman rank correlation
pub fn spearman(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let n = xs.len().min(ys.len());
    pearson(&ranks(&xs[..n]), &ranks(&ys[..n]))
}

/// Early behaviors correlated against success
pub const EARLY_BEHAVIORS: [&str; 8] = [
    "avg_events_per_day",
    "unique_event_types",
    "execution_event_rate",
    "event_diversity_score",
    "tool_invocation_count",
    "sessions_with_diverse_events",
    "max_canvas_revisits",
    "unique_canvases",
];

pub const SUCCESS_METRICS: [&str; 4] = [
    "composite_success_score",
    "days_active",
    "weeks_active",
    "total_credits_used",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correlation {
    pub behavior: String,
    pub success_metric: String,
    pub pearson: Option<f64>,
    pub spearman: Option<f64>,
    pub sample_size: usize,
}

fn metric(user: &ScoredUser, name: &str) -> Option<f64> {
    let f = &user.features;
    Some(match name {
        "avg_events_per_day" => f.avg_events_per_day,
        "unique_event_types" => f.unique_event_types as f64,
        "execution_event_rate" => f.execution_event_rate,
        "event_diversity_score" => f.event_diversity_score,
        "tool_invocation_count" => f.tool_invocation_count as f64,
        "sessions_with_diverse_events" => f.sessions_with_diverse_events as f64,
        "max_canvas_revisits" => f.max_canvas_revisits as f64,
        "unique_canvases" => f.unique_canvases as f64,
        "composite_success_score" => user.scores.composite_success_score,
        "days_active" => f.days_active as f64,
        "weeks_active" => f.weeks_active as f64,
        "total_credits_used" => f.total_credits_used,
        _ => return None,
    })
}

/// Correlations over users observed for at least `min_span_days`
///
/// Pairs with `min_samples` or fewer users are skipped.
pub fn early_behavior_correlations(
    users: &[ScoredUser],
    min_span_days: f64,
    min_samples: usize,
) -> Vec<Correlation> {
    let sustained: Vec<&ScoredUser> = users
        .iter()
        .filter(|u| u.features.time_span_days >= min_span_days)
        .collect();
    if sustained.len() <= min_samples {
        return Vec::new();
    }

    let mut out = Vec::new();
    for behavior in EARLY_BEHAVIORS {
        let xs: Vec<f64> = sustained.iter().filter_map(|u| metric(u, behavior)).collect();
        for success in SUCCESS_METRICS {
            let ys: Vec<f64> = sustained.iter().filter_map(|u| metric(u, success)).collect();
            out.push(Correlation {
                behavior: behavior.to_string(),
                success_metric: success.to_string(),
                pearson: pearson(&xs, &ys),
                spearman: spearman(&xs, &ys),
                sample_size: xs.len(),
            });
        }
    }
    out
}
