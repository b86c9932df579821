//! Success scoring agent
//!
//! Read-only query facade over a scored cohort snapshot. Lookups never mutate
//! the snapshot, so one agent can serve concurrent readers.

use crate::error::SignalError;
use crate::types::{ScoredUser, Tier};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Write as _};

/// Churn risk for a scored user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    HighMayChurn,
    HighNeedsActivation,
    HighNeedsOnboarding,
    CriticalEarlyStage,
    CriticalLowEngagement,
}

impl RiskLevel {
    pub fn label(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Low Risk",
            RiskLevel::Medium => "Medium Risk",
            RiskLevel::HighMayChurn => "High Risk - May Churn",
            RiskLevel::HighNeedsActivation => "High Risk - Needs Activation",
            RiskLevel::HighNeedsOnboarding => "High Risk - Needs Onboarding",
            RiskLevel::CriticalEarlyStage => "Critical Risk - Early Stage",
            RiskLevel::CriticalLowEngagement => "Critical Risk - Low Engagement",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    SustainedUsage,
    ReturnReminder,
    WorkflowDepth,
    ExecutionTutorial,
    FeatureDiscovery,
    SeriousEngagement,
    FreeCreditsTrial,
    ToolShowcase,
    TrialOnboarding,
    WelcomeSeries,
    CasualActivation,
    SocialProof,
    RegularGrowth,
    MultiProject,
    ActiveRetention,
    BetaAccess,
    PowerExcellence,
    AdvisoryInvite,
    CreditConversion,
}

/// A rule-triggered recommendation
///
/// `template` holds `{name}` placeholders filled from `params` by `render`, so
/// callers may substitute their own wording per kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub kind: RecommendationKind,
    pub severity: Severity,
    /// Refines the preceding headline recommendation
    pub follow_up: bool,
    pub template: String,
    pub params: BTreeMap<String, String>,
}

impl Recommendation {
    fn headline(kind: RecommendationKind, severity: Severity, template: &str) -> Self {
        Self {
            kind,
            severity,
            follow_up: false,
            template: template.to_string(),
            params: BTreeMap::new(),
        }
    }

    fn follow_up(kind: RecommendationKind, severity: Severity, template: &str) -> Self {
        Self {
            follow_up: true,
            ..Self::headline(kind, severity, template)
        }
    }

    fn with(mut self, key: &str, value: impl fmt::Display) -> Self {
        self.params.insert(key.to_string(), value.to_string());
        self
    }

    /// Template with every `{name}` replaced by its parameter
    pub fn render(&self) -> String {
        self.params
            .iter()
            .fold(self.template.clone(), |text, (key, value)| {
                text.replace(&format!("{{{}}}", key), value)
            })
    }
}

/// Frozen per-user answer, scores rounded to 2 decimals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub user_id: String,
    pub sustained_usage_score: f64,
    pub workflow_depth_score: f64,
    pub serious_usage_score: f64,
    pub composite_success_score: f64,
    pub tier: Tier,
    pub risk_level: RiskLevel,
    pub days_active: u32,
    pub total_events: u32,
    pub execution_events: u32,
    pub unique_event_types: u32,
    pub total_credits_used: f64,
    pub tool_invocations: u32,
    pub recommendations: Vec<Recommendation>,
}

/// Text report plus the record it was rendered from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    pub report: String,
    pub record: ScoreRecord,
}

/// Median-composite user of one tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepresentativeUser {
    pub tier: Tier,
    pub user_id: String,
    pub composite_success_score: f64,
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Risk decision table, first matching row wins
pub fn risk_level(user: &ScoredUser) -> RiskLevel {
    let days = user.features.days_active;
    let rate = user.features.execution_event_rate;

    match user.tier {
        Tier::Power | Tier::Active => {
            if days >= 7 && rate > 0.3 {
                RiskLevel::Low
            } else if days >= 3 {
                RiskLevel::Medium
            } else {
                RiskLevel::HighMayChurn
            }
        }
        Tier::Regular => {
            if days >= 3 && rate > 0.1 {
                RiskLevel::Medium
            } else {
                RiskLevel::HighNeedsActivation
            }
        }
        Tier::Casual | Tier::Trial => {
            if days == 1 {
                RiskLevel::CriticalEarlyStage
            } else if user.scores.composite_success_score < 2.0 {
                RiskLevel::CriticalLowEngagement
            } else {
                RiskLevel::HighNeedsOnboarding
            }
        }
    }
}

/// Ordered recommendations; threshold rules fire independently, then exactly
/// one tier block, then the credit-conversion rule
pub fn recommendations(user: &ScoredUser) -> Vec<Recommendation> {
    use RecommendationKind as K;
    use Severity::{Critical, Info, Warning};

    let f = &user.features;
    let s = &user.scores;
    let mut recs = Vec::new();

    if s.sustained_usage_score < 2.0 {
        recs.push(
            Recommendation::headline(
                K::SustainedUsage,
                Warning,
                "Increase sustained usage (score {score}): encourage daily logins and consistent workflow building",
            )
            .with("score", format!("{:.2}", s.sustained_usage_score)),
        );
        if f.days_active < 3 {
            recs.push(
                Recommendation::follow_up(
                    K::ReturnReminder,
                    Info,
                    "Active on {days_active} day(s): set up reminder emails to return to the platform",
                )
                .with("days_active", f.days_active),
            );
        }
    }

    if s.workflow_depth_score < 10.0 {
        recs.push(
            Recommendation::headline(
                K::WorkflowDepth,
                Warning,
                "Develop workflow depth (score {score}): introduce advanced features, multiple block types and complex DAGs",
            )
            .with("score", format!("{:.2}", s.workflow_depth_score)),
        );
        if f.execution_event_count == 0 {
            recs.push(Recommendation::follow_up(
                K::ExecutionTutorial,
                Critical,
                "No code blocks executed yet: provide an execution tutorial",
            ));
        } else if f.unique_event_types < 10 {
            recs.push(
                Recommendation::follow_up(
                    K::FeatureDiscovery,
                    Info,
                    "Only {unique_event_types} event types used: show feature discovery prompts for unused block types",
                )
                .with("unique_event_types", f.unique_event_types),
            );
        }
    }

    if s.serious_usage_score < 5.0 {
        recs.push(
            Recommendation::headline(
                K::SeriousEngagement,
                Warning,
                "Boost serious engagement (score {score}): promote credit usage through AI features and advanced compute",
            )
            .with("score", format!("{:.2}", s.serious_usage_score)),
        );
        if f.total_credits_used == 0.0 {
            recs.push(Recommendation::follow_up(
                K::FreeCreditsTrial,
                Info,
                "No credits used: offer a free credits trial to demonstrate premium features",
            ));
        }
        if f.tool_invocation_count < 10 {
            recs.push(
                Recommendation::follow_up(
                    K::ToolShowcase,
                    Info,
                    "{tool_invocations} tool invocation(s): highlight AI assistant capabilities and tool usage examples",
                )
                .with("tool_invocations", f.tool_invocation_count),
            );
        }
    }

    recs.extend(tier_block(user));

    if f.total_credits_used > 0.0 && f.total_credits_used < 1.0 {
        recs.push(
            Recommendation::headline(
                K::CreditConversion,
                Info,
                "Tested credits ({credits} used): offer an upgrade package",
            )
            .with("credits", format!("{:.2}", f.total_credits_used)),
        );
    }

    recs
}

fn tier_block(user: &ScoredUser) -> Vec<Recommendation> {
    use RecommendationKind as K;
    use Severity::{Info, Warning};

    match user.tier {
        Tier::Trial => vec![
            Recommendation::headline(
                K::TrialOnboarding,
                Warning,
                "Trial user focus: provide strong onboarding and quick-win tutorials",
            ),
            Recommendation::follow_up(
                K::WelcomeSeries,
                Info,
                "Send a welcome email series with use case templates",
            ),
        ],
        Tier::Casual => vec![
            Recommendation::headline(
                K::CasualActivation,
                Warning,
                "Casual user activation: show ROI through case studies and template galleries",
            ),
            Recommendation::follow_up(
                K::SocialProof,
                Info,
                "Enable social proof (community showcase, user success stories)",
            ),
        ],
        Tier::Regular => {
            let mut block = vec![Recommendation::headline(
                K::RegularGrowth,
                Info,
                "Regular user growth: introduce collaboration features and advanced workflows",
            )];
            if user.features.unique_canvases < 3 {
                block.push(
                    Recommendation::follow_up(
                        K::MultiProject,
                        Info,
                        "{unique_canvases} canvas(es) so far: encourage multi-project usage with project templates",
                    )
                    .with("unique_canvases", user.features.unique_canvases),
                );
            }
            block
        }
        Tier::Active => vec![
            Recommendation::headline(
                K::ActiveRetention,
                Info,
                "Active user retention: offer premium features preview and team plans",
            ),
            Recommendation::follow_up(K::BetaAccess, Info, "Provide beta access to new features"),
        ],
        Tier::Power => vec![
            Recommendation::headline(
                K::PowerExcellence,
                Info,
                "Power user excellence: maintain engagement with exclusive content and direct support",
            ),
            Recommendation::follow_up(
                K::AdvisoryInvite,
                Info,
                "Invite to the advisory board or user research programs",
            ),
        ],
    }
}

/// Query facade over one scored cohort
#[derive(Debug, Clone, Default)]
pub struct SuccessScoringAgent {
    users: Vec<ScoredUser>,
    index: HashMap<String, usize>,
}

impl SuccessScoringAgent {
    pub fn new(users: Vec<ScoredUser>) -> Self {
        let index = users
            .iter()
            .enumerate()
            .map(|(i, u)| (u.user_id().to_string(), i))
            .collect();
        Self { users, index }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn user(&self, user_id: &str) -> Option<&ScoredUser> {
        self.index.get(user_id).map(|&i| &self.users[i])
    }

    /// Scores, tier, risk and recommendations for one user
    pub fn get_user_scores(&self, user_id: &str) -> Result<ScoreRecord, SignalError> {
        let user = self
            .user(user_id)
            .ok_or_else(|| SignalError::UserNotFound(user_id.to_string()))?;
        Ok(Self::record(user))
    }

    /// Records for the known ids, in request order; unknown ids are omitted
    pub fn batch_scores<S: AsRef<str>>(&self, user_ids: &[S]) -> Vec<ScoreRecord> {
        user_ids
            .iter()
            .filter_map(|id| self.user(id.as_ref()))
            .map(Self::record)
            .collect()
    }

    /// Formatted text report for one user
    pub fn summarize(&self, user_id: &str) -> Result<UserSummary, SignalError> {
        let record = self.get_user_scores(user_id)?;
        Ok(UserSummary {
            report: render_report(&record),
            record,
        })
    }

    /// The median-composite user of each non-empty tier, highest tier first
    pub fn representative_users(&self) -> Vec<RepresentativeUser> {
        Tier::ALL
            .iter()
            .filter_map(|&tier| {
                let mut members: Vec<&ScoredUser> =
                    self.users.iter().filter(|u| u.tier == tier).collect();
                if members.is_empty() {
                    return None;
                }
                members.sort_by(|a, b| {
                    a.scores
                        .composite_success_score
                        .total_cmp(&b.scores.composite_success_score)
                        .then_with(|| a.user_id().cmp(b.user_id()))
                });
                let median = members[members.len() / 2];
                Some(RepresentativeUser {
                    tier,
                    user_id: median.user_id().to_string(),
                    composite_success_score: median.scores.composite_success_score,
                })
            })
            .collect()
    }

    fn record(user: &ScoredUser) -> ScoreRecord {
        let f = &user.features;
        let s = &user.scores;
        ScoreRecord {
            user_id: user.user_id().to_string(),
            sustained_usage_score: round2(s.sustained_usage_score),
            workflow_depth_score: round2(s.workflow_depth_score),
            serious_usage_score: round2(s.serious_usage_score),
            composite_success_score: round2(s.composite_success_score),
            tier: user.tier,
            risk_level: risk_level(user),
            days_active: f.days_active,
            total_events: f.total_events,
            execution_events: f.execution_event_count,
            unique_event_types: f.unique_event_types,
            total_credits_used: round2(f.total_credits_used),
            tool_invocations: f.tool_invocation_count,
            recommendations: recommendations(user),
        }
    }
}

fn render_report(r: &ScoreRecord) -> String {
    let rule = "=".repeat(72);
    let mut out = String::new();

    // writing to a String cannot fail
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out, "SUCCESS SCORING: {}", r.user_id);
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out, "Scores");
    let _ = writeln!(out, "  Sustained usage:    {:8.2}", r.sustained_usage_score);
    let _ = writeln!(out, "  Workflow depth:     {:8.2}", r.workflow_depth_score);
    let _ = writeln!(out, "  Serious engagement: {:8.2}", r.serious_usage_score);
    let _ = writeln!(out, "  Composite:          {:8.2}", r.composite_success_score);
    let _ = writeln!(out, "Classification");
    let _ = writeln!(out, "  Tier:       {}", r.tier);
    let _ = writeln!(out, "  Risk level: {}", r.risk_level);
    let _ = writeln!(out, "Key metrics");
    let _ = writeln!(out, "  Days active:        {:5}", r.days_active);
    let _ = writeln!(out, "  Total events:       {:5}", r.total_events);
    let _ = writeln!(out, "  Execution events:   {:5}", r.execution_events);
    let _ = writeln!(out, "  Unique event types: {:5}", r.unique_event_types);
    let _ = writeln!(out, "  Credits used:       {:8.2}", r.total_credits_used);
    let _ = writeln!(out, "  Tool invocations:   {:5}", r.tool_invocations);
    let _ = writeln!(out, "Recommendations");
    for rec in &r.recommendations {
        let indent = if rec.follow_up { "    -> " } else { "  * " };
        let _ = writeln!(out, "{}{}", indent, rec.render());
    }
    let _ = write!(out, "{}", rule);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CompositeScore, UserFeatureVector, Window};
    use pretty_assertions::assert_eq;

    fn user(id: &str, tier: Tier, composite: f64) -> ScoredUser {
        ScoredUser {
            features: UserFeatureVector {
                user_id: id.to_string(),
                window: Window::Full,
                days_active: 10,
                time_span_days: 30.0,
                weeks_active: 4,
                avg_events_per_day: 5.0,
                unique_event_types: 12,
                event_diversity_score: 3.0,
                total_events: 50,
                execution_event_count: 20,
                execution_event_rate: 0.4,
                max_canvas_revisits: 3,
                unique_canvases: 5,
                unique_sessions: 6,
                avg_events_per_session: 8.3,
                max_events_per_session: 15,
                sessions_with_diverse_events: 4,
                total_credits_used: 12.0,
                total_credit_amount: 20.0,
                tool_invocation_count: 30,
                unique_tools_used: 4,
                message_count: 10,
            },
            scores: CompositeScore {
                sustained_usage_score: 8.0,
                workflow_depth_score: 15.0,
                serious_usage_score: 9.0,
                composite_success_score: composite,
            },
            tier,
        }
    }

    fn kinds(recs: &[Recommendation]) -> Vec<RecommendationKind> {
        recs.iter().map(|r| r.kind).collect()
    }

    #[test]
    fn test_risk_table_top_tiers() {
        let mut u = user("a", Tier::Power, 20.0);
        assert_eq!(risk_level(&u), RiskLevel::Low);

        u.features.execution_event_rate = 0.3;
        assert_eq!(risk_level(&u), RiskLevel::Medium);

        u.tier = Tier::Active;
        u.features.days_active = 2;
        assert_eq!(risk_level(&u), RiskLevel::HighMayChurn);
    }

    #[test]
    fn test_risk_table_regular() {
        let mut u = user("a", Tier::Regular, 10.0);
        u.features.days_active = 3;
        u.features.execution_event_rate = 0.11;
        assert_eq!(risk_level(&u), RiskLevel::Medium);

        u.features.execution_event_rate = 0.1;
        assert_eq!(risk_level(&u), RiskLevel::HighNeedsActivation);
    }

    #[test]
    fn test_risk_table_low_tiers() {
        let mut u = user("a", Tier::Trial, 1.0);
        u.features.days_active = 1;
        assert_eq!(risk_level(&u), RiskLevel::CriticalEarlyStage);

        u.features.days_active = 2;
        assert_eq!(risk_level(&u), RiskLevel::CriticalLowEngagement);

        u.tier = Tier::Casual;
        u.scores.composite_success_score = 2.0;
        assert_eq!(risk_level(&u), RiskLevel::HighNeedsOnboarding);
    }

    #[test]
    fn test_healthy_power_user_gets_only_tier_block() {
        let recs = recommendations(&user("a", Tier::Power, 20.0));
        assert_eq!(
            kinds(&recs),
            vec![RecommendationKind::PowerExcellence, RecommendationKind::AdvisoryInvite]
        );
    }

    #[test]
    fn test_rules_fire_independently() {
        let mut u = user("a", Tier::Trial, 0.5);
        u.scores = CompositeScore {
            sustained_usage_score: 0.7,
            workflow_depth_score: 2.0,
            serious_usage_score: 0.0,
            composite_success_score: 0.5,
        };
        u.features.days_active = 1;
        u.features.execution_event_count = 0;
        u.features.total_credits_used = 0.0;
        u.features.tool_invocation_count = 0;

        let recs = recommendations(&u);
        assert_eq!(
            kinds(&recs),
            vec![
                RecommendationKind::SustainedUsage,
                RecommendationKind::ReturnReminder,
                RecommendationKind::WorkflowDepth,
                RecommendationKind::ExecutionTutorial,
                RecommendationKind::SeriousEngagement,
                RecommendationKind::FreeCreditsTrial,
                RecommendationKind::ToolShowcase,
                RecommendationKind::TrialOnboarding,
                RecommendationKind::WelcomeSeries,
            ]
        );
        assert_eq!(recs[3].severity, Severity::Critical);
        assert!(recs[3].follow_up);
    }

    #[test]
    fn test_regular_block_and_credit_conversion() {
        let mut u = user("a", Tier::Regular, 10.0);
        u.features.unique_canvases = 2;
        u.features.total_credits_used = 0.5;

        let recs = recommendations(&u);
        assert_eq!(
            kinds(&recs),
            vec![
                RecommendationKind::RegularGrowth,
                RecommendationKind::MultiProject,
                RecommendationKind::CreditConversion,
            ]
        );
        assert_eq!(recs[2].render(), "Tested credits (0.50 used): offer an upgrade package");
    }

    #[test]
    fn test_feature_discovery_when_executions_exist() {
        let mut u = user("a", Tier::Casual, 3.0);
        u.scores.workflow_depth_score = 5.0;
        u.features.unique_event_types = 4;
        let recs = recommendations(&u);
        assert_eq!(recs[1].kind, RecommendationKind::FeatureDiscovery);
        assert_eq!(
            recs[1].render(),
            "Only 4 event types used: show feature discovery prompts for unused block types"
        );
    }

    #[test]
    fn test_get_user_scores_rounds() {
        let mut u = user("a", Tier::Active, 12.3456);
        u.features.total_credits_used = 1.005_1;
        let agent = SuccessScoringAgent::new(vec![u]);

        let record = agent.get_user_scores("a").unwrap();
        assert_eq!(record.composite_success_score, 12.35);
        assert_eq!(record.total_credits_used, 1.01);
        assert_eq!(record.tier, Tier::Active);
        assert_eq!(record.risk_level, RiskLevel::Low);
    }

    #[test]
    fn test_unknown_user_not_found() {
        let agent = SuccessScoringAgent::new(vec![user("a", Tier::Power, 1.0)]);
        assert!(matches!(
            agent.get_user_scores("missing"),
            Err(SignalError::UserNotFound(id)) if id == "missing"
        ));
        assert!(agent.summarize("missing").is_err());
    }

    #[test]
    fn test_batch_omits_unknown_ids() {
        let agent = SuccessScoringAgent::new(vec![
            user("a", Tier::Power, 20.0),
            user("b", Tier::Casual, 3.0),
        ]);
        let records = agent.batch_scores(&["b", "nope", "a"]);
        let ids: Vec<&str> = records.iter().map(|r| r.user_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert!(agent.batch_scores::<&str>(&[]).is_empty());
    }

    #[test]
    fn test_summarize_report() {
        let agent = SuccessScoringAgent::new(vec![user("a", Tier::Power, 20.0)]);
        let summary = agent.summarize("a").unwrap();
        assert!(summary.report.contains("SUCCESS SCORING: a"));
        assert!(summary.report.contains("Tier:       Power Users"));
        assert!(summary.report.contains("Risk level: Low Risk"));
        assert!(summary.report.contains("-> Invite to the advisory board"));
        assert_eq!(summary.record, agent.get_user_scores("a").unwrap());
    }

    #[test]
    fn test_representative_users_take_median() {
        let agent = SuccessScoringAgent::new(vec![
            user("p1", Tier::Power, 30.0),
            user("r1", Tier::Regular, 9.0),
            user("r2", Tier::Regular, 7.0),
            user("r3", Tier::Regular, 8.0),
        ]);
        let reps = agent.representative_users();
        assert_eq!(
            reps,
            vec![
                RepresentativeUser {
                    tier: Tier::Power,
                    user_id: "p1".to_string(),
                    composite_success_score: 30.0,
                },
                RepresentativeUser {
                    tier: Tier::Regular,
                    user_id: "r3".to_string(),
                    composite_success_score: 8.0,
                },
            ]
        );
    }
}
