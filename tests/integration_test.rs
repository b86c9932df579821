//! Integration test: export parsing, cohort run, agent queries, churn training, payload encoding.

use chrono::{Duration, TimeZone, Utc};
use cohort_signals::{
    agent::RiskLevel,
    config::PipelineConfig,
    encoder::{CohortEncoder, PAYLOAD_VERSION},
    CohortPipeline, SignalError, Tier,
};
use pretty_assertions::assert_eq;

/// `users` users; user k is active on k days with k events per day
fn export(users: u32) -> String {
    let start = Utc.with_ymd_and_hms(2024, 4, 1, 9, 0, 0).unwrap();
    let mut lines = Vec::new();
    for k in 1..=users {
        for day in 0..k {
            for e in 0..k {
                let ts = start + Duration::days(i64::from(day)) + Duration::minutes(i64::from(e));
                let name = match e % 3 {
                    0 => "block_run",
                    1 => "chart_created",
                    _ => "agent_reply",
                };
                lines.push(format!(
                    r#"{{"person_id": "user-{:02}", "timestamp": "{}", "event": "{}", "prop_$session_id": "s{}-{}", "prop_credits_used": {}}}"#,
                    k,
                    ts.to_rfc3339(),
                    name,
                    k,
                    day,
                    e
                ));
            }
        }
    }
    lines.join("\n")
}

#[test]
fn pipeline_run_is_deterministic() {
    let input = export(12);
    let pipeline = CohortPipeline::default();
    let a = pipeline.run_json(&input).unwrap();
    let b = pipeline.run_json(&input).unwrap();
    assert_eq!(a.scored, b.scored);
    assert_eq!(a.churn_dataset, b.churn_dataset);
    assert_eq!(a.tier_summary, b.tier_summary);
}

#[test]
fn churn_labels_follow_final_tier() {
    let run = CohortPipeline::default().run_json(&export(20)).unwrap();
    assert_eq!(run.churn_dataset.len(), 20);
    for record in &run.churn_dataset.records {
        let expected = matches!(record.final_tier, Tier::Trial | Tier::Casual);
        assert_eq!(record.churned == 1, expected, "user {}", record.user_id);
    }
    // bottom two quintiles of twenty distinct scores
    assert!((run.churn_dataset.churn_rate() - 0.4).abs() < 1e-9);
}

#[test]
fn agent_answers_queries() {
    let run = CohortPipeline::default().run_json(&export(10)).unwrap();
    let agent = run.agent();

    let top = agent.get_user_scores("user-10").unwrap();
    assert_eq!(top.tier, Tier::Power);
    assert_eq!(top.risk_level, RiskLevel::Low);

    let bottom = agent.get_user_scores("user-01").unwrap();
    assert_eq!(bottom.tier, Tier::Trial);
    assert!(!bottom.recommendations.is_empty());

    assert!(matches!(
        agent.get_user_scores("nobody"),
        Err(SignalError::UserNotFound(_))
    ));

    let batch = agent.batch_scores(&["user-03", "nobody", "user-07"]);
    let ids: Vec<&str> = batch.iter().map(|r| r.user_id.as_str()).collect();
    assert_eq!(ids, vec!["user-03", "user-07"]);

    let summary = agent.summarize("user-05").unwrap();
    assert!(summary.report.contains("user-05"));
}

#[test]
fn churn_training_on_mixed_cohort() {
    let pipeline = CohortPipeline::default();
    let run = pipeline.run_json(&export(40)).unwrap();
    let report = pipeline.train_churn(&run).unwrap();

    let comparison = &report.comparison;
    assert_eq!(comparison.dataset_size, 40);
    assert_eq!(comparison.evaluations.len(), 2);
    assert!(comparison
        .evaluations
        .iter()
        .any(|e| e.model == comparison.best_model));

    for evaluation in &comparison.evaluations {
        assert_eq!(evaluation.train_size + evaluation.test_size, 40);
        assert!(evaluation.roc_auc.is_some());
        assert!((0.0..=1.0).contains(&evaluation.test_accuracy));
    }

    assert!(!report.predictions.is_empty());
    assert!(report
        .predictions
        .iter()
        .all(|p| (0.0..=1.0).contains(&p.probability)));
}

#[test]
fn payloads_round_trip_through_json() {
    let pipeline = CohortPipeline::default();
    let run = pipeline.run_json(&export(10)).unwrap();
    let encoder = CohortEncoder::with_instance_id("it".to_string());

    let json = encoder.encode_to_json(&run).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["payload_version"], PAYLOAD_VERSION);
    assert_eq!(value["users"].as_array().unwrap().len(), 10);

    let churn = encoder.encode_churn(&run.churn_dataset, None).unwrap();
    assert_eq!(churn.rows.len(), 10);
    assert!(churn.columns.iter().all(|c| c.starts_with("w1_")));
}

#[test]
fn config_round_trips() {
    let config = PipelineConfig::default();
    let parsed = PipelineConfig::from_json(&config.to_json().unwrap()).unwrap();
    assert_eq!(parsed.churn.seed, config.churn.seed);
    assert_eq!(parsed.features.window_days, config.features.window_days);

    let partial = PipelineConfig::from_json(r#"{"churn": {"seed": 7}}"#).unwrap();
    assert_eq!(partial.churn.seed, 7);
    assert_eq!(partial.churn.test_fraction, 0.2);
}
