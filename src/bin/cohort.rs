//! Cohort CLI - Command-line interface for Cohort Signals
//!
//! Commands:
//! - score: Score a cohort and emit features, tiers and thresholds
//! - churn: Build the week-1 churn dataset and train churn models
//! - query: Look up users through the success scoring agent
//! - insights: Credit bands, workflow transitions and early-behavior correlations
//! - validate: Check an export's columns and row usability
//! - config: Print the effective pipeline configuration

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use cohort_signals::agent::SuccessScoringAgent;
use cohort_signals::config::PipelineConfig;
use cohort_signals::encoder::CohortEncoder;
use cohort_signals::insights::{
    credit_bands, early_behavior_correlations, top_transitions, workflow_profiles,
    CreditBandSummary, Correlation, Transition,
};
use cohort_signals::normalizer::{EventNormalizer, NormalizationReport};
use cohort_signals::pipeline::{CohortPipeline, CohortRun};
use cohort_signals::schema::{ColumnPresence, RawEvent, RawEventAdapter, SCHEMA_VERSION};
use cohort_signals::types::Tier;
use cohort_signals::{logging, SignalError, PRODUCER_NAME, VERSION};

/// Cohort - success scoring, tiering and early churn prediction for product event logs
#[derive(Parser)]
#[command(name = "cohort")]
#[command(version = VERSION)]
#[command(about = "Score users from product event exports", long_about = None)]
struct Cli {
    /// Pipeline configuration file (JSON); defaults are used when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level, overriding the configuration (RUST_LOG still wins)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct InputArgs {
    /// Input file path (use - for stdin)
    #[arg(short, long)]
    input: PathBuf,

    /// Input format
    #[arg(long, default_value = "ndjson")]
    input_format: InputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Score a cohort: features, composite scores, tiers and thresholds
    Score {
        #[command(flatten)]
        input: InputArgs,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Build the week-1 churn dataset and train churn models
    Churn {
        #[command(flatten)]
        input: InputArgs,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Export the labelled dataset without training
        #[arg(long)]
        dataset_only: bool,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Look up users through the success scoring agent
    Query {
        #[command(flatten)]
        input: InputArgs,

        /// User ids to look up; unknown ids are skipped when several are given
        #[arg(short, long = "user")]
        users: Vec<String>,

        /// Print the formatted text report instead of JSON
        #[arg(long)]
        report: bool,

        /// Look up the median user of every tier
        #[arg(long)]
        representatives: bool,
    },

    /// Credit bands, top event transitions and early-behavior correlations
    Insights {
        #[command(flatten)]
        input: InputArgs,

        /// Number of event transitions to report
        #[arg(long, default_value = "30")]
        top: usize,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Check an export's columns and how many rows are usable
    Validate {
        #[command(flatten)]
        input: InputArgs,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective pipeline configuration
    Config,
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one event per line)
    Ndjson,
    /// JSON array of events
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// Compact JSON
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CohortCliError> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_json(&fs::read_to_string(path)?)?,
        None => PipelineConfig::default(),
    };
    if let Some(level) = cli.log_level {
        config.log.level = level;
    }
    if cli.log_json {
        config.log.json = true;
    }
    logging::init(&config.log);

    match cli.command {
        Commands::Score {
            input,
            output,
            output_format,
        } => cmd_score(config, &input, &output, &output_format),

        Commands::Churn {
            input,
            output,
            dataset_only,
            output_format,
        } => cmd_churn(config, &input, &output, dataset_only, &output_format),

        Commands::Query {
            input,
            users,
            report,
            representatives,
        } => cmd_query(config, &input, &users, report, representatives),

        Commands::Insights {
            input,
            top,
            output_format,
        } => cmd_insights(config, &input, top, &output_format),

        Commands::Validate { input, json } => cmd_validate(config, &input, json),

        Commands::Config => {
            println!("{}", config.to_json()?);
            Ok(())
        }
    }
}

fn read_events(input: &InputArgs) -> Result<Vec<RawEvent>, CohortCliError> {
    let data = if input.input.to_string_lossy() == "-" {
        if atty::is(atty::Stream::Stdin) {
            return Err(CohortCliError::InteractiveStdin);
        }
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(&input.input)?
    };

    let events = match input.input_format {
        InputFormat::Ndjson => RawEventAdapter::parse_ndjson(&data)?,
        InputFormat::Json => RawEventAdapter::parse_array(&data)?,
    };
    if events.is_empty() {
        return Err(CohortCliError::NoEvents);
    }
    Ok(events)
}

fn write_output(output: &Path, data: &str) -> Result<(), CohortCliError> {
    if output.to_string_lossy() == "-" {
        println!("{}", data);
    } else {
        fs::write(output, data)?;
    }
    Ok(())
}

fn format_value<T: Serialize>(value: &T, format: &OutputFormat) -> Result<String, CohortCliError> {
    Ok(match format {
        OutputFormat::JsonPretty => serde_json::to_string_pretty(value)?,
        OutputFormat::Json | OutputFormat::Ndjson => serde_json::to_string(value)?,
    })
}

fn format_lines<T: Serialize>(rows: &[T]) -> Result<String, CohortCliError> {
    let lines = rows
        .iter()
        .map(serde_json::to_string)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(lines.join("\n"))
}

fn cmd_score(
    config: PipelineConfig,
    input: &InputArgs,
    output: &Path,
    output_format: &OutputFormat,
) -> Result<(), CohortCliError> {
    let events = read_events(input)?;
    let run = CohortPipeline::new(config)?.run(&events)?;
    let payload = CohortEncoder::new().encode(&run)?;

    let data = match output_format {
        OutputFormat::Ndjson => format_lines(&payload.users)?,
        other => format_value(&payload, other)?,
    };
    write_output(output, &data)
}

fn cmd_churn(
    config: PipelineConfig,
    input: &InputArgs,
    output: &Path,
    dataset_only: bool,
    output_format: &OutputFormat,
) -> Result<(), CohortCliError> {
    let events = read_events(input)?;
    let pipeline = CohortPipeline::new(config)?;
    let run = pipeline.run(&events)?;

    let report = if dataset_only {
        None
    } else {
        Some(pipeline.train_churn(&run)?)
    };
    let payload = CohortEncoder::new().encode_churn(&run.churn_dataset, report.as_ref())?;

    let data = match output_format {
        OutputFormat::Ndjson => format_lines(&payload.rows)?,
        other => format_value(&payload, other)?,
    };
    write_output(output, &data)
}

fn cmd_query(
    config: PipelineConfig,
    input: &InputArgs,
    users: &[String],
    report: bool,
    representatives: bool,
) -> Result<(), CohortCliError> {
    let events = read_events(input)?;
    let run = CohortPipeline::new(config)?.run(&events)?;
    let agent = SuccessScoringAgent::new(run.scored);

    let mut ids: Vec<String> = users.to_vec();
    if representatives {
        ids.extend(agent.representative_users().into_iter().map(|r| r.user_id));
    }
    if ids.is_empty() {
        return Err(CohortCliError::NoUsers);
    }

    if report {
        for id in &ids {
            println!("{}", agent.summarize(id)?.report);
        }
        return Ok(());
    }

    if ids.len() == 1 {
        let record = agent.get_user_scores(&ids[0])?;
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        let records = agent.batch_scores(&ids);
        println!("{}", serde_json::to_string_pretty(&records)?);
    }
    Ok(())
}

const CORRELATION_MIN_SAMPLES: usize = 10;

#[derive(Serialize)]
struct InsightsReport {
    credit_bands: Vec<CreditBandSummary>,
    end_to_end_users: usize,
    top_transitions: Vec<Transition>,
    correlations: Vec<Correlation>,
}

fn cmd_insights(
    config: PipelineConfig,
    input: &InputArgs,
    top: usize,
    output_format: &OutputFormat,
) -> Result<(), CohortCliError> {
    let events = read_events(input)?;
    let window_days = config.features.window_days;
    let run = CohortPipeline::new(config)?.run(&events)?;

    let report = build_insights(&run, window_days, top);
    println!("{}", format_value(&report, output_format)?);
    Ok(())
}

/// Correlations only use users observed for at least the early window
fn build_insights(run: &CohortRun, window_days: f64, top: usize) -> InsightsReport {
    let engaged: HashSet<String> = run
        .scored
        .iter()
        .filter(|u| u.tier >= Tier::Active)
        .map(|u| u.user_id().to_string())
        .collect();
    let engaged_events: Vec<_> = run
        .events
        .iter()
        .filter(|e| engaged.contains(&e.user_id))
        .cloned()
        .collect();

    InsightsReport {
        credit_bands: credit_bands(&run.scored),
        end_to_end_users: workflow_profiles(&engaged_events)
            .iter()
            .filter(|p| p.is_end_to_end())
            .count(),
        top_transitions: top_transitions(&run.events, Some(&engaged), top),
        correlations: early_behavior_correlations(&run.scored, window_days, CORRELATION_MIN_SAMPLES),
    }
}

#[derive(Serialize)]
struct ValidationReport {
    schema: String,
    columns: ColumnPresence,
    missing_required: Vec<String>,
    normalization: NormalizationReport,
    users: usize,
}

fn cmd_validate(config: PipelineConfig, input: &InputArgs, json: bool) -> Result<(), CohortCliError> {
    let events = read_events(input)?;
    let presence = RawEventAdapter::column_presence(&events);
    let missing_required = match presence.ensure_usable(&config.normalizer.user_id_columns) {
        Ok(()) => Vec::new(),
        Err(SignalError::MissingColumn(columns)) => vec![columns],
        Err(e) => return Err(e.into()),
    };
    let normalized = EventNormalizer::new(&config.normalizer).normalize(&events);
    let users = normalized
        .events
        .iter()
        .map(|e| e.user_id.as_str())
        .collect::<HashSet<_>>()
        .len();

    let report = ValidationReport {
        schema: SCHEMA_VERSION.to_string(),
        columns: presence,
        missing_required,
        normalization: normalized.report,
        users,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let n = &report.normalization;
        println!("{} {} validation ({})", PRODUCER_NAME, VERSION, report.schema);
        println!("  rows:                 {}", n.total_rows);
        println!("  usable rows:          {}", n.kept_rows);
        println!("  missing user id:      {}", n.dropped_missing_user);
        println!("  bad timestamp:        {}", n.dropped_bad_timestamp);
        println!("  missing event name:   {}", n.dropped_missing_event);
        println!("  users:                {}", report.users);
        for column in &report.columns.columns {
            println!("  {:<22} {:>6.1}%", column.name, column.coverage * 100.0);
        }
    }

    if !report.missing_required.is_empty() {
        return Err(CohortCliError::Signal(SignalError::MissingColumn(
            report.missing_required.join(", "),
        )));
    }
    if report.normalization.kept_rows == 0 {
        return Err(CohortCliError::NoUsableRows(report.normalization.total_rows));
    }
    Ok(())
}

// Error types

#[derive(Debug)]
enum CohortCliError {
    Io(io::Error),
    Signal(SignalError),
    Json(serde_json::Error),
    InteractiveStdin,
    NoEvents,
    NoUsers,
    NoUsableRows(usize),
}

impl From<io::Error> for CohortCliError {
    fn from(e: io::Error) -> Self {
        CohortCliError::Io(e)
    }
}

impl From<SignalError> for CohortCliError {
    fn from(e: SignalError) -> Self {
        CohortCliError::Signal(e)
    }
}

impl From<serde_json::Error> for CohortCliError {
    fn from(e: serde_json::Error) -> Self {
        CohortCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<CohortCliError> for CliError {
    fn from(e: CohortCliError) -> Self {
        let (code, hint) = match &e {
            CohortCliError::Io(_) => ("IO_ERROR", Some("Check file paths and permissions")),
            CohortCliError::Json(_) => ("JSON_ERROR", Some("Check JSON syntax")),
            CohortCliError::InteractiveStdin => (
                "INTERACTIVE_STDIN",
                Some("Pipe an export into stdin or pass --input <file>"),
            ),
            CohortCliError::NoEvents => ("NO_EVENTS", Some("Ensure the input file is not empty")),
            CohortCliError::NoUsers => ("NO_USERS", Some("Pass --user <id> or --representatives")),
            CohortCliError::NoUsableRows(_) => (
                "NO_USABLE_ROWS",
                Some("Rows need a user id, a parseable timestamp and an event name"),
            ),
            CohortCliError::Signal(inner) => match inner {
                SignalError::UserNotFound(_) => ("USER_NOT_FOUND", None),
                SignalError::MissingColumn(_) => (
                    "MISSING_COLUMN",
                    Some("Run 'cohort validate' to see column coverage"),
                ),
                SignalError::InvalidConfig(_) => {
                    ("INVALID_CONFIG", Some("Run 'cohort config' for a valid template"))
                }
                SignalError::DegenerateLabels(_) => (
                    "DEGENERATE_LABELS",
                    Some("Churn training needs both churned and retained users"),
                ),
                SignalError::EmptyCohort(_) => ("EMPTY_COHORT", None),
                SignalError::ParseError(_) | SignalError::JsonError(_) => (
                    "PARSE_ERROR",
                    Some("Ensure input matches the product.raw_event.v1 schema"),
                ),
                _ => ("PIPELINE_ERROR", None),
            },
        };

        let message = match e {
            CohortCliError::Io(e) => e.to_string(),
            CohortCliError::Json(e) => e.to_string(),
            CohortCliError::Signal(e) => e.to_string(),
            CohortCliError::InteractiveStdin => "Refusing to read events from a terminal".to_string(),
            CohortCliError::NoEvents => "No events found in input".to_string(),
            CohortCliError::NoUsers => "No user ids to query".to_string(),
            CohortCliError::NoUsableRows(total) => format!("None of {} rows is usable", total),
        };

        CliError {
            code: code.to_string(),
            message,
            hint: hint.map(str::to_string),
        }
    }
}
