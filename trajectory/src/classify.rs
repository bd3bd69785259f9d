//! trajectory-classify - one-shot trajectory analysis from the command line
//!
//! Reads an analyze request (the same JSON the HTTP service accepts) from a
//! file or stdin, runs one classification pass and prints the result.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Read;
use std::path::PathBuf;
use trajectory_core::trajectory::{
    create_client, Classification, Detection, RuleOutcome, SkipReason, TrajectoryClassifier,
};
use trajectory_core::{AnalyzeRequest, Config, Database, ProgressIndicator};

#[derive(Parser)]
#[command(name = "trajectory-classify")]
#[command(about = "Classify a coaching conversation's trajectory")]
#[command(version)]
struct Args {
    /// Request JSON file (reads stdin when omitted)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// List stored indicators for a session instead of classifying
    #[arg(long, value_name = "SESSION")]
    history: Option<String>,

    /// Number of indicators to list with --history
    #[arg(short, long)]
    limit: Option<usize>,

    /// Heuristics only, even if an LLM is configured
    #[arg(long)]
    no_llm: bool,

    /// Output format: text (default) or json
    #[arg(short, long, default_value = "text", value_parser = ["text", "json"])]
    format: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();

    // Load configuration
    let config = Config::load().context("failed to load configuration")?;

    // Initialize logging
    let _log_guard =
        trajectory_core::logging::init(&config.logging).context("failed to initialize logging")?;

    // Open database
    let db_path = Config::database_path();
    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    if let Some(ref session_id) = args.history {
        let limit = args.limit.unwrap_or(config.history.recent_limit);
        let indicators = db.recent_indicators(session_id, limit)?;
        return print_history(session_id, &indicators, &args.format);
    }

    let raw = read_input(args.input.as_deref())?;
    let request: AnalyzeRequest =
        serde_json::from_str(&raw).context("failed to parse analyze request")?;

    let client = match &config.llm {
        Some(llm) if !args.no_llm && llm.has_credential() => match create_client(llm) {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::warn!(error = %e, "LLM client unavailable, rule tier disabled");
                eprintln!("Warning: LLM unavailable ({}), running heuristics only", e);
                None
            }
        },
        _ => None,
    };

    let mut classifier = TrajectoryClassifier::new(&db);
    if let Some(client) = client.as_deref() {
        classifier = classifier.with_llm(client);
    }

    let classification = classifier.analyze(request)?;

    if args.format == "json" {
        let response = classification.into_response();
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_classification(&classification);
    }

    Ok(())
}

fn read_input(path: Option<&std::path::Path>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        None => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("failed to read request from stdin")?;
            Ok(raw)
        }
    }
}

fn describe_detection(detection: &Detection) -> String {
    match detection {
        Detection::Heuristic(check) => format!("heuristic ({})", check.as_str()),
        Detection::Rules(RuleOutcome::Matched(_)) => "provider rules".to_string(),
        Detection::Rules(RuleOutcome::NoMatch) => "provider rules (no match)".to_string(),
        Detection::Rules(RuleOutcome::ServiceUnavailable(reason)) => {
            format!("provider rules unavailable: {}", reason)
        }
        Detection::RulesSkipped(SkipReason::NoClient) => {
            "heuristics only (no LLM configured)".to_string()
        }
        Detection::RulesSkipped(SkipReason::NoRules) => {
            "heuristics only (no provider rules)".to_string()
        }
    }
}

fn print_classification(classification: &Classification) {
    let Some(indicator) = &classification.indicator else {
        println!("No trajectory issue detected.");
        println!("  Decided by: {}", describe_detection(&classification.detection));
        return;
    };

    println!("Indicator: {}", indicator.indicator_type);
    println!("  Decided by: {}", describe_detection(&classification.detection));
    print_detail(indicator);

    match indicator.id {
        Some(id) if classification.persisted => println!("  Stored as:  #{}", id),
        _ => println!("  Stored as:  (not persisted, see log)"),
    }
}

fn print_detail(indicator: &ProgressIndicator) {
    let detail = &indicator.detail;
    println!("  Pattern:    {}", detail.pattern);
    println!("  Message:    {}", detail.message);
    println!("  Reason:     {}", detail.reason);
    if let Some(index) = detail.rule_index {
        println!("  Rule:       #{}", index);
    }
    if let Some(ref stage) = detail.stage {
        println!("  Stage:      {}", stage);
    }
    if !detail.keywords.is_empty() {
        println!("  Keywords:   {}", detail.keywords.join(", "));
    }
}

fn print_history(
    session_id: &str,
    indicators: &[ProgressIndicator],
    format: &str,
) -> Result<()> {
    if format == "json" {
        println!("{}", serde_json::to_string_pretty(indicators)?);
        return Ok(());
    }

    if indicators.is_empty() {
        println!("No indicators stored for session '{}'.", session_id);
        return Ok(());
    }

    println!("Recent indicators for '{}' (newest first):\n", session_id);
    for indicator in indicators {
        let local = indicator.created_at.with_timezone(&chrono::Local);
        println!(
            "{}  {:<6} {}",
            local.format("%Y-%m-%d %H:%M:%S"),
            indicator.indicator_type.as_str(),
            indicator.detail.pattern
        );
        println!("    {}", indicator.detail.message);
    }

    Ok(())
}
