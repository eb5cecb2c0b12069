use anyhow::{bail, Context, Result};
use chrono::Datelike;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tally_classify::{category_stats, Categorizer, CategorizerConfig, ModelCategorizer, RuleCategorizer};
use tally_core::{StatementMetadata, Transaction};
use tally_ingest::{
    parse_statement_csv, Extraction, ExtractionPipeline, ModelExtractor, ModelExtractorConfig,
    PatternExtractor,
};
use tally_llm::{LlmClient, LlmConfig};

mod config;

#[derive(Parser, Debug)]
#[command(name = "tally", version, about = "Bank-statement extraction and categorization")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a default config to ~/.tally/config.toml
    Init,

    /// Extract normalized transactions from a statement (text or CSV)
    Parse {
        /// Statement file: .csv, or text extracted from a PDF
        input: PathBuf,

        /// Year for MM/DD dates when no statement period is found
        #[arg(long)]
        year: Option<i32>,

        /// Skip the model-assisted path even if a key is configured
        #[arg(long)]
        no_model: bool,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Extract and categorize, with a per-category summary
    Run {
        input: PathBuf,

        #[arg(long)]
        year: Option<i32>,

        #[arg(long)]
        no_model: bool,

        #[arg(long)]
        json: bool,
    },
}

#[derive(Serialize)]
struct Report {
    metadata: StatementMetadata,
    source: &'static str,
    fallback_reason: Option<String>,
    transactions: Vec<Transaction>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    categories: BTreeMap<&'static str, usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Init => config::init_config(),
        Command::Parse {
            input,
            year,
            no_model,
            json,
        } => {
            let report = extract(&input, year, no_model, false).await?;
            print_report(&report, json)
        }
        Command::Run {
            input,
            year,
            no_model,
            json,
        } => {
            let report = extract(&input, year, no_model, true).await?;
            print_report(&report, json)
        }
    }
}

async fn extract(input: &Path, year: Option<i32>, no_model: bool, categorize: bool) -> Result<Report> {
    if !input.exists() {
        bail!("input not found: {}", input.display());
    }

    let cfg = config::load_config()?;
    let client = if no_model { None } else { make_client(&cfg)? };
    let fallback_year = year
        .or(cfg.pipeline.fallback_year)
        .unwrap_or_else(|| chrono::Utc::now().year());

    let is_csv = input
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"));

    let (metadata, extraction) = if is_csv {
        let records = parse_statement_csv(input)
            .with_context(|| format!("parsing {}", input.display()))?;
        let extraction = if records.is_empty() {
            Extraction::Empty {
                reason: "CSV contained no transaction rows".to_string(),
            }
        } else {
            Extraction::FellBack {
                records,
                reason: "CSV input parsed deterministically".to_string(),
            }
        };
        (StatementMetadata::default(), extraction)
    } else {
        let text = std::fs::read_to_string(input)
            .with_context(|| format!("reading {}", input.display()))?;
        extract_from_text(&cfg, client.clone(), &text, fallback_year).await?
    };

    let (source, fallback_reason) = match &extraction {
        Extraction::Accepted { .. } => ("model", None),
        Extraction::FellBack { reason, .. } => ("pattern", Some(reason.clone())),
        Extraction::Empty { reason } => ("none", Some(reason.clone())),
    };

    let mut transactions = extraction.into_records();
    let mut categories = BTreeMap::new();
    if categorize && !transactions.is_empty() {
        let categorizer = match client {
            Some(client) => Categorizer::new(
                RuleCategorizer::default(),
                ModelCategorizer::new(client),
                CategorizerConfig {
                    max_in_flight: cfg.pipeline.max_in_flight,
                },
            ),
            None => Categorizer::rules_only(RuleCategorizer::default()),
        };
        transactions = categorizer.categorize_batch(transactions).await;
        categories = category_stats(&transactions);
    }

    Ok(Report {
        metadata,
        source,
        fallback_reason,
        transactions,
        categories,
    })
}

async fn extract_from_text(
    cfg: &config::Config,
    client: Option<LlmClient>,
    text: &str,
    fallback_year: i32,
) -> Result<(StatementMetadata, Extraction)> {
    // Metadata first: a recovered statement period drives year inference
    // for MM/DD dates in both extractors.
    let base = ModelExtractorConfig {
        max_chunk_chars: cfg.pipeline.max_chunk_chars,
        fallback_year,
        ..ModelExtractorConfig::default()
    };

    let metadata = match &client {
        Some(c) => {
            ModelExtractor::new(c.clone(), base.clone())
                .extract_metadata(text)
                .await
        }
        None => StatementMetadata::default(),
    };

    let pattern = PatternExtractor::new(metadata.period, fallback_year)?;
    let pipeline = match client {
        Some(c) => ExtractionPipeline::new(
            ModelExtractor::new(
                c,
                ModelExtractorConfig {
                    period: metadata.period,
                    ..base
                },
            ),
            pattern,
        ),
        None => ExtractionPipeline::pattern_only(pattern),
    };

    let extraction = pipeline.extract(text).await;
    Ok((metadata, extraction))
}

fn make_client(cfg: &config::Config) -> Result<Option<LlmClient>> {
    let Ok(key) = std::env::var(&cfg.llm.api_key_env) else {
        eprintln!(
            "note: {} not set, using deterministic extractors only",
            cfg.llm.api_key_env
        );
        return Ok(None);
    };

    let mut llm = match cfg.llm.provider.as_str() {
        "openai" => LlmConfig::openai(&cfg.llm.model, key),
        "anthropic" => LlmConfig::anthropic(&cfg.llm.model, key),
        other => bail!("unknown provider in config: {other}"),
    };
    llm.timeout = std::time::Duration::from_secs(cfg.llm.timeout_secs);
    llm.temperature = cfg.llm.temperature;
    Ok(Some(LlmClient::new(llm)))
}

fn print_report(report: &Report, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    if let Some(bank) = &report.metadata.bank_name {
        println!("Bank: {bank}");
    }
    if let Some(period) = &report.metadata.period {
        println!("Period: {} - {}", period.start, period.end);
    }

    for t in &report.transactions {
        let category = t
            .category
            .map(|c| c.as_str())
            .unwrap_or("-");
        println!(
            "{}  {:>12.2}  {:<14}  {}",
            t.date, t.amount, category, t.description
        );
    }

    println!(
        "\n{} transaction(s), source: {}",
        report.transactions.len(),
        report.source
    );
    if let Some(reason) = &report.fallback_reason {
        println!("note: {reason}");
    }
    if !report.categories.is_empty() {
        println!();
        for (category, count) in &report.categories {
            println!("{category:<14} {count}");
        }
    }
    Ok(())
}
