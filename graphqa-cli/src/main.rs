//! graphqa batch driver.
//!
//! Thin CLI over `graphqa-core`: index a corpus, delete passages, run
//! retrieval queries, or drive a QA batch with one isolated session per
//! sample on a bounded worker pool.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use rayon::prelude::*;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use graphqa_core::{Config, GraphQa};

#[derive(Parser)]
#[command(name = "graphqa")]
#[command(version, about = "Graph-indexed hybrid retrieval-augmented QA", long_about = None)]
struct Cli {
    /// Configuration file (TOML or JSON)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Base output directory
    #[arg(long)]
    save_dir: Option<String>,

    /// Language model name
    #[arg(long)]
    llm_name: Option<String>,

    /// OpenAI-compatible chat endpoint base URL
    #[arg(long)]
    llm_base_url: Option<String>,

    /// Embedding model name (`local-hash` for the offline embedder)
    #[arg(long)]
    embedding_name: Option<String>,

    /// OpenIE mode: online, offline, or transformers-offline
    #[arg(long)]
    openie_mode: Option<String>,

    /// Wipe persisted stores and graph before starting
    #[arg(long)]
    force_index_from_scratch: bool,

    /// Ignore the OpenIE cache and re-extract
    #[arg(long)]
    force_openie_from_scratch: bool,

    /// Compiled reranker prompt file
    #[arg(long, value_name = "FILE")]
    rerank_dspy_file_path: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a corpus of passages
    Index {
        /// Passage file: JSON array of strings, or one passage per line
        #[arg(long, value_name = "FILE")]
        docs: PathBuf,
    },

    /// Run the OpenIE priming pass for offline modes
    PreOpenie {
        /// Passage file: JSON array of strings, or one passage per line
        #[arg(long, value_name = "FILE")]
        docs: PathBuf,
    },

    /// Delete passages and everything only they support
    Delete {
        /// Passage file: JSON array of strings, or one passage per line
        #[arg(long, value_name = "FILE")]
        docs: PathBuf,
    },

    /// Retrieve passages for queries
    Query {
        /// Query file: JSON array of strings, or one query per line
        #[arg(long, value_name = "FILE")]
        queries: PathBuf,

        /// Passages to return per query
        #[arg(long, default_value_t = 5)]
        top_k: usize,

        /// Skip graph search and use dense retrieval only
        #[arg(long)]
        dpr_only: bool,
    },

    /// Answer a QA batch, one isolated session per sample
    Qa {
        /// Sample file: JSON array of {question, answers?, docs?}
        #[arg(long, value_name = "FILE")]
        queries: PathBuf,

        /// Concurrent sessions
        #[arg(long, default_value_t = 4)]
        workers: usize,
    },

    /// Print store and graph counters
    Stats,
}

/// One QA batch sample
#[derive(Debug, Clone, Deserialize)]
struct QaSample {
    question: String,
    #[serde(default)]
    answers: Vec<String>,
    #[serde(default)]
    docs: Vec<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        },
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = build_config(&cli)?;

    match &cli.command {
        Commands::Index { docs } => {
            let docs = read_string_list(&resolve_input_path(docs)?)?;
            let mut session = GraphQa::with_default_clients(config)?;
            session.index(&docs)?;
            print_stats(&session);
        },
        Commands::PreOpenie { docs } => {
            let docs = read_string_list(&resolve_input_path(docs)?)?;
            let mut session = GraphQa::with_default_clients(config)?;
            session.pre_openie(&docs)?;
        },
        Commands::Delete { docs } => {
            let docs = read_string_list(&resolve_input_path(docs)?)?;
            let mut session = GraphQa::with_default_clients(config)?;
            session.delete(&docs)?;
            print_stats(&session);
        },
        Commands::Query {
            queries,
            top_k,
            dpr_only,
        } => {
            let queries = read_string_list(&resolve_input_path(queries)?)?;
            let mut session = GraphQa::with_default_clients(config)?;
            let solutions = if *dpr_only {
                session.retrieve_dpr(&queries, *top_k)?
            } else {
                session.retrieve(&queries, *top_k)?
            };
            println!("{}", serde_json::to_string_pretty(&solutions)?);
        },
        Commands::Qa { queries, workers } => {
            let samples: Vec<QaSample> =
                serde_json::from_str(&std::fs::read_to_string(resolve_input_path(queries)?)?)?;
            run_qa_batch(&config, samples, *workers)?;
        },
        Commands::Stats => {
            let session = GraphQa::with_default_clients(config)?;
            print_stats(&session);
        },
    }
    Ok(())
}

fn build_config(cli: &Cli) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(resolve_input_path(path)?)?,
        None => Config::default(),
    };
    if let Some(save_dir) = &cli.save_dir {
        config.save_dir = save_dir.clone();
    }
    if let Some(name) = &cli.llm_name {
        config.llm.name = name.clone();
    }
    if let Some(url) = &cli.llm_base_url {
        config.llm.base_url = Some(url.clone());
    }
    if let Some(name) = &cli.embedding_name {
        config.embedding.name = name.clone();
    }
    if let Some(mode) = &cli.openie_mode {
        config.indexing.openie_mode = mode.parse()?;
    }
    if cli.force_index_from_scratch {
        config.indexing.force_index_from_scratch = true;
    }
    if cli.force_openie_from_scratch {
        config.indexing.force_openie_from_scratch = true;
    }
    if let Some(path) = &cli.rerank_dspy_file_path {
        config.rerank_dspy_file_path = Some(resolve_input_path(path)?);
    }
    Ok(config)
}

/// Canonicalize an input path and require it to stay inside the current
/// working directory.
fn resolve_input_path(path: &Path) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let canonical = path.canonicalize()?;
    let cwd = std::env::current_dir()?.canonicalize()?;
    if !canonical.starts_with(&cwd) {
        return Err(format!(
            "input path {} resolves outside the working directory",
            path.display()
        )
        .into());
    }
    Ok(canonical)
}

/// JSON array of strings when the file parses as one, otherwise non-empty
/// lines.
fn read_string_list(path: &Path) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    if let Ok(parsed) = serde_json::from_str::<Vec<String>>(&raw) {
        return Ok(parsed);
    }
    Ok(raw
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect())
}

fn print_stats(session: &GraphQa) {
    let stats = session.stats();
    println!(
        "chunks={} entities={} facts={} graph_vertices={} graph_edges={}",
        stats.chunks, stats.entities, stats.facts, stats.graph_vertices, stats.graph_edges
    );
}

/// One isolated session per sample: distinct working directory, no shared
/// mutable state, bounded concurrency, results aggregated in input order.
fn run_qa_batch(
    config: &Config,
    samples: Vec<QaSample>,
    workers: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()?;

    let results: Vec<serde_json::Value> = pool.install(|| {
        samples
            .par_iter()
            .enumerate()
            .map(|(i, sample)| {
                let mut sample_config = config.clone();
                sample_config.save_dir = format!("{}/sample_{i}", config.save_dir);
                match answer_sample(sample_config, sample) {
                    Ok(value) => value,
                    Err(e) => {
                        tracing::warn!(sample = i, error = %e, "qa sample failed");
                        serde_json::json!({
                            "question": sample.question,
                            "answer": null,
                            "error": e.to_string(),
                        })
                    },
                }
            })
            .collect()
    });

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

fn answer_sample(
    config: Config,
    sample: &QaSample,
) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let mut session = GraphQa::with_default_clients(config)?;
    if !sample.docs.is_empty() {
        session.index(&sample.docs)?;
    }
    let queries = vec![sample.question.clone()];
    let gold_answers = if sample.answers.is_empty() {
        None
    } else {
        Some(vec![sample.answers.clone()])
    };
    let (solutions, metrics) = session.rag_qa(&queries, None, gold_answers.as_deref())?;
    let solution = solutions.into_iter().next();
    Ok(serde_json::json!({
        "question": sample.question,
        "answer": solution.as_ref().and_then(|s| s.answer.clone()),
        "docs": solution.as_ref().map(|s| s.docs.clone()).unwrap_or_default(),
        "metrics": metrics,
    }))
}
