//! CLI entry point for the review preprocessing pipeline.

use anyhow::{Result, anyhow};
use clap::{Parser, ValueEnum};
use review_prep::{EmbeddingMode, Pipeline, PipelineConfig, PipelineError, PreparedData};
use serde_json::json;
use std::path::Path;
use tracing::{debug, info};

/// CLI-compatible embedding mode enum
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliEmbeddingMode {
    /// One vector per token; samples are index sequences
    Word,
    /// One vector per record; samples are dense vectors
    Document,
}

impl From<CliEmbeddingMode> for EmbeddingMode {
    fn from(cli: CliEmbeddingMode) -> Self {
        match cli {
            CliEmbeddingMode::Word => EmbeddingMode::Word,
            CliEmbeddingMode::Document => EmbeddingMode::Document,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Review text to embedding-index preprocessing",
    long_about = "Prepares rated review text for a rating model: loads a rating,comment CSV,\n\
                  tokenizes comments, encodes them against a word2vec table and splits\n\
                  train/validation sets.\n\n\
                  EXAMPLES:\n  \
                  # Basic run\n  \
                  review-prep -i reviews.csv -e ko_embeds.txt\n\n  \
                  # Downsample the majority rating and cache the tokenized corpus\n  \
                  review-prep -i reviews.csv -e ko_embeds.txt --refine --save-tokenized tokens.csv\n\n  \
                  # Reuse the cache and walk three epochs\n  \
                  review-prep -i tokens.csv --tokenized -e ko_embeds.txt --epochs 3"
)]
struct Args {
    /// Path to the record store (or tokenized corpus with --tokenized)
    #[arg(short, long)]
    input: String,

    /// Path to the word2vec text embedding table
    #[arg(short, long)]
    embeddings: Option<String>,

    /// JSON configuration file; flags below override its values
    #[arg(short, long)]
    config: Option<String>,

    #[arg(long)]
    sequence_length: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    /// Rating classes; 1 produces scalar labels
    #[arg(long)]
    n_classes: Option<usize>,

    /// Held-out fraction, exclusive range (0, 1)
    #[arg(long)]
    validation_fraction: Option<f64>,

    /// Seed for splitting and refinement
    #[arg(long)]
    seed: Option<u64>,

    /// Seed for per-epoch batch shuffling (unseeded if omitted)
    #[arg(long)]
    shuffle_seed: Option<u64>,

    /// Downsample the majority rating
    #[arg(long)]
    refine: bool,

    /// Fraction of the majority rating kept by --refine
    #[arg(long)]
    retention: Option<f64>,

    #[arg(long, value_enum)]
    mode: Option<CliEmbeddingMode>,

    /// Tokenizer worker threads
    #[arg(long)]
    workers: Option<usize>,

    /// Abort when available memory falls below this many MiB (0 disables)
    #[arg(long)]
    memory_floor_mb: Option<u64>,

    /// Training epochs to walk over the prepared batches
    #[arg(long, default_value = "1")]
    epochs: u64,

    /// Write the tokenized corpus here for later --tokenized runs
    #[arg(long)]
    save_tokenized: Option<String>,

    /// Treat --input as a tokenized corpus cache
    #[arg(long)]
    tokenized: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Suppress progress output (only show errors and final result)
    #[arg(short, long)]
    quiet: bool,

    /// Output JSON to stdout instead of human-readable summary
    ///
    /// Disables all progress logs; only outputs the final JSON report.
    #[arg(long)]
    json: bool,
}

/// Initialize the tracing subscriber for logging.
///
/// When `json_output` is true, logging is completely disabled to ensure
/// only JSON is written to stdout.
fn init_logging(level: &str, quiet: bool, json_output: bool) {
    if json_output {
        return;
    }

    use tracing_subscriber::EnvFilter;

    let effective_level = if quiet { "warn" } else { level };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(effective_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() {
    let args = Args::parse();
    init_logging(&args.log_level, args.quiet, args.json);

    if let Err(e) = run(&args) {
        if args.json {
            let body = match e.downcast_ref::<PipelineError>() {
                Some(pipeline_error) => json!({ "error": pipeline_error }),
                None => json!({ "error": { "code": "CLI_ERROR", "message": e.to_string() } }),
            };
            println!("{}", body);
        } else {
            eprintln!("Error: {:#}", e);
        }
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    if !Path::new(&args.input).exists() {
        return Err(anyhow!("Input file not found: {}", args.input));
    }

    let config = build_config(args)?;
    let mut builder = Pipeline::builder().config(config);
    if let Some(path) = &args.save_tokenized {
        builder = builder.save_tokenized(path);
    }
    let pipeline = builder.build()?;

    let prepared = if args.tokenized {
        pipeline.run_tokenized(&args.input)?
    } else {
        pipeline.run(&args.input)?
    };

    let batches_seen = walk_epochs(&pipeline, &prepared, args.epochs)?;

    if args.json {
        let report = json!({
            "summary": prepared.summary,
            "epochs": args.epochs,
            "batches_seen": batches_seen,
            "feature_width": prepared.train.feature_width(),
            "label_width": prepared.train.label_width(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_human_readable_summary(args, &prepared, batches_seen);
    }
    Ok(())
}

/// Load the JSON config (if any) and apply flag overrides.
fn build_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };

    if let Some(path) = &args.embeddings {
        config.embedding_path = path.into();
    }
    if let Some(v) = args.sequence_length {
        config.sequence_length = v;
    }
    if let Some(v) = args.batch_size {
        config.batch_size = v;
    }
    if let Some(v) = args.n_classes {
        config.n_classes = v;
    }
    if let Some(v) = args.validation_fraction {
        config.validation_fraction = v;
    }
    if let Some(v) = args.seed {
        config.seed = v;
    }
    if args.shuffle_seed.is_some() {
        config.shuffle_seed = args.shuffle_seed;
    }
    if args.refine {
        config.refine_data = true;
    }
    if let Some(v) = args.retention {
        config.refine_retention = v;
    }
    if let Some(mode) = args.mode {
        config.embedding_mode = mode.into();
    }
    if let Some(v) = args.workers {
        config.n_workers = v;
    }
    if let Some(v) = args.memory_floor_mb {
        config.memory_floor_mb = v;
    }

    debug!("Effective configuration: {:?}", config);
    Ok(config)
}

/// Consume the training batches the way a trainer would.
fn walk_epochs(pipeline: &Pipeline, prepared: &PreparedData, epochs: u64) -> Result<usize> {
    let mut batches = pipeline.batches(&prepared.train)?;
    let mut seen = 0;
    for epoch in 0..epochs {
        let count = batches.iterate().count();
        info!("Epoch {}: {} batches", epoch + 1, count);
        seen += count;
    }
    Ok(seen)
}

/// Print a human-readable summary of the run.
fn print_human_readable_summary(args: &Args, prepared: &PreparedData, batches_seen: usize) {
    let summary = &prepared.summary;

    println!();
    println!("{}", "=".repeat(80));
    println!("PREPROCESSING COMPLETE");
    println!("{}", "=".repeat(80));
    println!();

    println!("Input: {}", args.input);
    println!(
        "Embeddings: {} tokens x {} dims",
        summary.vocab_size, summary.embedding_dim
    );
    println!();

    println!("Processing Summary:");
    println!("  Duration: {}ms", summary.duration_ms);
    println!(
        "  Records: {} loaded, {} skipped, {} removed by refinement",
        summary.records_loaded, summary.records_skipped, summary.records_refined_away
    );
    println!(
        "  Tokens: {} ({:.1}% out of vocabulary), {} samples truncated",
        summary.tokens_total,
        summary.oov_percentage(),
        summary.samples_truncated
    );
    println!(
        "  Split: {} train / {} validation",
        summary.train_rows, summary.validation_rows
    );
    println!(
        "  Batches: {} per epoch, {} over {} epochs",
        summary.batches_per_epoch, batches_seen, args.epochs
    );
    println!();

    println!("Class Distribution:");
    for (rating, count) in &summary.class_distribution {
        println!("  {:>2}: {}", rating, count);
    }
    println!();

    if !summary.warnings.is_empty() {
        println!("Warnings:");
        for warning in &summary.warnings {
            println!("  ! {}", warning);
        }
        println!();
    }

    println!("Use --json for machine-readable output");
    println!("{}", "=".repeat(80));
}
