use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use iceannot::config::Config;
use iceannot::filter::TieBreak;
use iceannot::pipeline::Annotator;
use iceannot::report::TracingReporter;
use iceannot::seqio;
use iceannot::AnnotationKind;

fn parse_tie_break(s: &str) -> Result<TieBreak, String> {
    match s {
        "last" | "last_wins" => Ok(TieBreak::LastWins),
        "best" | "best_score" => Ok(TieBreak::BestScore),
        _ => Err(format!("tie-break must be 'last' or 'best', got {}", s)),
    }
}

fn parse_threads(s: &str) -> Result<usize, String> {
    let val: usize = s.parse().map_err(|_| format!("Invalid number: {}", s))?;
    if val == 0 {
        Err("search threads must be at least 1".to_string())
    } else {
        Ok(val)
    }
}

#[derive(Parser)]
#[command(name = "iceannot")]
#[command(version)]
#[command(about = "Multi-database gene annotation for ICE detection")]
#[command(long_about = r#"
iceannot - gene annotation for Integrative and Conjugative Element detection

Searches the predicted genes of one genome against six reference databases
and runs DefenseFinder, then keeps one label per gene and category:

  transposase   blastp  .faa  score >= 0.64  is.m8
  virulence     blastp  .faa  score >= 0.64  vf.m8
  resfinder     blastn  .ffn  score >= 0.81  arg.m8
  metal         blastp  .faa  score >= 0.64  metal.m8
  degradation   blastp  .faa  score >= 0.64  pop.m8
  symbiosis     blastn  .ffn  score >= 0.64  sym.m8

  score = (alignment length / subject length) * (identity / 100)

A failed search aborts the run. A failed DefenseFinder run leaves the
defense annotations empty.

OUTPUT FILES:
  {run_id}_annotation.tsv    gene_id, kind, label (sorted)
  {run_id}_annotation.json   all seven maps with run metadata

EXAMPLES:
  iceannot -c iceannot.toml -p genome.faa -n genome.ffn -o results/
  iceannot -d /data/ice_db -p genome.faa -n genome.ffn -r sample1 -t 16
"#)]
struct Args {
    #[arg(short = 'p', long, value_name = "FILE", help_heading = "Input")]
    faa: PathBuf,

    #[arg(short = 'n', long, value_name = "FILE", help_heading = "Input")]
    ffn: PathBuf,

    /// Run id; defaults to the protein file stem
    #[arg(short = 'r', long = "run-id", value_name = "ID", help_heading = "Input")]
    run_id: Option<String>,

    #[arg(short = 'c', long, value_name = "FILE", help_heading = "Database")]
    config: Option<PathBuf>,

    /// Overrides `databases_dir` from the config file
    #[arg(short = 'd', long = "db-dir", value_name = "DIR", help_heading = "Database")]
    db_dir: Option<PathBuf>,

    #[arg(short = 'o', long, value_name = "DIR", default_value = ".", help_heading = "Output")]
    outdir: PathBuf,

    #[arg(short = 'w', long, value_name = "DIR", help_heading = "Output")]
    workdir: Option<PathBuf>,

    #[arg(short = 'v', long, help_heading = "Output")]
    verbose: bool,

    #[arg(long = "tie-break", value_name = "MODE", value_parser = parse_tie_break, help_heading = "Filtering")]
    tie_break: Option<TieBreak>,

    #[arg(short = 't', long, value_name = "NUM", help_heading = "Runtime")]
    threads: Option<usize>,

    #[arg(short = 's', long = "search-threads", value_name = "NUM", value_parser = parse_threads, help_heading = "Runtime")]
    search_threads: Option<usize>,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "iceannot=debug" } else { "iceannot=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match (&args.config, &args.db_dir) {
        (Some(path), _) => Config::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        (None, Some(dir)) => Config::new(dir),
        (None, None) => anyhow::bail!("Either --config or --db-dir is required"),
    };

    if let Some(dir) = &args.db_dir {
        config.databases_dir = dir.clone();
    }
    if let Some(dir) = &args.workdir {
        config.workdir = Some(dir.clone());
    }
    if let Some(threads) = args.threads {
        config.threads = threads;
    }
    if let Some(search_threads) = args.search_threads {
        config.search_threads = search_threads;
    }
    if let Some(tie_break) = args.tie_break {
        config.tie_break = tie_break;
    }

    config.resolve_tools().context("Failed to locate external tools")?;
    config.validate().context("Reference databases are incomplete")?;
    Ok(config)
}

fn run_id_for(args: &Args) -> Result<String> {
    if let Some(id) = &args.run_id {
        return Ok(id.clone());
    }
    args.faa
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty())
        .with_context(|| format!("Cannot derive a run id from {}", args.faa.display()))
}

fn output_path(outdir: &Path, run_id: &str, ext: &str) -> PathBuf {
    outdir.join(format!("{}_annotation.{}", run_id, ext))
}

fn main() -> Result<()> {
    let args = Args::parse();
    let start_time = Instant::now();
    init_tracing(args.verbose);

    let config = load_config(&args)?;
    let run_id = run_id_for(&args)?;

    tracing::debug!(
        blastp = %config.tools.blastp.display(),
        blastn = %config.tools.blastn.display(),
        defense_finder = %config.tools.defense_finder.display(),
        "resolved tools"
    );

    fs::create_dir_all(&args.outdir)
        .with_context(|| format!("Failed to create {}", args.outdir.display()))?;

    let annotator = Annotator::new(config).with_reporter(Arc::new(TracingReporter));
    let bundle = annotator
        .annotate(&run_id, &args.faa, &args.ffn)
        .with_context(|| format!("Annotation of {} failed", run_id))?;

    let tsv = output_path(&args.outdir, &run_id, "tsv");
    bundle
        .write_tsv(&tsv)
        .with_context(|| format!("Failed to write {}", tsv.display()))?;
    let json = output_path(&args.outdir, &run_id, "json");
    bundle
        .write_json(&json, &run_id)
        .with_context(|| format!("Failed to write {}", json.display()))?;

    let mut known = seqio::gene_ids(&args.faa)?;
    known.extend(seqio::gene_ids(&args.ffn)?);
    let unknown = bundle.gene_ids().into_iter().filter(|id| !known.contains(*id)).count();
    if unknown > 0 {
        tracing::warn!(unknown, "annotated gene ids missing from the input files");
    }

    for kind in AnnotationKind::ALL {
        tracing::info!(kind = %kind, genes = bundle.get(kind).len(), "annotated");
    }
    tracing::info!(
        output = %tsv.display(),
        elapsed_secs = start_time.elapsed().as_secs_f64(),
        "done"
    );

    Ok(())
}
