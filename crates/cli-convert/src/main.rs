use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use engine::{
    cleanup, convert, inputs,
    report::{Event, Reporter},
    ConvertOptions, DeletePolicy, EngineConfig, MediaTools,
};
use log::{debug, info};
use tokio::sync::mpsc::unbounded_channel;

/// Batch converter to MP4: MKV is remuxed, WEBM/OGV are transcoded
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for progress.json, failed.txt and log.txt
    #[arg(long)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert files and folders to MP4
    Convert {
        /// Files and/or directories to convert
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// CRF for the WEBM/OGV transcode path
        #[arg(long)]
        crf: Option<u32>,

        /// x264 preset for the transcode path
        #[arg(long)]
        preset: Option<String>,

        /// x264 tune profile (film, animation, grain)
        #[arg(long)]
        tune: Option<String>,

        /// Lossless x264 output (forces CRF 0)
        #[arg(long)]
        lossless: bool,

        /// Reprocess even when the progress store says a file is done
        #[arg(long)]
        force: bool,

        /// Log deletions without performing them
        #[arg(long)]
        dry_run: bool,

        /// Skip the trash and delete irreversibly
        #[arg(long)]
        permanent: bool,

        /// Delete originals after success: "all" or comma-separated extensions (e.g. mkv,webm)
        #[arg(long, value_name = "TYPES")]
        delete_after: Option<String>,
    },
    /// Delete originals recorded as converted in the progress store
    Cleanup {
        /// Scope: only records at or under these paths are considered
        paths: Vec<PathBuf>,

        /// Extensions to delete: "all" or comma-separated (e.g. mkv,webm)
        #[arg(long, value_name = "TYPES", required = true)]
        types: String,

        /// Skip the trash and delete irreversibly
        #[arg(long)]
        permanent: bool,

        /// Log deletions without performing them
        #[arg(long)]
        dry_run: bool,
    },
}

/// "all", or a comma-separated extension list (dots optional)
fn parse_policy(spec: &str) -> Result<DeletePolicy> {
    if spec.trim().eq_ignore_ascii_case("all") {
        return Ok(DeletePolicy::All);
    }
    let set: BTreeSet<String> = spec
        .split(',')
        .map(|s| s.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect();
    if set.is_empty() {
        bail!("No extensions given (expected e.g. \"mkv,webm\" or \"all\")");
    }
    Ok(DeletePolicy::Extensions(set))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger - use RUST_LOG env var or default to info level
    env_logger::Builder::from_default_env()
        .format_timestamp_secs()
        .init();

    let args = Args::parse();

    let mut cfg = EngineConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(state_dir) = args.state_dir {
        cfg.state_dir = state_dir;
    }
    std::fs::create_dir_all(&cfg.state_dir)
        .with_context(|| format!("Failed to create state directory: {}", cfg.state_dir.display()))?;

    info!("tomp4 starting");
    info!("  State dir: {}", cfg.state_dir.display());
    info!("  Input extensions: {:?}", cfg.input_extensions);

    match args.command {
        Command::Convert {
            paths,
            crf,
            preset,
            tune,
            lossless,
            force,
            dry_run,
            permanent,
            delete_after,
        } => {
            let mut opts = ConvertOptions::from_config(&cfg);
            if let Some(crf) = crf {
                opts.quality.crf = crf;
            }
            if let Some(preset) = preset {
                opts.quality.preset = preset;
            }
            opts.quality.tune = tune.filter(|t| !t.is_empty());
            opts.quality.lossless = lossless;
            opts.force = force;
            opts.dry_run = dry_run;
            opts.permanent = permanent;
            if let Some(spec) = delete_after {
                opts.delete_after = parse_policy(&spec)?;
            }

            run_convert(cfg, paths, opts).await
        }
        Command::Cleanup {
            paths,
            types,
            permanent,
            dry_run,
        } => {
            let policy = parse_policy(&types)?;
            run_cleanup(cfg, policy, paths, permanent, dry_run).await
        }
    }
}

async fn run_convert(cfg: EngineConfig, paths: Vec<PathBuf>, opts: ConvertOptions) -> Result<()> {
    let tools = MediaTools::locate();

    let tasks = inputs::collect_inputs(&cfg, &paths);
    if tasks.is_empty() {
        println!("No .mkv/.webm/.ogv files found.");
        return Ok(());
    }
    info!("Queued {} file(s)", tasks.len());

    let (tx, mut rx) = unbounded_channel();
    let reporter = Reporter::new(tx, cfg.log_path());
    let stop = Arc::new(AtomicBool::new(false));

    // Ctrl-C requests a cooperative stop; the in-flight ffmpeg finishes
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Stop requested; finishing the current file");
                stop.store(true, Ordering::Relaxed);
            }
        });
    }

    let worker = {
        let cfg = cfg.clone();
        let opts = opts.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            convert::run_queue(&cfg, &tools, &tasks, &opts, &reporter, &stop).await
        })
    };

    // the worker owns the only sender; the loop ends when it finishes
    while let Some(event) = rx.recv().await {
        match event {
            Event::Log(msg) => println!("{msg}"),
            Event::LogRaw(chunk) => print!("{chunk}"),
            Event::Progress { index, total } => debug!("progress {index}/{total}"),
            Event::Done(summary) => debug!("run finished: {summary:?}"),
        }
    }

    let summary = worker.await.context("Conversion worker panicked")??;
    if summary.failed > 0 {
        info!("{} file(s) failed; see failed.txt", summary.failed);
    }
    Ok(())
}

async fn run_cleanup(
    cfg: EngineConfig,
    policy: DeletePolicy,
    scope: Vec<PathBuf>,
    permanent: bool,
    dry_run: bool,
) -> Result<()> {
    let (tx, mut rx) = unbounded_channel();
    let reporter = Reporter::new(tx, cfg.log_path());

    let worker = tokio::task::spawn_blocking(move || {
        reporter.session_header("Cleanup session");
        let summary = cleanup::run_cleanup(&cfg, &policy, &scope, permanent, dry_run, &reporter);
        reporter.session_footer("Cleanup session");
        summary
    });

    while let Some(event) = rx.recv().await {
        match event {
            Event::Log(msg) => println!("{msg}"),
            Event::LogRaw(chunk) => print!("{chunk}"),
            Event::Progress { .. } | Event::Done(_) => {}
        }
    }

    let summary = worker.await.context("Cleanup worker panicked")?;
    debug!("cleanup finished: {summary:?}");
    Ok(())
}
