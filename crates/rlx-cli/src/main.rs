//! 🚀 rlx: the front door, the bouncer, the maitre d' of rowlift.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 Thin CLI wrapper: set up logging, load config, open the backends, then let the
//! library do the heavy lifting. Like a manager. 🦆
//!
//! - `rlx submit <files..>`: upload files, print one receipt per file.
//! - `rlx work`: consume jobs until Ctrl-C (or the configured idle timeout).
//! - `rlx pipeline <files..>`: submit, then consume in the same process until idle.
//! - `rlx health`: probe the blob store.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use rlx::app_config::load_config;
use rlx::backends::JobQueueConfig;
use rlx::{Pipeline, Upload};
use tracing::{error, info, warn};

/// 😴 `pipeline` stops consuming after this long with an empty queue, unless the config says otherwise.
const PIPELINE_IDLE_MS: u64 = 1_000;

#[derive(Debug, Parser)]
#[command(name = "rlx", version, about = "🚚 Rowlift: tabular files in, document rows out")]
struct Cli {
    /// 🔧 TOML config file. Ignored when it doesn't exist; `RLX_*` env vars still apply.
    #[arg(short, long, env = "RLX_CONFIG", default_value = "rlx.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 📤 Upload files and enqueue one job per file.
    Submit {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// 📥 Consume jobs until Ctrl-C.
    Work,
    /// 🔁 Submit files, then consume in the same process until the queue goes quiet.
    Pipeline {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// 🩺 Check that the blob store is reachable.
    Health,
}

/// 🚀 main(): where it all begins. The "I pressed F5 and held my breath" moment.
#[tokio::main]
async fn main() -> Result<()> {
    rlx::telemetry::init_logging()?;
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        error!("💀 error: {}", err);
        // -- 🧅 peel the onion of sadness, one layer at a time
        let mut looks_like_connection_trouble = false;
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
            let cause_str = cause.to_string();
            if cause_str.contains("error sending request")
                || cause_str.contains("Connection refused")
                || cause_str.contains("connection refused")
                || cause_str.contains("tcp connect error")
                || cause_str.contains("dns error")
            {
                looks_like_connection_trouble = true;
            }
        }
        if looks_like_connection_trouble {
            error!(
                "🔧 hint: looks like a backing service isn't reachable. \
                 Double-check that Elasticsearch (or whatever you pointed us at) is actually running."
            );
        }
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    // 🔒 a missing config file is not an error, just env vars and defaults
    let config_file = cli
        .config
        .try_exists()
        .with_context(|| format!("💀 couldn't check whether '{}' exists", cli.config.display()))?
        .then_some(cli.config.as_path());
    let mut app_config = load_config(config_file).context("💀 couldn't load the configuration")?;

    match cli.command {
        Command::Submit { files } => {
            if matches!(app_config.job_queue, JobQueueConfig::InMemory(_)) {
                warn!(
                    "⚠️ the job queue is in-memory: these jobs vanish when this process exits. \
                     Use `rlx pipeline`, or configure the Spool queue."
                );
            }
            let pipeline = Pipeline::from_config(app_config).await?;
            let failures = submit_all(&pipeline, &files).await;
            eprintln!("{}", pipeline.metrics.render());
            if failures > 0 {
                anyhow::bail!("💀 {failures} of {} uploads failed", files.len());
            }
        }
        Command::Work => {
            let pipeline = Pipeline::from_config(app_config).await?;
            let summary = pipeline.consumer().run(ctrl_c()).await;
            info!(?summary, "🏁 worker finished");
            eprintln!("{}", pipeline.metrics.render());
        }
        Command::Pipeline { files } => {
            app_config.consumer.idle_shutdown_ms.get_or_insert(PIPELINE_IDLE_MS);
            let pipeline = Pipeline::from_config(app_config).await?;
            let failures = submit_all(&pipeline, &files).await;
            let summary = pipeline.consumer().run(ctrl_c()).await;
            info!(?summary, "🏁 pipeline finished");
            eprintln!("{}", pipeline.metrics.render());
            if failures > 0 || summary.deferred > 0 || summary.failed > 0 {
                anyhow::bail!(
                    "💀 {failures} uploads failed, {} jobs deferred, {} jobs failed",
                    summary.deferred,
                    summary.failed
                );
            }
        }
        Command::Health => {
            let pipeline = Pipeline::from_config(app_config).await?;
            tokio::time::timeout(Duration::from_secs(10), pipeline.producer().check_health())
                .await
                .context("💀 health check timed out")??;
            println!("ok");
        }
    }
    Ok(())
}

/// 📤 Submit every file concurrently. Prints one JSON line per file, returns the failure count.
async fn submit_all(pipeline: &Pipeline, files: &[PathBuf]) -> usize {
    let producer = pipeline.producer();
    let results = join_all(files.iter().map(|path| {
        let producer = producer.clone();
        async move {
            let bytes = match tokio::fs::read(path).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    let body = serde_json::json!({ "error": format!("failed to read '{}': {err}", path.display()) });
                    return Err(body);
                }
            };
            producer
                .submit(Upload::post(file_name(path), bytes))
                .await
                .map_err(|e| e.error_body())
        }
    }))
    .await;

    let mut failures = 0;
    for (path, result) in files.iter().zip(results) {
        match result {
            Ok(receipt) => match serde_json::to_string(&receipt) {
                Ok(line) => println!("{line}"),
                Err(err) => warn!(file = %path.display(), error = %err, "💀 couldn't render receipt"),
            },
            Err(body) => {
                failures += 1;
                eprintln!("{}: {body}", path.display());
            }
        }
    }
    failures
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "⚠️ couldn't listen for Ctrl-C, running until the queue says stop");
        std::future::pending::<()>().await;
    }
    info!("🛑 Ctrl-C received, finishing the current message and stopping");
}
