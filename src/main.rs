// src/main.rs

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use speedload::prelude::*;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "speedload", version, about = "Section-packed CDN asset loader")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Download the configured packages into the game directory.
    Download(CommonArgs),
    /// Hash the files already in the game directory against their indexes.
    Verify(CommonArgs),
}

#[derive(Debug, Args)]
struct CommonArgs {
    game_dir: PathBuf,
    #[arg(long)]
    version: Option<String>,
    #[arg(long)]
    language: Option<String>,
    /// Comma separated list of base, tracks, trackshigh, speech.
    #[arg(long, value_delimiter = ',')]
    packages: Option<Vec<Package>>,
    /// Maximum number of section groups processed at once.
    #[arg(long)]
    parallel: Option<usize>,
    #[arg(long)]
    hash_db: Option<PathBuf>,
    #[arg(long)]
    cdn_root: Option<String>,
    /// Skip the verification pass after downloading.
    #[arg(long)]
    no_verify: bool,
    /// JSON settings file; flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,
}

impl CommonArgs {
    async fn settings(&self) -> Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::from_json_file(path).await?,
            None => Settings::default(),
        };
        settings.cdn.game_dir = self.game_dir.clone();
        if let Some(version) = &self.version {
            settings.cdn.version = version.clone();
        }
        if let Some(language) = &self.language {
            settings.cdn.language = language.clone();
        }
        if let Some(packages) = &self.packages {
            settings.cdn.packages = packages.clone();
        }
        if let Some(root) = &self.cdn_root {
            settings.cdn.cdn_root = root.clone();
        }
        if let Some(parallel) = self.parallel {
            settings.loader.max_parallel_groups = parallel;
        }
        if let Some(db) = &self.hash_db {
            settings.loader.hash_db = Some(db.clone());
        }
        if self.no_verify {
            settings.loader.verify_after_download = false;
        }
        Ok(settings)
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("speedload=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn build_sources(args: &CommonArgs) -> Result<Sources> {
    let settings = args.settings().await?;
    let mut manager = DownloadManager::new(settings.loader, settings.cdn).await?;
    manager.add_listener(Arc::new(TracingListener::default()));
    let manager = Arc::new(manager);

    let token = manager.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl+C received, cancelling");
            token.cancel();
        }
    });

    let mut sources = Sources::new();
    sources.add(manager);
    Ok(sources)
}

fn finish(summary: SourceSummary, action: &str) -> Result<()> {
    info!(files = summary.files, failed = summary.mismatches, "{action}");
    if summary.mismatches > 0 {
        bail!("{} file(s) failed verification", summary.mismatches);
    }
    Ok(())
}

async fn download(args: &CommonArgs) -> Result<()> {
    let sources = build_sources(args).await?;
    let summary = sources.download_all().await.map_err(|e| anyhow::anyhow!(e))?;
    finish(summary, "downloaded")
}

async fn verify(args: &CommonArgs) -> Result<()> {
    let sources = build_sources(args).await?;
    let summary = sources.verify_all().await.map_err(|e| anyhow::anyhow!(e))?;
    finish(summary, "verified")
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = match &cli.command {
        Command::Download(args) => download(args).await,
        Command::Verify(args) => verify(args).await,
    };

    if let Err(e) = result {
        error!("{e:#}");
        std::process::exit(1);
    }
}
