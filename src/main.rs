// src/main.rs

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use shard_patcher::config::DEFAULT_SERVER;
use shard_patcher::prelude::*;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "shard-patcher", version, about = "Keeps an EPIC Shard client installation up to date")]
struct Cli {
    /// Patch server as hostname:port
    #[arg(long, global = true, default_value = DEFAULT_SERVER)]
    server: String,
    /// Launcher config file (defaults to ~/.epic_shard_launcher/config.json)
    #[arg(long, global = true)]
    config_file: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Download and verify every file the server's manifest lists
    Update {
        /// Overrides the install directory stored in the config file
        #[arg(long)]
        install_path: Option<PathBuf>,
        /// Verified-file record (defaults to ~/.epic_shard_launcher/state.json)
        #[arg(long)]
        state_file: Option<PathBuf>,
        /// Ask the server for the size of every pending file first
        #[arg(long, default_value_t = false)]
        estimate_size: bool,
        #[arg(long, default_value_t = false)]
        skip_post_install: bool,
        /// Install the client settings meant for playing without Razor
        #[arg(long, default_value_t = false)]
        no_razor: bool,
        /// Directory holding settings.json and settings_no_razor.json
        #[arg(long, default_value = "config")]
        profile_dir: PathBuf,
    },
    /// Show what `update` would download, without downloading it
    Plan {
        #[arg(long)]
        install_path: Option<PathBuf>,
        #[arg(long)]
        state_file: Option<PathBuf>,
    },
    /// Remember the install directory for later runs
    SetPath { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config_path = match cli.config_file {
        Some(path) => path,
        None => LauncherConfig::default_path()?,
    };

    match cli.cmd {
        Cmd::SetPath { path } => set_path(&config_path, path).await,
        Cmd::Plan { install_path, state_file } => {
            let server: ServerAddress = cli.server.parse().context("invalid --server")?;
            let install_root = install_root(&config_path, install_path).await;
            preview(server, install_root, state_manager(state_file)?).await
        }
        Cmd::Update { install_path, state_file, estimate_size, skip_post_install, no_razor, profile_dir } => {
            let server: ServerAddress = cli.server.parse().context("invalid --server")?;
            let install_root = install_root(&config_path, install_path).await;
            let options = UpdateOptions { estimate_size, skip_post_install, with_razor: !no_razor, profile_dir };
            update(server, install_root, state_manager(state_file)?, options).await
        }
    }
}

async fn install_root(config_path: &Path, overridden: Option<PathBuf>) -> Option<PathBuf> {
    match overridden {
        Some(path) => Some(path),
        None => LauncherConfig::load(config_path).await.install_root(),
    }
}

fn state_manager(state_file: Option<PathBuf>) -> Result<StateManager> {
    Ok(match state_file {
        Some(path) => StateManager::new(path),
        None => StateManager::default_location()?,
    })
}

const NO_INSTALL_ROOT: &str = "no install directory selected; run `shard-patcher set-path <dir>` first";

async fn preview(server: ServerAddress, install_root: Option<PathBuf>, state_manager: StateManager) -> Result<()> {
    let patcher = Patcher::new(Downloader::new(DownloadOptions::default())?, state_manager);
    let config = SessionConfig { install_root, server, estimate_size: false };
    let plan = match patcher.preview(config).await {
        Ok(plan) => plan,
        Err(PatchError::MissingInstallRoot) => bail!(NO_INSTALL_ROOT),
        Err(e) => return Err(e.into()),
    };
    for path in plan.pending_paths() {
        println!("{}", path);
    }
    println!("{} file(s) to download, {} up to date or skipped", plan.pending.len(), plan.skipped.len());
    Ok(())
}

async fn set_path(config_path: &Path, path: PathBuf) -> Result<()> {
    tokio::fs::create_dir_all(&path)
        .await
        .with_context(|| format!("could not create {}", path.display()))?;
    let config = LauncherConfig { install_path: path.to_string_lossy().into_owned() };
    config.save(config_path).await?;
    println!("Install directory set to {}", path.display());
    Ok(())
}

struct UpdateOptions {
    estimate_size: bool,
    skip_post_install: bool,
    with_razor: bool,
    profile_dir: PathBuf,
}

async fn update(
    server: ServerAddress,
    install_root: Option<PathBuf>,
    state_manager: StateManager,
    options: UpdateOptions,
) -> Result<()> {
    let downloader = Downloader::new(DownloadOptions::default())?;
    let patcher = Patcher::new(downloader.clone(), state_manager);

    let config = SessionConfig { install_root: install_root.clone(), server, estimate_size: options.estimate_size };
    let mut handle = match patcher.start(config) {
        Ok(handle) => handle,
        Err(PatchError::MissingInstallRoot) => bail!(NO_INSTALL_ROOT),
        Err(e) => return Err(e.into()),
    };

    let token = handle.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\nStopping after the current chunk...");
            token.cancel();
        }
    });

    let mut last_percent = None;
    while let Some(event) = handle.next_event().await {
        match event {
            PatchEvent::Planned { pending, skipped } => {
                println!("{} file(s) to download, {} up to date or skipped", pending, skipped);
            }
            PatchEvent::DownloadSizeEstimated(bytes) => {
                println!("Download size: {:.2} MB", bytes as f64 / (1024.0 * 1024.0));
            }
            PatchEvent::FileStarted { index, total, path } => {
                last_percent = None;
                println!("[{}/{}] Downloading: {}", index + 1, total, path);
            }
            PatchEvent::Bytes { progress, session, .. } => {
                let speed = session.bytes_per_sec() / (1024.0 * 1024.0);
                match progress.fraction() {
                    Some(fraction) => {
                        let percent = (fraction * 100.0) as u32;
                        if last_percent != Some(percent) {
                            last_percent = Some(percent);
                            print!("\r  {:>3}%  {:.2} MB/s", percent, speed);
                        }
                    }
                    None => print!("\r  {} bytes  {:.2} MB/s", progress.downloaded, speed),
                }
                let _ = std::io::stdout().flush();
            }
            PatchEvent::FileFinished { outcome: TransferOutcome::Failed(reason), path, .. } => {
                println!("\n  failed {}: {}", path, reason);
            }
            PatchEvent::FileFinished { .. } => println!(),
            PatchEvent::StateNotPersisted(reason) => {
                eprintln!("warning: could not save download state: {}", reason);
            }
            PatchEvent::Phase(_) | PatchEvent::Skipped { .. } => {}
        }
    }

    let report = handle.wait().await?;
    match report.status {
        SessionStatus::Cancelled => {
            println!("Download stopped. Run update again to continue.");
            return Ok(());
        }
        SessionStatus::Completed if report.all_verified() => {
            println!("All files downloaded and verified!");
        }
        SessionStatus::Completed => {
            println!("Some files failed the hash check (this may not be a problem):");
            for path in &report.failed {
                println!("  {}", path);
            }
        }
    }

    if !options.skip_post_install {
        if let Some(root) = install_root {
            let steps = PostInstall::classicuo(&root, &options.profile_dir, options.with_razor);
            let token = tokio_util::sync::CancellationToken::new();
            let outcome = steps.run(&downloader, &token).await;
            for error in &outcome.errors {
                eprintln!("warning: {}", error);
            }
        }
    }
    println!("Done!");
    Ok(())
}
