// src/main.rs

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures_util::{stream, Stream, StreamExt};
use plgrab::models::MediaInfo;
use plgrab::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(
    name = "plgrab",
    version,
    about = "Download videos and playlists through a media download service"
)]
struct Args {
    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Base URL of the download service
    #[arg(long, global = true)]
    server: Option<String>,

    /// Directory artifacts are written to
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show what a URL points to
    Info { url: String },
    /// Download a single video
    Video {
        url: String,
        #[arg(short, long, default_value = "mp4")]
        format: MediaFormat,
        /// itag or quality label; defaults to the first listed format for mp4
        #[arg(long)]
        quality: Option<String>,
    },
    /// Download every entry of a playlist, one at a time
    Playlist {
        url: String,
        #[arg(short, long, default_value = "mp3")]
        format: MediaFormat,
        #[arg(long)]
        quality: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    if let Err(e) = run(args).await {
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}

async fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .await
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(server) = &args.server {
        config.server_url = server.clone();
    }
    if let Some(output) = &args.output {
        config.output_dir = output.clone();
    }
    config.validate()?;
    Ok(config)
}

fn ctrl_c_presses() -> impl Stream<Item = ()> {
    stream::unfold((), |()| async {
        tokio::signal::ctrl_c().await.ok().map(|()| ((), ()))
    })
}

/// The first interrupt asks the run to stop after the current item. Resolves
/// to true if a second one follows.
async fn second_interrupt(
    interrupts: impl Stream<Item = ()>,
    orchestrator: &BatchOrchestrator,
) -> bool {
    let mut interrupts = Box::pin(interrupts);
    if interrupts.next().await.is_none() {
        return false;
    }
    info!("interrupt received, finishing current item (Ctrl-C again to quit now)");
    orchestrator.request_stop();
    interrupts.next().await.is_some()
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(&args).await?;
    let metadata = MetadataClient::new(&config)?;

    match args.command {
        Command::Info { url } => match metadata.fetch_info(&url).await? {
            MediaInfo::Video { video } => {
                println!("{} [{}]", video.title, video.duration);
                if !video.description.is_empty() {
                    println!("{}", video.description);
                }
                for f in &video.formats {
                    println!("  {:>4}  {}", f.itag, f.display_label());
                }
            }
            MediaInfo::Playlist { playlist } => {
                println!("{} by {}", playlist.title, playlist.author);
                for (i, v) in playlist.videos.iter().enumerate() {
                    println!("  #{:<3} {}", i + 1, v.title);
                }
            }
        },
        Command::Video {
            url,
            format,
            quality,
        } => {
            let quality = match (format, quality) {
                (MediaFormat::Video, None) => {
                    let video = metadata.fetch_video(&url).await?;
                    match video.default_quality() {
                        Some(q) => Some(q),
                        None => bail!("no quality available for '{}'", video.title),
                    }
                }
                (_, quality) => quality,
            };

            let client = HttpTransferClient::new(&config)?;
            let request = TransferRequest::single(url, format, quality.as_deref());
            info!(url = %request.url, %format, "starting download");
            let artifact = client
                .fetch(&request)
                .await
                .map_err(|e| Error::RequestFailed {
                    url: request.url.clone(),
                    reason: e.reason,
                })?;
            let saved = DirectorySink::new(&config.output_dir).save(&artifact).await?;
            println!("{}", saved.path.display());
        }
        Command::Playlist {
            url,
            format,
            quality,
        } => {
            let collection = metadata.fetch_collection(&url).await?;
            println!(
                "{} by {} ({} items)",
                collection.title,
                collection.author,
                collection.len()
            );

            let orchestrator = Arc::new(
                BatchOrchestrator::new(
                    Arc::new(HttpTransferClient::new(&config)?),
                    Arc::new(DirectorySink::new(&config.output_dir)),
                )
                .with_watch_url_base(config.watch_url_base.clone()),
            );

            let stopper = {
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move {
                    if second_interrupt(ctrl_c_presses(), &orchestrator).await {
                        warn!("second interrupt, exiting without finishing the item");
                        std::process::exit(130);
                    }
                })
            };

            let report = orchestrator
                .start(&collection, format, quality.as_deref())
                .await?;
            stopper.abort();

            println!(
                "{}: {} ({} done, {} failed, {} skipped)",
                report.outcome,
                report.state.summary(),
                report.count(ItemStatus::Done),
                report.count(ItemStatus::Failed),
                report.count(ItemStatus::Skipped),
            );
        }
    }

    Ok(())
}
