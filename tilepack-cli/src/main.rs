//! Tilepack CLI.
//!
//! Downloads an offline pack for a bounding box and prints progress as it
//! goes, then optionally exercises the maintenance operations (invalidate,
//! remove, ambient clear, full reset) against the finished pack.

mod error;

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::debug;

use tilepack::{
    EngineConfig, HttpResourceProvider, LatLon, PackEvent, PackManager, Region, ResourceProvider,
};

use crate::error::CliError;

/// Seconds of event silence before a download counts as stalled.
const STALL_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Parser)]
#[command(name = "tilepack", version, about = "Offline resource packs for tiled map data")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Download a pack covering a bounding box
    Download(DownloadArgs),
}

#[derive(Debug, clap::Args)]
struct DownloadArgs {
    /// South-west corner latitude
    #[arg(long, allow_hyphen_values = true)]
    sw_lat: f64,

    /// South-west corner longitude
    #[arg(long, allow_hyphen_values = true)]
    sw_lon: f64,

    /// North-east corner latitude
    #[arg(long, allow_hyphen_values = true)]
    ne_lat: f64,

    /// North-east corner longitude
    #[arg(long, allow_hyphen_values = true)]
    ne_lon: f64,

    /// Lowest zoom level to download
    #[arg(long, default_value_t = 0)]
    min_zoom: u8,

    /// Highest zoom level to download
    #[arg(long, default_value_t = 0)]
    max_zoom: u8,

    /// Style document URL
    #[arg(long)]
    style_url: String,

    /// Tile URL template with {z}/{x}/{y} placeholders
    #[arg(long)]
    tile_url: String,

    /// Display name for the pack
    #[arg(long, default_value = "unnamed")]
    name: String,

    /// Cap on the number of tiles to download
    #[arg(long)]
    max_tiles: Option<u64>,

    /// Concurrent fetches for this pack
    #[arg(long)]
    fan_out: Option<usize>,

    /// Mark every downloaded resource invalid after the download
    #[arg(long)]
    invalidate: bool,

    /// Remove the pack after the download, releasing its resources
    #[arg(long)]
    delete: bool,

    /// Clear the ambient cache after the download
    #[arg(long)]
    clear_ambient: bool,

    /// Reset the whole store after the download
    #[arg(long)]
    reset: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Download(args) => download(args).await,
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn download(args: DownloadArgs) -> Result<(), CliError> {
    let region = Region::new(
        LatLon::new(args.sw_lat, args.sw_lon)?,
        LatLon::new(args.ne_lat, args.ne_lon)?,
        args.min_zoom,
        args.max_zoom,
        &args.style_url,
    )?;
    println!(
        "Region spans {} tiles across zoom {}..={}.",
        region.tile_count(),
        args.min_zoom,
        args.max_zoom
    );

    let mut config = EngineConfig::default();
    if let Some(max_tiles) = args.max_tiles {
        config = config.with_max_tiles(max_tiles);
    }
    if let Some(fan_out) = args.fan_out {
        config = config.with_fan_out(fan_out);
    }

    let provider =
        Arc::new(HttpResourceProvider::new(&args.tile_url)?) as Arc<dyn ResourceProvider>;
    let manager = PackManager::new(provider, config);

    let mut events = manager.subscribe();
    let pack = manager.add_pack(region, args.name.clone().into_bytes());
    manager.resume(pack.id)?;

    let stall = Duration::from_secs(STALL_TIMEOUT_SECS);
    loop {
        let event = tokio::time::timeout(stall, events.next())
            .await
            .map_err(|_| CliError::Stalled(STALL_TIMEOUT_SECS))?;
        let Some(event) = event else { break };
        debug!(?event, "pack event");

        match event {
            PackEvent::ProgressChanged { progress, .. } => {
                let pct = if progress.resources_expected == 0 {
                    0
                } else {
                    progress.resources_completed * 100 / progress.resources_expected
                };
                println!(
                    "Offline pack “{}” has {} of {} resources — {}%.",
                    args.name, progress.resources_completed, progress.resources_expected, pct
                );
            }
            PackEvent::ResourceError { reason, .. } => {
                eprintln!("resource failed: {reason}");
            }
            PackEvent::QuotaReached { max_tiles, .. } => {
                println!("Tile limit of {max_tiles} reached; no further tiles will download.");
                break;
            }
            PackEvent::Completed { .. } => {
                let snapshot = manager.get(pack.id)?;
                println!(
                    "Offline pack “{}” completed: {} resources, {} bytes.",
                    args.name,
                    snapshot.progress.resources_completed,
                    snapshot.progress.bytes_completed
                );
                break;
            }
        }
    }

    if args.invalidate {
        manager.invalidate(pack.id)?;
        println!("Pack “{}” invalidated; next resume re-downloads.", args.name);
    }
    if args.clear_ambient {
        manager.clear_ambient_cache();
        println!("Ambient cache cleared.");
    }
    if args.delete {
        manager.remove(pack.id)?;
        println!("Pack “{}” removed.", args.name);
    }
    if args.reset {
        manager.reset_database();
        println!("Store reset; all packs inactive.");
    }

    Ok(())
}
