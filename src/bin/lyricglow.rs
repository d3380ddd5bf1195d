//! Cache inspection, one-shot lookups and a stdin-driven watch loop.
//!
//! Usage:
//!   lyricglow list
//!   lyricglow delete lyrics "hurt-johnny cash"
//!   lyricglow lyrics "Hurt" "Johnny Cash"
//!   player-bridge | lyricglow watch

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use bytesize::ByteSize;
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use log::{debug, info};
use serde_json::json;

use lyricglow::cache::decode_image_data_uri;
use lyricglow::logging::init_logging;
use lyricglow::{merge_artist_metadata, AppContext, CacheKind, Config, JsonLinesSource, TrackSnapshot, Update};

#[derive(Debug, Parser)]
#[command(name = "lyricglow")]
#[command(author, version, about = "Offline-first lyrics and artist metadata cache", long_about = None)]
struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only print errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Treat the network as unreachable; serve cached data regardless of age
    #[arg(long, global = true)]
    offline: bool,

    /// Cache directory (overrides config and LYRICGLOW_CACHE_DIR)
    #[arg(long, global = true, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List every cache entry with its age and size
    List,
    /// Entry counts per kind and the age range
    Stats,
    /// Remove one entry
    Delete {
        /// images, lyrics or metadata
        kind: CacheKind,
        key: String,
    },
    /// Remove every entry
    Clear,
    /// Remove entries older than the cache duration (only when online)
    ClearExpired,
    /// Look up synced lyrics
    Lyrics { title: String, artist: String },
    /// Look up merged artist metadata
    Artist { name: String },
    /// Fetch an image through the cache
    Image {
        url: String,
        /// Write the decoded image here instead of printing the data URI
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
    /// Read track snapshots (one JSON object per line) from stdin and print
    /// enrichment updates as JSON lines
    Watch {
        /// Pause between snapshots in milliseconds (defaults to the configured poll interval)
        #[arg(long, value_name = "MS")]
        interval_ms: Option<u64>,
    },
    /// Show the effective configuration
    Config {
        /// Also write it to the config file
        #[arg(long)]
        save: bool,
    },
}

fn format_timestamp(millis: i64) -> String {
    DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "?".to_string())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load().context("Failed to load configuration")?;
    config.merge(&Config {
        cache_dir: cli.cache_dir.clone(),
        ..Config::default()
    });

    if let Commands::Config { save } = cli.command {
        config.print("Effective configuration");
        if save {
            config.save().context("Failed to save configuration")?;
            println!("Saved to {}", Config::get_config_path()?.display());
        }
        return Ok(());
    }

    let ctx = AppContext::build(&config, cli.offline).context("Failed to start")?;
    let cache = &ctx.cache;

    match cli.command {
        Commands::List => {
            let entries = cache.list_all_entries();
            if entries.is_empty() {
                println!("Cache is empty");
            }
            for entry in &entries {
                println!(
                    "{:<9} {}  {:>10}  {}",
                    entry.kind,
                    format_timestamp(entry.timestamp),
                    ByteSize::b(cache.entry_size(entry.kind, &entry.key)).to_string(),
                    entry.key
                );
            }
        }
        Commands::Stats => {
            let stats = cache.stats();
            println!("Cache: {}", cache.root().display());
            for kind in CacheKind::ALL {
                println!("  {:<9} {}", kind, stats.kinds.get(&kind).copied().unwrap_or(0));
            }
            println!("  total     {}", stats.total);
            if let (Some(oldest), Some(newest)) = (stats.oldest_entry, stats.newest_entry) {
                println!("  oldest    {}", format_timestamp(oldest));
                println!("  newest    {}", format_timestamp(newest));
            }
        }
        Commands::Delete { kind, key } => {
            if cache.delete_one(kind, &key) {
                println!("Deleted {}/{}", kind, key);
            } else {
                println!("No {} entry for {}", kind, key);
            }
        }
        Commands::Clear => {
            cache.clear_all();
            println!("Cache cleared");
        }
        Commands::ClearExpired => {
            let removed = cache.clear_expired();
            println!("Removed {} expired entries", removed);
        }
        Commands::Lyrics { title, artist } => match ctx.enricher.lyrics().fetch_lyrics(&title, &artist) {
            Some(lyrics) => println!("{}", lyrics.synced),
            None => anyhow::bail!("No synced lyrics found for {} - {}", artist, title),
        },
        Commands::Artist { name } => {
            let track = TrackSnapshot {
                artist: name.clone(),
                ..TrackSnapshot::default()
            };
            let audiodb = ctx.enricher.audiodb().fetch_metadata(&name);
            let spotify = ctx.enricher.spotify().fetch_metadata(&track);
            match merge_artist_metadata(audiodb, spotify) {
                Some(merged) => print_json(&merged)?,
                None => anyhow::bail!("No metadata found for {}", name),
            }
        }
        Commands::Image { url, out } => {
            let uri = ctx
                .enricher
                .images()
                .get_image(&url)
                .with_context(|| format!("Image unavailable: {}", url))?;
            match out {
                Some(path) => {
                    let bytes = decode_image_data_uri(&uri)?;
                    fs::write(&path, &bytes).with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("Wrote {} to {}", ByteSize::b(bytes.len() as u64), path.display());
                }
                None => println!("{}", uri),
            }
        }
        Commands::Watch { interval_ms } => {
            let interval = interval_ms.map(Duration::from_millis).unwrap_or_else(|| config.poll_interval());
            let mut source = JsonLinesSource::new(io::stdin().lock());
            let mut stdout = io::stdout();
            let mut write_error = None;

            info!("Watching stdin for track snapshots");
            lyricglow::enrich::watch(&ctx.enricher, cache, &mut source, interval, |update| {
                let line = match update {
                    Update::Track(track, enrichment) => json!({
                        "event": "track",
                        "track": track,
                        "lyrics": enrichment.lyrics,
                        "metadata": enrichment.artist,
                        "artwork": enrichment.artwork,
                    }),
                    Update::Cleared => json!({ "event": "cleared" }),
                };
                if let Err(e) = writeln!(stdout, "{}", line).and_then(|_| stdout.flush()) {
                    write_error.get_or_insert(e);
                }
            });
            if let Some(e) = write_error {
                return Err(e).context("Failed to write updates");
            }
        }
        Commands::Config { .. } => {}
    }

    debug!("Connection mode: {}", ctx.fetch.connection_mode());
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
