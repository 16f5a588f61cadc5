use std::{path::PathBuf, sync::Arc};

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use rayon::prelude::*;
use roadsnap::{
    MatchResult, ReplayState, RoadMatcher,
    config::{EventArgs, MatchingArgs, RoadArgs, StreamArgs},
    io::{load_events, load_road_catalog},
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    sync::mpsc,
};

#[derive(Parser)]
#[command(name = "roadsnap", version, about = "Match vehicle events to road segments")]
struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Match a whole event feed and report match rate and distances
    Analyze {
        #[command(flatten)]
        roads: RoadArgs,
        #[command(flatten)]
        events: EventArgs,
        #[command(flatten)]
        matching: MatchingArgs,
    },
    /// Match a single coordinate
    Probe {
        #[command(flatten)]
        roads: RoadArgs,
        #[command(flatten)]
        matching: MatchingArgs,
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        /// Degrees clockwise from north
        #[arg(long)]
        heading: Option<f64>,
    },
    /// Decode road records once and store them as a binary catalog
    Snapshot {
        #[command(flatten)]
        roads: RoadArgs,
        #[arg(long)]
        out: PathBuf,
    },
    /// Stream matched events to stdout as JSON lines, reading controls from stdin
    Replay {
        #[command(flatten)]
        roads: RoadArgs,
        #[command(flatten)]
        events: EventArgs,
        #[command(flatten)]
        matching: MatchingArgs,
        #[command(flatten)]
        stream: StreamArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::builder()
        .filter_level(level)
        .parse_default_env()
        .format_target(false)
        .format_timestamp(None)
        .target(env_logger::Target::Stderr)
        .init();

    match cli.command {
        Command::Analyze {
            roads,
            events,
            matching,
        } => analyze(&roads, &events, &matching),
        Command::Probe {
            roads,
            matching,
            lon,
            lat,
            heading,
        } => probe(&roads, &matching, lon, lat, heading),
        Command::Snapshot { roads, out } => {
            let catalog = load_road_catalog(&roads.roads, &roads.catalog_config())?;
            catalog.write_snapshot(&out)
        }
        Command::Replay {
            roads,
            events,
            matching,
            stream,
        } => replay(&roads, &events, &matching, &stream).await,
    }
}

fn build_matcher(roads: &RoadArgs, matching: &MatchingArgs) -> Result<RoadMatcher> {
    let catalog = load_road_catalog(&roads.roads, &roads.catalog_config())?;
    Ok(RoadMatcher::new(Arc::new(catalog), matching.matcher_config()))
}

fn analyze(roads: &RoadArgs, events: &EventArgs, matching: &MatchingArgs) -> Result<()> {
    let matcher = build_matcher(roads, matching)?;
    let feed = load_events(&events.events, &events.columns, events.event_type_filter())?;
    if feed.is_empty() {
        bail!("No events to analyze in {}", events.events.display());
    }

    let progress = ProgressBar::new(feed.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} events ({eta})")?
            .progress_chars("##-"),
    );

    let results: Vec<MatchResult> = feed
        .par_iter()
        .map(|event| {
            let result = matcher.match_point(event.lon, event.lat, event.heading);
            progress.inc(1);
            result
        })
        .collect();
    progress.finish_and_clear();

    let mut distances: Vec<f64> = results.iter().filter_map(|r| r.distance_m).collect();
    let matched = distances.len();
    info!(
        "Matched {} of {} events ({:.1}%)",
        matched,
        feed.len(),
        matched as f64 / feed.len() as f64 * 100.0
    );
    if distances.is_empty() {
        warn!("No matches found");
        return Ok(());
    }

    distances.sort_by(f64::total_cmp);
    let mean = distances.iter().sum::<f64>() / matched as f64;
    let median = if matched % 2 == 0 {
        (distances[matched / 2 - 1] + distances[matched / 2]) / 2.0
    } else {
        distances[matched / 2]
    };

    println!("Total events:     {}", feed.len());
    println!(
        "Matched:          {} ({:.1}%)",
        matched,
        matched as f64 / feed.len() as f64 * 100.0
    );
    println!("Average distance: {:.2} m", mean);
    println!("Median distance:  {:.2} m", median);
    println!("Min distance:     {:.2} m", distances[0]);
    println!("Max distance:     {:.2} m", distances[matched - 1]);
    Ok(())
}

fn probe(
    roads: &RoadArgs,
    matching: &MatchingArgs,
    lon: f64,
    lat: f64,
    heading: Option<f64>,
) -> Result<()> {
    let matcher = build_matcher(roads, matching)?;
    let result = matcher.match_point(lon, lat, heading);
    println!("{}", serde_json::to_string_pretty(&result)?);

    if let Some(feature) = result
        .segment_id
        .as_deref()
        .and_then(|id| matcher.segment_geojson(id))
    {
        println!("{}", serde_json::to_string_pretty(&feature)?);
    }
    Ok(())
}

async fn replay(
    roads: &RoadArgs,
    events: &EventArgs,
    matching: &MatchingArgs,
    stream: &StreamArgs,
) -> Result<()> {
    let matcher = build_matcher(roads, matching)?;
    let feed = load_events(&events.events, &events.columns, events.event_type_filter())?;
    let state = ReplayState::new(matcher, feed);

    let (tx, mut rx) = mpsc::channel(1024);
    let mut controller = state.attach(stream.settings(), tx);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut stdout = tokio::io::stdout();

    loop {
        tokio::select! {
            message = rx.recv() => {
                let Some(message) = message else { break };
                let mut line = serde_json::to_vec(&message)?;
                line.push(b'\n');
                stdout.write_all(&line).await?;
            }
            line = stdin.next_line(), if stdin_open => {
                match line? {
                    Some(text) => {
                        controller.send_text(&text);
                    }
                    None => {
                        stdin_open = false;
                        controller.close_controls();
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping replay");
                break;
            }
        }
    }

    stdout.flush().await?;
    controller.shutdown().await;
    Ok(())
}
