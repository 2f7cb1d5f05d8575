//! `echoguide` – runs the guidance engine against a simulated room.
//!
//! 1. Loads `~/.echoguide/config.toml` (writing defaults on first run) and
//!    applies `ECHOGUIDE_*` overrides and command-line flags.
//! 2. Starts the engine on a [`SimWorld`][echoguide_hal::sim::SimWorld] with
//!    a simulated classifier feeding detections.
//! 3. Walks the observer toward the target, printing the audio frames
//!    (coloured text, or JSON lines with `--json`).
//! 4. Stops on arrival, timeout or Ctrl-C, and resets the engine.

mod args;
mod config;
mod scenario;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use echoguide_hal::provider::Classifier;
use echoguide_hal::sim::{RecordingAudioSink, SimClassifier};
use echoguide_runtime::{
    feed_classifier, init_tracing, GuidanceConfig, GuidanceEngine, Providers,
};
use echoguide_types::{GuidanceState, GuideError};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::args::CliArgs;
use crate::config::ConfigSource;
use crate::scenario::{Frame, WalkEnd};

const CLASSIFIER_CONFIDENCE: f32 = 0.85;
const FRAME_INTERVAL: Duration = Duration::from_millis(100);

fn main() -> ExitCode {
    let args = CliArgs::parse();

    let (mut cfg, source) = config::resolve(&config::config_path());
    let _telemetry = init_tracing(&cfg.telemetry("echoguide"));
    match &source {
        ConfigSource::File(p) => info!(path = %p.display(), "config loaded"),
        ConfigSource::Created(p) => info!(path = %p.display(), "default config written"),
        ConfigSource::Defaults(e) => warn!(error = %e, "config unusable; running on defaults"),
    }

    if let Some(style) = args.style {
        cfg.guidance.guidance_style = style.into();
    }
    if args.no_alerts {
        cfg.guidance.alert_enabled = false;
    }

    if !args.json {
        print_banner(&args);
    }

    // Built after tracing so the span exporter never needs a runtime.
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: failed to start runtime: {e}", "error".red().bold());
            return ExitCode::FAILURE;
        }
    };

    let json = args.json;
    match runtime.block_on(run(args, cfg.guidance)) {
        Ok(end) => {
            if !json {
                print_summary(end);
            }
            info!(?end, "walk finished");
            match end {
                WalkEnd::TimedOut => ExitCode::from(2),
                WalkEnd::Arrived { .. } | WalkEnd::Interrupted => ExitCode::SUCCESS,
            }
        }
        Err(e) => {
            eprintln!("{}: {e}", "error".red().bold());
            ExitCode::FAILURE
        }
    }
}

async fn run(args: CliArgs, guidance: GuidanceConfig) -> Result<WalkEnd, GuideError> {
    let (stop_tx, stop_rx) = watch::channel(false);
    let stop_tx = Arc::new(stop_tx);
    {
        let stop_tx = Arc::clone(&stop_tx);
        if let Err(e) = ctrlc::set_handler(move || {
            let _ = stop_tx.send(true);
        }) {
            warn!(error = %e, "failed to install Ctrl-C handler; use --seconds to bound the run");
        }
    }

    let world = Arc::new(scenario::build_world());
    let sink = Arc::new(RecordingAudioSink::new());
    let engine = Arc::new(GuidanceEngine::new(
        guidance,
        Providers::from_sim(world.clone(), sink),
    )?);
    engine.begin_search(&args.label).await?;

    let (det_tx, det_rx) = mpsc::channel(32);
    let classifier: Arc<dyn Classifier> =
        Arc::new(SimClassifier::new(world.clone(), CLASSIFIER_CONFIDENCE));
    let feed = tokio::spawn(feed_classifier(
        classifier,
        FRAME_INTERVAL,
        det_tx,
        stop_rx.clone(),
    ));
    let runner = tokio::spawn(Arc::clone(&engine).run(det_rx, stop_rx.clone()));

    let json = args.json;
    let end = scenario::walk(
        &world,
        &engine,
        Duration::from_secs(args.seconds),
        stop_rx,
        |frame| print_frame(frame, json),
    )
    .await;

    let _ = stop_tx.send(true);
    let (runner, feed) = tokio::join!(runner, feed);
    if let Err(e) = runner.and(feed) {
        warn!(error = %e, "background task ended abnormally");
    }
    engine.reset().await;
    Ok(end)
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn print_frame(frame: &Frame, json: bool) {
    if json {
        match serde_json::to_string(frame) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!(error = %e, "failed to encode frame"),
        }
        return;
    }

    let label = format!("{:<9}", frame.state.to_string());
    let state = match frame.state {
        GuidanceState::Guiding => label.green(),
        GuidanceState::Searching => label.yellow(),
        GuidanceState::Idle | GuidanceState::Resetting => label.dimmed(),
    };
    let distance = frame
        .distance
        .map_or_else(|| "   -   ".to_string(), |d| format!("{d:5.2} m"));
    let out = &frame.output;
    let beep = out
        .beep_interval_ms
        .map(|ms| format!(" beep {ms:>4} ms"))
        .unwrap_or_default();
    let alert = if out.alert_active {
        format!("ALERT vol {:.2} pan {:+.2}", out.alert_volume, out.alert_pan)
            .red()
            .bold()
    } else {
        "clear".dimmed()
    };
    println!(
        "  {:6.2}s  {state}  {distance}  tone vol {:.2} pan {:+.2}{beep}  {alert}",
        frame.elapsed_ms as f64 / 1000.0,
        out.continuous_volume,
        out.continuous_pan,
    );
}

fn print_summary(end: WalkEnd) {
    println!();
    match end {
        WalkEnd::Arrived { distance } => println!(
            "  {} Reached the target ({distance:.2} m away).",
            "✓".green().bold()
        ),
        WalkEnd::TimedOut => println!("  {} Gave up before reaching the target.", "✗".yellow().bold()),
        WalkEnd::Interrupted => println!("  {} Interrupted; guidance reset.", "⚠".yellow().bold()),
    }
    println!();
}

fn print_banner(args: &CliArgs) {
    println!();
    println!(
        "  {} {}",
        "echoguide".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Audio guidance toward a target, simulated room.");
    println!(
        "  Looking for {} for up to {} s. Ctrl-C to stop.",
        args.label.bold(),
        args.seconds
    );
    println!();
}
