//! CLI entry point for paper-capture.

use std::fs::File;
use std::io::{self, BufReader, IsTerminal};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use capture_core::acquire::resolve_unique_path;
use capture_core::session::{SessionCookie, parse_netscape_cookies};
use capture_core::{
    AcquireError, CaptureReport, CaptureResult, CaptureStatus, DetectionOrchestrator, EngineConfig, HttpSession,
    ProxySettings, PublicationHint,
};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

mod app_config;
mod cli;
mod progress;

use app_config::{FileConfig, load_config};
use cli::Args;
use progress::ProgressUi;

/// Buffer for host events; a navigation emits at most a dozen.
const EVENT_BUFFER: usize = 64;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();
    let loaded = load_config(args.config.as_deref())?;
    let file_config = loaded.config.unwrap_or_default();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > config verbosity > info
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => file_config.verbosity.map_or("info", |v| v.level()),
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, config_path = ?loaded.path, "CLI arguments parsed");

    let engine_config = build_engine_config(&args, &file_config);
    let output_dir = args
        .output_dir
        .clone()
        .or_else(|| file_config.output_dir.clone())
        .unwrap_or_else(|| PathBuf::from("."));

    let cookies = load_cookies(&args)?;
    let session = Arc::new(
        HttpSession::new(cookies, engine_config.user_agent.clone())
            .context("Failed to initialize HTTP session")?
            .with_native_display_heuristic(engine_config.native_display),
    );

    let captured: Arc<Mutex<Option<CaptureResult>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&captured);
    let hint = PublicationHint::from_authors(
        args.author.as_deref().unwrap_or(""),
        args.year.as_deref(),
        args.title.as_deref(),
    );
    let orchestrator = DetectionOrchestrator::new(session.clone(), &engine_config, move |result| {
        *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(result);
    })
    .with_publication_hint(hint);

    let show_progress = !args.quiet && !args.json && io::stderr().is_terminal();
    let ui = ProgressUi::spawn(show_progress, orchestrator.subscribe());
    let orchestrator = orchestrator.with_progress(ui.download_callback());

    info!(url = %args.url, "Capture starting");
    let mut outcome = capture(&session, &orchestrator, &args.url).await?;

    if let Err(AcquireError::Exhausted {
        proxy_retry_url: Some(proxy_url),
        ..
    }) = &outcome
        && args.use_proxy
    {
        info!(url = %proxy_url, "Retrying through library proxy");
        let proxy_url = proxy_url.clone();
        outcome = capture(&session, &orchestrator, &proxy_url).await?;
    }
    ui.finish();

    let report = match outcome {
        Ok(report) => {
            let result = captured
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
                .context("Capture reported success without delivering bytes")?;
            let path = save_capture(&output_dir, &result).await?;
            report.with_saved_to(path)
        }
        Err(error) => {
            if !error.is_user_visible() {
                debug!(error = %error, "Capture ended without a user-facing error");
            }
            CaptureReport::from_error(&args.url, &error)
        }
    };

    emit_report(&report, args.json)?;
    Ok(if report.saved_to.is_some() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// File config first, then CLI flags on top.
fn build_engine_config(args: &Args, file_config: &FileConfig) -> EngineConfig {
    let mut config = EngineConfig::default();
    file_config.apply_to(&mut config);

    if let Some(offsets) = &args.retry_offsets {
        config = config.with_retry_offsets_ms(offsets);
    }
    if let Some(dir) = &args.temp_dir {
        config = config.with_temp_dir(dir);
    }
    if let Some(proxy) = &args.library_proxy {
        config = config.with_proxy(ProxySettings::enabled(proxy.clone()));
    }
    config
}

fn load_cookies(args: &Args) -> Result<Vec<SessionCookie>> {
    let Some(path) = args.cookies.as_deref() else {
        return Ok(Vec::new());
    };

    let parsed = if args.cookies_from_stdin() {
        parse_netscape_cookies(io::stdin().lock()).context("Failed to parse cookies from stdin")?
    } else {
        let file = File::open(path)
            .with_context(|| format!("Failed to open cookie file '{}'", path.display()))?;
        parse_netscape_cookies(BufReader::new(file))
            .with_context(|| format!("Failed to parse cookie file '{}'", path.display()))?
    };

    for skipped in &parsed.skipped {
        warn!(line = skipped.line, reason = %skipped.reason, "Skipped cookie entry");
    }
    info!(count = parsed.cookies.len(), "Loaded session cookies");
    Ok(parsed.cookies)
}

/// Loads `url` in the session and runs the orchestrator over its events.
async fn capture(
    session: &HttpSession,
    orchestrator: &DetectionOrchestrator,
    url: &str,
) -> Result<Result<CaptureReport, AcquireError>> {
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    session
        .navigate(url, &tx)
        .await
        .with_context(|| format!("Failed to load '{url}'"))?;
    drop(tx);

    tokio::select! {
        result = orchestrator.run(rx) => Ok(result),
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            warn!("Interrupted; cancelling capture");
            orchestrator.cancel();
            Ok(Err(AcquireError::Cancelled))
        }
    }
}

async fn save_capture(output_dir: &Path, result: &CaptureResult) -> Result<PathBuf> {
    tokio::fs::create_dir_all(output_dir)
        .await
        .with_context(|| format!("Failed to create output directory '{}'", output_dir.display()))?;
    let path = resolve_unique_path(output_dir, &result.suggested_filename);
    tokio::fs::write(&path, &result.bytes)
        .await
        .with_context(|| format!("Failed to write '{}'", path.display()))?;
    info!(path = %path.display(), bytes = result.bytes.len(), "Saved capture");
    Ok(path)
}

fn emit_report(report: &CaptureReport, json: bool) -> Result<()> {
    if json {
        let rendered =
            serde_json::to_string_pretty(report).context("Failed to serialize capture report")?;
        println!("{rendered}");
        return Ok(());
    }

    match (&report.saved_to, &report.message) {
        (Some(path), _) => println!(
            "Saved {} ({} bytes from {})",
            path.display(),
            report.bytes,
            report.source_url.as_deref().unwrap_or(&report.url)
        ),
        (None, Some(message)) => eprintln!("{message}"),
        (None, None) if report.status == CaptureStatus::Cancelled => {
            eprintln!("Capture cancelled for {}", report.url);
        }
        (None, None) => eprintln!("Capture failed for {}", report.url),
    }
    Ok(())
}
