//! headsetd
//!
//! Replays raw headset notifications against a scripted device and prints
//! the normalized application events as JSON lines on stdout.

use std::path::{Path, PathBuf};

use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use headsetd::{
    capabilities::parse_product_id, CapabilityTable, CapabilityWatcher, Config, DeviceController,
    DeviceProfile, NormalizedEvent, RawEvent, ReplayStep, Simulator,
};

/// Replay steps buffered between the reader and the engine
const STEP_CHANNEL_CAPACITY: usize = 64;

/// headsetd - Normalizes raw headset notifications into application events
#[derive(Parser, Debug)]
#[command(name = "headsetd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/headsetd/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Capability table path, overrides the configuration
    #[arg(long)]
    capabilities: Option<PathBuf>,

    /// Device profile (JSON) plugged in at startup
    #[arg(short, long)]
    device: Option<PathBuf>,

    /// Replay script (JSON lines), read from stdin when absent
    #[arg(short, long)]
    events: Option<PathBuf>,

    /// Drop docking and wear events produced by the startup poll
    #[arg(long)]
    suppress_initial: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Print the resolved capabilities of a product id and exit
    #[arg(long, value_name = "PRODUCT_ID")]
    resolve: Option<String>,

    /// Product name used with --resolve
    #[arg(long, requires = "resolve")]
    name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging; stdout carries events only
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = match &args.config {
        Some(path) => Config::load(path),
        None => Config::load_default(),
    }
    .unwrap_or_else(|e| {
        warn!("Failed to load config, using defaults: {}", e);
        Config::default()
    });
    if let Some(path) = &args.capabilities {
        config.capabilities_file = Some(path.clone());
    }
    let suppress_initial = args.suppress_initial || config.suppress_initial_state;

    let capabilities_path = config.capabilities_path();
    let table = CapabilityTable::load_or_empty(&capabilities_path);

    // Handle --resolve flag
    if let Some(product_id) = &args.resolve {
        let product_id = parse_product_id(product_id)
            .ok_or_else(|| format!("invalid product id: {}", product_id))?;
        let capabilities = table.resolve(product_id, args.name.as_deref().unwrap_or(""));
        println!("{}", serde_json::to_string_pretty(&capabilities)?);
        return Ok(());
    }

    info!("headsetd starting...");

    // Keep the watcher alive for the lifetime of the engine
    let (_watcher, reloads) = if config.watch_capabilities {
        match CapabilityWatcher::start(&capabilities_path) {
            Ok((watcher, rx)) => {
                info!(path = %watcher.path().display(), "Capability table hot reload enabled");
                (Some(watcher), rx)
            }
            Err(e) => {
                warn!("Capability table hot reload unavailable: {}", e);
                (None, mpsc::unbounded_channel().1)
            }
        }
    } else {
        (None, mpsc::unbounded_channel().1)
    };

    let (feedback_tx, feedback_rx) = mpsc::unbounded_channel::<RawEvent>();
    let simulator = Simulator::with_feedback(feedback_tx);
    if let Some(path) = &args.device {
        let profile = load_profile(path)?;
        info!(
            product_id = %format!("0x{:04X}", profile.product_id),
            name = %profile.product_name,
            "Device profile plugged in"
        );
        simulator.plug(profile);
    }

    let (event_tx, event_rx) = mpsc::unbounded_channel::<NormalizedEvent>();
    let controller = DeviceController::new(Box::new(simulator.session()), table, event_tx);

    let input: Box<dyn AsyncRead + Unpin + Send> = match &args.events {
        Some(path) => Box::new(tokio::fs::File::open(path).await?),
        None => Box::new(tokio::io::stdin()),
    };

    let (step_tx, step_rx) = mpsc::channel::<ReplayStep>(STEP_CHANNEL_CAPACITY);

    let reader_handle =
        tokio::spawn(async move { run_reader(BufReader::new(input), step_tx).await });
    let printer_handle = tokio::spawn(async move { run_printer(event_rx, suppress_initial).await });
    let engine_handle = tokio::spawn(async move {
        run_engine(controller, simulator, step_rx, feedback_rx, reloads).await
    });

    info!("headsetd ready");

    let finished = async {
        if let Err(e) = engine_handle.await {
            error!("Engine task panicked: {:?}", e);
        }
        match printer_handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Failed to write events: {}", e),
            Err(e) => error!("Printer task panicked: {:?}", e),
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, exiting...");
        }
        _ = finished => {
            info!("Replay finished");
        }
    }

    reader_handle.abort();
    Ok(())
}

/// Load a device profile from a JSON file
fn load_profile(path: &Path) -> Result<DeviceProfile, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Parse one line of a replay script
///
/// Blank lines and `#` comments yield `None`.
fn parse_step(line: &str) -> Result<Option<ReplayStep>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    serde_json::from_str(line).map(Some)
}

/// Read replay steps and forward them in order
///
/// Malformed lines are logged and skipped.
async fn run_reader<R: AsyncBufRead + Unpin>(reader: R, step_tx: mpsc::Sender<ReplayStep>) {
    let mut lines = LinesStream::new(reader.lines());
    let mut line_number = 0usize;

    while let Some(line) = lines.next().await {
        line_number += 1;
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to read replay input: {}", e);
                break;
            }
        };

        match parse_step(&line) {
            Ok(Some(step)) => {
                if step_tx.send(step).await.is_err() {
                    debug!("Engine stopped, no longer reading input");
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => warn!(line = line_number, error = %e, "Skipping malformed replay step"),
        }
    }

    debug!(lines = line_number, "Replay input exhausted");
}

/// Own the controller and dispatch every raw event to completion
///
/// Device feedback is drained before the next scripted step, so events
/// raised by a query are handled as part of the step that caused them.
async fn run_engine(
    mut controller: DeviceController<mpsc::UnboundedSender<NormalizedEvent>>,
    simulator: Simulator,
    mut steps: mpsc::Receiver<ReplayStep>,
    mut feedback: mpsc::UnboundedReceiver<RawEvent>,
    mut reloads: mpsc::UnboundedReceiver<CapabilityTable>,
) {
    if !controller.attach() {
        info!("No headset attached, waiting for a device");
    }

    loop {
        tokio::select! {
            biased;

            Some(event) = feedback.recv() => controller.handle(event),
            Some(table) = reloads.recv() => controller.set_capability_table(table),
            step = steps.recv() => match step {
                Some(step) => {
                    if let Some(event) = simulator.apply(step) {
                        controller.handle(event);
                    }
                }
                None => break,
            },
        }
    }

    // Feedback raised by the final step
    while let Ok(event) = feedback.try_recv() {
        controller.handle(event);
    }
}

/// Write normalized events to stdout as JSON lines
async fn run_printer(
    mut events: mpsc::UnboundedReceiver<NormalizedEvent>,
    suppress_initial: bool,
) -> std::io::Result<()> {
    let mut stdout = tokio::io::stdout();

    while let Some(event) = events.recv().await {
        if suppress_initial && event.is_initial_state() {
            debug!(event = event.name(), "Suppressed initial state event");
            continue;
        }

        let mut line = serde_json::to_string(&event)?;
        line.push('\n');
        stdout.write_all(line.as_bytes()).await?;
        stdout.flush().await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["headsetd"]).unwrap();
        assert!(args.config.is_none());
        assert!(args.events.is_none());
        assert!(!args.suppress_initial);
        assert!(!args.verbose);
    }

    #[test]
    fn test_args_resolve() {
        let args = Args::try_parse_from([
            "headsetd", "--resolve", "0xAC01", "--name", "Savi 7xx",
        ])
        .unwrap();
        assert_eq!(args.resolve.as_deref(), Some("0xAC01"));
        assert_eq!(args.name.as_deref(), Some("Savi 7xx"));
    }

    #[test]
    fn test_args_name_requires_resolve() {
        assert!(Args::try_parse_from(["headsetd", "--name", "Savi 7xx"]).is_err());
    }

    #[test]
    fn test_parse_step_skips_blank_and_comments() {
        assert!(parse_step("").unwrap().is_none());
        assert!(parse_step("   ").unwrap().is_none());
        assert!(parse_step("# plug the headset").unwrap().is_none());
        assert!(matches!(parse_step(r#"{"step":"unplug"}"#).unwrap(), Some(ReplayStep::Unplug)));
        assert!(parse_step("{\"step\":").is_err());
    }

    #[tokio::test]
    async fn test_reader_skips_malformed_lines() {
        let script = "{\"step\":\"unplug\"}\nnot json\n\n{\"step\":\"set_active_call\",\"active\":true}\n";
        let (tx, mut rx) = mpsc::channel(8);

        run_reader(BufReader::new(script.as_bytes()), tx).await;

        assert!(matches!(rx.recv().await, Some(ReplayStep::Unplug)));
        assert!(matches!(
            rx.recv().await,
            Some(ReplayStep::SetActiveCall { active: true })
        ));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_engine_attaches_on_plug() {
        let (feedback_tx, feedback_rx) = mpsc::unbounded_channel();
        let simulator = Simulator::with_feedback(feedback_tx);
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let controller =
            DeviceController::new(Box::new(simulator.session()), CapabilityTable::new(), event_tx);

        let (step_tx, step_rx) = mpsc::channel(8);
        let (_reload_tx, reload_rx) = mpsc::unbounded_channel();
        step_tx
            .send(ReplayStep::Plug {
                profile: DeviceProfile::new(0xAC01, "Savi 7xx"),
            })
            .await
            .unwrap();
        step_tx.send(ReplayStep::Unplug).await.unwrap();
        drop(step_tx);

        run_engine(controller, simulator, step_rx, feedback_rx, reload_rx).await;

        let mut names = Vec::new();
        while let Ok(event) = event_rx.try_recv() {
            names.push(event.name());
        }
        let attached = names.iter().position(|n| *n == "Attached").unwrap();
        let detached = names.iter().position(|n| *n == "Detached").unwrap();
        assert!(attached < detached);
    }
}
