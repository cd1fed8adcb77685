use std::sync::Arc;
use std::time::Duration;
use std::{panic, process};

use anyhow::Result;
use clap::{Arg, Command};
use log::{info, warn};
use tokio::sync::mpsc;

use roverlink::config::AppConfig;
use roverlink::link::sim::SimTransportFactory;
use roverlink::manager::PipelineManager;
use roverlink::storage::DirFrameStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let matches = Command::new("roverlink")
        .version(env!("CARGO_PKG_VERSION"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Path to a TOML configuration file")
                .required(false),
        )
        .arg(
            Arg::new("duration")
                .short('d')
                .long("duration")
                .value_name("SECONDS")
                .help("Stop after this many seconds (runs until Ctrl-C otherwise)")
                .required(false),
        )
        .get_matches();

    let config = match matches.get_one::<String>("config") {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    let duration = matches
        .get_one::<String>("duration")
        .map(|s| s.parse::<u64>())
        .transpose()?
        .map(Duration::from_secs);

    // kill the main thread as soon as a secondary thread panics
    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        orig_hook(panic_info);
        process::exit(105);
    }));

    let store = Arc::new(DirFrameStore::new(config.storage.capture_dir.clone()));
    let mut manager = PipelineManager::new(config, Arc::new(SimTransportFactory::default()), store);
    manager.build()?;

    // Feed the telemetry readout the way the status overlays do
    let (telemetry_tx, mut telemetry_rx) = mpsc::channel(64);
    let _subscription = manager.subscribe_telemetry(None, telemetry_tx);
    tokio::spawn(async move {
        while let Some(message) = telemetry_rx.recv().await {
            info!("telemetry: {} = {}", message.topic, message.payload);
        }
    });

    let deadline = duration.map(|d| tokio::time::Instant::now() + d);
    let mut tick = tokio::time::interval(Duration::from_millis(250));
    let mut ticks: u64 = 0;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, saving back-capture before exit");
                break;
            }
            _ = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            } => {
                info!("session duration reached");
                break;
            }
            _ = tick.tick() => {
                let frames = manager.render_tick();
                for (camera, frame) in &frames {
                    log::debug!("{}: frame {}x{} at {}", camera, frame.width, frame.height, frame.captured_at);
                }
                ticks += 1;
                if ticks % 8 == 0 {
                    for link in manager.status() {
                        let age = link
                            .frame_age
                            .map(|a| format!(", frame {:.2}s old", a.as_secs_f64()))
                            .unwrap_or_default();
                        info!(
                            "{} [{}]: {} for {:.2}s{}",
                            link.name,
                            link.kind,
                            link.phase,
                            link.in_phase.as_secs_f64(),
                            age
                        );
                    }
                }
            }
        }
    }

    match manager.save_backcapture().await {
        Ok(saved) if saved.is_empty() => warn!("no back-capture history to save"),
        Ok(saved) => {
            for path in saved {
                info!("saved capture {:?}", path);
            }
        }
        Err(e) => warn!("back-capture save failed: {}", e),
    }

    manager.teardown().await;
    Ok(())
}
