use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use signal_hook::consts::{SIGINT, SIGTERM};

use teleop::config::{TeleopParameters, CONFIG_FILE};
use teleop::log::Logger;
use teleop::serial::available_ports;
use teleop::session::ControlPanel;
use teleop::types::Event;

/// Headless control panel for the legged robot.
#[derive(Parser, Debug)]
#[command(name = "teleop", version)]
struct Cli {
    /// Parameters file
    #[arg(long, default_value = CONFIG_FILE)]
    config: PathBuf,
    /// Serial port overriding the configured one, `test` for the simulated robot
    #[arg(long)]
    port: Option<String>,
    /// Write the port given with --port back to the parameters file
    #[arg(long, requires = "port")]
    remember: bool,
    /// Print the detected serial ports and exit
    #[arg(long)]
    list_ports: bool,
    /// Stored macro to play once connected; exits when it finishes
    #[arg(long)]
    play: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.list_ports {
        for port in available_ports() {
            println!("{}", port);
        }
        return Ok(());
    }

    let mut params = TeleopParameters::load(&cli.config)?;
    if let Some(port) = &cli.port {
        params.serial.port = port.clone();
        if cli.remember {
            params.update(&cli.config)?;
        }
    }
    let mut log_sink = Logger::init(params.log_level());

    let term = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, term.clone()).context("Cannot register signal handler")?;
    }

    let (events_tx, events_rx) = channel();
    let mut panel = ControlPanel::new(params, events_tx);
    panel.connect().context("Cannot start serial link")?;

    let mut last_report = Instant::now();
    while !term.load(Ordering::Relaxed) {
        match events_rx.try_recv() {
            Ok(Event::SerialConnected) => {
                if let Some(name) = &cli.play {
                    if let Err(e) = panel.load_macro(name).and_then(|()| panel.start_macro()) {
                        error!("Cannot play macro {}: {}", name, e);
                        break;
                    }
                }
            },
            Ok(Event::SerialFailed(reason)) => {
                error!("{}", reason);
                break;
            },
            Ok(Event::MacroFinished {
                cancelled,
            }) => {
                info!("Macro {}", if cancelled { "stopped" } else { "completed" });
                if cli.play.is_some() {
                    break;
                }
            },
            Ok(Event::SerialDisconnected) => break,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => break,
        }

        if last_report.elapsed() >= Duration::from_secs(1) {
            let rpy = panel.rpy();
            info!("roll: {} pitch: {} yaw: {}", rpy.roll, rpy.pitch, rpy.yaw);
            last_report = Instant::now();
        }
        log_sink.handle_logs();
        thread::sleep(Duration::from_millis(10));
    }

    panel.stop_macro();
    drop(panel);
    log_sink.handle_logs();
    Ok(())
}
