//! `dvrctl`: headless frame loop around the control session.
//!
//! Ticks the session at the configured frame rate and reads one command per
//! stdin line: `off`, `usb`, `tcp`, `rtsp`, `status` or `quit`.  Every
//! snapshot change is printed to stdout as a JSON line.

use dvr_control::registry::{AlwaysRunning, PidFileRegistry, ServiceRegistry};
use dvr_control::transport::TcpLocator;
use dvr_control::{
    address::UdpRouteResolver, mode::ThreadSettle, SessionController, SessionOptions,
    SessionSnapshot, TargetMode,
};
use dvr_proto::config::{Config, RegistryKind};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::MissedTickBehavior;

#[derive(Serialize)]
struct Line<'a> {
    at: String,
    #[serde(flatten)]
    snapshot: &'a SessionSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn print_snapshot(snapshot: &SessionSnapshot) -> anyhow::Result<()> {
    let line = Line {
        at: chrono::Local::now().format("%H:%M:%S%.3f").to_string(),
        snapshot,
        error: snapshot.error_message(),
    };
    println!("{}", serde_json::to_string(&line)?);
    Ok(())
}

enum Input {
    Mode(TargetMode),
    Status,
    Quit,
}

fn parse_input(line: &str) -> Result<Input, String> {
    match line.trim().to_ascii_lowercase().as_str() {
        "quit" | "exit" | "q" => Ok(Input::Quit),
        "status" | "" => Ok(Input::Status),
        other => other.parse().map(Input::Mode),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let data_dir = dvr_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;

    let log_path = data_dir.join("dvrctl.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter.as_str())
        .with_ansi(false)
        .init();

    eprintln!("dvrctl log: {}", log_path.display());
    tracing::info!("dvrctl starting…");

    let config = Config::load().unwrap_or_else(|e| {
        tracing::warn!("Using default config: {}", e);
        Config::default()
    });

    let registry: Box<dyn ServiceRegistry> = match config.service.registry {
        RegistryKind::PidFile => Box::new(PidFileRegistry::new(config.service.pid_file.clone())),
        RegistryKind::None => Box::new(AlwaysRunning),
    };
    let locator = TcpLocator::new(
        config.service.address.clone(),
        config.service.io_timeout(),
        registry,
    );

    let mut session = SessionController::new(
        locator,
        SessionOptions::from_config(&config),
        Box::new(ThreadSettle),
        Box::new(UdpRouteResolver::default()),
    );

    let mut last = session.start();
    print_snapshot(&last)?;
    tracing::info!(
        "Polling every {} frames (~{:?} at {} fps)",
        session.scheduler().interval(),
        config.poll.refresh_period(),
        config.poll.nominal_fps
    );

    let mut frames = tokio::time::interval(config.poll.frame_period());
    frames.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = frames.tick() => {
                session.tick();
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_input(&line) {
                    Ok(Input::Quit) => break,
                    Ok(Input::Status) => print_snapshot(&session.snapshot())?,
                    Ok(Input::Mode(target)) => {
                        if let Err(e) = session.request_mode_change(target) {
                            eprintln!("{}", e);
                        }
                    }
                    Err(e) => eprintln!("{}", e),
                }
            }
        }

        let snapshot = session.snapshot();
        if snapshot != last {
            print_snapshot(&snapshot)?;
            last = snapshot;
        }
    }

    session.shutdown();
    tracing::info!("dvrctl exiting");
    Ok(())
}
