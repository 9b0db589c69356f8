//! roomba-io - Roomba driver daemon
//!
//! ## Protocol Architecture
//!
//! - **UDP Unicast (`streaming.udp_target`)**: range scans, raw telemetry and odometry,
//!   one datagram per message (fire-and-forget)
//! - **TCP (`streaming.tcp_cmd_address`)**: commands with per-command replies
//!
//! Only one TCP client is served at a time; it is the active pilot for as
//! long as it stays connected.

use roomba_io::config::{AppConfig, log_level};
use roomba_io::devices::create_transport;
use roomba_io::driver::RoombaDriver;
use roomba_io::error::{Error, Result};
use roomba_io::streaming::{Serializer, TcpReceiver, UdpPublisher, stream_channel};
use roomba_io::transport::Transport;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::env;
use std::net::{Shutdown, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

type Driver = RoombaDriver<Box<dyn Transport>>;

/// Parse config path from command line arguments.
///
/// Supports:
/// - `roomba-io <path>` (positional)
/// - `roomba-io --config <path>` (flag-based)
/// - `roomba-io -c <path>` (short flag)
///
/// Defaults to `/etc/roomba-io.toml` if not specified.
fn parse_config_path(args: &[String]) -> String {
    // Look for --config or -c flag
    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }

    // Fall back to first positional argument (if it doesn't start with -)
    if args.len() > 1 && !args[1].starts_with('-') {
        return args[1].clone();
    }

    "/etc/roomba-io.toml".to_string()
}

/// Clear `running` on SIGINT or SIGTERM
fn spawn_signal_handler(running: Arc<AtomicBool>) -> Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    thread::Builder::new()
        .name("signal-handler".to_string())
        .spawn(move || {
            if let Some(sig) = signals.forever().next() {
                log::info!("Received signal {}, initiating shutdown...", sig);
                running.store(false, Ordering::Relaxed);
            }
        })?;
    Ok(())
}

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let config_path = parse_config_path(&args);
    let config = AppConfig::load(&config_path)?;

    // Validation already checked the level parses
    let level = log_level(&config.logging.level).unwrap_or(log::LevelFilter::Info);
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level.as_str()))
        .init();

    log::info!("roomba-io v{} starting...", env!("CARGO_PKG_VERSION"));
    log::info!("Using config: {}", config_path);
    log::info!(
        "Device: {} ({}), target mode {:?}",
        config.device.kind,
        config.device.serial_port,
        config.device.mode
    );

    let running = Arc::new(AtomicBool::new(true));
    spawn_signal_handler(Arc::clone(&running))?;

    let mapper = config.scan_mapper()?;
    log::info!(
        "Scan: {} sensors, max radius {} mm, clear policy {:?}",
        mapper.sensor_count(),
        mapper.max_radius_mm(),
        config.scan.clear_policy
    );

    let transport = create_transport(&config)?;
    let driver: Arc<Driver> =
        Arc::new(RoombaDriver::new(transport, config.driver_config(), mapper));
    driver.init()?;

    let serializer = Serializer::new(config.streaming.wire_format);
    log::info!("Wire format: {:?}", serializer.format());

    // =========================================================================
    // Poll loop and UDP streaming
    // =========================================================================
    let (mut channel, stream_rx) = stream_channel();
    let mut _idle_rx = None;
    let udp_thread = match &config.streaming.udp_target {
        Some(target) => {
            let mut publisher =
                UdpPublisher::bind(target, serializer, stream_rx, Arc::clone(&running))?;
            Some(
                thread::Builder::new()
                    .name("udp-publisher".to_string())
                    .spawn(move || {
                        if let Err(e) = publisher.run() {
                            log::error!("UDP publisher error: {}", e);
                        }
                    })?,
            )
        }
        None => {
            log::info!("UDP streaming disabled (no streaming.udp_target)");
            // Nobody drains it; a full queue drops silently
            _idle_rx = Some(stream_rx);
            None
        }
    };

    let stop = Arc::new(AtomicBool::new(false));
    let poll_thread = {
        let driver = Arc::clone(&driver);
        let stop = Arc::clone(&stop);
        let running = Arc::clone(&running);
        thread::Builder::new()
            .name("roomba-poll".to_string())
            .spawn(move || {
                if let Err(e) = driver.run(&mut channel, &stop) {
                    log::error!("Driver faulted, stopping daemon: {}", e);
                    running.store(false, Ordering::Relaxed);
                }
            })?
    };

    // =========================================================================
    // TCP Server Setup (commands only)
    // =========================================================================
    let bind_addr = &config.streaming.tcp_cmd_address;
    let listener = TcpListener::bind(bind_addr)
        .map_err(|e| Error::Other(format!("Failed to bind to {}: {}", bind_addr, e)))?;
    if let Err(e) = listener.set_nonblocking(true) {
        log::warn!("Failed to set nonblocking mode: {}", e);
    }

    log::info!("TCP server listening on {} (commands only)", bind_addr);
    log::info!("roomba-io running. Press Ctrl-C to stop.");

    // Only one client at a time - prevents conflicting commands
    let client_active = Arc::new(AtomicBool::new(false));
    let next_pilot = AtomicU32::new(1);

    while running.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, addr)) => {
                if client_active.swap(true, Ordering::AcqRel) {
                    log::warn!("Rejecting TCP connection from {}: client already active", addr);
                    let _ = stream.shutdown(Shutdown::Both);
                    continue;
                }

                // Set socket to blocking mode for reliable command handling
                if let Err(e) = stream.set_nonblocking(false) {
                    log::error!("Failed to set socket to blocking mode: {}", e);
                    client_active.store(false, Ordering::Release);
                    continue;
                }

                let pilot = next_pilot.fetch_add(1, Ordering::Relaxed);
                log::info!("TCP client connected: {} (pilot {})", addr, pilot);

                let handle = driver.handle();
                let recv_running = Arc::clone(&running);
                let active = Arc::clone(&client_active);
                let spawned = thread::Builder::new()
                    .name("tcp-receiver".to_string())
                    .spawn(move || {
                        let mut receiver =
                            TcpReceiver::new(serializer, handle, pilot, recv_running);
                        if let Err(e) = receiver.run(stream) {
                            log::error!("TCP receiver error: {}", e);
                        }
                        log::info!("TCP client disconnected: {}", addr);
                        active.store(false, Ordering::Release);
                    });
                if let Err(e) = spawned {
                    log::error!("Failed to spawn TCP receiver: {}", e);
                    client_active.store(false, Ordering::Release);
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                // No connection pending, sleep briefly
                thread::sleep(Duration::from_millis(10));
            }
            Err(e) => {
                log::error!("Accept error: {}", e);
            }
        }
    }

    // Shutdown
    log::info!("Shutting down...");
    stop.store(true, Ordering::Relaxed);
    if poll_thread.join().is_err() {
        log::error!("Poll thread panicked");
    }
    driver.shutdown();
    drop(_idle_rx);
    if let Some(handle) = udp_thread {
        if handle.join().is_err() {
            log::error!("UDP publisher thread panicked");
        }
    }

    log::info!("roomba-io stopped");
    Ok(())
}
