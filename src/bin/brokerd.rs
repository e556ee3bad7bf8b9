//! Broker daemon front-end
//!
//! Creates the shared-memory segment from command-line options, answers
//! registrations on a Unix socket and supervises peer liveness until
//! interrupted.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;

use floe::{Broker, BrokerConfig, PoolConfig, SegmentConfig};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_signal(_signal: libc::c_int) {
    SHUTDOWN.store(true, Ordering::Release);
}

/// Shared-memory broker daemon
#[derive(Debug, Parser)]
#[command(name = "floe-brokerd", version, about)]
struct Args {
    /// Segment name
    #[arg(long, default_value = "floe")]
    segment_name: String,

    /// Segment file path (defaults to the system temp directory)
    #[arg(long)]
    segment_path: Option<PathBuf>,

    /// Chunk pool as SIZExCOUNT (repeatable, sizes strictly increasing)
    #[arg(long = "pool", value_parser = parse_pool, required = true)]
    pools: Vec<PoolConfig>,

    /// Registration socket path
    #[arg(long, default_value = "/tmp/floe-broker.sock")]
    socket: PathBuf,

    /// Keep-alive interval in milliseconds
    #[arg(long, default_value_t = 100)]
    keep_alive_ms: u64,

    /// Dead-process interval in milliseconds
    #[arg(long, default_value_t = 1000)]
    dead_ms: u64,

    /// Print the segment configuration and exit
    #[arg(long)]
    inspect: bool,
}

fn parse_pool(value: &str) -> Result<PoolConfig, String> {
    let (size, count) = value
        .split_once('x')
        .ok_or_else(|| format!("'{}' is not SIZExCOUNT", value))?;
    let size: u32 = size.parse().map_err(|_| format!("bad pool size in '{}'", value))?;
    let count: u32 = count
        .parse()
        .map_err(|_| format!("bad pool count in '{}'", value))?;
    Ok(PoolConfig::new(size, count))
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let mut segment = SegmentConfig::new(&args.segment_name);
    for pool in &args.pools {
        segment = segment.with_pool(*pool);
    }
    if let Some(path) = &args.segment_path {
        segment = segment.with_file_path(path);
    }

    let config = BrokerConfig::new(segment)
        .with_keep_alive_interval(Duration::from_millis(args.keep_alive_ms))
        .with_dead_interval(Duration::from_millis(args.dead_ms))
        .with_socket_path(&args.socket);

    if args.inspect {
        println!("{:#?}", config);
        return;
    }

    let mut broker = match Broker::open(config) {
        Ok(broker) => broker,
        Err(error) => {
            log::error!("failed to open broker: {}", error);
            std::process::exit(1);
        }
    };
    broker.start_monitor();
    if let Err(error) = broker.start_registration_server() {
        log::error!("failed to start registration server: {}", error);
        std::process::exit(1);
    }

    let handler: extern "C" fn(libc::c_int) = handle_signal;
    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handler as libc::sighandler_t);
    }

    log::info!("broker running; interrupt to stop");
    while !SHUTDOWN.load(Ordering::Acquire) {
        std::thread::sleep(Duration::from_millis(100));
    }
    log::info!("shutting down");
    drop(broker);
}
