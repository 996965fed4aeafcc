#![warn(clippy::all)]

use clap::{crate_version, Parser};
use tracing::{debug, error, info, warn, Level};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use flate2::read::GzDecoder;
use xz2::read::XzDecoder;

use libnetflow_bridge::*;
use libnetflow_tools::CaptureReplay;

/// NetFlow v5 to JSON publish/subscribe bridge
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<String>,

    /// UDP port to listen on (default: 12000)
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind the UDP socket to (default: 0.0.0.0)
    #[arg(short, long, value_name = "ADDRESS")]
    bind_address: Option<String>,

    /// Publish endpoint (default: tcp://*:5557)
    #[arg(short = 'z', long = "zmq", visible_alias = "publish", value_name = "ENDPOINT")]
    publish: Option<String>,

    /// Publish transport: 'zmq' (ZeroMQ PUB) or 'lines' (newline-delimited JSON over TCP)
    #[arg(short, long, value_name = "TRANSPORT")]
    transport: Option<String>,

    /// Number of decode workers (default: 100)
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Read datagrams from a capture file instead of the network ('-' for stdin)
    #[arg(long, value_name = "FILE")]
    replay: Option<String>,

    /// Only replay datagrams sent to this UDP port
    #[arg(long, value_name = "PORT", requires = "replay")]
    replay_port: Option<u16>,

    /// Log to this file instead of stderr
    #[arg(long, value_name = "FILE")]
    log_file: Option<String>,

    /// Be verbose
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(config: &mut Config, filename: &str) -> Result<(), io::Error> {
    let path = Path::new(&filename);
    let file = File::open(path)?;
    config.load_config(file)
}

fn init_logging(config: &Config, verbose: bool) -> Result<(), io::Error> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let env_filter = EnvFilter::try_from_env("NETFLOW_BRIDGE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::default().add_directive(level.into()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_thread_names(true)
        .compact();
    match config.get("log_file") {
        Some(log_file) => {
            let path = Path::new(log_file);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path.file_name().ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "invalid log file name")
            })?;
            let file_appender = RollingFileAppender::new(Rotation::NEVER, dir, file_name);
            builder.with_writer(file_appender).with_ansi(false).init();
        }
        None => builder.with_writer(io::stderr).init(),
    }
    Ok(())
}

fn open_replay(filename: &str, port: Option<u16>) -> Result<CaptureReplay, io::Error> {
    let input_reader: Box<dyn io::Read + Send> = if filename == "-" {
        Box::new(io::stdin())
    } else {
        let path = Path::new(filename);
        let file = File::open(path)?;
        if filename.ends_with(".gz") {
            Box::new(GzDecoder::new(file))
        } else if filename.ends_with(".xz") {
            Box::new(XzDecoder::new(file))
        } else if filename.ends_with(".lz4") {
            Box::new(lz4::Decoder::new(file)?)
        } else {
            Box::new(file)
        }
    };
    CaptureReplay::new(input_reader, port).map_err(io::Error::other)
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    // load config
    let mut config = Config::default();
    if let Some(filename) = args.config.as_ref() {
        load_config(&mut config, filename)?;
    }
    // override config options from command-line arguments
    if let Some(port) = args.port {
        config.set("listen.port", i64::from(port));
    }
    if let Some(address) = args.bind_address.as_ref() {
        config.set("listen.address", address.as_str());
    }
    if let Some(endpoint) = args.publish.as_ref() {
        config.set("publish.endpoint", endpoint.as_str());
    }
    if let Some(transport) = args.transport.as_ref() {
        config.set("publish.transport", transport.as_str());
    }
    if let Some(jobs) = args.jobs {
        config.set("num_workers", jobs as i64);
    }
    if let Some(log_file) = args.log_file.as_ref() {
        config.set("log_file", log_file.as_str());
    }

    init_logging(&config, args.verbose)?;

    // Now, really start
    info!("NetFlow bridge {}", crate_version!());
    if let Some(filename) = args.config.as_ref() {
        debug!("configuration loaded from {}", filename);
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("interrupted, shutting down");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("could not set Ctrl-C handler: {}", e);
    }

    // bind failures are fatal
    let sink = bind_sink(&config).map_err(|e| {
        error!("could not open publish endpoint: {}", e);
        io::Error::other(e)
    })?;

    let mut source: Box<dyn DatagramSource> = match args.replay.as_ref() {
        Some(filename) => {
            info!("replaying capture {}", filename);
            Box::new(open_replay(filename, args.replay_port)?)
        }
        None => {
            let source = UdpSource::from_config(&config).map_err(|e| {
                error!("could not bind UDP socket: {}", e);
                io::Error::other(e)
            })?;
            if let Ok(addr) = source.local_addr() {
                info!("listening on udp://{}", addr);
            }
            Box::new(source)
        }
    };

    let bridge = Bridge::new(BridgeConfig::from_config(&config));
    debug!("pipeline configuration: {:?}", bridge.config());
    bridge
        .run(source.as_mut(), sink, &running)
        .map_err(io::Error::other)?;

    info!("netflow-bridge: done, exiting");
    Ok(())
}
