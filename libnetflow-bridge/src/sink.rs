//! Publish/subscribe sinks
//!
//! A [`Sink`] accepts serialized messages from the publisher. Two transports
//! bind the publish endpoint:
//!
//! - [`ZmqPubSink`](crate::ZmqPubSink) (default): a ZeroMQ PUB socket, one
//!   single-frame message per record
//! - [`TcpPubSink`]: plain TCP, one JSON document per line to every connected
//!   client

use crate::zmq_sink::ZmqPubSink;
use crossbeam_channel::{unbounded, Receiver, Sender};
use libnetflow_tools::{Config, Error};
use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_PUBLISH_ENDPOINT: &str = "tcp://*:5557";

/// Subscribers that cannot take a message within this delay are dropped
const SUBSCRIBER_WRITE_TIMEOUT: Duration = Duration::from_millis(500);
/// Delay between two checks for new subscribers or a stop request
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Destination of published messages
pub trait Sink {
    /// Emit one message, and return the number of subscribers it was sent to
    ///
    /// `Ok(0)` means the message was discarded because nobody is listening.
    /// Delivery is at-most-once.
    fn send(&mut self, message: &[u8]) -> Result<usize, Error>;
}

impl Sink for Box<dyn Sink + Send> {
    fn send(&mut self, message: &[u8]) -> Result<usize, Error> {
        (**self).send(message)
    }
}

/// In-process sink: messages are sent on a channel
impl Sink for Sender<Vec<u8>> {
    fn send(&mut self, message: &[u8]) -> Result<usize, Error> {
        Sender::send(self, message.to_vec()).or(Err(Error::Generic("sink channel disconnected")))?;
        Ok(1)
    }
}

/// Publish endpoint, in `tcp://HOST:PORT` form
///
/// `*` as host means all interfaces.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PubEndpoint {
    host: String,
    port: u16,
}

impl PubEndpoint {
    pub fn parse(endpoint: &str) -> Result<Self, Error> {
        let invalid = || Error::Endpoint(endpoint.to_owned());
        let rest = endpoint.strip_prefix("tcp://").ok_or_else(invalid)?;
        let (host, port) = rest.rsplit_once(':').ok_or_else(invalid)?;
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        let host = match host {
            "*" => "0.0.0.0",
            h if h.starts_with('[') && h.ends_with(']') => &h[1..h.len() - 1],
            "" => return Err(invalid()),
            h => h,
        };
        Ok(PubEndpoint {
            host: host.to_owned(),
            port,
        })
    }

    /// Read the endpoint from `publish.endpoint`, or use the default
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        PubEndpoint::parse(
            config
                .get("publish.endpoint")
                .unwrap_or(DEFAULT_PUBLISH_ENDPOINT),
        )
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, Error> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::Endpoint(self.to_string()))
    }
}

impl std::fmt::Display for PubEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "tcp://[{}]:{}", self.host, self.port)
        } else {
            write!(f, "tcp://{}:{}", self.host, self.port)
        }
    }
}

/// Wire protocol spoken on the publish endpoint
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PubTransport {
    /// ZeroMQ PUB socket
    #[default]
    Zmq,
    /// Newline-delimited JSON over plain TCP
    Lines,
}

impl FromStr for PubTransport {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "zmq" => Ok(PubTransport::Zmq),
            "lines" => Ok(PubTransport::Lines),
            _ => Err(Error::Config(format!("unknown publish transport '{s}'"))),
        }
    }
}

impl PubTransport {
    /// Read the transport from `publish.transport`, or use the default
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        config
            .get("publish.transport")
            .map_or(Ok(PubTransport::default()), str::parse)
    }
}

/// Bind the publish endpoint with the configured transport
pub fn bind_sink(config: &Config) -> Result<Box<dyn Sink + Send>, Error> {
    let endpoint = PubEndpoint::from_config(config)?;
    let sink: Box<dyn Sink + Send> = match PubTransport::from_config(config)? {
        PubTransport::Zmq => Box::new(ZmqPubSink::bind(&endpoint)?),
        PubTransport::Lines => Box::new(TcpPubSink::bind(&endpoint)?),
    };
    Ok(sink)
}

/// TCP publisher socket
///
/// Accepted subscribers are handed over to the sink through a channel, and
/// picked up before each send. Messages sent while no subscriber is connected
/// are discarded. Dropping the sink closes the listener.
pub struct TcpPubSink {
    local_addr: SocketAddr,
    incoming: Receiver<TcpStream>,
    subscribers: Vec<TcpStream>,
    line: Vec<u8>,
    stop: Arc<AtomicBool>,
    acceptor: Option<thread::JoinHandle<()>>,
}

impl TcpPubSink {
    /// Bind the endpoint and start accepting subscribers
    pub fn bind(endpoint: &PubEndpoint) -> Result<Self, Error> {
        let listener = TcpListener::bind(endpoint.socket_addr()?)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let (sender, incoming) = unbounded();
        let stop = Arc::new(AtomicBool::new(false));
        let acceptor = {
            let stop = stop.clone();
            thread::Builder::new()
                .name("pub-accept".to_owned())
                .spawn(move || accept_loop(listener, sender, &stop))?
        };
        info!("publishing on tcp://{} (JSON lines)", local_addr);
        Ok(TcpPubSink {
            local_addr,
            incoming,
            subscribers: Vec::new(),
            line: Vec::new(),
            stop,
            acceptor: Some(acceptor),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of subscribers known at the last send
    pub fn num_subscribers(&self) -> usize {
        self.subscribers.len()
    }
}

fn accept_loop(listener: TcpListener, subscribers: Sender<TcpStream>, stop: &AtomicBool) {
    while !stop.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = setup_subscriber(&stream) {
                    warn!("rejecting subscriber {}: {}", peer, e);
                    continue;
                }
                debug!("subscriber connected: {}", peer);
                if subscribers.send(stream).is_err() {
                    // sink released
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL_INTERVAL),
            Err(e) => {
                warn!("accept failed: {}", e);
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
    debug!("publish listener closed");
}

fn setup_subscriber(stream: &TcpStream) -> io::Result<()> {
    // accepted sockets may inherit the listener's non-blocking mode
    stream.set_nonblocking(false)?;
    if let Err(e) = stream.set_nodelay(true) {
        warn!("could not set TCP_NODELAY on subscriber: {}", e);
    }
    if let Err(e) = stream.set_write_timeout(Some(SUBSCRIBER_WRITE_TIMEOUT)) {
        warn!("could not set subscriber write timeout: {}", e);
    }
    Ok(())
}

impl Sink for TcpPubSink {
    fn send(&mut self, message: &[u8]) -> Result<usize, Error> {
        self.subscribers.extend(self.incoming.try_iter());
        if self.subscribers.is_empty() {
            return Ok(0);
        }
        self.line.clear();
        self.line.extend_from_slice(message);
        self.line.push(b'\n');
        let line = &self.line;
        self.subscribers.retain_mut(|s| match s.write_all(line) {
            Ok(()) => true,
            Err(e) => {
                debug!("dropping subscriber: {}", e);
                false
            }
        });
        Ok(self.subscribers.len())
    }
}

impl Drop for TcpPubSink {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(acceptor) = self.acceptor.take() {
            if acceptor.join().is_err() {
                warn!("publish accept thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};

    fn wait_for_subscribers(sink: &mut TcpPubSink, n: usize) {
        for _ in 0..100 {
            sink.send(b"{\"ping\":0}").expect("send");
            if sink.num_subscribers() == n {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("expected {} subscribers, got {}", n, sink.num_subscribers());
    }

    #[test]
    fn endpoint_parse() {
        let e = PubEndpoint::parse("tcp://*:5557").expect("endpoint");
        assert_eq!(e.socket_addr().expect("addr").to_string(), "0.0.0.0:5557");
        let e = PubEndpoint::parse("tcp://127.0.0.1:6000").expect("endpoint");
        assert_eq!(e.to_string(), "tcp://127.0.0.1:6000");
        let e = PubEndpoint::parse("tcp://[::1]:6000").expect("endpoint");
        assert_eq!(e.socket_addr().expect("addr").to_string(), "[::1]:6000");
        assert_eq!(e.to_string(), "tcp://[::1]:6000");
    }

    #[test]
    fn endpoint_parse_errors() {
        for s in &["udp://*:5557", "tcp://*", "tcp://*:http", "tcp://:5557", "*:5557", "tcp://*:70000"] {
            assert!(PubEndpoint::parse(s).is_err(), "{}", s);
        }
    }

    #[test]
    fn endpoint_from_config() {
        let mut config = Config::default();
        assert_eq!(
            PubEndpoint::from_config(&config).expect("default"),
            PubEndpoint::parse(DEFAULT_PUBLISH_ENDPOINT).expect("default")
        );
        config.set("publish.endpoint", "tcp://127.0.0.1:0");
        assert_eq!(
            PubEndpoint::from_config(&config).expect("endpoint").to_string(),
            "tcp://127.0.0.1:0"
        );
    }

    #[test]
    fn transport_from_config() {
        let mut config = Config::default();
        assert_eq!(PubTransport::from_config(&config).expect("default"), PubTransport::Zmq);
        config.set("publish.transport", "lines");
        assert_eq!(PubTransport::from_config(&config).expect("lines"), PubTransport::Lines);
        config.set("publish.transport", "carrier-pigeon");
        assert!(matches!(PubTransport::from_config(&config), Err(Error::Config(_))));
    }

    #[test]
    fn bind_sink_lines() {
        let mut config = Config::default();
        config.set("publish.endpoint", "tcp://127.0.0.1:0");
        config.set("publish.transport", "lines");
        let mut sink = bind_sink(&config).expect("bind");
        assert_eq!(sink.send(b"{}").expect("send"), 0);
    }

    #[test]
    fn tcp_sink_fans_out_lines() {
        let endpoint = PubEndpoint::parse("tcp://127.0.0.1:0").expect("endpoint");
        let mut sink = TcpPubSink::bind(&endpoint).expect("bind");
        // no subscriber yet: message is discarded
        assert_eq!(sink.send(b"{\"lost\":1}").expect("send"), 0);

        let addr = sink.local_addr();
        let a = TcpStream::connect(addr).expect("connect");
        let b = TcpStream::connect(addr).expect("connect");
        wait_for_subscribers(&mut sink, 2);
        assert_eq!(sink.send(b"{\"n\":1}").expect("send"), 2);
        assert_eq!(sink.send(b"{\"n\":2}").expect("send"), 2);

        for stream in [a, b] {
            let lines: Vec<String> = BufReader::new(stream)
                .lines()
                .map(|l| l.expect("line"))
                .filter(|l| !l.contains("ping"))
                .take(2)
                .collect();
            assert_eq!(lines, vec!["{\"n\":1}", "{\"n\":2}"]);
        }
    }

    #[test]
    fn tcp_sink_drops_closed_subscribers() {
        let endpoint = PubEndpoint::parse("tcp://127.0.0.1:0").expect("endpoint");
        let mut sink = TcpPubSink::bind(&endpoint).expect("bind");
        let client = TcpStream::connect(sink.local_addr()).expect("connect");
        wait_for_subscribers(&mut sink, 1);
        drop(client);
        // the peer reset is only seen after a few writes
        for _ in 0..100 {
            sink.send(b"x").expect("send");
            if sink.num_subscribers() == 0 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(sink.num_subscribers(), 0);
    }

    #[test]
    fn tcp_sink_releases_endpoint_on_drop() {
        let endpoint = PubEndpoint::parse("tcp://127.0.0.1:0").expect("endpoint");
        let sink = TcpPubSink::bind(&endpoint).expect("bind");
        let addr = sink.local_addr();
        drop(sink);
        let endpoint = PubEndpoint::parse(&format!("tcp://{addr}")).expect("endpoint");
        let sink = TcpPubSink::bind(&endpoint).expect("rebind after drop");
        assert_eq!(sink.local_addr(), addr);
    }

    #[test]
    fn channel_sink() {
        let (mut tx, rx) = unbounded::<Vec<u8>>();
        assert_eq!(Sink::send(&mut tx, b"hello").expect("send"), 1);
        assert_eq!(rx.recv().expect("recv"), b"hello".to_vec());
        drop(rx);
        assert!(Sink::send(&mut tx, b"hello").is_err());
    }
}
