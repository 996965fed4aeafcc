use crate::sink::{PubEndpoint, Sink};
use libnetflow_tools::Error;
use tokio::runtime::{Builder, Runtime};
use tracing::{info, trace};
use zeromq::{Socket, SocketSend, ZmqMessage};

/// ZeroMQ PUB socket
///
/// Each message is sent as a single frame holding the JSON text, without a
/// topic prefix, so SUB sockets subscribe with an empty prefix. The socket is
/// driven by a private single-worker runtime, and `send` blocks until the
/// message is queued for the connected peers.
///
/// A PUB socket does not report how many subscribers matched: a message
/// accepted by the socket counts as one delivery.
pub struct ZmqPubSink {
    socket: zeromq::PubSocket,
    local_endpoint: String,
    // dropped last, after the socket
    runtime: Runtime,
}

impl ZmqPubSink {
    /// Bind the endpoint
    pub fn bind(endpoint: &PubEndpoint) -> Result<Self, Error> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("zmq-pub")
            .enable_all()
            .build()?;
        let mut socket = {
            let _guard = runtime.enter();
            zeromq::PubSocket::new()
        };
        let bound = runtime
            .block_on(socket.bind(&endpoint.to_string()))
            .map_err(|e| Error::Publish(format!("could not bind {endpoint}: {e}")))?;
        let local_endpoint = bound.to_string();
        info!("publishing on {} (ZeroMQ PUB)", local_endpoint);
        Ok(ZmqPubSink {
            socket,
            local_endpoint,
            runtime,
        })
    }

    /// Endpoint actually bound, with the port resolved
    pub fn local_endpoint(&self) -> &str {
        &self.local_endpoint
    }
}

impl Sink for ZmqPubSink {
    fn send(&mut self, message: &[u8]) -> Result<usize, Error> {
        let msg = ZmqMessage::from(message.to_vec());
        self.runtime
            .block_on(self.socket.send(msg))
            .map_err(|e| Error::Publish(e.to_string()))?;
        trace!("sent {} bytes on PUB socket", message.len());
        Ok(1)
    }
}
