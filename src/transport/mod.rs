//! Outbound push channel to the collector.
//!
//! Messages are two-part ZeroMQ messages, `[identity, payload]`, sent over a
//! ZMTP PUSH connection. [`PushChannel::send`] only enqueues: a background I/O
//! task owns the connection, connects (and reconnects) to the collector, and
//! drains the bounded queue in FIFO order. While no collector is reachable
//! nothing is drained, so a full queue blocks the caller.
//!
//! A collector that hangs up is noticed before the next message is taken
//! from the queue. A message already written when the collector dies is lost
//! with it; TCP gives no delivery receipt.

mod zmtp;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use flume::{Receiver, SendTimeoutError, Sender};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use self::zmtp::PushConnection;
use crate::config::TransportConfig;
use crate::encode::EncodedPayload;
use crate::error::{ConfigError, TransportError};

/// Greeting and READY exchange must finish within this long.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

type Message = [Bytes; 2];

/// Sender identity attached as the first part of every message. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(Bytes);

impl Identity {
    pub fn new(bytes: impl Into<Bytes>) -> Result<Self, ConfigError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(ConfigError::EmptyIdentity);
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_bytes(&self) -> Bytes {
        self.0.clone()
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// Where the pipeline delivers identity-tagged payloads.
pub trait MessageSink {
    fn send(&mut self, identity: &Identity, payload: &EncodedPayload) -> Result<(), TransportError>;
}

/// Fire-and-forget PUSH channel with a bounded send queue.
pub struct PushChannel {
    tx: Sender<Message>,
    send_timeout: Option<Duration>,
    closer: ChannelCloser,
    endpoint: String,
}

impl PushChannel {
    /// Validate the address and start connecting in the background on `runtime`.
    /// Returns without waiting for the collector.
    pub fn connect(config: &TransportConfig, runtime: &Handle) -> Result<Self, TransportError> {
        let endpoint = config
            .endpoint()
            .map_err(|_| TransportError::InvalidAddress(config.server_address.clone()))?;

        let (tx, rx) = flume::bounded(config.queue_depth.max(1));
        let (close_tx, close_rx) = watch::channel(false);

        let io = IoTask {
            address: endpoint.trim_start_matches("tcp://").to_string(),
            endpoint: endpoint.clone(),
            rx,
            closed: close_rx,
            reconnect_interval: config.reconnect_interval(),
            connection: None,
        };
        runtime.spawn(io.run());

        info!(
            "Push channel to {} (queue depth {}, send timeout {:?})",
            endpoint,
            config.queue_depth,
            config.send_timeout()
        );

        Ok(Self {
            tx,
            send_timeout: config.send_timeout(),
            closer: ChannelCloser(Arc::new(close_tx)),
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Handle that stops the I/O task from another thread.
    pub fn closer(&self) -> ChannelCloser {
        self.closer.clone()
    }

    /// Messages enqueued but not yet written to the collector.
    pub fn queued(&self) -> usize {
        self.tx.len()
    }

    /// Enqueue `[identity, payload]`, blocking while the queue is full.
    pub fn send(&self, identity: &Identity, payload: &EncodedPayload) -> Result<(), TransportError> {
        let message = [identity.to_bytes(), payload.to_bytes()];

        match self.send_timeout {
            None => self.tx.send(message).map_err(|_| TransportError::Closed),
            Some(timeout) => self.tx.send_timeout(message, timeout).map_err(|e| match e {
                SendTimeoutError::Timeout(_) => TransportError::Timeout(timeout),
                SendTimeoutError::Disconnected(_) => TransportError::Closed,
            }),
        }
    }
}

impl MessageSink for PushChannel {
    fn send(&mut self, identity: &Identity, payload: &EncodedPayload) -> Result<(), TransportError> {
        PushChannel::send(self, identity, payload)
    }
}

/// Stops a [`PushChannel`]'s I/O task. Blocked and later sends fail with
/// [`TransportError::Closed`]; queued messages are discarded.
#[derive(Clone)]
pub struct ChannelCloser(Arc<watch::Sender<bool>>);

impl ChannelCloser {
    pub fn close(&self) {
        self.0.send_replace(true);
    }
}

struct IoTask {
    /// `host:port` form of `endpoint`
    address: String,
    endpoint: String,
    rx: Receiver<Message>,
    closed: watch::Receiver<bool>,
    reconnect_interval: Duration,
    connection: Option<PushConnection>,
}

impl IoTask {
    async fn run(mut self) {
        let mut pending: Option<Message> = None;

        loop {
            if !self.ensure_connected().await {
                break;
            }
            let Some(connection) = self.connection.as_mut() else {
                continue;
            };

            let message = match pending.take() {
                Some(message) => message,
                None => {
                    let next = tokio::select! {
                        biased;
                        _ = self.closed.changed() => break,
                        lost = connection.lost() => Err(lost),
                        next = self.rx.recv_async() => match next {
                            Ok(message) => Ok(message),
                            Err(_) => break,
                        },
                    };
                    match next {
                        Ok(message) => message,
                        Err(e) => {
                            warn!("Connection to {} lost, reconnecting: {}", self.endpoint, e);
                            self.connection = None;
                            if self.pause().await {
                                break;
                            }
                            continue;
                        }
                    }
                }
            };

            let result = tokio::select! {
                _ = self.closed.changed() => break,
                result = connection.send(&message) => result,
            };
            if let Err(e) = result {
                warn!("Send to {} failed, reconnecting: {}", self.endpoint, e);
                self.connection = None;
                pending = Some(message);
                if self.pause().await {
                    break;
                }
            }
        }

        debug!("Transport I/O task for {} stopped", self.endpoint);
    }

    /// Returns false once the channel is closed.
    async fn ensure_connected(&mut self) -> bool {
        while self.connection.is_none() {
            if *self.closed.borrow() {
                return false;
            }

            let result = tokio::select! {
                _ = self.closed.changed() => return false,
                result = PushConnection::connect(&self.address, HANDSHAKE_TIMEOUT) => result,
            };

            match result {
                Ok(connection) => {
                    info!("Connected to collector at {}", self.endpoint);
                    self.connection = Some(connection);
                }
                Err(e) => {
                    debug!("Connect to {} failed: {}", self.endpoint, e);
                    if self.pause().await {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Wait one reconnect interval. Returns true if the channel closed meanwhile.
    async fn pause(&mut self) -> bool {
        tokio::select! {
            _ = self.closed.changed() => true,
            _ = tokio::time::sleep(self.reconnect_interval) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_must_not_be_empty() {
        assert!(matches!(Identity::new(""), Err(ConfigError::EmptyIdentity)));
        let id = Identity::new("cam1").unwrap();
        assert_eq!(id.as_bytes(), b"cam1");
        assert_eq!(id.to_string(), "cam1");
    }

    #[tokio::test]
    async fn rejects_bad_address() {
        let config = TransportConfig {
            server_address: "no-port".into(),
            ..TransportConfig::default()
        };
        let result = PushChannel::connect(&config, &Handle::current());
        assert!(matches!(result, Err(TransportError::InvalidAddress(_))));
    }
}
