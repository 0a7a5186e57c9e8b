//! The UDP listener and the per-datagram forwarding logic.
//!
//! One task owns the receive loop.  Every datagram is copied out of
//! the receive buffer and handed to a worker task with its own
//! deadline, so a slow upstream cannot stall the loop.  All workers
//! send through the same socket they were received on: replies from
//! the upstream arrive back on it and are routed by transaction ID.

use bytes::BytesMut;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use dns_wire::protocol::deserialise;
use dns_wire::protocol::types::Message;

use crate::transactions::{SharedTransactionTable, TransactionEntry};

/// Configuration for the listener and the workers it spawns.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the listening socket on.
    pub address: IpAddr,

    /// Port to bind the listening socket on.
    pub port: u16,

    /// Largest datagram accepted for processing.  Anything bigger is
    /// reported and dropped without being decoded.
    pub recv_buffer_size: usize,

    /// How long one worker may spend on one datagram.
    pub packet_timeout: Duration,

    /// How long shutdown waits for outstanding workers before
    /// abandoning them.
    pub shutdown_grace: Duration,

    /// The resolver queries are relayed to.
    pub upstream: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8085,
            recv_buffer_size: 512,
            packet_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(5),
            upstream: SocketAddr::from((Ipv4Addr::new(1, 1, 1, 1), 53)),
        }
    }
}

/// A non-fatal error while handling one datagram.  These go over a
/// bounded channel to whoever wants to log them; the datagram itself
/// is dropped, UDP owes nobody a delivery.
#[derive(Debug)]
pub enum ProcessError {
    /// A datagram bigger than the configured receive size arrived.
    OversizedDatagram { peer: SocketAddr, size: usize },

    /// A datagram could not be decoded.
    Decode {
        peer: SocketAddr,
        error: deserialise::Error,
    },

    /// A reply arrived for a transaction nobody has open.
    UnknownTransaction { peer: SocketAddr, id: u16 },

    /// Relaying a datagram failed.
    Send {
        target: SocketAddr,
        error: io::Error,
    },

    /// Reading from the socket failed, but not because of shutdown.
    Receive { error: io::Error },

    /// A worker hit the per-packet deadline.
    DeadlineElapsed { peer: SocketAddr },
}

impl std::fmt::Display for ProcessError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ProcessError::OversizedDatagram { peer, size } => {
                write!(f, "oversized datagram ({size} octets) from {peer}")
            }
            ProcessError::Decode { peer, error } => {
                write!(f, "undecodable datagram from {peer}: {error}")
            }
            ProcessError::UnknownTransaction { peer, id } => {
                write!(f, "reply from {peer} for unknown transaction {id}")
            }
            ProcessError::Send { target, error } => {
                write!(f, "could not send to {target}: {error}")
            }
            ProcessError::Receive { error } => write!(f, "could not read from socket: {error}"),
            ProcessError::DeadlineElapsed { peer } => {
                write!(f, "deadline elapsed handling datagram from {peer}")
            }
        }
    }
}

impl std::error::Error for ProcessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProcessError::Decode { error, .. } => Some(error),
            ProcessError::Send { error, .. } | ProcessError::Receive { error } => Some(error),
            _ => None,
        }
    }
}

/// The forwarding DNS server: one socket, one receive loop, one
/// transaction table, many short-lived workers.
pub struct UdpServer {
    config: ServerConfig,
    socket: Arc<UdpSocket>,
    transactions: SharedTransactionTable,
    errors: mpsc::Sender<ProcessError>,
}

impl UdpServer {
    /// Bind the listening socket.  The server is fully initialised or
    /// not constructed at all: there is no unbound state to check for
    /// later.
    ///
    /// # Errors
    ///
    /// If the socket cannot be bound.  This is the one startup error
    /// worth dying over.
    pub async fn new(
        config: ServerConfig,
        errors: mpsc::Sender<ProcessError>,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind((config.address, config.port)).await?;
        tracing::info!(address = %config.address, port = config.port, "bound DNS UDP socket");

        Ok(Self {
            config,
            socket: Arc::new(socket),
            transactions: SharedTransactionTable::new(),
            errors,
        })
    }

    /// The address the socket actually bound to (useful when the
    /// configured port was 0).
    ///
    /// # Errors
    ///
    /// If the socket cannot report its address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// A handle to the transaction table, for the eviction task and
    /// for inspection.
    pub fn transactions(&self) -> SharedTransactionTable {
        self.transactions.clone()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The receive loop.  Runs until `shutdown` is cancelled, then
    /// gives outstanding workers the grace period before abandoning
    /// them.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut workers = JoinSet::new();
        // one octet of slack so a datagram longer than the configured
        // size is seen to be oversized rather than silently truncated
        let mut buf = vec![0u8; self.config.recv_buffer_size + 1];

        tracing::info!(upstream = %self.config.upstream, "starting UDP receive loop");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    tracing::info!("UDP listener shutting down");
                    break;
                }

                result = self.socket.recv_from(&mut buf) => match result {
                    Ok((size, peer)) => {
                        tracing::debug!(%peer, size, "received datagram");

                        if size > self.config.recv_buffer_size {
                            self.report(ProcessError::OversizedDatagram { peer, size });
                            continue;
                        }

                        // the worker gets its own copy; the receive
                        // buffer is reused for the next datagram
                        let datagram = BytesMut::from(&buf[..size]);
                        let socket = Arc::clone(&self.socket);
                        let transactions = self.transactions.clone();
                        let errors = self.errors.clone();
                        let upstream = self.config.upstream;
                        let packet_timeout = self.config.packet_timeout;

                        workers.spawn(async move {
                            let process = process_datagram(
                                &socket,
                                &transactions,
                                upstream,
                                &errors,
                                &datagram,
                                peer,
                            );
                            if timeout(packet_timeout, process).await.is_err() {
                                let _ = errors.try_send(ProcessError::DeadlineElapsed { peer });
                            }
                        });
                    }
                    Err(error) => {
                        if shutdown.is_cancelled() {
                            break;
                        }
                        self.report(ProcessError::Receive { error });
                    }
                },

                // reap workers as they finish so the set stays small
                Some(_) = workers.join_next(), if !workers.is_empty() => {}
            }
        }

        self.drain(workers).await;
    }

    /// Wait out the grace period for still-running workers, then abort
    /// whatever is left.
    async fn drain(&self, mut workers: JoinSet<()>) {
        if workers.is_empty() {
            return;
        }

        tracing::info!(outstanding = workers.len(), "waiting for workers to finish");
        let grace = sleep(self.config.shutdown_grace);
        tokio::pin!(grace);

        loop {
            tokio::select! {
                () = &mut grace => {
                    tracing::warn!(abandoned = workers.len(), "grace period elapsed, aborting workers");
                    workers.abort_all();
                    return;
                }
                joined = workers.join_next() => if joined.is_none() {
                    return;
                }
            }
        }
    }

    fn report(&self, error: ProcessError) {
        tracing::debug!(%error, "per-packet error");
        // bounded channel: if nobody is draining it fast enough the
        // record is dropped rather than the listener blocked
        let _ = self.errors.try_send(error);
    }
}

/// Handle one datagram: decode it, classify it by the QR bit, and
/// relay the original octets.  The datagram is never re-serialised,
/// so whatever options or quirks it carries pass through untouched.
async fn process_datagram(
    socket: &UdpSocket,
    transactions: &SharedTransactionTable,
    upstream: SocketAddr,
    errors: &mpsc::Sender<ProcessError>,
    datagram: &[u8],
    peer: SocketAddr,
) {
    let message = match Message::from_octets(datagram) {
        Ok(message) => message,
        Err(error) => {
            let _ = errors.try_send(ProcessError::Decode { peer, error });
            return;
        }
    };

    let id = message.header.id;

    if message.header.is_response {
        // a reply from the upstream: claim the transaction and route
        // the reply back to whoever asked
        match transactions.remove(id) {
            Some(entry) => {
                let answer_types = message
                    .answers
                    .iter()
                    .map(|answer| answer.rtype_with_data.rtype().to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                tracing::debug!(
                    id,
                    client = %entry.client,
                    rcode = %message.header.rcode,
                    %answer_types,
                    "relaying reply"
                );
                if let Err(error) = socket.send_to(datagram, entry.client).await {
                    let _ = errors.try_send(ProcessError::Send {
                        target: entry.client,
                        error,
                    });
                }
            }
            None => {
                let _ = errors.try_send(ProcessError::UnknownTransaction { peer, id });
            }
        }
    } else {
        // a query from a client: note who asked, relay the exact
        // octets upstream
        if let Some(question) = message.questions.first() {
            tracing::debug!(id, %peer, opcode = %message.header.opcode, %question, "forwarding query");
        }

        transactions.store(
            id,
            TransactionEntry {
                client: peer,
                created_at: Instant::now(),
            },
        );
        if let Err(error) = socket.send_to(datagram, upstream).await {
            let _ = errors.try_send(ProcessError::Send {
                target: upstream,
                error,
            });
        }
    }
}
