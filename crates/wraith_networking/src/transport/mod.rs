//! # Transport Layer
//!
//! The seam between replication and the wire.
//!
//! ## Design
//!
//! - Unreliable datagrams: any packet may be lost or duplicated
//! - Packets on one channel arrive in send order or not at all
//! - [`LoopbackNetwork`] wires a server and its clients in-process
//! - [`LossyTransport`] wraps any transport with simulated loss

mod lossy;

pub use lossy::{LossyTransport, NetworkConditions};

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use wraith_core::CoreError;

use crate::error::{NetError, NetResult};
use crate::server::ConnectionId;
use crate::MAX_PACKET_SIZE;

/// Transport statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Packets sent.
    pub packets_sent: u64,
    /// Packets received.
    pub packets_received: u64,
    /// Bytes sent.
    pub bytes_sent: u64,
    /// Bytes received.
    pub bytes_received: u64,
    /// Packets dropped before delivery.
    pub packets_dropped: u64,
    /// Packets delivered twice.
    pub packets_duplicated: u64,
}

/// Unreliable datagram transport.
pub trait Transport: Send + Sync {
    /// Sends one datagram. Delivery is not guaranteed.
    ///
    /// # Errors
    ///
    /// [`NetError::UnknownConnection`] if `to` is not reachable,
    /// [`CoreError::PayloadTooLarge`] if `bytes` exceeds [`Transport::max_datagram_size`].
    fn send(&self, to: ConnectionId, bytes: &[u8]) -> NetResult<()>;

    /// Takes the next received datagram and its sender, if any.
    fn receive(&self) -> Option<(ConnectionId, Vec<u8>)>;

    /// Largest datagram accepted by [`Transport::send`].
    fn max_datagram_size(&self) -> usize {
        MAX_PACKET_SIZE
    }

    /// Traffic counters.
    fn stats(&self) -> TransportStats;
}

type Datagram = (ConnectionId, Vec<u8>);

fn check_size(bytes: &[u8], limit: usize) -> NetResult<()> {
    if bytes.len() > limit {
        return Err(CoreError::PayloadTooLarge {
            size: bytes.len(),
            limit,
        }
        .into());
    }
    Ok(())
}

/// In-process network joining one server to many clients.
///
/// ```text
///              ┌──────────────┐
///   client 1 ──┤              ├── server inbox
///   client 2 ──┤  crossbeam   │
///   client n ──┤   channels   ├── client inboxes
///              └──────────────┘
/// ```
#[derive(Clone)]
pub struct LoopbackNetwork {
    server_tx: Sender<Datagram>,
    server_rx: Receiver<Datagram>,
    clients: Arc<RwLock<HashMap<ConnectionId, Sender<Datagram>>>>,
    max_datagram: usize,
}

impl LoopbackNetwork {
    /// Creates a network carrying datagrams of at most `max_datagram` bytes.
    #[must_use]
    pub fn new(max_datagram: usize) -> Self {
        let (server_tx, server_rx) = unbounded();
        Self {
            server_tx,
            server_rx,
            clients: Arc::new(RwLock::new(HashMap::new())),
            max_datagram,
        }
    }

    /// The server's endpoint.
    #[must_use]
    pub fn server_endpoint(&self) -> ServerEndpoint {
        ServerEndpoint {
            network: self.clone(),
            stats: Mutex::new(TransportStats::default()),
        }
    }

    /// Attaches a client under connection id `id`.
    #[must_use]
    pub fn client_endpoint(&self, id: ConnectionId) -> ClientEndpoint {
        let (tx, rx) = unbounded();
        self.clients.write().insert(id, tx);
        ClientEndpoint {
            id,
            server_tx: self.server_tx.clone(),
            inbox: rx,
            max_datagram: self.max_datagram,
            stats: Mutex::new(TransportStats::default()),
        }
    }

    /// Detaches a client; later sends to it fail.
    pub fn detach(&self, id: ConnectionId) {
        self.clients.write().remove(&id);
    }
}

impl Default for LoopbackNetwork {
    fn default() -> Self {
        Self::new(MAX_PACKET_SIZE)
    }
}

/// Server side of a [`LoopbackNetwork`].
pub struct ServerEndpoint {
    network: LoopbackNetwork,
    stats: Mutex<TransportStats>,
}

impl Transport for ServerEndpoint {
    fn send(&self, to: ConnectionId, bytes: &[u8]) -> NetResult<()> {
        check_size(bytes, self.network.max_datagram)?;
        let clients = self.network.clients.read();
        let tx = clients.get(&to).ok_or(NetError::UnknownConnection(to))?;
        tx.send((ConnectionId::SERVER, bytes.to_vec()))
            .map_err(|_| NetError::UnknownConnection(to))?;
        let mut stats = self.stats.lock();
        stats.packets_sent += 1;
        stats.bytes_sent += bytes.len() as u64;
        Ok(())
    }

    fn receive(&self) -> Option<(ConnectionId, Vec<u8>)> {
        let datagram = self.network.server_rx.try_recv().ok()?;
        let mut stats = self.stats.lock();
        stats.packets_received += 1;
        stats.bytes_received += datagram.1.len() as u64;
        Some(datagram)
    }

    fn max_datagram_size(&self) -> usize {
        self.network.max_datagram
    }

    fn stats(&self) -> TransportStats {
        *self.stats.lock()
    }
}

/// Client side of a [`LoopbackNetwork`].
pub struct ClientEndpoint {
    id: ConnectionId,
    server_tx: Sender<Datagram>,
    inbox: Receiver<Datagram>,
    max_datagram: usize,
    stats: Mutex<TransportStats>,
}

impl ClientEndpoint {
    /// Connection id this endpoint sends as.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Transport for ClientEndpoint {
    /// Sends to the server; `to` is ignored.
    fn send(&self, _to: ConnectionId, bytes: &[u8]) -> NetResult<()> {
        check_size(bytes, self.max_datagram)?;
        self.server_tx
            .send((self.id, bytes.to_vec()))
            .map_err(|_| NetError::UnknownConnection(ConnectionId::SERVER))?;
        let mut stats = self.stats.lock();
        stats.packets_sent += 1;
        stats.bytes_sent += bytes.len() as u64;
        Ok(())
    }

    fn receive(&self) -> Option<(ConnectionId, Vec<u8>)> {
        let datagram = self.inbox.try_recv().ok()?;
        let mut stats = self.stats.lock();
        stats.packets_received += 1;
        stats.bytes_received += datagram.1.len() as u64;
        Some(datagram)
    }

    fn max_datagram_size(&self) -> usize {
        self.max_datagram
    }

    fn stats(&self) -> TransportStats {
        *self.stats.lock()
    }
}
