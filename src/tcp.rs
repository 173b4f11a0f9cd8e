//! The TCP connection core: header codec, transmission control block,
//! per-connection state machine, and the [`Tcp`] owner that routes parsed
//! segments to connections.

pub mod connection;
mod rtt;
pub mod segment;
pub mod seq;
pub mod state;
pub mod tcb;
pub mod tcp_parsing;

pub use connection::{AdvanceTimeResult, Connection, ConnectionEvents, Disconnect, MSL};
pub use segment::Segment;
pub use state::{HandleResult, State};
pub use tcb::TcpConfig;
pub use tcp_parsing::{TcpHeader, TcpHeaderBuilder};

use crate::logging;
use crate::utility::{Ipv4Address, Socket};
use crate::Message;
use dashmap::{mapref::entry::Entry, DashMap};
use rand::{rngs::SmallRng, RngCore, SeedableRng};
use std::fmt::{self, Display};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error as ThisError;

/// Identifies a connection by its two endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ConnectionId {
    pub local: Socket,
    pub remote: Socket,
}

impl ConnectionId {
    pub const fn new(local: Socket, remote: Socket) -> Self {
        Self { local, remote }
    }

    /// The same connection as seen from the other end.
    pub const fn reverse(self) -> Self {
        Self {
            local: self.remote,
            remote: self.local,
        }
    }
}

impl Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.local, self.remote)
    }
}

/// Errors surfaced to users of the connection API. Protocol-level faults
/// never appear here; they are answered on the wire and logged.
#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum TcpError {
    #[error("connection does not exist")]
    DoesNotExist,
    #[error("connection already exists")]
    AlreadyExists,
    #[error("connection closing")]
    Closing,
    #[error("insufficient resources")]
    InsufficientResources,
    #[error("connection reset")]
    ConnectionReset,
    #[error("foreign socket unspecified")]
    ForeignSocketUnspecified,
}

/// The initial send sequence policy for new connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Iss {
    #[default]
    Random,
    FromSeed(u64),
}

impl From<Iss> for u32 {
    fn from(iss: Iss) -> Self {
        let mut rng = match iss {
            Iss::Random => SmallRng::from_entropy(),
            Iss::FromSeed(c) => SmallRng::seed_from_u64(c),
        };
        rng.next_u32()
    }
}

/// Owns the connections of one host: listen bindings, the connection
/// table, and the initial sequence number policy. Incoming parsed segments
/// enter through [`segment_arrives`](Self::segment_arrives); replies come
/// back out as [`Segment`]s for the lower layer.
pub struct Tcp {
    listen_bindings: DashMap<Socket, ()>,
    connections: DashMap<ConnectionId, Arc<Mutex<Connection>>>,
    iss_seed: Mutex<Iss>,
    config: TcpConfig,
}

impl Tcp {
    pub fn new(config: TcpConfig, iss: Iss) -> Self {
        Self {
            listen_bindings: Default::default(),
            connections: Default::default(),
            iss_seed: Mutex::new(iss),
            config,
        }
    }

    /// Accepts connection requests arriving at the given socket.
    pub fn listen(&self, socket: Socket) {
        self.listen_bindings.insert(socket, ());
    }

    /// Actively opens a connection toward `remote`.
    pub fn open(
        &self,
        local: Socket,
        remote: Socket,
    ) -> Result<Arc<Mutex<Connection>>, TcpError> {
        let id = ConnectionId::new(local, remote);
        match self.connections.entry(id) {
            Entry::Occupied(_) => Err(TcpError::AlreadyExists),
            Entry::Vacant(entry) => {
                let mut connection = Connection::new(id, self.next_iss(), self.config);
                connection.open(true)?;
                let connection = Arc::new(Mutex::new(connection));
                entry.insert(connection.clone());
                Ok(connection)
            }
        }
    }

    /// Looks up a live connection.
    pub fn connection(&self, id: ConnectionId) -> Option<Arc<Mutex<Connection>>> {
        self.connections.get(&id).map(|entry| entry.value().clone())
    }

    fn next_iss(&self) -> u32 {
        let mut lock = self.iss_seed.lock().unwrap();
        let iss = *lock;
        if let Iss::FromSeed(c) = *lock {
            *lock = Iss::FromSeed(c + 1);
        }
        iss.into()
    }

    /// Routes a parsed segment to its connection, creating one when a
    /// listener matches. Returns the segments to hand to the lower layer.
    pub fn segment_arrives(
        &self,
        segment: Segment,
        local_address: Ipv4Address,
        remote_address: Ipv4Address,
        events: &mut dyn ConnectionEvents,
    ) -> Vec<Segment> {
        let local = Socket::new(local_address, segment.header.dst_port);
        let remote = Socket::new(remote_address, segment.header.src_port);
        let id = ConnectionId::new(local, remote);
        let connection = match self.connections.entry(id) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                if self.listen_bindings.contains_key(&local) {
                    let mut connection = Connection::new(id, self.next_iss(), self.config);
                    connection
                        .open(false)
                        .expect("a fresh connection accepts a passive open");
                    let connection = Arc::new(Mutex::new(connection));
                    entry.insert(connection.clone());
                    connection
                } else {
                    // No connection state at all: answer by the rules of
                    // the CLOSED state
                    return self
                        .respond_from_closed_state(&segment, local_address, remote_address)
                        .into_iter()
                        .collect();
                }
            }
        };
        let mut locked = connection.lock().unwrap();
        let result = locked.handle(segment, events);
        let out = locked.segments();
        drop(locked);
        if result == HandleResult::Closed {
            self.connections.remove(&id);
            logging::connection_retired_event(id);
        }
        out
    }

    // See RFC 793 p65 for handling of segments without a connection
    fn respond_from_closed_state(
        &self,
        segment: &Segment,
        local_address: Ipv4Address,
        remote_address: Ipv4Address,
    ) -> Option<Segment> {
        let header = &segment.header;
        if header.ctl.rst() {
            // Discard reset segments
            return None;
        }
        let builder = if header.ctl.ack() {
            TcpHeaderBuilder::new(header.dst_port, header.src_port, header.ack).rst()
        } else {
            TcpHeaderBuilder::new(header.dst_port, header.src_port, 0)
                .rst()
                .ack(header.seq.wrapping_add(segment.seg_len()))
        };
        builder
            .build(local_address, remote_address, std::iter::empty())
            .ok()
            .map(|header| Segment::new(header, Message::default()))
    }

    /// Drives every connection's timers forward, retiring connections whose
    /// TimeWait expired. Returns retransmissions that came due.
    pub fn advance_time(&self, delta: Duration) -> Vec<Segment> {
        let mut out = Vec::new();
        let mut expired = Vec::new();
        for entry in self.connections.iter() {
            let mut connection = entry.value().lock().unwrap();
            if connection.advance_time(delta) == AdvanceTimeResult::CloseConnection {
                expired.push(*entry.key());
            }
            out.extend(connection.segments());
        }
        for id in expired {
            self.connections.remove(&id);
            logging::connection_retired_event(id);
        }
        out
    }
}
