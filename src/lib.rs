//! A user-space TCP connection core.
//!
//! This crate implements the per-connection state machine of TCP: the
//! component that, given an incoming segment and the current connection
//! state, decides what to transmit, how to update the transmission control
//! block, whether to deliver data to the user, and which state to move to
//! next. It covers the connection lifecycle of RFC 793 with the corrections
//! from RFC 1122 and the duplicate acknowledgment classification of RFC
//! 5681.
//!
//! # Organization
//!
//! - [`Message`](message::Message) provides the byte collection used for
//!   segment text, the write queue, and data delivered to the user
//! - [`tcp::Connection`] is the per-connection façade: one transmission
//!   control block, the current [`tcp::State`], outgoing queues, and timers
//! - [`tcp::Tcp`] owns the connection table and routes parsed segments to
//!   their connections
//!
//! # Driving a connection
//!
//! The state machine is reactive and runs to completion: the owner feeds
//! segments to [`tcp::Connection::handle`], drains replies with
//! [`tcp::Connection::segments`], and advances timers with
//! [`tcp::Connection::advance_time`]. Nothing inside blocks or polls the
//! clock. User-visible conditions arrive through the
//! [`tcp::ConnectionEvents`] trait.

mod logging;

pub mod message;
pub use message::Message;

pub mod utility;

pub mod tcp;
pub use tcp::connection::{Connection, ConnectionEvents, Disconnect};
pub use tcp::state::{HandleResult, State};
pub use tcp::{ConnectionId, Iss, Tcp, TcpError};
