//! Contains basic logging functions.
//!
//! These wrap `tracing` events with stable targets so that per-segment and
//! per-connection activity can be filtered and parsed by the subscriber the
//! embedding application installs. Dropped segments carry the drop reason;
//! this is the telemetry channel for protocol-level faults, which never
//! surface as errors.

use crate::tcp::state::State;
use crate::tcp::tcp_parsing::TcpHeader;
use crate::tcp::ConnectionId;
use tracing::{event, Level};

/// A segment was queued for transmission.
pub(crate) fn segment_transmit_event(id: ConnectionId, header: &TcpHeader) {
    event!(
        target: "TRANSMIT_SEGMENT",
        Level::TRACE,
        connection = %id,
        seq = header.seq,
        ack = header.ack,
        ctl = ?header.ctl,
        wnd = header.wnd,
    );
}

/// An incoming segment was dropped and why.
pub(crate) fn segment_drop_event(id: ConnectionId, header: &TcpHeader, reason: &str) {
    event!(
        target: "DROP_SEGMENT",
        Level::TRACE,
        connection = %id,
        seq = header.seq,
        ack = header.ack,
        reason,
    );
}

/// A connection moved to a new state.
pub(crate) fn state_change_event(id: ConnectionId, from: State, to: State) {
    event!(
        target: "STATE_CHANGE",
        Level::DEBUG,
        connection = %id,
        from = %from,
        to = %to,
    );
}

/// A connection was removed from the connection table.
pub(crate) fn connection_retired_event(id: ConnectionId) {
    event!(
        target: "CONNECTION_RETIRED",
        Level::DEBUG,
        connection = %id,
    );
}
