//! The per-connection façade: one transmission control block, the current
//! state, the outgoing queues, the read request, and the timers. The
//! state-event matrix itself lives in [`super::state`].

use super::rtt::RttEstimator;
use super::segment::Segment;
use super::seq::{seq_le, seq_lt};
use super::state::State;
use super::tcb::{Tcb, TcpConfig};
use super::tcp_parsing::TcpHeaderBuilder;
use super::{ConnectionId, TcpError};
use crate::logging;
use crate::utility::Socket;
use crate::Message;
use std::collections::VecDeque;
use std::fmt::{self, Display};
use std::time::Duration;

/// The maximum segment lifetime. A connection lingers in TimeWait for twice
/// this long so that late segments from the old incarnation die out.
pub const MSL: Duration = Duration::from_secs(120);

/// Why the user is being told the connection went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disconnect {
    /// The peer closed its end of the connection
    Closing,
    /// The connection was reset
    Reset,
    /// The peer refused the connection attempt
    Refused,
}

impl Display for Disconnect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Disconnect::Closing => write!(f, "connection closing"),
            Disconnect::Reset => write!(f, "connection reset"),
            Disconnect::Refused => write!(f, "connection refused"),
        }
    }
}

/// The user-visible side of a connection. `handle` calls back into this
/// trait as segments change the connection's condition. Callbacks receive
/// the connection and may synchronously issue sends on it; the state
/// machine accounts for any data a callback transmits.
pub trait ConnectionEvents {
    /// Gates a passive open: a SYN arrived at a listening connection.
    /// Returning false refuses the connection.
    fn accept(&mut self, _id: ConnectionId) -> bool {
        true
    }

    /// The three-way handshake completed.
    fn connected(&mut self, _connection: &mut Connection) {}

    /// The connection is going away and why.
    fn disconnected(&mut self, _connection: &mut Connection, _cause: Disconnect) {}

    /// An exceptional condition that does not fit the disconnect causes.
    fn error(&mut self, _error: TcpError) {}

    /// Segment text reached the read buffer. `push` relays the PSH flag as
    /// a flush hint.
    fn received(&mut self, _connection: &mut Connection, _data: Message, _push: bool) {}
}

/// A segment on the retransmission queue and whether it is due to go out.
#[derive(Debug, Clone)]
pub(crate) struct Transmit {
    pub segment: Segment,
    /// Set when the segment should be handed to the network: once when
    /// first queued, and again whenever the retransmission timer fires.
    pub needs_transmit: bool,
}

impl Transmit {
    fn new(segment: Segment) -> Self {
        Self {
            segment,
            needs_transmit: true,
        }
    }
}

/// An outstanding RECEIVE: the user posted capacity for incoming text.
#[derive(Debug, Default)]
pub(crate) struct ReadRequest {
    pub buffer: Vec<u8>,
    pub capacity: usize,
}

/// What the owner should do after advancing a connection's clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceTimeResult {
    Ok,
    /// The TimeWait timer ran out; retire the connection
    CloseConnection,
}

/// A single TCP connection.
///
/// The connection is reactive: the owner feeds it segments through
/// [`handle`](Self::handle), time through [`advance_time`](Self::advance_time),
/// and user operations through `open`/`send`/`receive`/`close`/`abort`.
/// Segments the connection wants transmitted accumulate internally and are
/// drained with [`segments`](Self::segments). Nothing blocks.
#[derive(Debug)]
pub struct Connection {
    pub(crate) id: ConnectionId,
    pub(crate) config: TcpConfig,
    pub(crate) iss: u32,
    pub(crate) tcb: Tcb,
    pub(crate) state: State,
    pub(crate) prev_state: State,
    /// User data accepted by SEND but not yet segmentized
    pub(crate) write_queue: Message,
    /// Segments consuming sequence space, kept until wholly acknowledged
    pub(crate) retransmit: VecDeque<Transmit>,
    /// Segments that go out exactly once, such as pure ACKs and RSTs
    pub(crate) oneshot: Vec<Segment>,
    pub(crate) read_request: ReadRequest,
    pub(crate) rtt: RttEstimator,
    /// Monotonic connection-local time, driven by `advance_time`
    pub(crate) clock: Duration,
    pub(crate) rto_expires: Option<Duration>,
    pub(crate) rto_backoff: u32,
    pub(crate) time_wait_expires: Option<Duration>,
    /// The greatest acknowledgment number the peer has sent us
    pub(crate) last_ack_received: u32,
    /// The window advertised by the last acceptable acknowledgment
    pub(crate) last_wnd_received: u16,
    pub(crate) dup_acks: u8,
}

impl Connection {
    /// Creates a connection in the Closed state. `iss` is the initial send
    /// sequence number the connection will use when it opens; choosing it
    /// is the owner's policy.
    pub fn new(id: ConnectionId, iss: u32, config: TcpConfig) -> Self {
        Self {
            id,
            config,
            iss,
            tcb: Tcb::default(),
            state: State::Closed,
            prev_state: State::Closed,
            write_queue: Message::default(),
            retransmit: VecDeque::new(),
            oneshot: Vec::new(),
            read_request: ReadRequest::default(),
            rtt: RttEstimator::default(),
            clock: Duration::ZERO,
            rto_expires: None,
            rto_backoff: 0,
            time_wait_expires: None,
            last_ack_received: 0,
            last_wnd_received: 0,
            dup_acks: 0,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn previous_state(&self) -> State {
        self.prev_state
    }

    /// Fills in the remote endpoint. A listening connection learns its
    /// remote this way when the owner routes the first segment to it.
    pub fn set_remote(&mut self, remote: Socket) {
        self.id.remote = remote;
    }

    /// OPEN. An active open sends a SYN toward the remote; a passive open
    /// moves the connection to Listen.
    pub fn open(&mut self, active: bool) -> Result<(), TcpError> {
        match self.state {
            State::Closed | State::Listen if active => {
                if self.id.remote.is_unspecified() {
                    return Err(TcpError::ForeignSocketUnspecified);
                }
                self.tcb.init(self.iss, &self.config);
                let builder = self
                    .header_builder(self.tcb.snd.iss)
                    .syn()
                    .mss(self.config.mss);
                self.tcb.snd.una = self.tcb.snd.iss;
                self.tcb.snd.nxt = self.tcb.snd.iss.wrapping_add(1);
                self.enqueue_transmit(builder, Message::default());
                self.set_state(State::SynSent);
                Ok(())
            }
            State::Closed => {
                self.set_state(State::Listen);
                Ok(())
            }
            _ => Err(TcpError::AlreadyExists),
        }
    }

    /// SEND. In Established and CloseWait with an empty write queue the
    /// data is transmitted as far as the send window allows and the number
    /// of bytes that went out is returned; anything else is queued behind
    /// the handshake or the existing backlog and zero is returned.
    pub fn send(&mut self, data: Message) -> Result<usize, TcpError> {
        match self.state {
            State::Established | State::CloseWait => {
                let immediate = self.write_queue.is_empty();
                self.queue_for_send(data)?;
                if immediate {
                    Ok(self.write_queue_push())
                } else {
                    Ok(0)
                }
            }
            State::SynSent | State::SynReceived => {
                // Transmitted once the handshake completes
                self.queue_for_send(data)?;
                Ok(0)
            }
            State::Closed => Err(TcpError::DoesNotExist),
            _ => Err(TcpError::Closing),
        }
    }

    fn queue_for_send(&mut self, data: Message) -> Result<(), TcpError> {
        if self.write_queue.len() + data.len() > self.config.send_buffer {
            return Err(TcpError::InsufficientResources);
        }
        self.write_queue.append(data);
        Ok(())
    }

    /// RECEIVE. Posts a read buffer of the given capacity. Incoming text
    /// accumulates in it and is delivered through
    /// [`ConnectionEvents::received`] on PSH, on a full buffer, or when the
    /// peer closes.
    pub fn receive(&mut self, capacity: usize) -> Result<(), TcpError> {
        match self.state {
            State::Established | State::FinWait1 | State::FinWait2 | State::CloseWait => {
                self.read_request.capacity = capacity;
                Ok(())
            }
            _ => Err(TcpError::Closing),
        }
    }

    /// CLOSE. Sends a FIN where the state calls for one. Closing a
    /// connection that is already tearing down is a no-op rather than an
    /// error, as long as a second FIN is not emitted.
    pub fn close(&mut self) -> Result<(), TcpError> {
        match self.state {
            State::SynReceived | State::Established => {
                self.send_fin();
                self.set_state(State::FinWait1);
                Ok(())
            }
            State::CloseWait => {
                self.send_fin();
                // Correction from RFC 1122 p. 93: the peer's FIN is already
                // in hand, so only our FIN's acknowledgment remains
                self.set_state(State::LastAck);
                Ok(())
            }
            State::Listen | State::SynSent => {
                self.set_state(State::Closed);
                Ok(())
            }
            State::FinWait1
            | State::FinWait2
            | State::Closing
            | State::LastAck
            | State::TimeWait => Ok(()),
            State::Closed => Err(TcpError::DoesNotExist),
        }
    }

    fn send_fin(&mut self) {
        let builder = self
            .header_builder(self.tcb.snd.nxt)
            .ack(self.tcb.rcv.nxt)
            .fin();
        self.tcb.snd.nxt = self.tcb.snd.nxt.wrapping_add(1);
        self.enqueue_transmit(builder, Message::default());
    }

    /// ABORT. Resets the peer and flushes the queues. In states where
    /// nothing has been synchronized there is nothing to reset.
    pub fn abort(&mut self) {
        match self.state {
            State::SynReceived
            | State::Established
            | State::FinWait1
            | State::FinWait2
            | State::CloseWait => {
                self.send_reset();
                self.set_state(State::Closed);
            }
            _ => {}
        }
    }

    /// Drains the segments the connection wants transmitted: queued
    /// one-shot segments plus any retransmission-queue entries that are due.
    pub fn segments(&mut self) -> Vec<Segment> {
        let mut out: Vec<Segment> = std::mem::take(&mut self.oneshot);
        for transmit in self.retransmit.iter_mut() {
            if transmit.needs_transmit {
                transmit.needs_transmit = false;
                out.push(transmit.segment.clone());
            }
        }
        out
    }

    /// Moves the connection's clock forward, firing the retransmission and
    /// TimeWait timers as they come due.
    pub fn advance_time(&mut self, delta: Duration) -> AdvanceTimeResult {
        self.clock += delta;
        if let Some(expires) = self.time_wait_expires {
            if self.clock >= expires {
                return AdvanceTimeResult::CloseConnection;
            }
        }
        if let Some(expires) = self.rto_expires {
            if self.clock >= expires {
                if self.retransmit.is_empty() {
                    self.rt_stop();
                } else {
                    for transmit in self.retransmit.iter_mut() {
                        transmit.needs_transmit = true;
                    }
                    self.rtt.on_retransmit();
                    self.rto_backoff = (self.rto_backoff + 1).min(6);
                    self.rto_expires =
                        Some(self.clock + self.rtt.rto() * 2u32.pow(self.rto_backoff));
                }
            }
        }
        AdvanceTimeResult::Ok
    }

    /// A new acknowledgment arrived: advance `SND.UNA`, release what it
    /// covers from the retransmission queue, feed the RTT estimator, and
    /// push any queued data the reopened window admits.
    pub(crate) fn acknowledge(&mut self, ack: u32) {
        self.tcb.snd.una = ack;
        self.last_ack_received = ack;
        self.dup_acks = 0;
        // Slow-start growth; advisory only
        self.tcb.snd.cwnd = self.tcb.snd.cwnd.saturating_add(self.tcb.mss as u32);
        self.rtt.on_ack(self.clock, ack);
        self.rt_ack_queue(ack);
        self.rto_backoff = 0;
        if self.retransmit.is_empty() {
            self.rt_stop();
        } else {
            self.rto_expires = Some(self.clock + self.rtt.rto());
        }
        if self.has_doable_job() {
            self.write_queue_push();
        }
    }

    /// Releases retransmission-queue entries wholly covered by `ack`.
    pub(crate) fn rt_ack_queue(&mut self, ack: u32) {
        while let Some(transmit) = self.retransmit.front() {
            let end = transmit
                .segment
                .header
                .seq
                .wrapping_add(transmit.segment.seg_len());
            if seq_le(end, ack) {
                self.retransmit.pop_front();
            } else {
                break;
            }
        }
    }

    pub(crate) fn rt_flush(&mut self) {
        self.retransmit.clear();
        self.rt_stop();
    }

    pub(crate) fn rt_stop(&mut self) {
        self.rto_expires = None;
        self.rto_backoff = 0;
    }

    pub(crate) fn start_time_wait_timeout(&mut self) {
        self.time_wait_expires = Some(self.clock + MSL * 2);
    }

    pub(crate) fn write_queue_reset(&mut self) {
        self.write_queue = Message::default();
    }

    /// How much more the peer's window lets us send.
    pub(crate) fn usable_window(&self) -> u32 {
        let limit = self.tcb.snd.una.wrapping_add(self.tcb.snd.wnd as u32);
        if seq_lt(self.tcb.snd.nxt, limit) {
            limit.wrapping_sub(self.tcb.snd.nxt)
        } else {
            0
        }
    }

    pub(crate) fn has_doable_job(&self) -> bool {
        !self.write_queue.is_empty() && self.usable_window() > 0
    }

    /// Segmentizes queued user data as far as the usable window allows,
    /// one MSS at a time. The last segment of a push carries PSH. Returns
    /// how many bytes were segmentized.
    pub(crate) fn write_queue_push(&mut self) -> usize {
        let mut pushed = 0;
        loop {
            let usable = self.usable_window().min(self.tcb.mss as u32) as usize;
            if usable == 0 || self.write_queue.is_empty() {
                break;
            }
            let text = self.write_queue.take(usable);
            let length = text.len();
            let mut builder = self.header_builder(self.tcb.snd.nxt).ack(self.tcb.rcv.nxt);
            if self.write_queue.is_empty() {
                builder = builder.psh();
            }
            self.tcb.snd.nxt = self.tcb.snd.nxt.wrapping_add(length as u32);
            self.enqueue_transmit(builder, text);
            pushed += length;
        }
        pushed
    }

    /// A header builder primed with this connection's ports and the
    /// current receive window.
    pub(crate) fn header_builder(&self, seq: u32) -> TcpHeaderBuilder {
        TcpHeaderBuilder::new(self.id.local.port, self.id.remote.port, seq).wnd(self.tcb.rcv.wnd)
    }

    /// Queues a control segment that is sent once and never retransmitted.
    pub(crate) fn enqueue_oneshot(&mut self, builder: TcpHeaderBuilder) {
        match builder.build(
            self.id.local.address,
            self.id.remote.address,
            std::iter::empty(),
        ) {
            Ok(header) => {
                logging::segment_transmit_event(self.id, &header);
                self.oneshot.push(Segment::new(header, Message::default()));
            }
            Err(error) => tracing::error!(%error, "discarding outgoing segment"),
        }
    }

    /// Queues a sequence-space-consuming segment on the retransmission
    /// queue and arms the retransmission timer if it is idle.
    pub(crate) fn enqueue_transmit(&mut self, builder: TcpHeaderBuilder, text: Message) {
        match builder.build(self.id.local.address, self.id.remote.address, text.iter()) {
            Ok(header) => {
                logging::segment_transmit_event(self.id, &header);
                let segment = Segment::new(header, text);
                let end = segment.header.seq.wrapping_add(segment.seg_len());
                self.rtt.on_send(self.clock, end);
                if self.rto_expires.is_none() {
                    self.rto_expires = Some(self.clock + self.rtt.rto());
                }
                self.retransmit.push_back(Transmit::new(segment));
            }
            Err(error) => tracing::error!(%error, "discarding outgoing segment"),
        }
    }

    pub(crate) fn set_state(&mut self, state: State) {
        logging::state_change_event(self.id, self.state, state);
        self.prev_state = self.state;
        self.state = state;
    }

    pub(crate) fn drop_segment(&mut self, segment: &Segment, reason: &str) {
        logging::segment_drop_event(self.id, &segment.header, reason);
    }

    /// Moves incoming text into the posted read buffer, delivering to the
    /// user on PSH or when the buffer fills, and returns how many bytes
    /// were admitted. Only admitted bytes may be acknowledged; a tail that
    /// does not fit stays unacknowledged so the peer retransmits it. With
    /// no posted capacity at all the text counts as received and is
    /// dropped silently; that is the application's policy, not a protocol
    /// error.
    pub(crate) fn deliver_received(
        &mut self,
        mut text: Message,
        push: bool,
        events: &mut dyn ConnectionEvents,
    ) -> usize {
        if self.read_request.capacity == 0 {
            return text.len();
        }
        let room = self
            .read_request
            .capacity
            .saturating_sub(self.read_request.buffer.len());
        let taking = room.min(text.len());
        let chunk = text.take(taking);
        self.read_request.buffer.extend(chunk.iter());
        let full = self.read_request.buffer.len() >= self.read_request.capacity;
        if push || full {
            let data = std::mem::take(&mut self.read_request.buffer);
            events.received(self, Message::new(data), push);
        }
        taking
    }

    /// Flushes a partially filled read buffer to the user. The peer's FIN
    /// implies PUSH for any text not yet delivered.
    pub(crate) fn receive_disconnect(&mut self, events: &mut dyn ConnectionEvents) {
        if !self.read_request.buffer.is_empty() {
            let data = std::mem::take(&mut self.read_request.buffer);
            events.received(self, Message::new(data), true);
        }
    }
}
