//! The TCP state machine: the eleven states of RFC 793 s3.2 and the
//! segment-arrives processing of s3.9, with the corrections from RFC 1122
//! and the duplicate-ACK classification of RFC 5681.
//!
//! Each state's `handle_*` function applies the canonical check order:
//! sequence number, RST, SYN, ACK, (URG, deprecated and skipped), segment
//! text, FIN. The order is load-bearing: later steps assume the invariants
//! the earlier ones established, so none of them may be reordered.

use super::connection::{Connection, ConnectionEvents, Disconnect};
use super::segment::Segment;
use super::seq::{in_window, seq_gt, seq_le, seq_lt};
use super::tcp_parsing::TcpHeaderBuilder;
use super::TcpError;
use std::fmt::{self, Display};

/// The state of a TCP connection. The state machine is described by the
/// diagram below.
///
/// ```text
///                             +---------+ ---------\      active OPEN
///                             |  CLOSED |            \    -----------
///                             +---------+<---------\   \   create TCB
///                               |     ^              \   \  snd SYN
///                  passive OPEN |     |   CLOSE        \   \
///                  ------------ |     | ----------       \   \
///                   create TCB  |     | delete TCB         \   \
///                               V     |                      \   \
///                             +---------+            CLOSE    |    \
///                             |  LISTEN |          ---------- |     |
///                             +---------+          delete TCB |     |
///                  rcv SYN      |     |     SEND              |     |
///                 -----------   |     |    -------            |     V
/// +--------+      snd SYN,ACK  /       \   snd SYN          +--------+
/// |        |<-----------------           ------------------>|        |
/// |  SYN   |                    rcv SYN                     |  SYN   |
/// |  RCVD  |<-----------------------------------------------|  SENT  |
/// |        |                  snd SYN,ACK                   |        |
/// |        |------------------           -------------------|        |
/// +--------+   rcv ACK of SYN  \       /  rcv SYN,ACK       +--------+
///    |         --------------   |     |   -----------
///    |                x         |     |     snd ACK
///    |                          V     V
///    |  CLOSE                 +---------+
///    | -------                |  ESTAB  |
///    | snd FIN                +---------+
///    |                 CLOSE    |     |    rcv FIN
///    V                -------   |     |    -------
/// +---------+         snd FIN  /       \   snd ACK         +---------+
/// |  FIN    |<----------------          ------------------>|  CLOSE  |
/// | WAIT-1  |------------------                            |   WAIT  |
/// +---------+          rcv FIN  \                          +---------+
///   | rcv ACK of FIN   -------   |                          CLOSE  |
///   | --------------   snd ACK   |                         ------- |
///   V        x                   V                         snd FIN V
/// +---------+               +---------+                    +---------+
/// |FINWAIT-2|               | CLOSING |                    | LAST-ACK|
/// +---------+               +---------+                    +---------+
///   |              rcv ACK of FIN |                 rcv ACK of FIN |
///   |  rcv FIN     -------------- |    Timeout=2MSL -------------- |
///   |  -------            x       V    ------------        x       V
///    \ snd ACK              +---------+delete TCB          +---------+
///      -------------------->|TIME-WAIT|------------------->| CLOSED  |
///                           +---------+                    +---------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// No connection state at all.
    Closed,
    /// Waiting for a connection request from any remote TCP.
    Listen,
    /// Waiting for a matching connection request after having sent a
    /// connection request.
    SynSent,
    /// Waiting for a confirming connection request acknowledgment after
    /// having both received and sent a connection request.
    SynReceived,
    /// An open connection, data received can be delivered to the user. The
    /// normal state for the data transfer phase of the connection.
    Established,
    /// Waiting for a connection termination request from the remote TCP, or
    /// an acknowledgment of the connection termination request previously
    /// sent.
    FinWait1,
    /// Waiting for a connection termination request from the remote TCP.
    FinWait2,
    /// Waiting for a connection termination request from the local user.
    CloseWait,
    /// Waiting for a connection termination request acknowledgment from the
    /// remote TCP.
    Closing,
    /// Waiting for an acknowledgment of the connection termination request
    /// previously sent to the remote TCP (which includes an acknowledgment
    /// of its connection termination request).
    LastAck,
    /// Waiting for enough time to pass to be sure the remote TCP received
    /// the acknowledgment of its connection termination request.
    TimeWait,
}

impl Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            State::Closed => write!(f, "CLOSED"),
            State::Listen => write!(f, "LISTEN"),
            State::SynSent => write!(f, "SYN-SENT"),
            State::SynReceived => write!(f, "SYN-RECEIVED"),
            State::Established => write!(f, "ESTABLISHED"),
            State::FinWait1 => write!(f, "FIN-WAIT-1"),
            State::FinWait2 => write!(f, "FIN-WAIT-2"),
            State::CloseWait => write!(f, "CLOSE-WAIT"),
            State::Closing => write!(f, "CLOSING"),
            State::LastAck => write!(f, "LAST-ACK"),
            State::TimeWait => write!(f, "TIME-WAIT"),
        }
    }
}

/// What the owner should do with the connection after `handle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleResult {
    /// The connection continues
    Ok,
    /// The peer began an orderly close; the user should CLOSE in turn
    Close,
    /// The connection is finished; retire it
    Closed,
}

impl Connection {
    /// Processes one incoming segment against the current state. Segments
    /// must arrive in the order the lower layer delivered them.
    pub fn handle(&mut self, segment: Segment, events: &mut dyn ConnectionEvents) -> HandleResult {
        match self.state {
            State::Closed => self.handle_closed(segment),
            State::Listen => self.handle_listen(segment, events),
            State::SynSent => self.handle_syn_sent(segment, events),
            State::SynReceived => self.handle_syn_received(segment, events),
            State::Established => self.handle_established(segment, events),
            State::FinWait1 => self.handle_fin_wait1(segment, events),
            State::FinWait2 => self.handle_fin_wait2(segment, events),
            State::CloseWait => self.handle_close_wait(segment, events),
            State::Closing => self.handle_closing(segment, events),
            State::LastAck => self.handle_last_ack(segment, events),
            State::TimeWait => self.handle_time_wait(segment, events),
        }
    }

    // COMMON PROCEDURES
    //
    // Shared subroutines of the segment-arrives processing, used by every
    // synchronized state.

    /// The four-case acceptability test of RFC 793 p69. An unacceptable
    /// segment is answered with `<SEQ=SND.NXT><ACK=RCV.NXT><CTL=ACK>`
    /// (unless it carries RST) and dropped without touching the TCB.
    fn check_seq(&mut self, segment: &Segment) -> bool {
        let seg_len = segment.seg_len();
        let seq = segment.header.seq;
        let rcv = self.tcb.rcv;
        let acceptable = if seg_len == 0 {
            if rcv.wnd == 0 {
                seq == rcv.nxt
            } else {
                in_window(seq, rcv.nxt, rcv.wnd as u32)
            }
        } else if rcv.wnd == 0 {
            // With a closed window only sequence-space-free segments can
            // be acceptable, and this one is not
            false
        } else {
            in_window(seq, rcv.nxt, rcv.wnd as u32)
                || in_window(seq.wrapping_add(seg_len - 1), rcv.nxt, rcv.wnd as u32)
        };
        if !acceptable {
            if !segment.header.ctl.rst() {
                let builder = self.header_builder(self.tcb.snd.nxt).ack(self.tcb.rcv.nxt);
                self.enqueue_oneshot(builder);
            }
            self.drop_segment(segment, "unacceptable sequence number");
            return false;
        }
        true
    }

    /// The acknowledgment processing of RFC 793 p72, with the window-update
    /// comparison corrected per RFC 1122 p94. Returns whether processing of
    /// the segment should continue.
    fn check_ack(&mut self, segment: &Segment) -> bool {
        if !segment.header.ctl.ack() {
            self.drop_segment(segment, "ACK not set");
            return false;
        }
        let ack = segment.header.ack;
        if seq_gt(ack, self.tcb.snd.nxt) {
            // Acknowledges something not yet sent
            let builder = self.header_builder(self.tcb.snd.nxt).ack(self.tcb.rcv.nxt);
            self.enqueue_oneshot(builder);
            self.drop_segment(segment, "SEG.ACK > SND.NXT");
            return false;
        }
        if seq_le(self.tcb.snd.una, ack) {
            // The guard keeps old segments from shrinking the window:
            // SND.WL1/WL2 record the segment that last updated it
            let seq = segment.header.seq;
            if seq_lt(self.tcb.snd.wl1, seq)
                || (self.tcb.snd.wl1 == seq && seq_le(self.tcb.snd.wl2, ack))
            {
                self.tcb.snd.wnd = segment.header.wnd;
                self.tcb.snd.wl1 = seq;
                self.tcb.snd.wl2 = ack;
            }
            if seq_lt(self.tcb.snd.una, ack) {
                self.acknowledge(ack);
            } else if self.is_duplicate_ack(segment) {
                self.duplicate_ack(ack);
            }
            self.last_wnd_received = segment.header.wnd;
        }
        // An old duplicate (SEG.ACK < SND.UNA) is ignored but the segment
        // is still processed
        true
    }

    /// The five-condition duplicate test of RFC 5681 s2.
    fn is_duplicate_ack(&self, segment: &Segment) -> bool {
        let header = &segment.header;
        // (a) there is outstanding unacknowledged data
        seq_lt(self.tcb.snd.una, self.tcb.snd.nxt)
            // (b) the segment carries no data
            && !segment.has_text()
            // (c) neither SYN nor FIN is set
            && !header.ctl.syn()
            && !header.ctl.fin()
            // (d) the acknowledgment equals the greatest received
            && header.ack == self.last_ack_received
            // (e) the advertised window is unchanged
            && header.wnd == self.last_wnd_received
    }

    /// The congestion-control hook for qualifying duplicates. The third in
    /// a row re-flags the oldest outstanding segment (RFC 5681 fast
    /// retransmit); congestion control beyond that lives outside this
    /// crate.
    fn duplicate_ack(&mut self, ack: u32) {
        self.dup_acks = self.dup_acks.saturating_add(1);
        tracing::trace!(ack, count = self.dup_acks, "duplicate acknowledgment");
        if self.dup_acks == 3 {
            if let Some(head) = self.retransmit.front_mut() {
                head.needs_transmit = true;
            }
        }
    }

    /// Moves segment text toward the user, advances `RCV.NXT` by exactly
    /// the byte count that was taken in, and acknowledges. Bytes the read
    /// buffer could not admit stay unacknowledged; the peer's
    /// retransmission brings them back once capacity opens up.
    /// Precondition: the segment passed `check_seq` and `check_ack` and
    /// carries text.
    fn process_segment(&mut self, segment: &Segment, events: &mut dyn ConnectionEvents) {
        let mut text = segment.text.clone();
        // Trim the prefix an earlier arrival already covered, so a
        // retransmission straddling RCV.NXT only contributes its new part
        let text_seq = segment
            .header
            .seq
            .wrapping_add(segment.header.ctl.syn() as u32);
        if seq_lt(text_seq, self.tcb.rcv.nxt) {
            text.take(self.tcb.rcv.nxt.wrapping_sub(text_seq) as usize);
        }
        let push = segment.header.ctl.psh();
        let delivered = self.deliver_received(text, push, events);
        self.tcb.rcv.nxt = self.tcb.rcv.nxt.wrapping_add(delivered as u32);
        let builder = self.header_builder(self.tcb.snd.nxt).ack(self.tcb.rcv.nxt);
        self.enqueue_oneshot(builder);
        if self.has_doable_job() {
            self.write_queue_push();
        }
    }

    /// The peer is closing: signal the user, advance `RCV.NXT` over the
    /// FIN, acknowledge it, and flush any partial read to the user.
    fn process_fin(&mut self, events: &mut dyn ConnectionEvents) {
        events.disconnected(self, Disconnect::Closing);
        // The FIN occupies one sequence number
        self.tcb.rcv.nxt = self.tcb.rcv.nxt.wrapping_add(1);
        let builder = self.header_builder(self.tcb.snd.nxt).ack(self.tcb.rcv.nxt);
        self.enqueue_oneshot(builder);
        self.receive_disconnect(events);
    }

    /// Resets the peer when aborting: `<SEQ=SND.NXT><CTL=RST>` with the
    /// write and retransmission queues flushed.
    pub(crate) fn send_reset(&mut self) {
        self.write_queue_reset();
        let builder = self.header_builder(self.tcb.snd.nxt).rst();
        self.rt_flush();
        self.enqueue_oneshot(builder);
    }

    /// A SYN arrived on a synchronized connection: `<SEQ=SEG.ACK><CTL=RST>`,
    /// tell the user, and retire the connection.
    fn unallowed_syn_reset(
        &mut self,
        segment: &Segment,
        events: &mut dyn ConnectionEvents,
    ) -> HandleResult {
        let builder =
            TcpHeaderBuilder::new(self.id.local.port, self.id.remote.port, segment.header.ack)
                .rst();
        self.enqueue_oneshot(builder);
        events.disconnected(self, Disconnect::Reset);
        HandleResult::Closed
    }

    // SEGMENT ARRIVES, STATE BY STATE

    // RFC 793 p65
    fn handle_closed(&mut self, segment: Segment) -> HandleResult {
        if segment.header.ctl.rst() {
            self.drop_segment(&segment, "RST in CLOSED");
            return HandleResult::Ok;
        }
        let builder = if segment.header.ctl.ack() {
            TcpHeaderBuilder::new(self.id.local.port, self.id.remote.port, segment.header.ack)
                .rst()
        } else {
            TcpHeaderBuilder::new(self.id.local.port, self.id.remote.port, 0)
                .rst()
                .ack(segment.header.seq.wrapping_add(segment.seg_len()))
        };
        self.enqueue_oneshot(builder);
        HandleResult::Ok
    }

    // RFC 793 p65
    fn handle_listen(&mut self, segment: Segment, events: &mut dyn ConnectionEvents) -> HandleResult {
        if segment.header.ctl.rst() {
            // Could not be valid while listening
            self.drop_segment(&segment, "RST in LISTEN");
            return HandleResult::Ok;
        }
        if segment.header.ctl.ack() {
            let builder =
                TcpHeaderBuilder::new(self.id.local.port, self.id.remote.port, segment.header.ack)
                    .rst();
            self.enqueue_oneshot(builder);
            return HandleResult::Ok;
        }
        if segment.header.ctl.syn() {
            if !events.accept(self.id) {
                return HandleResult::Closed;
            }
            self.tcb.init(self.iss, &self.config);
            self.tcb.rcv.irs = segment.header.seq;
            self.tcb.rcv.nxt = segment.header.seq.wrapping_add(1);
            self.tcb.snd.una = self.tcb.snd.iss;
            self.tcb.snd.nxt = self.tcb.snd.iss.wrapping_add(1);
            // Seed the send window from the SYN so the first update guard
            // has something real to compare against
            self.tcb.snd.wnd = segment.header.wnd;
            self.tcb.snd.wl1 = segment.header.seq;
            self.tcb.snd.wl2 = segment.header.ack;
            self.last_wnd_received = segment.header.wnd;
            self.tcb.learn_mss(segment.header.mss);
            let builder = self
                .header_builder(self.tcb.snd.iss)
                .syn()
                .ack(self.tcb.rcv.nxt)
                .mss(self.config.mss);
            self.enqueue_transmit(builder, crate::Message::default());
            self.set_state(State::SynReceived);
            return HandleResult::Ok;
        }
        // Anything else cannot be valid here
        self.drop_segment(&segment, "no SYN in LISTEN");
        HandleResult::Ok
    }

    // RFC 793 p66
    fn handle_syn_sent(
        &mut self,
        segment: Segment,
        events: &mut dyn ConnectionEvents,
    ) -> HandleResult {
        // First, check the ACK
        if segment.header.ctl.ack() {
            let ack = segment.header.ack;
            if seq_le(ack, self.tcb.snd.iss) || seq_gt(ack, self.tcb.snd.nxt) {
                if segment.header.ctl.rst() {
                    self.drop_segment(&segment, "RST with unacceptable ACK");
                } else {
                    let builder =
                        TcpHeaderBuilder::new(self.id.local.port, self.id.remote.port, ack).rst();
                    self.enqueue_oneshot(builder);
                }
                return HandleResult::Ok;
            }
            // SND.UNA =< SEG.ACK =< SND.NXT: the ACK is acceptable
            if self.rtt.active() {
                self.rtt.stop();
            }
        }
        // Second, check RST
        if segment.header.ctl.rst() {
            if segment.header.ctl.ack() {
                events.error(TcpError::ConnectionReset);
                self.drop_segment(&segment, "RST with acceptable ACK");
                return HandleResult::Closed;
            }
            self.drop_segment(&segment, "RST without ACK");
            return HandleResult::Ok;
        }
        // Third would be the security check, which is not implemented
        // Fourth, check SYN
        if segment.header.ctl.syn() {
            self.tcb.rcv.irs = segment.header.seq;
            self.tcb.rcv.nxt = segment.header.seq.wrapping_add(1);
            self.tcb.learn_mss(segment.header.mss);
            if segment.header.ctl.ack() {
                let ack = segment.header.ack;
                self.tcb.snd.una = ack;
                self.last_ack_received = ack;
                self.rt_ack_queue(ack);
            }
            if seq_gt(self.tcb.snd.una, self.tcb.snd.iss) {
                // Our SYN has been acknowledged
                self.set_state(State::Established);
                // Correction from RFC 1122 p94: take the send window from
                // this segment; the usual update guard has nothing to
                // compare against yet
                self.tcb.snd.wnd = segment.header.wnd;
                self.tcb.snd.wl1 = segment.header.seq;
                self.tcb.snd.wl2 = segment.header.ack;
                self.last_wnd_received = segment.header.wnd;
                if self.retransmit.is_empty() {
                    self.rt_stop();
                }

                // The connect callback may itself transmit; only answer
                // with a bare ACK if nothing else carried it
                let snd_nxt = self.tcb.snd.nxt;
                if self.has_doable_job() {
                    self.write_queue_push();
                }
                events.connected(self);
                if self.tcb.snd.nxt == snd_nxt {
                    let builder = self.header_builder(self.tcb.snd.nxt).ack(self.tcb.rcv.nxt);
                    self.enqueue_oneshot(builder);
                }
                if segment.has_text() {
                    self.process_segment(&segment, events);
                }
                if segment.header.ctl.fin() {
                    self.process_fin(events);
                    self.set_state(State::CloseWait);
                }
                return HandleResult::Ok;
            }
            // Simultaneous open: answer the peer's SYN with SYN,ACK. The
            // plain SYN on the retransmission queue is superseded.
            self.rt_flush();
            let builder = self
                .header_builder(self.tcb.snd.iss)
                .syn()
                .ack(self.tcb.rcv.nxt)
                .mss(self.config.mss);
            self.enqueue_transmit(builder, crate::Message::default());
            self.set_state(State::SynReceived);
            if segment.has_text() {
                self.process_segment(&segment, events);
            }
            return HandleResult::Ok;
        }
        self.drop_segment(&segment, "neither SYN nor RST");
        HandleResult::Ok
    }

    // RFC 793 p69, with the refused/reset distinction resting on whether
    // this connection was an active open
    fn handle_syn_received(
        &mut self,
        segment: Segment,
        events: &mut dyn ConnectionEvents,
    ) -> HandleResult {
        if !self.check_seq(&segment) {
            return HandleResult::Ok;
        }
        if segment.header.ctl.rst() {
            // A passive-origin connection just goes away; for an active
            // origin the peer refused us
            if self.prev_state == State::SynSent {
                events.disconnected(self, Disconnect::Refused);
            }
            self.rt_flush();
            return HandleResult::Closed;
        }
        if segment.header.ctl.syn() {
            return self.unallowed_syn_reset(&segment, events);
        }
        if !segment.header.ctl.ack() {
            self.drop_segment(&segment, "no ACK in SYN-RECEIVED");
            return HandleResult::Ok;
        }
        let ack = segment.header.ack;
        if seq_le(self.tcb.snd.una, ack) && seq_le(ack, self.tcb.snd.nxt) {
            if self.rtt.active() {
                self.rtt.stop();
            }
            self.set_state(State::Established);
            self.acknowledge(ack);
            self.last_wnd_received = segment.header.wnd;
            if segment.has_text() {
                self.process_segment(&segment, events);
            }
            events.connected(self);
            if segment.header.ctl.fin() {
                self.process_fin(events);
                self.set_state(State::CloseWait);
                return HandleResult::Close;
            }
            HandleResult::Ok
        } else {
            let builder =
                TcpHeaderBuilder::new(self.id.local.port, self.id.remote.port, ack).rst();
            self.enqueue_oneshot(builder);
            HandleResult::Ok
        }
    }

    // RFC 793 p69
    fn handle_established(
        &mut self,
        segment: Segment,
        events: &mut dyn ConnectionEvents,
    ) -> HandleResult {
        if !self.check_seq(&segment) {
            return HandleResult::Ok;
        }
        if segment.header.ctl.rst() {
            events.disconnected(self, Disconnect::Reset);
            return HandleResult::Closed;
        }
        if segment.header.ctl.syn() {
            return self.unallowed_syn_reset(&segment, events);
        }
        if !self.check_ack(&segment) {
            return HandleResult::Ok;
        }
        // URG processing would go here; the urgent mechanism is deprecated
        if segment.has_text() {
            self.process_segment(&segment, events);
        }
        if segment.header.ctl.fin() {
            self.process_fin(events);
            self.set_state(State::CloseWait);
            return HandleResult::Close;
        }
        HandleResult::Ok
    }

    // RFC 793 p73
    fn handle_fin_wait1(
        &mut self,
        segment: Segment,
        events: &mut dyn ConnectionEvents,
    ) -> HandleResult {
        if !self.check_seq(&segment) {
            return HandleResult::Ok;
        }
        if segment.header.ctl.rst() {
            events.disconnected(self, Disconnect::Reset);
            return HandleResult::Closed;
        }
        if segment.header.ctl.syn() {
            return self.unallowed_syn_reset(&segment, events);
        }
        if !self.check_ack(&segment) {
            return HandleResult::Ok;
        }
        if segment.header.ack == self.tcb.snd.nxt {
            // Our FIN is acknowledged. Continue in FIN-WAIT-2 with the
            // same segment so text or a FIN riding on it is not lost.
            // This is the only re-dispatch; it cannot recurse.
            self.set_state(State::FinWait2);
            return self.handle_fin_wait2(segment, events);
        }
        if segment.has_text() {
            self.process_segment(&segment, events);
        }
        if segment.header.ctl.fin() {
            self.process_fin(events);
            self.set_state(State::Closing);
        }
        HandleResult::Ok
    }

    // RFC 793 p73
    fn handle_fin_wait2(
        &mut self,
        segment: Segment,
        events: &mut dyn ConnectionEvents,
    ) -> HandleResult {
        if !self.check_seq(&segment) {
            return HandleResult::Ok;
        }
        if segment.header.ctl.rst() {
            events.disconnected(self, Disconnect::Reset);
            return HandleResult::Closed;
        }
        if segment.header.ctl.syn() {
            return self.unallowed_syn_reset(&segment, events);
        }
        if !self.check_ack(&segment) {
            return HandleResult::Ok;
        }
        if segment.has_text() {
            self.process_segment(&segment, events);
        }
        if segment.header.ctl.fin() {
            self.process_fin(events);
            self.set_state(State::TimeWait);
            self.rt_stop();
            self.start_time_wait_timeout();
        }
        HandleResult::Ok
    }

    // RFC 793 p74
    fn handle_close_wait(
        &mut self,
        segment: Segment,
        events: &mut dyn ConnectionEvents,
    ) -> HandleResult {
        if !self.check_seq(&segment) {
            return HandleResult::Ok;
        }
        if segment.header.ctl.rst() {
            events.disconnected(self, Disconnect::Reset);
            return HandleResult::Closed;
        }
        if segment.header.ctl.syn() {
            return self.unallowed_syn_reset(&segment, events);
        }
        if !self.check_ack(&segment) {
            return HandleResult::Ok;
        }
        // No text processing: the peer's FIN already ended its stream
        if segment.header.ctl.fin() {
            self.process_fin(events);
        }
        HandleResult::Ok
    }

    // RFC 793 p74
    fn handle_closing(
        &mut self,
        segment: Segment,
        events: &mut dyn ConnectionEvents,
    ) -> HandleResult {
        if !self.check_seq(&segment) {
            return HandleResult::Ok;
        }
        if segment.header.ctl.rst() {
            return HandleResult::Closed;
        }
        if segment.header.ctl.syn() {
            return self.unallowed_syn_reset(&segment, events);
        }
        if !self.check_ack(&segment) {
            return HandleResult::Closed;
        }
        if segment.header.ack == self.tcb.snd.nxt {
            // Our FIN is acknowledged
            self.set_state(State::TimeWait);
            self.start_time_wait_timeout();
        }
        // No text processing after the peer's FIN
        if segment.header.ctl.fin() {
            self.process_fin(events);
        }
        HandleResult::Ok
    }

    // RFC 793 p75. The only thing that can arrive here is an
    // acknowledgment of our FIN, but the RST, SYN, and ACK checks still
    // run first.
    fn handle_last_ack(
        &mut self,
        segment: Segment,
        events: &mut dyn ConnectionEvents,
    ) -> HandleResult {
        if !self.check_seq(&segment) {
            return HandleResult::Ok;
        }
        if segment.header.ctl.rst() {
            return HandleResult::Closed;
        }
        if segment.header.ctl.syn() {
            return self.unallowed_syn_reset(&segment, events);
        }
        if !self.check_ack(&segment) {
            return HandleResult::Closed;
        }
        if segment.header.ack == self.tcb.snd.nxt {
            // Our FIN is acknowledged; the connection is done
            return HandleResult::Closed;
        }
        if segment.header.ctl.fin() {
            self.process_fin(events);
        }
        HandleResult::Ok
    }

    // RFC 793 p75
    fn handle_time_wait(
        &mut self,
        segment: Segment,
        events: &mut dyn ConnectionEvents,
    ) -> HandleResult {
        if !self.check_seq(&segment) {
            return HandleResult::Ok;
        }
        if segment.header.ctl.rst() {
            return HandleResult::Closed;
        }
        if segment.header.ctl.syn() {
            return self.unallowed_syn_reset(&segment, events);
        }
        // Nothing is outstanding, so there is no ACK processing, and no
        // text may be delivered after the peer's FIN
        if segment.header.ctl.fin() {
            self.process_fin(events);
            // RFC 793 p73: a retransmitted FIN restarts the 2 MSL wait
            self.start_time_wait_timeout();
        }
        HandleResult::Ok
    }
}
