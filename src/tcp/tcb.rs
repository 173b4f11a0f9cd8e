//! The transmission control block: the per-connection protocol variables of
//! RFC 793 s3.2.

/// Tunable per-connection parameters, applied when the TCB is initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpConfig {
    /// The receive window advertised to the peer, and the amount of
    /// incoming data the connection will accept ahead of the application
    pub recv_window: u16,
    /// The maximum segment size offered in the MSS option on SYN segments
    /// and used to segmentize outgoing data
    pub mss: u16,
    /// How many bytes of unsent user data the write queue will hold before
    /// sends are refused
    pub send_buffer: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            recv_window: 4096,
            mss: 1460,
            send_buffer: 64 * 1024,
        }
    }
}

//      1         2          3          4
// ----------|----------|----------|----------
//        SND.UNA    SND.NXT    SND.UNA
//                             +SND.WND
//
// 1 - old sequence numbers which have been acknowledged
// 2 - sequence numbers of unacknowledged data
// 3 - sequence numbers allowed for new data transmission (send window)
// 4 - future sequence numbers which are not yet allowed
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Default)]
pub struct SendSequenceSpace {
    /// Oldest unacknowledged sequence number
    pub una: u32,
    /// Next sequence number to be sent
    pub nxt: u32,
    /// The size of the remote TCP's window
    pub wnd: u16,
    /// Segment sequence number used for last window update
    pub wl1: u32,
    /// Segment acknowledgment number used for last window update
    pub wl2: u32,
    /// Initial send sequence number
    pub iss: u32,
    /// Congestion window. Tracked for the duplicate-ACK machinery but
    /// advisory: the transmit path is governed by SND.WND alone.
    pub cwnd: u32,
}

//     1          2          3
// ----------|----------|----------
//        RCV.NXT    RCV.NXT
//                  +RCV.WND
//
// 1 - old sequence numbers which have been acknowledged
// 2 - sequence numbers allowed for new reception
// 3 - future sequence numbers which are not yet allowed
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Default)]
pub struct ReceiveSequenceSpace {
    /// Initial receive sequence number
    pub irs: u32,
    /// Next sequence number expected on an incoming segment; the left edge
    /// of the receive window
    pub nxt: u32,
    /// The number of bytes we are prepared to accept
    pub wnd: u16,
}

/// The transmission control block.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct Tcb {
    pub snd: SendSequenceSpace,
    pub rcv: ReceiveSequenceSpace,
    /// The effective send MSS: our configured value, lowered by whatever
    /// the peer offered in its MSS option
    pub mss: u16,
}

impl Tcb {
    /// Seeds the TCB for a fresh connection attempt: `SND.UNA` and
    /// `SND.NXT` start at the initial send sequence number and the receive
    /// window comes from configuration.
    pub fn init(&mut self, iss: u32, config: &TcpConfig) {
        self.snd.iss = iss;
        self.snd.una = iss;
        self.snd.nxt = iss;
        self.rcv.wnd = config.recv_window;
        self.mss = config.mss;
        // RFC 5681 s3.1 initial window
        self.snd.cwnd = (4 * config.mss as u32).min((2 * config.mss as u32).max(4380));
    }

    /// Lowers the effective send MSS to what the peer advertised.
    pub fn learn_mss(&mut self, peer_mss: Option<u16>) {
        if let Some(peer_mss) = peer_mss {
            self.mss = self.mss.min(peer_mss);
        }
    }
}
