//! Round-trip time estimation and the retransmission timeout.

use super::seq::seq_ge;
use std::time::Duration;

// Conservative initial RTT estimate.
const INITIAL_RTT: u32 = 300;
const INITIAL_DEVIATION: u32 = 100;

// Minimum safety margin for the RTO that kicks in when the variance gets
// very low.
const MIN_MARGIN: u32 = 5;

const MIN_RTO: u32 = 10;
const MAX_RTO: u32 = 10_000;

/// Smooths round-trip samples into a retransmission timeout using the
/// Jacobson/Karels estimator ("Congestion Avoidance and Control", 1988).
/// Time is whatever monotonic clock the connection is driven with; all
/// values are milliseconds.
#[derive(Debug, Clone, Copy)]
pub struct RttEstimator {
    rtt: u32,
    deviation: u32,
    /// When a timed segment went out and the sequence number that
    /// acknowledges it. Only one segment is timed at once.
    timed: Option<(Duration, u32)>,
    rto_count: u8,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self {
            rtt: INITIAL_RTT,
            deviation: INITIAL_DEVIATION,
            timed: None,
            rto_count: 0,
        }
    }
}

impl RttEstimator {
    /// The current retransmission timeout.
    pub fn rto(&self) -> Duration {
        let margin = MIN_MARGIN.max(self.deviation * 4);
        let ms = (self.rtt + margin).clamp(MIN_RTO, MAX_RTO);
        Duration::from_millis(ms as u64)
    }

    /// Whether a round-trip measurement is in flight.
    pub fn active(&self) -> bool {
        self.timed.is_some()
    }

    /// Abandons the in-flight measurement without taking a sample.
    pub fn stop(&mut self) {
        self.timed = None;
    }

    fn sample(&mut self, new_rtt: u32) {
        self.rtt = (self.rtt * 7 + new_rtt + 7) / 8;
        let diff = (self.rtt as i32 - new_rtt as i32).unsigned_abs();
        self.deviation = (self.deviation * 3 + diff + 3) / 4;
        self.rto_count = 0;
    }

    /// Notes a departing segment whose text ends at `seq_end`. Starts a
    /// measurement if none is in flight.
    pub fn on_send(&mut self, now: Duration, seq_end: u32) {
        if self.timed.is_none() {
            self.timed = Some((now, seq_end));
        }
    }

    /// Notes an arriving acknowledgment; takes a sample if it covers the
    /// timed segment.
    pub fn on_ack(&mut self, now: Duration, ack: u32) {
        if let Some((sent_at, seq_end)) = self.timed {
            if seq_ge(ack, seq_end) {
                self.sample(now.saturating_sub(sent_at).as_millis() as u32);
                self.timed = None;
            }
        }
    }

    /// Notes that the retransmission timer fired. A retransmitted segment
    /// must not be sampled (Karn's algorithm), and a run of timeouts with
    /// no successful sample forces the estimate upward so the estimator
    /// cannot get stuck below the true RTT.
    pub fn on_retransmit(&mut self) {
        self.timed = None;
        self.rto_count = self.rto_count.saturating_add(1);
        if self.rto_count >= 3 {
            self.rto_count = 0;
            self.rtt = MAX_RTO.min(self.rtt * 2);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_tighten_the_timeout() {
        let mut rtt = RttEstimator::default();
        let initial = rtt.rto();
        for round in 0..20u64 {
            let sent = Duration::from_secs(round);
            rtt.on_send(sent, 100 + round as u32);
            rtt.on_ack(sent + Duration::from_millis(20), 100 + round as u32);
        }
        assert!(rtt.rto() < initial);
    }

    #[test]
    fn repeated_timeouts_inflate_the_estimate() {
        let mut rtt = RttEstimator::default();
        let before = rtt.rto();
        for _ in 0..3 {
            rtt.on_retransmit();
        }
        assert!(rtt.rto() > before);
    }

    #[test]
    fn retransmission_discards_the_measurement() {
        let mut rtt = RttEstimator::default();
        rtt.on_send(Duration::ZERO, 100);
        assert!(rtt.active());
        rtt.on_retransmit();
        assert!(!rtt.active());
        // A late ACK for the retransmitted segment takes no sample
        let before = rtt.rto();
        rtt.on_ack(Duration::from_secs(9), 100);
        assert_eq!(rtt.rto(), before);
    }
}
