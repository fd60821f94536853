//! Per-outcome packet counters with periodic reporting

use std::time::{Duration, Instant};

use tracing::info;

/// What the interceptor did with one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Did not decode as IP/TCP/Modbus
    Unparsed,
    /// Decoded but the policy did not match (includes empty segments)
    Passed,
    /// Register rewritten and reinjected
    Mutated,
    /// Matched but the mutation path failed; forwarded unmodified
    Failed,
    /// Observe mode, forwarded unmodified
    Observed,
}

#[derive(Debug)]
pub struct CaptureStats {
    pub packets: usize,
    pub bytes: usize,
    pub unparsed: usize,
    pub passed: usize,
    pub mutated: usize,
    pub failed: usize,
    pub observed: usize,
    /// Queue receive/verdict errors
    pub errors: usize,
    interval: Duration,
    start_time: Instant,
    last_packets: usize,
    last_bytes: usize,
    last_print: Instant,
}

impl Default for CaptureStats {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl CaptureStats {
    pub fn new(interval: Duration) -> Self {
        Self {
            packets: 0,
            bytes: 0,
            unparsed: 0,
            passed: 0,
            mutated: 0,
            failed: 0,
            observed: 0,
            errors: 0,
            interval,
            start_time: Instant::now(),
            last_packets: 0,
            last_bytes: 0,
            last_print: Instant::now(),
        }
    }

    pub fn record(&mut self, len: usize, outcome: Outcome) {
        self.packets += 1;
        self.bytes += len;
        match outcome {
            Outcome::Unparsed => self.unparsed += 1,
            Outcome::Passed => self.passed += 1,
            Outcome::Mutated => self.mutated += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Observed => self.observed += 1,
        }
    }

    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    pub fn maybe_log_interval(&mut self) {
        if self.interval.is_zero() || self.last_print.elapsed() < self.interval {
            return;
        }
        let secs = self.interval.as_secs().max(1) as usize;
        let pps = (self.packets - self.last_packets) / secs;
        let bps = (self.bytes - self.last_bytes) / secs;

        info!(
            "[STATS] Packets: {} (+{}/s) | Bytes: {:.2}KB (+{}B/s) | Mutated: {} | Unparsed: {} | Failed: {} | Errors: {}",
            self.packets,
            pps,
            self.bytes as f64 / 1_000.0,
            bps,
            self.mutated,
            self.unparsed,
            self.failed,
            self.errors
        );

        self.last_packets = self.packets;
        self.last_bytes = self.bytes;
        self.last_print = Instant::now();
    }

    pub fn log_final(&self) {
        let elapsed = self.start_time.elapsed();
        info!(
            "Capture summary: {:.2?} | packets={} bytes={} mutated={} passed={} unparsed={} failed={} observed={} errors={}",
            elapsed,
            self.packets,
            self.bytes,
            self.mutated,
            self.passed,
            self.unparsed,
            self.failed,
            self.observed,
            self.errors
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_outcomes() {
        let mut stats = CaptureStats::new(Duration::ZERO);
        stats.record(60, Outcome::Mutated);
        stats.record(40, Outcome::Passed);
        stats.record(3, Outcome::Unparsed);
        stats.record_error();

        assert_eq!(stats.packets, 3);
        assert_eq!(stats.bytes, 103);
        assert_eq!(stats.mutated, 1);
        assert_eq!(stats.passed, 1);
        assert_eq!(stats.unparsed, 1);
        assert_eq!(stats.errors, 1);

        // zero interval disables periodic output
        stats.maybe_log_interval();
        assert_eq!(stats.last_packets, 0);
    }
}
