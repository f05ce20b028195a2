//! Simulation configuration, the timer, and run bookkeeping types.

use crate::fixed::{Quantity, Tick};
use crate::recorder::RecorderConfig;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Run parameters supplied once at initialization. Immutable for the run.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SimConfig {
    /// First tick simulated.
    pub start: Tick,
    /// Number of ticks to run.
    pub duration: u64,
    /// Reserved for resource-decay modeling. Stored and reported only.
    #[serde(default)]
    pub decay: f64,
    #[serde(default)]
    pub recorder: RecorderConfig,
}

impl SimConfig {
    pub fn new(start: Tick, duration: u64, decay: f64) -> Self {
        Self {
            start,
            duration,
            decay,
            recorder: RecorderConfig::default(),
        }
    }

    pub fn with_recorder(mut self, recorder: RecorderConfig) -> Self {
        self.recorder = recorder;
        self
    }

    /// First tick past the end of the run.
    pub fn end(&self) -> Tick {
        self.start.saturating_add(self.duration.min(i64::MAX as u64) as Tick)
    }
}

// ---------------------------------------------------------------------------
// Timer
// ---------------------------------------------------------------------------

/// The simulation clock.
#[derive(Debug, Clone)]
pub struct Timer {
    start: Tick,
    end: Tick,
    current: Tick,
    started: bool,
    stop_requested: bool,
}

impl Timer {
    pub fn new(config: &SimConfig) -> Self {
        Self {
            start: config.start,
            end: config.end(),
            current: config.start,
            started: false,
            stop_requested: false,
        }
    }

    /// The tick currently being (or about to be) simulated.
    pub fn current(&self) -> Tick {
        self.current
    }

    pub fn start(&self) -> Tick {
        self.start
    }

    pub fn end(&self) -> Tick {
        self.end
    }

    /// Ticks completed so far.
    pub fn elapsed(&self) -> u64 {
        (self.current - self.start) as u64
    }

    pub fn has_started(&self) -> bool {
        self.started
    }

    pub(crate) fn mark_started(&mut self) {
        self.started = true;
    }

    pub fn is_finished(&self) -> bool {
        self.current >= self.end
    }

    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    pub(crate) fn advance(&mut self) {
        self.current += 1;
    }
}

// ---------------------------------------------------------------------------
// Run summary
// ---------------------------------------------------------------------------

/// Outcome of [`Context::run`](crate::context::Context::run).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub start: Tick,
    /// First tick not simulated.
    pub end: Tick,
    pub ticks_run: u64,
    pub transactions: u64,
    pub deployments: u64,
    pub decommissions: u64,
    /// Digest of every deployment and transaction, in order.
    pub history_hash: u64,
    /// True when the recorder lost at least one record.
    pub history_incomplete: bool,
    pub stopped_early: bool,
}

// ---------------------------------------------------------------------------
// State hash
// ---------------------------------------------------------------------------

/// A deterministic running hash for reproducibility checks.
///
/// Uses FNV-1a (64-bit) for speed and simplicity. Not cryptographic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateHash(pub u64);

impl StateHash {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    pub fn new() -> Self {
        Self(Self::FNV_OFFSET)
    }

    pub fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= b as u64;
            self.0 = self.0.wrapping_mul(Self::FNV_PRIME);
        }
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.write(&v.to_le_bytes());
    }

    /// Length-prefixed, so `("ab", "c")` and `("a", "bc")` differ.
    pub fn write_str(&mut self, s: &str) {
        self.write_u64(s.len() as u64);
        self.write(s.as_bytes());
    }

    pub fn write_quantity(&mut self, v: Quantity) {
        self.write(&v.to_bits().to_le_bytes());
    }

    pub fn finish(self) -> u64 {
        self.0
    }
}

impl Default for StateHash {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::qty;

    #[test]
    fn end_is_start_plus_duration() {
        assert_eq!(SimConfig::new(0, 25, 0.0).end(), 25);
        assert_eq!(SimConfig::new(10, 5, 0.0).end(), 15);
    }

    #[test]
    fn end_saturates() {
        assert_eq!(SimConfig::new(i64::MAX - 1, u64::MAX, 0.0).end(), i64::MAX);
    }

    #[test]
    fn timer_counts_ticks() {
        let mut timer = Timer::new(&SimConfig::new(3, 2, 0.0));
        assert_eq!(timer.current(), 3);
        assert!(!timer.is_finished());
        timer.advance();
        assert_eq!(timer.elapsed(), 1);
        timer.advance();
        assert!(timer.is_finished());
        assert_eq!(timer.current(), 5);
    }

    #[test]
    fn zero_duration_is_finished_immediately() {
        assert!(Timer::new(&SimConfig::new(0, 0, 0.0)).is_finished());
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: SimConfig = ron::from_str("(start: 0, duration: 25)").unwrap();
        assert_eq!(config, SimConfig::new(0, 25, 0.0));
    }

    #[test]
    fn state_hash_deterministic() {
        let mut h1 = StateHash::new();
        h1.write_str("dairy farm 1");
        h1.write_quantity(qty(50.0));

        let mut h2 = StateHash::new();
        h2.write_str("dairy farm 1");
        h2.write_quantity(qty(50.0));

        assert_eq!(h1.finish(), h2.finish());
    }

    #[test]
    fn state_hash_string_boundaries_matter() {
        let mut h1 = StateHash::new();
        h1.write_str("ab");
        h1.write_str("c");

        let mut h2 = StateHash::new();
        h2.write_str("a");
        h2.write_str("bc");

        assert_ne!(h1.finish(), h2.finish());
    }

    #[test]
    fn state_hash_order_matters() {
        let mut h1 = StateHash::new();
        h1.write_i64(1);
        h1.write_i64(2);

        let mut h2 = StateHash::new();
        h2.write_i64(2);
        h2.write_i64(1);

        assert_ne!(h1.finish(), h2.finish());
    }
}
