//! Round-Trip Time Estimation
//!
//! Clients timestamp pings with their own clock; the server echoes the
//! timestamp back untouched. No clock synchronization is assumed.

/// Weight of a new sample in the smoothed estimate.
const RTT_ALPHA: f64 = 0.125;

/// Exponentially smoothed round-trip time in seconds.
#[derive(Clone, Debug, Default)]
pub struct RttEstimator {
    smoothed: Option<f64>,
    samples: u64,
}

impl RttEstimator {
    /// Create an estimator with no samples.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a pong: `sent_at` is the echoed timestamp, `now` the local clock.
    ///
    /// Negative or non-finite samples (clock went backwards, garbage echo)
    /// are ignored.
    pub fn observe(&mut self, sent_at: f64, now: f64) {
        let sample = now - sent_at;
        if !(sample.is_finite() && sample >= 0.0) {
            return;
        }
        self.samples += 1;
        self.smoothed = Some(match self.smoothed {
            None => sample,
            Some(prev) => prev + RTT_ALPHA * (sample - prev),
        });
    }

    /// Current estimate, zero before the first sample.
    pub fn rtt(&self) -> f64 {
        self.smoothed.unwrap_or(0.0)
    }

    /// Number of samples accepted.
    pub fn samples(&self) -> u64 {
        self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_taken_as_is() {
        let mut rtt = RttEstimator::new();
        assert_eq!(rtt.rtt(), 0.0);
        rtt.observe(1.0, 1.2);
        assert!((rtt.rtt() - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_smoothing() {
        let mut rtt = RttEstimator::new();
        rtt.observe(0.0, 0.1);
        rtt.observe(0.0, 0.9);
        // 0.1 + 0.125 * 0.8
        assert!((rtt.rtt() - 0.2).abs() < 1e-12);
        assert_eq!(rtt.samples(), 2);
    }

    #[test]
    fn test_ignores_negative() {
        let mut rtt = RttEstimator::new();
        rtt.observe(5.0, 4.0);
        rtt.observe(f64::NAN, 4.0);
        assert_eq!(rtt.samples(), 0);
    }
}
