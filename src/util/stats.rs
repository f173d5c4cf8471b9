//! Throughput arithmetic
// (c) 2024 Ross Younger

use human_repr::HumanThroughput as _;
use std::{fmt::Display, time::Duration};

/// A transfer rate, which displays in human-friendly units (e.g. `12.3GB/s`)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataRate {
    /// `None` if no time elapsed, or we weren't told how long it took
    bytes_per_second: Option<f64>,
}

impl DataRate {
    /// Rate for `bytes` moved in `elapsed`
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new(bytes: u64, elapsed: Option<Duration>) -> Self {
        let bytes_per_second = elapsed
            .filter(|t| !t.is_zero())
            .map(|t| bytes as f64 / t.as_secs_f64());
        Self { bytes_per_second }
    }

    /// Bits per second
    #[must_use]
    pub fn bit_rate(&self) -> Option<f64> {
        self.bytes_per_second.map(|r| r * 8.)
    }

    /// Gigabits (10<sup>9</sup> bits) per second, the unit the benchmark reports in
    #[must_use]
    pub fn gbps(&self) -> Option<f64> {
        self.bit_rate().map(|r| r / 1e9)
    }
}

impl Display for DataRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.bytes_per_second {
            Some(rate) => rate.human_throughput_bytes().fmt(f),
            None => f.write_str("unknown"),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use super::DataRate;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[test]
    fn no_elapsed_time() {
        assert_eq!(DataRate::new(1234, None).to_string(), "unknown");
        let r = DataRate::new(1234, Some(Duration::ZERO));
        assert_eq!(r.to_string(), "unknown");
        assert!(r.gbps().is_none());
    }

    #[test]
    fn display() {
        let r = DataRate::new(10_000_000_000, Some(Duration::from_secs(500)));
        assert_eq!(r.to_string(), "20MB/s");
    }

    #[test]
    fn gigabits() {
        let r = DataRate::new(250_000_000, Some(Duration::from_millis(500)));
        let bits = r.bit_rate().unwrap();
        assert!((bits - 4e9).abs() < 1.0, "{bits}");
        let gbps = r.gbps().unwrap();
        assert!((gbps - 4.0).abs() < 1e-9, "{gbps}");
    }
}
