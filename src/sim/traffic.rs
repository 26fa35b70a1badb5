use serde::Deserialize;

use crate::request::ReqKind;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrafficConfig {
    /// "sequential", "strided", or "random".
    pub pattern: String,
    pub requests: u64,
    pub stride: u64,
    /// Addresses wrap within this many bytes.
    pub footprint: u64,
    /// Fraction of requests issued as writes.
    pub write_ratio: f64,
    pub seed: u64,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            pattern: "sequential".to_string(),
            requests: 10000,
            stride: 64,
            footprint: 4 << 20,
            write_ratio: 0.25,
            seed: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pattern {
    Sequential,
    Strided,
    Random,
}

/// Synthetic address stream for the demo driver.
pub struct TrafficGen {
    pattern: Pattern,
    requests: u64,
    stride: u64,
    footprint: u64,
    write_ratio: f64,
    seed: u64,
    issued: u64,
}

impl TrafficGen {
    pub fn new(cfg: &TrafficConfig) -> Self {
        let pattern = match cfg.pattern.as_str() {
            "sequential" => Pattern::Sequential,
            "strided" => Pattern::Strided,
            "random" => Pattern::Random,
            other => panic!("unknown traffic pattern {:?}", other),
        };
        assert!(cfg.footprint > 0, "traffic footprint must be nonzero");
        Self {
            pattern,
            requests: cfg.requests,
            stride: cfg.stride.max(1),
            footprint: cfg.footprint,
            write_ratio: cfg.write_ratio.clamp(0.0, 1.0),
            seed: cfg.seed,
            issued: 0,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.requests - self.issued
    }

    pub fn next_access(&mut self) -> Option<(u64, ReqKind)> {
        if self.issued >= self.requests {
            return None;
        }
        let n = self.issued;
        self.issued += 1;

        let addr = match self.pattern {
            Pattern::Sequential => (n * 64) % self.footprint,
            Pattern::Strided => (n * self.stride) % self.footprint,
            Pattern::Random => hash_u64(n ^ self.seed) % self.footprint,
        };
        let kind = if decide(self.write_ratio, n ^ self.seed.rotate_left(17)) {
            ReqKind::Write
        } else {
            ReqKind::Read
        };
        Some((addr, kind))
    }
}

fn decide(rate: f64, key: u64) -> bool {
    if rate <= 0.0 {
        return false;
    }
    if rate >= 1.0 {
        return true;
    }
    let threshold = (rate * (u64::MAX as f64)) as u64;
    hash_u64(key) <= threshold
}

fn hash_u64(mut x: u64) -> u64 {
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51afd7ed558ccd);
    x ^= x >> 33;
    x = x.wrapping_mul(0xc4ceb9fe1a85ec53);
    x ^= x >> 33;
    x
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_walks_block_by_block() {
        let mut stream = TrafficGen::new(&TrafficConfig {
            pattern: "sequential".to_string(),
            requests: 4,
            write_ratio: 0.0,
            ..TrafficConfig::default()
        });
        let addrs: Vec<u64> = std::iter::from_fn(|| stream.next_access()).map(|(a, _)| a).collect();
        assert_eq!(addrs, vec![0, 64, 128, 192]);
        assert_eq!(stream.remaining(), 0);
    }

    #[test]
    fn random_stays_inside_the_footprint() {
        let mut stream = TrafficGen::new(&TrafficConfig {
            pattern: "random".to_string(),
            requests: 1000,
            footprint: 1 << 16,
            ..TrafficConfig::default()
        });
        while let Some((addr, _)) = stream.next_access() {
            assert!(addr < 1 << 16);
        }
    }

    #[test]
    fn write_ratio_extremes() {
        let mut stream = TrafficGen::new(&TrafficConfig {
            requests: 100,
            write_ratio: 1.0,
            ..TrafficConfig::default()
        });
        while let Some((_, kind)) = stream.next_access() {
            assert_eq!(kind, ReqKind::Write);
        }
    }

    #[test]
    #[should_panic(expected = "unknown traffic pattern")]
    fn bad_pattern_is_fatal() {
        TrafficGen::new(&TrafficConfig {
            pattern: "zigzag".to_string(),
            ..TrafficConfig::default()
        });
    }
}
