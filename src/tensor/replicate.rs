//! Replicate resolution policy and the seeded selector used by it.

use crate::error::{Result, TensorError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How samples sharing a (subject, state) key are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicateHandling {
    /// Fail with a `Replicate` error.
    Error,
    /// Replace the group by the element-wise sum of its counts.
    #[default]
    Sum,
    /// Keep one sample chosen by a seeded generator.
    Random,
}

impl ReplicateHandling {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicateHandling::Error => "error",
            ReplicateHandling::Sum => "sum",
            ReplicateHandling::Random => "random",
        }
    }
}

impl fmt::Display for ReplicateHandling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReplicateHandling {
    type Err = TensorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "error" => Ok(ReplicateHandling::Error),
            "sum" => Ok(ReplicateHandling::Sum),
            "random" => Ok(ReplicateHandling::Random),
            other => Err(TensorError::Config(format!(
                "Unknown replicate handling '{}'; expected error, sum or random",
                other
            ))),
        }
    }
}

/// Deterministic xorshift64 generator.
#[derive(Debug, Clone)]
pub(crate) struct SimpleRng {
    state: u64,
}

impl SimpleRng {
    pub(crate) fn new(seed: u64) -> Self {
        // xorshift never leaves the all-zero state
        Self { state: seed.max(1) }
    }

    pub(crate) fn next_u64(&mut self) -> u64 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state
    }

    /// Index in `0..n`. `n` must be positive.
    pub(crate) fn choose(&mut self, n: usize) -> usize {
        (self.next_u64() % n as u64) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_policies() {
        assert_eq!("sum".parse::<ReplicateHandling>().unwrap(), ReplicateHandling::Sum);
        assert_eq!(" Random ".parse::<ReplicateHandling>().unwrap(), ReplicateHandling::Random);
        assert_eq!("error".parse::<ReplicateHandling>().unwrap(), ReplicateHandling::Error);
        let err = "mean".parse::<ReplicateHandling>().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
        assert_eq!(ReplicateHandling::default().to_string(), "sum");
    }

    #[test]
    fn test_rng_is_reproducible() {
        let mut a = SimpleRng::new(42);
        let mut b = SimpleRng::new(42);
        let xs: Vec<usize> = (0..10).map(|_| a.choose(5)).collect();
        let ys: Vec<usize> = (0..10).map(|_| b.choose(5)).collect();
        assert_eq!(xs, ys);
        assert!(xs.iter().all(|&x| x < 5));

        let mut zero = SimpleRng::new(0);
        assert_ne!(zero.next_u64(), 0);
    }
}
