//! Processor configuration.

use crate::error::ProcessorError;
use conveyor_core::StartPositions;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// How aggressively a processor claims partitions each balancing round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadBalancingStrategy {
    /// Claim at most one partition per round. Convergence is slower but
    /// many consumers starting at once thrash far less.
    Balanced,
    /// Claim enough partitions in a single round to reach the fair share.
    /// Faster convergence, more churn.
    Greedy,
}

impl Default for LoadBalancingStrategy {
    fn default() -> Self {
        LoadBalancingStrategy::Balanced
    }
}

impl FromStr for LoadBalancingStrategy {
    type Err = ProcessorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "balanced" => Ok(LoadBalancingStrategy::Balanced),
            "greedy" => Ok(LoadBalancingStrategy::Greedy),
            other => Err(ProcessorError::UnknownStrategy(other.to_string())),
        }
    }
}

impl std::fmt::Display for LoadBalancingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadBalancingStrategy::Balanced => write!(f, "balanced"),
            LoadBalancingStrategy::Greedy => write!(f, "greedy"),
        }
    }
}

/// Options controlling a [`crate::Processor`].
#[derive(Debug, Clone)]
pub struct ProcessorOptions {
    /// Claim selection strategy (default: balanced).
    pub strategy: LoadBalancingStrategy,

    /// Base interval between balancing rounds (default: 10s). The actual
    /// sleep is jittered by a uniform factor in `[0.8, 1.3)` so that
    /// consumers started together do not stay in lockstep.
    pub update_interval: Duration,

    /// How long an ownership record stays current without being rewritten
    /// (default: 60s). Past this, the partition is up for grabs.
    pub partition_expiration: Duration,

    /// Start positions used for partitions with no checkpoint.
    pub start_positions: StartPositions,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            strategy: LoadBalancingStrategy::default(),
            update_interval: Duration::from_secs(10),
            partition_expiration: Duration::from_secs(60),
            start_positions: StartPositions::default(),
        }
    }
}

impl ProcessorOptions {
    pub fn with_strategy(mut self, strategy: LoadBalancingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    pub fn with_partition_expiration(mut self, expiration: Duration) -> Self {
        self.partition_expiration = expiration;
        self
    }

    pub fn with_start_positions(mut self, start_positions: StartPositions) -> Self {
        self.start_positions = start_positions;
        self
    }
}
