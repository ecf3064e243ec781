//! Shard failure accounting
//!
//! Single parity tolerates exactly one missing shard. The first failing
//! shard is excluded and reconstructed from the other five; a second,
//! different shard failing while the first is still out is fatal. A shard
//! excluded voluntarily (because it was slow, not broken) can be swapped
//! back in when another one fails.

use crate::error::{CloudRaidError, Result};
use crate::RAID_PARTS;
use tracing::{error, warn};

/// Result of reporting a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Re-issue the request on the same connection.
    Retry,
    /// The shard is excluded; carry on with the other five.
    Demoted { excluded: usize },
    /// The failing shard replaced a voluntarily excluded one.
    Swapped { excluded: usize, restored: usize },
}

/// What the engine has to do about a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry,
    Demote(usize),
    Swap { demote: usize, restore: usize },
}

/// Per-shard error counters and the current exclusion.
#[derive(Debug, Clone)]
pub struct FailureTracker {
    errors: [u32; RAID_PARTS],
    excluded: Option<usize>,
    voluntary: bool,
    retry_budget: u32,
}

impl FailureTracker {
    pub fn new(retry_budget: u32) -> Self {
        Self {
            errors: [0; RAID_PARTS],
            excluded: None,
            voluntary: false,
            retry_budget,
        }
    }

    /// Count a failure on `shard` and decide how to continue.
    pub fn record_failure(&mut self, shard: usize, striped: bool) -> Result<Decision> {
        self.errors[shard] += 1;
        let failures = self.errors[shard];
        warn!(shard, failures, "Shard request failed");

        if failures >= self.retry_budget {
            error!(shard, failures, "Shard retry budget exhausted");
            return Err(CloudRaidError::ShardFetchFailure { shard, failures });
        }

        if !striped {
            return Ok(Decision::Retry);
        }

        match self.excluded {
            None => Ok(Decision::Demote(shard)),
            Some(excluded) if excluded == shard => {
                self.voluntary = false;
                Ok(Decision::Demote(shard))
            }
            Some(excluded) if self.voluntary => Ok(Decision::Swap {
                demote: shard,
                restore: excluded,
            }),
            Some(excluded) => {
                error!(excluded, failed = shard, "Second shard lost, parity cannot cover both");
                Err(CloudRaidError::DoubleLoss {
                    excluded,
                    failed: shard,
                })
            }
        }
    }

    /// A request on `shard` succeeded.
    pub fn record_success(&mut self, shard: usize) {
        self.errors[shard] = 0;
    }

    pub fn errors(&self, shard: usize) -> u32 {
        self.errors[shard]
    }

    pub fn excluded(&self) -> Option<usize> {
        self.excluded
    }

    /// Exclude `shard`. Only a voluntary exclusion can later be swapped
    /// for a failing shard.
    pub fn exclude(&mut self, shard: usize, voluntary: bool) {
        self.excluded = Some(shard);
        self.voluntary = voluntary;
    }

    /// Whether the current exclusion was chosen rather than forced.
    pub fn is_voluntary(&self) -> bool {
        self.excluded.is_some() && self.voluntary
    }

    pub fn clear_exclusion(&mut self) -> Option<usize> {
        self.voluntary = false;
        self.excluded.take()
    }
}
