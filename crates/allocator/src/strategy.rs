//! Allocation strategy tag
//!
//! Modeled as a tagged variant rather than a trait object hierarchy: extend
//! by adding a variant and a match arm, not by subclassing.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    ScoreBased,
    RoundRobin,
    Sequential,
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::ScoreBased
    }
}
