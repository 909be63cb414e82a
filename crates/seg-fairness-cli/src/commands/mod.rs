//! Subcommand implementations.

pub mod evaluate;
pub mod labels;
pub mod split;
pub mod summarize;

use anyhow::{Result, anyhow};
use seg_fairness::Anatomy;

/// Parse an anatomy argument.
pub fn parse_anatomy(s: &str) -> Result<Anatomy> {
    Anatomy::from_str_loose(s).ok_or_else(|| anyhow!("unknown anatomy '{s}' (expected knee or hip)"))
}
