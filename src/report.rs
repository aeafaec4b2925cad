use crate::messages::{HopResp, PingResult, Target};
use crate::stats::Stats;

/// Receives finished results from the engine. Implementations only observe.
pub trait Reporter: Send + Sync {
    fn ping_result(&self, _result: &PingResult) {}

    fn ping_summary(&self, _target: &Target, _stats: &Stats) {}

    fn hop(&self, _hop: &HopResp) {}
}

/// Discards everything.
pub struct NullReporter;

impl Reporter for NullReporter {}
