//! Session-wide knobs, resolved by the driver before fuzzing starts.

use crate::{consts::MAX_FILE, seed::ExecOutcome};

/// Work partition for cooperating instances: a seed is in deterministic
/// scope only when `exec_cksum % total == id - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterSlot {
    pub id: u32,
    pub total: u32,
}

#[derive(Debug, Clone)]
pub struct FuzzConfig {
    /// Run without instrumentation feedback: no coverage hashing, no
    /// effector pruning, no auto-dictionary.
    pub dumb_mode: bool,
    /// Jump straight to havoc on every seed.
    pub skip_deterministic: bool,
    /// Leave out the arithmetic stages and the wide interesting-value
    /// stages.
    pub no_arith: bool,
    /// Only fuzz seeds from the initial corpus, ignoring later arrivals.
    pub ignore_finds: bool,
    /// Calibration outcome expected of a healthy seed. `Crash` during
    /// crash-exploration sessions.
    pub crash_mode: ExecOutcome,
    /// Global throttle dividing every havoc budget.
    pub havoc_div: u32,
    /// Deterministic work partition among parallel instances.
    pub master: Option<MasterSlot>,
    /// Hard cap on mutant size.
    pub max_file: usize,
}

impl Default for FuzzConfig {
    fn default() -> Self {
        Self {
            dumb_mode: false,
            skip_deterministic: false,
            no_arith: false,
            ignore_finds: false,
            crash_mode: ExecOutcome::Ok,
            havoc_div: 1,
            master: None,
            max_file: MAX_FILE,
        }
    }
}

impl FuzzConfig {
    /// Whether this instance owns the deterministic stages for a seed with
    /// the given coverage fingerprint.
    pub fn owns_deterministic(&self, exec_cksum: u32) -> bool {
        self.master
            .is_none_or(|slot| exec_cksum % slot.total == slot.id - 1)
    }
}
