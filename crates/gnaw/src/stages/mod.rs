//! The staged mutation pipeline.

use derive_more::Display;
use serde::Serialize;

use crate::effector::EffectorMap;

pub mod arith;
pub mod bitflip;
pub mod extras;
pub mod havoc;
pub mod interest;
pub mod splice;

/// Control flow between stages. Stages return `Continue` to let the next one
/// run; anything else short-circuits straight to the pass teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Give up on the current seed.
    Abandon,
    /// Global stop requested; give up on the whole campaign.
    Stop,
}

/// Stage identity, used for accounting and for the status display.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StageId {
    #[display("bitflip 1/1")]
    Flip1,
    #[display("bitflip 2/1")]
    Flip2,
    #[display("bitflip 4/1")]
    Flip4,
    #[display("bitflip 8/8")]
    Flip8,
    #[display("bitflip 16/8")]
    Flip16,
    #[display("bitflip 32/8")]
    Flip32,
    #[display("arith 8/8")]
    Arith8,
    #[display("arith 16/8")]
    Arith16,
    #[display("arith 32/8")]
    Arith32,
    #[display("interest 8/8")]
    Interest8,
    #[display("interest 16/8")]
    Interest16,
    #[display("interest 32/8")]
    Interest32,
    #[display("user extras (over)")]
    ExtrasUserOver,
    #[display("user extras (insert)")]
    ExtrasUserInsert,
    #[display("auto extras (over)")]
    ExtrasAutoOver,
    #[display("havoc")]
    Havoc,
    #[display("splice")]
    Splice,
}

impl StageId {
    pub const COUNT: usize = 17;
}

/// Value currently being applied, for the display layer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum StageValue {
    #[default]
    None,
    /// Little-endian arithmetic or table value.
    Le(i64),
    /// Big-endian arithmetic or table value.
    Be(i64),
    /// Stacked mutation count of the current havoc round.
    Stacking(u32),
}

/// Live position of the pass, read by an external status display.
#[derive(Debug, Default, Clone)]
pub struct Progress {
    pub stage: Option<StageId>,
    pub cur: u64,
    pub max: u64,
    pub cur_byte: Option<usize>,
    pub cur_val: StageValue,
}

/// Per-stage find/cycle accounting plus pass-level tallies.
///
/// `cycles` counts candidates *considered*: skipped candidates decrement the
/// stage budget before it is recorded, so finds-per-cycle stays an honest
/// efficiency measure.
#[derive(Debug, Default, Serialize)]
pub struct StageStats {
    finds: [u64; StageId::COUNT],
    cycles: [u64; StageId::COUNT],
    pub cur_skipped_paths: u64,
    pub blocks_eff_select: u64,
    pub blocks_eff_total: u64,
    #[serde(skip)]
    pub progress: Progress,
}

impl StageStats {
    pub fn begin_stage(&mut self, stage: StageId, max: u64) {
        self.progress = Progress {
            stage: Some(stage),
            max,
            ..Progress::default()
        };
    }

    pub fn finish_stage(&mut self, stage: StageId, finds: u64, cycles: u64) {
        self.finds[stage as usize] += finds;
        self.cycles[stage as usize] += cycles;
    }

    pub fn finds(&self, stage: StageId) -> u64 {
        self.finds[stage as usize]
    }

    pub fn cycles(&self, stage: StageId) -> u64 {
        self.cycles[stage as usize]
    }
}

/// Buffers owned by one mutation pass.
///
/// `input` is the reference the working buffer is restored to; it starts as
/// the (possibly trimmed) seed copy and is replaced by the hybrid after a
/// successful splice. `base` never changes once trimming is done, so splice
/// attempts always start from the real seed.
#[derive(Debug)]
pub(crate) struct PassState {
    pub base: Vec<u8>,
    pub input: Vec<u8>,
    pub out: Vec<u8>,
    pub eff: EffectorMap,
}

impl PassState {
    pub fn new(input: Vec<u8>) -> Self {
        let eff = EffectorMap::new(input.len());
        Self {
            base: input.clone(),
            out: input.clone(),
            input,
            eff,
        }
    }

    pub fn len(&self) -> usize {
        self.input.len()
    }

    /// Restores the working buffer to the current reference input.
    pub fn restore(&mut self) {
        self.out.clear();
        self.out.extend_from_slice(&self.input);
    }

    /// Adopts a spliced hybrid as the new reference input.
    pub fn adopt(&mut self, hybrid: Vec<u8>) {
        self.input = hybrid;
        self.restore();
    }
}
