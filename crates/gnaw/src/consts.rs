//! Tuning constants for the mutation pipeline.
//!
//! The values in here are part of the interchange contract between parallel
//! fuzzer instances: changing any of them invalidates shared corpora and
//! coverage fingerprints.

use static_assertions::const_assert;

/// Largest delta applied by the arithmetic stages, in either direction.
pub const ARITH_MAX: u32 = 35;

/// Hard cap on the size of any mutant handed to the harness.
pub const MAX_FILE: usize = 1024 * 1024;

/// Shortest auto-dictionary token worth keeping.
pub const MIN_AUTO_EXTRA: usize = 3;
/// Longest auto-dictionary token collected.
pub const MAX_AUTO_EXTRA: usize = 32;
/// How many auto tokens the deterministic overwrite stage walks.
pub const USE_AUTO_EXTRAS: usize = 50;
/// User dictionaries larger than this are subsampled per offset.
pub const MAX_DET_EXTRAS: usize = 200;

/// One effector entry covers `1 << EFF_MAP_SCALE2` input bytes.
pub const EFF_MAP_SCALE2: usize = 3;
/// Inputs shorter than this get a fully marked map without coverage checks.
pub const EFF_MIN_LEN: usize = 128;
/// Density (in percent) past which the whole map is flagged as effective.
pub const EFF_MAX_PERC: usize = 90;

/// Havoc budget baseline right after a deterministic pass.
pub const HAVOC_CYCLES_INIT: u64 = 1024;
/// Havoc budget baseline on revisits.
pub const HAVOC_CYCLES: u64 = 256;
/// Havoc budget baseline for each splice re-entry.
pub const SPLICE_HAVOC: u64 = 32;
/// Floor for the havoc budget, whatever the performance score says.
pub const HAVOC_MIN: u64 = 16;
/// Stacked mutation count is `2^(1 + UR(HAVOC_STACK_POW2))`.
pub const HAVOC_STACK_POW2: usize = 7;
/// Adaptive doubling stops once the score exceeds `HAVOC_MAX_MULT * 100`.
pub const HAVOC_MAX_MULT: u32 = 16;

pub const HAVOC_BLK_SMALL: usize = 32;
pub const HAVOC_BLK_MEDIUM: usize = 128;
pub const HAVOC_BLK_LARGE: usize = 1500;
pub const HAVOC_BLK_XL: usize = 32768;

/// Splice attempts per invocation before giving up on the seed.
pub const SPLICE_CYCLES: u32 = 15;

/// Skip probability (percent) for fuzzed/non-favored seeds while favored
/// ones are pending.
pub const SKIP_TO_NEW_PROB: usize = 99;
/// Skip probability for non-favored seeds that were already fuzzed.
pub const SKIP_NFAV_OLD_PROB: usize = 95;
/// Skip probability for non-favored, never-fuzzed seeds past cycle one.
pub const SKIP_NFAV_NEW_PROB: usize = 75;

/// Calibration retries before a seed is written off.
pub const CAL_CHANCES: u8 = 3;

/// Boundary values overwritten by the 8-bit interesting-value stage.
pub const INTERESTING_8: [i8; 9] = [-128, -1, 0, 1, 16, 32, 64, 100, 127];

/// 16-bit table; prefixed with the 8-bit values so the redundancy oracle can
/// reason about narrower overwrites with a single lookup.
pub const INTERESTING_16: [i16; 19] = [
    -128, -1, 0, 1, 16, 32, 64, 100, 127, // one-byte values
    -32768, -129, 128, 255, 256, 512, 1000, 1024, 4096, 32767,
];

/// 32-bit table, again prefixed with the narrower values.
pub const INTERESTING_32: [i32; 27] = [
    -128, -1, 0, 1, 16, 32, 64, 100, 127, // one-byte values
    -32768, -129, 128, 255, 256, 512, 1000, 1024, 4096, 32767, // two-byte values
    -2147483648, -100663046, -32769, 32768, 65535, 65536, 100663045, 2147483647,
];

const_assert!(MIN_AUTO_EXTRA <= MAX_AUTO_EXTRA);
const_assert!(EFF_MAX_PERC < 100);
const_assert!(HAVOC_BLK_SMALL <= HAVOC_BLK_MEDIUM);
const_assert!(HAVOC_BLK_MEDIUM <= HAVOC_BLK_LARGE);
const_assert!(HAVOC_BLK_LARGE <= HAVOC_BLK_XL);
const_assert!(HAVOC_BLK_XL < MAX_FILE);
const_assert!(HAVOC_STACK_POW2 < usize::BITS as usize);
