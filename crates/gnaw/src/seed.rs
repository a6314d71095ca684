//! Corpus entries as the mutation engine sees them.

use std::{
    fs::{self, File},
    io,
    ops::Deref,
    path::PathBuf,
};

use bitflags::bitflags;
use memmap2::Mmap;

bitflags! {
    /// Lifecycle flags the queue manager tracks per seed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SeedFlags: u8 {
        /// At least one full mutation pass has run on this seed.
        const WAS_FUZZED = 1 << 0;
        /// Deterministic stages completed in this or an earlier session.
        const PASSED_DET = 1 << 1;
        /// Chosen by the queue manager as representative of its coverage.
        const FAVORED = 1 << 2;
        /// Trimming ran (successfully or not); never retried.
        const TRIM_DONE = 1 << 3;
    }
}

/// Outcome classes of one calibrated execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecOutcome {
    #[default]
    Ok,
    Timeout,
    Crash,
}

#[derive(Debug)]
enum SeedBacking {
    File(PathBuf),
    Memory(Vec<u8>),
}

/// One queue entry. The byte content is immutable for the duration of a
/// mutation pass; all lifecycle bookkeeping lives in the metadata fields.
#[derive(Debug)]
pub struct Seed {
    backing: SeedBacking,
    len: usize,
    pub flags: SeedFlags,
    /// Distance from the initial corpus in the discovery tree.
    pub depth: u32,
    /// Coverage fingerprint from the last clean execution.
    pub exec_cksum: u32,
    /// Failed calibration attempts so far; zero means calibrated.
    pub cal_failed: u8,
}

impl Seed {
    /// A seed backed by an on-disk test case. The bytes are mapped lazily,
    /// once per mutation pass.
    pub fn from_file(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let len = fs::metadata(&path)?.len() as usize;
        Ok(Self {
            backing: SeedBacking::File(path),
            len,
            flags: SeedFlags::empty(),
            depth: 0,
            exec_cksum: 0,
            cal_failed: 0,
        })
    }

    /// A seed held in memory, mainly for harness-less testing.
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        Self {
            len: data.len(),
            backing: SeedBacking::Memory(data),
            flags: SeedFlags::empty(),
            depth: 0,
            exec_cksum: 0,
            cal_failed: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Records the post-trim length.
    pub fn set_len(&mut self, len: usize) {
        self.len = len;
    }

    /// Read-only view of the seed's bytes.
    pub fn bytes(&self) -> io::Result<SeedView> {
        match &self.backing {
            SeedBacking::File(path) => {
                let file = File::open(path)?;
                // SAFETY: test cases are owned by the fuzzer's output
                // directory and not rewritten while a pass is running.
                let map = unsafe { Mmap::map(&file)? };
                Ok(SeedView::Mapped(map))
            }
            SeedBacking::Memory(data) => Ok(SeedView::Owned(data.clone())),
        }
    }
}

/// Byte view handed out by [`Seed::bytes`].
#[derive(Debug)]
pub enum SeedView {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for SeedView {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            SeedView::Mapped(map) => map,
            SeedView::Owned(data) => data,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn file_backed_seed_maps_content() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"hello fuzzer").unwrap();
        tmp.flush().unwrap();

        let seed = Seed::from_file(tmp.path()).unwrap();
        assert_eq!(seed.len(), 12);
        let view = seed.bytes().unwrap();
        assert_eq!(&*view, b"hello fuzzer");
    }

    #[test]
    fn memory_backed_seed_round_trips() {
        let seed = Seed::from_bytes(vec![1, 2, 3]);
        assert_eq!(seed.len(), 3);
        assert_eq!(&*seed.bytes().unwrap(), &[1, 2, 3]);
        assert!(!seed.flags.contains(SeedFlags::WAS_FUZZED));
    }
}
