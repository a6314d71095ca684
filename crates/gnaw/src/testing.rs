//! Scripted collaborators for exercising the engine without a real target.

use std::{cell::RefCell, fmt, rc::Rc};

use crate::{
    dict::Dictionary,
    harness::{Harness, Verdict},
    queue::QueueView,
    seed::{ExecOutcome, Seed},
};

/// Campaign counters shared between the scripted harness (which
/// "discovers" paths) and the scripted queue (which reports them).
#[derive(Debug, Default)]
pub(crate) struct Campaign {
    pub queued_paths: usize,
    pub unique_crashes: u64,
}

pub(crate) type SharedCampaign = Rc<RefCell<Campaign>>;

pub(crate) fn campaign(queued_paths: usize) -> SharedCampaign {
    Rc::new(RefCell::new(Campaign {
        queued_paths,
        unique_crashes: 0,
    }))
}

/// FNV-1a, as a stand-in for coverage fingerprints in behaviour models.
/// Distinct single-byte substitutions at a fixed position yield distinct
/// digests, which the effector tests rely on.
pub(crate) fn digest32(data: &[u8]) -> u32 {
    data.iter()
        .fold(0x811c_9dc5u32, |h, &b| (h ^ u32::from(b)).wrapping_mul(0x0100_0193))
}

/// A harness whose "target" is a closure from mutant bytes to a coverage
/// fingerprint.
pub(crate) struct ScriptedHarness {
    campaign: SharedCampaign,
    model: Box<dyn FnMut(&[u8]) -> u32>,
    /// Report a new queued path on every execution.
    pub enqueue_on_every_exec: bool,
    /// Return [`Verdict::Abandon`] once this many executions have run.
    pub abandon_after: Option<u64>,
    pub stop: bool,
    pub execs: u64,
    last_hash: u32,
}

impl fmt::Debug for ScriptedHarness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedHarness")
            .field("execs", &self.execs)
            .field("last_hash", &self.last_hash)
            .finish_non_exhaustive()
    }
}

impl ScriptedHarness {
    pub fn new(campaign: SharedCampaign, model: impl FnMut(&[u8]) -> u32 + 'static) -> Self {
        Self {
            campaign,
            model: Box::new(model),
            enqueue_on_every_exec: false,
            abandon_after: None,
            stop: false,
            execs: 0,
            last_hash: 0,
        }
    }
}

impl Harness for ScriptedHarness {
    fn run(&mut self, buf: &[u8]) -> anyhow::Result<Verdict> {
        self.execs += 1;
        self.last_hash = (self.model)(buf);
        if self.enqueue_on_every_exec {
            self.campaign.borrow_mut().queued_paths += 1;
        }
        if self.abandon_after.is_some_and(|limit| self.execs > limit) {
            return Ok(Verdict::Abandon);
        }
        Ok(Verdict::Continue)
    }

    fn coverage_hash(&self) -> u32 {
        self.last_hash
    }

    fn stop_requested(&self) -> bool {
        self.stop
    }
}

/// A queue manager with everything scriptable from the outside.
#[derive(Debug)]
pub(crate) struct ScriptedQueue {
    campaign: SharedCampaign,
    /// Seed bytes by queue index, for splicing.
    pub corpus: Vec<Vec<u8>>,
    pub user_dict: Dictionary,
    pub auto_dict: Dictionary,
    /// Every token the engine offered, in order.
    pub captured_tokens: Vec<Vec<u8>>,
    pub pending_favored: usize,
    pub cycle: u64,
    pub splicing: bool,
    pub score: u32,
    pub calibration: ExecOutcome,
    pub calibrations: usize,
    /// Truncate inputs to this length when trimming.
    pub trim_to: Option<usize>,
    pub det_done: usize,
    pub fuzzed_notes: usize,
}

impl ScriptedQueue {
    pub fn new(campaign: SharedCampaign) -> Self {
        Self {
            campaign,
            corpus: Vec::new(),
            user_dict: Dictionary::new(),
            auto_dict: Dictionary::new(),
            captured_tokens: Vec::new(),
            pending_favored: 0,
            cycle: 1,
            splicing: false,
            score: 100,
            calibration: ExecOutcome::Ok,
            calibrations: 0,
            trim_to: None,
            det_done: 0,
            fuzzed_notes: 0,
        }
    }
}

impl QueueView for ScriptedQueue {
    fn queued_paths(&self) -> usize {
        self.campaign.borrow().queued_paths
    }

    fn unique_crashes(&self) -> u64 {
        self.campaign.borrow().unique_crashes
    }

    fn pending_favored(&self) -> usize {
        self.pending_favored
    }

    fn queue_cycle(&self) -> u64 {
        self.cycle
    }

    fn use_splicing(&self) -> bool {
        self.splicing
    }

    fn seed_len(&self, idx: usize) -> Option<usize> {
        self.corpus.get(idx).map(Vec::len)
    }

    fn load_seed(&self, idx: usize) -> anyhow::Result<Vec<u8>> {
        self.corpus
            .get(idx)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no corpus entry #{idx}"))
    }

    fn calibrate(&mut self, seed: &mut Seed) -> anyhow::Result<ExecOutcome> {
        self.calibrations += 1;
        if self.calibration == ExecOutcome::Ok {
            seed.cal_failed = 0;
        } else {
            seed.cal_failed += 1;
        }
        Ok(self.calibration)
    }

    fn trim(&mut self, seed: &mut Seed, input: &mut Vec<u8>) -> anyhow::Result<()> {
        if let Some(to) = self.trim_to
            && to < input.len()
        {
            input.truncate(to);
            seed.set_len(to);
        }
        Ok(())
    }

    fn performance_score(&self, _seed: &Seed) -> u32 {
        self.score
    }

    fn add_auto_token(&mut self, token: &[u8]) {
        self.captured_tokens.push(token.to_vec());
        self.auto_dict.insert(token);
    }

    fn mark_det_done(&mut self, _seed: &Seed) {
        self.det_done += 1;
    }

    fn user_extras(&self) -> &Dictionary {
        &self.user_dict
    }

    fn auto_extras(&self) -> &Dictionary {
        &self.auto_dict
    }

    fn note_fuzzed(&mut self, _favored: bool) {
        self.fuzzed_notes += 1;
    }
}
