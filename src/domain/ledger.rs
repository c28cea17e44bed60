// ============================================================
// Layer 3 - Best-Score Ledger
// ============================================================
// Keeps the N best validation scores seen so far, one per
// checkpoint slot, plus the best score ever seen.
//
// Every slot starts at the worst possible value for the goal
// (+inf when minimising, -inf when maximising), so the first
// N finite scores always get stored. After that a score is
// stored only if it beats the current worst slot, and it
// then takes over that slot.
//
// The ledger does no I/O. The training driver turns each
// LedgerUpdate into a checkpoint write and, for a new best,
// a re-pointed "best" link.

use anyhow::{bail, Result};

/// Whether lower or higher metric values are better.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricGoal {
    Minimize,
    Maximize,
}

impl MetricGoal {
    pub fn from_minimize(minimize: bool) -> Self {
        if minimize { Self::Minimize } else { Self::Maximize }
    }

    /// The sentinel every slot starts with
    pub fn worst_value(self) -> f64 {
        match self {
            Self::Minimize => f64::INFINITY,
            Self::Maximize => f64::NEG_INFINITY,
        }
    }

    /// Strict comparison: equal scores are never "better"
    pub fn is_better(self, score: f64, than: f64) -> bool {
        match self {
            Self::Minimize => score < than,
            Self::Maximize => score > than,
        }
    }
}

/// Outcome of recording one validation score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerUpdate {
    /// The score did not beat the worst retained slot
    Rejected,
    /// The score replaced the slot at `slot`
    Stored { slot: usize, new_best: bool },
}

#[derive(Debug, Clone)]
pub struct BestScoreLedger {
    goal:   MetricGoal,
    slots:  Vec<f64>,
    best:   f64,
}

impl BestScoreLedger {
    pub fn new(capacity: usize, goal: MetricGoal) -> Result<Self> {
        if capacity < 1 {
            bail!("the number of best checkpoints to keep must be greater than zero");
        }
        Ok(Self {
            goal,
            slots: vec![goal.worst_value(); capacity],
            best:  goal.worst_value(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn goal(&self) -> MetricGoal {
        self.goal
    }

    /// Best score recorded so far (the sentinel before any record)
    pub fn best(&self) -> f64 {
        self.best
    }

    /// Raw slot contents, sentinel values included
    pub fn slots(&self) -> &[f64] {
        &self.slots
    }

    /// Index of the worst slot: the first maximum when minimising,
    /// the first minimum when maximising.
    pub fn worst_slot(&self) -> usize {
        let mut worst = 0;
        for (i, &s) in self.slots.iter().enumerate().skip(1) {
            if self.goal.is_better(self.slots[worst], s) {
                worst = i;
            }
        }
        worst
    }

    pub fn record(&mut self, score: f64) -> LedgerUpdate {
        if self.goal.is_better(score, self.best) {
            self.best = score;
        }

        let worst = self.worst_slot();
        if !self.goal.is_better(score, self.slots[worst]) {
            return LedgerUpdate::Rejected;
        }

        self.slots[worst] = score;
        LedgerUpdate::Stored { slot: worst, new_best: self.best == score }
    }

    /// Stored scores with their slot index, best first.
    /// Slots still holding the initial sentinel are left out.
    pub fn entries(&self) -> Vec<(usize, f64)> {
        let mut entries: Vec<(usize, f64)> = self
            .slots
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, s)| s.is_finite())
            .collect();
        let goal = self.goal;
        entries.sort_by(|a, b| {
            if goal.is_better(a.1, b.1) {
                std::cmp::Ordering::Less
            } else if goal.is_better(b.1, a.1) {
                std::cmp::Ordering::Greater
            } else {
                a.0.cmp(&b.0)
            }
        });
        entries
    }
}
