use crossbeam_utils::atomic::AtomicCell;
use std::num::NonZeroU64;

/// Value of the scheduler's run counter: the logical clock shared by every
/// module in a dataflow. One run number is minted per tick, every module that
/// executes during that tick observes the same value, and each table row
/// carries the run number at which it was last written (its `_update` stamp).
///
/// `RunNumber`s are totally ordered and start at `R1`; "has never run" is
/// represented as `Option<RunNumber>::None`, which sorts before every run.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunNumber {
    generation: NonZeroU64,
}

impl RunNumber {
    /// The first run number handed out by a scheduler.
    pub fn start() -> Self {
        Self::from(1)
    }

    /// Builds a run number from its integer value. Panics on 0, which is
    /// reserved for "never".
    pub fn from(g: u64) -> Self {
        Self {
            generation: NonZeroU64::new(g).expect("run number must be non-zero"),
        }
    }

    pub(crate) fn next(self) -> Self {
        Self::from(self.generation.get() + 1)
    }

    /// The integer value of this run number.
    pub fn as_u64(self) -> u64 {
        self.generation.get()
    }
}

impl std::fmt::Debug for RunNumber {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(fmt, "R{}", self.generation)
    }
}

impl std::fmt::Display for RunNumber {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(fmt, "{}", self.generation)
    }
}

/// Lock-free cell holding an optional run number; the raw value 0 encodes
/// `None`.
pub(crate) struct AtomicRunNumber {
    cell: AtomicCell<u64>,
}

impl AtomicRunNumber {
    pub(crate) fn none() -> Self {
        Self {
            cell: AtomicCell::new(0),
        }
    }

    pub(crate) fn load(&self) -> Option<RunNumber> {
        NonZeroU64::new(self.cell.load()).map(|generation| RunNumber { generation })
    }

    /// Bumps the counter and returns the freshly minted run number.
    pub(crate) fn increment(&self) -> RunNumber {
        let prev = self.cell.fetch_add(1);
        RunNumber::from(prev + 1)
    }
}

impl std::fmt::Debug for AtomicRunNumber {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.load() {
            Some(r) => write!(fmt, "{:?}", r),
            None => write!(fmt, "R-"),
        }
    }
}
