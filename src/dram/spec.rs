use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serde::Deserialize;

/// Capability surface of one DRAM standard: the command set plus enough
/// classification for the row table and scheduler to reason about what a
/// command does to open rows. Implementations are monomorphized into the
/// scheduler, so none of this costs a dispatch per request.
pub trait DramSpec {
    type Command: Copy + Eq + std::fmt::Debug;

    fn level_count(&self) -> usize;
    /// Index of the row coordinate in a decomposed address vector; the
    /// prefix below it identifies a rowgroup (bank or subarray).
    fn row_level(&self) -> usize;
    /// Index of the deepest level `cmd` applies to.
    fn scope(&self, cmd: Self::Command) -> usize;
    fn is_opening(&self, cmd: Self::Command) -> bool;
    fn is_accessing(&self, cmd: Self::Command) -> bool;
    fn is_closing(&self, cmd: Self::Command) -> bool;
    /// The command that closes a row ahead of opening another.
    fn pre_command(&self) -> Self::Command;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum DdrLevel {
    Channel = 0,
    Rank,
    Bank,
    Row,
    Column,
}

impl DdrLevel {
    pub fn from_index(idx: usize) -> Option<Self> {
        Self::from_usize(idx)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdrCommand {
    Act,
    Pre,
    Rd,
    Wr,
    Rda,
    Wra,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct SimpleDdrConfig {
    pub channels: u64,
    pub ranks: u64,
    pub banks: u64,
    pub rows: u64,
    pub columns: u64,
}

impl Default for SimpleDdrConfig {
    fn default() -> Self {
        Self {
            channels: 1,
            ranks: 1,
            banks: 8,
            rows: 32768,
            columns: 1024,
        }
    }
}

/// A single-standard DDR-like geometry: five levels, auto-precharging
/// read/write variants included. Enough standard for the scheduler and row
/// machinery; bank-state timing lives with whoever owns the banks.
#[derive(Debug, Clone, Copy)]
pub struct SimpleDdr {
    counts: [u64; 5],
}

impl SimpleDdr {
    pub fn new(cfg: &SimpleDdrConfig) -> Self {
        let counts = [cfg.channels, cfg.ranks, cfg.banks, cfg.rows, cfg.columns];
        for (idx, &count) in counts.iter().enumerate() {
            assert!(
                count > 0,
                "{:?} count must be nonzero",
                DdrLevel::from_index(idx).expect("five levels")
            );
        }
        Self { counts }
    }

    /// Splits a block address into per-level coordinates, column first.
    pub fn decompose(&self, addr: u64) -> Vec<u64> {
        let mut addr = addr;
        let mut vec = vec![0; self.counts.len()];
        for level in (0..self.counts.len()).rev() {
            vec[level] = addr % self.counts[level];
            addr /= self.counts[level];
        }
        vec
    }
}

impl Default for SimpleDdr {
    fn default() -> Self {
        Self::new(&SimpleDdrConfig::default())
    }
}

impl DramSpec for SimpleDdr {
    type Command = DdrCommand;

    fn level_count(&self) -> usize {
        self.counts.len()
    }

    fn row_level(&self) -> usize {
        DdrLevel::Row as usize
    }

    fn scope(&self, cmd: DdrCommand) -> usize {
        match cmd {
            DdrCommand::Act => DdrLevel::Row as usize,
            DdrCommand::Pre => DdrLevel::Bank as usize,
            DdrCommand::Rd | DdrCommand::Wr | DdrCommand::Rda | DdrCommand::Wra => {
                DdrLevel::Column as usize
            }
        }
    }

    fn is_opening(&self, cmd: DdrCommand) -> bool {
        matches!(cmd, DdrCommand::Act)
    }

    fn is_accessing(&self, cmd: DdrCommand) -> bool {
        matches!(
            cmd,
            DdrCommand::Rd | DdrCommand::Wr | DdrCommand::Rda | DdrCommand::Wra
        )
    }

    fn is_closing(&self, cmd: DdrCommand) -> bool {
        matches!(cmd, DdrCommand::Pre | DdrCommand::Rda | DdrCommand::Wra)
    }

    fn pre_command(&self) -> DdrCommand {
        DdrCommand::Pre
    }
}
