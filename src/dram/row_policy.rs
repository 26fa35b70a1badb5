use serde::Deserialize;

use crate::dram::controller::SchedQueue;
use crate::dram::row_table::RowTable;
use crate::dram::spec::DramSpec;
use crate::request::Cycle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub enum RowPolicyKind {
    /// Precharge as soon as a row has no pending references.
    Closed,
    /// Same scan as Closed; the access commands auto-precharge instead.
    ClosedAP,
    /// Never force a precharge.
    Opened,
    /// Precharge a row untouched for `timeout` cycles.
    #[default]
    Timeout,
}

pub const DEFAULT_ROW_TIMEOUT: Cycle = 50;

/// Picks a rowgroup whose open row should be precharged, or `None` to
/// leave every row alone this cycle. Only rowgroups for which the close
/// command is issuable are ever returned.
#[derive(Debug, Clone, Copy)]
pub struct RowPolicy {
    kind: RowPolicyKind,
    timeout: Cycle,
}

impl Default for RowPolicy {
    fn default() -> Self {
        Self::new(RowPolicyKind::default(), DEFAULT_ROW_TIMEOUT)
    }
}

impl RowPolicy {
    pub fn new(kind: RowPolicyKind, timeout: Cycle) -> Self {
        Self { kind, timeout }
    }

    pub fn kind(&self) -> RowPolicyKind {
        self.kind
    }

    pub fn get_victim<C: SchedQueue>(
        &self,
        ctrl: &C,
        table: &RowTable,
        cmd: <C::Spec as DramSpec>::Command,
    ) -> Option<Vec<u64>> {
        match self.kind {
            RowPolicyKind::Closed | RowPolicyKind::ClosedAP => table
                .rowgroups()
                .find(|(key, _)| ctrl.is_ready_cmd(cmd, key))
                .map(|(key, _)| key.clone()),
            RowPolicyKind::Opened => None,
            RowPolicyKind::Timeout => table
                .rowgroups()
                .find(|(key, entry)| {
                    ctrl.clk() - entry.timestamp >= self.timeout && ctrl.is_ready_cmd(cmd, key)
                })
                .map(|(key, _)| key.clone()),
        }
    }
}
