use std::collections::BTreeMap;

use log::trace;

use crate::dram::spec::DramSpec;
use crate::request::Cycle;

#[derive(Debug, Clone, Copy)]
pub struct RowEntry {
    pub row: u64,
    pub hits: u64,
    pub timestamp: Cycle,
}

/// Per-rowgroup record of the currently open row, driven by the commands
/// the controller issues. Keys are address-vector prefixes up to (but
/// excluding) the row level; iteration order is deterministic.
#[derive(Debug)]
pub struct RowTable {
    row_level: usize,
    table: BTreeMap<Vec<u64>, RowEntry>,
}

impl RowTable {
    pub fn new(row_level: usize) -> Self {
        Self {
            row_level,
            table: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn rowgroups(&self) -> impl Iterator<Item = (&Vec<u64>, &RowEntry)> {
        self.table.iter()
    }

    pub fn update<S: DramSpec>(
        &mut self,
        spec: &S,
        cmd: S::Command,
        addr_vec: &[u64],
        clk: Cycle,
    ) {
        debug_assert_eq!(spec.row_level(), self.row_level);
        let rowgroup = &addr_vec[..self.row_level];
        let row = addr_vec[self.row_level];

        if spec.is_opening(cmd) {
            trace!("open row {} in {:?}", row, rowgroup);
            self.table.entry(rowgroup.to_vec()).or_insert(RowEntry {
                row,
                hits: 0,
                timestamp: clk,
            });
        }

        if spec.is_accessing(cmd) {
            let entry = self
                .table
                .get_mut(rowgroup)
                .expect("accessing a rowgroup with no open row");
            assert_eq!(entry.row, row, "accessing a row that is not the open one");
            entry.hits += 1;
            entry.timestamp = clk;
        }

        if spec.is_closing(cmd) {
            // RDA/WRA close their own row; their key scope is one level
            // shy of the row. Plain closes use the command's scope.
            let scope = if spec.is_accessing(cmd) {
                self.row_level - 1
            } else {
                spec.scope(cmd)
            };
            let prefix = &addr_vec[..=scope];
            let before = self.table.len();
            self.table.retain(|key, _| &key[..=scope] != prefix);
            assert!(
                self.table.len() < before,
                "closing command matched no open row"
            );
        }
    }

    /// Hit count for the rowgroup, zero unless the open row matches the
    /// request's row (`to_opened_row` waives the row check).
    pub fn get_hits(&self, addr_vec: &[u64], to_opened_row: bool) -> u64 {
        let rowgroup = &addr_vec[..self.row_level];
        let row = addr_vec[self.row_level];
        match self.table.get(rowgroup) {
            Some(entry) if to_opened_row || entry.row == row => entry.hits,
            _ => 0,
        }
    }

    pub fn get_open_row(&self, addr_vec: &[u64]) -> Option<u64> {
        self.table
            .get(&addr_vec[..self.row_level])
            .map(|entry| entry.row)
    }

    pub fn entry(&self, rowgroup: &[u64]) -> Option<&RowEntry> {
        self.table.get(rowgroup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dram::spec::{DdrCommand, SimpleDdr};

    fn addr_vec(bank: u64, row: u64, col: u64) -> Vec<u64> {
        vec![0, 0, bank, row, col]
    }

    #[test]
    fn open_access_close() {
        let spec = SimpleDdr::default();
        let mut table = RowTable::new(spec.row_level());

        table.update(&spec, DdrCommand::Act, &addr_vec(2, 7, 0), 10);
        assert_eq!(table.get_open_row(&addr_vec(2, 7, 0)), Some(7));
        assert_eq!(table.get_hits(&addr_vec(2, 7, 0), false), 0);

        table.update(&spec, DdrCommand::Rd, &addr_vec(2, 7, 1), 11);
        table.update(&spec, DdrCommand::Wr, &addr_vec(2, 7, 2), 12);
        assert_eq!(table.get_hits(&addr_vec(2, 7, 0), false), 2);
        // A different row in the same bank sees no hits unless asked for
        // the opened row regardless.
        assert_eq!(table.get_hits(&addr_vec(2, 8, 0), false), 0);
        assert_eq!(table.get_hits(&addr_vec(2, 8, 0), true), 2);

        table.update(&spec, DdrCommand::Pre, &addr_vec(2, 7, 0), 13);
        assert_eq!(table.get_open_row(&addr_vec(2, 7, 0)), None);
        assert!(table.is_empty());
    }

    #[test]
    fn autoprecharge_closes_only_its_bank() {
        let spec = SimpleDdr::default();
        let mut table = RowTable::new(spec.row_level());

        table.update(&spec, DdrCommand::Act, &addr_vec(0, 1, 0), 0);
        table.update(&spec, DdrCommand::Act, &addr_vec(1, 2, 0), 1);
        table.update(&spec, DdrCommand::Rda, &addr_vec(0, 1, 5), 2);
        assert_eq!(table.get_open_row(&addr_vec(0, 1, 0)), None);
        assert_eq!(table.get_open_row(&addr_vec(1, 2, 0)), Some(2));
    }

    #[test]
    fn opening_an_open_bank_keeps_the_first_entry() {
        let spec = SimpleDdr::default();
        let mut table = RowTable::new(spec.row_level());
        table.update(&spec, DdrCommand::Act, &addr_vec(3, 4, 0), 0);
        table.update(&spec, DdrCommand::Act, &addr_vec(3, 9, 0), 1);
        assert_eq!(table.get_open_row(&addr_vec(3, 0, 0)), Some(4));
    }

    #[test]
    #[should_panic(expected = "no open row")]
    fn accessing_a_closed_bank_is_a_bug() {
        let spec = SimpleDdr::default();
        let mut table = RowTable::new(spec.row_level());
        table.update(&spec, DdrCommand::Rd, &addr_vec(0, 0, 0), 0);
    }

    #[test]
    #[should_panic(expected = "matched no open row")]
    fn closing_nothing_is_a_bug() {
        let spec = SimpleDdr::default();
        let mut table = RowTable::new(spec.row_level());
        table.update(&spec, DdrCommand::Pre, &addr_vec(0, 0, 0), 0);
    }
}
