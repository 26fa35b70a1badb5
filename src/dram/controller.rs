use std::collections::{HashMap, VecDeque};

use log::{debug, trace};
use serde::Deserialize;

use crate::dram::row_policy::{RowPolicy, RowPolicyKind, DEFAULT_ROW_TIMEOUT};
use crate::dram::row_table::RowTable;
use crate::dram::scheduler::{Scheduler, SchedulerKind};
use crate::dram::spec::{DdrCommand, DramSpec, SimpleDdr, SimpleDdrConfig};
use crate::request::{Cycle, ReqKind, Request};

/// The narrow controller surface the scheduler and row policy call back
/// into. Everything they can observe about bank and row state goes through
/// here, which keeps `get_head` a pure function of queue plus controller
/// state.
pub trait SchedQueue {
    type Spec: DramSpec;

    fn spec(&self) -> &Self::Spec;
    fn clk(&self) -> Cycle;
    /// Whether the request's bank could accept a command right now.
    fn is_ready(&self, req: &Request) -> bool;
    /// Whether `cmd` could be issued to `rowgroup` right now.
    fn is_ready_cmd(&self, cmd: <Self::Spec as DramSpec>::Command, rowgroup: &[u64]) -> bool;
    fn is_row_hit(&self, req: &Request) -> bool;
    fn is_row_open(&self, req: &Request) -> bool;
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct MemControllerConfig {
    pub scheduler: SchedulerKind,
    pub row_policy: RowPolicyKind,
    pub row_timeout: Cycle,
    pub queue_depth: usize,
    pub block_bytes: u64,
    pub t_cas: Cycle,
    pub t_ras: Cycle,
    pub t_pre: Cycle,
    pub dram: SimpleDdrConfig,
}

impl Default for MemControllerConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerKind::default(),
            row_policy: RowPolicyKind::default(),
            row_timeout: DEFAULT_ROW_TIMEOUT,
            queue_depth: 32,
            block_bytes: 64,
            t_cas: 12,
            t_ras: 30,
            t_pre: 12,
            dram: SimpleDdrConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MemStats {
    pub enqueued: u64,
    pub rejected: u64,
    pub issued: u64,
    pub completed: u64,
    pub row_hits: u64,
    pub row_misses: u64,
    pub row_conflicts: u64,
    pub precharges: u64,
}

/// Just enough memory controller to drive the scheduler and row machinery:
/// a bounded pending queue, per-bank busy-until timing, and the row table.
/// The full bank/rank command state machine is somebody else's model; this
/// one charges CAS on a row hit, RAS+CAS on an idle bank, and
/// PRE+RAS+CAS on a conflict.
pub struct MemController {
    spec: SimpleDdr,
    clk: Cycle,
    queue: Vec<Request>,
    queue_depth: usize,
    block_bytes: u64,
    scheduler: Scheduler<MemController>,
    row_table: RowTable,
    row_policy: RowPolicy,
    bank_busy: HashMap<Vec<u64>, Cycle>,
    inflight: VecDeque<(Cycle, Request)>,
    t_cas: Cycle,
    t_ras: Cycle,
    t_pre: Cycle,
    stats: MemStats,
}

impl MemController {
    pub fn new(cfg: &MemControllerConfig) -> Self {
        assert!(cfg.queue_depth > 0, "queue depth must be > 0");
        assert!(cfg.block_bytes.is_power_of_two(), "block bytes must be a power of two");
        let spec = SimpleDdr::new(&cfg.dram);
        Self {
            spec,
            clk: 0,
            queue: Vec::new(),
            queue_depth: cfg.queue_depth,
            block_bytes: cfg.block_bytes,
            scheduler: Scheduler::new(cfg.scheduler),
            row_table: RowTable::new(spec.row_level()),
            row_policy: RowPolicy::new(cfg.row_policy, cfg.row_timeout),
            bank_busy: HashMap::new(),
            inflight: VecDeque::new(),
            t_cas: cfg.t_cas,
            t_ras: cfg.t_ras,
            t_pre: cfg.t_pre,
            stats: MemStats::default(),
        }
    }

    pub fn stats(&self) -> MemStats {
        self.stats
    }

    pub fn pending(&self) -> usize {
        self.queue.len() + self.inflight.len()
    }

    fn bank_ready(&self, rowgroup: &[u64]) -> bool {
        self.bank_busy
            .get(rowgroup)
            .map_or(true, |&until| self.clk >= until)
    }

    /// Accepts one request into the pending queue, stamping its arrival
    /// and DRAM coordinates. `false` is backpressure; the cache side keeps
    /// the request in its wait list and offers it again.
    pub fn enqueue(&mut self, mut req: Request) -> bool {
        if self.queue.len() >= self.queue_depth {
            self.stats.rejected = self.stats.rejected.saturating_add(1);
            return false;
        }
        req.arrive = self.clk;
        req.addr_vec = self.spec.decompose(req.addr / self.block_bytes);
        trace!("mem enqueue {:?} {:#x} -> {:?}", req.kind, req.addr, req.addr_vec);
        self.stats.enqueued = self.stats.enqueued.saturating_add(1);
        self.queue.push(req);
        true
    }

    /// One controller cycle: retire finished requests, let the scheduler
    /// pick a head to issue, then give the row policy a chance to
    /// precharge.
    pub fn tick(&mut self, mut on_complete: impl FnMut(Request)) {
        self.clk += 1;
        let clk = self.clk;

        let mut i = 0;
        while i < self.inflight.len() {
            if clk >= self.inflight[i].0 {
                let (_, req) = self.inflight.remove(i).expect("index in bounds");
                self.stats.completed = self.stats.completed.saturating_add(1);
                trace!("mem complete {:#x}", req.addr);
                on_complete(req);
            } else {
                i += 1;
            }
        }

        if let Some(idx) = self.scheduler.get_head(self, &self.queue) {
            if self.is_ready(&self.queue[idx]) {
                let req = self.queue.remove(idx);
                self.issue(req);
            }
        }

        let pre = self.spec.pre_command();
        if let Some(victim) = self.row_policy.get_victim(self, &self.row_table, pre) {
            self.precharge(&victim);
        }
    }

    fn issue(&mut self, req: Request) {
        let clk = self.clk;
        let row_level = self.spec.row_level();
        let row = req.addr_vec[row_level];
        let bank = req.addr_vec[..row_level].to_vec();

        let latency = match self.row_table.get_open_row(&req.addr_vec) {
            Some(open) if open == row => {
                self.stats.row_hits = self.stats.row_hits.saturating_add(1);
                self.t_cas
            }
            Some(_) => {
                self.stats.row_conflicts = self.stats.row_conflicts.saturating_add(1);
                self.row_table
                    .update(&self.spec, DdrCommand::Pre, &req.addr_vec, clk);
                self.row_table
                    .update(&self.spec, DdrCommand::Act, &req.addr_vec, clk);
                self.t_pre + self.t_ras + self.t_cas
            }
            None => {
                self.stats.row_misses = self.stats.row_misses.saturating_add(1);
                self.row_table
                    .update(&self.spec, DdrCommand::Act, &req.addr_vec, clk);
                self.t_ras + self.t_cas
            }
        };

        let access = match req.kind {
            ReqKind::Write => DdrCommand::Wr,
            ReqKind::Read => DdrCommand::Rd,
        };
        self.row_table.update(&self.spec, access, &req.addr_vec, clk);

        let ready_at = clk + latency;
        debug!(
            "mem issue {:?} {:#x} bank {:?} row {}, done at {}",
            req.kind, req.addr, bank, row, ready_at
        );
        self.bank_busy.insert(bank, ready_at);
        self.stats.issued = self.stats.issued.saturating_add(1);
        self.inflight.push_back((ready_at, req));
    }

    fn precharge(&mut self, rowgroup: &[u64]) {
        let row = self
            .row_table
            .entry(rowgroup)
            .expect("victim came from the row table")
            .row;
        let mut addr_vec = rowgroup.to_vec();
        addr_vec.push(row);
        let clk = self.clk;
        debug!("mem precharge bank {:?} row {}", rowgroup, row);
        self.row_table
            .update(&self.spec, DdrCommand::Pre, &addr_vec, clk);
        let until = self.bank_busy.entry(rowgroup.to_vec()).or_insert(0);
        *until = (*until).max(clk + self.t_pre);
        self.stats.precharges = self.stats.precharges.saturating_add(1);
    }
}

impl SchedQueue for MemController {
    type Spec = SimpleDdr;

    fn spec(&self) -> &SimpleDdr {
        &self.spec
    }

    fn clk(&self) -> Cycle {
        self.clk
    }

    fn is_ready(&self, req: &Request) -> bool {
        self.bank_ready(&req.addr_vec[..self.spec.row_level()])
    }

    fn is_ready_cmd(&self, _cmd: DdrCommand, rowgroup: &[u64]) -> bool {
        self.bank_ready(rowgroup)
    }

    fn is_row_hit(&self, req: &Request) -> bool {
        self.row_table.get_open_row(&req.addr_vec)
            == Some(req.addr_vec[self.spec.row_level()])
    }

    fn is_row_open(&self, req: &Request) -> bool {
        self.row_table.get_open_row(&req.addr_vec).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(addr: u64) -> Request {
        Request::new(addr, ReqKind::Read, 0)
    }

    fn run(ctrl: &mut MemController, cycles: u64, order: &mut Vec<u64>) {
        for _ in 0..cycles {
            ctrl.tick(|req| order.push(req.addr));
        }
    }

    #[test]
    fn queue_depth_is_backpressure() {
        let mut ctrl = MemController::new(&MemControllerConfig {
            queue_depth: 1,
            ..MemControllerConfig::default()
        });
        assert!(ctrl.enqueue(read(0)));
        assert!(!ctrl.enqueue(read(64)));
        assert_eq!(ctrl.stats().rejected, 1);
    }

    #[test]
    fn same_row_requests_hit_the_row_buffer() {
        let mut ctrl = MemController::new(&MemControllerConfig::default());
        assert!(ctrl.enqueue(read(0)));
        assert!(ctrl.enqueue(read(64)));
        let mut order = Vec::new();
        run(&mut ctrl, 200, &mut order);
        assert_eq!(order, vec![0, 64]);
        let stats = ctrl.stats();
        assert_eq!(stats.row_misses, 1);
        assert_eq!(stats.row_hits, 1);
    }

    #[test]
    fn frfcfs_issues_row_hit_before_older_miss() {
        let mut ctrl = MemController::new(&MemControllerConfig::default());
        // Row 0 of bank 0 opens first.
        assert!(ctrl.enqueue(read(0)));
        let mut order = Vec::new();
        run(&mut ctrl, 1, &mut order);
        // Older request to row 1, younger request hitting open row 0.
        assert!(ctrl.enqueue(read(1024 * 64)));
        assert!(ctrl.enqueue(read(64)));
        run(&mut ctrl, 300, &mut order);
        assert_eq!(order, vec![0, 64, 1024 * 64]);
        assert!(ctrl.stats().row_conflicts >= 1);
    }

    #[test]
    fn idle_rows_get_precharged_on_timeout() {
        let mut ctrl = MemController::new(&MemControllerConfig::default());
        assert!(ctrl.enqueue(read(0)));
        let mut order = Vec::new();
        run(&mut ctrl, 200, &mut order);
        assert_eq!(order.len(), 1);
        assert!(ctrl.stats().precharges >= 1);
        assert!(ctrl.row_table.is_empty());
    }
}
