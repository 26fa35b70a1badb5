use serde::Deserialize;

use crate::dram::controller::SchedQueue;
use crate::dram::spec::DramSpec;
use crate::request::Request;

/// Arbitration discipline over the controller's pending-request queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub enum SchedulerKind {
    #[serde(rename = "FCFS")]
    Fcfs,
    #[serde(rename = "FCFSBank")]
    FcfsBank,
    #[serde(rename = "FRFCFS")]
    #[default]
    Frfcfs,
    #[serde(rename = "BLISS")]
    Bliss,
    #[serde(rename = "Custom")]
    Custom,
}

/// Pairwise comparator: true when the first request keeps priority. Ties
/// always favor the first argument, which makes the scan stable.
type Compare<C> = fn(&C, &Request, &Request) -> bool;

fn cmp_fcfs<C: SchedQueue>(_ctrl: &C, a: &Request, b: &Request) -> bool {
    a.arrive <= b.arrive
}

fn cmp_fcfs_bank<C: SchedQueue>(ctrl: &C, a: &Request, b: &Request) -> bool {
    let ready_a = ctrl.is_ready(a);
    let ready_b = ctrl.is_ready(b);
    if ready_a != ready_b {
        return ready_a;
    }
    a.arrive <= b.arrive
}

fn cmp_frfcfs<C: SchedQueue>(ctrl: &C, a: &Request, b: &Request) -> bool {
    let ready_a = ctrl.is_ready(a) && ctrl.is_row_hit(a);
    let ready_b = ctrl.is_ready(b) && ctrl.is_row_hit(b);
    if ready_a != ready_b {
        return ready_a;
    }
    a.arrive <= b.arrive
}

// Extension point: blacklist cores that hog row hits, then fall back to
// first-ready order. The baseline keeps the FRFCFS comparison.
fn cmp_bliss<C: SchedQueue>(ctrl: &C, a: &Request, b: &Request) -> bool {
    let ready_a = ctrl.is_ready(a) && ctrl.is_row_hit(a);
    let ready_b = ctrl.is_ready(b) && ctrl.is_row_hit(b);
    if ready_a != ready_b {
        return ready_a;
    }
    a.arrive <= b.arrive
}

// Extension point for experiments; baseline mirrors FRFCFS.
fn cmp_custom<C: SchedQueue>(ctrl: &C, a: &Request, b: &Request) -> bool {
    let ready_a = ctrl.is_ready(a) && ctrl.is_row_hit(a);
    let ready_b = ctrl.is_ready(b) && ctrl.is_row_hit(b);
    if ready_a != ready_b {
        return ready_a;
    }
    a.arrive <= b.arrive
}

pub struct Scheduler<C: SchedQueue> {
    kind: SchedulerKind,
    compare: Compare<C>,
}

impl<C: SchedQueue> Scheduler<C> {
    pub fn new(kind: SchedulerKind) -> Self {
        let compare: Compare<C> = match kind {
            SchedulerKind::Fcfs => cmp_fcfs,
            SchedulerKind::FcfsBank => cmp_fcfs_bank,
            SchedulerKind::Frfcfs => cmp_frfcfs,
            SchedulerKind::Bliss => cmp_bliss,
            SchedulerKind::Custom => cmp_custom,
        };
        Self { kind, compare }
    }

    pub fn kind(&self) -> SchedulerKind {
        self.kind
    }

    /// Picks the queue index to issue next, or `None` when nothing should
    /// issue this cycle. Pure in the queue and the controller-observable
    /// state.
    pub fn get_head(&self, ctrl: &C, queue: &[Request]) -> Option<usize> {
        if queue.is_empty() {
            return None;
        }

        let mut head = 0;
        for idx in 1..queue.len() {
            if !(self.compare)(ctrl, &queue[head], &queue[idx]) {
                head = idx;
            }
        }

        if self.kind != SchedulerKind::Frfcfs {
            return Some(head);
        }

        if ctrl.is_ready(&queue[head]) && ctrl.is_row_hit(&queue[head]) {
            return Some(head);
        }

        // No issuable row hit at the head. Gather the rowgroups that still
        // have a queued row hit; issuing a conflicting miss there would
        // precharge the row out from under it.
        let spec = ctrl.spec();
        let scope = spec.scope(spec.pre_command());
        let hit_groups: Vec<&[u64]> = queue
            .iter()
            .filter(|req| ctrl.is_row_hit(req))
            .map(|req| &req.addr_vec[..=scope])
            .collect();

        let mut head: Option<usize> = None;
        for (idx, req) in queue.iter().enumerate() {
            if !ctrl.is_row_hit(req) && ctrl.is_row_open(req) {
                let rowgroup = &req.addr_vec[..=scope];
                if hit_groups.iter().any(|group| *group == rowgroup) {
                    continue;
                }
            }
            head = match head {
                None => Some(idx),
                Some(h) if cmp_fcfs_bank(ctrl, &queue[h], req) => Some(h),
                Some(_) => Some(idx),
            };
        }
        head
    }
}
