use std::fmt;
use std::rc::Rc;

pub type Cycle = u64;

/// Completion continuation attached by the front-end; invoked once the
/// request finishes at whatever level absorbed it.
pub type Callback = Rc<dyn Fn(&Request)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReqKind {
    Read,
    Write,
}

impl ReqKind {
    pub fn is_write(self) -> bool {
        matches!(self, Self::Write)
    }
}

/// A single memory request flowing through the hierarchy. `addr_vec` holds
/// the decomposed DRAM coordinates (channel/rank/bank/row/column) filled in
/// by whoever maps the flat address onto a standard; it stays empty for
/// requests that never reach a controller.
#[derive(Clone)]
pub struct Request {
    pub addr: u64,
    pub kind: ReqKind,
    pub core_id: usize,
    pub arrive: Cycle,
    pub addr_vec: Vec<u64>,
    pub callback: Option<Callback>,
}

impl Request {
    pub fn new(addr: u64, kind: ReqKind, core_id: usize) -> Self {
        Self {
            addr,
            kind,
            core_id,
            arrive: 0,
            addr_vec: Vec::new(),
            callback: None,
        }
    }

    pub fn with_callback(mut self, callback: Callback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Writeback requests carry no continuation; nobody waits on them.
    pub fn writeback(addr: u64) -> Self {
        Self::new(addr, ReqKind::Write, 0)
    }

    pub fn complete(&self) {
        if let Some(callback) = &self.callback {
            callback(self);
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("addr", &format_args!("{:#x}", self.addr))
            .field("kind", &self.kind)
            .field("core_id", &self.core_id)
            .field("arrive", &self.arrive)
            .field("addr_vec", &self.addr_vec)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}
