pub mod controller;
pub mod row_policy;
pub mod row_table;
pub mod scheduler;
pub mod spec;

pub use controller::{MemController, MemControllerConfig, MemStats, SchedQueue};
pub use row_policy::{RowPolicy, RowPolicyKind, DEFAULT_ROW_TIMEOUT};
pub use row_table::{RowEntry, RowTable};
pub use scheduler::{Scheduler, SchedulerKind};
pub use spec::{DdrCommand, DdrLevel, DramSpec, SimpleDdr, SimpleDdrConfig};
