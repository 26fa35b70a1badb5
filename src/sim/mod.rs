pub mod config;
pub mod top;
pub mod traffic;

pub use config::{Config, SimConfig};
pub use top::{MemSystem, MemSystemConfig};
pub use traffic::{TrafficConfig, TrafficGen};
