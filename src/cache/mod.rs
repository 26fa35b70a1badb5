pub mod hierarchy;
pub mod line;
pub mod system;

pub use hierarchy::{
    Cache, CacheHierarchy, CacheHierarchyConfig, CacheId, CacheLevel, CacheLevelConfig, CacheStats,
};
pub use line::{Line, LineArena, LineId};
pub use system::CacheSystem;
