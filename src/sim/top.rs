use log::info;
use toml::Value;

use crate::cache::{CacheHierarchy, CacheHierarchyConfig, CacheId, CacheLevel, CacheStats};
use crate::dram::{MemController, MemControllerConfig, MemStats};
use crate::request::{Cycle, ReqKind, Request};
use crate::sim::config::{Config, SimConfig};
use crate::sim::traffic::TrafficConfig;

#[derive(Debug, Clone, Default)]
pub struct MemSystemConfig {
    pub sim: SimConfig,
    pub cache: CacheHierarchyConfig,
    pub mem: MemControllerConfig,
    pub traffic: TrafficConfig,
}

impl MemSystemConfig {
    pub fn from_toml(doc: &Value) -> Self {
        Self {
            sim: SimConfig::from_section(doc.get("sim")),
            cache: CacheHierarchyConfig::from_section(doc.get("cache")),
            mem: MemControllerConfig::from_section(doc.get("mem")),
            traffic: TrafficConfig::from_section(doc.get("traffic")),
        }
    }
}

/// Owner of one complete memory system: a three-level hierarchy wired onto
/// the controller. One `tick` advances the controller (fills complete and
/// climb back up) and then the cache side (retries, wait list, hits).
pub struct MemSystem {
    pub hierarchy: CacheHierarchy,
    pub ctrl: MemController,
    l1: CacheId,
    l2: CacheId,
    l3: CacheId,
}

impl MemSystem {
    pub fn new(cfg: &MemSystemConfig) -> Self {
        let mut hierarchy = CacheHierarchy::new();
        let l1 = hierarchy.add_cache(CacheLevel::L1, &cfg.cache.l1);
        let l2 = hierarchy.add_cache(CacheLevel::L2, &cfg.cache.l2);
        let l3 = hierarchy.add_cache(CacheLevel::L3, &cfg.cache.l3);
        hierarchy.concat_lower(l1, l2);
        hierarchy.concat_lower(l2, l3);
        info!("memory system: three cache levels over one channel");
        Self {
            hierarchy,
            ctrl: MemController::new(&cfg.mem),
            l1,
            l2,
            l3,
        }
    }

    pub fn l1(&self) -> CacheId {
        self.l1
    }

    pub fn clk(&self) -> Cycle {
        self.hierarchy.sys.clk
    }

    /// Front-end entry point; `false` asks the caller to retry later.
    pub fn send(&mut self, req: Request) -> bool {
        self.hierarchy.send(self.l1, req)
    }

    pub fn tick(&mut self) {
        let MemSystem {
            hierarchy, ctrl, ..
        } = self;
        ctrl.tick(|req| {
            // Only fills climb back up; writebacks complete silently.
            if req.kind == ReqKind::Read {
                hierarchy.finish_fill(&req);
            }
        });
        hierarchy.tick(|req| ctrl.enqueue(req.clone()));
    }

    pub fn idle(&self) -> bool {
        !self.hierarchy.busy() && self.ctrl.pending() == 0
    }

    pub fn cache_stats(&self) -> [(CacheLevel, CacheStats); 3] {
        [
            (CacheLevel::L1, *self.hierarchy.stats(self.l1)),
            (CacheLevel::L2, *self.hierarchy.stats(self.l2)),
            (CacheLevel::L3, *self.hierarchy.stats(self.l3)),
        ]
    }

    pub fn mem_stats(&self) -> MemStats {
        self.ctrl.stats()
    }
}
