use std::collections::{HashMap, VecDeque};

use log::{debug, trace};
use serde::Deserialize;

use crate::cache::line::{Line, LineArena, LineId};
use crate::cache::system::CacheSystem;
use crate::request::{Cycle, ReqKind, Request};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLevel {
    L1,
    L2,
    L3,
}

impl CacheLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheLevel::L1 => "L1",
            CacheLevel::L2 => "L2",
            CacheLevel::L3 => "L3",
        }
    }
}

/// Geometry and latencies of one cache level. `hit_latency` is charged on
/// every hit and on last-level entry into the memory wait queue;
/// `invalidate_latency` is the per-level cost of the invalidation walk.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct CacheLevelConfig {
    pub size: u64,
    pub assoc: usize,
    pub block_size: u64,
    pub mshr_entry_num: usize,
    pub hit_latency: Cycle,
    pub invalidate_latency: Cycle,
}

impl Default for CacheLevelConfig {
    fn default() -> Self {
        Self {
            size: 32768,
            assoc: 8,
            block_size: 64,
            mshr_entry_num: 16,
            hit_latency: 4,
            invalidate_latency: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct CacheHierarchyConfig {
    pub l1: CacheLevelConfig,
    pub l2: CacheLevelConfig,
    pub l3: CacheLevelConfig,
}

impl Default for CacheHierarchyConfig {
    fn default() -> Self {
        Self {
            l1: CacheLevelConfig::default(),
            l2: CacheLevelConfig {
                size: 262144,
                assoc: 8,
                mshr_entry_num: 16,
                hit_latency: 12,
                invalidate_latency: 12,
                ..CacheLevelConfig::default()
            },
            l3: CacheLevelConfig {
                size: 2097152,
                assoc: 16,
                mshr_entry_num: 32,
                hit_latency: 40,
                invalidate_latency: 31,
                ..CacheLevelConfig::default()
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub read_access: u64,
    pub write_access: u64,
    pub total_access: u64,
    pub read_miss: u64,
    pub write_miss: u64,
    pub total_miss: u64,
    pub evictions: u64,
    pub mshr_hits: u64,
    pub mshr_unavailable: u64,
    pub set_unavailable: u64,
}

/// Index of one cache inside a [`CacheHierarchy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheId(usize);

pub struct Cache {
    level: CacheLevel,
    assoc: usize,
    block_size: u64,
    mshr_entry_num: usize,
    hit_latency: Cycle,
    invalidate_latency: Cycle,
    index_mask: u64,
    index_offset: u32,
    tag_offset: u32,
    /// Lazily populated; each set is an LRU queue, front = least recent.
    sets: HashMap<u64, VecDeque<LineId>>,
    arena: LineArena,
    mshr_entries: Vec<(u64, LineId)>,
    retry_list: Vec<Request>,
    lower: Option<CacheId>,
    higher: Vec<CacheId>,
    stats: CacheStats,
}

fn calc_log2(x: u64) -> u32 {
    debug_assert!(x.is_power_of_two());
    x.trailing_zeros()
}

impl Cache {
    fn new(level: CacheLevel, cfg: &CacheLevelConfig) -> Self {
        assert!(cfg.size.is_power_of_two(), "cache size must be a power of two");
        assert!(
            cfg.block_size.is_power_of_two(),
            "block size must be a power of two"
        );
        assert!(
            (cfg.assoc as u64).is_power_of_two(),
            "associativity must be a power of two"
        );
        assert!(cfg.size >= cfg.block_size, "cache smaller than one block");
        assert!(
            cfg.size >= cfg.block_size * cfg.assoc as u64,
            "cache smaller than one full set"
        );
        assert!(cfg.mshr_entry_num > 0, "need at least one MSHR entry");

        let set_num = cfg.size / (cfg.block_size * cfg.assoc as u64);
        let index_offset = calc_log2(cfg.block_size);
        let tag_offset = calc_log2(set_num) + index_offset;
        debug!(
            "{}: size {} assoc {} block {} sets {}",
            level.as_str(),
            cfg.size,
            cfg.assoc,
            cfg.block_size,
            set_num
        );

        Self {
            level,
            assoc: cfg.assoc,
            block_size: cfg.block_size,
            mshr_entry_num: cfg.mshr_entry_num,
            hit_latency: cfg.hit_latency,
            invalidate_latency: cfg.invalidate_latency,
            index_mask: set_num - 1,
            index_offset,
            tag_offset,
            sets: HashMap::new(),
            arena: LineArena::new(),
            mshr_entries: Vec::new(),
            retry_list: Vec::new(),
            lower: None,
            higher: Vec::new(),
            stats: CacheStats::default(),
        }
    }

    pub fn level(&self) -> CacheLevel {
        self.level
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    fn offset_of(&self, addr: u64) -> u64 {
        addr & (self.block_size - 1)
    }

    fn index_of(&self, addr: u64) -> u64 {
        (addr >> self.index_offset) & self.index_mask
    }

    fn tag_of(&self, addr: u64) -> u64 {
        addr >> self.tag_offset
    }

    fn align(&self, addr: u64) -> u64 {
        addr & !(self.block_size - 1)
    }

    fn mshr_lookup(&self, aligned: u64) -> Option<LineId> {
        self.mshr_entries
            .iter()
            .find(|(a, _)| *a == aligned)
            .map(|&(_, lid)| lid)
    }
}

fn find_in_set(arena: &LineArena, set: &VecDeque<LineId>, tag: u64) -> Option<usize> {
    set.iter().position(|&lid| arena.get(lid).tag == tag)
}

/// Owner of every cache in one hierarchy plus the shared [`CacheSystem`].
/// Inter-cache links are [`CacheId`] indices, so the recursive walks
/// (invalidation, unlock checks, fill callbacks) stay plain `&mut self`
/// methods without shared-ownership cycles.
pub struct CacheHierarchy {
    caches: Vec<Cache>,
    pub sys: CacheSystem,
}

impl Default for CacheHierarchy {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheHierarchy {
    pub fn new() -> Self {
        Self {
            caches: Vec::new(),
            sys: CacheSystem::new(),
        }
    }

    pub fn add_cache(&mut self, level: CacheLevel, cfg: &CacheLevelConfig) -> CacheId {
        let id = CacheId(self.caches.len());
        self.caches.push(Cache::new(level, cfg));
        id
    }

    /// Wires `upper` on top of `lower`, mirroring how the hierarchy is
    /// assembled bottom-up: the lower cache learns about every cache above
    /// it so invalidations and callbacks can climb.
    pub fn concat_lower(&mut self, upper: CacheId, lower: CacheId) {
        assert!(upper != lower);
        assert!(
            self.caches[upper.0].lower.is_none(),
            "cache already has a lower level"
        );
        self.caches[upper.0].lower = Some(lower);
        self.caches[lower.0].higher.push(upper);
    }

    pub fn cache(&self, id: CacheId) -> &Cache {
        &self.caches[id.0]
    }

    pub fn stats(&self, id: CacheId) -> &CacheStats {
        &self.caches[id.0].stats
    }

    pub fn has_block(&self, id: CacheId, addr: u64) -> bool {
        let cache = &self.caches[id.0];
        let Some(set) = cache.sets.get(&cache.index_of(addr)) else {
            return false;
        };
        find_in_set(&cache.arena, set, cache.tag_of(addr)).is_some()
    }

    /// Dispatches one request at cache `id`. Returns whether it was
    /// absorbed (hit, MSHR merge, or a newly allocated miss); `false` is
    /// the structural-backpressure signal and the caller retries later.
    pub fn send(&mut self, id: CacheId, mut req: Request) -> bool {
        let clk = self.sys.clk;
        let cache = &mut self.caches[id.0];

        cache.stats.total_access = cache.stats.total_access.saturating_add(1);
        if req.kind.is_write() {
            cache.stats.write_access = cache.stats.write_access.saturating_add(1);
        } else {
            cache.stats.read_access = cache.stats.read_access.saturating_add(1);
        }

        let index = cache.index_of(req.addr);
        let tag = cache.tag_of(req.addr);
        trace!(
            "{} send {:?} {:#x} index {} tag {:#x} offset {}",
            cache.level.as_str(),
            req.kind,
            req.addr,
            index,
            tag,
            cache.offset_of(req.addr)
        );

        let set = cache.sets.entry(index).or_default();
        if let Some(pos) = find_in_set(&cache.arena, set, tag) {
            let lid = set[pos];
            if !cache.arena.get(lid).lock {
                // Hit. Re-insert at the MRU end and fold in the write.
                set.remove(pos).expect("position just found");
                set.push_back(lid);
                let line = cache.arena.get_mut(lid);
                line.dirty = line.dirty || req.kind.is_write();
                let ready_at = clk + cache.hit_latency;
                trace!(
                    "{} hit {:#x}, completes at {}",
                    cache.level.as_str(),
                    req.addr,
                    ready_at
                );
                self.sys.push_hit(ready_at, req);
                return true;
            }
            // Tag present but the fill is still in flight: treat as a miss
            // and let the MSHR merge below pick it up.
        }

        cache.stats.total_miss = cache.stats.total_miss.saturating_add(1);
        if req.kind.is_write() {
            cache.stats.write_miss = cache.stats.write_miss.saturating_add(1);
        } else {
            cache.stats.read_miss = cache.stats.read_miss.saturating_add(1);
        }
        debug!("{} miss {:#x}", cache.level.as_str(), req.addr);

        let dirty = req.kind.is_write();
        // Write misses fetch-on-write: only READs travel downward.
        req.kind = ReqKind::Read;

        let aligned = cache.align(req.addr);
        if let Some(lid) = cache.mshr_lookup(aligned) {
            cache.stats.mshr_hits = cache.stats.mshr_hits.saturating_add(1);
            let line = cache.arena.get_mut(lid);
            line.dirty = line.dirty || dirty;
            return true;
        }

        if cache.mshr_entries.len() >= cache.mshr_entry_num {
            cache.stats.mshr_unavailable = cache.stats.mshr_unavailable.saturating_add(1);
            return false;
        }

        let set = cache.sets.get(&index).expect("set allocated above");
        if set.len() >= cache.assoc && set.iter().all(|&lid| cache.arena.get(lid).lock) {
            cache.stats.set_unavailable = cache.stats.set_unavailable.saturating_add(1);
            return false;
        }

        let Some(newline) = self.allocate_line(id, index, req.addr) else {
            return false;
        };

        let cache = &mut self.caches[id.0];
        cache.arena.get_mut(newline).dirty = dirty;
        cache.mshr_entries.push((aligned, newline));
        let hit_latency = cache.hit_latency;

        match cache.lower {
            Some(lower) => {
                if !self.send(lower, req.clone()) {
                    self.caches[id.0].retry_list.push(req);
                }
            }
            None => {
                // Last level: hand the miss to the memory side.
                self.sys.push_wait(clk + hit_latency, req);
            }
        }
        true
    }

    /// Moves the resident copy of `addr` to the MRU end and ORs in `dirty`,
    /// without touching the lock. Called when a higher level evicts a block
    /// that must stay resident here.
    fn refresh_lru_lower(&mut self, id: CacheId, addr: u64, dirty: bool) {
        let cache = &mut self.caches[id.0];
        let index = cache.index_of(addr);
        let tag = cache.tag_of(addr);
        let set = cache
            .sets
            .get_mut(&index)
            .expect("evicted block must be resident below");
        let pos = find_in_set(&cache.arena, set, tag)
            .expect("evicted block must be resident below");
        let lid = set.remove(pos).expect("position just found");
        set.push_back(lid);
        let line = cache.arena.get_mut(lid);
        line.dirty = line.dirty || dirty;
    }

    /// Drops the copy of `addr` here and in every cache above, returning
    /// the walk latency and whether any dropped copy was dirty. A dirty
    /// child doubles its contribution: its copy is written back through
    /// this level on the way down.
    fn invalidate(&mut self, id: CacheId, addr: u64) -> (Cycle, bool) {
        let (delay, local_dirty) = {
            let cache = &mut self.caches[id.0];
            let delay = cache.invalidate_latency;
            let index = cache.index_of(addr);
            let tag = cache.tag_of(addr);
            let Some(set) = cache.sets.get_mut(&index) else {
                return (delay, false);
            };
            let Some(pos) = find_in_set(&cache.arena, set, tag) else {
                // Not resident here, so nothing above holds it either.
                return (delay, false);
            };
            let lid = set[pos];
            let line = *cache.arena.get(lid);
            assert!(!line.lock, "invalidating a line with a fill in flight");
            set.remove(pos).expect("position just found");
            cache.arena.remove(lid);
            debug!("{} invalidate {:#x}", cache.level.as_str(), addr);
            (delay, line.dirty)
        };

        let higher = self.caches[id.0].higher.clone();
        if higher.is_empty() {
            return (delay, local_dirty);
        }
        let mut dirty = local_dirty;
        let mut max_delay = delay;
        for hc in higher {
            let (child_delay, child_dirty) = self.invalidate(hc, addr);
            let factor = if child_dirty { 2 } else { 1 };
            max_delay = max_delay.max(delay + child_delay * factor);
            dirty = dirty || child_dirty;
        }
        (max_delay, dirty)
    }

    fn evict(&mut self, id: CacheId, index: u64, victim: LineId) {
        let (addr, mut dirty, level, invalidate_latency, hit_latency, lower, higher) = {
            let cache = &mut self.caches[id.0];
            cache.stats.evictions = cache.stats.evictions.saturating_add(1);
            let line = *cache.arena.get(victim);
            (
                line.addr,
                line.dirty,
                cache.level,
                cache.invalidate_latency,
                cache.hit_latency,
                cache.lower,
                cache.higher.clone(),
            )
        };
        debug!("{} evict {:#x}", level.as_str(), addr);

        // The victim must vanish from every cache above before it can
        // leave this level.
        let mut invalidate_time: Cycle = 0;
        for hc in higher {
            let (child_delay, child_dirty) = self.invalidate(hc, addr);
            let writeback = if child_dirty { invalidate_latency } else { 0 };
            invalidate_time = invalidate_time.max(child_delay + writeback);
            dirty = dirty || child_dirty;
        }

        match lower {
            Some(lower) => {
                // Inclusive below: keep the lower copy, refresh its LRU
                // slot and dirty bit.
                self.refresh_lru_lower(lower, addr, dirty);
            }
            None => {
                if dirty {
                    let ready_at = self.sys.clk + invalidate_time + hit_latency;
                    debug!(
                        "{} writeback {:#x}, enters memory queue at {}",
                        level.as_str(),
                        addr,
                        ready_at
                    );
                    self.sys.push_wait(ready_at, Request::writeback(addr));
                }
            }
        }

        let cache = &mut self.caches[id.0];
        let set = cache.sets.get_mut(&index).expect("victim set exists");
        let pos = set
            .iter()
            .position(|&lid| lid == victim)
            .expect("victim still in its set");
        set.remove(pos).expect("position just found");
        cache.arena.remove(victim);
    }

    fn need_eviction(&self, id: CacheId, index: u64, addr: u64) -> bool {
        let cache = &self.caches[id.0];
        let tag = cache.tag_of(addr);
        match cache.sets.get(&index) {
            Some(set) => {
                assert!(
                    find_in_set(&cache.arena, set, tag).is_none(),
                    "allocating a tag already resident; outstanding misses must merge in the MSHR"
                );
                set.len() >= cache.assoc
            }
            None => false,
        }
    }

    /// LRU allocation: evict the front-most line that is unlocked here and
    /// unlocked (or absent) in every higher cache, then append a fresh
    /// locked line at the MRU end. `None` means no line could be freed.
    fn allocate_line(&mut self, id: CacheId, index: u64, addr: u64) -> Option<LineId> {
        if self.need_eviction(id, index, addr) {
            let candidates: Vec<LineId> = self.caches[id.0]
                .sets
                .get(&index)
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default();
            let higher = self.caches[id.0].higher.clone();
            let mut victim = None;
            'candidates: for lid in candidates {
                let line = *self.caches[id.0].arena.get(lid);
                if line.lock {
                    continue;
                }
                for &hc in &higher {
                    if !self.check_unlock(hc, line.addr) {
                        continue 'candidates;
                    }
                }
                victim = Some(lid);
                break;
            }
            self.evict(id, index, victim?);
        }

        let cache = &mut self.caches[id.0];
        let lid = cache
            .arena
            .insert(Line::new(cache.align(addr), cache.tag_of(addr)));
        cache.sets.entry(index).or_default().push_back(lid);
        Some(lid)
    }

    /// Whether `addr` is unlocked (or absent) here and everywhere above.
    fn check_unlock(&self, id: CacheId, addr: u64) -> bool {
        let cache = &self.caches[id.0];
        let Some(set) = cache.sets.get(&cache.index_of(addr)) else {
            return true;
        };
        let Some(pos) = find_in_set(&cache.arena, set, cache.tag_of(addr)) else {
            return true;
        };
        if cache.arena.get(set[pos]).lock {
            return false;
        }
        cache.higher.iter().all(|&hc| self.check_unlock(hc, addr))
    }

    /// Fill completion from the level below (or from memory): unlock the
    /// line, retire the MSHR entry, and propagate upward.
    pub fn callback(&mut self, id: CacheId, req: &Request) {
        let cache = &mut self.caches[id.0];
        let aligned = cache.align(req.addr);
        if let Some(pos) = cache.mshr_entries.iter().position(|&(a, _)| a == aligned) {
            let (_, lid) = cache.mshr_entries.remove(pos);
            cache.arena.get_mut(lid).lock = false;
            trace!("{} fill {:#x}", cache.level.as_str(), aligned);
        }
        for hc in self.caches[id.0].higher.clone() {
            self.callback(hc, req);
        }
    }

    /// Memory finished `req`: run the fill callbacks up from every last
    /// level, then the request's own continuation.
    pub fn finish_fill(&mut self, req: &Request) {
        for id in 0..self.caches.len() {
            if self.caches[id].lower.is_none() {
                self.callback(CacheId(id), req);
            }
        }
        req.complete();
    }

    /// Whether any miss is still outstanding anywhere in the hierarchy.
    pub fn busy(&self) -> bool {
        self.sys.hit_len() > 0
            || self.sys.wait_len() > 0
            || self
                .caches
                .iter()
                .any(|c| !c.mshr_entries.is_empty() || !c.retry_list.is_empty())
    }

    /// Re-offers refused requests to the level below, walking the chain
    /// top-down. Stops before the last level, which has no lower cache to
    /// retry into.
    fn tick_cache(&mut self, id: CacheId) {
        let Some(lower) = self.caches[id.0].lower else {
            return;
        };
        if self.caches[lower.0].lower.is_some() {
            self.tick_cache(lower);
        }
        let retries = std::mem::take(&mut self.caches[id.0].retry_list);
        let mut remaining = Vec::new();
        for req in retries {
            if !self.send(lower, req.clone()) {
                remaining.push(req);
            }
        }
        let cache = &mut self.caches[id.0];
        remaining.extend(cache.retry_list.drain(..));
        cache.retry_list = remaining;
    }

    /// One global cycle: drain retry lists, advance the shared clock, hand
    /// ready misses to `send_memory`, and run hit completions.
    pub fn tick(&mut self, send_memory: impl FnMut(&Request) -> bool) {
        for id in 0..self.caches.len() {
            if self.caches[id].higher.is_empty() {
                self.tick_cache(CacheId(id));
            }
        }
        let completed = self.sys.tick(send_memory);
        for req in completed {
            req.complete();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ReqKind;
    use std::cell::Cell;
    use std::rc::Rc;

    fn level_config() -> CacheLevelConfig {
        CacheLevelConfig {
            size: 32768,
            assoc: 8,
            block_size: 64,
            mshr_entry_num: 16,
            hit_latency: 4,
            invalidate_latency: 4,
        }
    }

    fn three_level() -> (CacheHierarchy, CacheId, CacheId, CacheId) {
        let mut hier = CacheHierarchy::new();
        let l1 = hier.add_cache(CacheLevel::L1, &level_config());
        let l2 = hier.add_cache(
            CacheLevel::L2,
            &CacheLevelConfig {
                size: 262144,
                hit_latency: 12,
                invalidate_latency: 12,
                ..level_config()
            },
        );
        let l3 = hier.add_cache(
            CacheLevel::L3,
            &CacheLevelConfig {
                size: 2097152,
                hit_latency: 40,
                invalidate_latency: 40,
                ..level_config()
            },
        );
        hier.concat_lower(l1, l2);
        hier.concat_lower(l2, l3);
        (hier, l1, l2, l3)
    }

    fn read(addr: u64) -> Request {
        Request::new(addr, ReqKind::Read, 0)
    }

    fn write(addr: u64) -> Request {
        Request::new(addr, ReqKind::Write, 0)
    }

    /// Runs the memory side by hand: absorb everything the wait list
    /// offers and immediately run the fill callbacks.
    fn drain_memory(hier: &mut CacheHierarchy, cycles: u64) {
        for _ in 0..cycles {
            let mut arrived = Vec::new();
            hier.tick(|req| {
                arrived.push(req.clone());
                true
            });
            for req in arrived {
                hier.finish_fill(&req);
            }
        }
    }

    #[test]
    fn read_hit_after_fill() {
        let (mut hier, l1, _, _) = three_level();
        assert!(hier.send(l1, read(0x0)));
        drain_memory(&mut hier, 64);

        assert!(hier.send(l1, read(0x0)));
        let stats = hier.stats(l1);
        assert_eq!(stats.read_access, 2);
        assert_eq!(stats.read_miss, 1);
        assert_eq!(hier.sys.hit_len(), 1);
        let clk = hier.sys.clk;
        let (ready_at, _) = hier.sys.hits().front().expect("one hit queued");
        assert_eq!(*ready_at, clk + 4);
    }

    #[test]
    fn hit_completion_runs_continuation() {
        let (mut hier, l1, _, _) = three_level();
        assert!(hier.send(l1, read(0x40)));
        drain_memory(&mut hier, 64);

        let done = Rc::new(Cell::new(false));
        let done2 = done.clone();
        let req = read(0x40).with_callback(Rc::new(move |_: &Request| done2.set(true)));
        assert!(hier.send(l1, req));
        drain_memory(&mut hier, 8);
        assert!(done.get());
    }

    #[test]
    fn write_miss_merges_then_completes_dirty() {
        let (mut hier, l1, _, _) = three_level();
        assert!(hier.send(l1, write(0x100)));
        // The line is allocated and locked; a read to the same block merges.
        assert!(hier.send(l1, read(0x100)));
        assert_eq!(hier.stats(l1).mshr_hits, 1);
        assert_eq!(hier.caches[l1.0].mshr_entries.len(), 1);

        // Only READs travel downward on a write miss.
        assert_eq!(hier.stats(hier.caches[l1.0].lower.unwrap()).write_access, 0);

        drain_memory(&mut hier, 64);
        assert!(hier.caches[l1.0].mshr_entries.is_empty());
        let cache = &hier.caches[l1.0];
        let set = &cache.sets[&cache.index_of(0x100)];
        let lid = set[0];
        assert!(!cache.arena.get(lid).lock);
        assert!(cache.arena.get(lid).dirty);
    }

    #[test]
    fn mshr_full_backpressure() {
        let (mut hier, l1, _, _) = three_level();
        for i in 0..16u64 {
            assert!(hier.send(l1, read(i * 64)));
        }
        assert!(!hier.send(l1, read(16 * 64)));
        assert_eq!(hier.stats(l1).mshr_unavailable, 1);
        // The refused request was never forwarded.
        assert_eq!(hier.stats(hier.caches[l1.0].lower.unwrap()).total_access, 16);
    }

    #[test]
    fn llc_eviction_writes_back_dirty_victim() {
        // A lone last-level cache with one small set per victim address.
        let mut hier = CacheHierarchy::new();
        let llc = hier.add_cache(
            CacheLevel::L3,
            &CacheLevelConfig {
                size: 4096,
                assoc: 8,
                block_size: 64,
                mshr_entry_num: 16,
                hit_latency: 40,
                invalidate_latency: 40,
            },
        );
        let set_span = 64 * 8; // block_size * set_num

        for way in 0..8u64 {
            assert!(hier.send(llc, write(way * set_span)));
        }
        drain_memory(&mut hier, 64);

        let clk = hier.sys.clk;
        assert!(hier.send(llc, write(8 * set_span)));
        let wb: Vec<_> = hier
            .sys
            .waiting()
            .iter()
            .filter(|(_, req)| req.kind == ReqKind::Write)
            .collect();
        assert_eq!(wb.len(), 1);
        // No higher caches, so the walk contributes nothing.
        assert_eq!(wb[0].0, clk + 40);
        assert_eq!(wb[0].1.addr, 0x0);
        assert_eq!(hier.stats(llc).evictions, 1);
    }

    #[test]
    fn higher_eviction_keeps_lower_copies() {
        let mut hier = CacheHierarchy::new();
        let l1 = hier.add_cache(
            CacheLevel::L1,
            &CacheLevelConfig {
                size: 1024,
                assoc: 2,
                block_size: 64,
                mshr_entry_num: 16,
                hit_latency: 4,
                invalidate_latency: 4,
            },
        );
        let l2 = hier.add_cache(
            CacheLevel::L2,
            &CacheLevelConfig {
                size: 262144,
                hit_latency: 12,
                invalidate_latency: 12,
                ..level_config()
            },
        );
        hier.concat_lower(l1, l2);

        let set_span = 64 * 8; // L1: block_size * set_num
        assert!(hier.send(l1, read(0)));
        assert!(hier.send(l1, read(set_span)));
        drain_memory(&mut hier, 64);

        // Third block in the same L1 set evicts the clean LRU block.
        assert!(hier.send(l1, read(2 * set_span)));
        assert!(!hier.has_block(l1, 0));
        assert!(hier.has_block(l2, 0));
        assert_eq!(hier.stats(l1).evictions, 1);
    }

    #[test]
    fn inclusion_holds_after_fills() {
        let (mut hier, l1, l2, l3) = three_level();
        for i in 0..32u64 {
            assert!(hier.send(l1, read(i * 64)));
        }
        drain_memory(&mut hier, 128);
        for i in 0..32u64 {
            assert!(hier.has_block(l1, i * 64));
            assert!(hier.has_block(l2, i * 64));
            assert!(hier.has_block(l3, i * 64));
        }
    }

    #[test]
    fn locked_lines_match_mshr_entries() {
        let (mut hier, l1, _, _) = three_level();
        for i in 0..4u64 {
            assert!(hier.send(l1, read(i * 64)));
        }
        for id in 0..hier.caches.len() {
            let cache = &hier.caches[id];
            let locked: Vec<u64> = cache
                .sets
                .values()
                .flatten()
                .filter(|&&lid| cache.arena.get(lid).lock)
                .map(|&lid| cache.arena.get(lid).addr)
                .collect();
            let mshr: Vec<u64> = cache.mshr_entries.iter().map(|&(a, _)| a).collect();
            assert_eq!(locked.len(), mshr.len());
            for addr in locked {
                assert!(mshr.contains(&addr));
            }
        }
        drain_memory(&mut hier, 64);
        for cache in &hier.caches {
            assert!(cache.mshr_entries.is_empty());
            assert!(cache
                .sets
                .values()
                .flatten()
                .all(|&lid| !cache.arena.get(lid).lock));
        }
    }

    #[test]
    fn set_capacity_is_bounded() {
        let (mut hier, l1, _, _) = three_level();
        // 64 sets in L1; hammer one set far past its associativity.
        let set_span = 64 * 64;
        for i in 0..24u64 {
            hier.send(l1, read(i * set_span));
            drain_memory(&mut hier, 64);
        }
        for cache in &hier.caches {
            for set in cache.sets.values() {
                assert!(set.len() <= cache.assoc);
                let mut tags: Vec<u64> = set.iter().map(|&lid| cache.arena.get(lid).tag).collect();
                tags.sort_unstable();
                tags.dedup();
                assert_eq!(tags.len(), set.len(), "duplicate tags in a set");
            }
        }
    }

    #[test]
    fn refused_lower_send_lands_in_retry_list() {
        let mut hier = CacheHierarchy::new();
        let l1 = hier.add_cache(CacheLevel::L1, &level_config());
        // A lower level with a single MSHR refuses the second distinct miss.
        let l2 = hier.add_cache(
            CacheLevel::L2,
            &CacheLevelConfig {
                mshr_entry_num: 1,
                ..level_config()
            },
        );
        hier.concat_lower(l1, l2);

        assert!(hier.send(l1, read(0x000)));
        assert!(hier.send(l1, read(0x1000)));
        assert_eq!(hier.caches[l1.0].retry_list.len(), 1);
        assert_eq!(hier.stats(l2).mshr_unavailable, 1);

        // Complete the first fill; the retry then drains on a later tick.
        let mut arrived = Vec::new();
        hier.tick(|req| {
            arrived.push(req.clone());
            true
        });
        for _ in 0..64 {
            if arrived.is_empty() {
                hier.tick(|req| {
                    arrived.push(req.clone());
                    true
                });
                continue;
            }
            for req in arrived.drain(..) {
                hier.finish_fill(&req);
            }
            hier.tick(|_| true);
            if hier.caches[l1.0].retry_list.is_empty() {
                break;
            }
        }
        assert!(hier.caches[l1.0].retry_list.is_empty());
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn bad_geometry_is_fatal() {
        let mut hier = CacheHierarchy::new();
        hier.add_cache(
            CacheLevel::L1,
            &CacheLevelConfig {
                size: 3000,
                ..level_config()
            },
        );
    }
}
