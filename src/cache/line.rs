/// One resident cache line. `addr` is block-aligned; `lock` marks a fill
/// still in flight, which pins the line against eviction and invalidation.
#[derive(Debug, Clone, Copy)]
pub struct Line {
    pub addr: u64,
    pub tag: u64,
    pub lock: bool,
    pub dirty: bool,
}

impl Line {
    /// Newly allocated lines wait for their fill: locked, clean.
    pub fn new(addr: u64, tag: u64) -> Self {
        Self {
            addr,
            tag,
            lock: true,
            dirty: false,
        }
    }
}

/// Stable handle to a line in a [`LineArena`]. Survives insertions and
/// removals of other lines; resolving a handle whose line was freed trips
/// the generation check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineId {
    slot: u32,
    gen: u32,
}

#[derive(Debug)]
struct Slot {
    gen: u32,
    line: Option<Line>,
}

/// Generational arena backing every set of one cache. Plays the role the
/// source's `std::list<Line>` iterators played: an MSHR entry can hold a
/// `LineId` across arbitrary churn in the same set.
#[derive(Debug, Default)]
pub struct LineArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl LineArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, line: Line) -> LineId {
        match self.free.pop() {
            Some(slot) => {
                let entry = &mut self.slots[slot as usize];
                debug_assert!(entry.line.is_none());
                entry.line = Some(line);
                LineId {
                    slot,
                    gen: entry.gen,
                }
            }
            None => {
                let slot = self.slots.len() as u32;
                self.slots.push(Slot { gen: 0, line: Some(line) });
                LineId { slot, gen: 0 }
            }
        }
    }

    pub fn remove(&mut self, id: LineId) -> Line {
        let entry = &mut self.slots[id.slot as usize];
        assert_eq!(entry.gen, id.gen, "stale line handle");
        let line = entry.line.take().expect("line already freed");
        entry.gen = entry.gen.wrapping_add(1);
        self.free.push(id.slot);
        line
    }

    pub fn get(&self, id: LineId) -> &Line {
        let entry = &self.slots[id.slot as usize];
        assert_eq!(entry.gen, id.gen, "stale line handle");
        entry.line.as_ref().expect("line already freed")
    }

    pub fn get_mut(&mut self, id: LineId) -> &mut Line {
        let entry = &mut self.slots[id.slot as usize];
        assert_eq!(entry.gen, id.gen, "stale line handle");
        entry.line.as_mut().expect("line already freed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_survive_unrelated_churn() {
        let mut arena = LineArena::new();
        let a = arena.insert(Line::new(0x000, 0));
        let b = arena.insert(Line::new(0x040, 1));
        let c = arena.insert(Line::new(0x080, 2));
        arena.remove(b);
        let d = arena.insert(Line::new(0x0c0, 3));
        assert_eq!(arena.get(a).addr, 0x000);
        assert_eq!(arena.get(c).addr, 0x080);
        assert_eq!(arena.get(d).addr, 0x0c0);
    }

    #[test]
    fn slots_are_recycled_with_new_generation() {
        let mut arena = LineArena::new();
        let a = arena.insert(Line::new(0x000, 0));
        arena.remove(a);
        let b = arena.insert(Line::new(0x040, 1));
        assert_ne!(a, b);
        assert_eq!(arena.get(b).tag, 1);
    }

    #[test]
    #[should_panic(expected = "stale line handle")]
    fn stale_handle_is_rejected() {
        let mut arena = LineArena::new();
        let a = arena.insert(Line::new(0x000, 0));
        arena.remove(a);
        arena.insert(Line::new(0x040, 1));
        arena.get(a);
    }

    #[test]
    fn fresh_lines_start_locked_and_clean() {
        let line = Line::new(0x1000, 4);
        assert!(line.lock);
        assert!(!line.dirty);
    }
}
