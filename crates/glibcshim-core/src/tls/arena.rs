//! Dynamic TLS arena layout.
//!
//! Every thread owns an arena of the same capacity. [`ArenaLayout`] is the
//! process-wide map of that capacity: one aligned slot per loaded module with
//! a `PT_TLS` segment, placed first-fit. Each slot carries a generation
//! number; a thread initializes its copy of a slot from the module's init
//! image the first time it touches that generation ([`ThreadArenaState`]).
//!
//! Module ids are never reused, so a descriptor that outlives its module
//! finds no slot and is pointed at zeroed scratch instead of another
//! module's data.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Resource, ShimError, ShimResult};

/// One module's region of every thread's arena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSlot {
    pub module_id: u64,
    pub offset: usize,
    pub size: usize,
    pub align: usize,
    pub generation: u64,
    /// Initialized prefix; the remaining `size - init.len()` bytes are zero.
    pub init: Arc<[u8]>,
}

impl TlsSlot {
    pub fn end(&self) -> usize {
        self.offset + self.size
    }
}

/// Process-wide slot map.
#[derive(Debug)]
pub struct ArenaLayout {
    capacity: usize,
    /// Sorted by offset.
    slots: Vec<TlsSlot>,
    next_module_id: u64,
    next_generation: u64,
}

impl ArenaLayout {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: Vec::new(),
            next_module_id: 1,
            next_generation: 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn used(&self) -> usize {
        self.slots.iter().map(|s| s.size).sum()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Reserve a slot for a new module. Fails with
    /// [`ShimError::CapacityExceeded`] when no gap is large enough; existing
    /// slots are never moved or overlapped.
    pub fn allocate(&mut self, size: usize, align: usize, init: &[u8]) -> ShimResult<TlsSlot> {
        let full = || ShimError::capacity(Resource::TlsArena, self.capacity);
        let align = align.max(1).checked_next_power_of_two().ok_or_else(full)?;
        let size = size.max(init.len()).max(1);
        if size > self.capacity {
            return Err(full());
        }

        // End of a slot placed at the first aligned offset from `cursor`.
        let fit = |cursor: usize| {
            let start = cursor.checked_next_multiple_of(align)?;
            Some((start, start.checked_add(size)?))
        };
        let mut cursor = 0usize;
        let mut insert_at = self.slots.len();
        let mut offset = None;
        for (i, slot) in self.slots.iter().enumerate() {
            if let Some((start, end)) = fit(cursor)
                && end <= slot.offset
            {
                offset = Some(start);
                insert_at = i;
                break;
            }
            cursor = slot.end();
        }
        let offset = match offset {
            Some(o) => o,
            None => match fit(cursor) {
                Some((start, end)) if end <= self.capacity => start,
                _ => return Err(full()),
            },
        };

        let slot = TlsSlot {
            module_id: self.next_module_id,
            offset,
            size,
            align,
            generation: self.next_generation,
            init: Arc::from(init),
        };
        self.next_module_id += 1;
        self.next_generation += 1;
        self.slots.insert(insert_at, slot.clone());
        Ok(slot)
    }

    /// Drop a module's slot; its bytes become available to later loads.
    pub fn release(&mut self, module_id: u64) -> Option<TlsSlot> {
        let pos = self.slots.iter().position(|s| s.module_id == module_id)?;
        Some(self.slots.remove(pos))
    }

    pub fn slot(&self, module_id: u64) -> Option<&TlsSlot> {
        self.slots.iter().find(|s| s.module_id == module_id)
    }

    pub fn slots(&self) -> &[TlsSlot] {
        &self.slots
    }
}

/// Outcome of a thread's access to `(module, offset)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locate {
    /// Address `arena + arena_offset`. When `initialize` is set the caller
    /// must first copy `slot.init` to `arena + slot.offset` and zero the tail.
    Live {
        arena_offset: usize,
        initialize: Option<TlsSlot>,
    },
    /// The module is gone (or the offset is outside its block).
    Orphaned,
}

/// Which slot generations this thread has initialized.
#[derive(Debug, Default)]
pub struct ThreadArenaState {
    seen: HashMap<u64, u64>,
}

impl ThreadArenaState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn locate(&mut self, layout: &ArenaLayout, module_id: u64, offset: u64) -> Locate {
        let Some(slot) = layout.slot(module_id) else {
            self.seen.remove(&module_id);
            return Locate::Orphaned;
        };
        let Ok(offset) = usize::try_from(offset) else {
            return Locate::Orphaned;
        };
        if offset >= slot.size {
            return Locate::Orphaned;
        }
        let initialize = match self.seen.insert(module_id, slot.generation) {
            Some(g) if g == slot.generation => None,
            _ => Some(slot.clone()),
        };
        Locate::Live {
            arena_offset: slot.offset + offset,
            initialize,
        }
    }

    /// Forget slots that no longer exist in `layout`.
    pub fn prune(&mut self, layout: &ArenaLayout) {
        self.seen.retain(|id, _| layout.slot(*id).is_some());
    }
}
