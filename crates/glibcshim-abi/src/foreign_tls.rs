//! Per-thread foreign state and the dynamic-module TLS arena.
//!
//! Each thread owns one [`ForeignTlsBlock`] in an ordinary Rust
//! thread-local. It is populated lazily the first time a wrapper needs it
//! (`NativeReady -> ForeignReady`). Wrappers copy the host's errno into it
//! after host calls; nothing keeps it synchronized continuously.
//!
//! The arena backs thread-local variables of modules loaded at runtime. The
//! slot layout is process-wide ([`ArenaLayout`]); the bytes are per thread,
//! allocated on first use and freed at thread exit.

use std::alloc::{self, Layout};
use std::cell::{Cell, RefCell, UnsafeCell};
use std::ffi::c_int;
use std::ptr::NonNull;
use std::sync::LazyLock;

use glibcshim_core::tls::ctype::{CLASS_TABLE, TABLE_BIAS, TOLOWER_TABLE, TOUPPER_TABLE};
use glibcshim_core::tls::{ArenaLayout, ForeignTlsBlock, Locate, ThreadArenaState, TlsSlot, TlsState};
use glibcshim_core::ShimResult;
use glibcshim_runtime::{config, shim_debug};
use parking_lot::RwLock;

use crate::{errno_abi, primitives};

const ARENA_ALIGN: usize = 4096;
const ORPHAN_LEN: usize = 4096;

thread_local! {
    static BLOCK: UnsafeCell<ForeignTlsBlock> = const { UnsafeCell::new(ForeignTlsBlock::new()) };
    static STATE: Cell<TlsState> = const { Cell::new(TlsState::Uninitialized) };
    static ARENA: RefCell<Option<ThreadArena>> = const { RefCell::new(None) };
    static ORPHAN: UnsafeCell<[u8; ORPHAN_LEN]> = const { UnsafeCell::new([0; ORPHAN_LEN]) };
}

static LAYOUT: LazyLock<RwLock<ArenaLayout>> =
    LazyLock::new(|| RwLock::new(ArenaLayout::new(config().tls_arena_bytes)));

// ---------------------------------------------------------------------------
// Foreign block
// ---------------------------------------------------------------------------

/// This thread's readiness. Any thread running Rust code has completed host
/// thread start-up, so the first query already reports `NativeReady`.
pub fn state() -> TlsState {
    STATE.with(|s| {
        let next = s.get().advance(TlsState::NativeReady);
        s.set(next);
        next
    })
}

/// This thread's block, populated on first use.
pub fn block() -> *mut ForeignTlsBlock {
    let ptr = BLOCK.with(UnsafeCell::get);
    if !state().is_foreign_ready() {
        // SAFETY: the block belongs to this thread and nothing else holds a
        // reference to it while it is filled in.
        unsafe { populate(&mut *ptr) };
        STATE.with(|s| s.set(s.get().advance(TlsState::ForeignReady)));
    }
    ptr
}

fn populate(block: &mut ForeignTlsBlock) {
    block.stack_guard = host_canary().unwrap_or_else(|| ForeignTlsBlock::canary_from_entropy(entropy()));
    block.pointer_guard = entropy();
    block.ctype_b = CLASS_TABLE[TABLE_BIAS..].as_ptr() as usize;
    block.ctype_tolower = TOLOWER_TABLE[TABLE_BIAS..].as_ptr() as usize;
    block.ctype_toupper = TOUPPER_TABLE[TABLE_BIAS..].as_ptr() as usize;
    let (full, short) = errno_abi::program_names();
    block.progname_full = full;
    block.progname = short;
    shim_debug!("tls", "foreign block ready, guard from {}", if host_canary().is_some() { "host" } else { "getrandom" });
}

/// The host's canary when it keeps one at the glibc offset from the thread
/// pointer.
fn host_canary() -> Option<u64> {
    if cfg!(target_arch = "x86_64") {
        let at = primitives::read_thread_pointer() + glibcshim_core::tls::STACK_GUARD_OFFSET;
        // SAFETY: x86_64 Linux C libraries place their thread control block
        // at the thread pointer with the canary at 0x28.
        Some(unsafe { (at as *const u64).read() })
    } else {
        None
    }
}

fn entropy() -> u64 {
    let mut buf = [0u8; 8];
    let mut filled = 0;
    while filled < buf.len() {
        // SAFETY: writes stay inside `buf`.
        let rc = unsafe {
            libc::getrandom(buf[filled..].as_mut_ptr().cast(), buf.len() - filled, 0)
        };
        match rc {
            n if n > 0 => filled += n as usize,
            _ if std::io::Error::last_os_error().raw_os_error() == Some(libc::EINTR) => {}
            _ => break,
        }
    }
    if filled == buf.len() {
        return u64::from_ne_bytes(buf);
    }
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos() as u64);
    nanos.rotate_left(17) ^ u64::from(std::process::id())
}

pub fn stack_guard() -> u64 {
    // SAFETY: per-thread block, see `block`.
    unsafe { (*block()).stack_guard }
}

pub fn set_stack_guard(value: u64) {
    unsafe { (*block()).stack_guard = value };
}

// ---------------------------------------------------------------------------
// errno
// ---------------------------------------------------------------------------

/// Address of this thread's foreign errno.
pub fn errno_location() -> *mut c_int {
    unsafe { &raw mut (*block()).errno }
}

pub fn errno() -> c_int {
    unsafe { *errno_location() }
}

/// Report `value` to foreign code.
pub fn set_errno(value: c_int) {
    unsafe { *errno_location() = value };
}

fn host_errno() -> c_int {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// Copy the host's errno after a host call, logging failures.
pub fn sync_errno() {
    let e = host_errno();
    if e != 0 {
        shim_debug!("errno", "host reported errno {e}");
    }
    set_errno(e);
}

/// Copy the host's errno without logging.
pub fn sync_errno_silent() {
    set_errno(host_errno());
}

/// [`sync_errno`] when `ret` signals failure (negative), otherwise the
/// silent variant.
pub fn sync_errno_if_fail(ret: i64) {
    if ret < 0 { sync_errno() } else { sync_errno_silent() }
}

// ---------------------------------------------------------------------------
// Dynamic TLS arena
// ---------------------------------------------------------------------------

struct ThreadArena {
    base: NonNull<u8>,
    capacity: usize,
    seen: ThreadArenaState,
}

impl ThreadArena {
    fn new(capacity: usize) -> Option<Self> {
        let layout = Layout::from_size_align(capacity.max(1), ARENA_ALIGN).ok()?;
        // SAFETY: non-zero size.
        let base = NonNull::new(unsafe { alloc::alloc_zeroed(layout) })?;
        Some(Self {
            base,
            capacity: layout.size(),
            seen: ThreadArenaState::new(),
        })
    }

    fn initialize(&mut self, slot: &TlsSlot) {
        if slot.end() > self.capacity {
            return;
        }
        // SAFETY: the slot lies inside the arena (checked above).
        unsafe {
            let dst = self.base.as_ptr().add(slot.offset);
            let init = slot.init.len().min(slot.size);
            std::ptr::copy_nonoverlapping(slot.init.as_ptr(), dst, init);
            std::ptr::write_bytes(dst.add(init), 0, slot.size - init);
        }
    }
}

impl Drop for ThreadArena {
    fn drop(&mut self) {
        if let Ok(layout) = Layout::from_size_align(self.capacity, ARENA_ALIGN) {
            // SAFETY: allocated in `new` with this layout.
            unsafe { alloc::dealloc(self.base.as_ptr(), layout) };
        }
    }
}

/// Reserve a slot in every thread's arena for a module's `PT_TLS` block.
pub(crate) fn reserve_slot(size: usize, align: usize, init: &[u8]) -> ShimResult<TlsSlot> {
    LAYOUT.write().allocate(size, align, init)
}

/// Give a module's slot back. Threads that touch it afterwards get zeroed
/// scratch.
pub(crate) fn release_slot(module_id: u64) {
    LAYOUT.write().release(module_id);
}

/// This thread's address of byte `offset` in `module_id`'s block.
pub fn arena_address(module_id: u64, offset: u64) -> usize {
    let layout = LAYOUT.read();
    let found = ARENA.try_with(|cell| {
        let mut arena = cell.borrow_mut();
        if arena.is_none() {
            *arena = ThreadArena::new(layout.capacity());
        }
        let arena = arena.as_mut()?;
        match arena.seen.locate(&layout, module_id, offset) {
            Locate::Live {
                arena_offset,
                initialize,
            } => {
                if let Some(slot) = initialize {
                    arena.initialize(&slot);
                }
                Some(arena.base.as_ptr() as usize + arena_offset)
            }
            Locate::Orphaned => None,
        }
    });
    found.ok().flatten().unwrap_or_else(orphan_scratch)
}

fn orphan_scratch() -> usize {
    ORPHAN.with(|page| {
        // SAFETY: per-thread page; zeroed so stale accesses read nothing.
        unsafe { (*page.get()).fill(0) };
        page.get() as usize
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use glibcshim_core::tls::STACK_GUARD_OFFSET;

    #[test]
    fn block_becomes_foreign_ready_on_first_use() {
        std::thread::spawn(|| {
            assert_eq!(state(), TlsState::NativeReady);
            let b = block();
            assert!(state().is_foreign_ready());
            let b = unsafe { &*b };
            assert!(b.ctype_ready());
            assert_ne!(b.stack_guard, 0);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn stack_guard_round_trips_at_fixed_offset() {
        set_stack_guard(0x1122_3344_5566_7700);
        assert_eq!(stack_guard(), 0x1122_3344_5566_7700);
        let raw = unsafe { (block() as *const u8).add(STACK_GUARD_OFFSET).cast::<u64>().read() };
        assert_eq!(raw, 0x1122_3344_5566_7700);
    }

    #[test]
    fn errno_is_per_thread() {
        set_errno(libc::ENOENT);
        std::thread::spawn(|| assert_eq!(errno(), 0)).join().unwrap();
        assert_eq!(errno(), libc::ENOENT);
    }

    #[test]
    fn arena_slot_initialized_per_thread() {
        let slot = reserve_slot(16, 8, &[7, 7, 7, 7]).unwrap();
        let id = slot.module_id;
        let here = arena_address(id, 0);
        assert_eq!(unsafe { (here as *const [u8; 6]).read() }, [7, 7, 7, 7, 0, 0]);
        unsafe { (here as *mut u8).write(9) };
        assert_eq!(arena_address(id, 0), here);
        assert_eq!(unsafe { (here as *const u8).read() }, 9);

        let other = std::thread::spawn(move || {
            let addr = arena_address(id, 0);
            unsafe { (addr as *const u8).read() }
        })
        .join()
        .unwrap();
        assert_eq!(other, 7);

        release_slot(id);
        let stale = arena_address(id, 0);
        assert_ne!(stale, here);
        assert_eq!(unsafe { (stale as *const u64).read() }, 0);
    }
}
