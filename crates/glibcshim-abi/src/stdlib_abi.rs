//! ABI layer for `<stdlib.h>` and `<search.h>` entry points whose calling
//! convention or bookkeeping differs from the host: `qsort_r`, `twalk`,
//! `atexit`, `__cxa_atexit`, `__cxa_finalize`.

use std::cell::Cell;
use std::ffi::{c_int, c_void};
use std::sync::Once;

use glibcshim_core::exit::ExitHandler;
use glibcshim_runtime::{shim_debug, shim_warn};

use crate::context::context;
use crate::util::fail;

// ---------------------------------------------------------------------------
// qsort_r
// ---------------------------------------------------------------------------

/// glibc's comparator: `int (*)(const void *, const void *, void *)`.
pub type QsortRCompare = unsafe extern "C" fn(*const c_void, *const c_void, *mut c_void) -> c_int;

#[derive(Clone, Copy)]
struct SortContext {
    compare: QsortRCompare,
    arg: *mut c_void,
}

thread_local! {
    static SORT: Cell<Option<SortContext>> = const { Cell::new(None) };
    static WALK: Cell<Option<TwalkAction>> = const { Cell::new(None) };
}

unsafe extern "C" fn sort_adapter(a: *const c_void, b: *const c_void) -> c_int {
    match SORT.with(Cell::get) {
        // SAFETY: installed by `qsort_r` for the duration of the host sort.
        Some(ctx) => unsafe { (ctx.compare)(a, b, ctx.arg) },
        None => 0,
    }
}

/// Restores the previous context when dropped, which keeps nested sorts
/// (a comparator that itself sorts) correct.
struct Installed<T: Copy + 'static> {
    key: &'static std::thread::LocalKey<Cell<Option<T>>>,
    previous: Option<T>,
}

impl<T: Copy + 'static> Installed<T> {
    fn new(key: &'static std::thread::LocalKey<Cell<Option<T>>>, value: T) -> Self {
        let previous = key.with(|c| c.replace(Some(value)));
        Self { key, previous }
    }
}

impl<T: Copy + 'static> Drop for Installed<T> {
    fn drop(&mut self) {
        self.key.with(|c| c.set(self.previous));
    }
}

wrapper_fn! {
    fn qsort_r(
        base: *mut c_void,
        nmemb: usize,
        size: usize,
        compare: Option<QsortRCompare>,
        arg: *mut c_void,
    ) {
        let Some(compare) = compare else { return };
        if nmemb < 2 || size == 0 {
            return;
        }
        let _ctx = Installed::new(&SORT, SortContext { compare, arg });
        libc::qsort(base, nmemb, size, Some(sort_adapter));
    }
}

// ---------------------------------------------------------------------------
// twalk
// ---------------------------------------------------------------------------

/// `void (*)(const void *nodep, VISIT which, int depth)`.
pub type TwalkAction = unsafe extern "C" fn(*const c_void, c_int, c_int);

mod host_search {
    use std::ffi::{c_int, c_void};

    unsafe extern "C" {
        pub fn twalk(root: *const c_void, action: Option<unsafe extern "C" fn(*const c_void, c_int, c_int)>);
    }
}

unsafe extern "C" fn walk_adapter(node: *const c_void, which: c_int, depth: c_int) {
    if let Some(action) = WALK.with(Cell::get) {
        // SAFETY: installed by `twalk` for the duration of the host walk.
        unsafe { action(node, which, depth) };
    }
}

wrapper_fn! {
    fn twalk(root: *const c_void, action: Option<TwalkAction>) {
        let Some(action) = action else { return };
        let _ctx = Installed::new(&WALK, action);
        host_search::twalk(root, Some(walk_adapter));
    }
}

// ---------------------------------------------------------------------------
// Exit handlers
// ---------------------------------------------------------------------------

/// Call one foreign exit handler.
pub(crate) fn run_exit_handler(handler: ExitHandler) {
    match handler {
        ExitHandler::Plain { func } => {
            // SAFETY: registered through `atexit` as `void (*)(void)`.
            let f: extern "C" fn() = unsafe { std::mem::transmute(func) };
            f();
        }
        ExitHandler::Cxa { func, arg, .. } => {
            // SAFETY: registered through `__cxa_atexit` as `void (*)(void *)`.
            let f: extern "C" fn(*mut c_void) = unsafe { std::mem::transmute(func) };
            f(arg as *mut c_void);
        }
    }
}

extern "C" fn run_all_at_exit() {
    let ran = context().exit_handlers().finalize(None, run_exit_handler);
    if ran > 0 {
        shim_debug!("exit", "ran {ran} foreign exit handler(s)");
    }
}

fn register(handler: ExitHandler) -> c_int {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        // SAFETY: registers a plain Rust `extern "C"` function.
        if unsafe { libc::atexit(run_all_at_exit) } != 0 {
            shim_warn!("exit", "host atexit refused the shim's exit hook");
        }
    });
    match context().exit_handlers().register(handler) {
        Ok(()) => 0,
        Err(e) => {
            shim_warn!("exit", "{e}");
            fail(e.errno(), -1)
        }
    }
}

wrapper_fn! {
    fn atexit(func: Option<extern "C" fn()>) -> c_int {
        match func {
            Some(f) => register(ExitHandler::Plain { func: f as usize }),
            None => fail(libc::EINVAL, -1),
        }
    }
}

wrapper_fn! {
    fn __cxa_atexit(func: Option<extern "C" fn(*mut c_void)>, arg: *mut c_void, dso: *mut c_void) -> c_int {
        match func {
            Some(f) => register(ExitHandler::Cxa {
                func: f as usize,
                arg: arg as usize,
                dso: dso as usize,
            }),
            None => fail(libc::EINVAL, -1),
        }
    }
}

wrapper_fn! {
    /// Run the handlers registered for `dso`, or every handler when `dso` is
    /// null. Each entry runs once.
    fn __cxa_finalize(dso: *mut c_void) {
        let dso = (!dso.is_null()).then_some(dso as usize);
        context().exit_handlers().finalize(dso, run_exit_handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    unsafe extern "C" fn by_key(a: *const c_void, b: *const c_void, arg: *mut c_void) -> c_int {
        let (a, b) = unsafe { (*(a as *const i32), *(b as *const i32)) };
        let descending = unsafe { *(arg as *const bool) };
        let ord = a.cmp(&b) as c_int;
        if descending { -ord } else { ord }
    }

    #[test]
    fn qsort_r_passes_the_context_argument() {
        let mut v = [5, 1, 4, 2, 3];
        let mut descending = true;
        unsafe {
            qsort_r(
                v.as_mut_ptr().cast(),
                v.len(),
                4,
                Some(by_key),
                (&raw mut descending).cast(),
            )
        };
        assert_eq!(v, [5, 4, 3, 2, 1]);
        assert!(SORT.with(Cell::get).is_none());
    }

    unsafe extern "C" fn nested(a: *const c_void, b: *const c_void, arg: *mut c_void) -> c_int {
        let mut inner = [3, 2, 1];
        let mut asc = false;
        unsafe {
            qsort_r(inner.as_mut_ptr().cast(), 3, 4, Some(by_key), (&raw mut asc).cast());
        }
        assert_eq!(inner, [1, 2, 3]);
        unsafe { by_key(a, b, arg) }
    }

    #[test]
    fn nested_qsort_r_restores_outer_context() {
        let mut v = [2, 9, 7];
        let mut descending = true;
        unsafe { qsort_r(v.as_mut_ptr().cast(), 3, 4, Some(nested), (&raw mut descending).cast()) };
        assert_eq!(v, [9, 7, 2]);
    }

    static CALLS: AtomicUsize = AtomicUsize::new(0);

    extern "C" fn count(arg: *mut c_void) {
        CALLS.fetch_add(arg as usize, Ordering::SeqCst);
    }

    #[test]
    fn cxa_finalize_runs_matching_handlers_once() {
        let dso = 0xdead_0000usize as *mut c_void;
        unsafe {
            assert_eq!(__cxa_atexit(Some(count), 1 as *mut c_void, dso), 0);
            assert_eq!(__cxa_atexit(Some(count), 10 as *mut c_void, dso), 0);
            __cxa_finalize(dso);
            __cxa_finalize(dso);
        }
        assert_eq!(CALLS.load(Ordering::SeqCst), 11);
    }
}
