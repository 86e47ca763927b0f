//! The static wrapper catalog.
//!
//! Rows are grouped by header. A row with a handler names a function (or a
//! data object) in this crate; a pass-through row documents a glibc symbol
//! whose host definition is ABI-identical and is found by host lookup.

use std::ffi::{CString, c_char, c_void};
use std::sync::OnceLock;
use std::sync::atomic::Ordering;

use glibcshim_core::{Catalog, WrapperEntry};

use crate::{
    ctype_abi, dlfcn_abi, errno_abi, foreign_tls, io_abi, mqueue_abi, pthread_abi, signal_abi,
    socket_abi, stdlib_abi, string_abi, sysv_ipc_abi, time_abi, tls_abi, unistd_abi,
};

const PASSTHROUGH: &[&str] = &[
    // string.h
    "memcpy", "memmove", "memset", "memcmp", "memchr", "strlen", "strnlen", "strcmp",
    "strncmp", "strcpy", "strncpy", "strcat", "strncat", "strchr", "strrchr", "strstr",
    "strdup", "strndup", "strerror", "strtok_r", "strcasecmp", "strncasecmp",
    // stdlib.h
    "malloc", "calloc", "realloc", "free", "posix_memalign", "aligned_alloc", "abort", "exit",
    "_exit", "getenv", "setenv", "unsetenv", "qsort", "bsearch", "strtol", "strtoul",
    "strtoll", "strtoull", "strtod", "strtof", "atoi", "atol", "abs", "labs", "rand", "srand",
    // search.h
    "tsearch", "tfind", "tdelete",
    // stdio.h
    "printf", "fprintf", "snprintf", "vsnprintf", "puts", "fputs", "fopen", "fclose", "fread",
    "fwrite", "fflush", "fseek", "ftell",
    // unistd.h
    "read", "write", "close", "lseek", "dup", "dup2", "pipe", "getpid", "getppid", "usleep",
    "access", "unlink", "getcwd", "isatty",
    // sys/mman.h
    "mmap", "munmap", "mprotect",
    // time.h
    "time", "clock_gettime", "gettimeofday", "nanosleep", "localtime_r", "gmtime_r", "mktime",
    // pthread.h
    "pthread_create", "pthread_join", "pthread_detach", "pthread_self", "pthread_mutex_init",
    "pthread_mutex_lock", "pthread_mutex_unlock", "pthread_mutex_destroy", "pthread_cond_wait",
    "pthread_cond_signal", "pthread_cond_broadcast", "pthread_key_create",
    "pthread_getspecific", "pthread_setspecific", "pthread_once",
    // socket
    "bind", "listen", "connect", "accept", "send", "recv", "shutdown", "setsockopt",
    "getsockopt",
    // math
    "sin", "cos", "tan", "sqrt", "pow", "exp", "log", "floor", "ceil", "fabs", "fmod",
];

fn wrappers() -> Vec<WrapperEntry> {
    // Data rows must hold their values before foreign code can read them.
    errno_abi::program_names();
    tls_abi::STACK_CHK_GUARD.store(foreign_tls::stack_guard(), Ordering::Relaxed);

    macro_rules! w {
        ($name:literal => $f:path) => {
            WrapperEntry::wrapper($name, $f as *const () as usize)
        };
    }

    vec![
        // errno / ctype
        w!("__errno_location" => errno_abi::__errno_location),
        w!("__ctype_b_loc" => ctype_abi::__ctype_b_loc),
        w!("__ctype_tolower_loc" => ctype_abi::__ctype_tolower_loc),
        w!("__ctype_toupper_loc" => ctype_abi::__ctype_toupper_loc),
        WrapperEntry::wrapper(
            "program_invocation_name",
            (&raw const errno_abi::PROGRAM_INVOCATION_NAME) as usize,
        ),
        WrapperEntry::wrapper(
            "program_invocation_short_name",
            (&raw const errno_abi::PROGRAM_INVOCATION_SHORT_NAME) as usize,
        ),
        // fcntl.h
        w!("open" => io_abi::open),
        w!("open64" => io_abi::open),
        w!("openat" => io_abi::openat),
        w!("openat64" => io_abi::openat),
        w!("fcntl" => io_abi::fcntl),
        w!("fcntl64" => io_abi::fcntl),
        // sys/socket.h
        w!("socket" => socket_abi::socket),
        w!("socketpair" => socket_abi::socketpair),
        w!("accept4" => socket_abi::accept4),
        // stdlib.h / search.h
        w!("qsort_r" => stdlib_abi::qsort_r),
        w!("twalk" => stdlib_abi::twalk),
        w!("atexit" => stdlib_abi::atexit),
        w!("__cxa_atexit" => stdlib_abi::__cxa_atexit),
        w!("__cxa_finalize" => stdlib_abi::__cxa_finalize),
        // unistd.h
        w!("sysconf" => unistd_abi::sysconf),
        w!("__sysconf" => unistd_abi::sysconf),
        w!("capget" => unistd_abi::capget),
        w!("capset" => unistd_abi::capset),
        w!("name_to_handle_at" => unistd_abi::name_to_handle_at),
        w!("pthread_cancel" => pthread_abi::pthread_cancel),
        // signal.h
        w!("sigisemptyset" => signal_abi::sigisemptyset),
        w!("sigandset" => signal_abi::sigandset),
        w!("sigorset" => signal_abi::sigorset),
        // dlfcn.h
        w!("dlopen" => dlfcn_abi::dlopen),
        w!("dlsym" => dlfcn_abi::dlsym),
        w!("dlvsym" => dlfcn_abi::dlvsym),
        w!("dlclose" => dlfcn_abi::dlclose),
        w!("dlerror" => dlfcn_abi::dlerror),
        w!("dladdr" => dlfcn_abi::dladdr),
        // mqueue.h
        w!("mq_open" => mqueue_abi::mq_open),
        w!("mq_close" => mqueue_abi::mq_close),
        w!("mq_unlink" => mqueue_abi::mq_unlink),
        w!("mq_send" => mqueue_abi::mq_send),
        w!("mq_receive" => mqueue_abi::mq_receive),
        w!("mq_timedsend" => mqueue_abi::mq_timedsend),
        w!("mq_timedreceive" => mqueue_abi::mq_timedreceive),
        w!("mq_getattr" => mqueue_abi::mq_getattr),
        w!("mq_setattr" => mqueue_abi::mq_setattr),
        // sys/shm.h, sys/sem.h, sys/msg.h
        w!("shmget" => sysv_ipc_abi::shmget),
        w!("shmat" => sysv_ipc_abi::shmat),
        w!("shmdt" => sysv_ipc_abi::shmdt),
        w!("shmctl" => sysv_ipc_abi::shmctl),
        w!("semget" => sysv_ipc_abi::semget),
        w!("semop" => sysv_ipc_abi::semop),
        w!("semtimedop" => sysv_ipc_abi::semtimedop),
        w!("semctl" => sysv_ipc_abi::semctl),
        w!("msgget" => sysv_ipc_abi::msgget),
        w!("msgsnd" => sysv_ipc_abi::msgsnd),
        w!("msgrcv" => sysv_ipc_abi::msgrcv),
        w!("msgctl" => sysv_ipc_abi::msgctl),
        // time.h / string.h
        w!("strftime" => time_abi::strftime),
        w!("strftime_l" => time_abi::strftime_l),
        w!("__strftime_l" => time_abi::strftime_l),
        w!("strverscmp" => string_abi::strverscmp),
        // TLS and stack protection
        w!("__tls_get_addr" => tls_abi::__tls_get_addr),
        w!("__stack_chk_fail" => tls_abi::__stack_chk_fail),
        WrapperEntry::wrapper("__stack_chk_guard", (&raw const tls_abi::STACK_CHK_GUARD) as usize),
    ]
}

/// The process catalog, built on first use.
pub fn catalog() -> &'static Catalog {
    static CATALOG: OnceLock<Catalog> = OnceLock::new();
    CATALOG.get_or_init(|| {
        let mut entries = wrappers();
        entries.extend(PASSTHROUGH.iter().map(|&name| WrapperEntry::passthrough(name)));
        Catalog::new(entries)
    })
}

// ---------------------------------------------------------------------------
// C view
// ---------------------------------------------------------------------------

/// One `{name, handler}` row. The array ends with a row of two nulls.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CatalogRow {
    pub name: *const c_char,
    pub handler: *const c_void,
}

struct CView {
    _names: Vec<CString>,
    rows: Vec<CatalogRow>,
}

// SAFETY: read-only after construction; the pointers address `_names` and
// static handlers.
unsafe impl Send for CView {}
unsafe impl Sync for CView {}

/// The catalog as a sentinel-terminated C array.
pub fn c_rows() -> &'static [CatalogRow] {
    static VIEW: OnceLock<CView> = OnceLock::new();
    &VIEW
        .get_or_init(|| {
            let (names, mut rows): (Vec<CString>, Vec<CatalogRow>) = catalog()
                .entries()
                .iter()
                .filter_map(|e| {
                    let name = CString::new(e.name).ok()?;
                    let row = CatalogRow {
                        name: name.as_ptr(),
                        handler: e.handler.unwrap_or(0) as *const c_void,
                    };
                    Some((name, row))
                })
                .unzip();
            rows.push(CatalogRow {
                name: std::ptr::null(),
                handler: std::ptr::null(),
            });
            CView {
                _names: names,
                rows,
            }
        })
        .rows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_duplicate_names() {
        assert_eq!(catalog().duplicates(), Vec::<&str>::new());
    }

    #[test]
    fn translated_and_passthrough_rows() {
        let c = catalog();
        assert!(c.lookup("strftime").is_some_and(|e| !e.is_passthrough()));
        assert!(c.lookup("memcpy").is_some_and(WrapperEntry::is_passthrough));
        assert!(c.lookup("glibcshim_unknown").is_none());
        let stats = c.stats();
        assert_eq!(stats.total, stats.wrappers + stats.passthrough);
        assert!(stats.wrappers >= 50);
    }

    #[test]
    fn c_view_is_sentinel_terminated() {
        let rows = c_rows();
        assert_eq!(rows.len(), catalog().len() + 1);
        let last = rows[rows.len() - 1];
        assert!(last.name.is_null() && last.handler.is_null());
        let first = unsafe { std::ffi::CStr::from_ptr(rows[0].name) };
        assert_eq!(first.to_str().unwrap(), catalog().entries()[0].name);
    }

    #[test]
    fn every_c_row_carries_its_own_handler() {
        for row in &c_rows()[..c_rows().len() - 1] {
            let name = unsafe { std::ffi::CStr::from_ptr(row.name) }.to_str().unwrap();
            let entry = catalog().lookup(name).unwrap();
            assert_eq!(row.handler as usize, entry.handler.unwrap_or(0), "{name}");
        }
        let strftime = c_rows()
            .iter()
            .find(|r| !r.name.is_null() && unsafe { std::ffi::CStr::from_ptr(r.name) }.to_bytes() == b"strftime")
            .unwrap();
        assert_eq!(strftime.handler as usize, crate::time_abi::strftime as *const () as usize);
    }

    #[test]
    fn program_name_rows_point_at_live_strings() {
        let e = catalog().lookup("program_invocation_short_name").unwrap();
        let slot = e.handler.unwrap() as *const *const c_char;
        let name = unsafe { std::ffi::CStr::from_ptr(*slot) };
        assert!(!name.to_bytes().contains(&b'/'));
    }
}
