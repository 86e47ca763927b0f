//! Process-wide resolution through `context()` and the C API.

use std::ffi::CStr;
use std::sync::atomic::Ordering;
use std::thread;

use glibcshim_abi::api::{self, glibcshim_last_error, glibcshim_resolve};
use glibcshim_abi::{catalog, context, foreign_tls, host, stdlib_abi, tls_abi};
use glibcshim_core::Origin;

const NAMES: &[&str] = &[
    "memcpy", "strlen", "strftime", "qsort_r", "open", "open64", "mq_send", "semop",
    "__errno_location", "sysconf", "getpid", "dlopen",
];

fn resolve_all() -> Vec<Option<usize>> {
    NAMES.iter().map(|n| context().resolve_address(n).ok()).collect()
}

#[test]
fn concurrent_resolution_matches_sequential() {
    let expected = resolve_all();
    assert!(expected.iter().all(Option::is_some), "{expected:?}");

    let results: Vec<_> = thread::scope(|s| {
        let workers: Vec<_> = (0..8)
            .map(|_| s.spawn(|| (0..50).map(|_| resolve_all()).collect::<Vec<_>>()))
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });
    for rounds in results {
        for round in rounds {
            assert_eq!(round, expected);
        }
    }
}

#[test]
fn origins_follow_catalog_precedence() {
    let r = context().resolve("qsort_r").unwrap();
    assert_eq!(r.origin, Origin::Wrapper);
    assert_eq!(r.addr as usize, stdlib_abi::qsort_r as *const () as usize);

    let r = context().resolve("memcpy").unwrap();
    assert_eq!(r.origin, Origin::PassThrough);
    assert_eq!(Some(r.addr), host::lookup("memcpy"));

    // Not in the catalog, but the host has it.
    let r = context().resolve("strspn").unwrap();
    assert_eq!(r.origin, Origin::Host);

    assert!(context().resolve("glibcshim_defined_nowhere").is_err());
}

#[test]
fn wrapper_addresses_agree_with_catalog_rows() {
    for entry in catalog().entries() {
        let Some(handler) = entry.handler else { continue };
        assert_eq!(context().resolve_address(entry.name).ok(), Some(handler), "{}", entry.name);
    }
}

#[test]
fn c_api_reports_failures_per_thread() {
    let p = unsafe { glibcshim_resolve(c"glibcshim_missing_here".as_ptr()) };
    assert!(p.is_null());
    let msg = unsafe { CStr::from_ptr(glibcshim_last_error()) }.to_string_lossy().into_owned();
    assert!(msg.contains("glibcshim_missing_here"));

    // Another thread has its own, empty, error slot.
    let other = thread::spawn(|| glibcshim_last_error().is_null()).join().unwrap();
    assert!(other);

    let stats = api::dump_catalog_stats();
    assert_eq!(stats, catalog().stats());
}

#[test]
fn stack_guard_is_per_thread_and_published_once() {
    // Building the catalog seeds the `__stack_chk_guard` data row.
    let row = catalog().lookup("__stack_chk_guard").and_then(|e| e.handler);
    assert_eq!(row, Some((&raw const tls_abi::STACK_CHK_GUARD) as usize));
    assert_ne!(tls_abi::STACK_CHK_GUARD.load(Ordering::Relaxed), 0);

    let guard = foreign_tls::stack_guard();
    assert_ne!(guard, 0);
    foreign_tls::set_stack_guard(0x1234_5678_9abc_de00);
    assert_eq!(foreign_tls::stack_guard(), 0x1234_5678_9abc_de00);
    let fresh = thread::spawn(foreign_tls::stack_guard).join().unwrap();
    assert_ne!(fresh, 0x1234_5678_9abc_de00);
    foreign_tls::set_stack_guard(guard);
}
