//! Integration tests: the `harness` binary end to end.
//!
//! Validates:
//! 1. `catalog-stats` writes a verifiable report whose counts add up.
//! 2. `resolve` reports origins and fails on undefined symbols.
//! 3. `inspect` and `load` agree on a synthetic image.

use std::path::PathBuf;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

use glibcshim_core::elf::RelocKind;
use glibcshim_core::elf::testing::ImageBuilder;
use glibcshim_harness::{CatalogReport, ImageReport, LoadReport, Report, ResolveReport};

fn unique_tmp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time should be after UNIX_EPOCH")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}-{}-{nanos}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn harness(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_harness"))
        .args(args)
        .args(["--timestamp", "fixed"])
        .env("GLIBCSHIM_LOG_LEVEL", "error")
        .output()
        .expect("run harness binary")
}

fn read_report<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Report<T> {
    let json = std::fs::read_to_string(path).expect("report written");
    serde_json::from_str(&json).expect("report parses")
}

#[test]
fn catalog_stats_report_is_self_consistent() {
    let dir = unique_tmp_dir("harness-catalog");
    let out = dir.join("catalog.json");
    let status = harness(&["catalog-stats", "--entries", "--output", out.to_str().unwrap()]);
    assert!(status.status.success(), "{}", String::from_utf8_lossy(&status.stderr));

    let report: Report<CatalogReport> = read_report(&out);
    assert!(report.verify());
    assert_eq!(report.kind, "catalog-stats");
    assert_eq!(report.timestamp, "fixed");
    let p = &report.payload;
    assert_eq!(p.total, p.wrappers + p.passthrough);
    assert_eq!(p.entries.len(), p.total);
    assert!(p.entries.windows(2).all(|w| w[0].name < w[1].name));
    assert!(p.entries.iter().any(|e| e.name == "strftime" && !e.passthrough));
}

#[test]
fn resolve_reports_origins_and_fails_on_missing() {
    let dir = unique_tmp_dir("harness-resolve");
    let out = dir.join("resolve.json");
    let ok = harness(&[
        "resolve",
        "memcpy",
        "qsort_r",
        "--no-addresses",
        "--output",
        out.to_str().unwrap(),
    ]);
    assert!(ok.status.success());
    let report: Report<ResolveReport> = read_report(&out);
    assert!(report.verify());
    let origins: Vec<_> = report.payload.symbols.iter().map(|s| s.origin.as_deref()).collect();
    assert_eq!(origins, vec![Some("pass-through"), Some("wrapper")]);
    assert!(report.payload.symbols.iter().all(|s| s.address.is_none()));

    // Same inputs, same digest.
    let again = dir.join("again.json");
    harness(&["resolve", "memcpy", "qsort_r", "--no-addresses", "--output", again.to_str().unwrap()]);
    assert_eq!(read_report::<ResolveReport>(&again).sha256, report.sha256);

    let missing = harness(&["resolve", "glibcshim_not_a_symbol"]);
    assert!(!missing.status.success());
    let stdout = String::from_utf8_lossy(&missing.stdout);
    assert!(stdout.contains("glibcshim_not_a_symbol"));
}

#[test]
fn inspect_and_load_describe_the_same_image() {
    let dir = unique_tmp_dir("harness-image");
    let lib = dir.join("libharness.so");
    let bytes = ImageBuilder::for_host()
        .soname("libharness.so")
        .needed("libc.so.6")
        .import("strftime")
        .got_reloc("strftime", RelocKind::JumpSlot)
        .export_data("harness_table", 64)
        .build();
    std::fs::write(&lib, bytes).unwrap();

    let inspect_out = dir.join("inspect.json");
    let run = harness(&["inspect", lib.to_str().unwrap(), "--output", inspect_out.to_str().unwrap()]);
    assert!(run.status.success(), "{}", String::from_utf8_lossy(&run.stderr));
    let inspected: Report<ImageReport> = read_report(&inspect_out);
    assert_eq!(inspected.payload.unresolved, 0);
    assert_eq!(inspected.payload.imports[0].binding, "wrapper");

    let load_out = dir.join("load.json");
    let run = harness(&["load", lib.to_str().unwrap(), "--output", load_out.to_str().unwrap()]);
    assert!(run.status.success(), "{}", String::from_utf8_lossy(&run.stderr));
    let loaded: Report<LoadReport> = read_report(&load_out);
    assert!(loaded.verify());
    assert!(loaded.payload.unloaded);
    assert_eq!(loaded.payload.modules.len(), 1);
    assert_eq!(loaded.payload.modules[0].blake3, inspected.payload.blake3);
    assert_eq!(loaded.payload.modules[0].soname.as_deref(), Some("libharness.so"));
}

#[test]
fn load_of_garbage_fails_cleanly() {
    let dir = unique_tmp_dir("harness-garbage");
    let lib = dir.join("libgarbage.so");
    std::fs::write(&lib, b"definitely not an ELF image").unwrap();
    let run = harness(&["load", lib.to_str().unwrap()]);
    assert!(!run.status.success());
    assert!(String::from_utf8_lossy(&run.stderr).contains("libgarbage.so"));
}
