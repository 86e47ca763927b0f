//! A failed load leaves no mapping behind.
//!
//! Kept in its own test binary: the check reads `/proc/self/maps`, and a
//! concurrent load in the same process could reuse the released range.

use std::sync::{Arc, Mutex};

use glibcshim_abi::ShimContext;
use glibcshim_core::elf::RelocKind;
use glibcshim_core::elf::testing::ImageBuilder;
use glibcshim_runtime::{LogLevel, clear_sink, set_log_level, set_sink};

/// `(base, len)` of every "mapped ..." record logged by the loader.
fn mapped_ranges(lines: &[String]) -> Vec<(usize, usize)> {
    lines
        .iter()
        .filter_map(|line| {
            let rest = line.strip_prefix("mapped ")?;
            let (_, rest) = rest.rsplit_once(" at 0x")?;
            let (base, rest) = rest.split_once(" (+0x")?;
            let (len, _) = rest.split_once(')')?;
            Some((
                usize::from_str_radix(base, 16).ok()?,
                usize::from_str_radix(len, 16).ok()?,
            ))
        })
        .collect()
}

fn overlaps_live_mapping(base: usize, len: usize) -> bool {
    let maps = std::fs::read_to_string("/proc/self/maps").expect("procfs should be mounted");
    maps.lines().any(|line| {
        let Some((range, _)) = line.split_once(' ') else {
            return false;
        };
        let Some((start, end)) = range.split_once('-') else {
            return false;
        };
        let (Ok(start), Ok(end)) = (usize::from_str_radix(start, 16), usize::from_str_radix(end, 16)) else {
            return false;
        };
        start < base + len && base < end
    })
}

#[test]
fn unresolved_mandatory_import_unmaps_the_whole_session() {
    let dir = std::env::temp_dir().join(format!("glibcshim-rollback-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let dep = ImageBuilder::for_host()
        .soname("libpartial.so")
        .export_data("partial_value", 8)
        .build();
    std::fs::write(dir.join("libpartial.so"), dep).unwrap();
    let root = ImageBuilder::for_host()
        .soname("libunbound.so")
        .needed("libpartial.so")
        .import("partial_value")
        .got_reloc("partial_value", RelocKind::GlobDat)
        .import("glibcshim_nowhere_at_all")
        .got_reloc("glibcshim_nowhere_at_all", RelocKind::JumpSlot)
        .build();
    let root_path = dir.join("libunbound.so");
    std::fs::write(&root_path, root).unwrap();

    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink_lines = Arc::clone(&lines);
    set_log_level(LogLevel::Debug);
    set_sink(move |_level: LogLevel, tag: &str, message: &str| {
        if tag == "loader" {
            sink_lines.lock().unwrap().push(message.to_owned());
        }
    });

    let ctx = ShimContext::new();
    let err = ctx.load(&root_path);
    clear_sink();
    set_log_level(LogLevel::Info);

    let err = err.expect_err("the import is defined nowhere");
    assert!(err.to_string().contains("glibcshim_nowhere_at_all"), "{err}");
    assert_eq!(err.errno(), libc::ENOEXEC);
    assert!(ctx.enumerate_loaded().is_empty());

    let ranges = mapped_ranges(&lines.lock().unwrap());
    assert_eq!(ranges.len(), 2, "both modules were mapped before relocation");
    for (base, len) in ranges {
        assert!(
            !overlaps_live_mapping(base, len),
            "{base:#x}+{len:#x} still mapped after rollback"
        );
    }
}
