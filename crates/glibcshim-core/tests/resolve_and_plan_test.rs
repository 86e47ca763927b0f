//! Integration test: catalog resolution feeding relocation planning.
//!
//! Builds synthetic shared objects and plans them through a `Resolver`
//! backed by a fake host, checking which origin each import resolves to and
//! where the plan writes it.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use glibcshim_core::elf::testing::ImageBuilder;
use glibcshim_core::elf::{ForeignImage, PatchOp, PlanContext, RelocKind, RelocationPlan};
use glibcshim_core::resolve::ForeignExport;
use glibcshim_core::{Catalog, Origin, Resolver, ShimError, SymbolSource, WrapperEntry};

const BIAS: u64 = 0x7f12_0000_0000;
const STRFTIME_HANDLER: usize = 0x5000_1000;

struct Host {
    symbols: HashMap<&'static str, u64>,
}

impl Host {
    fn new() -> Self {
        Self {
            symbols: HashMap::from([("memcpy", 0x4000_0010), ("strftime", 0x4000_0020), ("getpid", 0x4000_0030)]),
        }
    }
}

impl SymbolSource for Host {
    fn host_symbol(&self, name: &str) -> Option<u64> {
        self.symbols.get(name).copied()
    }

    fn foreign_symbol(&self, _name: &str) -> Option<ForeignExport> {
        None
    }
}

fn catalog() -> Catalog {
    Catalog::new(vec![
        WrapperEntry::passthrough("memcpy"),
        WrapperEntry::wrapper("strftime", STRFTIME_HANDLER),
    ])
}

fn got_value(plan: &RelocationPlan, offset: u64) -> Option<u64> {
    plan.ops.iter().find_map(|op| match op {
        PatchOp::Write { offset: o, value, .. } if *o == offset => Some(*value),
        _ => None,
    })
}

#[test]
fn passthrough_and_translated_imports() {
    let synthetic = ImageBuilder::for_host()
        .import("memcpy")
        .import("strftime")
        .got_reloc("memcpy", RelocKind::GlobDat)
        .got_reloc("strftime", RelocKind::JumpSlot)
        .build_image();
    let image = ForeignImage::parse(&synthetic.bytes, image_arch()).unwrap();

    let catalog = catalog();
    let host = Host::new();
    let resolver = Resolver::new(&catalog, &host);

    assert_eq!(resolver.resolve("memcpy").unwrap().origin, Origin::PassThrough);
    assert_eq!(resolver.resolve("strftime").unwrap().origin, Origin::Wrapper);

    let ctx = PlanContext {
        load_bias: BIAS,
        tls_module: None,
    };
    let plan = RelocationPlan::build(&image, ctx, &resolver).unwrap();
    let memcpy_slot = synthetic.got_slot("memcpy").unwrap();
    let strftime_slot = synthetic.got_slot("strftime").unwrap();
    assert_eq!(got_value(&plan, memcpy_slot), Some(0x4000_0010));
    assert_eq!(got_value(&plan, strftime_slot), Some(STRFTIME_HANDLER as u64));
}

#[test]
fn host_fallback_and_failure() {
    let catalog = catalog();
    let host = Host::new();
    let resolver = Resolver::new(&catalog, &host);

    let getpid = resolver.resolve("getpid").unwrap();
    assert_eq!(getpid.origin, Origin::Host);
    assert_eq!(
        resolver.resolve("no_such_symbol"),
        Err(ShimError::Resolution {
            symbol: "no_such_symbol".into()
        })
    );
}

#[test]
fn unresolved_mandatory_import_fails_whole_plan() {
    let synthetic = ImageBuilder::for_host()
        .import("memcpy")
        .import("definitely_missing")
        .got_reloc("memcpy", RelocKind::GlobDat)
        .got_reloc("definitely_missing", RelocKind::GlobDat)
        .build_image();
    let image = ForeignImage::parse(&synthetic.bytes, image_arch()).unwrap();
    let catalog = catalog();
    let host = Host::new();
    let resolver = Resolver::new(&catalog, &host);
    let ctx = PlanContext {
        load_bias: BIAS,
        tls_module: None,
    };
    let err = RelocationPlan::build(&image, ctx, &resolver).unwrap_err();
    let shim = ShimError::from_plan("synthetic.so", "GLOB_DAT", err);
    assert!(shim.to_string().contains("definitely_missing"), "{shim}");
}

#[test]
fn weak_import_is_tolerated() {
    let synthetic = ImageBuilder::for_host()
        .import_weak("optional_hook")
        .got_reloc("optional_hook", RelocKind::GlobDat)
        .build_image();
    let image = ForeignImage::parse(&synthetic.bytes, image_arch()).unwrap();
    let catalog = catalog();
    let host = Host::new();
    let resolver = Resolver::new(&catalog, &host);
    let plan = RelocationPlan::build(
        &image,
        PlanContext {
            load_bias: BIAS,
            tls_module: None,
        },
        &resolver,
    )
    .unwrap();
    assert_eq!(plan.weak_unresolved, ["optional_hook"]);
    assert_eq!(plan.stats.weak_unresolved, 1);
}

#[test]
fn concurrent_resolution_matches_sequential() {
    let catalog = Arc::new(catalog());
    let host = Arc::new(Host::new());
    let names = ["memcpy", "strftime", "getpid", "absent_a", "absent_b"];

    let sequential: Vec<_> = {
        let resolver = Resolver::new(&catalog, &*host);
        names.iter().map(|n| resolver.resolve(n)).collect()
    };

    let workers: Vec<_> = (0..8)
        .map(|i| {
            let catalog = Arc::clone(&catalog);
            let host = Arc::clone(&host);
            thread::spawn(move || {
                let resolver = Resolver::new(&catalog, &*host);
                let mut out = Vec::new();
                for round in 0..200 {
                    let n = names[(i + round) % names.len()];
                    out.push((n, resolver.resolve(n)));
                }
                out
            })
        })
        .collect();

    for worker in workers {
        for (name, result) in worker.join().unwrap() {
            let idx = names.iter().position(|n| *n == name).unwrap();
            assert_eq!(result, sequential[idx], "{name}");
        }
    }
}

fn image_arch() -> glibcshim_core::elf::Arch {
    glibcshim_core::elf::Arch::host().unwrap_or(glibcshim_core::elf::Arch::X86_64)
}
