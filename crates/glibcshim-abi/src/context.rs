//! The loader: module registry, load sessions, unload and scoped lookup.
//!
//! A `load` call is one session. It runs in four phases:
//!
//! 1. **Discover and map.** The requested image and every foreign module
//!    it needs (depth first) are parsed, mapped read-write and given a TLS
//!    slot. A module already in the registry is only referenced; one seen
//!    earlier in the same session is reused, which makes cycles safe.
//! 2. **Relocate.** Each new module gets a [`RelocationPlan`] from core and
//!    has it applied, in reverse discovery order so dependencies go first.
//! 3. **Protect.** Final segment protections and RELRO.
//! 4. **Publish.** The modules enter the registry. The registry lock is
//!    released, and only then do initializers run, dependencies first.
//!
//! Until phase 4 nothing is reachable from outside the session. Dropping an
//! unfinished session unmaps every span it created, releases the TLS slots,
//! closes host libraries it opened and reverts reference-count bumps.

use std::collections::BTreeMap;
use std::ffi::{CString, c_char, c_int, c_void};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, OnceLock};

use glibcshim_core::elf::{
    Arch, ForeignImage, PatchOp, PlanContext, RelocationPlan, ResolvedSymbol, TlsBinding,
};
use glibcshim_core::error::Resource;
use glibcshim_core::exit::ExitHandlers;
use glibcshim_core::resolve::ForeignExport;
use glibcshim_core::translate::dlfcn::{DlopenMode, is_runtime_library};
use glibcshim_core::{Resolution, Resolver, ShimError, ShimResult, SymbolSource};
use glibcshim_runtime::{config, shim_debug, shim_error, shim_info, shim_trace, shim_warn};
use parking_lot::RwLock;

use crate::catalog::catalog;
use crate::mapping::{self, MappedSpan};
use crate::primitives::{self, TlsDescArg};
use crate::{foreign_tls, host};

/// Registry capacity.
pub const MAX_MODULES: usize = 512;

const DF_1_NODELETE: u64 = 0x8;

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Foreign handles are odd; host `dlopen` handles are aligned pointers and
/// therefore even.
pub fn is_foreign_handle(handle: usize) -> bool {
    handle & 1 == 1
}

fn handle_of(id: u64) -> usize {
    ((id as usize) << 1) | 1
}

fn id_of(handle: usize) -> Option<u64> {
    is_foreign_handle(handle).then_some((handle >> 1) as u64)
}

// ---------------------------------------------------------------------------
// Modules
// ---------------------------------------------------------------------------

/// A host library a foreign module needs.
#[derive(Debug)]
struct HostLibrary(*mut c_void);

// SAFETY: host dlopen handles are process-wide tokens.
unsafe impl Send for HostLibrary {}
unsafe impl Sync for HostLibrary {}

impl Drop for HostLibrary {
    fn drop(&mut self) {
        host::close(self.0);
    }
}

#[derive(Debug)]
struct ForeignModule {
    id: u64,
    path: PathBuf,
    image: ForeignImage,
    load_bias: u64,
    tls_module: Option<u64>,
    /// Foreign modules this one holds a reference on.
    deps: Vec<u64>,
    refcount: usize,
    nodelete: bool,
    relocated: bool,
    // Dropped in this order: the image memory goes before the descriptor
    // arguments it points at, and host libraries close last.
    span: MappedSpan,
    tlsdesc_args: Vec<Box<TlsDescArg>>,
    host_deps: Vec<HostLibrary>,
}

impl ForeignModule {
    fn handle(&self) -> usize {
        handle_of(self.id)
    }

    fn soname(&self) -> Option<&str> {
        self.image.soname.as_deref()
    }

    fn name(&self) -> String {
        self.path.display().to_string()
    }

    /// An export by name, with IFUNC exports resolved once the module is
    /// relocated.
    fn export(&self, name: &str) -> Option<ResolvedSymbol> {
        let (_, sym) = self.image.find_export(name)?;
        if sym.is_tls() {
            return Some(ResolvedSymbol {
                addr: 0,
                tls: Some(TlsBinding {
                    module_id: self.tls_module?,
                    offset: sym.st_value,
                }),
            });
        }
        let addr = self.load_bias.wrapping_add(sym.st_value);
        if sym.is_ifunc() {
            if !self.relocated {
                return None;
            }
            // SAFETY: the resolver is code inside this relocated module.
            let resolver: extern "C" fn() -> usize = unsafe { std::mem::transmute(addr as usize) };
            return Some(ResolvedSymbol::at(resolver() as u64));
        }
        Some(ResolvedSymbol::at(addr))
    }

    /// A relocated `DT_INIT_ARRAY`/`DT_FINI_ARRAY`, read from the mapping.
    fn function_array(&self, vaddr: Option<u64>, size: u64) -> Vec<usize> {
        let Some(vaddr) = vaddr else {
            return Vec::new();
        };
        let start = self.load_bias.wrapping_add(vaddr) as usize;
        let count = (size / 8) as usize;
        let last = count
            .checked_mul(8)
            .and_then(|len| start.checked_add(len.checked_sub(1)?));
        let Some(last) = last else {
            return Vec::new();
        };
        if !self.span.contains(start) || !self.span.contains(last) {
            return Vec::new();
        }
        (0..count)
            // SAFETY: inside the span (checked above).
            .map(|i| unsafe { ((start + i * 8) as *const usize).read_unaligned() })
            .filter(|&f| f != 0 && f != usize::MAX)
            .collect()
    }

    fn initializers(&self) -> Vec<usize> {
        let dynamic = &self.image.dynamic;
        let mut fns: Vec<usize> = dynamic
            .init
            .map(|f| self.load_bias.wrapping_add(f) as usize)
            .into_iter()
            .collect();
        fns.extend(self.function_array(dynamic.init_array, dynamic.init_arraysz));
        fns
    }

    fn finalizers(&self) -> Vec<usize> {
        let dynamic = &self.image.dynamic;
        let mut fns = self.function_array(dynamic.fini_array, dynamic.fini_arraysz);
        fns.reverse();
        fns.extend(dynamic.fini.map(|f| self.load_bias.wrapping_add(f) as usize));
        fns
    }
}

impl Drop for ForeignModule {
    fn drop(&mut self) {
        if let Some(module_id) = self.tls_module {
            foreign_tls::release_slot(module_id);
        }
    }
}

/// Introspection record for one loaded module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    pub handle: usize,
    pub path: PathBuf,
    pub soname: Option<String>,
    pub base: usize,
    pub load_bias: u64,
    pub map_size: usize,
    pub tls_slot: Option<u64>,
    pub refcount: usize,
    /// blake3 of the image file, hex.
    pub digest: String,
}

// ---------------------------------------------------------------------------
// Registry and symbol scope
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Registry {
    /// Keyed by id, which is also load order.
    modules: BTreeMap<u64, ForeignModule>,
    next_id: u64,
}

impl Registry {
    fn find(&self, path: &Path, soname: Option<&str>) -> Option<u64> {
        self.modules
            .values()
            .find(|m| m.path == path || (soname.is_some() && m.soname() == soname))
            .map(|m| m.id)
    }
}

/// Symbol source over the host, the registry and, during a load, the
/// modules of the session.
struct Scope<'a> {
    registry: &'a Registry,
    pending: &'a [ForeignModule],
}

impl SymbolSource for Scope<'_> {
    fn host_symbol(&self, name: &str) -> Option<u64> {
        host::lookup(name)
    }

    fn foreign_symbol(&self, name: &str) -> Option<ForeignExport> {
        self.registry
            .modules
            .values()
            .chain(self.pending.iter())
            .find_map(|m| {
                m.export(name).map(|symbol| ForeignExport {
                    handle: m.handle() as u64,
                    symbol,
                })
            })
    }
}

// ---------------------------------------------------------------------------
// ShimContext
// ---------------------------------------------------------------------------

/// Process-wide loader state.
#[derive(Debug)]
pub struct ShimContext {
    arch: Option<Arch>,
    registry: RwLock<Registry>,
    exit_handlers: ExitHandlers,
}

impl Default for ShimContext {
    fn default() -> Self {
        Self::new()
    }
}

/// The process context.
pub fn context() -> &'static ShimContext {
    static CONTEXT: LazyLock<ShimContext> = LazyLock::new(ShimContext::new);
    &CONTEXT
}

impl ShimContext {
    pub fn new() -> Self {
        Self {
            arch: Arch::host(),
            registry: RwLock::new(Registry {
                modules: BTreeMap::new(),
                next_id: 1,
            }),
            exit_handlers: ExitHandlers::default(),
        }
    }

    pub fn exit_handlers(&self) -> &ExitHandlers {
        &self.exit_handlers
    }

    /// Resolve `name` against the catalog, loaded modules and the host.
    pub fn resolve(&self, name: &str) -> ShimResult<Resolution> {
        let registry = self.registry.read();
        let scope = Scope {
            registry: &registry,
            pending: &[],
        };
        Resolver::new(catalog(), &scope).resolve(name)
    }

    /// Address foreign code should call or read for `name`. Thread-local
    /// exports resolve to this thread's copy.
    pub fn resolve_address(&self, name: &str) -> ShimResult<usize> {
        let r = self.resolve(name)?;
        Ok(match r.tls {
            Some(b) => foreign_tls::arena_address(b.module_id, b.offset),
            None => r.addr as usize,
        })
    }

    /// Load `path` and everything it needs. Returns an odd handle.
    pub fn load(&self, path: &Path) -> ShimResult<usize> {
        self.load_with(path, DlopenMode {
            now: true,
            ..DlopenMode::default()
        })
    }

    pub fn load_with(&self, path: &Path, mode: DlopenMode) -> ShimResult<usize> {
        let arch = self.arch.ok_or(ShimError::Unsupported {
            feature: "foreign images on this architecture",
        })?;
        let mut registry = self.registry.write();
        let mut session = Session {
            registry: &mut *registry,
            arch,
            pending: Vec::new(),
            bumped: Vec::new(),
            foreign_code_ran: false,
        };
        let root = session.open(path)?;
        session.relocate_all()?;
        session.protect_all()?;
        if mode.nodelete
            && let Some(m) = session.module_mut(root)
        {
            m.nodelete = true;
        }
        let inits = session.publish();
        drop(registry);

        for (name, fns) in inits {
            shim_debug!("loader", "running {} initializer(s) of {name}", fns.len());
            for f in fns {
                run_init(f);
            }
        }
        shim_info!("loader", "loaded {} as {:#x}", path.display(), handle_of(root));
        Ok(handle_of(root))
    }

    /// `RTLD_NOLOAD`: a new reference to an already-loaded module.
    pub fn reference(&self, path: &Path) -> Option<usize> {
        let canonical = std::fs::canonicalize(path).ok();
        let base = path.file_name().and_then(|n| n.to_str());
        let mut registry = self.registry.write();
        let id = registry
            .modules
            .values()
            .find(|m| Some(&m.path) == canonical.as_ref() || (base.is_some() && m.soname() == base))
            .map(|m| m.id)?;
        let m = registry.modules.get_mut(&id)?;
        m.refcount += 1;
        Some(m.handle())
    }

    /// Drop one reference. At zero the module's finalizers run, its
    /// `__cxa_atexit` handlers are drained, its TLS slot is released and its
    /// memory unmapped; then its dependencies are released the same way.
    pub fn unload(&self, handle: usize) -> ShimResult<()> {
        let root = id_of(handle).ok_or_else(|| invalid_handle(handle))?;
        if !self.registry.read().modules.contains_key(&root) {
            return Err(invalid_handle(handle));
        }
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let module = {
                let mut registry = self.registry.write();
                let Some(m) = registry.modules.get_mut(&id) else {
                    continue;
                };
                m.refcount = m.refcount.saturating_sub(1);
                if m.refcount > 0 || m.nodelete {
                    continue;
                }
                registry.modules.remove(&id)
            };
            let Some(mut module) = module else { continue };
            let name = module.name();
            for f in module.finalizers() {
                run_fini(f);
            }
            let drained = self
                .exit_handlers
                .finalize_range(module.span.range(), crate::stdlib_abi::run_exit_handler);
            if drained > 0 {
                shim_debug!("loader", "{name}: ran {drained} exit handler(s)");
            }
            stack.extend(std::mem::take(&mut module.deps));
            drop(module);
            shim_info!("loader", "unloaded {name}");
        }
        Ok(())
    }

    /// Look `name` up among one module's exports only.
    pub fn dlsym_from_handle(&self, handle: usize, name: &str) -> ShimResult<usize> {
        let id = id_of(handle).ok_or_else(|| invalid_handle(handle))?;
        let registry = self.registry.read();
        let module = registry.modules.get(&id).ok_or_else(|| invalid_handle(handle))?;
        let sym = module.export(name).ok_or_else(|| ShimError::resolution(name))?;
        Ok(match sym.tls {
            Some(b) => foreign_tls::arena_address(b.module_id, b.offset),
            None => sym.addr as usize,
        })
    }

    pub fn is_loaded(&self, handle: usize) -> bool {
        id_of(handle).is_some_and(|id| self.registry.read().modules.contains_key(&id))
    }

    /// Snapshot of the registry, in load order.
    pub fn enumerate_loaded(&self) -> Vec<ModuleInfo> {
        self.registry
            .read()
            .modules
            .values()
            .map(|m| ModuleInfo {
                handle: m.handle(),
                path: m.path.clone(),
                soname: m.image.soname.clone(),
                base: m.span.base(),
                load_bias: m.load_bias,
                map_size: m.span.len(),
                tls_slot: m.tls_module,
                refcount: m.refcount,
                digest: m.image.digest_hex(),
            })
            .collect()
    }

    /// The loaded module whose mapping contains `addr`.
    pub fn module_containing(&self, addr: usize) -> Option<usize> {
        self.registry
            .read()
            .modules
            .values()
            .find(|m| m.span.contains(addr))
            .map(ForeignModule::handle)
    }
}

fn invalid_handle(handle: usize) -> ShimError {
    ShimError::load(format!("{handle:#x}"), "not a loaded foreign module")
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

struct Session<'r> {
    registry: &'r mut Registry,
    arch: Arch,
    /// New modules in discovery order.
    pending: Vec<ForeignModule>,
    /// Registry modules this session added a reference to.
    bumped: Vec<u64>,
    foreign_code_ran: bool,
}

impl Session<'_> {
    fn module_mut(&mut self, id: u64) -> Option<&mut ForeignModule> {
        if let Some(m) = self.pending.iter_mut().find(|m| m.id == id) {
            return Some(m);
        }
        self.registry.modules.get_mut(&id)
    }

    /// Take a reference on a module that is already loaded or loading.
    fn reuse(&mut self, path: &Path, soname: Option<&str>) -> Option<u64> {
        if let Some(m) = self
            .pending
            .iter_mut()
            .find(|m| m.path == path || (soname.is_some() && m.soname() == soname))
        {
            m.refcount += 1;
            return Some(m.id);
        }
        let id = self.registry.find(path, soname)?;
        if let Some(m) = self.registry.modules.get_mut(&id) {
            m.refcount += 1;
            self.bumped.push(id);
        }
        Some(id)
    }

    /// Phase 1 for `path` and, recursively, its needed modules.
    fn open(&mut self, path: &Path) -> ShimResult<u64> {
        let name = path.display().to_string();
        let canonical = std::fs::canonicalize(path).map_err(|e| ShimError::load(&name, e))?;
        if let Some(id) = self.reuse(&canonical, None) {
            return Ok(id);
        }

        let data = std::fs::read(&canonical).map_err(|e| ShimError::load(&name, e))?;
        let image = ForeignImage::parse(&data, self.arch).map_err(|e| ShimError::load(&name, e))?;
        if image.soname.is_some()
            && let Some(id) = self.reuse(&canonical, image.soname.as_deref())
        {
            return Ok(id);
        }
        if self.registry.modules.len() + self.pending.len() >= MAX_MODULES {
            return Err(ShimError::capacity(Resource::LoadedModules, MAX_MODULES));
        }

        let (span, load_bias) = mapping::map_image(&image, &data).map_err(|e| e.into_shim(&name))?;
        let id = self.registry.next_id;
        self.registry.next_id += 1;
        let nodelete = image.dynamic.flags_1 & DF_1_NODELETE != 0;
        let mut module = ForeignModule {
            id,
            path: canonical.clone(),
            image,
            load_bias,
            tls_module: None,
            deps: Vec::new(),
            refcount: 1,
            nodelete,
            relocated: false,
            span,
            tlsdesc_args: Vec::new(),
            host_deps: Vec::new(),
        };
        shim_debug!(
            "loader",
            "mapped {name} at {:#x} (+{:#x}), bias {load_bias:#x}",
            module.span.base(),
            module.span.len()
        );
        if let Some(tls) = &module.image.tls {
            let slot = foreign_tls::reserve_slot(tls.size as usize, tls.align as usize, &tls.init_image)
                .map_err(|e| {
                    shim_warn!("loader", "{name}: {e}");
                    e
                })?;
            module.tls_module = Some(slot.module_id);
        }
        let needed = module.image.needed.clone();
        let search = search_dirs(&canonical, &module.image.runpath);
        self.pending.push(module);

        for dep in needed {
            if is_runtime_library(&dep) {
                shim_trace!("loader", "{name}: {dep} is provided by the host runtime");
                continue;
            }
            if let Some(dep_id) = self.reuse(Path::new(&dep), Some(&dep)) {
                self.add_dep(id, dep_id);
                continue;
            }
            match search.iter().map(|d| d.join(&dep)).find(|p| p.is_file()) {
                Some(found) => {
                    let dep_id = self.open(&found)?;
                    self.add_dep(id, dep_id);
                }
                None => {
                    let mode = DlopenMode {
                        now: true,
                        global: true,
                        ..DlopenMode::default()
                    };
                    let handle = host::open(&dep, mode).map_err(|reason| ShimError::load(&dep, reason))?;
                    if let Some(m) = self.pending.iter_mut().find(|m| m.id == id) {
                        m.host_deps.push(HostLibrary(handle));
                    }
                    shim_debug!("loader", "{name}: {dep} opened on the host");
                }
            }
        }
        Ok(id)
    }

    fn add_dep(&mut self, id: u64, dep: u64) {
        if let Some(m) = self.pending.iter_mut().find(|m| m.id == id) {
            m.deps.push(dep);
        }
    }

    /// Phase 2.
    fn relocate_all(&mut self) -> ShimResult<()> {
        for idx in (0..self.pending.len()).rev() {
            let plan = {
                let module = &self.pending[idx];
                let scope = Scope {
                    registry: &*self.registry,
                    pending: &self.pending,
                };
                let resolver = Resolver::new(catalog(), &scope);
                let ctx = PlanContext {
                    load_bias: module.load_bias,
                    tls_module: module.tls_module,
                };
                RelocationPlan::build(&module.image, ctx, &resolver).map_err(|e| {
                    let kind = module
                        .image
                        .relocations
                        .get(e.index())
                        .map_or("?", |r| r.kind(self.arch).name());
                    ShimError::from_plan(module.name(), kind, e)
                })
            };
            let plan = match plan {
                Ok(plan) => plan,
                Err(e) if self.foreign_code_ran => fatal(&e.to_string()),
                Err(e) => return Err(e),
            };
            let ran = apply_plan(&mut self.pending[idx], &plan, self.arch);
            match ran {
                Ok(ran) => self.foreign_code_ran |= ran,
                Err(e) if self.foreign_code_ran => fatal(&e.to_string()),
                Err(e) => return Err(e),
            }
            self.pending[idx].relocated = true;
        }
        Ok(())
    }

    /// Phase 3.
    fn protect_all(&mut self) -> ShimResult<()> {
        for m in &self.pending {
            if let Err(e) = mapping::apply_protections(&m.span, &m.image) {
                let err = e.into_shim(&m.name());
                if self.foreign_code_ran {
                    fatal(&err.to_string());
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Phase 4. Returns the initializers of the new modules, dependencies
    /// first.
    fn publish(mut self) -> Vec<(String, Vec<usize>)> {
        let pending = std::mem::take(&mut self.pending);
        self.bumped.clear();
        let mut inits = Vec::with_capacity(pending.len());
        for m in pending.into_iter().rev() {
            inits.push((m.name(), m.initializers()));
            self.registry.modules.insert(m.id, m);
        }
        inits
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        for id in self.bumped.drain(..) {
            if let Some(m) = self.registry.modules.get_mut(&id) {
                m.refcount = m.refcount.saturating_sub(1);
            }
        }
        if !self.pending.is_empty() {
            shim_warn!("loader", "rolling back {} module(s)", self.pending.len());
        }
        // Dropping the modules unmaps them and releases their TLS slots.
        self.pending.clear();
    }
}

/// Apply `plan` to `module`'s span. Returns whether foreign code ran.
fn apply_plan(module: &mut ForeignModule, plan: &RelocationPlan, arch: Arch) -> ShimResult<bool> {
    let name = module.name();
    let kind_of = |index: usize| {
        module
            .image
            .relocations
            .get(index)
            .map_or("?", |r| r.kind(arch).name())
    };
    // SAFETY: the span is still read-write and unpublished.
    let bytes = unsafe { module.span.as_mut_slice() };
    plan.apply_writes(bytes)
        .map_err(|e| ShimError::from_plan(&name, kind_of(e.index()), e))?;

    let base = module.span.base();
    let len = module.span.len();
    let mut foreign_code_ran = false;
    for op in plan.deferred() {
        let offset = op.offset() as usize;
        match *op {
            PatchOp::Copy { src, size, .. } => {
                let size = size as usize;
                if offset.checked_add(size).is_none_or(|end| end > len) || src == 0 {
                    return Err(ShimError::Relocation {
                        module: name,
                        index: 0,
                        kind: "COPY",
                        reason: format!("cannot copy {size} bytes from {src:#x}"),
                    });
                }
                // SAFETY: the destination is inside the span (checked); the
                // source is a resolved object of at least `size` bytes.
                unsafe {
                    std::ptr::copy_nonoverlapping(src as *const u8, (base + offset) as *mut u8, size)
                };
            }
            PatchOp::IRelative {
                resolver, addend, ..
            } => {
                // SAFETY: the resolver lies in a relocated image; glibc calls
                // it with no arguments on both architectures.
                let f: extern "C" fn() -> usize = unsafe { std::mem::transmute(resolver as usize) };
                foreign_code_ran = true;
                let value = (f() as u64).wrapping_add_signed(addend);
                unsafe { ((base + offset) as *mut u64).write_unaligned(value) };
            }
            PatchOp::TlsDescriptor {
                module_id,
                sym_offset,
                ..
            } => {
                let arg = Box::new(TlsDescArg {
                    module_id,
                    offset: sym_offset,
                });
                // SAFETY: 16-byte descriptor inside the span (checked by the
                // planner); the boxed argument lives as long as the module.
                unsafe { primitives::install_tlsdesc_thunk((base + offset) as *mut usize, &*arg) };
                module.tlsdesc_args.push(arg);
            }
            PatchOp::Write { .. } => {}
        }
    }
    let s = plan.stats;
    shim_debug!(
        "loader",
        "{name}: {} relocations, {} written, {} deferred, {} skipped, {} weak unresolved",
        s.total,
        s.applied,
        s.deferred,
        s.skipped,
        s.weak_unresolved
    );
    for weak in &plan.weak_unresolved {
        shim_trace!("loader", "{name}: weak `{weak}` left null");
    }
    Ok(foreign_code_ran)
}

/// Directories searched for a module's needed libraries.
fn search_dirs(module: &Path, runpath: &[String]) -> Vec<PathBuf> {
    let origin = module.parent().unwrap_or(Path::new("/")).to_path_buf();
    let mut dirs = vec![origin.clone()];
    for entry in runpath {
        let expanded = entry
            .replace("${ORIGIN}", &origin.to_string_lossy())
            .replace("$ORIGIN", &origin.to_string_lossy());
        dirs.push(PathBuf::from(expanded));
    }
    dirs.extend(config().library_path.iter().cloned());
    dirs
}

// ---------------------------------------------------------------------------
// Calling into foreign code
// ---------------------------------------------------------------------------

unsafe extern "C" {
    static environ: *const *const c_char;
}

/// `(argc, argv, envp)` as glibc passes them to initializers.
fn init_args() -> (c_int, *const *const c_char, *const *const c_char) {
    struct Argv {
        _strings: Vec<CString>,
        ptrs: Vec<*const c_char>,
    }
    // SAFETY: the pointers address the CStrings stored alongside them.
    unsafe impl Send for Argv {}
    unsafe impl Sync for Argv {}

    static ARGV: OnceLock<Argv> = OnceLock::new();
    let argv = ARGV.get_or_init(|| {
        let strings: Vec<CString> = std::env::args_os()
            .filter_map(|a| CString::new(a.as_bytes()).ok())
            .collect();
        let mut ptrs: Vec<*const c_char> = strings.iter().map(|s| s.as_ptr()).collect();
        ptrs.push(std::ptr::null());
        Argv {
            _strings: strings,
            ptrs,
        }
    });
    // SAFETY: `environ` is maintained by the host C library.
    let envp = unsafe { environ };
    ((argv.ptrs.len() - 1) as c_int, argv.ptrs.as_ptr(), envp)
}

fn run_init(f: usize) {
    let (argc, argv, envp) = init_args();
    // SAFETY: `f` is an initializer of a published, relocated module.
    let init: extern "C" fn(c_int, *const *const c_char, *const *const c_char) =
        unsafe { std::mem::transmute(f) };
    init(argc, argv, envp);
}

fn run_fini(f: usize) {
    // SAFETY: `f` is a finalizer of a module being unloaded.
    let fini: extern "C" fn() = unsafe { std::mem::transmute(f) };
    fini();
}

/// A failure after foreign code has observed the image. Unmapping could
/// leave that code holding pointers into freed memory, so the process ends.
pub fn fatal(reason: &str) -> ! {
    shim_error!("loader", "fatal: {reason}");
    std::process::abort();
}
