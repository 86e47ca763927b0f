//! Process exit handlers (`atexit`, `__cxa_atexit`, `__cxa_finalize`).
//!
//! Handlers are kept in one registration-ordered list so that `exit` runs
//! plain and C++ handlers interleaved in reverse registration order, as
//! glibc does. Each handler is handed out exactly once; the caller invokes
//! it with no lock held, so a handler may register further handlers.

use std::ops::Range;

use parking_lot::Mutex;

use crate::error::{Resource, ShimError, ShimResult};

pub const ATEXIT_CAPACITY: usize = 64;
pub const CXA_ATEXIT_CAPACITY: usize = 256;

/// A registered handler. Addresses are function pointers and opaque
/// arguments owned by the ABI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitHandler {
    /// `void (*)(void)` from `atexit`.
    Plain { func: usize },
    /// `void (*)(void *)` from `__cxa_atexit`, tagged with its DSO handle.
    Cxa { func: usize, arg: usize, dso: usize },
}

impl ExitHandler {
    fn matches(&self, dso: Option<usize>) -> bool {
        match (self, dso) {
            (_, None) => true,
            (Self::Cxa { dso: own, .. }, Some(d)) => *own == d,
            (Self::Plain { .. }, Some(_)) => false,
        }
    }
}

#[derive(Debug, Default)]
struct Registry {
    handlers: Vec<ExitHandler>,
    plain: usize,
    cxa: usize,
}

#[derive(Debug)]
pub struct ExitHandlers {
    inner: Mutex<Registry>,
    plain_capacity: usize,
    cxa_capacity: usize,
}

impl Default for ExitHandlers {
    fn default() -> Self {
        Self::new(ATEXIT_CAPACITY, CXA_ATEXIT_CAPACITY)
    }
}

impl ExitHandlers {
    pub fn new(plain_capacity: usize, cxa_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Registry::default()),
            plain_capacity,
            cxa_capacity,
        }
    }

    pub fn register(&self, handler: ExitHandler) -> ShimResult<()> {
        let mut reg = self.inner.lock();
        match handler {
            ExitHandler::Plain { .. } => {
                if reg.plain >= self.plain_capacity {
                    return Err(ShimError::capacity(Resource::ExitHandlers, self.plain_capacity));
                }
                reg.plain += 1;
            }
            ExitHandler::Cxa { .. } => {
                if reg.cxa >= self.cxa_capacity {
                    return Err(ShimError::capacity(Resource::ExitHandlers, self.cxa_capacity));
                }
                reg.cxa += 1;
            }
        }
        reg.handlers.push(handler);
        Ok(())
    }

    /// Remove and return the most recently registered handler belonging to
    /// `dso`, or to anyone when `dso` is `None`.
    pub fn take_next(&self, dso: Option<usize>) -> Option<ExitHandler> {
        self.take_last(|h| h.matches(dso))
    }

    fn take_last(&self, pred: impl Fn(&ExitHandler) -> bool) -> Option<ExitHandler> {
        let mut reg = self.inner.lock();
        let pos = reg.handlers.iter().rposition(pred)?;
        let handler = reg.handlers.remove(pos);
        match handler {
            ExitHandler::Plain { .. } => reg.plain -= 1,
            ExitHandler::Cxa { .. } => reg.cxa -= 1,
        }
        Some(handler)
    }

    /// Drain every handler for `dso` in LIFO order, calling `run` for each.
    /// Handlers registered while draining are drained too.
    pub fn finalize(&self, dso: Option<usize>, mut run: impl FnMut(ExitHandler)) -> usize {
        let mut count = 0;
        while let Some(handler) = self.take_next(dso) {
            run(handler);
            count += 1;
        }
        count
    }

    /// Drain the C++ handlers whose DSO handle lies inside `span`, the
    /// address range of a module being unloaded. Plain `atexit` handlers are
    /// left for process exit.
    pub fn finalize_range(&self, span: Range<usize>, mut run: impl FnMut(ExitHandler)) -> usize {
        let in_span = |h: &ExitHandler| matches!(h, ExitHandler::Cxa { dso, .. } if span.contains(dso));
        let mut count = 0;
        while let Some(handler) = self.take_last(&in_span) {
            run(handler);
            count += 1;
        }
        count
    }

    pub fn len(&self) -> usize {
        self.inner.lock().handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cxa(func: usize, dso: usize) -> ExitHandler {
        ExitHandler::Cxa { func, arg: 0, dso }
    }

    #[test]
    fn runs_all_in_reverse_order() {
        let table = ExitHandlers::default();
        table.register(ExitHandler::Plain { func: 1 }).unwrap();
        table.register(cxa(2, 0xa)).unwrap();
        table.register(ExitHandler::Plain { func: 3 }).unwrap();

        let mut order = Vec::new();
        let n = table.finalize(None, |h| {
            order.push(match h {
                ExitHandler::Plain { func } | ExitHandler::Cxa { func, .. } => func,
            })
        });
        assert_eq!(n, 3);
        assert_eq!(order, [3, 2, 1]);
        assert!(table.is_empty());
    }

    #[test]
    fn finalize_by_dso_runs_each_once() {
        let table = ExitHandlers::default();
        table.register(cxa(1, 0xa)).unwrap();
        table.register(cxa(2, 0xb)).unwrap();
        table.register(cxa(3, 0xa)).unwrap();
        table.register(ExitHandler::Plain { func: 4 }).unwrap();

        let mut seen = Vec::new();
        table.finalize(Some(0xa), |h| seen.push(h));
        assert_eq!(seen, [cxa(3, 0xa), cxa(1, 0xa)]);
        assert_eq!(table.finalize(Some(0xa), |_| {}), 0);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn capacities_are_per_kind() {
        let table = ExitHandlers::new(1, 2);
        table.register(ExitHandler::Plain { func: 1 }).unwrap();
        let err = table.register(ExitHandler::Plain { func: 2 }).unwrap_err();
        assert_eq!(err, ShimError::capacity(Resource::ExitHandlers, 1));
        table.register(cxa(1, 0)).unwrap();
        table.register(cxa(2, 0)).unwrap();
        assert!(table.register(cxa(3, 0)).is_err());

        table.take_next(None).unwrap();
        table.register(cxa(4, 0)).unwrap();
    }

    #[test]
    fn finalize_range_matches_module_span() {
        let table = ExitHandlers::default();
        table.register(cxa(1, 0x1000)).unwrap();
        table.register(cxa(2, 0x5008)).unwrap();
        table.register(ExitHandler::Plain { func: 3 }).unwrap();
        table.register(cxa(4, 0x1ff8)).unwrap();

        let mut seen = Vec::new();
        assert_eq!(table.finalize_range(0x1000..0x2000, |h| seen.push(h)), 2);
        assert_eq!(seen, [cxa(4, 0x1ff8), cxa(1, 0x1000)]);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn handlers_registered_while_draining_run() {
        let table = ExitHandlers::default();
        table.register(ExitHandler::Plain { func: 1 }).unwrap();
        let mut ran = Vec::new();
        table.finalize(None, |h| {
            if h == (ExitHandler::Plain { func: 1 }) {
                table.register(ExitHandler::Plain { func: 2 }).unwrap();
            }
            ran.push(h);
        });
        assert_eq!(ran.len(), 2);
    }
}
