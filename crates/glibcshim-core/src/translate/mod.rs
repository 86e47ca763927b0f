//! glibc-to-host constant translation.
//!
//! Flag words are remapped through a [`FlagTable`] built by pairing glibc's
//! named constants with the host's constants of the same name. Commands and
//! enumerated names (`fcntl` commands, `sysconf` names, `dlopen` modes) are
//! decoded into typed values here and re-encoded with host numbering by the
//! ABI layer.

pub mod dlfcn;
pub mod fcntl;
pub mod socket;
pub mod sysconf;

/// One named flag with its value on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagPair {
    pub name: &'static str,
    pub foreign: i32,
    pub host: i32,
}

/// Bit-by-bit remapping between glibc and host flag encodings.
///
/// Multi-bit flags (`O_SYNC` contains `O_DSYNC` on glibc) are matched before
/// their subsets. Bits that no pair claims are passed through unchanged.
#[derive(Debug, Clone, Default)]
pub struct FlagTable {
    pairs: Vec<FlagPair>,
}

impl FlagTable {
    pub fn new(pairs: impl IntoIterator<Item = FlagPair>) -> Self {
        let mut pairs: Vec<_> = pairs
            .into_iter()
            .filter(|p| p.foreign != 0 || p.host != 0)
            .collect();
        pairs.sort_by_key(|p| std::cmp::Reverse(p.foreign.count_ones().max(p.host.count_ones())));
        Self { pairs }
    }

    /// Pair two `(name, value)` lists by name. Names present on only one side
    /// are dropped, so their bits pass through.
    pub fn by_name(foreign: &[(&'static str, i32)], host: &[(&'static str, i32)]) -> Self {
        Self::new(foreign.iter().filter_map(|&(name, f)| {
            host.iter()
                .find(|(n, _)| *n == name)
                .map(|&(_, h)| FlagPair {
                    name,
                    foreign: f,
                    host: h,
                })
        }))
    }

    pub fn to_host(&self, flags: i32) -> i32 {
        remap(flags, self.pairs.iter().map(|p| (p.foreign, p.host)))
    }

    pub fn to_foreign(&self, flags: i32) -> i32 {
        remap(flags, self.pairs.iter().map(|p| (p.host, p.foreign)))
    }

    pub fn pairs(&self) -> &[FlagPair] {
        &self.pairs
    }

    /// True when every pair has the same value on both sides.
    pub fn is_identity(&self) -> bool {
        self.pairs.iter().all(|p| p.foreign == p.host)
    }
}

fn remap(flags: i32, pairs: impl Iterator<Item = (i32, i32)>) -> i32 {
    let mut remaining = flags;
    let mut out = 0;
    for (from, to) in pairs {
        if from != 0 && remaining & from == from {
            remaining &= !from;
            out |= to;
        }
    }
    out | remaining
}

#[cfg(test)]
mod tests {
    use super::*;

    const FOREIGN: &[(&str, i32)] = &[("A", 0x1), ("B", 0x2), ("AB", 0x3), ("ONLY_FOREIGN", 0x40)];
    const HOST: &[(&str, i32)] = &[("A", 0x10), ("B", 0x20), ("AB", 0x30), ("ONLY_HOST", 0x400)];

    #[test]
    fn pairs_by_name() {
        let t = FlagTable::by_name(FOREIGN, HOST);
        assert_eq!(t.pairs().len(), 3);
        assert_eq!(t.pairs()[0].name, "AB", "multi-bit flags first");
        assert!(!t.is_identity());
    }

    #[test]
    fn remaps_and_passes_unknown_bits() {
        let t = FlagTable::by_name(FOREIGN, HOST);
        assert_eq!(t.to_host(0x1), 0x10);
        assert_eq!(t.to_host(0x3), 0x30);
        assert_eq!(t.to_host(0x2 | 0x40), 0x20 | 0x40);
        assert_eq!(t.to_foreign(0x30), 0x3);
        assert_eq!(t.to_host(0), 0);
    }

    #[test]
    fn zero_valued_flags_are_ignored() {
        let t = FlagTable::new([FlagPair {
            name: "O_LARGEFILE",
            foreign: 0,
            host: 0,
        }]);
        assert!(t.pairs().is_empty());
        assert_eq!(t.to_host(0x8000), 0x8000);
    }
}
