//! Per-thread TLS readiness.

/// `Uninitialized -> NativeReady -> ForeignReady`, forward only.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum TlsState {
    /// No host thread state observed yet.
    #[default]
    Uninitialized = 0,
    /// The host runtime has set up this thread.
    NativeReady = 1,
    /// The foreign block is populated (stack guard, ctype tables, errno).
    ForeignReady = 2,
}

impl TlsState {
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Uninitialized,
            1 => Self::NativeReady,
            _ => Self::ForeignReady,
        }
    }

    /// The state after requesting `target`. Requests to move backwards are
    /// ignored.
    #[must_use]
    pub fn advance(self, target: Self) -> Self {
        self.max(target)
    }

    pub fn is_foreign_ready(self) -> bool {
        self == Self::ForeignReady
    }
}
