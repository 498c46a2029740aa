//! Opt-in debug trace for prolongator builds.
//!
//! Set `MESH_GMG_INTERP_DEBUG` to anything but `0`, `false` or an empty string
//! to get per-phase messages on the `log` debug level, prefixed by rank.

use once_cell::sync::Lazy;

/// Environment variable that enables the trace.
pub const DEBUG_ENV: &str = "MESH_GMG_INTERP_DEBUG";

static ENABLED: Lazy<bool> = Lazy::new(|| {
    std::env::var(DEBUG_ENV)
        .map(|v| !matches!(v.trim(), "" | "0" | "false"))
        .unwrap_or(false)
});

/// Rank-prefixed trace sink, resolved once per process.
#[derive(Copy, Clone, Debug)]
pub struct DebugTrace {
    rank: usize,
    enabled: bool,
}

impl DebugTrace {
    pub fn new(rank: usize) -> Self {
        Self {
            rank,
            enabled: *ENABLED,
        }
    }

    /// A trace that is on regardless of the environment.
    pub fn forced(rank: usize) -> Self {
        Self {
            rank,
            enabled: true,
        }
    }

    #[inline]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Emit `msg` when enabled. The closure is not run otherwise.
    pub fn emit(&self, msg: impl FnOnce() -> String) {
        if self.enabled {
            log::debug!("[rank {}] {}", self.rank, msg());
        }
    }
}
