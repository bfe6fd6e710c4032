//! Byte counters shared between segment workers and whoever renders progress.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Counters {
    total: AtomicU64,
    resumed: AtomicU64,
    transferred: AtomicU64,
}

/// Cheaply cloneable handle to the progress of one download.
///
/// Workers call [`ProgressState::add`] for every chunk they write; a renderer
/// polls [`ProgressState::position`] against [`ProgressState::total`].
#[derive(Debug, Clone, Default)]
pub struct ProgressState {
    counters: Arc<Counters>,
}

impl ProgressState {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn start(&self, total: u64, resumed: u64) {
        self.counters.total.store(total, Ordering::Relaxed);
        self.counters.resumed.store(resumed, Ordering::Relaxed);
        self.counters.transferred.store(0, Ordering::Relaxed);
    }

    pub fn add(&self, bytes: u64) {
        self.counters.transferred.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Bytes fetched during this run.
    pub fn transferred(&self) -> u64 {
        self.counters.transferred.load(Ordering::Relaxed)
    }

    /// Bytes kept from a previous run.
    pub fn resumed(&self) -> u64 {
        self.counters.resumed.load(Ordering::Relaxed)
    }

    /// Resource size, zero until it is known.
    pub fn total(&self) -> u64 {
        self.counters.total.load(Ordering::Relaxed)
    }

    pub fn position(&self) -> u64 {
        self.resumed() + self.transferred()
    }
}
