// Utils

pub mod logging;
pub mod offload;
pub mod rng;

use std::sync::{Mutex, MutexGuard};

pub use logging::init_tracing;
pub use offload::{stream_from_iter, OffloadPool};
pub use rng::{resolve_rng, SharedRng};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
