//! Runs a group of ranks as threads of this process.

use crate::error::{Error, Result};

/// A thread pool with exactly one thread per rank. Ranks block on each
/// other's messages, so every rank must own a thread for the whole run; a
/// work-stealing pool smaller than the group would deadlock.
pub struct Launcher {
    pool: rayon::ThreadPool,
}

impl Launcher {
    /// Creates a launcher for `size` ranks. With `pin_threads`, rank threads
    /// are pinned round-robin to the physical cores (when the
    /// `core_affinity` feature is enabled; otherwise the flag is ignored).
    pub fn new(size: usize, pin_threads: bool) -> Result<Self> {
        if size == 0 {
            return Err(Error::Launch("a group needs at least one rank".into()));
        }
        let builder = rayon::ThreadPoolBuilder::new()
            .num_threads(size)
            .thread_name(|index| format!("rank-{}", index));
        let builder = Self::with_affinity(builder, pin_threads);
        let pool = builder.build().map_err(|e| Error::Launch(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Returns the number of ranks (threads) in the group.
    pub fn size(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Runs `job(rank)` once on every rank thread, concurrently, and returns
    /// the results in rank order.
    pub fn run<R, F>(&self, job: F) -> Vec<R>
    where
        R: Send,
        F: Fn(usize) -> R + Sync,
    {
        self.pool.broadcast(|context| job(context.index()))
    }

    #[cfg(feature = "core_affinity")]
    fn with_affinity(builder: rayon::ThreadPoolBuilder, pin_threads: bool) -> rayon::ThreadPoolBuilder {
        if !pin_threads {
            return builder;
        }
        let core_ids = match core_affinity::get_core_ids() {
            Some(core_ids) if !core_ids.is_empty() => core_ids,
            _ => {
                log::warn!("core ids unavailable, rank threads will not be pinned");
                return builder;
            }
        };
        builder.start_handler(move |index| {
            let core_id = core_ids[index % core_ids.len()];
            log::debug!("pinning rank {} to core {}", index, core_id.id);
            core_affinity::set_for_current(core_id);
        })
    }

    #[cfg(not(feature = "core_affinity"))]
    fn with_affinity(builder: rayon::ThreadPoolBuilder, pin_threads: bool) -> rayon::ThreadPoolBuilder {
        if pin_threads {
            log::warn!("built without core_affinity, rank threads will not be pinned");
        }
        builder
    }
}
