//! Scoped compute context for the grid stages.
//!
//! Reconstruction and voxelization run their data-parallel loops inside an
//! [`AccelContext`], a dedicated worker pool that the caller acquires
//! explicitly and passes by reference. The pool is released when the context
//! is dropped, on every exit path including errors and cancellation.
//!
//! Stages that receive no context fall back to rayon's global pool.
//!
//! ```
//! use mesh_recon::AccelContext;
//!
//! let ctx = AccelContext::acquire(Some(2))?;
//! let sum: u64 = ctx.install(|| (0..1000u64).sum());
//! assert_eq!(sum, 499_500);
//! # Ok::<(), mesh_recon::MeshError>(())
//! ```

use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, info};

use crate::error::{MeshError, MeshResult};

/// Explicitly acquired worker pool, released on drop.
#[derive(Debug)]
pub struct AccelContext {
    pool: ThreadPool,
}

impl AccelContext {
    /// Start a pool with `threads` workers, or one per core when `None`.
    pub fn acquire(threads: Option<usize>) -> MeshResult<Self> {
        let mut builder =
            ThreadPoolBuilder::new().thread_name(|i| format!("mesh-recon-worker-{i}"));
        if let Some(n) = threads {
            builder = builder.num_threads(n.max(1));
        }
        let pool = builder
            .build()
            .map_err(|e| MeshError::reconstruction(format!("could not start worker pool: {e}")))?;

        info!(threads = pool.current_num_threads(), "Acquired compute context");
        Ok(Self { pool })
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `op` on this context's workers; rayon calls inside use this pool.
    pub fn install<R, F>(&self, op: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }
}

impl Drop for AccelContext {
    fn drop(&mut self) {
        debug!(
            threads = self.pool.current_num_threads(),
            "Released compute context"
        );
    }
}

/// Run `op` inside `ctx` when one is supplied, otherwise on the global pool.
pub(crate) fn run_in<R, F>(ctx: Option<&AccelContext>, op: F) -> R
where
    F: FnOnce() -> R + Send,
    R: Send,
{
    match ctx {
        Some(ctx) => ctx.install(op),
        None => op(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn test_acquire_with_thread_count() {
        let ctx = AccelContext::acquire(Some(3)).unwrap();
        assert_eq!(ctx.threads(), 3);
        let inside = ctx.install(rayon::current_num_threads);
        assert_eq!(inside, 3);
    }

    #[test]
    fn test_zero_threads_clamped() {
        let ctx = AccelContext::acquire(Some(0)).unwrap();
        assert_eq!(ctx.threads(), 1);
    }

    #[test]
    fn test_run_in_without_context() {
        let total: u32 = run_in(None, || (1..=10u32).into_par_iter().sum());
        assert_eq!(total, 55);
    }

    #[test]
    fn test_context_released_after_error_path() {
        fn failing(ctx: &AccelContext) -> MeshResult<()> {
            ctx.install(|| Err(MeshError::reconstruction("solver diverged")))
        }
        let ctx = AccelContext::acquire(Some(1)).unwrap();
        assert!(failing(&ctx).is_err());
        drop(ctx);
    }
}
