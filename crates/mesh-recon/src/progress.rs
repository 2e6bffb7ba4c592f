//! Progress reporting, cancellation, and resource estimation.
//!
//! This module provides infrastructure for:
//! - Progress callbacks between pipeline stages
//! - Cancellation via a shared flag or a wall-clock deadline
//! - Memory/time estimates for the grid-based stages, checked against a
//!   [`ResourceBudget`] before anything is allocated
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use mesh_recon::progress::CancellationToken;
//!
//! let token = CancellationToken::new().with_timeout(Duration::from_secs(60));
//! let worker = token.clone();
//!
//! assert!(worker.check("reconstruct").is_ok());
//! token.cancel();
//! assert!(worker.check("reconstruct").is_err());
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::accel::AccelContext;
use crate::error::{MeshError, MeshResult};

/// Progress information passed to callbacks.
#[derive(Debug, Clone)]
pub struct Progress {
    /// Current step (0-based).
    pub current: u64,

    /// Total number of steps.
    pub total: u64,

    /// Human-readable message describing current operation.
    pub message: String,

    /// Elapsed time since operation started.
    pub elapsed: Duration,
}

impl Progress {
    /// Create a new progress report.
    pub fn new(current: u64, total: u64, message: impl Into<String>) -> Self {
        Self {
            current,
            total,
            message: message.into(),
            elapsed: Duration::ZERO,
        }
    }

    /// Get progress as a fraction (0.0 to 1.0).
    #[inline]
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.current as f64) / (self.total as f64)
        }
    }

    /// Get progress as a percentage (0 to 100).
    #[inline]
    pub fn percent(&self) -> u32 {
        (self.fraction() * 100.0).round() as u32
    }

    /// Check if the operation is complete.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.current >= self.total
    }
}

/// Callback function for progress reporting.
///
/// Returns `true` to continue, `false` to request cancellation.
pub type ProgressCallback = Box<dyn Fn(&Progress) -> bool + Send + Sync>;

/// Cooperative cancellation signal with an optional deadline.
///
/// Clones share the same flag, so a caller can keep one handle and pass
/// another into a conversion running on a different thread.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancellationToken {
    /// A token that is never cancelled unless [`cancel`](Self::cancel) is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel automatically once `deadline` has passed.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Cancel automatically `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested explicitly.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Whether the deadline has passed.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Fail with [`MeshError::Cancelled`] if cancelled or past the deadline.
    pub fn check(&self, stage: &'static str) -> MeshResult<()> {
        if self.is_cancelled() {
            return Err(MeshError::cancelled(stage, "cancellation requested"));
        }
        if self.is_expired() {
            return Err(MeshError::cancelled(stage, "deadline exceeded"));
        }
        Ok(())
    }
}

/// Per-invocation resources handed to the expensive stages.
#[derive(Debug, Clone, Default)]
pub struct StageContext<'a> {
    /// Memory budget checked before grids are allocated.
    pub budget: ResourceBudget,

    /// Worker pool; rayon's global pool when `None`.
    pub accel: Option<&'a AccelContext>,

    /// Cancellation signal polled inside long loops.
    pub cancel: CancellationToken,
}

impl<'a> StageContext<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_budget(mut self, budget: ResourceBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_accel(mut self, accel: &'a AccelContext) -> Self {
        self.accel = Some(accel);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Shorthand for `self.cancel.check(stage)`.
    #[inline]
    pub fn check(&self, stage: &'static str) -> MeshResult<()> {
        self.cancel.check(stage)
    }
}

/// Forwards stage events to an optional [`ProgressCallback`].
///
/// A callback returning `false` cancels the associated token.
pub struct StageReporter<'a> {
    callback: Option<&'a ProgressCallback>,
    token: &'a CancellationToken,
    total: u64,
    start_time: Instant,
}

impl<'a> StageReporter<'a> {
    pub fn new(
        callback: Option<&'a ProgressCallback>,
        token: &'a CancellationToken,
        total: u64,
    ) -> Self {
        Self {
            callback,
            token,
            total,
            start_time: Instant::now(),
        }
    }

    /// Report entering stage `current` and then check for cancellation.
    pub fn enter(&self, current: u64, stage: &'static str) -> MeshResult<()> {
        if let Some(callback) = self.callback {
            let progress = Progress {
                current,
                total: self.total,
                message: stage.to_string(),
                elapsed: self.start_time.elapsed(),
            };
            if !callback(&progress) {
                debug!(stage, "Progress callback requested cancellation");
                self.token.cancel();
            }
        }
        self.token.check(stage)
    }
}

// ============================================================================
// Resource estimation
// ============================================================================

/// Operations with significant, resolution-dependent cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    /// Implicit-surface reconstruction on a regular grid.
    SurfaceReconstruction,
    /// Voxelization repair.
    Voxelization,
}

impl OperationType {
    /// Short name used in errors and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::SurfaceReconstruction => "surface reconstruction",
            OperationType::Voxelization => "voxelization",
        }
    }
}

/// Estimate of grid size, memory, and time for an operation.
#[derive(Debug, Clone)]
pub struct OperationEstimate {
    /// The operation being estimated.
    pub operation: OperationType,

    /// Grid nodes per axis.
    pub grid_dims: [usize; 3],

    /// Total grid nodes.
    pub nodes: u64,

    /// Estimated peak memory usage in bytes.
    pub estimated_memory_bytes: u64,

    /// Rough wall-clock estimate on a mid-range CPU.
    pub estimated_seconds: f64,

    /// Complexity description.
    pub complexity: &'static str,
}

/// Upper bound on memory the grid stages may allocate.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct ResourceBudget {
    /// Maximum estimated bytes for a single stage.
    pub max_memory_bytes: u64,
}

impl Default for ResourceBudget {
    fn default() -> Self {
        Self {
            max_memory_bytes: 2 * 1024 * 1024 * 1024,
        }
    }
}

impl ResourceBudget {
    /// A budget with no practical limit.
    pub fn unlimited() -> Self {
        Self {
            max_memory_bytes: u64::MAX,
        }
    }

    /// Fail fast with [`MeshError::ResourceLimit`] when the estimate exceeds the budget.
    pub fn check(&self, estimate: &OperationEstimate) -> MeshResult<()> {
        if estimate.estimated_memory_bytes > self.max_memory_bytes {
            return Err(MeshError::resource_limit(
                estimate.operation.as_str(),
                estimate.estimated_memory_bytes,
                self.max_memory_bytes,
            ));
        }
        debug!(
            operation = estimate.operation.as_str(),
            nodes = estimate.nodes,
            bytes = estimate.estimated_memory_bytes,
            budget = self.max_memory_bytes,
            "Resource estimate within budget"
        );
        Ok(())
    }
}

/// Bytes per grid node for reconstruction: three vector-field components,
/// divergence, solution, and the CG work vectors.
pub(crate) const RECONSTRUCTION_BYTES_PER_NODE: u64 = 80;

/// Bytes per input sample held alongside the grid (positions, normals, kd-tree).
pub(crate) const RECONSTRUCTION_BYTES_PER_POINT: u64 = 96;

/// Bytes per voxel: occupancy and exterior flags, the closing distance field
/// and the corner-vertex map.
pub(crate) const VOXEL_BYTES_PER_CELL: u64 = 16;

/// Estimate for an operation over a grid of `dims` nodes.
pub fn estimate_grid_operation(
    operation: OperationType,
    dims: [usize; 3],
    extra_items: usize,
) -> OperationEstimate {
    let nodes = dims.iter().map(|&d| d as u64).product::<u64>();
    let n = nodes as f64;

    let (bytes, seconds, complexity) = match operation {
        OperationType::SurfaceReconstruction => {
            // CG iterations grow with the grid's linear size.
            let linear = dims.iter().copied().max().unwrap_or(1) as f64;
            (
                nodes
                    .saturating_mul(RECONSTRUCTION_BYTES_PER_NODE)
                    .saturating_add(extra_items as u64 * RECONSTRUCTION_BYTES_PER_POINT),
                n * linear / 200_000_000.0 + extra_items as f64 / 1_000_000.0,
                "O(N^(4/3)) conjugate gradient",
            )
        }
        OperationType::Voxelization => (
            nodes.saturating_mul(VOXEL_BYTES_PER_CELL),
            n / 20_000_000.0 + extra_items as f64 / 500_000.0,
            "O(voxels + faces)",
        ),
    };

    OperationEstimate {
        operation,
        grid_dims: dims,
        nodes,
        estimated_memory_bytes: bytes,
        estimated_seconds: seconds,
        complexity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_progress_fraction() {
        let p = Progress::new(50, 100, "test");
        assert!((p.fraction() - 0.5).abs() < 1e-10);
        assert_eq!(p.percent(), 50);
        assert!(!p.is_complete());
        assert!(Progress::new(100, 100, "done").is_complete());
    }

    #[test]
    fn test_progress_zero_total() {
        let p = Progress::new(0, 0, "empty");
        assert_eq!(p.percent(), 0);
    }

    #[test]
    fn test_token_cancel_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(clone.check("smooth").is_ok());

        token.cancel();
        let err = clone.check("smooth").unwrap_err();
        assert!(matches!(err, MeshError::Cancelled { stage: "smooth", .. }));
    }

    #[test]
    fn test_token_deadline() {
        let token = CancellationToken::new().with_deadline(Instant::now());
        assert!(token.is_expired());
        assert!(!token.is_cancelled());
        assert!(token.check("repair").is_err());

        let later = CancellationToken::new().with_timeout(Duration::from_secs(3600));
        assert!(later.check("repair").is_ok());
    }

    #[test]
    fn test_stage_reporter_callback_cancels() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let callback: ProgressCallback = Box::new(move |p| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            p.current < 2
        });

        let token = CancellationToken::new();
        let reporter = StageReporter::new(Some(&callback), &token, 7);
        assert!(reporter.enter(0, "load").is_ok());
        assert!(reporter.enter(1, "normals").is_ok());
        assert!(reporter.enter(2, "reconstruct").is_err());
        assert!(token.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_budget_rejects_large_grid() {
        let estimate =
            estimate_grid_operation(OperationType::SurfaceReconstruction, [1024; 3], 5000);
        let budget = ResourceBudget::default();
        let err = budget.check(&estimate).unwrap_err();
        assert!(matches!(err, MeshError::ResourceLimit { .. }));

        let small = estimate_grid_operation(OperationType::SurfaceReconstruction, [64; 3], 5000);
        assert!(budget.check(&small).is_ok());
    }

    #[test]
    fn test_estimates_scale_with_grid() {
        let small = estimate_grid_operation(OperationType::Voxelization, [32; 3], 1000);
        let large = estimate_grid_operation(OperationType::Voxelization, [128; 3], 1000);
        assert!(large.estimated_memory_bytes > small.estimated_memory_bytes);
        assert!(large.estimated_seconds > small.estimated_seconds);
        assert_eq!(small.nodes, 32 * 32 * 32);
    }
}
