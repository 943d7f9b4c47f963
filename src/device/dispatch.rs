//! Dispatch of per-voxel work onto the selected devices.
//!
//! A batch is split into contiguous sub-batches, one per device, sized by the
//! device's compute units. Each sub-batch runs on that device's executor and
//! the pieces are concatenated in device order, which is also voxel order.
//!
//! Executors are acquired for the duration of one dispatch and released on
//! drop, whichever way the dispatch exits.

use std::ops::Range;

use rayon::prelude::*;
use tracing::debug;

use crate::device::environment::{ComputeContext, ComputeDevice, DeviceKind};
use crate::domain::{FitResult, VoxelBatch};
use crate::error::{Error, Result};

/// Per-voxel job: the voxel's observed signal in, its fit result out.
pub type VoxelJob<'a> = dyn Fn(&[f64]) -> FitResult + Sync + 'a;

/// Something that can run a voxel job over a (sub-)batch.
pub trait Executor: Send + Sync {
    fn device(&self) -> &ComputeDevice;

    /// Run `job` for every voxel of `batch`, returning results in voxel order.
    fn run(&self, batch: &VoxelBatch, job: &VoxelJob<'_>) -> Vec<FitResult>;
}

/// Runs jobs on a dedicated rayon pool sized to the device's compute units.
pub struct HostExecutor {
    device: ComputeDevice,
    pool: rayon::ThreadPool,
}

impl HostExecutor {
    pub fn acquire(device: &ComputeDevice) -> Result<Self> {
        if device.kind != DeviceKind::Cpu {
            return Err(Error::ComputeDispatch {
                device: device.label(),
                message: format!(
                    "no executor is available for {} devices in this build",
                    device.kind.display_name()
                ),
            });
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(device.compute_units.max(1))
            .thread_name(|i| format!("voxfit-lane-{i}"))
            .build()
            .map_err(|e| Error::ComputeDispatch {
                device: device.label(),
                message: format!("failed to build thread pool: {e}"),
            })?;
        Ok(Self {
            device: device.clone(),
            pool,
        })
    }
}

impl Executor for HostExecutor {
    fn device(&self) -> &ComputeDevice {
        &self.device
    }

    fn run(&self, batch: &VoxelBatch, job: &VoxelJob<'_>) -> Vec<FitResult> {
        self.pool.install(|| {
            (0..batch.len())
                .into_par_iter()
                .map(|i| job(batch.signal(i)))
                .collect()
        })
    }
}

/// Acquire one executor per selected device, failing before any work starts.
pub fn acquire_executors(ctx: &ComputeContext) -> Result<Vec<Box<dyn Executor>>> {
    ctx.devices()
        .iter()
        .map(|d| HostExecutor::acquire(d).map(|e| Box::new(e) as Box<dyn Executor>))
        .collect()
}

/// Split `len` items into contiguous ranges proportional to `weights`.
///
/// Every weight is treated as at least 1. The ranges cover `0..len` in order.
pub fn partition(len: usize, weights: &[usize]) -> Vec<Range<usize>> {
    if weights.is_empty() {
        return Vec::new();
    }
    let total: usize = weights.iter().map(|w| (*w).max(1)).sum();
    let mut ranges = Vec::with_capacity(weights.len());
    let mut start = 0usize;
    let mut acc = 0usize;
    for (i, w) in weights.iter().enumerate() {
        acc += (*w).max(1);
        let end = if i + 1 == weights.len() {
            len
        } else {
            // Integer arithmetic keeps the split exact and reproducible.
            ((len as u128 * acc as u128) / total as u128) as usize
        };
        ranges.push(start..end);
        start = end;
    }
    ranges
}

/// Run `job` over every voxel of `batch` using the executors.
pub fn dispatch_with(
    executors: &[Box<dyn Executor>],
    batch: &VoxelBatch,
    job: &VoxelJob<'_>,
) -> Result<Vec<FitResult>> {
    if batch.is_empty() {
        return Ok(Vec::new());
    }
    if executors.is_empty() {
        return Err(Error::NoComputeDeviceAvailable);
    }

    let weights: Vec<usize> = executors.iter().map(|e| e.device().compute_units).collect();
    let ranges = partition(batch.len(), &weights);

    if executors.len() == 1 {
        return Ok(executors[0].run(batch, job));
    }

    let pieces: Vec<Result<Vec<FitResult>>> = std::thread::scope(|scope| {
        let handles: Vec<_> = executors
            .iter()
            .zip(ranges.iter())
            .map(|(executor, range)| {
                let sub = batch.slice(range.start, range.end);
                debug!(
                    device = %executor.device().name,
                    voxels = sub.len(),
                    first = range.start,
                    "dispatching sub-batch"
                );
                scope.spawn(move || executor.run(&sub, job))
            })
            .collect();

        handles
            .into_iter()
            .zip(executors.iter())
            .map(|(handle, executor)| {
                handle.join().map_err(|_| Error::ComputeDispatch {
                    device: executor.device().label(),
                    message: "device worker panicked".into(),
                })
            })
            .collect()
    });

    let mut merged = Vec::with_capacity(batch.len());
    for piece in pieces {
        merged.extend(piece?);
    }
    Ok(merged)
}

/// Acquire executors for `ctx` and run `job` over `batch`.
pub fn dispatch(ctx: &ComputeContext, batch: &VoxelBatch, job: &VoxelJob<'_>) -> Result<Vec<FitResult>> {
    if batch.is_empty() {
        return Ok(Vec::new());
    }
    let executors = acquire_executors(ctx)?;
    dispatch_with(&executors, batch, job)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FitStatus, Protocol, ProtocolRow};

    fn cpu(units: usize) -> ComputeDevice {
        ComputeDevice {
            platform_id: 0,
            device_id: units,
            name: format!("cpu{units}"),
            kind: DeviceKind::Cpu,
            compute_units: units,
            global_memory_bytes: 0,
        }
    }

    fn batch(n: usize) -> VoxelBatch {
        let protocol = Protocol::new(vec![ProtocolRow::new([0.0; 3], 0.0)]);
        let rows = (0..n).map(|i| vec![i as f64]).collect();
        let idx = (0..n).map(|i| [i, 0, 0]).collect();
        VoxelBatch::new(rows, protocol, idx, [n.max(1), 1, 1]).unwrap()
    }

    fn echo(signal: &[f64]) -> FitResult {
        FitResult {
            params: signal.to_vec(),
            log_likelihood: 0.0,
            status: FitStatus::Converged,
            iterations: 0,
        }
    }

    #[test]
    fn partition_covers_range_in_order() {
        let ranges = partition(10, &[1, 3]);
        assert_eq!(ranges, vec![0..2, 2..10]);
        let ranges = partition(3, &[8, 8, 8, 8]);
        assert_eq!(ranges.last().unwrap().end, 3);
        assert!(ranges.windows(2).all(|w| w[0].end == w[1].start));
    }

    #[test]
    fn multi_device_dispatch_preserves_voxel_order() {
        let ctx = ComputeContext::new(vec![cpu(1), cpu(2), cpu(3)]).unwrap();
        let out = dispatch(&ctx, &batch(17), &echo).unwrap();
        let values: Vec<f64> = out.iter().map(|r| r.params[0]).collect();
        let expected: Vec<f64> = (0..17).map(|i| i as f64).collect();
        assert_eq!(values, expected);
    }

    #[test]
    fn accelerator_without_executor_is_a_dispatch_failure() {
        let mut gpu = cpu(4);
        gpu.kind = DeviceKind::DiscreteGpu;
        let ctx = ComputeContext::new(vec![gpu]).unwrap();
        let err = dispatch(&ctx, &batch(2), &echo).unwrap_err();
        assert!(matches!(err, Error::ComputeDispatch { .. }));
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        let mut gpu = cpu(4);
        gpu.kind = DeviceKind::DiscreteGpu;
        let ctx = ComputeContext::new(vec![gpu]).unwrap();
        assert!(dispatch(&ctx, &batch(0), &echo).unwrap().is_empty());
    }
}
