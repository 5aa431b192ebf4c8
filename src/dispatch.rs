//! Launch geometry and kernel argument binding.
//!
//! Work size per device follows the device class: CPU-class devices get
//! the partition size rounded up to the work-group size, everything else
//! gets a fixed oversubscription of four work-groups per compute unit,
//! relying on the kernels' grid-stride loop to cover the remainder.

use log::trace;
use opencl3::kernel::ExecuteKernel;

use crate::cache::KernelEntry;
use crate::codegen::ArgStep;
use crate::context::ComputeQueue;
use crate::dtype::Scalar;
use crate::error::{Error, Result};
use crate::vector::VectorHandle;

const OVERSUBSCRIPTION: usize = 4;

fn grid_size(is_cpu: bool, compute_units: usize, psize: usize, wgsize: usize) -> usize {
    if is_cpu {
        ((psize + wgsize - 1) / wgsize) * wgsize
    } else {
        OVERSUBSCRIPTION * compute_units * wgsize
    }
}

/// Total work items to launch for `psize` elements on `queue`.
pub(crate) fn launch_size(queue: &ComputeQueue, psize: usize, wgsize: usize) -> usize {
    grid_size(queue.is_cpu(), queue.compute_units(), psize, wgsize)
}

/// Launches a cached kernel over device `d`'s partition. `results` are
/// the target components in slot order; `steps` come from the synthesis
/// module and replay the kernel's declaration order. The launch is
/// asynchronous; the queue's in-order semantics sequence it before any
/// later transfer.
pub(crate) fn enqueue(
    entry: &KernelEntry,
    queue: &ComputeQueue,
    d: usize,
    psize: usize,
    results: &[VectorHandle],
    steps: &[ArgStep],
) -> Result<()> {
    let wgsize = entry.wgsize();
    let gsize = launch_size(queue, psize, wgsize);
    trace!(
        "launching {} item(s) in groups of {} over partition of {} on {}",
        gsize,
        wgsize,
        psize,
        queue.device_name()
    );

    let mut exec = ExecuteKernel::new(entry.kernel());
    unsafe {
        exec.set_arg(&(psize as u64));

        for handle in results {
            let v = handle.borrow();
            let buf = v
                .buffer(d)
                .ok_or_else(|| Error::Backend("result partition is empty".into()))?;
            exec.set_arg(buf.cl_buffer());
        }

        for step in steps {
            match step {
                ArgStep::Buffer(handle) => {
                    let v = handle.borrow();
                    let buf = v
                        .buffer(d)
                        .ok_or_else(|| Error::Backend("operand partition is empty".into()))?;
                    exec.set_arg(buf.cl_buffer());
                }
                ArgStep::Value(v) => {
                    set_scalar_arg(&mut exec, *v);
                }
                ArgStep::Slice(view) => {
                    // Views are restricted to single-queue contexts, so the
                    // base lives entirely in partition 0.
                    let base = view.base.borrow();
                    let buf = base
                        .buffer(0)
                        .ok_or_else(|| Error::Backend("view base partition is empty".into()))?;
                    exec.set_arg(buf.cl_buffer());
                    let desc = view.descriptor();
                    exec.set_arg(&desc.start);
                    for k in 0..desc.rank() {
                        exec.set_arg(&desc.size[k]);
                        exec.set_arg(&desc.stride[k]);
                    }
                }
            }
        }

        exec.set_global_work_sizes(&[gsize])
            .set_local_work_sizes(&[wgsize])
            .enqueue_nd_range(queue.queue())
            .map_err(|e| Error::Backend(format!("kernel launch failed: {:?}", e)))?;
    }
    Ok(())
}

unsafe fn set_scalar_arg(exec: &mut ExecuteKernel, v: Scalar) {
    match v {
        Scalar::Int32(x) => exec.set_arg(&x),
        Scalar::Int64(x) => exec.set_arg(&x),
        Scalar::UInt32(x) => exec.set_arg(&x),
        Scalar::UInt64(x) => exec.set_arg(&x),
        Scalar::Float32(x) => exec.set_arg(&x),
        Scalar::Float64(x) => exec.set_arg(&x),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_grid_rounds_up_to_work_group() {
        assert_eq!(grid_size(true, 8, 1000, 64), 1024);
        assert_eq!(grid_size(true, 8, 1024, 64), 1024);
        assert_eq!(grid_size(true, 8, 3, 64), 64);
    }

    #[test]
    fn gpu_grid_oversubscribes_compute_units() {
        // Independent of the partition size.
        assert_eq!(grid_size(false, 16, 1_000_000, 256), 4 * 16 * 256);
        assert_eq!(grid_size(false, 16, 10, 256), 4 * 16 * 256);
    }
}
