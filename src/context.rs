//! Compute devices, queues and contexts.
//!
//! A [`Context`] owns one OpenCL context and an in-order command queue per
//! selected device, plus the kernel cache shared by every grouped array
//! created on it. Kernel management runs synchronously on the calling
//! thread; device execution is asynchronous. The context is deliberately
//! not `Sync` — concurrent cache population from several host threads is
//! out of scope for this design.

use std::cell::RefCell;
use std::rc::Rc;

use opencl3::command_queue::CommandQueue;
use opencl3::context::Context as ClContext;
use opencl3::device::{
    get_all_devices, Device, CL_DEVICE_TYPE_ALL, CL_DEVICE_TYPE_CPU, CL_DEVICE_TYPE_GPU,
};
use opencl3::types::cl_device_type;

use crate::cache::KernelCache;
use crate::error::{Error, Result};

/// One device with its OpenCL context and in-order command queue.
///
/// Enqueue order is preserved per queue; no ordering holds between
/// different devices' queues.
pub struct ComputeQueue {
    device: Device,
    context: ClContext,
    queue: CommandQueue,
    device_type: cl_device_type,
    compute_units: usize,
}

impl ComputeQueue {
    fn new(device: Device) -> Result<Self> {
        let context = ClContext::from_device(&device)
            .map_err(|e| Error::Backend(format!("failed to create context: {:?}", e)))?;
        let queue = CommandQueue::create_default(&context, 0)
            .map_err(|e| Error::Backend(format!("failed to create queue: {:?}", e)))?;
        let device_type = device
            .dev_type()
            .map_err(|e| Error::Backend(format!("failed to query device type: {:?}", e)))?;
        let compute_units = device
            .max_compute_units()
            .map_err(|e| Error::Backend(format!("failed to query compute units: {:?}", e)))?
            as usize;

        Ok(ComputeQueue {
            device,
            context,
            queue,
            device_type,
            compute_units,
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn context(&self) -> &ClContext {
        &self.context
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    /// Stable identifier of the underlying `cl_context`, used as part of
    /// the kernel cache key.
    pub(crate) fn context_id(&self) -> usize {
        self.context.get() as usize
    }

    /// Whether this is a compute-bound CPU-class device; drives the
    /// launch-geometry heuristic.
    pub fn is_cpu(&self) -> bool {
        self.device_type & CL_DEVICE_TYPE_CPU != 0
    }

    pub fn compute_units(&self) -> usize {
        self.compute_units
    }

    pub fn device_name(&self) -> String {
        self.device.name().unwrap_or_else(|_| "unknown".into())
    }

    /// Blocks until every command submitted to this queue has completed.
    pub fn finish(&self) -> Result<()> {
        self.queue
            .finish()
            .map_err(|e| Error::Backend(format!("queue finish failed: {:?}", e)))
    }
}

/// A set of compute queues plus the kernel cache attached to them.
///
/// The cache lives exactly as long as the context and is never evicted.
pub struct Context {
    queues: Vec<ComputeQueue>,
    cache: RefCell<KernelCache>,
}

impl Context {
    /// Creates a context over every device of the given OpenCL device type.
    pub fn from_device_type(device_type: cl_device_type) -> Result<Rc<Self>> {
        let ids = get_all_devices(device_type)
            .map_err(|e| Error::Backend(format!("device enumeration failed: {:?}", e)))?;
        if ids.is_empty() {
            return Err(Error::NoDevices);
        }

        let queues = ids
            .into_iter()
            .map(|id| ComputeQueue::new(Device::new(id)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Rc::new(Context {
            queues,
            cache: RefCell::new(KernelCache::new()),
        }))
    }

    /// Creates a context over every available device.
    pub fn all_devices() -> Result<Rc<Self>> {
        Self::from_device_type(CL_DEVICE_TYPE_ALL)
    }

    /// Creates a context over every available GPU.
    pub fn gpus() -> Result<Rc<Self>> {
        Self::from_device_type(CL_DEVICE_TYPE_GPU)
    }

    /// Creates a context over every available CPU device.
    pub fn cpus() -> Result<Rc<Self>> {
        Self::from_device_type(CL_DEVICE_TYPE_CPU)
    }

    pub fn queues(&self) -> &[ComputeQueue] {
        &self.queues
    }

    pub(crate) fn cache(&self) -> &RefCell<KernelCache> {
        &self.cache
    }

    /// Number of kernel compilations performed so far. Instrumentation for
    /// cache behavior; structurally identical expressions must not bump
    /// this twice per device context.
    pub fn compile_count(&self) -> usize {
        self.cache.borrow().compile_count()
    }

    /// Blocks until every queue has drained. This is the synchronization
    /// point callers must reach before reading results of an assignment;
    /// nothing in the assignment path itself waits for the device.
    pub fn finish(&self) -> Result<()> {
        for q in &self.queues {
            q.finish()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_context() -> Option<Rc<Context>> {
        Context::all_devices().ok()
    }

    #[test]
    fn context_creation() {
        let Some(ctx) = test_context() else {
            println!("no OpenCL devices available, skipping test");
            return;
        };
        assert!(!ctx.queues().is_empty());
        for q in ctx.queues() {
            println!("device: {} (cu = {})", q.device_name(), q.compute_units());
            assert!(q.compute_units() >= 1);
        }
        assert_eq!(ctx.compile_count(), 0);
    }
}
