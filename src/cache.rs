//! Compiled-kernel cache keyed by expression structure and device context.
//!
//! The cache maps `(structural fingerprint, cl_context id)` to a built
//! program, so a structurally identical assignment compiles at most once
//! per device context for the life of the [`crate::context::Context`]
//! that owns it. Entries are never evicted.

use log::debug;
use opencl3::kernel::Kernel;
use opencl3::program::Program;
use rustc_hash::FxHashMap;

use crate::codegen::KernelSource;
use crate::context::ComputeQueue;
use crate::error::{Error, Result};

/// A built kernel plus the work-group size the driver picked for it.
pub(crate) struct KernelEntry {
    // Held so the kernel's program outlives every launch.
    _program: Program,
    kernel: Kernel,
    wgsize: usize,
}

impl KernelEntry {
    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn wgsize(&self) -> usize {
        self.wgsize
    }
}

pub(crate) struct KernelCache {
    entries: FxHashMap<(u64, usize), KernelEntry>,
    compiles: usize,
}

impl KernelCache {
    pub fn new() -> Self {
        KernelCache {
            entries: FxHashMap::default(),
            compiles: 0,
        }
    }

    pub fn compile_count(&self) -> usize {
        self.compiles
    }

    /// Looks up the kernel for `fingerprint` on `queue`'s context,
    /// synthesizing and building it on a miss. Source synthesis runs only
    /// when the lookup misses.
    pub fn get_or_compile(
        &mut self,
        fingerprint: u64,
        queue: &ComputeQueue,
        synthesize: impl FnOnce() -> KernelSource,
    ) -> Result<&KernelEntry> {
        let key = (fingerprint, queue.context_id());
        if !self.entries.contains_key(&key) {
            let entry = self.compile(queue, synthesize())?;
            self.entries.insert(key, entry);
            self.compiles += 1;
        }
        Ok(&self.entries[&key])
    }

    fn compile(&self, queue: &ComputeQueue, src: KernelSource) -> Result<KernelEntry> {
        debug!(
            "compiling kernel {} for device {}",
            src.name,
            queue.device_name()
        );

        let program = Program::create_and_build_from_source(queue.context(), &src.source, "")
            .map_err(|log| Error::KernelBuild {
                message: log.to_string(),
                generated: src.source.clone(),
            })?;
        let kernel = Kernel::create(&program, &src.name)
            .map_err(|e| Error::Backend(format!("kernel creation failed: {:?}", e)))?;
        let wgsize = kernel
            .get_work_group_size(queue.device().id())
            .map_err(|e| Error::Backend(format!("work-group size query failed: {:?}", e)))?;

        Ok(KernelEntry {
            _program: program,
            kernel,
            wgsize,
        })
    }
}
