//! Raw device buffer wrapping an OpenCL memory object.

use opencl3::memory::{Buffer as ClBuffer, CL_MEM_READ_WRITE};
use opencl3::types::CL_BLOCKING;

use crate::context::ComputeQueue;
use crate::dtype::DType;
use crate::error::{Error, Result};

/// A typed device allocation on one compute queue's context.
///
/// The buffer stores raw bytes; `len` counts elements of `dtype`.
pub struct DeviceBuffer {
    buffer: ClBuffer<u8>,
    len: usize,
    dtype: DType,
}

impl DeviceBuffer {
    /// Allocates an uninitialized buffer of `len` elements. `len` must be
    /// nonzero; zero-sized partitions are represented by absence of a
    /// buffer, not by empty allocations.
    pub fn new(queue: &ComputeQueue, len: usize, dtype: DType) -> Result<Self> {
        debug_assert!(len > 0);
        let bytes = len * dtype.size_bytes();
        let buffer = unsafe {
            ClBuffer::create(
                queue.context(),
                CL_MEM_READ_WRITE,
                bytes,
                std::ptr::null_mut(),
            )
            .map_err(|e| Error::Backend(format!("buffer allocation failed: {:?}", e)))?
        };

        Ok(DeviceBuffer { buffer, len, dtype })
    }

    /// Returns the underlying OpenCL buffer for argument binding.
    pub fn cl_buffer(&self) -> &ClBuffer<u8> {
        &self.buffer
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn byte_len(&self) -> usize {
        self.len * self.dtype.size_bytes()
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Blocking write of raw bytes starting at element `offset`.
    pub fn write_bytes_at(
        &mut self,
        queue: &ComputeQueue,
        offset: usize,
        data: &[u8],
    ) -> Result<()> {
        let byte_offset = offset * self.dtype.size_bytes();
        unsafe {
            queue
                .queue()
                .enqueue_write_buffer(&mut self.buffer, CL_BLOCKING, byte_offset, data, &[])
                .map_err(|e| Error::Backend(format!("buffer write failed: {:?}", e)))?;
        }
        Ok(())
    }

    /// Blocking write of the whole buffer.
    pub fn write_bytes(&mut self, queue: &ComputeQueue, data: &[u8]) -> Result<()> {
        self.write_bytes_at(queue, 0, data)
    }

    /// Blocking read of `count` elements starting at element `offset`.
    ///
    /// The read is enqueued behind any kernels already submitted to the
    /// same in-order queue, so it observes their results.
    pub fn read_bytes_at(
        &self,
        queue: &ComputeQueue,
        offset: usize,
        count: usize,
    ) -> Result<Vec<u8>> {
        let byte_offset = offset * self.dtype.size_bytes();
        let mut data = vec![0u8; count * self.dtype.size_bytes()];
        unsafe {
            queue
                .queue()
                .enqueue_read_buffer(&self.buffer, CL_BLOCKING, byte_offset, &mut data, &[])
                .map_err(|e| Error::Backend(format!("buffer read failed: {:?}", e)))?;
        }
        Ok(data)
    }

    /// Blocking read of the whole buffer.
    pub fn read_bytes(&self, queue: &ComputeQueue) -> Result<Vec<u8>> {
        self.read_bytes_at(queue, 0, self.len)
    }
}
