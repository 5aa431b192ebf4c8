//! A single device array partitioned across the context's queues.
//!
//! This is the element container grouped arrays are built from. Elements
//! are block-partitioned over the context's devices; each partition lives
//! in one buffer on that device's context.

use std::cell::RefCell;
use std::rc::Rc;

use crate::buffer::DeviceBuffer;
use crate::context::Context;
use crate::dtype::{check_dtype, DType, Element};
use crate::error::{Error, Result};

/// Shared handle to a vector, usable as an expression terminal.
pub type VectorHandle = Rc<RefCell<Vector>>;

/// Splits `size` elements into `nparts` contiguous blocks, returning
/// `nparts + 1` partition bounds. The remainder spreads over the leading
/// parts so block sizes differ by at most one.
pub fn partition(size: usize, nparts: usize) -> Vec<usize> {
    let base = size / nparts;
    let rem = size % nparts;
    let mut bounds = Vec::with_capacity(nparts + 1);
    bounds.push(0);
    for i in 0..nparts {
        bounds.push(bounds[i] + base + usize::from(i < rem));
    }
    bounds
}

/// A device array of one element type, block-partitioned across devices.
pub struct Vector {
    ctx: Rc<Context>,
    dtype: DType,
    size: usize,
    part: Vec<usize>,
    parts: Vec<Option<DeviceBuffer>>,
}

impl Vector {
    /// Allocates an uninitialized vector of `size` elements.
    pub fn new(ctx: Rc<Context>, size: usize, dtype: DType) -> Result<Self> {
        let nparts = ctx.queues().len();
        let part = partition(size, nparts);
        let mut parts = Vec::with_capacity(nparts);
        for (d, q) in ctx.queues().iter().enumerate() {
            let psize = part[d + 1] - part[d];
            parts.push(if psize > 0 {
                Some(DeviceBuffer::new(q, psize, dtype)?)
            } else {
                None
            });
        }
        Ok(Vector {
            ctx,
            dtype,
            size,
            part,
            parts,
        })
    }

    /// Allocates a vector and fills it from host data.
    pub fn from_host<T: Element>(ctx: Rc<Context>, host: &[T]) -> Result<Self> {
        let mut v = Vector::new(ctx, host.len(), T::DTYPE)?;
        v.write(host)?;
        Ok(v)
    }

    /// Wraps the vector in a shared handle for use in expressions.
    pub fn into_handle(self) -> VectorHandle {
        Rc::new(RefCell::new(self))
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn context(&self) -> &Rc<Context> {
        &self.ctx
    }

    /// First element index owned by device `d`.
    pub fn part_start(&self, d: usize) -> usize {
        self.part[d]
    }

    /// Number of elements owned by device `d`.
    pub fn part_size(&self, d: usize) -> usize {
        self.part[d + 1] - self.part[d]
    }

    /// Device buffer backing partition `d`, if the partition is nonempty.
    pub fn buffer(&self, d: usize) -> Option<&DeviceBuffer> {
        self.parts[d].as_ref()
    }

    /// Reallocates to `size` elements. Previous contents are discarded.
    pub fn resize(&mut self, size: usize) -> Result<()> {
        let fresh = Vector::new(self.ctx.clone(), size, self.dtype)?;
        self.size = fresh.size;
        self.part = fresh.part;
        self.parts = fresh.parts;
        Ok(())
    }

    /// Blocking write of the whole vector from host data.
    pub fn write<T: Element>(&mut self, host: &[T]) -> Result<()> {
        check_dtype::<T>(self.dtype)?;
        if host.len() != self.size {
            return Err(Error::SizeMismatch {
                expected: self.size,
                found: host.len(),
            });
        }
        self.write_bytes(&T::to_bytes(host))
    }

    /// Blocking read of the whole vector into host data.
    pub fn read<T: Element>(&self) -> Result<Vec<T>> {
        check_dtype::<T>(self.dtype)?;
        Ok(T::from_bytes(&self.read_bytes()?))
    }

    /// Reads one element.
    pub fn read_at<T: Element>(&self, index: usize) -> Result<T> {
        check_dtype::<T>(self.dtype)?;
        let (d, local) = self.locate(index)?;
        let q = &self.ctx.queues()[d];
        let bytes = self.parts[d]
            .as_ref()
            .ok_or_else(|| Error::Backend("empty partition".into()))?
            .read_bytes_at(q, local, 1)?;
        Ok(T::from_bytes(&bytes)[0])
    }

    /// Writes one element.
    pub fn write_at<T: Element>(&mut self, index: usize, value: T) -> Result<()> {
        check_dtype::<T>(self.dtype)?;
        let (d, local) = self.locate(index)?;
        let q = &self.ctx.queues()[d];
        self.parts[d]
            .as_mut()
            .ok_or_else(|| Error::Backend("empty partition".into()))?
            .write_bytes_at(q, local, &T::to_bytes(&[value]))
    }

    /// Device-to-device copy through the host.
    pub fn try_clone(&self) -> Result<Vector> {
        let mut copy = Vector::new(self.ctx.clone(), self.size, self.dtype)?;
        copy.write_bytes(&self.read_bytes()?)?;
        Ok(copy)
    }

    /// Overwrites this vector with another's contents, resizing if needed.
    pub fn copy_from(&mut self, other: &Vector) -> Result<()> {
        check_same_dtype(self.dtype, other.dtype)?;
        if self.size != other.size {
            self.resize(other.size)?;
        }
        self.write_bytes(&other.read_bytes()?)
    }

    fn locate(&self, index: usize) -> Result<(usize, usize)> {
        if index >= self.size {
            return Err(Error::SizeMismatch {
                expected: self.size,
                found: index,
            });
        }
        let d = match self.part.binary_search(&index) {
            Ok(exact) => exact,
            Err(next) => next - 1,
        };
        Ok((d, index - self.part[d]))
    }

    pub(crate) fn read_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.size * self.dtype.size_bytes());
        for (d, q) in self.ctx.queues().iter().enumerate() {
            if let Some(buf) = &self.parts[d] {
                out.extend(buf.read_bytes(q)?);
            }
        }
        Ok(out)
    }

    pub(crate) fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        let esize = self.dtype.size_bytes();
        for (d, q) in self.ctx.queues().iter().enumerate() {
            let (start, psize) = (self.part[d], self.part_size(d));
            if let Some(buf) = &mut self.parts[d] {
                buf.write_bytes(q, &data[start * esize..(start + psize) * esize])?;
            }
        }
        Ok(())
    }
}

fn check_same_dtype(expected: DType, found: DType) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(Error::DTypeMismatch { expected, found })
    }
}
