//! Strided slices and views over device arrays.
//!
//! A [`SliceDescriptor`] maps a flattened index to a base-array offset via
//! `start + sum(i_k * stride[k])`, with the coordinates recovered by
//! repeated div/mod against the sizes from the last dimension backward.
//! Slice parameters are always passed to kernels at runtime, never baked
//! into source, so one compiled kernel serves any slice of the same rank.

use std::fmt::Write;

use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::vector::VectorHandle;

/// A half-open index range along one dimension, with an optional step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: usize,
    pub stride: usize,
    pub stop: usize,
}

impl Range {
    /// `start..stop` with unit step.
    pub fn new(start: usize, stop: usize) -> Self {
        Range {
            start,
            stride: 1,
            stop,
        }
    }

    /// `start..stop` with the given step.
    pub fn stepped(start: usize, stride: usize, stop: usize) -> Self {
        Range {
            start,
            stride,
            stop,
        }
    }

    /// A range traverses forward: nonzero step, end at or after start.
    fn is_degenerate(&self) -> bool {
        self.stride == 0 || self.stop < self.start
    }

    fn len(&self) -> u64 {
        ((self.stop - self.start + self.stride - 1) / self.stride) as u64
    }
}

/// Generalized strided slice of rank `D >= 1`.
///
/// `stride` is signed; negative strides traverse the base in reverse. The
/// descriptor does not bound-check indices itself — construction through
/// [`Slicer`] or [`SliceDescriptor::over`] checks the reachable offsets
/// against the base array instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceDescriptor {
    pub start: u64,
    pub size: Vec<u64>,
    pub stride: Vec<i64>,
}

impl SliceDescriptor {
    pub fn new(start: u64, size: Vec<u64>, stride: Vec<i64>) -> Result<Self> {
        if size.is_empty() || size.len() != stride.len() {
            return Err(Error::ZeroRankSlice);
        }
        Ok(SliceDescriptor {
            start,
            size,
            stride,
        })
    }

    pub fn rank(&self) -> usize {
        self.size.len()
    }

    /// Number of elements the slice selects.
    pub fn len(&self) -> usize {
        self.size.iter().product::<u64>() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Host-side mirror of the kernel indexing helper: flattened index to
    /// base-array offset.
    pub fn map_index(&self, mut idx: u64) -> i64 {
        let d = self.rank();
        if d == 1 {
            return self.start as i64 + idx as i64 * self.stride[0];
        }
        let mut ptr = self.start as i64 + (idx % self.size[d - 1]) as i64 * self.stride[d - 1];
        for k in (0..d - 1).rev() {
            idx /= self.size[k + 1];
            ptr += (idx % self.size[k]) as i64 * self.stride[k];
        }
        ptr
    }

    /// Smallest and largest base offsets the slice can reach.
    fn offset_bounds(&self) -> (i64, i64) {
        let mut min = self.start as i64;
        let mut max = self.start as i64;
        for (size, stride) in self.size.iter().zip(&self.stride) {
            let span = (size.saturating_sub(1)) as i64 * stride;
            if span >= 0 {
                max += span;
            } else {
                min += span;
            }
        }
        (min, max)
    }

    /// Binds the slice to a base array, producing a view terminal. Fails if
    /// any reachable offset lies outside the base.
    pub fn over(&self, base: &VectorHandle) -> Result<View> {
        let size = base.borrow().size();
        let (min, max) = self.offset_bounds();
        if min < 0 || max >= size as i64 {
            return Err(Error::SliceOutOfBounds { min, max, size });
        }
        Ok(View {
            base: base.clone(),
            slice: self.clone(),
        })
    }

    /// Emits the kernel helper computing the flattened-index-to-offset
    /// mapping for this rank. The helper's text depends only on the rank;
    /// the slice values arrive as runtime kernel arguments.
    pub(crate) fn indexing_function(&self, component: usize, position: usize) -> String {
        let d = self.rank();
        let mut s = String::new();
        let _ = write!(s, "ulong slice_{}_{}(\n\tulong start", component, position);
        for k in 0..d {
            let _ = write!(s, ",\n\tulong size{},\n\tlong stride{}", k, k);
        }
        s.push_str(",\n\tulong idx)\n{\n");

        if d == 1 {
            s.push_str("\treturn start + idx * stride0;\n");
        } else {
            let _ = write!(
                s,
                "\tulong ptr = start + (idx % size{0}) * stride{0};\n",
                d - 1
            );
            for k in (0..d - 1).rev() {
                let _ = write!(
                    s,
                    "\tidx /= size{};\n\tptr += (idx % size{1}) * stride{1};\n",
                    k + 1,
                    k
                );
            }
            s.push_str("\treturn ptr;\n");
        }
        s.push_str("}\n\n");
        s
    }

    /// Emits the kernel parameter declarations for this view terminal, in
    /// the exact order the dispatcher binds them: base pointer, start,
    /// then size/stride per dimension.
    pub(crate) fn parameter_declaration(
        &self,
        dtype: DType,
        component: usize,
        position: usize,
    ) -> String {
        let prm = format!("prm_{}_{}_", component, position);
        let mut s = format!(
            "global {} *{}base,\n\tulong {}start",
            dtype.cl_name(),
            prm,
            prm
        );
        for k in 0..self.rank() {
            let _ = write!(s, ",\n\tulong {0}size{1},\n\tlong {0}stride{1}", prm, k);
        }
        s
    }

    /// Emits the body fragment substituted wherever the view terminal
    /// appears in an expression.
    pub(crate) fn partial_expression(&self, component: usize, position: usize) -> String {
        let prm = format!("prm_{}_{}_", component, position);
        let mut s = format!(
            "{}base[slice_{}_{}({}start",
            prm, component, position, prm
        );
        for k in 0..self.rank() {
            let _ = write!(s, ", {0}size{1}, {0}stride{1}", prm, k);
        }
        s.push_str(", idx)]");
        s
    }
}

/// A slice bound to its base array; a first-class expression terminal.
#[derive(Clone)]
pub struct View {
    pub(crate) base: VectorHandle,
    pub(crate) slice: SliceDescriptor,
}

impl View {
    pub fn descriptor(&self) -> &SliceDescriptor {
        &self.slice
    }

    pub fn dtype(&self) -> DType {
        self.base.borrow().dtype()
    }

    pub fn len(&self) -> usize {
        self.slice.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slice.is_empty()
    }
}

/// Incremental slice builder over a row-major target of rank `D`.
///
/// Exactly `D` range selections must be made, in dimension order 0..D-1,
/// before the slicer can be applied to a base array; the builder tracks how
/// many dimensions are bound and rejects use with any other count. Each
/// selection contributes `range.start * product(trailing extents)` to the
/// start offset and a stride of `range.stride * product(trailing extents)`
/// elements.
#[derive(Debug, Clone)]
pub struct Slicer {
    dims: Vec<usize>,
    start: u64,
    size: Vec<u64>,
    stride: Vec<i64>,
    bound: usize,
    degenerate: Option<Range>,
}

impl Slicer {
    /// Creates a slicer over a target with the given dimension extents.
    pub fn new(dims: &[usize]) -> Self {
        Slicer {
            dims: dims.to_vec(),
            start: 0,
            size: Vec::with_capacity(dims.len()),
            stride: Vec::with_capacity(dims.len()),
            bound: 0,
            degenerate: None,
        }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Binds the next dimension to a range. A zero-step or backwards
    /// range is remembered and reported when the build finishes.
    pub fn select(mut self, r: Range) -> Self {
        if r.is_degenerate() {
            if self.degenerate.is_none() {
                self.degenerate = Some(r);
            }
            self.bound += 1;
            return self;
        }
        let trailing: usize = if self.bound + 1 < self.dims.len() {
            self.dims[self.bound + 1..].iter().product()
        } else {
            1
        };
        self.start += (r.start * trailing) as u64;
        self.size.push(r.len());
        self.stride.push((r.stride * trailing) as i64);
        self.bound += 1;
        self
    }

    /// Finishes the build. Fails unless exactly `rank` well-formed
    /// ranges were bound.
    pub fn descriptor(self) -> Result<SliceDescriptor> {
        if let Some(r) = self.degenerate {
            return Err(Error::DegenerateRange {
                start: r.start,
                stride: r.stride,
                stop: r.stop,
            });
        }
        if self.bound != self.dims.len() {
            return Err(Error::SlicerDimensionCount {
                rank: self.dims.len(),
                bound: self.bound,
            });
        }
        SliceDescriptor::new(self.start, self.size, self.stride)
    }

    /// Finishes the build and binds the result to a base array.
    pub fn over(self, base: &VectorHandle) -> Result<View> {
        self.descriptor()?.over(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_dimensional_mapping() {
        // start=5, size=3, stride=2 over [0..10) selects 5, 7, 9.
        let s = SliceDescriptor::new(5, vec![3], vec![2]).unwrap();
        let offsets: Vec<i64> = (0..3).map(|i| s.map_index(i)).collect();
        assert_eq!(offsets, vec![5, 7, 9]);
    }

    #[test]
    fn reverse_mapping() {
        let s = SliceDescriptor::new(9, vec![4], vec![-3]).unwrap();
        let offsets: Vec<i64> = (0..4).map(|i| s.map_index(i)).collect();
        assert_eq!(offsets, vec![9, 6, 3, 0]);
        assert_eq!(s.offset_bounds(), (0, 9));
    }

    #[test]
    fn rank_two_rows_of_square() {
        // Rows 1..3 of a row-major 4x4 target, all columns.
        let s = Slicer::new(&[4, 4])
            .select(Range::new(1, 3))
            .select(Range::new(0, 4))
            .descriptor()
            .unwrap();
        assert_eq!(s.start, 4);
        assert_eq!(s.size, vec![2, 4]);
        assert_eq!(s.stride, vec![4, 1]);

        let offsets: Vec<i64> = (0..8).map(|i| s.map_index(i)).collect();
        assert_eq!(offsets, vec![4, 5, 6, 7, 8, 9, 10, 11]);
    }

    #[test]
    fn strided_one_dimensional_slicer() {
        let s = Slicer::new(&[10])
            .select(Range::stepped(5, 2, 10))
            .descriptor()
            .unwrap();
        assert_eq!(s.start, 5);
        assert_eq!(s.size, vec![3]);
        assert_eq!(s.stride, vec![2]);
    }

    #[test]
    fn degenerate_ranges_fail_without_panicking() {
        let zero_step = Slicer::new(&[4])
            .select(Range::stepped(0, 0, 4))
            .descriptor();
        assert!(matches!(
            zero_step,
            Err(Error::DegenerateRange {
                start: 0,
                stride: 0,
                stop: 4
            })
        ));

        let backwards = Slicer::new(&[4]).select(Range::new(3, 1)).descriptor();
        assert!(matches!(
            backwards,
            Err(Error::DegenerateRange {
                start: 3,
                stride: 1,
                stop: 1
            })
        ));

        // Later selections are still counted, so only the range error
        // surfaces.
        let mixed = Slicer::new(&[4, 4])
            .select(Range::stepped(0, 0, 4))
            .select(Range::new(0, 4))
            .descriptor();
        assert!(matches!(mixed, Err(Error::DegenerateRange { .. })));

        // An empty forward range stays legal and selects nothing.
        let empty = Slicer::new(&[4])
            .select(Range::new(2, 2))
            .descriptor()
            .unwrap();
        assert_eq!(empty.len(), 0);
    }

    #[test]
    fn under_and_over_bound_slicers_fail() {
        let under = Slicer::new(&[4, 4]).select(Range::new(0, 4)).descriptor();
        assert!(matches!(
            under,
            Err(Error::SlicerDimensionCount { rank: 2, bound: 1 })
        ));

        let over = Slicer::new(&[4])
            .select(Range::new(0, 4))
            .select(Range::new(0, 4))
            .descriptor();
        assert!(matches!(
            over,
            Err(Error::SlicerDimensionCount { rank: 1, bound: 2 })
        ));
    }

    #[test]
    fn indexing_helper_rank_one() {
        let s = SliceDescriptor::new(0, vec![4], vec![1]).unwrap();
        let f = s.indexing_function(1, 2);
        assert!(f.starts_with("ulong slice_1_2("));
        assert!(f.contains("return start + idx * stride0;"));
    }

    #[test]
    fn indexing_helper_rank_two() {
        let s = SliceDescriptor::new(0, vec![2, 2], vec![2, 1]).unwrap();
        let f = s.indexing_function(2, 1);
        assert!(f.contains("ulong slice_2_1("));
        assert!(f.contains("ulong ptr = start + (idx % size1) * stride1;"));
        assert!(f.contains("idx /= size1;"));
        assert!(f.contains("ptr += (idx % size0) * stride0;"));
        assert!(f.contains("return ptr;"));
    }

    #[test]
    fn partial_expression_text() {
        let s = SliceDescriptor::new(0, vec![4], vec![1]).unwrap();
        assert_eq!(
            s.partial_expression(1, 3),
            "prm_1_3_base[slice_1_3(prm_1_3_start, prm_1_3_size0, prm_1_3_stride0, idx)]"
        );
    }

    #[test]
    fn parameter_declaration_order() {
        let s = SliceDescriptor::new(0, vec![2, 2], vec![2, 1]).unwrap();
        let decl = s.parameter_declaration(DType::Float32, 1, 1);
        let base = decl.find("prm_1_1_base").unwrap();
        let start = decl.find("prm_1_1_start").unwrap();
        let size0 = decl.find("prm_1_1_size0").unwrap();
        let stride0 = decl.find("prm_1_1_stride0").unwrap();
        let size1 = decl.find("prm_1_1_size1").unwrap();
        assert!(base < start && start < size0 && size0 < stride0 && stride0 < size1);
    }
}
