//! Grouped arrays: width-`N` collections of equally sized device arrays
//! evaluated together by a single kernel per device.
//!
//! Assignment is the execution point of the whole crate. An expression
//! tree is validated, fingerprinted, compiled (or fetched from the
//! context's cache) and launched over every nonempty partition. Launches
//! are asynchronous; call [`crate::context::Context::finish`] before
//! reading results through another path than the in-order queues.

use std::rc::Rc;

use crate::codegen::{broadcast_args, broadcast_kernel, tuple_args, tuple_kernel};
use crate::context::Context;
use crate::dtype::{DType, Element};
use crate::error::{Error, Result};
use crate::expr::{
    fingerprint, fingerprint_tuple, validate_grouped, validate_single, BinOp, Expr, UnOp,
};
use crate::vector::{Vector, VectorHandle};

/// A fixed-width group of device arrays sharing one size and element type.
pub struct MultiVector {
    ctx: Rc<Context>,
    components: Vec<VectorHandle>,
    dtype: DType,
    size: usize,
}

impl MultiVector {
    /// Allocates a group of `width` uninitialized arrays of `size`
    /// elements each.
    pub fn with_size(
        ctx: Rc<Context>,
        width: usize,
        size: usize,
        dtype: DType,
    ) -> Result<Self> {
        if width == 0 {
            return Err(Error::ZeroWidth);
        }
        let components = (0..width)
            .map(|_| Ok(Vector::new(ctx.clone(), size, dtype)?.into_handle()))
            .collect::<Result<Vec<_>>>()?;
        Ok(MultiVector {
            ctx,
            components,
            dtype,
            size,
        })
    }

    /// Splits a host buffer into `width` contiguous component blocks and
    /// uploads them. The buffer length must divide evenly; the check runs
    /// before any device allocation.
    pub fn from_host<T: Element>(ctx: Rc<Context>, width: usize, host: &[T]) -> Result<Self> {
        if width == 0 {
            return Err(Error::ZeroWidth);
        }
        if host.len() % width != 0 {
            return Err(Error::NonDivisibleHostBuffer {
                len: host.len(),
                width,
            });
        }
        let size = host.len() / width;
        let components = (0..width)
            .map(|c| {
                let block = &host[c * size..(c + 1) * size];
                Ok(Vector::from_host(ctx.clone(), block)?.into_handle())
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(MultiVector {
            ctx,
            components,
            dtype: T::DTYPE,
            size,
        })
    }

    /// Groups existing arrays without copying them. The arrays stay
    /// shared; writes through the group alias writes through the
    /// original handles.
    pub fn from_components(ctx: Rc<Context>, components: Vec<VectorHandle>) -> Result<Self> {
        if components.is_empty() {
            return Err(Error::ZeroWidth);
        }
        let (size, dtype) = {
            let first = components[0].borrow();
            (first.size(), first.dtype())
        };
        for h in &components[1..] {
            let v = h.borrow();
            if v.size() != size {
                return Err(Error::SizeMismatch {
                    expected: size,
                    found: v.size(),
                });
            }
            if v.dtype() != dtype {
                return Err(Error::DTypeMismatch {
                    expected: dtype,
                    found: v.dtype(),
                });
            }
        }
        Ok(MultiVector {
            ctx,
            components,
            dtype,
            size,
        })
    }

    /// Deep copy with freshly allocated components.
    pub fn duplicate(&self) -> Result<Self> {
        let components = self
            .components
            .iter()
            .map(|h| Ok(h.borrow().try_clone()?.into_handle()))
            .collect::<Result<Vec<_>>>()?;
        Ok(MultiVector {
            ctx: self.ctx.clone(),
            components,
            dtype: self.dtype,
            size: self.size,
        })
    }

    pub fn width(&self) -> usize {
        self.components.len()
    }

    /// Elements per component.
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

    /// Shared handle to component `c`, usable as a standalone array.
    pub fn component(&self, c: usize) -> &VectorHandle {
        &self.components[c]
    }

    /// Reallocates every component to `size` elements, discarding
    /// contents.
    pub fn resize(&mut self, size: usize) -> Result<()> {
        for h in &self.components {
            h.borrow_mut().resize(size)?;
        }
        self.size = size;
        Ok(())
    }

    /// Downloads every component.
    pub fn read_components<T: Element>(&self) -> Result<Vec<Vec<T>>> {
        self.components.iter().map(|h| h.borrow().read()).collect()
    }

    /// Reads element `i` of component `c`.
    pub fn read_element<T: Element>(&self, c: usize, i: usize) -> Result<T> {
        self.components[c].borrow().read_at(i)
    }

    /// Writes element `i` of component `c`.
    pub fn write_element<T: Element>(&self, c: usize, i: usize, value: T) -> Result<()> {
        self.components[c].borrow_mut().write_at(i, value)
    }

    /// This group as an expression terminal.
    pub fn expr(&self) -> Expr {
        Expr::Group(self.components.clone())
    }

    /// Evaluates `expr` once per component slot and stores the results,
    /// one kernel launch per nonempty device partition. The target may
    /// appear in its own right-hand side.
    pub fn assign(&self, expr: impl Into<Expr>) -> Result<()> {
        let expr = expr.into();
        let width = self.width();
        validate_grouped(&expr, width)?;
        self.check_operands(&expr)?;

        let fp = fingerprint(&expr, width);
        let steps = broadcast_args(&expr, width);
        for (d, q) in self.ctx.queues().iter().enumerate() {
            let psize = self.components[0].borrow().part_size(d);
            if psize == 0 {
                continue;
            }
            let mut cache = self.ctx.cache().borrow_mut();
            let entry =
                cache.get_or_compile(fp, q, || broadcast_kernel(&expr, width, self.dtype))?;
            crate::dispatch::enqueue(entry, q, d, psize, &self.components, &steps)?;
        }
        Ok(())
    }

    /// Evaluates one independent expression per component in a single
    /// fused kernel. All right-hand sides are read before any component
    /// is written, so tuples may permute the group's own components.
    pub fn assign_tuple(&self, exprs: Vec<Expr>) -> Result<()> {
        let width = self.width();
        if exprs.len() != width {
            return Err(Error::ComponentMismatch {
                terminal: "expression tuple",
                found: exprs.len(),
                expected: width,
            });
        }
        for e in &exprs {
            validate_single(e)?;
            self.check_operands(e)?;
        }

        let fp = fingerprint_tuple(&exprs);
        let steps = tuple_args(&exprs);
        for (d, q) in self.ctx.queues().iter().enumerate() {
            let psize = self.components[0].borrow().part_size(d);
            if psize == 0 {
                continue;
            }
            let mut cache = self.ctx.cache().borrow_mut();
            let entry = cache.get_or_compile(fp, q, || tuple_kernel(&exprs, self.dtype))?;
            crate::dispatch::enqueue(entry, q, d, psize, &self.components, &steps)?;
        }
        Ok(())
    }

    /// Copies another group's contents into this one, resizing if needed.
    pub fn assign_from(&mut self, other: &MultiVector) -> Result<()> {
        if other.width() != self.width() {
            return Err(Error::ComponentMismatch {
                terminal: "grouped array",
                found: other.width(),
                expected: self.width(),
            });
        }
        for (dst, src) in self.components.iter().zip(&other.components) {
            dst.borrow_mut().copy_from(&src.borrow())?;
        }
        self.size = other.size;
        Ok(())
    }

    /// Validates operand sizes against the target and the single-device
    /// restriction for view terminals.
    fn check_operands(&self, expr: &Expr) -> Result<()> {
        if expr.contains_view() && self.ctx.queues().len() != 1 {
            return Err(Error::ViewNeedsSingleDevice);
        }
        self.check_sizes(expr)
    }

    fn check_sizes(&self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::Value(_) | Expr::Multi(_) => Ok(()),
            Expr::Array(h) => self.check_len(h.borrow().size()),
            Expr::Group(components) => {
                for h in components {
                    self.check_len(h.borrow().size())?;
                }
                Ok(())
            }
            Expr::View(view) => self.check_len(view.len()),
            Expr::Unary(_, c) => self.check_sizes(c),
            Expr::Binary(_, l, r) => {
                self.check_sizes(l)?;
                self.check_sizes(r)
            }
            Expr::Call(_, args) => {
                for a in args {
                    self.check_sizes(a)?;
                }
                Ok(())
            }
        }
    }

    fn check_len(&self, found: usize) -> Result<()> {
        if found == self.size {
            Ok(())
        } else {
            Err(Error::SizeMismatch {
                expected: self.size,
                found,
            })
        }
    }
}

macro_rules! compound_assign_impl {
    ($($(#[$meta:meta])* $method:ident => $op:ident),*) => {
        impl MultiVector {
            $(
                $(#[$meta])*
                pub fn $method(&self, rhs: impl Into<Expr>) -> Result<()> {
                    self.assign(Expr::binary(BinOp::$op, self.expr(), rhs.into()))
                }
            )*
        }
    };
}

compound_assign_impl!(
    /// `self = self + rhs`.
    assign_add => Add,
    /// `self = self - rhs`.
    assign_sub => Sub,
    /// `self = self * rhs`.
    assign_mul => Mul,
    /// `self = self / rhs`.
    assign_div => Div,
    assign_rem => Rem,
    assign_bitand => BitAnd,
    assign_bitor => BitOr,
    assign_bitxor => BitXor,
    assign_shl => Shl,
    assign_shr => Shr
);

impl MultiVector {
    pub fn lt(&self, rhs: impl Into<Expr>) -> Expr {
        self.expr().lt(rhs)
    }

    pub fn gt(&self, rhs: impl Into<Expr>) -> Expr {
        self.expr().gt(rhs)
    }

    pub fn le(&self, rhs: impl Into<Expr>) -> Expr {
        self.expr().le(rhs)
    }

    pub fn ge(&self, rhs: impl Into<Expr>) -> Expr {
        self.expr().ge(rhs)
    }

    pub fn eq_to(&self, rhs: impl Into<Expr>) -> Expr {
        self.expr().eq_to(rhs)
    }

    pub fn ne_to(&self, rhs: impl Into<Expr>) -> Expr {
        self.expr().ne_to(rhs)
    }
}

impl From<&MultiVector> for Expr {
    fn from(mv: &MultiVector) -> Expr {
        mv.expr()
    }
}

macro_rules! group_binop_impl {
    ($($trait:ident :: $method:ident => $op:ident),*) => {
        $(
            impl<R: Into<Expr>> std::ops::$trait<R> for &MultiVector {
                type Output = Expr;
                fn $method(self, rhs: R) -> Expr {
                    Expr::binary(BinOp::$op, self.expr(), rhs.into())
                }
            }
        )*
    };
}

group_binop_impl!(
    Add::add => Add,
    Sub::sub => Sub,
    Mul::mul => Mul,
    Div::div => Div,
    Rem::rem => Rem,
    Shl::shl => Shl,
    Shr::shr => Shr,
    BitAnd::bitand => BitAnd,
    BitOr::bitor => BitOr,
    BitXor::bitxor => BitXor
);

impl std::ops::Neg for &MultiVector {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::unary(UnOp::Neg, self.expr())
    }
}

macro_rules! scalar_group_lhs_impl {
    ($($ty:ty),*) => {
        $(
            impl std::ops::Add<&MultiVector> for $ty {
                type Output = Expr;
                fn add(self, rhs: &MultiVector) -> Expr {
                    Expr::binary(BinOp::Add, Expr::from(self), rhs.expr())
                }
            }
            impl std::ops::Sub<&MultiVector> for $ty {
                type Output = Expr;
                fn sub(self, rhs: &MultiVector) -> Expr {
                    Expr::binary(BinOp::Sub, Expr::from(self), rhs.expr())
                }
            }
            impl std::ops::Mul<&MultiVector> for $ty {
                type Output = Expr;
                fn mul(self, rhs: &MultiVector) -> Expr {
                    Expr::binary(BinOp::Mul, Expr::from(self), rhs.expr())
                }
            }
            impl std::ops::Div<&MultiVector> for $ty {
                type Output = Expr;
                fn div(self, rhs: &MultiVector) -> Expr {
                    Expr::binary(BinOp::Div, Expr::from(self), rhs.expr())
                }
            }
        )*
    };
}

scalar_group_lhs_impl!(i32, i64, u32, u64, f32, f64);

#[cfg(test)]
mod tests {
    use super::*;

    fn test_context() -> Option<Rc<Context>> {
        Context::all_devices().ok()
    }

    #[test]
    fn host_buffer_splits_into_contiguous_blocks() {
        let Some(ctx) = test_context() else {
            println!("no OpenCL devices available, skipping test");
            return;
        };
        let mv = MultiVector::from_host(ctx, 2, &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(mv.width(), 2);
        assert_eq!(mv.size(), 2);
        let parts = mv.read_components::<f32>().unwrap();
        assert_eq!(parts, vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
    }

    #[test]
    fn construction_rejects_bad_shapes() {
        let Some(ctx) = test_context() else {
            println!("no OpenCL devices available, skipping test");
            return;
        };
        assert!(matches!(
            MultiVector::from_host(ctx.clone(), 0, &[1.0f32]),
            Err(Error::ZeroWidth)
        ));
        assert!(matches!(
            MultiVector::from_host(ctx, 3, &[1.0f32, 2.0, 3.0, 4.0]),
            Err(Error::NonDivisibleHostBuffer { len: 4, width: 3 })
        ));
    }

    #[test]
    fn assign_rejects_plain_arrays_and_wrong_widths() {
        let Some(ctx) = test_context() else {
            println!("no OpenCL devices available, skipping test");
            return;
        };
        let mv = MultiVector::from_host(ctx.clone(), 2, &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        let plain = Vector::from_host(ctx, &[1.0f32, 2.0]).unwrap().into_handle();

        assert!(matches!(
            mv.assign(Expr::array(&plain) + 1.0f32),
            Err(Error::PlainArrayTerminal)
        ));
        assert!(matches!(
            mv.assign(Expr::multi(&[1.0f32, 2.0, 3.0])),
            Err(Error::ComponentMismatch { found: 3, expected: 2, .. })
        ));
    }

    #[test]
    fn assign_rejects_mismatched_operand_size() {
        let Some(ctx) = test_context() else {
            println!("no OpenCL devices available, skipping test");
            return;
        };
        let a = MultiVector::from_host(ctx.clone(), 2, &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        let b = MultiVector::from_host(ctx, 2, &[1.0f32, 2.0]).unwrap();
        assert!(matches!(
            a.assign(&b + 1.0f32),
            Err(Error::SizeMismatch { expected: 2, found: 1 })
        ));
    }
}
