//! Device arrays with synthesized OpenCL kernels.
//!
//! Host code composes arithmetic expressions over grouped device arrays;
//! assignment synthesizes an OpenCL C kernel for the expression's shape,
//! compiles it once per device context, and launches it over every
//! device partition. Structurally identical expressions reuse the cached
//! kernel no matter what scalar values they carry.
//!
//! ```no_run
//! use veld::{Context, DType, MultiVector};
//!
//! fn main() -> veld::Result<()> {
//!     let ctx = Context::all_devices()?;
//!     let x = MultiVector::from_host(ctx.clone(), 2, &[1.0f32, 2.0, 3.0, 4.0])?;
//!     let y = MultiVector::with_size(ctx.clone(), 2, 2, DType::Float32)?;
//!
//!     y.assign(2.0f32 * &x + 1.0f32)?;
//!
//!     ctx.finish()?;
//!     println!("{:?}", y.read_components::<f32>()?);
//!     Ok(())
//! }
//! ```
//!
//! Kernel management is single threaded; share a [`Context`] within one
//! thread only. Launches are asynchronous, with per-queue ordering
//! guaranteeing that reads through this crate observe prior assignments.

pub mod buffer;
pub mod context;
pub mod dtype;
pub mod error;
pub mod expr;
pub mod multi;
pub mod slice;
pub mod vector;

mod cache;
mod codegen;
mod dispatch;

pub use crate::context::{ComputeQueue, Context};
pub use crate::dtype::{DType, Element, Scalar};
pub use crate::error::{Error, Result};
pub use crate::expr::{Expr, UserFunction};
pub use crate::multi::MultiVector;
pub use crate::slice::{Range, SliceDescriptor, Slicer, View};
pub use crate::vector::{Vector, VectorHandle};
