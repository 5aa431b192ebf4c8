//! Element types for device arrays and scalar expression terminals.

use crate::error::{Error, Result};

/// Runtime element type of a device array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Int32,
    Int64,
    UInt32,
    UInt64,
    Float32,
    Float64,
}

impl DType {
    /// Returns the size in bytes of one element.
    pub fn size_bytes(self) -> usize {
        match self {
            DType::Int32 | DType::UInt32 | DType::Float32 => 4,
            DType::Int64 | DType::UInt64 | DType::Float64 => 8,
        }
    }

    /// Returns the OpenCL C type name.
    pub fn cl_name(self) -> &'static str {
        match self {
            DType::Int32 => "int",
            DType::Int64 => "long",
            DType::UInt32 => "uint",
            DType::UInt64 => "ulong",
            DType::Float32 => "float",
            DType::Float64 => "double",
        }
    }
}

/// A typed scalar value usable as an expression terminal and as a kernel
/// argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Int32(i32),
    Int64(i64),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
}

impl Scalar {
    pub fn dtype(self) -> DType {
        match self {
            Scalar::Int32(_) => DType::Int32,
            Scalar::Int64(_) => DType::Int64,
            Scalar::UInt32(_) => DType::UInt32,
            Scalar::UInt64(_) => DType::UInt64,
            Scalar::Float32(_) => DType::Float32,
            Scalar::Float64(_) => DType::Float64,
        }
    }
}

/// Host element types that can live in device arrays.
///
/// Conversion goes through native-endian bytes, matching the layout the
/// backend sees in `Buffer<u8>` transfers.
pub trait Element: Copy + 'static {
    const DTYPE: DType;

    fn scalar(self) -> Scalar;
    fn to_bytes(data: &[Self]) -> Vec<u8>;
    fn from_bytes(data: &[u8]) -> Vec<Self>;
}

macro_rules! element_impl {
    ($ty:ty, $dtype:expr, $variant:ident, $bytes:literal) => {
        impl Element for $ty {
            const DTYPE: DType = $dtype;

            fn scalar(self) -> Scalar {
                Scalar::$variant(self)
            }

            fn to_bytes(data: &[Self]) -> Vec<u8> {
                data.iter().flat_map(|v| v.to_ne_bytes()).collect()
            }

            fn from_bytes(data: &[u8]) -> Vec<Self> {
                data.chunks_exact($bytes)
                    .map(|c| {
                        let mut raw = [0u8; $bytes];
                        raw.copy_from_slice(c);
                        <$ty>::from_ne_bytes(raw)
                    })
                    .collect()
            }
        }
    };
}

element_impl!(i32, DType::Int32, Int32, 4);
element_impl!(i64, DType::Int64, Int64, 8);
element_impl!(u32, DType::UInt32, UInt32, 4);
element_impl!(u64, DType::UInt64, UInt64, 8);
element_impl!(f32, DType::Float32, Float32, 4);
element_impl!(f64, DType::Float64, Float64, 8);

/// Checks that a host element type matches an array's element type.
pub(crate) fn check_dtype<T: Element>(expected: DType) -> Result<()> {
    if T::DTYPE == expected {
        Ok(())
    } else {
        Err(Error::DTypeMismatch {
            expected,
            found: T::DTYPE,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cl_names() {
        assert_eq!(DType::Float32.cl_name(), "float");
        assert_eq!(DType::Float64.cl_name(), "double");
        assert_eq!(DType::Int32.cl_name(), "int");
        assert_eq!(DType::Int64.cl_name(), "long");
        assert_eq!(DType::UInt64.cl_name(), "ulong");
    }

    #[test]
    fn byte_round_trip() {
        let data = [1.5f32, -2.0, 0.25];
        let bytes = f32::to_bytes(&data);
        assert_eq!(bytes.len(), 12);
        assert_eq!(f32::from_bytes(&bytes), data);
    }

    #[test]
    fn scalar_dtype() {
        assert_eq!(Scalar::Float64(1.0).dtype(), DType::Float64);
        assert_eq!(Scalar::UInt32(7).dtype(), DType::UInt32);
    }
}
