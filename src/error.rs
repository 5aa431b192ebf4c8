//! Error types for expression validation, kernel builds and dispatch.

/// Errors that can occur while composing, compiling or dispatching
/// device expressions.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A grouped array was constructed with zero components.
    #[error("group width must be positive")]
    ZeroWidth,

    /// Host data cannot be partitioned evenly between group components.
    #[error("host buffer of {len} elements is not divisible by group width {width}")]
    NonDivisibleHostBuffer { len: usize, width: usize },

    /// A terminal carries the wrong number of components for the target group.
    #[error("{terminal} has {found} component(s), expected 1 or {expected}")]
    ComponentMismatch {
        terminal: &'static str,
        found: usize,
        expected: usize,
    },

    /// Plain single-array terminals are not accepted inside grouped expressions.
    #[error("plain array terminals are not allowed in grouped expressions")]
    PlainArrayTerminal,

    /// A function call carries the wrong number of arguments.
    #[error("function expects {expected} argument(s), got {found}")]
    WrongArgumentCount { expected: usize, found: usize },

    /// An operand array does not match the size of the assignment target.
    #[error("operand size {found} does not match target size {expected}")]
    SizeMismatch { expected: usize, found: usize },

    /// Element types of two collaborating arrays differ.
    #[error("element type mismatch: expected {expected:?}, got {found:?}")]
    DTypeMismatch {
        expected: crate::dtype::DType,
        found: crate::dtype::DType,
    },

    /// A range selection with zero step or an end before its start.
    #[error("range {start}..{stop} with stride {stride} selects nothing traversable")]
    DegenerateRange {
        start: usize,
        stride: usize,
        stop: usize,
    },

    /// A slicer was applied before (or after) binding exactly `rank` ranges.
    #[error("slicer of rank {rank} received {bound} range selection(s)")]
    SlicerDimensionCount { rank: usize, bound: usize },

    /// A slice descriptor was built with no dimensions.
    #[error("slice descriptors must have at least one dimension")]
    ZeroRankSlice,

    /// A slice reaches outside its base array.
    #[error("slice spans offsets {min}..={max}, base array has {size} element(s)")]
    SliceOutOfBounds { min: i64, max: i64, size: usize },

    /// View terminals are bound to a single device partition.
    #[error("view terminals require a context with a single compute queue")]
    ViewNeedsSingleDevice,

    /// No device of the requested type was found.
    #[error("no OpenCL devices of the requested type")]
    NoDevices,

    /// Kernel source failed to compile. The generated source is attached
    /// for diagnosis; the source is deterministic for a given expression
    /// shape, so the build is not retried.
    #[error("kernel build failed: {message}\n--- generated source ---\n{generated}")]
    KernelBuild { message: String, generated: String },

    /// An OpenCL call failed.
    #[error("backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, Error>;
