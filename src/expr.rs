//! Expression trees over device arrays.
//!
//! Operators and function calls over terminals build an [`Expr`] tree on
//! the host; nothing executes until the tree is assigned to a grouped
//! array. Trees are immutable once built and live for the assignment
//! statement only — terminals hold cheap shared handles, not data.

use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

use crate::dtype::{DType, Element, Scalar};
use crate::error::{Error, Result};
use crate::slice::View;
use crate::vector::VectorHandle;

/// Binary operators renderable in kernel source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
}

impl BinOp {
    pub(crate) fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::And => "&&",
            BinOp::Or => "||",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
        }
    }

    pub(crate) fn tag(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::Div => "div",
            BinOp::Rem => "rem",
            BinOp::Shl => "shl",
            BinOp::Shr => "shr",
            BinOp::Lt => "lt",
            BinOp::Gt => "gt",
            BinOp::Le => "le",
            BinOp::Ge => "ge",
            BinOp::Eq => "eq",
            BinOp::Ne => "ne",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::BitAnd => "band",
            BinOp::BitOr => "bor",
            BinOp::BitXor => "bxor",
        }
    }
}

/// Unary prefix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnOp {
    Neg,
    Not,
}

impl UnOp {
    pub(crate) fn symbol(self) -> &'static str {
        match self {
            UnOp::Neg => "-",
            UnOp::Not => "!",
        }
    }

    pub(crate) fn tag(self) -> &'static str {
        match self {
            UnOp::Neg => "neg",
            UnOp::Not => "not",
        }
    }
}

/// A user-supplied kernel function: a C body over parameters `prm1..prmN`
/// ending in a `return` statement. The synthesizer assigns it a synthetic
/// sequential name and embeds the body in the kernel preamble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserFunction {
    arity: usize,
    body: String,
}

impl UserFunction {
    pub fn new(arity: usize, body: impl Into<String>) -> Self {
        UserFunction {
            arity,
            body: body.into(),
        }
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub(crate) fn body(&self) -> &str {
        &self.body
    }

    /// Builds a call terminal. Argument count is checked at validation.
    pub fn call(&self, args: Vec<Expr>) -> Expr {
        Expr::Call(Func::User(self.clone()), args)
    }
}

/// A callable in an expression: a built-in whose name is emitted directly,
/// or a user function with an embedded body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Func {
    Builtin(&'static str),
    User(UserFunction),
}

/// A node of an expression tree.
#[derive(Clone)]
pub enum Expr {
    /// Plain single-array terminal. Valid only in tuple-path
    /// sub-expressions, not inside grouped broadcast trees.
    Array(VectorHandle),
    /// Arity-1 value, shared by every evaluation slot.
    Value(Scalar),
    /// Multi-component value; arity must be 1 or the target group width.
    Multi(Vec<Scalar>),
    /// Grouped-array terminal; width is the component count.
    Group(Vec<VectorHandle>),
    /// Strided view of a single array.
    View(View),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
}

impl Expr {
    pub fn value(v: Scalar) -> Expr {
        Expr::Value(v)
    }

    /// A multi-component value with one entry per evaluation slot.
    pub fn multi<T: Element>(values: &[T]) -> Expr {
        Expr::Multi(values.iter().map(|v| v.scalar()).collect())
    }

    /// A plain-array terminal for tuple-path sub-expressions.
    pub fn array(handle: &VectorHandle) -> Expr {
        Expr::Array(handle.clone())
    }

    pub(crate) fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    pub(crate) fn unary(op: UnOp, child: Expr) -> Expr {
        Expr::Unary(op, Box::new(child))
    }

    pub fn lt(self, rhs: impl Into<Expr>) -> Expr {
        Expr::binary(BinOp::Lt, self, rhs.into())
    }

    pub fn gt(self, rhs: impl Into<Expr>) -> Expr {
        Expr::binary(BinOp::Gt, self, rhs.into())
    }

    pub fn le(self, rhs: impl Into<Expr>) -> Expr {
        Expr::binary(BinOp::Le, self, rhs.into())
    }

    pub fn ge(self, rhs: impl Into<Expr>) -> Expr {
        Expr::binary(BinOp::Ge, self, rhs.into())
    }

    pub fn eq_to(self, rhs: impl Into<Expr>) -> Expr {
        Expr::binary(BinOp::Eq, self, rhs.into())
    }

    pub fn ne_to(self, rhs: impl Into<Expr>) -> Expr {
        Expr::binary(BinOp::Ne, self, rhs.into())
    }

    pub fn and(self, rhs: impl Into<Expr>) -> Expr {
        Expr::binary(BinOp::And, self, rhs.into())
    }

    pub fn or(self, rhs: impl Into<Expr>) -> Expr {
        Expr::binary(BinOp::Or, self, rhs.into())
    }

    /// Whether any view terminal occurs in the tree.
    pub(crate) fn contains_view(&self) -> bool {
        match self {
            Expr::View(_) => true,
            Expr::Array(_) | Expr::Value(_) | Expr::Multi(_) | Expr::Group(_) => false,
            Expr::Unary(_, c) => c.contains_view(),
            Expr::Binary(_, l, r) => l.contains_view() || r.contains_view(),
            Expr::Call(_, args) => args.iter().any(Expr::contains_view),
        }
    }
}

// --- Validation ---

/// Accepts a tree for homogeneous broadcast assignment into a group of
/// `width` components. Checked eagerly at assignment start; no partial
/// trees ever reach the synthesizer.
pub(crate) fn validate_grouped(expr: &Expr, width: usize) -> Result<()> {
    match expr {
        Expr::Array(_) => Err(Error::PlainArrayTerminal),
        Expr::Value(_) => Ok(()),
        Expr::Multi(values) => {
            if values.len() == 1 || values.len() == width {
                Ok(())
            } else {
                Err(Error::ComponentMismatch {
                    terminal: "multi-component value",
                    found: values.len(),
                    expected: width,
                })
            }
        }
        Expr::Group(components) => {
            if components.len() == width {
                Ok(())
            } else {
                Err(Error::ComponentMismatch {
                    terminal: "grouped array",
                    found: components.len(),
                    expected: width,
                })
            }
        }
        Expr::View(_) => Ok(()),
        Expr::Unary(_, c) => validate_grouped(c, width),
        Expr::Binary(_, l, r) => {
            validate_grouped(l, width)?;
            validate_grouped(r, width)
        }
        Expr::Call(func, args) => {
            check_call(func, args)?;
            for a in args {
                validate_grouped(a, width)?;
            }
            Ok(())
        }
    }
}

/// Accepts a tuple-path sub-expression: a single-array expression where
/// grouped terminals and multi-component values have no meaning.
pub(crate) fn validate_single(expr: &Expr) -> Result<()> {
    match expr {
        Expr::Array(_) | Expr::Value(_) | Expr::View(_) => Ok(()),
        Expr::Multi(values) => {
            if values.len() == 1 {
                Ok(())
            } else {
                Err(Error::ComponentMismatch {
                    terminal: "multi-component value",
                    found: values.len(),
                    expected: 1,
                })
            }
        }
        Expr::Group(components) => Err(Error::ComponentMismatch {
            terminal: "grouped array",
            found: components.len(),
            expected: 1,
        }),
        Expr::Unary(_, c) => validate_single(c),
        Expr::Binary(_, l, r) => {
            validate_single(l)?;
            validate_single(r)
        }
        Expr::Call(func, args) => {
            check_call(func, args)?;
            for a in args {
                validate_single(a)?;
            }
            Ok(())
        }
    }
}

fn check_call(func: &Func, args: &[Expr]) -> Result<()> {
    if let Func::User(f) = func {
        if f.arity() != args.len() {
            return Err(Error::WrongArgumentCount {
                expected: f.arity(),
                found: args.len(),
            });
        }
    }
    Ok(())
}

// --- Structural fingerprint ---

/// Structural fingerprint of a tree: stable across trees of equal shape
/// (same node kinds, operators, terminal kinds/arities/types and group
/// width), distinct for different shapes. Scalar *values* do not
/// participate, so value-different expressions of equal shape share one
/// compiled kernel.
pub(crate) fn fingerprint(expr: &Expr, width: usize) -> u64 {
    let mut h = FxHasher::default();
    // Broadcast and tuple kernels never share a cache entry, even when
    // their trees hash alike.
    b'b'.hash(&mut h);
    width.hash(&mut h);
    hash_node(expr, &mut h);
    h.finish()
}

/// Fingerprint of a heterogeneous tuple of sub-expressions.
pub(crate) fn fingerprint_tuple(exprs: &[Expr]) -> u64 {
    let mut h = FxHasher::default();
    b't'.hash(&mut h);
    exprs.len().hash(&mut h);
    for e in exprs {
        hash_node(e, &mut h);
    }
    h.finish()
}

fn hash_dtype(dtype: DType, h: &mut FxHasher) {
    dtype.hash(h);
}

fn hash_node(expr: &Expr, h: &mut FxHasher) {
    match expr {
        Expr::Array(v) => {
            0u8.hash(h);
            hash_dtype(v.borrow().dtype(), h);
        }
        Expr::Value(s) => {
            1u8.hash(h);
            hash_dtype(s.dtype(), h);
        }
        Expr::Multi(values) => {
            2u8.hash(h);
            values.len().hash(h);
            if let Some(first) = values.first() {
                hash_dtype(first.dtype(), h);
            }
        }
        Expr::Group(components) => {
            3u8.hash(h);
            components.len().hash(h);
            if let Some(first) = components.first() {
                hash_dtype(first.borrow().dtype(), h);
            }
        }
        Expr::View(view) => {
            4u8.hash(h);
            view.descriptor().rank().hash(h);
            hash_dtype(view.dtype(), h);
        }
        Expr::Unary(op, c) => {
            5u8.hash(h);
            op.hash(h);
            hash_node(c, h);
        }
        Expr::Binary(op, l, r) => {
            6u8.hash(h);
            op.hash(h);
            hash_node(l, h);
            hash_node(r, h);
        }
        Expr::Call(func, args) => {
            7u8.hash(h);
            match func {
                Func::Builtin(name) => {
                    0u8.hash(h);
                    name.hash(h);
                }
                Func::User(f) => {
                    1u8.hash(h);
                    f.arity().hash(h);
                    f.body().hash(h);
                }
            }
            args.len().hash(h);
            for a in args {
                hash_node(a, h);
            }
        }
    }
}

/// Builds a readable kernel name from the tree structure.
pub(crate) fn kernel_name(expr: &Expr) -> String {
    let mut name = String::from("multi_");
    name_walk(expr, &mut name);
    name
}

fn name_walk(expr: &Expr, out: &mut String) {
    match expr {
        Expr::Array(_) | Expr::Value(_) | Expr::Multi(_) | Expr::Group(_) => out.push_str("trm_"),
        Expr::View(_) => out.push_str("view_"),
        Expr::Unary(op, c) => {
            out.push_str(op.tag());
            out.push('_');
            name_walk(c, out);
        }
        Expr::Binary(op, l, r) => {
            out.push_str(op.tag());
            out.push('_');
            name_walk(l, out);
            name_walk(r, out);
        }
        Expr::Call(func, args) => {
            match func {
                Func::Builtin(name) => out.push_str(name),
                Func::User(_) => out.push_str("usr"),
            }
            out.push('_');
            for a in args {
                name_walk(a, out);
            }
        }
    }
}

// --- Conversions and operator sugar ---

impl From<Scalar> for Expr {
    fn from(v: Scalar) -> Expr {
        Expr::Value(v)
    }
}

macro_rules! scalar_from_impl {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Expr {
                fn from(v: $ty) -> Expr {
                    Expr::Value(v.scalar())
                }
            }
        )*
    };
}

scalar_from_impl!(i32, i64, u32, u64, f32, f64);

impl From<View> for Expr {
    fn from(v: View) -> Expr {
        Expr::View(v)
    }
}

impl From<&View> for Expr {
    fn from(v: &View) -> Expr {
        Expr::View(v.clone())
    }
}

macro_rules! expr_binop_impl {
    ($($trait:ident :: $method:ident => $op:ident),*) => {
        $(
            impl<R: Into<Expr>> std::ops::$trait<R> for Expr {
                type Output = Expr;
                fn $method(self, rhs: R) -> Expr {
                    Expr::binary(BinOp::$op, self, rhs.into())
                }
            }

            impl<R: Into<Expr>> std::ops::$trait<R> for &View {
                type Output = Expr;
                fn $method(self, rhs: R) -> Expr {
                    Expr::binary(BinOp::$op, Expr::from(self), rhs.into())
                }
            }
        )*
    };
}

expr_binop_impl!(
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

impl std::ops::Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::unary(UnOp::Neg, self)
    }
}

impl std::ops::Not for Expr {
    type Output = Expr;
    fn not(self) -> Expr {
        Expr::unary(UnOp::Not, self)
    }
}

impl std::ops::Neg for &View {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::unary(UnOp::Neg, Expr::from(self))
    }
}

macro_rules! scalar_lhs_impl {
    ($($ty:ty),*) => {
        $(
            impl std::ops::Add<Expr> for $ty {
                type Output = Expr;
                fn add(self, rhs: Expr) -> Expr {
                    Expr::binary(BinOp::Add, Expr::from(self), rhs)
                }
            }
            impl std::ops::Sub<Expr> for $ty {
                type Output = Expr;
                fn sub(self, rhs: Expr) -> Expr {
                    Expr::binary(BinOp::Sub, Expr::from(self), rhs)
                }
            }
            impl std::ops::Mul<Expr> for $ty {
                type Output = Expr;
                fn mul(self, rhs: Expr) -> Expr {
                    Expr::binary(BinOp::Mul, Expr::from(self), rhs)
                }
            }
            impl std::ops::Div<Expr> for $ty {
                type Output = Expr;
                fn div(self, rhs: Expr) -> Expr {
                    Expr::binary(BinOp::Div, Expr::from(self), rhs)
                }
            }
        )*
    };
}

scalar_lhs_impl!(i32, i64, u32, u64, f32, f64);

// --- Built-in functions ---

macro_rules! builtin_unary {
    ($($(#[$meta:meta])* $fn_name:ident => $cl_name:literal),*) => {
        $(
            $(#[$meta])*
            pub fn $fn_name(x: impl Into<Expr>) -> Expr {
                Expr::Call(Func::Builtin($cl_name), vec![x.into()])
            }
        )*
    };
}

builtin_unary!(
    sqrt => "sqrt",
    /// Absolute value (`fabs` for floating-point arrays).
    fabs => "fabs",
    sin => "sin",
    cos => "cos",
    tan => "tan",
    exp => "exp",
    log => "log",
    log2 => "log2",
    floor => "floor",
    ceil => "ceil"
);

macro_rules! builtin_binary {
    ($($fn_name:ident => $cl_name:literal),*) => {
        $(
            pub fn $fn_name(x: impl Into<Expr>, y: impl Into<Expr>) -> Expr {
                Expr::Call(Func::Builtin($cl_name), vec![x.into(), y.into()])
            }
        )*
    };
}

builtin_binary!(
    pow => "pow",
    fmin => "fmin",
    fmax => "fmax"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validator_checks_multi_arity() {
        let e = Expr::multi(&[1.0f32, 2.0, 3.0]) + 1.0f32;
        assert!(validate_grouped(&e, 3).is_ok());
        assert!(matches!(
            validate_grouped(&e, 2),
            Err(Error::ComponentMismatch {
                terminal: "multi-component value",
                found: 3,
                expected: 2,
            })
        ));
        // Arity-1 values broadcast to any width.
        let shared = Expr::from(4.0f32) * Expr::multi(&[1.0f32]);
        assert!(validate_grouped(&shared, 5).is_ok());
    }

    #[test]
    fn validator_checks_user_function_arity() {
        let f = UserFunction::new(2, "return prm1 * prm2;");
        let bad = f.call(vec![Expr::from(1.0f32)]);
        assert!(matches!(
            validate_grouped(&bad, 2),
            Err(Error::WrongArgumentCount {
                expected: 2,
                found: 1,
            })
        ));
        let good = f.call(vec![Expr::from(1.0f32), Expr::from(2.0f32)]);
        assert!(validate_grouped(&good, 2).is_ok());
    }

    #[test]
    fn single_rejects_wide_multi() {
        let e = Expr::multi(&[1.0f32, 2.0]);
        assert!(matches!(
            validate_single(&e),
            Err(Error::ComponentMismatch { found: 2, .. })
        ));
        assert!(validate_single(&Expr::from(1.0f32)).is_ok());
    }

    #[test]
    fn fingerprint_ignores_values_but_not_shape() {
        let a = Expr::from(2.0f32) * Expr::multi(&[1.0f32, 2.0]);
        let b = Expr::from(7.5f32) * Expr::multi(&[8.0f32, 9.0]);
        assert_eq!(fingerprint(&a, 2), fingerprint(&b, 2));

        let c = Expr::from(2.0f32) + Expr::multi(&[1.0f32, 2.0]);
        assert_ne!(fingerprint(&a, 2), fingerprint(&c, 2));

        // Same tree over a different group width is a different kernel.
        assert_ne!(fingerprint(&a, 2), fingerprint(&a, 4));

        // dtype participates in the shape.
        let d = Expr::from(2.0f64) * Expr::multi(&[1.0f32, 2.0]);
        assert_ne!(fingerprint(&a, 2), fingerprint(&d, 2));
    }

    #[test]
    fn broadcast_and_tuple_fingerprints_never_collide() {
        // A width-1 broadcast and a one-expression tuple would otherwise
        // hash the same terminal sequence.
        let e = Expr::from(2.0f32) * Expr::multi(&[1.0f32]);
        assert_ne!(
            fingerprint(&e, 1),
            fingerprint_tuple(std::slice::from_ref(&e))
        );
    }

    #[test]
    fn fingerprint_distinguishes_functions() {
        let a = sqrt(Expr::from(2.0f32));
        let b = exp(Expr::from(2.0f32));
        assert_ne!(fingerprint(&a, 1), fingerprint(&b, 1));

        let u = UserFunction::new(1, "return prm1 + 1;");
        let v = UserFunction::new(1, "return prm1 + 2;");
        assert_ne!(
            fingerprint(&u.call(vec![Expr::from(1.0f32)]), 1),
            fingerprint(&v.call(vec![Expr::from(1.0f32)]), 1)
        );
    }

    #[test]
    fn kernel_names_reflect_structure() {
        let e = Expr::from(2.0f32) * Expr::multi(&[1.0f32, 2.0]) + 1.0f32;
        assert_eq!(kernel_name(&e), "multi_add_mul_trm_trm_trm_");

        let f = sqrt(-Expr::from(1.0f32));
        assert_eq!(kernel_name(&f), "multi_sqrt_neg_trm_");
    }
}
