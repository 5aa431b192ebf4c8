//! OpenCL C source synthesis for expression assignments.
//!
//! Two shapes of kernel come out of this module. The broadcast kernel
//! evaluates one tree once per component slot, renumbering terminals as
//! `prm_{slot+1}_{position}`; arity-1 values are declared a single time
//! as `prm_1_{position}` and shared by every slot. The tuple kernel fuses
//! independent single-array expressions into one launch, numbering each
//! expression's terminals with its own 1-based component index and
//! staging results through `buf_{i}` locals so no expression observes
//! another's writes within the same iteration.
//!
//! Argument binding order is owned here too: [`broadcast_args`] and
//! [`tuple_args`] replay the exact terminal order the declarations were
//! emitted in, so the dispatcher never re-derives it.

use std::fmt::Write;

use crate::dtype::{DType, Scalar};
use crate::expr::{kernel_name, Expr, Func};
use crate::slice::View;
use crate::vector::VectorHandle;

/// Preamble enabling double precision where the device exposes it.
pub(crate) const KERNEL_HEADER: &str = "\
#if defined(cl_khr_fp64)
#pragma OPENCL EXTENSION cl_khr_fp64: enable
#elif defined(cl_amd_fp64)
#pragma OPENCL EXTENSION cl_amd_fp64: enable
#endif
";

/// A synthesized kernel: entry point name plus complete program source.
#[derive(Debug, Clone)]
pub(crate) struct KernelSource {
    pub name: String,
    pub source: String,
}

/// One kernel argument to bind, in declaration order. `n` and the result
/// buffers precede these and are bound by the dispatcher directly.
#[derive(Clone)]
pub(crate) enum ArgStep {
    /// A whole-array pointer (group component or plain array terminal).
    Buffer(VectorHandle),
    /// A scalar passed by value.
    Value(Scalar),
    /// A view terminal: base pointer, start, then size/stride per
    /// dimension.
    Slice(View),
}

struct Synth {
    /// Parameter declarations after `n` and the result pointers.
    params: Vec<String>,
    /// User function definitions and slice indexing helpers.
    preamble: String,
    prm: usize,
    fun: usize,
}

impl Synth {
    fn new() -> Self {
        Synth {
            params: Vec::new(),
            preamble: String::new(),
            prm: 0,
            fun: 0,
        }
    }

    /// Renders one expression for component slot `slot` of a `width`-wide
    /// broadcast. Counters must be reset between slots so equal terminals
    /// get equal positions in every slot.
    fn broadcast_expr(&mut self, expr: &Expr, slot: usize, dtype: DType, out: &mut String) {
        let c = slot + 1;
        match expr {
            // Shared terminals: declared once at slot 0 under component 1,
            // referenced by name everywhere else.
            Expr::Value(v) => {
                self.prm += 1;
                if slot == 0 {
                    self.params.push(format!("{} prm_1_{}", v.dtype().cl_name(), self.prm));
                }
                let _ = write!(out, "prm_1_{}", self.prm);
            }
            Expr::Multi(values) if values.len() == 1 => {
                self.prm += 1;
                if slot == 0 {
                    self.params
                        .push(format!("{} prm_1_{}", values[0].dtype().cl_name(), self.prm));
                }
                let _ = write!(out, "prm_1_{}", self.prm);
            }
            Expr::Array(v) => {
                self.prm += 1;
                if slot == 0 {
                    self.params.push(format!(
                        "global {} *prm_1_{}",
                        v.borrow().dtype().cl_name(),
                        self.prm
                    ));
                }
                let _ = write!(out, "prm_1_{}[idx]", self.prm);
            }
            // Per-slot terminals.
            Expr::Multi(values) => {
                self.prm += 1;
                self.params.push(format!(
                    "{} prm_{}_{}",
                    values[slot].dtype().cl_name(),
                    c,
                    self.prm
                ));
                let _ = write!(out, "prm_{}_{}", c, self.prm);
            }
            Expr::Group(components) => {
                self.prm += 1;
                self.params.push(format!(
                    "global {} *prm_{}_{}",
                    components[slot].borrow().dtype().cl_name(),
                    c,
                    self.prm
                ));
                let _ = write!(out, "prm_{}_{}[idx]", c, self.prm);
            }
            Expr::View(view) => {
                self.prm += 1;
                let d = view.descriptor();
                self.preamble.push_str(&d.indexing_function(c, self.prm));
                self.params.push(d.parameter_declaration(view.dtype(), c, self.prm));
                out.push_str(&d.partial_expression(c, self.prm));
            }
            Expr::Unary(op, child) => {
                let _ = write!(out, "{}( ", op.symbol());
                self.broadcast_expr(child, slot, dtype, out);
                out.push_str(" )");
            }
            Expr::Binary(op, lhs, rhs) => {
                out.push_str("( ");
                self.broadcast_expr(lhs, slot, dtype, out);
                let _ = write!(out, " {} ", op.symbol());
                self.broadcast_expr(rhs, slot, dtype, out);
                out.push_str(" )");
            }
            Expr::Call(func, args) => {
                match func {
                    Func::Builtin(name) => out.push_str(name),
                    Func::User(f) => {
                        self.fun += 1;
                        if slot == 0 {
                            self.define_user_function(f.arity(), f.body(), 1, self.fun, dtype);
                        }
                        let _ = write!(out, "func_1_{}", self.fun);
                    }
                }
                out.push('(');
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.broadcast_expr(a, slot, dtype, out);
                }
                out.push(')');
            }
        }
    }

    /// Renders one tuple sub-expression under component index `c`
    /// (1-based). Nothing is shared between tuple components.
    fn single_expr(&mut self, expr: &Expr, c: usize, dtype: DType, out: &mut String) {
        match expr {
            Expr::Value(v) => {
                self.prm += 1;
                self.params
                    .push(format!("{} prm_{}_{}", v.dtype().cl_name(), c, self.prm));
                let _ = write!(out, "prm_{}_{}", c, self.prm);
            }
            Expr::Multi(values) => {
                self.prm += 1;
                self.params
                    .push(format!("{} prm_{}_{}", values[0].dtype().cl_name(), c, self.prm));
                let _ = write!(out, "prm_{}_{}", c, self.prm);
            }
            Expr::Array(v) => {
                self.prm += 1;
                self.params.push(format!(
                    "global {} *prm_{}_{}",
                    v.borrow().dtype().cl_name(),
                    c,
                    self.prm
                ));
                let _ = write!(out, "prm_{}_{}[idx]", c, self.prm);
            }
            Expr::Group(_) => {
                // Rejected by validation before synthesis.
                debug_assert!(false, "grouped terminal in tuple expression");
            }
            Expr::View(view) => {
                self.prm += 1;
                let d = view.descriptor();
                self.preamble.push_str(&d.indexing_function(c, self.prm));
                self.params.push(d.parameter_declaration(view.dtype(), c, self.prm));
                out.push_str(&d.partial_expression(c, self.prm));
            }
            Expr::Unary(op, child) => {
                let _ = write!(out, "{}( ", op.symbol());
                self.single_expr(child, c, dtype, out);
                out.push_str(" )");
            }
            Expr::Binary(op, lhs, rhs) => {
                out.push_str("( ");
                self.single_expr(lhs, c, dtype, out);
                let _ = write!(out, " {} ", op.symbol());
                self.single_expr(rhs, c, dtype, out);
                out.push_str(" )");
            }
            Expr::Call(func, args) => {
                match func {
                    Func::Builtin(name) => out.push_str(name),
                    Func::User(f) => {
                        self.fun += 1;
                        self.define_user_function(f.arity(), f.body(), c, self.fun, dtype);
                        let _ = write!(out, "func_{}_{}", c, self.fun);
                    }
                }
                out.push('(');
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.single_expr(a, c, dtype, out);
                }
                out.push(')');
            }
        }
    }

    fn define_user_function(&mut self, arity: usize, body: &str, c: usize, k: usize, dtype: DType) {
        let t = dtype.cl_name();
        let _ = write!(self.preamble, "{} func_{}_{}(", t, c, k);
        for i in 1..=arity {
            if i > 1 {
                self.preamble.push_str(", ");
            }
            let _ = write!(self.preamble, "{} prm{}", t, i);
        }
        let _ = write!(self.preamble, ")\n{{\n\t{}\n}}\n\n", body);
    }
}

fn render(name: &str, dtype: DType, width: usize, synth: Synth, body: String) -> KernelSource {
    let mut src = String::from(KERNEL_HEADER);
    src.push('\n');
    src.push_str(&synth.preamble);
    let _ = write!(src, "kernel void {}(\n\tulong n", name);
    for i in 1..=width {
        let _ = write!(src, ",\n\tglobal {} *res_{}", dtype.cl_name(), i);
    }
    for p in &synth.params {
        let _ = write!(src, ",\n\t{}", p);
    }
    src.push_str(")\n{\n");
    src.push_str("\tfor(ulong idx = get_global_id(0); idx < n; idx += get_global_size(0))\n\t{\n");
    src.push_str(&body);
    src.push_str("\t}\n}\n");

    KernelSource {
        name: name.to_string(),
        source: src,
    }
}

/// Synthesizes the homogeneous broadcast kernel for a grouped assignment.
pub(crate) fn broadcast_kernel(expr: &Expr, width: usize, dtype: DType) -> KernelSource {
    let name = kernel_name(expr);
    let mut synth = Synth::new();
    let mut body = String::new();
    for slot in 0..width {
        synth.prm = 0;
        synth.fun = 0;
        let mut rhs = String::new();
        synth.broadcast_expr(expr, slot, dtype, &mut rhs);
        let _ = write!(body, "\t\tres_{}[idx] = {};\n", slot + 1, rhs);
    }
    render(&name, dtype, width, synth, body)
}

/// Synthesizes the fused kernel for a heterogeneous tuple assignment.
/// Every sub-expression is evaluated into a local before any result store,
/// so swaps like `(x, y) = (y, x)` read consistent inputs.
pub(crate) fn tuple_kernel(exprs: &[Expr], dtype: DType) -> KernelSource {
    let mut synth = Synth::new();
    let mut body = String::new();
    for (i, expr) in exprs.iter().enumerate() {
        synth.prm = 0;
        synth.fun = 0;
        let mut rhs = String::new();
        synth.single_expr(expr, i + 1, dtype, &mut rhs);
        let _ = write!(body, "\t\t{} buf_{} = {};\n", dtype.cl_name(), i + 1, rhs);
    }
    for i in 1..=exprs.len() {
        let _ = write!(body, "\t\tres_{0}[idx] = buf_{0};\n", i);
    }
    render("multi_expr_tuple", dtype, exprs.len(), synth, body)
}

/// Flattens the argument bindings of a broadcast assignment in the exact
/// order [`broadcast_kernel`] declared them.
pub(crate) fn broadcast_args(expr: &Expr, width: usize) -> Vec<ArgStep> {
    let mut steps = Vec::new();
    for slot in 0..width {
        collect_broadcast(expr, slot, &mut steps);
    }
    steps
}

fn collect_broadcast(expr: &Expr, slot: usize, steps: &mut Vec<ArgStep>) {
    match expr {
        Expr::Value(v) => {
            if slot == 0 {
                steps.push(ArgStep::Value(*v));
            }
        }
        Expr::Multi(values) if values.len() == 1 => {
            if slot == 0 {
                steps.push(ArgStep::Value(values[0]));
            }
        }
        Expr::Array(v) => {
            if slot == 0 {
                steps.push(ArgStep::Buffer(v.clone()));
            }
        }
        Expr::Multi(values) => steps.push(ArgStep::Value(values[slot])),
        Expr::Group(components) => steps.push(ArgStep::Buffer(components[slot].clone())),
        Expr::View(view) => steps.push(ArgStep::Slice(view.clone())),
        Expr::Unary(_, c) => collect_broadcast(c, slot, steps),
        Expr::Binary(_, l, r) => {
            collect_broadcast(l, slot, steps);
            collect_broadcast(r, slot, steps);
        }
        Expr::Call(_, args) => {
            for a in args {
                collect_broadcast(a, slot, steps);
            }
        }
    }
}

/// Flattens the argument bindings of a tuple assignment in declaration
/// order.
pub(crate) fn tuple_args(exprs: &[Expr]) -> Vec<ArgStep> {
    let mut steps = Vec::new();
    for expr in exprs {
        collect_single(expr, &mut steps);
    }
    steps
}

fn collect_single(expr: &Expr, steps: &mut Vec<ArgStep>) {
    match expr {
        Expr::Value(v) => steps.push(ArgStep::Value(*v)),
        Expr::Multi(values) => steps.push(ArgStep::Value(values[0])),
        Expr::Array(v) => steps.push(ArgStep::Buffer(v.clone())),
        Expr::Group(_) => {}
        Expr::View(view) => steps.push(ArgStep::Slice(view.clone())),
        Expr::Unary(_, c) => collect_single(c, steps),
        Expr::Binary(_, l, r) => {
            collect_single(l, steps);
            collect_single(r, steps);
        }
        Expr::Call(_, args) => {
            for a in args {
                collect_single(a, steps);
            }
        }
    }
}
