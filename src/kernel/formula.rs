//! Symbolic kernel formulas
//!
//! A [`Formula`] is a closed-form expression of one point pair. It is compiled
//! once into a postfix [`Program`] and then evaluated pair by pair inside a
//! reduction against a vector, so the full kernel matrix never exists in
//! memory. Pair quantities such as norms and the cosine are leaves; only the
//! leaves a program references are computed.

use crate::core::{PointSetRef, Real, Result};
use crate::kernel::linear::{dot, squared_distance};
use crate::kernel::traits::{check_same_dim, divide_by_norms};
use rayon::prelude::*;
use std::fmt;
use std::ops;

/// Expression over one pair `(x, y)`
#[derive(Debug, Clone, PartialEq)]
pub enum Formula {
    Const(f64),
    /// `x · y`
    Dot,
    /// `‖x‖`
    NormX,
    /// `‖y‖`
    NormY,
    /// `x · y / (‖x‖‖y‖)`, 0 when either norm vanishes
    Cosine,
    /// `‖x − y‖²`
    SquaredDistance,
    /// `‖ ‖y‖x − ‖x‖y ‖`
    ScaledDiffNorm,
    /// `‖ ‖y‖x + ‖x‖y ‖`
    ScaledSumNorm,
    Neg(Box<Formula>),
    Add(Box<Formula>, Box<Formula>),
    Sub(Box<Formula>, Box<Formula>),
    Mul(Box<Formula>, Box<Formula>),
    Div(Box<Formula>, Box<Formula>),
    Pow(Box<Formula>, Box<Formula>),
    Atan2(Box<Formula>, Box<Formula>),
    Acos(Box<Formula>),
    Sin(Box<Formula>),
    Cos(Box<Formula>),
    Exp(Box<Formula>),
    /// Clamp into `[-1, 1]`
    ClampUnit(Box<Formula>),
}

impl Formula {
    pub fn constant(value: f64) -> Self {
        Formula::Const(value)
    }

    pub fn acos(self) -> Self {
        Formula::Acos(Box::new(self))
    }

    pub fn sin(self) -> Self {
        Formula::Sin(Box::new(self))
    }

    pub fn cos(self) -> Self {
        Formula::Cos(Box::new(self))
    }

    pub fn exp(self) -> Self {
        Formula::Exp(Box::new(self))
    }

    pub fn clamp_unit(self) -> Self {
        Formula::ClampUnit(Box::new(self))
    }

    pub fn powf(self, exponent: Formula) -> Self {
        Formula::Pow(Box::new(self), Box::new(exponent))
    }

    /// Four-quadrant arctangent of `y / x`
    pub fn atan2(y: Formula, x: Formula) -> Self {
        Formula::Atan2(Box::new(y), Box::new(x))
    }

    /// Compile into a postfix program in precision `T`
    pub fn compile<T: Real>(&self) -> Program<T> {
        let mut program = Program {
            ops: Vec::new(),
            leaves: LeafSet::default(),
            max_stack: 0,
        };
        let mut depth = 0;
        self.emit(&mut program, &mut depth);
        program
    }

    fn emit<T: Real>(&self, program: &mut Program<T>, depth: &mut usize) {
        let leaf = |program: &mut Program<T>, depth: &mut usize, leaf: Leaf| {
            program.leaves.insert(leaf);
            program.push(Op::Leaf(leaf), depth);
        };
        match self {
            Formula::Const(c) => program.push(Op::Const(T::from_f64(*c)), depth),
            Formula::Dot => leaf(program, depth, Leaf::Dot),
            Formula::NormX => leaf(program, depth, Leaf::NormX),
            Formula::NormY => leaf(program, depth, Leaf::NormY),
            Formula::Cosine => leaf(program, depth, Leaf::Cosine),
            Formula::SquaredDistance => leaf(program, depth, Leaf::SquaredDistance),
            Formula::ScaledDiffNorm => leaf(program, depth, Leaf::ScaledDiffNorm),
            Formula::ScaledSumNorm => leaf(program, depth, Leaf::ScaledSumNorm),
            Formula::Neg(a) => a.emit_unary(Unary::Neg, program, depth),
            Formula::Acos(a) => a.emit_unary(Unary::Acos, program, depth),
            Formula::Sin(a) => a.emit_unary(Unary::Sin, program, depth),
            Formula::Cos(a) => a.emit_unary(Unary::Cos, program, depth),
            Formula::Exp(a) => a.emit_unary(Unary::Exp, program, depth),
            Formula::ClampUnit(a) => a.emit_unary(Unary::ClampUnit, program, depth),
            Formula::Add(a, b) => Self::emit_binary(a, b, Binary::Add, program, depth),
            Formula::Sub(a, b) => Self::emit_binary(a, b, Binary::Sub, program, depth),
            Formula::Mul(a, b) => Self::emit_binary(a, b, Binary::Mul, program, depth),
            Formula::Div(a, b) => Self::emit_binary(a, b, Binary::Div, program, depth),
            Formula::Pow(a, b) => Self::emit_binary(a, b, Binary::Pow, program, depth),
            Formula::Atan2(a, b) => Self::emit_binary(a, b, Binary::Atan2, program, depth),
        }
    }

    fn emit_unary<T: Real>(&self, op: Unary, program: &mut Program<T>, depth: &mut usize) {
        self.emit(program, depth);
        program.ops.push(Op::Unary(op));
    }

    fn emit_binary<T: Real>(
        lhs: &Formula,
        rhs: &Formula,
        op: Binary,
        program: &mut Program<T>,
        depth: &mut usize,
    ) {
        lhs.emit(program, depth);
        rhs.emit(program, depth);
        program.ops.push(Op::Binary(op));
        *depth -= 1;
    }

    /// Evaluate on a single pair, for checks and small inputs
    pub fn evaluate<T: Real>(&self, x: &[T], y: &[T]) -> T {
        let program = self.compile::<T>();
        let nx = dot(x, x).sqrt();
        let ny = dot(y, y).sqrt();
        let mut stack = Vec::with_capacity(program.max_stack);
        program.evaluate(x, y, nx, ny, &mut stack)
    }
}

macro_rules! impl_formula_op {
    ($trait:ident, $method:ident, $variant:ident) => {
        impl ops::$trait for Formula {
            type Output = Formula;

            fn $method(self, rhs: Formula) -> Formula {
                Formula::$variant(Box::new(self), Box::new(rhs))
            }
        }
    };
}

impl_formula_op!(Add, add, Add);
impl_formula_op!(Sub, sub, Sub);
impl_formula_op!(Mul, mul, Mul);
impl_formula_op!(Div, div, Div);

impl ops::Neg for Formula {
    type Output = Formula;

    fn neg(self) -> Formula {
        Formula::Neg(Box::new(self))
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Formula::Const(c) => write!(f, "{c}"),
            Formula::Dot => write!(f, "(x|y)"),
            Formula::NormX => write!(f, "Norm2(x)"),
            Formula::NormY => write!(f, "Norm2(y)"),
            Formula::Cosine => write!(f, "Cos(x,y)"),
            Formula::SquaredDistance => write!(f, "SqDist(x,y)"),
            Formula::ScaledDiffNorm => write!(f, "Norm2(Norm2(y)*x-Norm2(x)*y)"),
            Formula::ScaledSumNorm => write!(f, "Norm2(Norm2(y)*x+Norm2(x)*y)"),
            Formula::Neg(a) => write!(f, "-({a})"),
            Formula::Add(a, b) => write!(f, "({a}+{b})"),
            Formula::Sub(a, b) => write!(f, "({a}-{b})"),
            Formula::Mul(a, b) => write!(f, "({a}*{b})"),
            Formula::Div(a, b) => write!(f, "({a}/{b})"),
            Formula::Pow(a, b) => write!(f, "Powf({a},{b})"),
            Formula::Atan2(a, b) => write!(f, "Atan2({a},{b})"),
            Formula::Acos(a) => write!(f, "Acos({a})"),
            Formula::Sin(a) => write!(f, "Sin({a})"),
            Formula::Cos(a) => write!(f, "Cos({a})"),
            Formula::Exp(a) => write!(f, "Exp({a})"),
            Formula::ClampUnit(a) => write!(f, "Clamp({a},-1,1)"),
        }
    }
}

/// Pair quantity a program can read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leaf {
    Dot,
    NormX,
    NormY,
    Cosine,
    SquaredDistance,
    ScaledDiffNorm,
    ScaledSumNorm,
}

impl Leaf {
    const COUNT: usize = 7;

    fn index(self) -> usize {
        self as usize
    }
}

/// Which leaves a program references
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeafSet([bool; Leaf::COUNT]);

impl LeafSet {
    fn insert(&mut self, leaf: Leaf) {
        self.0[leaf.index()] = true;
    }

    pub fn contains(&self, leaf: Leaf) -> bool {
        self.0[leaf.index()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unary {
    Neg,
    Acos,
    Sin,
    Cos,
    Exp,
    ClampUnit,
}

impl Unary {
    #[inline]
    fn apply<T: Real>(self, a: T) -> T {
        match self {
            Unary::Neg => -a,
            Unary::Acos => a.acos(),
            Unary::Sin => a.sin(),
            Unary::Cos => a.cos(),
            Unary::Exp => a.exp(),
            Unary::ClampUnit => a.max(-T::one()).min(T::one()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binary {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Atan2,
}

impl Binary {
    #[inline]
    fn apply<T: Real>(self, a: T, b: T) -> T {
        match self {
            Binary::Add => a + b,
            Binary::Sub => a - b,
            Binary::Mul => a * b,
            Binary::Div => a / b,
            Binary::Pow => a.powf(b),
            Binary::Atan2 => a.atan2(b),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op<T> {
    Const(T),
    Leaf(Leaf),
    Unary(Unary),
    Binary(Binary),
}

/// Compiled postfix form of a [`Formula`]
#[derive(Debug, Clone, PartialEq)]
pub struct Program<T> {
    ops: Vec<Op<T>>,
    leaves: LeafSet,
    max_stack: usize,
}

impl<T: Real> Program<T> {
    fn push(&mut self, op: Op<T>, depth: &mut usize) {
        self.ops.push(op);
        *depth += 1;
        self.max_stack = self.max_stack.max(*depth);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn leaves(&self) -> LeafSet {
        self.leaves
    }

    /// Deepest evaluation stack the program needs
    pub fn max_stack(&self) -> usize {
        self.max_stack
    }

    fn leaf_values(&self, x: &[T], y: &[T], nx: T, ny: T) -> [T; Leaf::COUNT] {
        let mut values = [T::zero(); Leaf::COUNT];
        let needs = |leaf| self.leaves.contains(leaf);

        if needs(Leaf::Dot) || needs(Leaf::Cosine) {
            let d = dot(x, y);
            values[Leaf::Dot.index()] = d;
            values[Leaf::Cosine.index()] = divide_by_norms(d, nx, ny);
        }
        values[Leaf::NormX.index()] = nx;
        values[Leaf::NormY.index()] = ny;
        if needs(Leaf::SquaredDistance) {
            values[Leaf::SquaredDistance.index()] = squared_distance(x, y);
        }
        if needs(Leaf::ScaledDiffNorm) || needs(Leaf::ScaledSumNorm) {
            let (mut diff, mut sum) = (T::zero(), T::zero());
            for (&a, &b) in x.iter().zip(y) {
                let d = ny * a - nx * b;
                let s = ny * a + nx * b;
                diff = d.mul_add(d, diff);
                sum = s.mul_add(s, sum);
            }
            values[Leaf::ScaledDiffNorm.index()] = diff.sqrt();
            values[Leaf::ScaledSumNorm.index()] = sum.sqrt();
        }
        values
    }

    /// Evaluate on one pair given both norms; `stack` is scratch space
    pub fn evaluate(&self, x: &[T], y: &[T], nx: T, ny: T, stack: &mut Vec<T>) -> T {
        let values = self.leaf_values(x, y, nx, ny);
        stack.clear();
        for op in &self.ops {
            match *op {
                Op::Const(c) => stack.push(c),
                Op::Leaf(leaf) => stack.push(values[leaf.index()]),
                Op::Unary(u) => {
                    let a = pop(stack);
                    stack.push(u.apply(a));
                }
                Op::Binary(b) => {
                    let rhs = pop(stack);
                    let lhs = pop(stack);
                    stack.push(b.apply(lhs, rhs));
                }
            }
        }
        pop(stack)
    }
}

// Compiled programs are balanced, so an empty pop only happens for an empty program.
#[inline]
fn pop<T: Real>(stack: &mut Vec<T>) -> T {
    stack.pop().unwrap_or_else(T::nan)
}

/// `Σ_j f(x1_i, x2_j) · v_j` for every row `i`, without materializing the matrix
pub fn matrix_vector_product<T: Real>(
    program: &Program<T>,
    x1: PointSetRef<'_, T>,
    x2: PointSetRef<'_, T>,
    v: &[T],
) -> Result<Vec<T>> {
    check_same_dim(x1, x2)?;
    if x1.is_empty() {
        return Ok(Vec::new());
    }
    let n1 = x1.norms();
    let n2 = x2.norms();
    let out = x1
        .as_slice()
        .par_chunks_exact(x1.dim())
        .zip(n1.par_iter())
        .map_init(
            || Vec::with_capacity(program.max_stack()),
            |stack, (xi, &nxi)| {
                x2.rows()
                    .zip(&n2)
                    .zip(v)
                    .fold(T::zero(), |acc, ((yj, &nyj), &vj)| {
                        program.evaluate(xi, yj, nxi, nyj, stack).mul_add(vj, acc)
                    })
            },
        )
        .collect();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PointSet;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn test_leaves() {
        let x = [3.0, 4.0];
        let y = [0.0, 2.0];
        assert_eq!(Formula::Dot.evaluate(&x, &y), 8.0);
        assert_eq!(Formula::NormX.evaluate(&x, &y), 5.0);
        assert_eq!(Formula::NormY.evaluate(&x, &y), 2.0);
        assert_relative_eq!(Formula::Cosine.evaluate(&x, &y), 0.8, epsilon = 1e-12);
        assert_eq!(Formula::SquaredDistance.evaluate(&x, &y), 13.0);
    }

    #[test]
    fn test_cosine_zero_guard() {
        let zero = [0.0, 0.0];
        let y = [1.0, 0.0];
        assert_eq!(Formula::Cosine.evaluate(&zero, &y), 0.0);
    }

    #[test]
    fn test_arithmetic_and_precedence() {
        // (2 - 3) * 4 / -(2)
        let f = (Formula::constant(2.0) - Formula::constant(3.0)) * Formula::constant(4.0)
            / -Formula::constant(2.0);
        assert_eq!(f.evaluate::<f64>(&[], &[]), 2.0);

        let p = Formula::constant(9.0).powf(Formula::constant(0.5));
        assert_eq!(p.evaluate::<f64>(&[], &[]), 3.0);
    }

    #[test]
    fn test_stable_angle_matches_acos() {
        let x = [1.0, 0.0, 1.0];
        let y = [0.0, 2.0, 1.0];
        let stable = Formula::constant(2.0)
            * Formula::atan2(Formula::ScaledDiffNorm, Formula::ScaledSumNorm);
        let classic = Formula::Cosine.clamp_unit().acos();
        assert_relative_eq!(
            stable.evaluate(&x, &y),
            classic.evaluate(&x, &y),
            epsilon = 1e-12
        );

        // orthogonal unit vectors are a quarter turn apart
        let angle = stable.evaluate(&[1.0, 0.0], &[0.0, 1.0]);
        assert_relative_eq!(angle, PI / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_clamp_keeps_acos_finite() {
        let x = [1.0f64, 2.0, 3.0];
        let theta = Formula::Cosine.clamp_unit().acos().evaluate(&x, &x);
        assert!(theta.is_finite());
        assert!(theta.abs() < 1e-7);
    }

    #[test]
    fn test_compile_tracks_leaves_and_stack() {
        let f = Formula::NormX * Formula::NormY * (Formula::constant(1.0) - Formula::Cosine);
        let program = f.compile::<f64>();
        assert!(program.leaves().contains(Leaf::Cosine));
        assert!(!program.leaves().contains(Leaf::SquaredDistance));
        assert_eq!(program.len(), 7);
        assert_eq!(program.max_stack(), 3);
    }

    #[test]
    fn test_display() {
        let f = Formula::constant(2.0) * Formula::Cosine.clamp_unit().acos();
        assert_eq!(f.to_string(), "(2*Acos(Clamp(Cos(x,y),-1,1)))");
    }

    #[test]
    fn test_matrix_vector_product() {
        let x1 = PointSet::from_rows(&[[1.0, 0.0], [0.0, 1.0], [1.0, 1.0]]).unwrap();
        let x2 = PointSet::from_rows(&[[2.0, 0.0], [0.0, 3.0]]).unwrap();
        let program = Formula::Dot.compile::<f64>();
        let out = matrix_vector_product(&program, x1.view(), x2.view(), &[1.0, 10.0]).unwrap();
        assert_eq!(out, vec![2.0, 30.0, 32.0]);
    }

    #[test]
    fn test_matrix_vector_product_dim_mismatch() {
        let x1 = PointSet::from_rows(&[[1.0, 0.0]]).unwrap();
        let x2 = PointSet::from_rows(&[[1.0, 0.0, 0.0]]).unwrap();
        let program = Formula::Dot.compile::<f64>();
        assert!(matrix_vector_product(&program, x1.view(), x2.view(), &[1.0]).is_err());
    }
}
