//! Small dense complex linear algebra on top of `ndarray`.
//!
//! Everything here works on arbitrary square shapes, but the solver only ever
//! feeds it 4×4 operators and length-4 vectors in the basis order
//! {ground, m = +1, m = 0, m = -1}. Shape errors are reported as
//! [`SolverError::DimensionMismatch`]; they indicate a programming error and
//! are never recovered from.

use itertools::Itertools;
use ndarray as nd;
use num_complex::Complex64 as C64;
use num_traits::Zero;
use crate::error::{ SolverError, SolverResult };

/// Dimension of the atomic Hilbert space.
pub const DIM: usize = 4;

fn mismatch(op: &'static str, left: &[usize], right: &[usize]) -> SolverError {
    SolverError::DimensionMismatch {
        op,
        left: left.to_vec(),
        right: right.to_vec(),
    }
}

fn require_square<S>(op: &'static str, a: &nd::ArrayBase<S, nd::Ix2>)
    -> SolverResult<usize>
where S: nd::Data<Elem = C64>
{
    let (n, m) = a.dim();
    (n == m).then_some(n).ok_or_else(|| mismatch(op, &[n], &[m]))
}

/// Construct a matrix from a list of rows.
///
/// Fails if the rows are ragged or the result is not square.
pub fn from_rows<R>(rows: &[R]) -> SolverResult<nd::Array2<C64>>
where R: AsRef<[C64]>
{
    let n = rows.len();
    let entries: Vec<C64>
        = rows.iter()
        .map(|row| {
            let row = row.as_ref();
            (row.len() == n).then_some(row)
                .ok_or_else(|| mismatch("from_rows", &[n, n], &[row.len()]))
        })
        .collect::<SolverResult<Vec<&[C64]>>>()?
        .into_iter()
        .flatten()
        .copied()
        .collect();
    nd::Array2::from_shape_vec((n, n), entries)
        .map_err(|_| mismatch("from_rows", &[n, n], &[n * n]))
}

/// `n`-dimensional basis vector `|k⟩`.
pub fn basis_vector(n: usize, k: usize) -> SolverResult<nd::Array1<C64>> {
    if k >= n { return Err(mismatch("basis_vector", &[n], &[k])); }
    let mut v: nd::Array1<C64> = nd::Array1::zeros(n);
    v[k] = C64::from(1.0);
    Ok(v)
}

/// Compute the outer product `|a⟩⟨b|`.
pub fn outer_prod(a: &nd::Array1<C64>, b: &nd::Array1<C64>)
    -> nd::Array2<C64>
{
    nd::Array2::from_shape_fn((a.len(), b.len()), |(i, j)| a[i] * b[j].conj())
}

/// The operator `|i⟩⟨j|` on an `n`-dimensional space.
pub fn ket_bra(n: usize, i: usize, j: usize) -> SolverResult<nd::Array2<C64>> {
    Ok(outer_prod(&basis_vector(n, i)?, &basis_vector(n, j)?))
}

/// Hermitian conjugate.
pub fn dagger<S>(a: &nd::ArrayBase<S, nd::Ix2>) -> nd::Array2<C64>
where S: nd::Data<Elem = C64>
{
    a.t().mapv(|x| x.conj())
}

/// Return `true` if `a` is square and equal to its Hermitian conjugate within
/// an absolute tolerance.
pub fn is_hermitian<S>(a: &nd::ArrayBase<S, nd::Ix2>, tol: f64) -> bool
where S: nd::Data<Elem = C64>
{
    let n = a.nrows();
    a.is_square()
        && (0..n).cartesian_product(0..n)
            .all(|(i, j)| (a[[i, j]] - a[[j, i]].conj()).norm() <= tol)
}

/// Checked elementwise sum.
pub fn add<SA, SB>(
    a: &nd::ArrayBase<SA, nd::Ix2>,
    b: &nd::ArrayBase<SB, nd::Ix2>,
) -> SolverResult<nd::Array2<C64>>
where
    SA: nd::Data<Elem = C64>,
    SB: nd::Data<Elem = C64>,
{
    if a.shape() != b.shape() {
        return Err(mismatch("add", a.shape(), b.shape()));
    }
    Ok(a + b)
}

/// Multiply every element by a complex scalar.
pub fn scale<S>(a: &nd::ArrayBase<S, nd::Ix2>, z: C64) -> nd::Array2<C64>
where S: nd::Data<Elem = C64>
{
    a.mapv(|x| x * z)
}

/// Checked matrix product.
pub fn matmul<SA, SB>(
    a: &nd::ArrayBase<SA, nd::Ix2>,
    b: &nd::ArrayBase<SB, nd::Ix2>,
) -> SolverResult<nd::Array2<C64>>
where
    SA: nd::Data<Elem = C64>,
    SB: nd::Data<Elem = C64>,
{
    if a.ncols() != b.nrows() {
        return Err(mismatch("matmul", a.shape(), b.shape()));
    }
    Ok(a.dot(b))
}

/// Checked matrix-vector product.
pub fn matvec<SA, SB>(
    a: &nd::ArrayBase<SA, nd::Ix2>,
    v: &nd::ArrayBase<SB, nd::Ix1>,
) -> SolverResult<nd::Array1<C64>>
where
    SA: nd::Data<Elem = C64>,
    SB: nd::Data<Elem = C64>,
{
    if a.ncols() != v.len() {
        return Err(mismatch("matvec", a.shape(), v.shape()));
    }
    Ok(a.dot(v))
}

/// Checked access to the `(i, j)`-th element.
pub fn element<S>(a: &nd::ArrayBase<S, nd::Ix2>, i: usize, j: usize)
    -> SolverResult<C64>
where S: nd::Data<Elem = C64>
{
    a.get((i, j)).copied()
        .ok_or_else(|| mismatch("element", a.shape(), &[i, j]))
}

/// Sum of the main diagonal of a square matrix.
pub fn trace<S>(a: &nd::ArrayBase<S, nd::Ix2>) -> SolverResult<C64>
where S: nd::Data<Elem = C64>
{
    require_square("trace", a)?;
    Ok(a.diag().iter().fold(C64::zero(), |acc, x| acc + *x))
}

/// Compute the commutator `[A, B] = A B - B A`.
pub fn commutator<SA, SB>(
    A: &nd::ArrayBase<SA, nd::Ix2>,
    B: &nd::ArrayBase<SB, nd::Ix2>,
) -> nd::Array2<C64>
where
    SA: nd::Data<Elem = C64>,
    SB: nd::Data<Elem = C64>,
{
    A.dot(B) - B.dot(A)
}

/// Compute the anti-commutator `{A, B} = A B + B A`.
pub fn anti_commutator<SA, SB>(
    A: &nd::ArrayBase<SA, nd::Ix2>,
    B: &nd::ArrayBase<SB, nd::Ix2>,
) -> nd::Array2<C64>
where
    SA: nd::Data<Elem = C64>,
    SB: nd::Data<Elem = C64>,
{
    A.dot(B) + B.dot(A)
}
