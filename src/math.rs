use faer::{
    linalg::{solvers::Llt, triangular_solve::solve_upper_triangular_in_place},
    Col, ColMut, Mat, MatRef, Par, Side,
};
use itertools::izip;

/// Cholesky factorization `L Lᵀ = matrix`.
///
/// Returns `None` if the matrix is not symmetric positive definite.
pub(crate) fn cholesky(matrix: &Mat<f64>) -> Option<Llt<f64>> {
    if matrix.ncols() != matrix.nrows() {
        return None;
    }
    Llt::new(matrix.as_ref(), Side::Lower).ok()
}

/// Overwrite `x` with `L⁻ᵀ x`.
pub(crate) fn solve_lower_transpose_in_place(lower: MatRef<'_, f64>, x: &mut [f64]) {
    assert!(lower.nrows() == x.len());
    solve_upper_triangular_in_place(
        lower.transpose(),
        ColMut::from_slice_mut(x).as_mat_mut(),
        Par::Seq,
    );
}

/// `‖Lᵀ (x - center)‖²`, which equals `(x - center)ᵀ A (x - center)` for `A = L Lᵀ`.
pub(crate) fn lower_quad_form(lower: MatRef<'_, f64>, x: &[f64], center: &[f64]) -> f64 {
    assert!(center.len() == x.len());
    assert!(lower.nrows() == x.len());
    let diff = Col::from_fn(x.len(), |i| x[i] - center[i]);
    (lower.transpose() * diff).squared_norm_l2()
}

#[inline]
pub(crate) fn sum_of_squares(x: &[f64]) -> f64 {
    x.iter().map(|&v| v * v).sum()
}

#[inline]
pub(crate) fn max_abs_diff(a: &[f64], b: &[f64]) -> f64 {
    assert!(a.len() == b.len());
    izip!(a, b).fold(0f64, |acc, (&a, &b)| acc.max((a - b).abs()))
}
