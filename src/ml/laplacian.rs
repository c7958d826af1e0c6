// ============================================================
// Layer 5 — Symmetric Normalized Laplacian
// ============================================================
// Matrix(n×n affinity A) → Matrix(n×n).
//
// Produces the normalized operator  S = D^{-1/2} A D^{-1/2},
// where D is the diagonal degree matrix. The normalized Laplacian
// is L_sym = I − S, so both share eigenvectors and the LARGEST
// eigenvalues of S are the SMALLEST of L_sym. Working with S lets
// the eigen stage pick its leading eigenpairs directly.
//
// Isolated points (degree 0) keep an all-zero row and column.

use anyhow::{bail, Result};
use nalgebra::DMatrix;
use once_cell::sync::Lazy;

use crate::domain::data::Data;
use crate::domain::error::ParamError;
use crate::domain::param::{Args, Params, Schema};
use crate::domain::traits::Algorithm;
use crate::ml::processor::{Processor, PROCESSOR};

static SCHEMA: Lazy<Schema> = Lazy::new(|| {
    Schema::builder("SymmetricNormalLaplacian")
        .extend(&PROCESSOR)
        .build()
});

#[derive(Debug, Default)]
pub struct SymmetricNormalLaplacian;

impl SymmetricNormalLaplacian {
    pub fn processor(args: Args) -> Result<Processor, ParamError> {
        Processor::stored(Self, args)
    }
}

impl Algorithm for SymmetricNormalLaplacian {
    fn name(&self) -> &'static str {
        "SymmetricNormalLaplacian"
    }

    fn schema(&self) -> &'static Schema {
        &SCHEMA
    }

    fn compute(&self, _params: &Params, input: Data) -> Result<Data> {
        let a = input.into_matrix()?;
        if !a.is_square() {
            bail!("affinity matrix must be square, got {}x{}", a.nrows(), a.ncols());
        }
        let inv_sqrt_degree: Vec<f64> = a
            .row_iter()
            .map(|row| {
                let degree = row.sum();
                if degree > 0.0 { degree.sqrt().recip() } else { 0.0 }
            })
            .collect();

        let n = a.nrows();
        let s = DMatrix::from_fn(n, n, |i, j| inv_sqrt_degree[i] * a[(i, j)] * inv_sqrt_degree[j]);
        Ok(Data::Matrix(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalizes_by_degree() {
        // path graph 0 - 1 - 2, plus isolated node 3
        let a = DMatrix::from_row_slice(4, 4, &[
            0.0, 1.0, 0.0, 0.0,
            1.0, 0.0, 1.0, 0.0,
            0.0, 1.0, 0.0, 0.0,
            0.0, 0.0, 0.0, 0.0,
        ]);
        let p = SymmetricNormalLaplacian::processor(Args::new()).unwrap();
        let s = p.apply(Data::Matrix(a)).unwrap().into_matrix().unwrap();

        let expected = 1.0 / 2f64.sqrt();
        assert!((s[(0, 1)] - expected).abs() < 1e-12);
        assert!((s[(1, 2)] - expected).abs() < 1e-12);
        assert_eq!(s, s.transpose());
        assert_eq!(s.row(3).sum(), 0.0);
    }
}
