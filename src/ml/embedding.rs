// ============================================================
// Layer 5 — Eigendecomposition
// ============================================================
// Matrix(n×n symmetric) → Record { eigenvalue: Vector(k),
//                                  eigenvector: Matrix(n×k) }
//
// `which` selects the k eigenpairs:
//   LA — largest algebraic (default; leading eigenvectors of the
//        normalized operator from the Laplacian stage)
//   SA — smallest algebraic
//   LM — largest magnitude
//
// Columns are ordered from least to most significant under `which`,
// so the most informative eigenvectors are always the LAST columns.
// Downstream stages select them with a trailing column range.

use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector, SymmetricEigen};
use once_cell::sync::Lazy;

use crate::domain::data::Data;
use crate::domain::error::ParamError;
use crate::domain::param::{Args, Param, ParamType, Params, Schema};
use crate::domain::traits::Algorithm;
use crate::ml::processor::{Processor, PROCESSOR};

static SCHEMA: Lazy<Schema> = Lazy::new(|| {
    Schema::builder("EigenDecomposition")
        .extend(&PROCESSOR)
        .param(Param::new("n_eigval", &[ParamType::Int]).with_default(32).positional())
        .param(Param::new("which", &[ParamType::Str]).with_default("LA"))
        .build()
});

#[derive(Debug, Default)]
pub struct EigenDecomposition;

impl EigenDecomposition {
    pub fn processor(args: Args) -> Result<Processor, ParamError> {
        Processor::stored(Self, args)
    }
}

impl Algorithm for EigenDecomposition {
    fn name(&self) -> &'static str {
        "EigenDecomposition"
    }

    fn schema(&self) -> &'static Schema {
        &SCHEMA
    }

    fn compute(&self, params: &Params, input: Data) -> Result<Data> {
        let m = input.into_matrix()?;
        let k = params.usize("n_eigval")?;
        if !m.is_square() {
            bail!("eigendecomposition needs a square matrix, got {}x{}", m.nrows(), m.ncols());
        }
        let n = m.nrows();
        if k == 0 || k > n {
            bail!("n_eigval must be in 1..={n}, got {k}");
        }

        // significance key: higher means more significant under `which`
        let significance: fn(f64) -> f64 = match params.str("which")? {
            "LA" => |v| v,
            "SA" => |v| -v,
            "LM" => f64::abs,
            other => bail!("unknown eigenvalue selection '{other}'"),
        };

        let eigen = SymmetricEigen::new(m);
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| {
            significance(eigen.eigenvalues[a]).total_cmp(&significance(eigen.eigenvalues[b]))
        });
        let chosen = &order[n - k..];

        let values = DVector::from_iterator(k, chosen.iter().map(|&c| eigen.eigenvalues[c]));
        let vectors = DMatrix::from_fn(n, k, |i, j| eigen.eigenvectors[(i, chosen[j])]);

        tracing::debug!("EigenDecomposition: kept {k} of {n} eigenpairs ({})", params.str("which")?);
        Ok(Data::Record(vec![
            ("eigenvalue".to_string(), Data::Vector(values)),
            ("eigenvector".to_string(), Data::Matrix(vectors)),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diagonal() -> Data {
        Data::Matrix(DMatrix::from_diagonal(&DVector::from_vec(vec![3.0, -5.0, 1.0, 2.0])))
    }

    fn eigenvalues(which: &str, k: usize) -> Vec<f64> {
        let p = EigenDecomposition::processor(Args::new().arg(k).set("which", which)).unwrap();
        let out = p.apply(diagonal()).unwrap();
        out.into_field("eigenvalue").unwrap().into_vector().unwrap().iter().copied().collect()
    }

    #[test]
    fn test_most_significant_pairs_come_last() {
        assert_eq!(eigenvalues("LA", 2), vec![2.0, 3.0]);
        assert_eq!(eigenvalues("SA", 2), vec![1.0, -5.0]);
        assert_eq!(eigenvalues("LM", 2), vec![3.0, -5.0]);
    }

    #[test]
    fn test_output_shapes_and_vectors() {
        let p = EigenDecomposition::processor(Args::new().arg(3)).unwrap();
        let out = p.apply(diagonal()).unwrap();
        let vectors = out.field("eigenvector").cloned().unwrap().into_matrix().unwrap();
        assert_eq!(vectors.shape(), (4, 3));
        // largest eigenvalue 3.0 belongs to the first basis vector
        assert!((vectors[(0, 2)].abs() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_too_many_eigenvalues() {
        let p = EigenDecomposition::processor(Args::new().arg(5)).unwrap();
        assert!(p.apply(diagonal()).is_err());
    }
}
