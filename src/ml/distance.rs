// ============================================================
// Layer 5 — Pairwise Distance
// ============================================================
// Matrix(n×d) → Matrix(n×n), symmetric with a zero diagonal.
//
// Metrics:
//   euclidean   — ‖x − y‖₂
//   sqeuclidean — ‖x − y‖₂²
//   cityblock   — ‖x − y‖₁
//   cosine      — 1 − x·y / (‖x‖‖y‖), zero vectors count as distance 1

use anyhow::{bail, Result};
use nalgebra::DMatrix;
use once_cell::sync::Lazy;

use crate::domain::data::Data;
use crate::domain::error::ParamError;
use crate::domain::param::{Args, Param, ParamType, Params, Schema};
use crate::domain::traits::Algorithm;
use crate::ml::processor::{Processor, PROCESSOR};

static SCHEMA: Lazy<Schema> = Lazy::new(|| {
    Schema::builder("PairwiseDistance")
        .extend(&PROCESSOR)
        .param(Param::new("metric", &[ParamType::Str]).with_default("euclidean").positional())
        .build()
});

#[derive(Debug, Default)]
pub struct PairwiseDistance;

impl PairwiseDistance {
    pub fn processor(args: Args) -> Result<Processor, ParamError> {
        Processor::stored(Self, args)
    }
}

impl Algorithm for PairwiseDistance {
    fn name(&self) -> &'static str {
        "PairwiseDistance"
    }

    fn schema(&self) -> &'static Schema {
        &SCHEMA
    }

    fn compute(&self, params: &Params, input: Data) -> Result<Data> {
        let x = input.into_matrix()?;
        let metric: fn(&DMatrix<f64>, usize, usize) -> f64 = match params.str("metric")? {
            "euclidean"   => |x, i, j| (x.row(i) - x.row(j)).norm(),
            "sqeuclidean" => |x, i, j| (x.row(i) - x.row(j)).norm_squared(),
            "cityblock"   => |x, i, j| (x.row(i) - x.row(j)).abs().sum(),
            "cosine"      => cosine,
            other => bail!("unknown distance metric '{other}'"),
        };

        let n = x.nrows();
        let mut d = DMatrix::zeros(n, n);
        for i in 0..n {
            for j in (i + 1)..n {
                let v = metric(&x, i, j);
                d[(i, j)] = v;
                d[(j, i)] = v;
            }
        }
        Ok(Data::Matrix(d))
    }
}

fn cosine(x: &DMatrix<f64>, i: usize, j: usize) -> f64 {
    let (a, b) = (x.row(i), x.row(j));
    let denom = a.norm() * b.norm();
    if denom == 0.0 {
        return 1.0;
    }
    1.0 - a.dot(&b) / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points() -> Data {
        Data::Matrix(DMatrix::from_row_slice(3, 2, &[0.0, 0.0, 3.0, 4.0, 0.0, 1.0]))
    }

    fn distances(metric: &str) -> DMatrix<f64> {
        PairwiseDistance::processor(Args::new().arg(metric))
            .unwrap()
            .apply(points())
            .unwrap()
            .into_matrix()
            .unwrap()
    }

    #[test]
    fn test_euclidean_is_symmetric_with_zero_diagonal() {
        let d = distances("euclidean");
        assert_eq!(d.shape(), (3, 3));
        assert_eq!(d[(0, 1)], 5.0);
        assert_eq!(d[(1, 0)], 5.0);
        assert!((0..3).all(|i| d[(i, i)] == 0.0));
    }

    #[test]
    fn test_other_metrics() {
        assert_eq!(distances("sqeuclidean")[(0, 1)], 25.0);
        assert_eq!(distances("cityblock")[(0, 1)], 7.0);
        // zero vector against anything
        assert_eq!(distances("cosine")[(0, 2)], 1.0);
        assert!((distances("cosine")[(1, 2)] - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_metric_fails_at_apply() {
        let p = PairwiseDistance::processor(Args::new().arg("chebyshev")).unwrap();
        assert!(p.apply(points()).is_err());
    }
}
