// ============================================================
// Layer 5 — k-Nearest-Neighbour Affinity
// ============================================================
// Matrix(n×n distances) → Matrix(n×n affinities).
//
// Each row keeps its `n_neighbors` closest other points with
// weight 1 (connectivity graph); everything else is 0. Ties are
// broken by index so the graph is deterministic.
//
// With `symmetric` (default) the graph is averaged with its
// transpose: mutual neighbours get 1, one-sided ones 0.5. The
// spectral stages downstream rely on that symmetry.

use anyhow::{bail, Result};
use nalgebra::DMatrix;
use once_cell::sync::Lazy;

use crate::domain::data::Data;
use crate::domain::error::ParamError;
use crate::domain::param::{Args, Param, ParamType, Params, Schema};
use crate::domain::traits::Algorithm;
use crate::ml::processor::{Processor, PROCESSOR};

static SCHEMA: Lazy<Schema> = Lazy::new(|| {
    Schema::builder("SparseKnn")
        .extend(&PROCESSOR)
        .param(Param::new("n_neighbors", &[ParamType::Int]).with_default(10).positional())
        .param(Param::new("symmetric", &[ParamType::Bool]).with_default(true))
        .build()
});

#[derive(Debug, Default)]
pub struct SparseKnn;

impl SparseKnn {
    pub fn processor(args: Args) -> Result<Processor, ParamError> {
        Processor::stored(Self, args)
    }
}

impl Algorithm for SparseKnn {
    fn name(&self) -> &'static str {
        "SparseKnn"
    }

    fn schema(&self) -> &'static Schema {
        &SCHEMA
    }

    fn compute(&self, params: &Params, input: Data) -> Result<Data> {
        let d = input.into_matrix()?;
        let k = params.usize("n_neighbors")?;
        if !d.is_square() {
            bail!("distance matrix must be square, got {}x{}", d.nrows(), d.ncols());
        }
        let n = d.nrows();
        if k == 0 || k >= n {
            bail!("n_neighbors must be in 1..{n}, got {k}");
        }

        let mut a = DMatrix::zeros(n, n);
        let mut order: Vec<usize> = Vec::with_capacity(n);
        for i in 0..n {
            order.clear();
            order.extend((0..n).filter(|&j| j != i));
            order.sort_by(|&p, &q| d[(i, p)].total_cmp(&d[(i, q)]).then(p.cmp(&q)));
            for &j in &order[..k] {
                a[(i, j)] = 1.0;
            }
        }

        if params.bool("symmetric")? {
            a = (&a + a.transpose()) * 0.5;
        }
        Ok(Data::Matrix(a))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Points on a line at 0, 1, 3, 7
    fn line_distances() -> Data {
        let xs = [0.0, 1.0, 3.0, 7.0];
        Data::Matrix(DMatrix::from_fn(4, 4, |i, j| f64::abs(xs[i] - xs[j])))
    }

    #[test]
    fn test_each_row_keeps_k_neighbours() {
        let p = SparseKnn::processor(Args::new().arg(2).set("symmetric", false)).unwrap();
        let a = p.apply(line_distances()).unwrap().into_matrix().unwrap();
        for i in 0..4 {
            assert_eq!(a.row(i).sum(), 2.0);
            assert_eq!(a[(i, i)], 0.0);
        }
        // the outlier at 7 still picks neighbours, but nobody picks it
        assert_eq!(a[(3, 2)], 1.0);
        assert_eq!(a.column(3).sum(), 0.0);
    }

    #[test]
    fn test_symmetric_graph() {
        let p = SparseKnn::processor(Args::new().arg(1)).unwrap();
        let a = p.apply(line_distances()).unwrap().into_matrix().unwrap();
        assert_eq!(a, a.transpose());
        // 0 and 1 are mutual nearest neighbours
        assert_eq!(a[(0, 1)], 1.0);
        // 3 picks 2, 2 picks 1: one-sided
        assert_eq!(a[(3, 2)], 0.5);
    }

    #[test]
    fn test_rejects_too_many_neighbours() {
        let p = SparseKnn::processor(Args::new().arg(4)).unwrap();
        assert!(p.apply(line_distances()).is_err());
    }
}
