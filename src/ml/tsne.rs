// ============================================================
// Layer 5 — t-SNE Projection
// ============================================================
// Matrix(n×d) → Matrix(n×n_components), default 2-D.
//
// Exact (O(n²)) t-SNE:
//   1. per-point Gaussian bandwidths found by bisection on β so the
//      conditional distribution hits the requested perplexity
//   2. P symmetrized as (P + Pᵀ) / 2n
//   3. gradient descent on KL(P‖Q) with a Student-t Q, using
//      early exaggeration, momentum and per-coordinate gains
//
// The embedding is re-centred after every step. A perplexity that
// is too large for n is clamped to (n − 1) / 3.

use anyhow::{bail, Result};
use nalgebra::DMatrix;
use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::domain::data::Data;
use crate::domain::error::ParamError;
use crate::domain::param::{Args, Param, ParamType, Params, Schema};
use crate::domain::traits::Algorithm;
use crate::ml::processor::{Processor, PROCESSOR};
use crate::ml::selection::select_columns;

const EXAGGERATION: f64 = 12.0;
const BINARY_SEARCH_STEPS: usize = 64;
const MIN_GAIN: f64 = 0.01;

static SCHEMA: Lazy<Schema> = Lazy::new(|| {
    Schema::builder("Tsne")
        .extend(&PROCESSOR)
        .param(Param::new("n_components", &[ParamType::Int]).with_default(2).positional())
        .param(Param::new("perplexity", &[ParamType::Float, ParamType::Int]).with_default(30.0))
        .param(Param::new("learning_rate", &[ParamType::Float, ParamType::Int]).with_default(200.0))
        .param(Param::new("n_iter", &[ParamType::Int]).with_default(1000))
        .param(Param::new("seed", &[ParamType::Int]).with_default(0))
        .param(Param::new("columns", &[ParamType::Ints]))
        .build()
});

#[derive(Debug, Default)]
pub struct Tsne;

impl Tsne {
    pub fn processor(args: Args) -> Result<Processor, ParamError> {
        Processor::stored(Self, args)
    }
}

impl Algorithm for Tsne {
    fn name(&self) -> &'static str {
        "Tsne"
    }

    fn schema(&self) -> &'static Schema {
        &SCHEMA
    }

    fn compute(&self, params: &Params, input: Data) -> Result<Data> {
        let x = select_columns(&input.into_matrix()?, params.ints("columns")?)?;
        let n = x.nrows();
        let dims = params.usize("n_components")?;
        if dims == 0 {
            bail!("n_components must be positive");
        }
        if n < 2 {
            bail!("t-SNE needs at least 2 points, got {n}");
        }

        let mut perplexity = params.float("perplexity")?;
        let limit = ((n - 1) as f64 / 3.0).max(1.0);
        if perplexity > limit {
            tracing::warn!("perplexity {perplexity} too large for {n} points, using {limit:.2}");
            perplexity = limit;
        }
        if perplexity <= 0.0 {
            bail!("perplexity must be positive, got {perplexity}");
        }

        let p = joint_probabilities(&x, perplexity);
        let y = optimize(
            &p,
            dims,
            params.float("learning_rate")?,
            params.usize("n_iter")?,
            params.int("seed")? as u64,
        );
        Ok(Data::Matrix(y))
    }
}

fn squared_distances(x: &DMatrix<f64>) -> DMatrix<f64> {
    let n = x.nrows();
    let mut d = DMatrix::zeros(n, n);
    for i in 0..n {
        for j in (i + 1)..n {
            let v = (x.row(i) - x.row(j)).norm_squared();
            d[(i, j)] = v;
            d[(j, i)] = v;
        }
    }
    d
}

/// Symmetric joint probabilities P, summing to one.
fn joint_probabilities(x: &DMatrix<f64>, perplexity: f64) -> DMatrix<f64> {
    let d = squared_distances(x);
    let n = d.nrows();
    let target = perplexity.ln();
    let mut p = DMatrix::zeros(n, n);
    let mut row = vec![0.0; n];

    for i in 0..n {
        // shift by the nearest distance so exp() never underflows to all zeros
        let nearest = (0..n)
            .filter(|&j| j != i)
            .map(|j| d[(i, j)])
            .fold(f64::INFINITY, f64::min);

        let (mut beta, mut lo, mut hi) = (1.0, 0.0, f64::INFINITY);
        for _ in 0..BINARY_SEARCH_STEPS {
            let mut sum = 0.0;
            let mut weighted = 0.0;
            for j in 0..n {
                row[j] = if j == i { 0.0 } else { (-(d[(i, j)] - nearest) * beta).exp() };
                sum += row[j];
                weighted += row[j] * (d[(i, j)] - nearest);
            }
            // Shannon entropy of the conditional distribution
            let entropy = sum.ln() + beta * weighted / sum;
            let diff = entropy - target;
            if diff.abs() < 1e-5 {
                break;
            }
            if diff > 0.0 {
                lo = beta;
                beta = if hi.is_finite() { (beta + hi) / 2.0 } else { beta * 2.0 };
            } else {
                hi = beta;
                beta = (beta + lo) / 2.0;
            }
        }

        let sum: f64 = row.iter().sum();
        for j in 0..n {
            p[(i, j)] = row[j] / sum;
        }
    }

    let scale = 2.0 * n as f64;
    let mut joint = (&p + p.transpose()) / scale;
    joint.apply(|v| *v = v.max(f64::MIN_POSITIVE));
    joint
}

fn optimize(p: &DMatrix<f64>, dims: usize, learning_rate: f64, n_iter: usize, seed: u64) -> DMatrix<f64> {
    let n = p.nrows();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut y = DMatrix::from_fn(n, dims, |_, _| rng.gen_range(-1e-2..1e-2));
    let mut velocity = DMatrix::<f64>::zeros(n, dims);
    let mut gains = DMatrix::<f64>::from_element(n, dims, 1.0);
    let exaggerated_until = (n_iter / 4).min(250);

    let mut num = DMatrix::<f64>::zeros(n, n);
    for iter in 0..n_iter {
        let exaggeration = if iter < exaggerated_until { EXAGGERATION } else { 1.0 };
        let momentum = if iter < exaggerated_until { 0.5 } else { 0.8 };

        // ── Student-t affinities ──
        let mut total = 0.0;
        for i in 0..n {
            for j in (i + 1)..n {
                let q = 1.0 / (1.0 + (y.row(i) - y.row(j)).norm_squared());
                num[(i, j)] = q;
                num[(j, i)] = q;
                total += 2.0 * q;
            }
        }

        // ── Gradient ──
        let mut grad = DMatrix::<f64>::zeros(n, dims);
        for i in 0..n {
            for j in 0..n {
                if i == j {
                    continue;
                }
                let q = (num[(i, j)] / total).max(f64::MIN_POSITIVE);
                let force = 4.0 * (exaggeration * p[(i, j)] - q) * num[(i, j)];
                for c in 0..dims {
                    grad[(i, c)] += force * (y[(i, c)] - y[(j, c)]);
                }
            }
        }

        // ── Update with gains ──
        for idx in 0..n * dims {
            let same_sign = (grad[idx] > 0.0) == (velocity[idx] > 0.0);
            gains[idx] = if same_sign { (gains[idx] * 0.8).max(MIN_GAIN) } else { gains[idx] + 0.2 };
            velocity[idx] = momentum * velocity[idx] - learning_rate * gains[idx] * grad[idx];
            y[idx] += velocity[idx];
        }

        // ── Re-centre ──
        let mean = y.row_mean();
        for mut row in y.row_iter_mut() {
            row -= &mean;
        }

        if iter % 100 == 0 {
            tracing::trace!("Tsne: iteration {iter}/{n_iter}");
        }
    }
    y
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two well separated 3-D clusters, five points each
    fn clusters() -> Data {
        let rows: Vec<f64> = (0..10)
            .flat_map(|i| {
                let base = if i < 5 { 0.0 } else { 50.0 };
                let jitter = i as f64 * 0.1;
                [base + jitter, base - jitter, base + 0.5 * jitter]
            })
            .collect();
        Data::Matrix(DMatrix::from_row_slice(10, 3, &rows))
    }

    fn project(args: Args) -> DMatrix<f64> {
        Tsne::processor(args).unwrap().apply(clusters()).unwrap().into_matrix().unwrap()
    }

    #[test]
    fn test_output_shape_and_centering() {
        let y = project(Args::new().set("n_iter", 300));
        assert_eq!(y.shape(), (10, 2));
        assert!(y.iter().all(|v| v.is_finite()));
        assert!(y.row_mean().norm() < 1e-9);
    }

    #[test]
    fn test_separates_clusters() {
        let y = project(Args::new().set("n_iter", 500).set("learning_rate", 50.0));
        let centroid = |rows: std::ops::Range<usize>| {
            let len = rows.len() as f64;
            rows.map(|i| y.row(i).clone_owned()).fold(nalgebra::RowDVector::zeros(2), |a, r| a + r) / len
        };
        let (a, b) = (centroid(0..5), centroid(5..10));
        let between = (&a - &b).norm();
        let within = (0..5).map(|i| (y.row(i) - &a).norm()).fold(0.0, f64::max);
        assert!(between > within);
    }

    #[test]
    fn test_seeded_runs_match() {
        let a = project(Args::new().set("n_iter", 50).set("seed", 3));
        let b = project(Args::new().set("n_iter", 50).set("seed", 3));
        assert_eq!(a, b);
    }
}
