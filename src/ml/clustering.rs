// ============================================================
// Layer 5 — k-Means Clustering
// ============================================================
// Matrix(n×d) → Labels(n) with every label in 0..k.
//
// Algorithm (per restart):
//   1. k-means++ seeding from a seeded StdRng
//   2. Lloyd iterations until the centroid shift ≤ tol or max_iter
//   3. empty clusters are refilled with the point farthest from
//      its current centroid
//
// The restart with the lowest inertia wins. Labels are then
// renumbered by first appearance, so the same partition always
// yields the same labels.

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

static SCHEMA: Lazy<Schema> = Lazy::new(|| {
    Schema::builder("KMeans")
        .extend(&PROCESSOR)
        .param(Param::new("n_clusters", &[ParamType::Int]).mandatory().positional())
        .param(Param::new("columns", &[ParamType::Ints]))
        .param(Param::new("n_init", &[ParamType::Int]).with_default(4))
        .param(Param::new("max_iter", &[ParamType::Int]).with_default(300))
        .param(Param::new("tol", &[ParamType::Float]).with_default(1e-6))
        .param(Param::new("seed", &[ParamType::Int]).with_default(0))
        .build()
});

#[derive(Debug, Default)]
pub struct KMeans;

impl KMeans {
    pub fn processor(args: Args) -> Result<Processor, ParamError> {
        Processor::stored(Self, args)
    }
}

impl Algorithm for KMeans {
    fn name(&self) -> &'static str {
        "KMeans"
    }

    fn schema(&self) -> &'static Schema {
        &SCHEMA
    }

    fn compute(&self, params: &Params, input: Data) -> Result<Data> {
        let x = select_columns(&input.into_matrix()?, params.ints("columns")?)?;
        let k = params.usize("n_clusters")?;
        let n = x.nrows();
        if k == 0 || k > n {
            bail!("n_clusters must be in 1..={n}, got {k}");
        }

        let n_init = params.usize("n_init")?.max(1);
        let max_iter = params.usize("max_iter")?;
        let tol = params.float("tol")?;
        let mut rng = StdRng::seed_from_u64(params.int("seed")? as u64);

        let mut best: Option<(f64, Vec<usize>)> = None;
        for run in 0..n_init {
            let (inertia, labels) = lloyd(&x, k, max_iter, tol, &mut rng);
            tracing::trace!("KMeans k={k}: restart {run} inertia {inertia:.6}");
            if best.as_ref().map_or(true, |(b, _)| inertia < *b) {
                best = Some((inertia, labels));
            }
        }
        let Some((inertia, labels)) = best else {
            bail!("k-means produced no result");
        };
        tracing::debug!("KMeans k={k}: best inertia {inertia:.6}");
        Ok(Data::Labels(canonical_labels(&labels, k)))
    }
}

fn squared_distance(x: &DMatrix<f64>, i: usize, c: &DMatrix<f64>, j: usize) -> f64 {
    (x.row(i) - c.row(j)).norm_squared()
}

/// k-means++ seeding.
fn seed_centroids(x: &DMatrix<f64>, k: usize, rng: &mut StdRng) -> DMatrix<f64> {
    let (n, d) = x.shape();
    let mut centroids = DMatrix::zeros(k, d);
    centroids.set_row(0, &x.row(rng.gen_range(0..n)));

    let mut closest: Vec<f64> = (0..n).map(|i| squared_distance(x, i, &centroids, 0)).collect();
    for c in 1..k {
        let total: f64 = closest.iter().sum();
        let pick = if total > 0.0 {
            let mut target = rng.gen::<f64>() * total;
            closest
                .iter()
                .position(|&w| {
                    target -= w;
                    target <= 0.0
                })
                .unwrap_or(n - 1)
        } else {
            // all points coincide with chosen centroids
            rng.gen_range(0..n)
        };
        centroids.set_row(c, &x.row(pick));
        for (i, best) in closest.iter_mut().enumerate() {
            *best = best.min(squared_distance(x, i, &centroids, c));
        }
    }
    centroids
}

fn lloyd(x: &DMatrix<f64>, k: usize, max_iter: usize, tol: f64, rng: &mut StdRng) -> (f64, Vec<usize>) {
    let (n, d) = x.shape();
    let mut centroids = seed_centroids(x, k, rng);
    let mut labels = vec![0usize; n];
    let mut dist = vec![0.0f64; n];

    for _ in 0..max_iter.max(1) {
        // ── Assign ──
        for i in 0..n {
            let (label, d2) = (0..k)
                .map(|c| (c, squared_distance(x, i, &centroids, c)))
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .unwrap_or((0, 0.0));
            labels[i] = label;
            dist[i] = d2;
        }
        repair_empty_clusters(&mut labels, &mut dist, k);

        // ── Update ──
        let mut sums = DMatrix::<f64>::zeros(k, d);
        let mut counts = vec![0usize; k];
        for (i, &label) in labels.iter().enumerate() {
            for j in 0..d {
                sums[(label, j)] += x[(i, j)];
            }
            counts[label] += 1;
        }
        let mut shift = 0.0;
        for c in 0..k {
            if counts[c] == 0 {
                continue;
            }
            let updated = sums.row(c) / counts[c] as f64;
            shift += (&updated - centroids.row(c)).norm_squared();
            centroids.set_row(c, &updated);
        }
        if shift <= tol {
            break;
        }
    }

    let inertia = (0..n).map(|i| squared_distance(x, i, &centroids, labels[i])).sum();
    (inertia, labels)
}

/// Move the farthest point of a populated cluster into each empty one.
fn repair_empty_clusters(labels: &mut [usize], dist: &mut [f64], k: usize) {
    let mut counts = vec![0usize; k];
    for &label in labels.iter() {
        counts[label] += 1;
    }
    for empty in 0..k {
        if counts[empty] > 0 {
            continue;
        }
        let donor = (0..labels.len())
            .filter(|&i| counts[labels[i]] > 1)
            .max_by(|&a, &b| dist[a].total_cmp(&dist[b]));
        if let Some(i) = donor {
            counts[labels[i]] -= 1;
            counts[empty] += 1;
            labels[i] = empty;
            dist[i] = 0.0;
        }
    }
}

/// Renumber clusters by first appearance.
fn canonical_labels(labels: &[usize], k: usize) -> Vec<u32> {
    let mut mapping: Vec<Option<u32>> = vec![None; k];
    let mut next = 0u32;
    labels
        .iter()
        .map(|&label| {
            *mapping[label].get_or_insert_with(|| {
                next += 1;
                next - 1
            })
        })
        .collect()
}
