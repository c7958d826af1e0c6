// ============================================================
// Layer 2 — ClusterUseCase
// ============================================================
// k-means over the trailing `eigvals` eigenvector columns, once
// per requested k. Each label array lands at
//
//   <exname>/cluster/kmeans-<k>     attrs: k, eigenvector (columns)
//
// in the output file (default: the data file). Labels are stored
// as u8 when k ≤ 256, else u32.
//
// Gating is per key: a k whose key already exists is not
// recomputed unless `modify` is set, and a colliding write without
// `overwrite` only skips that key.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::application::context::{
    clamp_count, existing_keys, source_eigenvectors, RunContext, StageOptions, StageReport,
};
use crate::domain::array::{range_attr, AttrValue, Attrs, NdArray};
use crate::domain::param::Args;
use crate::infra::store::{Mode, Store};
use crate::ml::clustering::KMeans;
use crate::ml::selection::trailing_columns;

// ─── Cluster Configuration ───────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub eigvals:  usize,
    pub clusters: Vec<usize>,
    /// Prefer eigenvectors computed earlier in the same run
    pub computed: bool,
    pub output:   Option<PathBuf>,
    pub seed:     u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            eigvals:  8,
            clusters: vec![2, 3, 4, 5],
            computed: true,
            output:   None,
            seed:     0,
        }
    }
}

pub fn kmeans_key(opts: &StageOptions, k: usize) -> String {
    opts.key(&format!("cluster/kmeans-{k}"))
}

// ─── ClusterUseCase ───────────────────────────────────────────────────────────
pub struct ClusterUseCase {
    config: ClusterConfig,
}

impl ClusterUseCase {
    pub fn new(config: ClusterConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self, opts: &StageOptions, ctx: &mut RunContext) -> Result<StageReport> {
        let cfg = &self.config;
        let output = cfg.output.clone().unwrap_or_else(|| opts.data.clone());
        let mut report = StageReport::default();

        // ── Step 1: Which k still need computing ──────────────────────────────
        let keys: Vec<String> = cfg.clusters.iter().map(|&k| kmeans_key(opts, k)).collect();
        let existing = existing_keys(&output, &keys)?;
        let mut pending = Vec::new();
        for ((&k, key), exists) in cfg.clusters.iter().zip(&keys).zip(existing) {
            if exists && !opts.modify {
                tracing::info!("Clustering exists, not recomputing: {key}");
                report.skipped(key.clone());
            } else {
                pending.push((k, key.clone()));
            }
        }
        if pending.is_empty() {
            return Ok(report);
        }
        tracing::info!("Computing clustering: {}", output.display());

        // ── Step 2: Source eigenvectors ───────────────────────────────────────
        let Some(eigenvectors) = source_eigenvectors(opts, ctx, cfg.computed)? else {
            tracing::error!("Embedding must be either computed or already exist in data.");
            return Ok(report);
        };
        let eigvals = clamp_count("eigvals", cfg.eigvals, eigenvectors.ncols());
        let range = trailing_columns(eigenvectors.ncols(), eigvals);
        let columns: Vec<i64> = range.clone().map(|c| c as i64).collect();

        // ── Step 3: Cluster ───────────────────────────────────────────────────
        let mut results = Vec::with_capacity(pending.len());
        for (k, key) in pending {
            let kmeans = KMeans::processor(
                Args::new()
                    .arg(k)
                    .set("columns", columns.clone())
                    .set("seed", cfg.seed as i64),
            )?;
            let labels = kmeans
                .apply(eigenvectors.clone().into())
                .with_context(|| format!("k-means with k={k} failed"))?
                .into_labels()?;
            tracing::debug!("k-means k={k}: {} labels", labels.len());
            report.computed(key.clone());
            results.push((k, key, labels));
        }

        // ── Step 4: Persist ───────────────────────────────────────────────────
        let store = Store::open(&output, Mode::Append)
            .with_context(|| format!("Cannot open '{}'", output.display()))?;
        for (k, key, labels) in results {
            let array = if k <= 256 {
                NdArray::from_u8_labels(&labels)?
            } else {
                NdArray::from_u32(&labels)
            };
            let attrs = Attrs::from([
                ("k".to_string(), AttrValue::Int(k as i64)),
                ("eigenvector".to_string(), range_attr(range.clone())),
            ]);
            let outcome = store.at(&key).with_policy(opts.policy()).write_policy(array, attrs)?;
            report.record(key, outcome);
        }
        store.close()?;
        Ok(report)
    }
}
