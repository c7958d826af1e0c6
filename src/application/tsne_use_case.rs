// ============================================================
// Layer 2 — TsneUseCase
// ============================================================
// One 2-D t-SNE projection of the trailing `eigvals` eigenvector
// columns, stored once at
//
//   <exname>/visualization/tsne     (f32, attr: eigenvector)
//
// Sourcing and gating follow the cluster stage: an existing key
// is not recomputed without `modify`, and a collision without
// `overwrite` leaves the stored projection alone.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::application::context::{
    clamp_count, existing_keys, source_eigenvectors, RunContext, StageOptions, StageReport,
};
use crate::domain::array::{range_attr, Attrs, NdArray};
use crate::domain::param::Args;
use crate::infra::store::{Mode, Store};
use crate::ml::selection::trailing_columns;
use crate::ml::tsne::Tsne;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TsneConfig {
    pub eigvals:    usize,
    pub computed:   bool,
    pub output:     Option<PathBuf>,
    pub perplexity: f64,
    pub n_iter:     usize,
    pub seed:       u64,
}

impl Default for TsneConfig {
    fn default() -> Self {
        Self {
            eigvals:    8,
            computed:   true,
            output:     None,
            perplexity: 30.0,
            n_iter:     1000,
            seed:       0,
        }
    }
}

pub struct TsneUseCase {
    config: TsneConfig,
}

impl TsneUseCase {
    pub fn new(config: TsneConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self, opts: &StageOptions, ctx: &mut RunContext) -> Result<StageReport> {
        let cfg = &self.config;
        let output = cfg.output.clone().unwrap_or_else(|| opts.data.clone());
        let key = opts.key("visualization/tsne");
        let mut report = StageReport::default();

        if existing_keys(&output, std::slice::from_ref(&key))?[0] && !opts.modify {
            tracing::info!("TSNE exists, not recomputing: {key}");
            report.skipped(key);
            return Ok(report);
        }
        tracing::info!("Computing TSNE: {}", output.display());

        let Some(eigenvectors) = source_eigenvectors(opts, ctx, cfg.computed)? else {
            tracing::error!("Embedding must be either computed or already exist in data.");
            return Ok(report);
        };
        let eigvals = clamp_count("eigvals", cfg.eigvals, eigenvectors.ncols());
        let range = trailing_columns(eigenvectors.ncols(), eigvals);

        let tsne = Tsne::processor(
            Args::new()
                .set("columns", range.clone().map(|c| c as i64).collect::<Vec<_>>())
                .set("perplexity", cfg.perplexity)
                .set("n_iter", cfg.n_iter)
                .set("seed", cfg.seed as i64),
        )?;
        let projection = tsne
            .apply(eigenvectors.into())
            .context("t-SNE projection failed")?
            .into_matrix()?;
        report.computed(key.clone());

        let store = Store::open(&output, Mode::Append)
            .with_context(|| format!("Cannot open '{}'", output.display()))?;
        let attrs = Attrs::from([("eigenvector".to_string(), range_attr(range))]);
        let outcome = store
            .at(&key)
            .with_policy(opts.policy())
            .write_policy(NdArray::from_matrix(&projection).to_f32(), attrs)?;
        report.record(key, outcome);
        store.close()?;
        Ok(report)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::context::Embedding;
    use crate::domain::array::AttrValue;
    use nalgebra::{DMatrix, DVector};

    fn context(rows: usize) -> RunContext {
        RunContext {
            embedding: Some(Embedding {
                eigenvalues:  DVector::from_vec(vec![0.5, 1.0, 1.0]),
                eigenvectors: DMatrix::from_fn(rows, 3, |i, j| ((i * (j + 2)) % 5) as f64 + (i / 10) as f64),
            }),
            index: None,
        }
    }

    fn quick() -> TsneUseCase {
        TsneUseCase::new(TsneConfig { eigvals: 2, n_iter: 100, ..TsneConfig::default() })
    }

    #[test]
    fn test_projects_and_stores_once() {
        let dir = tempfile::tempdir().unwrap();
        let opts = StageOptions { data: dir.path().join("analysis.json"), ..StageOptions::default() };

        let report = quick().execute(&opts, &mut context(30)).unwrap();
        assert_eq!(report.written, vec!["default/visualization/tsne"]);

        let store = Store::open(&opts.data, Mode::Read).unwrap();
        let view = store.at("default/visualization/tsne");
        let stored = view.read_array().unwrap();
        assert_eq!(stored.shape(), &[30, 2]);
        assert_eq!(stored.dtype(), "f32");
        assert_eq!(view.attrs().unwrap().get("eigenvector"), Some(&AttrValue::Ints(vec![1, 2])));
    }

    #[test]
    fn test_existing_projection_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let opts = StageOptions { data: dir.path().join("analysis.json"), ..StageOptions::default() };
        quick().execute(&opts, &mut context(30)).unwrap();

        let again = quick().execute(&opts, &mut context(30)).unwrap();
        assert!(again.is_noop());
        assert_eq!(again.skipped, vec!["default/visualization/tsne"]);

        let both = StageOptions { modify: true, overwrite: true, ..opts };
        let replaced = quick().execute(&both, &mut context(30)).unwrap();
        assert_eq!(replaced.replaced, vec!["default/visualization/tsne"]);
    }

    #[test]
    fn test_missing_embedding_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let opts = StageOptions { data: dir.path().join("analysis.json"), ..StageOptions::default() };
        let report = quick().execute(&opts, &mut RunContext::default()).unwrap();
        assert!(report.is_noop());
        assert!(!opts.data.exists());
    }
}
