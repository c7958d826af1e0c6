// ============================================================
// Layer 2 — EmbedUseCase
// ============================================================
// Computes the spectral embedding of an attribution file and
// stores it under the experiment group of the data file:
//
//   Step 1: Skip if index, eigenvalue and eigenvector all exist
//           (unless `modify` is set)
//   Step 2: Load and select feature rows        (Layer 4 - data)
//   Step 3: Build the SpectralEmbedding pipeline (Layer 5 - ml)
//   Step 4: Run it
//   Step 5: Persist index (u32) and eigen arrays (f32)
//                                                (Layer 6 - infra)
//   Step 6: Hand the embedding to later stages via the RunContext
//
// Reference: Rust Book §13 (Iterators and Closures)

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::application::context::{
    clamp_count, existing_keys, Embedding, RunContext, StageOptions, StageReport, EIGENVECTOR_KEY,
};
use crate::data::loader::AttributionLoader;
use crate::data::preprocessor::Preprocess;
use crate::domain::array::{Attrs, NdArray};
use crate::domain::param::Args;
use crate::domain::traits::FeatureSource;
use crate::infra::store::{Mode, Store};
use crate::ml::affinity::SparseKnn;
use crate::ml::distance::PairwiseDistance;
use crate::ml::embedding::EigenDecomposition;
use crate::ml::laplacian::SymmetricNormalLaplacian;
use crate::ml::pipeline::spectral_embedding;
use crate::ml::processor::Processor;

pub const INDEX_KEY: &str = "index";
pub const EIGENVALUE_KEY: &str = "eigenvalue";

// ─── Embed Configuration ─────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedConfig {
    pub attribution:  PathBuf,
    pub label_filter: Option<Vec<u32>>,
    pub channel_mean: bool,
    pub preprocess:   Preprocess,
    pub metric:       String,
    pub eigvals:      usize,
    pub knn:          usize,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            attribution:  PathBuf::from("attribution.json"),
            label_filter: None,
            channel_mean: false,
            preprocess:   Preprocess::None,
            metric:       "euclidean".to_string(),
            eigvals:      32,
            knn:          10,
        }
    }
}

// ─── EmbedUseCase ─────────────────────────────────────────────────────────────
pub struct EmbedUseCase {
    config: EmbedConfig,
}

impl EmbedUseCase {
    pub fn new(config: EmbedConfig) -> Self {
        Self { config }
    }

    /// The spectral embedding pipeline for `n` samples.
    /// `knn` and `eigvals` are capped at what `n` samples allow.
    pub fn pipeline(&self, n: usize) -> Result<Processor> {
        let cfg = &self.config;
        let knn = clamp_count("knn", cfg.knn, n.saturating_sub(1));
        let eigvals = clamp_count("eigvals", cfg.eigvals, n);

        let pipeline = spectral_embedding(
            Args::new()
                .set("preprocessing", cfg.preprocess.into_processor())
                .set("pairwise_distance", PairwiseDistance::processor(Args::new().arg(cfg.metric.as_str()))?)
                .set("affinity", SparseKnn::processor(Args::new().arg(knn))?)
                .set("laplacian", SymmetricNormalLaplacian::processor(Args::new())?)
                .set("embedding", EigenDecomposition::processor(Args::new().arg(eigvals))?),
        )?;
        Ok(pipeline)
    }

    /// Load rows from the configured attribution file and embed them.
    pub fn execute(&self, opts: &StageOptions, ctx: &mut RunContext) -> Result<StageReport> {
        let loader = AttributionLoader::new(&self.config.attribution)
            .with_label_filter(self.config.label_filter.clone())
            .with_channel_mean(self.config.channel_mean);
        tracing::debug!("Reading attributions from {}", loader.path().display());
        self.execute_with(&loader, opts, ctx)
    }

    /// Embed the rows produced by `source`.
    pub fn execute_with(
        &self,
        source: &dyn FeatureSource,
        opts: &StageOptions,
        ctx: &mut RunContext,
    ) -> Result<StageReport> {
        let mut report = StageReport::default();
        let keys: Vec<String> = [INDEX_KEY, EIGENVALUE_KEY, EIGENVECTOR_KEY]
            .iter()
            .map(|k| opts.key(k))
            .collect();

        // ── Step 1: Skip when everything is already there ────────────────────
        let existing = existing_keys(&opts.data, &keys)?;
        if existing.iter().all(|&e| e) && !opts.modify {
            tracing::info!("Embedding exists, not recomputing: {}", opts.data.display());
            keys.into_iter().for_each(|k| report.skipped(k));
            return Ok(report);
        }
        tracing::info!("Computing embedding: {}", opts.data.display());

        // ── Step 2: Load feature rows ─────────────────────────────────────────
        let selection = source.load()?;
        if selection.is_empty() {
            tracing::error!("No matches found for filter: {:?}", self.config.label_filter);
            return Ok(report);
        }
        if selection.len() < 2 {
            tracing::error!(
                "Need at least 2 samples to build a neighbour graph, filter {:?} kept {}",
                self.config.label_filter,
                selection.len()
            );
            return Ok(report);
        }
        tracing::info!(
            "Embedding {} samples with {} features",
            selection.len(),
            selection.features.ncols()
        );

        // ── Step 3 + 4: Build and run the pipeline ───────────────────────────
        let pipeline = self.pipeline(selection.len())?;
        let output = pipeline
            .apply(selection.features.into())
            .context("Spectral embedding failed")?;
        let eigenvalues = output
            .field(EIGENVALUE_KEY)
            .cloned()
            .context("Embedding produced no eigenvalues")?
            .into_vector()?;
        let eigenvectors = output
            .into_field(EIGENVECTOR_KEY)?
            .into_matrix()?;
        keys.iter().for_each(|k| report.computed(k.clone()));

        // ── Step 5: Persist ──────────────────────────────────────────────────
        let store = Store::open(&opts.data, Mode::Append)
            .with_context(|| format!("Cannot open '{}'", opts.data.display()))?;
        let arrays = [
            NdArray::from_u32(&selection.indices),
            NdArray::from_vector(&eigenvalues).to_f32(),
            NdArray::from_matrix(&eigenvectors).to_f32(),
        ];
        for (key, array) in keys.iter().zip(arrays) {
            let outcome = store.at(key).with_policy(opts.policy()).write_policy(array, Attrs::new())?;
            report.record(key.clone(), outcome);
        }
        store.close()?;

        // ── Step 6: Share with later stages ──────────────────────────────────
        ctx.index = Some(selection.indices);
        ctx.embedding = Some(Embedding { eigenvalues, eigenvectors });
        Ok(report)
    }
}
