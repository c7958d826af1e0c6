// ============================================================
// Layer 4 — Attribution Loader
// ============================================================
// Reads the feature rows of an embed run from an attribution
// store file. The file holds two datasets at its root:
//
//   attribution — shape [N, ...], one attribution map per sample
//   label       — shape [N], integer class of each sample
//
// Loading steps:
//   1. open the file read-only
//   2. optionally keep only rows whose label is in the filter
//      (`label` is only read when a filter is given)
//   3. optionally average over axis 1 (colour channels)
//   4. flatten every remaining row to one feature vector
//
// The row numbers that survive step 2 become the `index` dataset
// of the embedding, so results can be traced back to samples.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::domain::data::Selection;
use crate::domain::traits::FeatureSource;
use crate::infra::store::{Mode, Store};

pub const ATTRIBUTION_KEY: &str = "attribution";
pub const LABEL_KEY: &str = "label";

#[derive(Debug, Clone)]
pub struct AttributionLoader {
    path:         PathBuf,
    label_filter: Option<Vec<u32>>,
    channel_mean: bool,
}

impl AttributionLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), label_filter: None, channel_mean: false }
    }

    /// Keep only samples with one of these labels. An empty list
    /// means no filtering.
    pub fn with_label_filter(mut self, labels: Option<Vec<u32>>) -> Self {
        self.label_filter = labels.filter(|l| !l.is_empty());
        self
    }

    pub fn with_channel_mean(mut self, enabled: bool) -> Self {
        self.channel_mean = enabled;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FeatureSource for AttributionLoader {
    fn load(&self) -> Result<Selection> {
        let store = Store::open(&self.path, Mode::Read)
            .with_context(|| format!("Cannot open attribution file '{}'", self.path.display()))?;

        let attribution = store
            .at(ATTRIBUTION_KEY)
            .read_array()
            .with_context(|| format!("Cannot read '{ATTRIBUTION_KEY}' from '{}'", self.path.display()))?;
        let n = attribution.shape().first().copied().unwrap_or(0);

        // ── Step 1: Label filter ─────────────────────────────────────────────
        let rows: Vec<usize> = match &self.label_filter {
            None => (0..n).collect(),
            Some(filter) => {
                let labels = store
                    .at(LABEL_KEY)
                    .read_array()
                    .and_then(|a| a.to_u32_vec())
                    .with_context(|| format!("Cannot read '{LABEL_KEY}' from '{}'", self.path.display()))?;
                if labels.len() != n {
                    anyhow::bail!(
                        "'{LABEL_KEY}' has {} entries but '{ATTRIBUTION_KEY}' has {n} rows",
                        labels.len()
                    );
                }
                labels
                    .iter()
                    .enumerate()
                    .filter(|(_, label)| filter.contains(label))
                    .map(|(i, _)| i)
                    .collect()
            }
        };
        tracing::debug!("Selected {} of {n} samples", rows.len());

        // ── Step 2: Select, reduce, flatten ──────────────────────────────────
        let mut selected = attribution.select_rows(&rows)?;
        if self.channel_mean {
            selected = selected.mean_axis1()?;
        }
        let features = selected.flatten_rows()?;

        Ok(Selection {
            indices: rows.into_iter().map(|i| i as u32).collect(),
            features,
        })
    }
}
