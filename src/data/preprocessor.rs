// ============================================================
// Layer 4 — Feature Preprocessor
// ============================================================
// Rescales flattened feature rows before the distance stage.
// Attribution maps vary a lot in overall magnitude, which would
// otherwise dominate euclidean distances.
//
// Modes:
//   none        — pass rows through unchanged (default)
//   standardize — per column: subtract the mean, divide by the
//                 standard deviation (constant columns become 0)
//   normalize   — per row: divide by the L2 norm (zero rows stay 0)
//
// The chosen mode becomes the `preprocessing` stage of the
// spectral embedding pipeline as a function processor.

use anyhow::Result;
use clap::ValueEnum;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::domain::data::Data;
use crate::ml::processor::Processor;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Preprocess {
    #[default]
    None,
    Standardize,
    Normalize,
}

impl Preprocess {
    pub fn apply(self, m: DMatrix<f64>) -> DMatrix<f64> {
        match self {
            Preprocess::None => m,
            Preprocess::Standardize => standardize(m),
            Preprocess::Normalize => normalize(m),
        }
    }

    /// Wrap this mode as a pipeline stage
    pub fn into_processor(self) -> Processor {
        match self {
            Preprocess::None => Processor::identity(),
            mode => Processor::function(move |data: Data| -> Result<Data> {
                Ok(Data::Matrix(mode.apply(data.into_matrix()?)))
            }),
        }
    }
}

fn standardize(mut m: DMatrix<f64>) -> DMatrix<f64> {
    let n = m.nrows() as f64;
    if n == 0.0 {
        return m;
    }
    for mut col in m.column_iter_mut() {
        let mean = col.sum() / n;
        let var = col.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        let std = var.sqrt();
        for x in col.iter_mut() {
            *x = if std > 0.0 { (*x - mean) / std } else { 0.0 };
        }
    }
    m
}

fn normalize(mut m: DMatrix<f64>) -> DMatrix<f64> {
    for mut row in m.row_iter_mut() {
        let norm = row.norm();
        if norm > 0.0 {
            row /= norm;
        }
    }
    m
}
