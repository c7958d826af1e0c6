// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// FeatureSource is the seam between the stage orchestrator and
// wherever the input rows come from. The embed stage only sees
// the trait, so tests can hand it an in-memory matrix.
//
// Algorithm is the seam between the processor framework and the
// numeric collaborators. A checkpoint-backed processor owns one
// boxed Algorithm plus its bound Params; the framework handles
// configuration and caching, the algorithm only computes.
//
// Implementations (Layer 5):
//   - PairwiseDistance         → distance matrix
//   - SparseKnn                → kNN affinity graph
//   - SymmetricNormalLaplacian → normalized graph operator
//   - EigenDecomposition       → eigenvalues + eigenvectors
//   - KMeans                   → cluster labels
//   - Tsne                     → 2-D projection

use std::fmt::Debug;

use anyhow::Result;

use crate::domain::data::{Data, Selection};
use crate::domain::param::{Params, Schema};

// ─── FeatureSource ────────────────────────────────────────────────────────────
/// Anything that can produce the feature rows of one embed run.
///
/// Implementations:
///   - AttributionLoader → rows of an attribution store file
pub trait FeatureSource {
    /// Load the selected rows. An empty selection is not an error.
    fn load(&self) -> Result<Selection>;
}

// ─── Algorithm ────────────────────────────────────────────────────────────────
/// A numeric computation configured through a static schema.
pub trait Algorithm: Debug + Send + Sync {
    /// Processor name, used for logging
    fn name(&self) -> &'static str;

    /// The slot table this algorithm is configured through.
    /// Must extend the base processor schema so the `io` slot exists.
    fn schema(&self) -> &'static Schema;

    /// Map an input value to an output value. Errors propagate
    /// unchanged to the caller.
    fn compute(&self, params: &Params, input: Data) -> Result<Data>;
}
