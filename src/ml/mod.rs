// ============================================================
// Layer 5 — Processing Layer
// ============================================================
// Processors, the pipelines that chain them, and the numeric
// algorithms that run as pipeline stages.
//
// Core:
//
//   processor.rs  — the closed Processor enum (Function, Stored,
//                   Pipeline) and checkpoint-aware `apply`
//   pipeline.rs   — ordered stage composition; SpectralEmbedding
//
// Numeric stages (each one an `Algorithm` behind a Stored processor):
//
//   distance.rs   — PairwiseDistance        Matrix(n×d) → Matrix(n×n)
//   affinity.rs   — SparseKnn               Matrix(n×n) → Matrix(n×n)
//   laplacian.rs  — SymmetricNormalLaplacian Matrix(n×n) → Matrix(n×n)
//   embedding.rs  — EigenDecomposition      Matrix(n×n) → Record
//   clustering.rs — KMeans                  Matrix(n×d) → Labels(n)
//   tsne.rs       — Tsne                    Matrix(n×d) → Matrix(n×2)
//
// Only this layer depends on nalgebra's decompositions and on rand.
//
// Reference: von Luxburg (2007) A Tutorial on Spectral Clustering
//            van der Maaten & Hinton (2008) Visualizing Data using t-SNE

pub mod processor;
pub mod pipeline;

/// Column picking shared by the clustering and projection stages
pub mod selection;

pub mod distance;
pub mod affinity;
pub mod laplacian;
pub mod embedding;
pub mod clustering;
pub mod tsne;
