// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// One use case per analysis stage. A chained command runs them
// in the order given, sharing one RunContext:
//
//   embed   → eigenvalues + eigenvectors of the attribution rows
//   cluster → k-means labels for each requested k
//   tsne    → a 2-D projection for visualisation
//
// Rules for this layer:
//   - No numeric code here (that's Layer 5)
//   - No argument parsing here (that's Layer 1)
//   - Only sourcing inputs, gating on existing keys, and
//     deciding what gets written where
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

// Options, run context and reports shared by every stage
pub mod context;

// The spectral embedding stage
pub mod embed_use_case;

// The k-means stage
pub mod cluster_use_case;

// The t-SNE stage
pub mod tsne_use_case;
