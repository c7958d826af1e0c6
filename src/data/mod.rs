// ============================================================
// Layer 4 — Data Input
// ============================================================
// Everything between an attribution file on disk and the first
// pipeline stage:
//
//   attribution store file
//       │
//       ▼
//   AttributionLoader  → label filter, channel mean, flatten
//       │
//       ▼
//   Preprocess         → optional column/row rescaling
//       │
//       ▼
//   SpectralEmbedding  (Layer 5)
//
// Reference: Rust Book §13 (Iterators and Closures)

/// Reads and selects attribution rows
pub mod loader;

/// Rescales feature rows before the distance stage
pub mod preprocessor;
