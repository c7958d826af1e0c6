// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Cross-cutting concerns used by several other layers:
//
//   store.rs      — the hierarchical store file: a tree of groups
//                   and datasets, loaded on open and written back
//                   atomically on close
//
//   checkpoint.rs — CheckpointView, an addressable coordinate in a
//                   store carrying the run's write policy. Processors
//                   and stages use it to decide between reusing,
//                   computing and overwriting a result.
//
//   logging.rs    — tracing subscriber setup (destination + verbosity)
//
// Reference: Rust Book §9 (Error Handling)
//            Rust Book §12 (I/O and File Handling)

/// Hierarchical store file
pub mod store;

/// Scoped views into a store
pub mod checkpoint;

/// Log subscriber initialisation
pub mod logging;
