// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// The vocabulary every other layer speaks:
//
//   error.rs  — typed errors for parameter binding and the store
//   data.rs   — the value passed between pipeline stages
//   array.rs  — the n-dimensional array and attribute types the
//               store persists
//   param.rs  — parameter slots, schemas and bound parameters
//   traits.rs — the Algorithm seam numeric stages implement
//
// Rules for this layer:
//   - NO file I/O here (the store lives in Layer 6)
//   - NO numeric algorithms here (those live in Layer 5)
//   - Only types, validation and conversions
//
// Reference: Rust Book §5 (Structs), §6 (Enums), §10 (Traits)

/// Parameter and store error taxonomy
pub mod error;

/// Values flowing between processors
pub mod data;

/// Stored arrays and their attributes
pub mod array;

/// Slots, schemas and bound parameters
pub mod param;

/// Core abstractions implemented by numeric stages
pub mod traits;
