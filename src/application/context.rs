// ============================================================
// Layer 2 — Run Context and Shared Stage Plumbing
// ============================================================
// State and helpers shared by the embed, cluster and tsne stages.
//
//   StageOptions — where a stage reads and writes, and its policy
//   RunContext   — results handed from one stage to the next in a
//                  single chained invocation (never persisted)
//   StageReport  — which keys a stage computed, wrote, replaced
//                  or skipped
//
// Eigenvector sourcing (cluster, tsne):
//   1. `computed` set and an embedding in the RunContext → use it
//   2. otherwise read `<exname>/eigenvector` from the data file
//   3. neither available → None; the stage logs and returns

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::infra::checkpoint::{WriteOutcome, WritePolicy};
use crate::infra::store::{Mode, Store};

pub const EIGENVECTOR_KEY: &str = "eigenvector";

// ─── Stage Options ────────────────────────────────────────────────────────────
/// Options every stage shares, filled from the root command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOptions {
    pub data:      PathBuf,
    pub exname:    String,
    pub overwrite: bool,
    pub modify:    bool,
}

impl Default for StageOptions {
    fn default() -> Self {
        Self {
            data:      PathBuf::from("analysis.json"),
            exname:    "default".to_string(),
            overwrite: false,
            modify:    false,
        }
    }
}

impl StageOptions {
    pub fn policy(&self) -> WritePolicy {
        WritePolicy { modify: self.modify, overwrite: self.overwrite }
    }

    /// Full key of `relative` inside this experiment's group
    pub fn key(&self, relative: &str) -> String {
        format!("{}/{}", self.exname, relative)
    }
}

// ─── Run Context ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub eigenvalues:  DVector<f64>,
    pub eigenvectors: DMatrix<f64>,
}

/// Lives for one chained command. Only `embed` writes it.
#[derive(Debug, Default)]
pub struct RunContext {
    pub embedding: Option<Embedding>,
    /// Sample rows the embedding was computed from
    pub index:     Option<Vec<u32>>,
}

// ─── Stage Report ─────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub computed: Vec<String>,
    pub written:  Vec<String>,
    pub replaced: Vec<String>,
    pub skipped:  Vec<String>,
}

impl StageReport {
    pub fn computed(&mut self, key: impl Into<String>) {
        self.computed.push(key.into());
    }

    pub fn record(&mut self, key: impl Into<String>, outcome: WriteOutcome) {
        let key = key.into();
        match outcome {
            WriteOutcome::Written  => self.written.push(key),
            WriteOutcome::Replaced => self.replaced.push(key),
            WriteOutcome::Skipped  => self.skipped.push(key),
        }
    }

    pub fn skipped(&mut self, key: impl Into<String>) {
        self.skipped.push(key.into());
    }

    /// Nothing was computed or written
    pub fn is_noop(&self) -> bool {
        self.computed.is_empty() && self.written.is_empty() && self.replaced.is_empty()
    }
}

impl fmt::Display for StageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} computed, {} written, {} replaced, {} skipped",
            self.computed.len(),
            self.written.len(),
            self.replaced.len(),
            self.skipped.len()
        )
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

/// Which of `keys` already exist in the store at `path`.
/// A missing file means none do.
pub fn existing_keys(path: &Path, keys: &[String]) -> Result<Vec<bool>> {
    if !path.exists() {
        return Ok(vec![false; keys.len()]);
    }
    let store = Store::open(path, Mode::Read)
        .with_context(|| format!("Cannot open '{}'", path.display()))?;
    Ok(keys.iter().map(|key| store.at(key).exists()).collect())
}

/// Eigenvectors for the cluster and tsne stages, or None when no
/// embedding is available.
pub fn source_eigenvectors(
    opts: &StageOptions,
    ctx: &RunContext,
    computed: bool,
) -> Result<Option<DMatrix<f64>>> {
    if computed {
        if let Some(embedding) = &ctx.embedding {
            tracing::debug!("Using eigenvectors computed in this run");
            return Ok(Some(embedding.eigenvectors.clone()));
        }
    }
    if !opts.data.exists() {
        return Ok(None);
    }

    let store = Store::open(&opts.data, Mode::Read)
        .with_context(|| format!("Cannot open '{}'", opts.data.display()))?;
    let view = store.at(&opts.key(EIGENVECTOR_KEY));
    let eigenvectors = match view.read_array() {
        Err(e) if e.is_not_found() => return Ok(None),
        read => read
            .and_then(|a| a.to_matrix())
            .with_context(|| format!("Cannot read '{}' from '{}'", view.key(), opts.data.display()))?,
    };
    tracing::debug!("Loaded eigenvectors {:?} from '{}'", eigenvectors.shape(), opts.data.display());
    Ok(Some(eigenvectors))
}

/// Cap a requested count at what is available, warning when it bites.
pub fn clamp_count(name: &str, requested: usize, available: usize) -> usize {
    if requested > available {
        tracing::warn!("{name}={requested} exceeds the available {available}, using {available}");
        available
    } else {
        requested
    }
}
