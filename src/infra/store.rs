// ============================================================
// Layer 6 — Hierarchical Store
// ============================================================
// A path-addressable tree of groups and datasets kept in a single
// file. The whole tree is loaded on open and written back on close.
//
// File layout (JSON):
//   {
//     "format":  "spectral-relay",
//     "version": 1,
//     "root":    { "attrs": {...}, "children": { "<name>": <node>, ... } }
//   }
//   where <node> is {"group": {...}} or {"dataset": {"attrs", "array"}}
//
// Open modes:
//   Read   — file must exist, every write fails with ReadOnly
//   Write  — start from an empty tree, replacing the file on close
//   Append — load the file if present, otherwise start empty
//
// Durability:
//   Writes only touch the in-memory tree. `close()` (or the drop of
//   the last handle) serialises the tree into a temp file next to
//   the target and renames it over the target, so readers see the
//   old file or the new one, never half of each.
//
// Single writer per file is assumed; nothing is locked on disk.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::domain::array::{Attrs, NdArray};
use crate::domain::error::StoreError;
use crate::infra::checkpoint::{CheckpointView, WritePolicy};

const FORMAT: &str = "spectral-relay";
const VERSION: u32 = 1;

/// How a store file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    Write,
    Append,
}

// ─── Tree ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Node {
    Group(Group),
    Dataset(Dataset),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Group {
    #[serde(default)]
    pub attrs:    Attrs,
    #[serde(default)]
    pub children: BTreeMap<String, Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub attrs: Attrs,
    pub array: NdArray,
}

impl Node {
    pub fn attrs(&self) -> &Attrs {
        match self {
            Node::Group(g)   => &g.attrs,
            Node::Dataset(d) => &d.attrs,
        }
    }

    pub fn set_attrs(&mut self, attrs: Attrs) {
        match self {
            Node::Group(g)   => g.attrs = attrs,
            Node::Dataset(d) => d.attrs = attrs,
        }
    }

    /// True when every float in the subtree, attributes included,
    /// can be written to the file and read back.
    pub fn is_finite(&self) -> bool {
        let attrs_ok = self.attrs().values().all(|v| v.is_finite());
        attrs_ok
            && match self {
                Node::Group(g)   => g.children.values().all(Node::is_finite),
                Node::Dataset(d) => d.array.is_finite(),
            }
    }
}

impl From<NdArray> for Node {
    fn from(array: NdArray) -> Self {
        Node::Dataset(Dataset { attrs: Attrs::new(), array })
    }
}

impl From<Group> for Node {
    fn from(group: Group) -> Self {
        Node::Group(group)
    }
}

/// Split a slash-separated key, ignoring empty segments.
pub(crate) fn split_key(key: &str) -> Vec<&str> {
    key.split('/').filter(|part| !part.is_empty()).collect()
}

impl Group {
    fn lookup(&self, parts: &[&str]) -> Option<&Node> {
        let (first, rest) = parts.split_first()?;
        let node = self.children.get(*first)?;
        if rest.is_empty() {
            return Some(node);
        }
        match node {
            Node::Group(g)   => g.lookup(rest),
            Node::Dataset(_) => None,
        }
    }

    /// Place `node` at `parts`, creating intermediate groups.
    /// Returns whether an existing node was replaced.
    fn insert(&mut self, key: &str, parts: &[&str], node: Node, replace: bool) -> Result<bool, StoreError> {
        let Some((first, rest)) = parts.split_first() else {
            return Err(StoreError::InvalidKey(key.to_string()));
        };

        if rest.is_empty() {
            let existed = self.children.contains_key(*first);
            if existed && !replace {
                return Err(StoreError::KeyAlreadyExists(key.to_string()));
            }
            self.children.insert(first.to_string(), node);
            return Ok(existed);
        }

        let child = self
            .children
            .entry(first.to_string())
            .or_insert_with(|| Node::Group(Group::default()));
        match child {
            Node::Group(g)   => g.insert(key, rest, node, replace),
            Node::Dataset(_) => Err(StoreError::NotAGroup(first.to_string())),
        }
    }
}

// ─── Store ────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct FileRef<'a> {
    format:  &'a str,
    version: u32,
    root:    &'a Group,
}

#[derive(Deserialize)]
struct FileOwned {
    format:  String,
    version: u32,
    root:    Group,
}

struct StoreState {
    path:  PathBuf,
    mode:  Mode,
    root:  Group,
    dirty: bool,
}

impl StoreState {
    fn flush(&mut self) -> Result<(), StoreError> {
        if !self.dirty {
            return Ok(());
        }
        let io_err = |source| StoreError::Io { path: self.path.clone(), source };

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(io_err)?;

        let tmp = NamedTempFile::new_in(&dir).map_err(io_err)?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer(
                &mut writer,
                &FileRef { format: FORMAT, version: VERSION, root: &self.root },
            )?;
            writer.flush().map_err(io_err)?;
        }
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;

        self.dirty = false;
        tracing::debug!("Flushed store '{}'", self.path.display());
        Ok(())
    }
}

impl Drop for StoreState {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::error!("Failed to flush store '{}' on close: {e}", self.path.display());
        }
    }
}

/// A handle to an open store file. Clones share the same tree.
#[derive(Clone)]
pub struct Store {
    state: Arc<Mutex<StoreState>>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Store")
            .field("path", &state.path)
            .field("mode", &state.mode)
            .finish()
    }
}

impl Store {
    /// Open (or create, for Write/Append) a store file.
    pub fn open(path: impl AsRef<Path>, mode: Mode) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let exists = path.exists();

        let root = match mode {
            Mode::Write => Group::default(),
            Mode::Read | Mode::Append if exists => Self::load(&path)?,
            Mode::Append => Group::default(),
            Mode::Read => {
                return Err(StoreError::Io {
                    path,
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such store file"),
                })
            }
        };

        // A new file must appear on disk even if nothing is written
        let dirty = mode == Mode::Write || (mode == Mode::Append && !exists);

        tracing::debug!("Opened store '{}' ({:?})", path.display(), mode);
        Ok(Self {
            state: Arc::new(Mutex::new(StoreState { path, mode, root, dirty })),
        })
    }

    fn load(path: &Path) -> Result<Group, StoreError> {
        let file = File::open(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let parsed: FileOwned = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            StoreError::Format { path: path.to_path_buf(), reason: e.to_string() }
        })?;
        if parsed.format != FORMAT || parsed.version != VERSION {
            return Err(StoreError::Format {
                path:   path.to_path_buf(),
                reason: format!("unsupported format '{}' v{}", parsed.format, parsed.version),
            });
        }
        Ok(parsed.root)
    }

    pub fn path(&self) -> PathBuf {
        self.state.lock().path.clone()
    }

    /// A view at `key` with the default (non-destructive) policy.
    pub fn at(&self, key: &str) -> CheckpointView {
        CheckpointView::new(self.clone(), key, WritePolicy::default())
    }

    /// Write pending changes now. The handle stays usable.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.state.lock().flush()
    }

    /// Flush and release this handle.
    pub fn close(self) -> Result<(), StoreError> {
        self.flush()
    }

    // ── Node access used by CheckpointView ───────────────────────────────────

    pub(crate) fn contains(&self, key: &str) -> bool {
        let parts = split_key(key);
        parts.is_empty() || self.state.lock().root.lookup(&parts).is_some()
    }

    pub(crate) fn get(&self, key: &str) -> Option<Node> {
        let parts = split_key(key);
        let state = self.state.lock();
        if parts.is_empty() {
            return Some(Node::Group(state.root.clone()));
        }
        state.root.lookup(&parts).cloned()
    }

    /// Insert a node. Fails with KeyAlreadyExists unless `replace` is set.
    /// Returns whether a node was replaced.
    pub(crate) fn insert(&self, key: &str, node: Node, replace: bool) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        if state.mode == Mode::Read {
            return Err(StoreError::ReadOnly(state.path.clone()));
        }
        let parts = split_key(key);
        let replaced = state.root.insert(key, &parts, node, replace)?;
        state.dirty = true;
        Ok(replaced)
    }
}
