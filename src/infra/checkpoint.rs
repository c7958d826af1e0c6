// ============================================================
// Layer 6 — Checkpoint Views
// ============================================================
// A CheckpointView is a coordinate inside an open Store: the
// store handle, a key path, and the write policy of the current
// run. It holds no data of its own.
//
// Policy flags:
//   modify    — recompute even when the key already exists
//   overwrite — allow a write to replace an existing key
//
// Collision rule (write_policy):
//   key absent              → write                 → Written
//   key present + overwrite → replace node + attrs  → Replaced
//   key present, otherwise  → leave stored value    → Skipped (warn)
//
// Data mapping:
//   Record  ↔ group with one child per field
//   Matrix  ↔ 2-D dataset
//   Vector  ↔ 1-D float dataset
//   Labels  ↔ 1-D integer dataset

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::array::{Attrs, NdArray};
use crate::domain::data::Data;
use crate::domain::error::StoreError;
use crate::infra::store::{Group, Node, Store};

/// Run-level flags governing recomputation and replacement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WritePolicy {
    pub modify:    bool,
    pub overwrite: bool,
}

/// What happened to one key during a policy-governed write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    Replaced,
    Skipped,
}

#[derive(Clone)]
pub struct CheckpointView {
    store:  Store,
    key:    String,
    policy: WritePolicy,
}

impl fmt::Debug for CheckpointView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckpointView")
            .field("store", &self.store.path())
            .field("key", &self.key)
            .field("policy", &self.policy)
            .finish()
    }
}

impl CheckpointView {
    pub(crate) fn new(store: Store, key: &str, policy: WritePolicy) -> Self {
        let key = crate::infra::store::split_key(key).join("/");
        Self { store, key, policy }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn policy(&self) -> WritePolicy {
        self.policy
    }

    pub fn with_policy(mut self, policy: WritePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// A view below this one, inheriting the policy.
    pub fn child(&self, relative: &str) -> Self {
        let key = format!("{}/{}", self.key, relative);
        Self::new(self.store.clone(), &key, self.policy)
    }

    pub fn exists(&self) -> bool {
        self.store.contains(&self.key)
    }

    pub fn read(&self) -> Result<Node, StoreError> {
        self.store
            .get(&self.key)
            .ok_or_else(|| StoreError::KeyNotFound(self.key.clone()))
    }

    /// Read a dataset's array. Groups are rejected.
    pub fn read_array(&self) -> Result<NdArray, StoreError> {
        match self.read()? {
            Node::Dataset(d) => Ok(d.array),
            Node::Group(_) => Err(StoreError::Conversion(format!(
                "'{}' is a group, not a dataset",
                self.key
            ))),
        }
    }

    pub fn read_data(&self) -> Result<Data, StoreError> {
        node_to_data(self.read()?)
    }

    pub fn attrs(&self) -> Result<Attrs, StoreError> {
        Ok(self.read()?.attrs().clone())
    }

    /// Write `node` with `attrs` attached. An existing key is replaced
    /// only when the policy allows overwriting; otherwise this fails with
    /// `KeyAlreadyExists` and the stored node is left as it was.
    /// NaN and infinite values are rejected with `Conversion`.
    pub fn write(&self, node: impl Into<Node>, attrs: Attrs) -> Result<WriteOutcome, StoreError> {
        let mut node = node.into();
        node.set_attrs(attrs);
        if !node.is_finite() {
            return Err(StoreError::Conversion(format!(
                "'{}' holds NaN or infinite values",
                self.key
            )));
        }
        let replaced = self.store.insert(&self.key, node, self.policy.overwrite)?;
        Ok(if replaced { WriteOutcome::Replaced } else { WriteOutcome::Written })
    }

    /// Like `write`, but a collision is logged and reported as `Skipped`
    /// instead of failing.
    pub fn write_policy(&self, node: impl Into<Node>, attrs: Attrs) -> Result<WriteOutcome, StoreError> {
        match self.write(node, attrs) {
            Err(StoreError::KeyAlreadyExists(key)) => {
                tracing::warn!("Key already exists and overwrite is disabled: {key}");
                Ok(WriteOutcome::Skipped)
            }
            other => other,
        }
    }
}

// ─── Data ↔ Node ──────────────────────────────────────────────────────────────

impl From<&Data> for Node {
    fn from(data: &Data) -> Self {
        match data {
            Data::Matrix(m) => NdArray::from_matrix(m).into(),
            Data::Vector(v) => NdArray::from_vector(v).into(),
            Data::Labels(l) => NdArray::from_u32(l).into(),
            Data::Record(fields) => {
                let mut group = Group::default();
                for (name, value) in fields {
                    group.children.insert(name.clone(), Node::from(value));
                }
                group.into()
            }
        }
    }
}

/// Groups come back as records with fields in key order.
pub fn node_to_data(node: Node) -> Result<Data, StoreError> {
    match node {
        Node::Dataset(d) => d.array.to_data(),
        Node::Group(g) => g
            .children
            .into_iter()
            .map(|(name, child)| Ok((name, node_to_data(child)?)))
            .collect::<Result<Vec<_>, StoreError>>()
            .map(Data::Record),
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::array::{AttrValue, ArrayData};
    use crate::infra::store::Mode;
    use nalgebra::{DMatrix, DVector};
    use parking_lot::Mutex;
    use std::io;
    use std::sync::Arc;
    use tracing_subscriber::fmt::MakeWriter;

    /// Collects formatted log lines in memory
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn open() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("view.json"), Mode::Write).unwrap();
        (dir, store)
    }

    #[test]
    fn test_read_absent_key_is_not_found() {
        let (_dir, store) = open();
        let err = store.at("nothing/here").read().unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_child_paths_compose() {
        let (_dir, store) = open();
        let view = store.at("/exp/").child("cluster").child("kmeans-2");
        assert_eq!(view.key(), "exp/cluster/kmeans-2");
    }

    #[test]
    fn test_attrs_read_back_verbatim() {
        let (_dir, store) = open();
        let view = store.at("exp/cluster/kmeans-3");
        let mut attrs = Attrs::new();
        attrs.insert("k".into(), AttrValue::Int(3));
        attrs.insert("eigenvector".into(), AttrValue::Ints(vec![3, 4, 5]));

        view.write(NdArray::from_u32(&[0, 1, 2]), attrs.clone()).unwrap();
        assert_eq!(view.attrs().unwrap(), attrs);
        assert!(store.at("exp/cluster").exists());
    }

    #[test]
    fn test_collision_skips_without_touching_value() {
        let (_dir, store) = open();
        let view = store.at("k");
        assert_eq!(view.write_policy(NdArray::from_u32(&[1]), Attrs::new()).unwrap(), WriteOutcome::Written);

        let before = view.read().unwrap();
        assert_eq!(view.write_policy(NdArray::from_u32(&[2]), Attrs::new()).unwrap(), WriteOutcome::Skipped);
        assert_eq!(view.read().unwrap(), before);
        assert!(matches!(
            view.write(NdArray::from_u32(&[2]), Attrs::new()),
            Err(StoreError::KeyAlreadyExists(_))
        ));
    }

    #[test]
    fn test_overwrite_replaces_value_and_attrs() {
        let (_dir, store) = open();
        let plain = store.at("k");
        let mut attrs = Attrs::new();
        attrs.insert("k".into(), AttrValue::Int(2));
        plain.write(NdArray::from_u32(&[1]), attrs).unwrap();

        let forced = plain.clone().with_policy(WritePolicy { modify: false, overwrite: true });
        assert_eq!(forced.write_policy(NdArray::from_u32(&[9]), Attrs::new()).unwrap(), WriteOutcome::Replaced);
        assert_eq!(forced.read_array().unwrap(), NdArray::from_u32(&[9]));
        assert!(forced.attrs().unwrap().is_empty());
    }

    #[test]
    fn test_record_round_trips_as_group() {
        let (_dir, store) = open();
        let record = Data::Record(vec![
            ("eigenvalue".into(), Data::Vector(DVector::from_vec(vec![0.5, 1.0]))),
            ("eigenvector".into(), Data::Matrix(DMatrix::identity(2, 2))),
        ]);
        let view = store.at("embedding/spectral");
        view.write(Node::from(&record), Attrs::new()).unwrap();

        assert!(view.child("eigenvalue").exists());
        assert_eq!(view.read_data().unwrap(), record);
        assert!(view.read_array().is_err());
    }

    #[test]
    fn test_one_warning_per_colliding_key() {
        let (_dir, store) = open();
        for key in ["a", "b"] {
            store.at(key).write(NdArray::from_u32(&[1]), Attrs::new()).unwrap();
        }

        let logs = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .finish();
        let outcomes: Vec<_> = tracing::subscriber::with_default(subscriber, || {
            ["a", "b", "c"]
                .into_iter()
                .map(|key| store.at(key).write_policy(NdArray::from_u32(&[2]), Attrs::new()).unwrap())
                .collect()
        });

        assert_eq!(outcomes, [WriteOutcome::Skipped, WriteOutcome::Skipped, WriteOutcome::Written]);
        let text = logs.text();
        assert_eq!(text.matches("WARN").count(), 2, "{text}");
        assert!(text.contains("overwrite is disabled: a"));
        assert!(text.contains("overwrite is disabled: b"));
    }

    #[test]
    fn test_non_finite_write_is_rejected_and_file_stays_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nan.json");
        let store = Store::open(&path, Mode::Write).unwrap();
        store.at("exp/eigenvector").write(NdArray::from_u32(&[1, 2]), Attrs::new()).unwrap();

        let nan = NdArray::new(vec![2], ArrayData::F32(vec![f32::NAN, 1.0])).unwrap();
        let err = store.at("exp/tsne").write(nan, Attrs::new()).unwrap_err();
        assert!(matches!(err, StoreError::Conversion(_)));

        let bad_attr = Attrs::from([("scale".to_string(), AttrValue::Float(f64::INFINITY))]);
        assert!(store.at("exp/other").write(NdArray::from_u32(&[1]), bad_attr).is_err());
        store.close().unwrap();

        let reopened = Store::open(&path, Mode::Read).unwrap();
        assert!(reopened.at("exp/eigenvector").exists());
        assert!(!reopened.at("exp/tsne").exists());
        assert!(!reopened.at("exp/other").exists());
    }
}
