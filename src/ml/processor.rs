// ============================================================
// Layer 5 — Processors
// ============================================================
// A Processor is one configured unit with a single operation,
// `apply(input) -> output`. The set of variants is closed:
//
//   Function — a pure function bound through the `function` slot
//   Stored   — a numeric Algorithm plus an optional `io` checkpoint
//   Pipeline — an ordered chain of child processors
//
// Stored processors consult their checkpoint before computing:
//
//   io bound, key present, modify off → read back, skip compute
//   otherwise                         → compute, then write_policy
//                                       (collision = warn + keep old)

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::Lazy;

use crate::domain::array::Attrs;
use crate::domain::data::Data;
use crate::domain::error::ParamError;
use crate::domain::param::{Args, DataFn, Param, ParamType, ParamValue, Params, Schema};
use crate::domain::traits::Algorithm;
use crate::infra::checkpoint::CheckpointView;
use crate::infra::store::Node;
use crate::ml::pipeline::Pipeline;

/// Slots shared by every checkpoint-backed processor.
pub static PROCESSOR: Lazy<Schema> = Lazy::new(|| {
    Schema::builder("Processor")
        .param(Param::new("io", &[ParamType::Checkpoint]))
        .build()
});

static FUNCTION: Lazy<Schema> = Lazy::new(|| {
    Schema::builder("FunctionProcessor")
        .param(Param::new("function", &[ParamType::Function]).mandatory().positional())
        .build()
});

#[derive(Debug)]
pub enum Processor {
    Function(FunctionProcessor),
    Stored(StoredProcessor),
    Pipeline(Pipeline),
}

impl Processor {
    /// Wrap a pure function
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(Data) -> Result<Data> + Send + Sync + 'static,
    {
        Processor::Function(FunctionProcessor::from_fn(Arc::new(f)))
    }

    /// Pass-through processor, the default of optional pipeline stages
    pub fn identity() -> Self {
        Self::function(Ok)
    }

    /// Bind `args` to an algorithm's schema.
    pub fn stored(algorithm: impl Algorithm + 'static, args: Args) -> Result<Self, ParamError> {
        let params = Params::bind(algorithm.schema(), args)?;
        Ok(Processor::Stored(StoredProcessor { algorithm: Box::new(algorithm), params }))
    }

    pub fn name(&self) -> &str {
        match self {
            Processor::Function(_) => FUNCTION.name(),
            Processor::Stored(p) => p.algorithm.name(),
            Processor::Pipeline(p) => p.name(),
        }
    }

    /// The bound checkpoint, if this processor has one
    pub fn checkpoint(&self) -> Option<&CheckpointView> {
        match self {
            Processor::Stored(p) => p.params.checkpoint("io").ok().flatten(),
            _ => None,
        }
    }

    pub fn apply(&self, input: Data) -> Result<Data> {
        match self {
            Processor::Function(p) => p.apply(input),
            Processor::Stored(p) => p.apply(input),
            Processor::Pipeline(p) => p.apply(input),
        }
    }
}

// ─── FunctionProcessor ────────────────────────────────────────────────────────

pub struct FunctionProcessor {
    params: Params,
}

impl fmt::Debug for FunctionProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FunctionProcessor")
    }
}

impl FunctionProcessor {
    pub fn new(args: Args) -> Result<Self, ParamError> {
        Ok(Self { params: Params::bind(&FUNCTION, args)? })
    }

    fn from_fn(f: DataFn) -> Self {
        Self { params: Params::trusted(&FUNCTION, vec![("function", ParamValue::Function(f))]) }
    }

    fn apply(&self, input: Data) -> Result<Data> {
        let f = self.params.function("function")?;
        f(input)
    }
}

// ─── StoredProcessor ──────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct StoredProcessor {
    algorithm: Box<dyn Algorithm>,
    params:    Params,
}

impl StoredProcessor {
    fn apply(&self, input: Data) -> Result<Data> {
        let name = self.algorithm.name();
        let io = self.params.checkpoint("io")?;

        if let Some(view) = io {
            if view.exists() && !view.policy().modify {
                tracing::debug!("{name}: reusing checkpoint '{}'", view.key());
                return Ok(view.read_data()?);
            }
        }

        tracing::debug!("{name}: computing");
        let output = self.algorithm.compute(&self.params, input)?;

        if let Some(view) = io {
            view.write_policy(Node::from(&output), Attrs::new())?;
        }
        Ok(output)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::checkpoint::WritePolicy;
    use crate::infra::store::{Mode, Store};
    use nalgebra::DMatrix;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static SCALE: Lazy<Schema> = Lazy::new(|| {
        Schema::builder("Scale")
            .extend(&PROCESSOR)
            .param(Param::new("factor", &[ParamType::Float]).mandatory().positional())
            .build()
    });

    /// Multiplies its input and counts how often it really ran
    #[derive(Debug)]
    struct Scale {
        calls: Arc<AtomicUsize>,
    }

    impl Algorithm for Scale {
        fn name(&self) -> &'static str { "Scale" }
        fn schema(&self) -> &'static Schema { &SCALE }
        fn compute(&self, params: &Params, input: Data) -> Result<Data> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Data::Matrix(input.into_matrix()? * params.float("factor")?))
        }
    }

    fn input() -> Data {
        Data::Matrix(DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]))
    }

    fn scaled(factor: f64, calls: &Arc<AtomicUsize>, io: Option<CheckpointView>) -> Processor {
        let mut args = Args::new().arg(factor);
        if let Some(view) = io {
            args = args.set("io", view);
        }
        Processor::stored(Scale { calls: calls.clone() }, args).unwrap()
    }

    #[test]
    fn test_function_processor_applies_function() {
        let double = Processor::function(|d| Ok(Data::Matrix(d.into_matrix()? * 2.0)));
        let out = double.apply(input()).unwrap().into_matrix().unwrap();
        assert_eq!(out[(1, 1)], 8.0);
        assert_eq!(double.name(), "FunctionProcessor");
    }

    #[test]
    fn test_function_processor_requires_function() {
        assert!(matches!(FunctionProcessor::new(Args::new()), Err(ParamError::Missing { .. })));
        assert!(matches!(
            FunctionProcessor::new(Args::new().arg(3)),
            Err(ParamError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_stored_construction_fails_fast() {
        let calls = Arc::new(AtomicUsize::new(0));
        let missing = Processor::stored(Scale { calls: calls.clone() }, Args::new());
        assert!(matches!(missing, Err(ParamError::Missing { .. })));
        let unknown = Processor::stored(Scale { calls }, Args::new().arg(1.0).set("bias", 1.0));
        assert!(matches!(unknown, Err(ParamError::Unknown { .. })));
    }

    #[test]
    fn test_checkpoint_idempotence() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("p.json"), Mode::Write).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = scaled(2.0, &calls, Some(store.at("scaled"))).apply(input()).unwrap();
        let second = scaled(2.0, &calls, Some(store.at("scaled"))).apply(input()).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
    }

    #[test]
    fn test_modify_recomputes_but_keeps_stored_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("p.json"), Mode::Write).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        scaled(2.0, &calls, Some(store.at("scaled"))).apply(input()).unwrap();
        let stored = store.at("scaled").read().unwrap();

        let modify = store.at("scaled").with_policy(WritePolicy { modify: true, overwrite: false });
        let fresh = scaled(3.0, &calls, Some(modify)).apply(input()).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(fresh.into_matrix().unwrap()[(0, 0)], 3.0);
        assert_eq!(store.at("scaled").read().unwrap(), stored);
    }

    #[test]
    fn test_modify_with_overwrite_replaces_stored_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("p.json"), Mode::Write).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        scaled(2.0, &calls, Some(store.at("scaled"))).apply(input()).unwrap();
        let both = store.at("scaled").with_policy(WritePolicy { modify: true, overwrite: true });
        let fresh = scaled(3.0, &calls, Some(both)).apply(input()).unwrap();

        assert_eq!(store.at("scaled").read_data().unwrap(), fresh);
    }

    #[test]
    fn test_without_io_always_computes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let p = scaled(1.0, &calls, None);
        p.apply(input()).unwrap();
        p.apply(input()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(p.checkpoint().is_none());
    }
}
