// ============================================================
// Layer 5 — Pipelines
// ============================================================
// A Pipeline is a processor whose slots are themselves processors.
// Its stage order is the declaration order of those slots in the
// pipeline type's schema; nothing can reorder it at runtime.
//
//   input ──► stage 1 ──► stage 2 ──► … ──► stage n ──► output
//
// Stages only talk through the value handed along the chain. Any
// stage may carry its own checkpoint, so a run where the first
// stages are read back and the last ones recomputed is normal.
//
// SpectralEmbedding:
//   preprocessing → pairwise_distance → affinity → laplacian → embedding
//
// Reference: von Luxburg (2007) A Tutorial on Spectral Clustering

use anyhow::Result;
use once_cell::sync::Lazy;

use crate::domain::data::Data;
use crate::domain::error::ParamError;
use crate::domain::param::{Args, Param, ParamType, Params, Schema};
use crate::ml::processor::Processor;

/// Stage slots of the spectral embedding pipeline, in execution order.
pub static SPECTRAL_EMBEDDING: Lazy<Schema> = Lazy::new(|| {
    Schema::builder("SpectralEmbedding")
        .param(Param::new("preprocessing", &[ParamType::Processor]).with_default(Processor::identity()))
        .param(Param::new("pairwise_distance", &[ParamType::Processor]).mandatory())
        .param(Param::new("affinity", &[ParamType::Processor]).mandatory())
        .param(Param::new("laplacian", &[ParamType::Processor]).mandatory())
        .param(Param::new("embedding", &[ParamType::Processor]).mandatory())
        .build()
});

#[derive(Debug)]
pub struct Pipeline {
    params: Params,
}

impl Pipeline {
    /// Bind stage processors to the stage slots of `schema`.
    pub fn new(schema: &'static Schema, args: Args) -> Result<Self, ParamError> {
        Ok(Self { params: Params::bind(schema, args)? })
    }

    pub fn name(&self) -> &str {
        self.params.schema().name()
    }

    /// Stages in execution order. Unbound optional stages without a
    /// default are left out, which makes them pass-throughs.
    pub fn stages(&self) -> Result<Vec<(&str, &Processor)>, ParamError> {
        let mut stages = Vec::new();
        for param in self.params.schema().params() {
            if !matches!(param.dtypes(), [ParamType::Processor]) {
                continue;
            }
            if let Some(stage) = self.params.processor(param.name())? {
                stages.push((param.name(), stage));
            }
        }
        Ok(stages)
    }

    pub fn apply(&self, input: Data) -> Result<Data> {
        let mut value = input;
        for (slot, stage) in self.stages()? {
            match stage.checkpoint() {
                Some(view) => tracing::debug!(
                    "{}: stage '{}' ({}, checkpoint '{}')",
                    self.name(),
                    slot,
                    stage.name(),
                    view.key()
                ),
                None => tracing::debug!("{}: stage '{}' ({})", self.name(), slot, stage.name()),
            }
            value = match stage.apply(value) {
                Ok(value) => value,
                Err(e) => {
                    tracing::error!("{} stage '{}' failed: {e}", self.name(), slot);
                    return Err(e);
                }
            };
        }
        Ok(value)
    }
}

/// Build a spectral embedding pipeline from named stage processors.
///
/// ```ignore
/// let pipeline = spectral_embedding(
///     Args::new()
///         .set("pairwise_distance", PairwiseDistance::processor(Args::new())?)
///         .set("affinity", SparseKnn::processor(Args::new().arg(10))?)
///         .set("laplacian", SymmetricNormalLaplacian::processor(Args::new())?)
///         .set("embedding", EigenDecomposition::processor(Args::new().arg(32))?),
/// )?;
/// ```
pub fn spectral_embedding(args: Args) -> Result<Processor, ParamError> {
    Ok(Processor::Pipeline(Pipeline::new(&SPECTRAL_EMBEDDING, args)?))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;
    use parking_lot::Mutex;
    use std::sync::Arc;

    static THREE_STAGES: Lazy<Schema> = Lazy::new(|| {
        Schema::builder("ThreeStages")
            .param(Param::new("first", &[ParamType::Processor]).mandatory())
            .param(Param::new("second", &[ParamType::Processor]).with_default(Processor::identity()))
            .param(Param::new("third", &[ParamType::Processor]).mandatory())
            .param(Param::new("label", &[ParamType::Str]).with_default("unused"))
            .build()
    });

    type Trace = Arc<Mutex<Vec<(&'static str, f64)>>>;

    /// Records (stage, first input element) and adds one
    fn recorder(name: &'static str, trace: &Trace) -> Processor {
        let trace = trace.clone();
        Processor::function(move |data| {
            let m = data.into_matrix()?;
            trace.lock().push((name, m[(0, 0)]));
            Ok(Data::Matrix(m.add_scalar(1.0)))
        })
    }

    fn seed() -> Data {
        Data::Matrix(DMatrix::from_element(1, 1, 0.0))
    }

    #[test]
    fn test_stages_run_in_declared_order() {
        let trace: Trace = Arc::new(Mutex::new(Vec::new()));
        // named args given out of order on purpose
        let pipeline = Pipeline::new(
            &THREE_STAGES,
            Args::new()
                .set("third", recorder("third", &trace))
                .set("second", recorder("second", &trace))
                .set("first", recorder("first", &trace)),
        )
        .unwrap();

        let out = pipeline.apply(seed()).unwrap().into_matrix().unwrap();
        assert_eq!(*trace.lock(), vec![("first", 0.0), ("second", 1.0), ("third", 2.0)]);
        assert_eq!(out[(0, 0)], 3.0);
    }

    #[test]
    fn test_unbound_stage_defaults_to_identity() {
        let trace: Trace = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(
            &THREE_STAGES,
            Args::new()
                .set("first", recorder("first", &trace))
                .set("third", recorder("third", &trace)),
        )
        .unwrap();

        let names: Vec<_> = pipeline.stages().unwrap().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["first", "second", "third"]);

        let out = pipeline.apply(seed()).unwrap().into_matrix().unwrap();
        assert_eq!(*trace.lock(), vec![("first", 0.0), ("third", 1.0)]);
        assert_eq!(out[(0, 0)], 2.0);
    }

    #[test]
    fn test_missing_stage_fails_construction() {
        let trace: Trace = Arc::new(Mutex::new(Vec::new()));
        let err = Pipeline::new(&THREE_STAGES, Args::new().set("first", recorder("first", &trace)))
            .unwrap_err();
        assert_eq!(err, ParamError::Missing { name: "third".into() });
    }

    #[test]
    fn test_stage_slot_rejects_non_processor() {
        let err = spectral_embedding(Args::new().set("affinity", 10)).unwrap_err();
        assert!(matches!(err, ParamError::TypeMismatch { .. }));
    }

    #[test]
    fn test_stage_error_propagates_unchanged() {
        let failing = Processor::function(|_| Err(anyhow::anyhow!("eigensolver diverged")));
        let pipeline = Pipeline::new(
            &THREE_STAGES,
            Args::new().set("first", Processor::identity()).set("third", failing),
        )
        .unwrap();
        let err = pipeline.apply(seed()).unwrap_err();
        assert_eq!(err.to_string(), "eigensolver diverged");
        assert_eq!(err.chain().count(), 1);
    }
}
