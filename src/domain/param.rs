// ============================================================
// Layer 3 — Parameter Slots
// ============================================================
// Every processor type declares its configuration as a Schema:
// an ordered list of Param slots, built once by an explicit
// builder call and kept in a `Lazy` static.
//
//   Param   — one named, typed cell (optional default, mandatory
//             flag, positional flag)
//   Schema  — the immutable slot table of one processor type.
//             Schemas compose by union: a child schema extends its
//             parent and may override slots by name.
//   Args    — construction-time arguments, positional and named
//   Params  — the validated, per-instance binding of Args to a Schema
//
// Binding order:
//   1. positional args fill positional slots in declaration order
//   2. named args fill slots by name
//   3. every value is type-checked against its slot
//   4. any mandatory slot still unbound fails the whole binding
//
// Reference: Rust Book §17 (Object Oriented Patterns, builders)

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;

use crate::domain::data::Data;
use crate::domain::error::ParamError;
use crate::infra::checkpoint::CheckpointView;
use crate::ml::processor::Processor;

/// A pure function over pipeline data, as held by a function slot
pub type DataFn = Arc<dyn Fn(Data) -> Result<Data> + Send + Sync>;

/// Runtime type tag of a parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamType {
    Bool,
    Int,
    Float,
    Str,
    Ints,
    Processor,
    Function,
    Checkpoint,
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamType::Bool       => "bool",
            ParamType::Int        => "int",
            ParamType::Float      => "float",
            ParamType::Str        => "str",
            ParamType::Ints       => "ints",
            ParamType::Processor  => "processor",
            ParamType::Function   => "function",
            ParamType::Checkpoint => "checkpoint",
        };
        f.write_str(name)
    }
}

/// A value that can be bound to a slot.
#[derive(Clone)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Ints(Vec<i64>),
    Processor(Arc<Processor>),
    Function(DataFn),
    Checkpoint(CheckpointView),
}

impl ParamValue {
    pub fn kind(&self) -> ParamType {
        match self {
            ParamValue::Bool(_)       => ParamType::Bool,
            ParamValue::Int(_)        => ParamType::Int,
            ParamValue::Float(_)      => ParamType::Float,
            ParamValue::Str(_)        => ParamType::Str,
            ParamValue::Ints(_)       => ParamType::Ints,
            ParamValue::Processor(_)  => ParamType::Processor,
            ParamValue::Function(_)   => ParamType::Function,
            ParamValue::Checkpoint(_) => ParamType::Checkpoint,
        }
    }
}

impl fmt::Debug for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v)       => write!(f, "Bool({v})"),
            ParamValue::Int(v)        => write!(f, "Int({v})"),
            ParamValue::Float(v)      => write!(f, "Float({v})"),
            ParamValue::Str(v)        => write!(f, "Str({v:?})"),
            ParamValue::Ints(v)       => write!(f, "Ints({v:?})"),
            ParamValue::Processor(p)  => write!(f, "Processor({})", p.name()),
            ParamValue::Function(_)   => f.write_str("Function(..)"),
            ParamValue::Checkpoint(v) => write!(f, "Checkpoint({})", v.key()),
        }
    }
}

/// Scalars compare by value; processors and functions by identity;
/// checkpoints by key.
impl PartialEq for ParamValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ParamValue::Bool(a), ParamValue::Bool(b))             => a == b,
            (ParamValue::Int(a), ParamValue::Int(b))               => a == b,
            (ParamValue::Float(a), ParamValue::Float(b))           => a == b,
            (ParamValue::Str(a), ParamValue::Str(b))               => a == b,
            (ParamValue::Ints(a), ParamValue::Ints(b))             => a == b,
            (ParamValue::Processor(a), ParamValue::Processor(b))   => Arc::ptr_eq(a, b),
            (ParamValue::Function(a), ParamValue::Function(b))     => Arc::ptr_eq(a, b),
            (ParamValue::Checkpoint(a), ParamValue::Checkpoint(b)) => a.key() == b.key(),
            _ => false,
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self { ParamValue::Bool(v) }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self { ParamValue::Int(i64::from(v)) }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self { ParamValue::Int(v) }
}

impl From<usize> for ParamValue {
    fn from(v: usize) -> Self { ParamValue::Int(v as i64) }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self { ParamValue::Float(v) }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self { ParamValue::Str(v.to_string()) }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self { ParamValue::Str(v) }
}

impl From<Vec<i64>> for ParamValue {
    fn from(v: Vec<i64>) -> Self { ParamValue::Ints(v) }
}

impl From<Processor> for ParamValue {
    fn from(p: Processor) -> Self { ParamValue::Processor(Arc::new(p)) }
}

impl From<CheckpointView> for ParamValue {
    fn from(v: CheckpointView) -> Self { ParamValue::Checkpoint(v) }
}

// ─── Param ────────────────────────────────────────────────────────────────────

/// A single configuration slot.
#[derive(Debug, Clone)]
pub struct Param {
    name:       String,
    dtypes:     Vec<ParamType>,
    default:    Option<ParamValue>,
    mandatory:  bool,
    positional: bool,
}

impl Param {
    /// Declare a slot accepting any of `dtypes`
    pub fn new(name: &str, dtypes: &[ParamType]) -> Self {
        Self {
            name:       name.to_string(),
            dtypes:     dtypes.to_vec(),
            default:    None,
            mandatory:  false,
            positional: false,
        }
    }

    pub fn with_default(mut self, value: impl Into<ParamValue>) -> Self {
        let value = value.into();
        debug_assert!(
            self.dtypes.contains(&value.kind()),
            "default of '{}' does not match its declared types",
            self.name
        );
        if !self.mandatory {
            self.default = Some(value);
        }
        self
    }

    /// Mandatory slots never store a default.
    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self.default = None;
        self
    }

    pub fn positional(mut self) -> Self {
        self.positional = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dtypes(&self) -> &[ParamType] {
        &self.dtypes
    }

    pub fn default_value(&self) -> Option<&ParamValue> {
        self.default.as_ref()
    }

    pub fn is_positional(&self) -> bool {
        self.positional
    }

    /// Validate a value against the allowed types.
    pub fn check(&self, value: &ParamValue) -> Result<(), ParamError> {
        if self.dtypes.contains(&value.kind()) {
            return Ok(());
        }
        Err(ParamError::TypeMismatch {
            name:     self.name.clone(),
            expected: self
                .dtypes
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" | "),
            found:    value.kind(),
        })
    }

    /// The effective value of this slot given what was bound to it.
    pub fn resolve<'a>(
        &'a self,
        bound: Option<&'a ParamValue>,
    ) -> Result<Option<&'a ParamValue>, ParamError> {
        match bound {
            Some(value) => Ok(Some(value)),
            None if self.mandatory => Err(ParamError::Missing { name: self.name.clone() }),
            None => Ok(self.default.as_ref()),
        }
    }
}

// ─── Schema ───────────────────────────────────────────────────────────────────

/// The slot table of one processor type, in declaration order.
#[derive(Debug, Clone)]
pub struct Schema {
    name:   String,
    params: Vec<Param>,
}

impl Schema {
    pub fn builder(name: &str) -> SchemaBuilder {
        SchemaBuilder { name: name.to_string(), params: Vec::new() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn get(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn positional(&self) -> impl Iterator<Item = &Param> {
        self.params.iter().filter(|p| p.is_positional())
    }
}

pub struct SchemaBuilder {
    name:   String,
    params: Vec<Param>,
}

impl SchemaBuilder {
    /// Inherit every slot of `parent`
    pub fn extend(self, parent: &Schema) -> Self {
        parent.params.iter().cloned().fold(self, SchemaBuilder::param)
    }

    /// Add a slot. A slot with the same name is replaced in place,
    /// keeping its original position.
    pub fn param(mut self, param: Param) -> Self {
        match self.params.iter_mut().find(|p| p.name == param.name) {
            Some(slot) => *slot = param,
            None => self.params.push(param),
        }
        self
    }

    pub fn build(self) -> Schema {
        Schema { name: self.name, params: self.params }
    }
}

// ─── Args ─────────────────────────────────────────────────────────────────────

/// Construction-time arguments for a processor.
///
/// ```ignore
/// let args = Args::new().arg(3).set("seed", 7);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Args {
    positional: Vec<ParamValue>,
    named:      Vec<(String, ParamValue)>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument
    pub fn arg(mut self, value: impl Into<ParamValue>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Add a named argument
    pub fn set(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        self.named.push((name.to_string(), value.into()));
        self
    }
}

// ─── Params ───────────────────────────────────────────────────────────────────

/// Slot values bound to one processor instance.
#[derive(Debug, Clone)]
pub struct Params {
    schema: &'static Schema,
    values: BTreeMap<String, ParamValue>,
}

impl Params {
    /// Validate `args` against `schema`. Nothing is returned unless every
    /// check passes.
    pub fn bind(schema: &'static Schema, args: Args) -> Result<Self, ParamError> {
        let mut values = BTreeMap::new();

        let positional: Vec<&Param> = schema.positional().collect();
        if args.positional.len() > positional.len() {
            return Err(ParamError::TooManyPositional {
                given:    args.positional.len(),
                accepted: positional.len(),
            });
        }
        for (param, value) in positional.into_iter().zip(args.positional) {
            param.check(&value)?;
            values.insert(param.name.clone(), value);
        }

        for (name, value) in args.named {
            let param = schema
                .get(&name)
                .ok_or_else(|| ParamError::Unknown { name: name.clone() })?;
            if values.contains_key(&name) {
                return Err(ParamError::Duplicate { name });
            }
            param.check(&value)?;
            values.insert(name, value);
        }

        if let Some(missing) = schema
            .params
            .iter()
            .find(|p| p.mandatory && !values.contains_key(&p.name))
        {
            return Err(ParamError::Missing { name: missing.name.clone() });
        }

        Ok(Self { schema, values })
    }

    /// Bind values already known to satisfy the schema.
    pub(crate) fn trusted(schema: &'static Schema, values: Vec<(&str, ParamValue)>) -> Self {
        let values = values
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect();
        Self { schema, values }
    }

    pub fn schema(&self) -> &'static Schema {
        self.schema
    }

    /// The effective value of a slot: the bound value, else the default.
    pub fn get(&self, name: &str) -> Result<Option<&ParamValue>, ParamError> {
        let param = self
            .schema
            .get(name)
            .ok_or_else(|| ParamError::Unknown { name: name.to_string() })?;
        param.resolve(self.values.get(name))
    }

    fn required(&self, name: &str) -> Result<&ParamValue, ParamError> {
        self.get(name)?
            .ok_or_else(|| ParamError::Missing { name: name.to_string() })
    }

    fn mismatch(name: &str, expected: ParamType, found: &ParamValue) -> ParamError {
        ParamError::TypeMismatch {
            name:     name.to_string(),
            expected: expected.to_string(),
            found:    found.kind(),
        }
    }

    pub fn int(&self, name: &str) -> Result<i64, ParamError> {
        match self.required(name)? {
            ParamValue::Int(v) => Ok(*v),
            other => Err(Self::mismatch(name, ParamType::Int, other)),
        }
    }

    /// Like `int`, but for counts and sizes: negative values are rejected.
    pub fn usize(&self, name: &str) -> Result<usize, ParamError> {
        let value = self.int(name)?;
        usize::try_from(value).map_err(|_| ParamError::TypeMismatch {
            name:     name.to_string(),
            expected: "non-negative int".to_string(),
            found:    ParamType::Int,
        })
    }

    /// Floats accept ints as well.
    pub fn float(&self, name: &str) -> Result<f64, ParamError> {
        match self.required(name)? {
            ParamValue::Float(v) => Ok(*v),
            ParamValue::Int(v) => Ok(*v as f64),
            other => Err(Self::mismatch(name, ParamType::Float, other)),
        }
    }

    pub fn bool(&self, name: &str) -> Result<bool, ParamError> {
        match self.required(name)? {
            ParamValue::Bool(v) => Ok(*v),
            other => Err(Self::mismatch(name, ParamType::Bool, other)),
        }
    }

    pub fn str(&self, name: &str) -> Result<&str, ParamError> {
        match self.required(name)? {
            ParamValue::Str(v) => Ok(v),
            other => Err(Self::mismatch(name, ParamType::Str, other)),
        }
    }

    pub fn ints(&self, name: &str) -> Result<Option<&[i64]>, ParamError> {
        match self.get(name)? {
            None => Ok(None),
            Some(ParamValue::Ints(v)) => Ok(Some(v)),
            Some(other) => Err(Self::mismatch(name, ParamType::Ints, other)),
        }
    }

    pub fn processor(&self, name: &str) -> Result<Option<&Processor>, ParamError> {
        match self.get(name)? {
            None => Ok(None),
            Some(ParamValue::Processor(p)) => Ok(Some(p)),
            Some(other) => Err(Self::mismatch(name, ParamType::Processor, other)),
        }
    }

    pub fn function(&self, name: &str) -> Result<&DataFn, ParamError> {
        match self.required(name)? {
            ParamValue::Function(f) => Ok(f),
            other => Err(Self::mismatch(name, ParamType::Function, other)),
        }
    }

    pub fn checkpoint(&self, name: &str) -> Result<Option<&CheckpointView>, ParamError> {
        match self.get(name)? {
            None => Ok(None),
            Some(ParamValue::Checkpoint(v)) => Ok(Some(v)),
            Some(other) => Err(Self::mismatch(name, ParamType::Checkpoint, other)),
        }
    }
}
