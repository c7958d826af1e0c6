// ============================================================
// Layer 3 — Stored Arrays and Attributes
// ============================================================
// NdArray is what the checkpoint store persists: a shape plus a
// row-major buffer of one element type.
//
// Conversions to and from the pipeline's Data values live here
// so the store itself never needs to know about nalgebra.
//
// Element types:
//   F32 — persisted embeddings and projections
//   F64 — raw stage outputs
//   U8  — cluster labels when k fits in a byte
//   U32 — indices and larger label sets
//   I64 — integer inputs such as class labels

use std::collections::BTreeMap;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::domain::data::Data;
use crate::domain::error::StoreError;

/// Metadata attached to a stored key, read back verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Int(i64),
    Ints(Vec<i64>),
    Float(f64),
    Str(String),
}

impl AttrValue {
    pub fn is_finite(&self) -> bool {
        match self {
            AttrValue::Float(x) => x.is_finite(),
            _ => true,
        }
    }
}

pub type Attrs = BTreeMap<String, AttrValue>;

/// Row-major element buffer of a single type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArrayData {
    F32(Vec<f32>),
    F64(Vec<f64>),
    U8(Vec<u8>),
    U32(Vec<u32>),
    I64(Vec<i64>),
}

impl ArrayData {
    pub fn len(&self) -> usize {
        match self {
            ArrayData::F32(v) => v.len(),
            ArrayData::F64(v) => v.len(),
            ArrayData::U8(v)  => v.len(),
            ArrayData::U32(v) => v.len(),
            ArrayData::I64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> &'static str {
        match self {
            ArrayData::F32(_) => "f32",
            ArrayData::F64(_) => "f64",
            ArrayData::U8(_)  => "u8",
            ArrayData::U32(_) => "u32",
            ArrayData::I64(_) => "i64",
        }
    }

    /// False when a float element is NaN or infinite. JSON has no
    /// encoding for those values.
    pub fn is_finite(&self) -> bool {
        match self {
            ArrayData::F32(v) => v.iter().all(|x| x.is_finite()),
            ArrayData::F64(v) => v.iter().all(|x| x.is_finite()),
            _ => true,
        }
    }

    fn is_integer(&self) -> bool {
        matches!(self, ArrayData::U8(_) | ArrayData::U32(_) | ArrayData::I64(_))
    }

    fn to_f64(&self) -> Vec<f64> {
        match self {
            ArrayData::F32(v) => v.iter().map(|&x| f64::from(x)).collect(),
            ArrayData::F64(v) => v.clone(),
            ArrayData::U8(v)  => v.iter().map(|&x| f64::from(x)).collect(),
            ArrayData::U32(v) => v.iter().map(|&x| f64::from(x)).collect(),
            ArrayData::I64(v) => v.iter().map(|&x| x as f64).collect(),
        }
    }

    /// Keep only the given element ranges, in order
    fn gather(&self, ranges: &[std::ops::Range<usize>]) -> ArrayData {
        fn pick<T: Copy>(v: &[T], ranges: &[std::ops::Range<usize>]) -> Vec<T> {
            ranges.iter().flat_map(|r| v[r.clone()].iter().copied()).collect()
        }
        match self {
            ArrayData::F32(v) => ArrayData::F32(pick(v, ranges)),
            ArrayData::F64(v) => ArrayData::F64(pick(v, ranges)),
            ArrayData::U8(v)  => ArrayData::U8(pick(v, ranges)),
            ArrayData::U32(v) => ArrayData::U32(pick(v, ranges)),
            ArrayData::I64(v) => ArrayData::I64(pick(v, ranges)),
        }
    }
}

/// An n-dimensional array with a row-major buffer.
/// The buffer always holds exactly `shape.product()` elements,
/// including after deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawNdArray")]
pub struct NdArray {
    shape: Vec<usize>,
    data:  ArrayData,
}

#[derive(Deserialize)]
struct RawNdArray {
    shape: Vec<usize>,
    data:  ArrayData,
}

impl TryFrom<RawNdArray> for NdArray {
    type Error = StoreError;

    fn try_from(raw: RawNdArray) -> Result<Self, StoreError> {
        NdArray::new(raw.shape, raw.data)
    }
}

impl NdArray {
    /// Build an array, checking that the buffer fills the shape exactly.
    pub fn new(shape: Vec<usize>, data: ArrayData) -> Result<Self, StoreError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(StoreError::Conversion(format!(
                "shape {:?} needs {} elements, buffer has {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn dtype(&self) -> &'static str {
        self.data.dtype()
    }

    pub fn is_finite(&self) -> bool {
        self.data.is_finite()
    }

    // ── Construction from pipeline values ────────────────────────────────────

    pub fn from_matrix(m: &DMatrix<f64>) -> Self {
        let (rows, cols) = m.shape();
        let data = (0..rows)
            .flat_map(|i| (0..cols).map(move |j| m[(i, j)]))
            .collect();
        Self { shape: vec![rows, cols], data: ArrayData::F64(data) }
    }

    pub fn from_vector(v: &DVector<f64>) -> Self {
        Self { shape: vec![v.len()], data: ArrayData::F64(v.iter().copied().collect()) }
    }

    pub fn from_u32(values: &[u32]) -> Self {
        Self { shape: vec![values.len()], data: ArrayData::U32(values.to_vec()) }
    }

    /// Labels as bytes. Values above 255 are rejected.
    pub fn from_u8_labels(values: &[u32]) -> Result<Self, StoreError> {
        let bytes = values
            .iter()
            .map(|&v| u8::try_from(v))
            .collect::<Result<Vec<u8>, _>>()
            .map_err(|_| StoreError::Conversion("label does not fit in u8".into()))?;
        Ok(Self { shape: vec![values.len()], data: ArrayData::U8(bytes) })
    }

    /// Cast floating point data to f32, leaving integer arrays alone.
    pub fn to_f32(&self) -> Self {
        let data = match &self.data {
            ArrayData::F64(v) => ArrayData::F32(v.iter().map(|&x| x as f32).collect()),
            other => other.clone(),
        };
        Self { shape: self.shape.clone(), data }
    }

    // ── Conversion back to pipeline values ───────────────────────────────────

    /// Interpret a 2-D array as a matrix.
    pub fn to_matrix(&self) -> Result<DMatrix<f64>, StoreError> {
        if self.ndim() != 2 {
            return Err(StoreError::Conversion(format!(
                "expected a 2-D array, got shape {:?}",
                self.shape
            )));
        }
        self.flatten_rows()
    }

    /// Reshape `[n, d1, d2, ...]` into an `n × (d1·d2·…)` matrix.
    pub fn flatten_rows(&self) -> Result<DMatrix<f64>, StoreError> {
        let Some((&rows, rest)) = self.shape.split_first() else {
            return Err(StoreError::Conversion("cannot flatten a 0-D array".into()));
        };
        let cols: usize = rest.iter().product();
        Ok(DMatrix::from_row_slice(rows, cols, &self.data.to_f64()))
    }

    pub fn to_vector(&self) -> Result<DVector<f64>, StoreError> {
        if self.ndim() != 1 {
            return Err(StoreError::Conversion(format!(
                "expected a 1-D array, got shape {:?}",
                self.shape
            )));
        }
        Ok(DVector::from_vec(self.data.to_f64()))
    }

    /// Integer contents as i64. Float arrays are rejected.
    pub fn to_i64_vec(&self) -> Result<Vec<i64>, StoreError> {
        match &self.data {
            ArrayData::U8(v)  => Ok(v.iter().map(|&x| i64::from(x)).collect()),
            ArrayData::U32(v) => Ok(v.iter().map(|&x| i64::from(x)).collect()),
            ArrayData::I64(v) => Ok(v.clone()),
            other => Err(StoreError::Conversion(format!(
                "expected integer data, got {}",
                other.dtype()
            ))),
        }
    }

    /// Integer contents as u32, as used for label arrays.
    pub fn to_u32_vec(&self) -> Result<Vec<u32>, StoreError> {
        self.to_i64_vec()?
            .into_iter()
            .map(|x| u32::try_from(x).map_err(|_| StoreError::Conversion(format!("{x} is not a valid u32"))))
            .collect()
    }

    /// Select rows along the first axis.
    pub fn select_rows(&self, rows: &[usize]) -> Result<Self, StoreError> {
        let Some((&n, rest)) = self.shape.split_first() else {
            return Err(StoreError::Conversion("cannot select rows of a 0-D array".into()));
        };
        let stride: usize = rest.iter().product();
        if let Some(&bad) = rows.iter().find(|&&r| r >= n) {
            return Err(StoreError::Conversion(format!("row {bad} out of range for {n} rows")));
        }
        let ranges: Vec<_> = rows.iter().map(|&r| r * stride..(r + 1) * stride).collect();
        let mut shape = self.shape.clone();
        shape[0] = rows.len();
        Ok(Self { shape, data: self.data.gather(&ranges) })
    }

    /// Average over the second axis: `[n, c, ...] → [n, ...]` in f64.
    /// Used to collapse colour channels of attribution maps.
    pub fn mean_axis1(&self) -> Result<Self, StoreError> {
        if self.ndim() < 2 {
            return Err(StoreError::Conversion(format!(
                "mean over axis 1 needs at least 2 dimensions, got shape {:?}",
                self.shape
            )));
        }
        let (n, c) = (self.shape[0], self.shape[1]);
        let inner: usize = self.shape[2..].iter().product();
        let values = self.data.to_f64();
        let mut out = vec![0.0; n * inner];
        for i in 0..n {
            for ch in 0..c {
                let src = &values[(i * c + ch) * inner..(i * c + ch + 1) * inner];
                for (dst, &x) in out[i * inner..(i + 1) * inner].iter_mut().zip(src) {
                    *dst += x;
                }
            }
        }
        if c > 0 {
            out.iter_mut().for_each(|x| *x /= c as f64);
        }
        let mut shape = vec![n];
        shape.extend_from_slice(&self.shape[2..]);
        Ok(Self { shape, data: ArrayData::F64(out) })
    }

    /// Turn the array into the matching pipeline value:
    /// 2-D → Matrix, 1-D integer → Labels, 1-D float → Vector.
    pub fn to_data(&self) -> Result<Data, StoreError> {
        match self.ndim() {
            2 => Ok(Data::Matrix(self.to_matrix()?)),
            1 if self.data.is_integer() => Ok(Data::Labels(self.to_u32_vec()?)),
            1 => Ok(Data::Vector(self.to_vector()?)),
            _ => Err(StoreError::Conversion(format!(
                "no pipeline value for shape {:?}",
                self.shape
            ))),
        }
    }
}

/// Half-open integer range as an attribute, e.g. consumed eigenvector columns
pub fn range_attr(range: std::ops::Range<usize>) -> AttrValue {
    AttrValue::Ints(range.map(|i| i as i64).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_wrong_length() {
        let err = NdArray::new(vec![2, 3], ArrayData::F64(vec![0.0; 5])).unwrap_err();
        assert!(matches!(err, StoreError::Conversion(_)));
    }

    #[test]
    fn test_matrix_is_row_major() {
        let m = DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let a = NdArray::from_matrix(&m);
        assert_eq!(a.shape(), &[2, 3]);
        assert_eq!(a.data(), &ArrayData::F64(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]));
        assert_eq!(a.to_matrix().unwrap(), m);
    }

    #[test]
    fn test_flatten_rows_of_3d_array() {
        let a = NdArray::new(vec![2, 2, 2], ArrayData::I64((0..8).collect())).unwrap();
        let m = a.flatten_rows().unwrap();
        assert_eq!(m.shape(), (2, 4));
        assert_eq!(m[(1, 0)], 4.0);
    }

    #[test]
    fn test_select_rows_keeps_inner_shape() {
        let a = NdArray::new(vec![3, 2], ArrayData::U32(vec![0, 1, 2, 3, 4, 5])).unwrap();
        let picked = a.select_rows(&[2, 0]).unwrap();
        assert_eq!(picked.shape(), &[2, 2]);
        assert_eq!(picked.data(), &ArrayData::U32(vec![4, 5, 0, 1]));
        assert!(a.select_rows(&[3]).is_err());
    }

    #[test]
    fn test_mean_axis1_collapses_channels() {
        // 1 sample, 2 channels, 2 pixels
        let a = NdArray::new(vec![1, 2, 2], ArrayData::F32(vec![1.0, 2.0, 3.0, 6.0])).unwrap();
        let mean = a.mean_axis1().unwrap();
        assert_eq!(mean.shape(), &[1, 2]);
        assert_eq!(mean.data(), &ArrayData::F64(vec![2.0, 4.0]));
    }

    #[test]
    fn test_to_data_picks_variant_by_shape_and_dtype() {
        let labels = NdArray::from_u32(&[0, 1, 1]);
        assert_eq!(labels.to_data().unwrap(), Data::Labels(vec![0, 1, 1]));

        let vector = NdArray::from_vector(&DVector::from_vec(vec![0.5]));
        assert!(matches!(vector.to_data().unwrap(), Data::Vector(_)));
    }

    #[test]
    fn test_deserialize_checks_shape_against_buffer() {
        let ok: NdArray = serde_json::from_str(r#"{"shape":[2,2],"data":{"F32":[1.0,2.0,3.0,4.0]}}"#).unwrap();
        assert_eq!(ok.to_matrix().unwrap().shape(), (2, 2));

        let short = serde_json::from_str::<NdArray>(r#"{"shape":[4,4],"data":{"F32":[1.0]}}"#);
        let err = short.unwrap_err().to_string();
        assert!(err.contains("needs 16 elements"), "{err}");
    }

    #[test]
    fn test_non_finite_values_are_detected() {
        assert!(NdArray::from_u32(&[1, 2]).is_finite());
        let nan = NdArray::new(vec![2], ArrayData::F32(vec![f32::NAN, 1.0])).unwrap();
        assert!(!nan.is_finite());
        let inf = NdArray::from_vector(&DVector::from_vec(vec![f64::INFINITY]));
        assert!(!inf.is_finite());
        assert!(!AttrValue::Float(f64::NAN).is_finite());
        assert!(AttrValue::Ints(vec![1]).is_finite());
    }

    #[test]
    fn test_u8_labels_reject_overflow() {
        assert!(NdArray::from_u8_labels(&[0, 255]).is_ok());
        assert!(NdArray::from_u8_labels(&[256]).is_err());
    }
}
