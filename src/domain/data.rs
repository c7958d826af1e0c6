// ============================================================
// Layer 3 — Pipeline Data
// ============================================================
// The single value handed from one processor to the next.
//
// A closed enum keeps stage contracts explicit:
//   distance    Matrix(n×d)  → Matrix(n×n)
//   affinity    Matrix(n×n)  → Matrix(n×n)
//   laplacian   Matrix(n×n)  → Matrix(n×n)
//   embedding   Matrix(n×n)  → Record{eigenvalue, eigenvector}
//   clustering  Matrix(n×d)  → Labels(n)
//   tsne        Matrix(n×d)  → Matrix(n×2)

use anyhow::{anyhow, Result};
use nalgebra::{DMatrix, DVector};

#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    Matrix(DMatrix<f64>),
    Vector(DVector<f64>),
    Labels(Vec<u32>),
    /// Named outputs of a stage, in a fixed order
    Record(Vec<(String, Data)>),
}

impl Data {
    /// Short name of the variant, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Data::Matrix(_) => "matrix",
            Data::Vector(_) => "vector",
            Data::Labels(_) => "labels",
            Data::Record(_) => "record",
        }
    }

    pub fn into_matrix(self) -> Result<DMatrix<f64>> {
        match self {
            Data::Matrix(m) => Ok(m),
            other => Err(anyhow!("expected matrix, got {}", other.kind())),
        }
    }

    pub fn into_vector(self) -> Result<DVector<f64>> {
        match self {
            Data::Vector(v) => Ok(v),
            other => Err(anyhow!("expected vector, got {}", other.kind())),
        }
    }

    pub fn into_labels(self) -> Result<Vec<u32>> {
        match self {
            Data::Labels(l) => Ok(l),
            other => Err(anyhow!("expected labels, got {}", other.kind())),
        }
    }

    /// Borrow one field of a record
    pub fn field(&self, name: &str) -> Option<&Data> {
        match self {
            Data::Record(fields) => fields
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value),
            _ => None,
        }
    }

    /// Take one field out of a record, dropping the rest
    pub fn into_field(self, name: &str) -> Result<Data> {
        match self {
            Data::Record(fields) => fields
                .into_iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value)
                .ok_or_else(|| anyhow!("record has no field '{name}'")),
            other => Err(anyhow!("expected record, got {}", other.kind())),
        }
    }
}

/// Feature rows picked from a source, with their original row numbers.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub indices:  Vec<u32>,
    pub features: DMatrix<f64>,
}

impl Selection {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

impl From<DMatrix<f64>> for Data {
    fn from(m: DMatrix<f64>) -> Self {
        Data::Matrix(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_field_lookup() {
        let record = Data::Record(vec![
            ("eigenvalue".into(), Data::Vector(DVector::from_vec(vec![1.0, 2.0]))),
            ("eigenvector".into(), Data::Matrix(DMatrix::zeros(3, 2))),
        ]);
        assert_eq!(record.field("eigenvalue").map(Data::kind), Some("vector"));
        assert!(record.field("missing").is_none());

        let m = record.into_field("eigenvector").unwrap().into_matrix().unwrap();
        assert_eq!(m.shape(), (3, 2));
    }

    #[test]
    fn test_wrong_variant_is_an_error() {
        let labels = Data::Labels(vec![0, 1]);
        let err = labels.into_matrix().unwrap_err();
        assert!(err.to_string().contains("expected matrix"));
    }
}
