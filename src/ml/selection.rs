// Column selection shared by the clustering and projection stages.

use std::ops::Range;

use anyhow::{bail, Result};
use nalgebra::DMatrix;

/// Keep the listed columns, in the listed order. `None` keeps all.
pub fn select_columns(m: &DMatrix<f64>, columns: Option<&[i64]>) -> Result<DMatrix<f64>> {
    let Some(columns) = columns else {
        return Ok(m.clone());
    };
    let mut picked = Vec::with_capacity(columns.len());
    for &c in columns {
        match usize::try_from(c) {
            Ok(c) if c < m.ncols() => picked.push(c),
            _ => bail!("column {c} out of range for {} columns", m.ncols()),
        }
    }
    Ok(DMatrix::from_fn(m.nrows(), picked.len(), |i, j| m[(i, picked[j])]))
}

/// The last `count` column indices of an `ncols`-wide matrix
pub fn trailing_columns(ncols: usize, count: usize) -> Range<usize> {
    ncols.saturating_sub(count)..ncols
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_and_trailing() {
        let m = DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let cols: Vec<i64> = trailing_columns(3, 2).map(|c| c as i64).collect();
        let picked = select_columns(&m, Some(&cols)).unwrap();
        assert_eq!(picked, DMatrix::from_row_slice(2, 2, &[2.0, 3.0, 5.0, 6.0]));
        assert_eq!(trailing_columns(3, 10), 0..3);
        assert!(select_columns(&m, Some(&[3])).is_err());
        assert!(select_columns(&m, Some(&[-1])).is_err());
    }
}
